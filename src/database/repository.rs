//! Storage port for the marketplace records.
//!
//! Every mutable record carries a `version`. `save_*` is a compare-and-swap:
//! it writes only if the stored version still equals the one the caller
//! loaded, then bumps it. A lost race surfaces as
//! `AppError::ConcurrentModification` and nothing is written.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::Result;
use crate::models::{
    application::Application, dispute::Dispute, payment_intent::PaymentIntent, payout::Payout,
    stint::{Stint, StintStatus},
};

pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    const COLLECTION: &'static str;
    const ENTITY: &'static str;

    /// Field that no two stored records may share while it is set. Backed
    /// by a unique index in Mongo.
    const UNIQUE_FIELD: Option<&'static str> = None;

    fn id(&self) -> &str;
    fn version(&self) -> i64;
    fn set_version(&mut self, version: i64);
}

macro_rules! record {
    ($ty:ty, $collection:literal, $entity:literal) => {
        record!($ty, $collection, $entity, None);
    };
    ($ty:ty, $collection:literal, $entity:literal, unique = $field:literal) => {
        record!($ty, $collection, $entity, Some($field));
    };
    ($ty:ty, $collection:literal, $entity:literal, $unique:expr) => {
        impl Record for $ty {
            const COLLECTION: &'static str = $collection;
            const ENTITY: &'static str = $entity;
            const UNIQUE_FIELD: Option<&'static str> = $unique;

            fn id(&self) -> &str {
                &self.id
            }

            fn version(&self) -> i64 {
                self.version
            }

            fn set_version(&mut self, version: i64) {
                self.version = version;
            }
        }
    };
}

record!(Stint, "stints", "stint");
record!(Application, "applications", "application", unique = "active_slot");
record!(PaymentIntent, "payment_intents", "payment intent", unique = "active_slot");
record!(Dispute, "disputes", "dispute");
record!(Payout, "payouts", "payout", unique = "stint_id");

#[derive(Debug, Default, Clone)]
pub struct StintFilter {
    pub employer_id: Option<String>,
    pub status: Option<StintStatus>,
}

impl StintFilter {
    pub fn matches(&self, stint: &Stint) -> bool {
        self.employer_id
            .as_deref()
            .map_or(true, |employer| stint.employer_id == employer)
            && self.status.map_or(true, |status| stint.status == status)
    }
}

#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn insert_stint(&self, stint: &Stint) -> Result<()>;
    async fn get_stint(&self, id: &str) -> Result<Option<Stint>>;
    /// Newest first.
    async fn list_stints(&self, filter: &StintFilter) -> Result<Vec<Stint>>;
    async fn save_stint(&self, stint: &mut Stint) -> Result<()>;

    /// A second active application by the same professional on the same
    /// stint is `DuplicateKey`.
    async fn insert_application(&self, application: &Application) -> Result<()>;
    async fn get_application(&self, id: &str) -> Result<Option<Application>>;
    async fn applications_for_stint(&self, stint_id: &str) -> Result<Vec<Application>>;
    async fn save_application(&self, application: &mut Application) -> Result<()>;

    /// A second active intent for the same stint and application is
    /// `DuplicateKey`.
    async fn insert_intent(&self, intent: &PaymentIntent) -> Result<()>;
    async fn get_intent(&self, id: &str) -> Result<Option<PaymentIntent>>;
    async fn intent_by_gateway_ref(&self, gateway_ref: &str) -> Result<Option<PaymentIntent>>;
    async fn intents_for_stint(&self, stint_id: &str) -> Result<Vec<PaymentIntent>>;
    /// Intents still in `initiated` or `pending`.
    async fn active_intents(&self) -> Result<Vec<PaymentIntent>>;
    async fn save_intent(&self, intent: &mut PaymentIntent) -> Result<()>;

    async fn insert_dispute(&self, dispute: &Dispute) -> Result<()>;
    async fn get_dispute(&self, id: &str) -> Result<Option<Dispute>>;
    async fn disputes_for_stint(&self, stint_id: &str) -> Result<Vec<Dispute>>;
    async fn save_dispute(&self, dispute: &mut Dispute) -> Result<()>;

    /// At most one payout per stint; a second insert is `DuplicateKey`.
    async fn insert_payout(&self, payout: &Payout) -> Result<()>;
    async fn payout_for_stint(&self, stint_id: &str) -> Result<Option<Payout>>;
    /// Looks up a payout by the processor's transfer reference.
    async fn payout_by_gateway_ref(&self, gateway_ref: &str) -> Result<Option<Payout>>;
    async fn save_payout(&self, payout: &mut Payout) -> Result<()>;
}
