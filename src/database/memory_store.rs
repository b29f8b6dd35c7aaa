//! In-memory store
//!
//! Used by tests and local development without MongoDB. Records are kept as
//! JSON documents per collection so reads never alias live state, matching
//! what a document store hands back.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::database::repository::{MarketStore, Record, StintFilter};
use crate::errors::{AppError, Result};
use crate::models::{
    application::Application, dispute::Dispute, payment_intent::PaymentIntent, payout::Payout,
    stint::Stint,
};

type Collection = HashMap<String, Value>;

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<&'static str, Collection>>,
}

fn poisoned() -> AppError {
    AppError::service("memory store lock poisoned")
}

/// Mirrors the unique indexes: no other record may hold the same non-null
/// value in the record type's unique field.
fn ensure_unique<T: Record>(collection: &Collection, id: &str, value: &Value) -> Result<()> {
    let Some(field) = T::UNIQUE_FIELD else {
        return Ok(());
    };
    let Some(key) = value.get(field).filter(|v| !v.is_null()) else {
        return Ok(());
    };
    let taken = collection
        .iter()
        .any(|(other_id, other)| other_id != id && other.get(field) == Some(key));
    if taken {
        return Err(AppError::DuplicateKey);
    }
    Ok(())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a collection.
    pub fn count<T: Record>(&self) -> usize {
        self.collections
            .read()
            .map(|c| c.get(T::COLLECTION).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    fn insert<T: Record>(&self, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)?;
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let collection = collections.entry(T::COLLECTION).or_default();
        if collection.contains_key(record.id()) {
            return Err(AppError::DuplicateKey);
        }
        ensure_unique::<T>(collection, record.id(), &value)?;
        collection.insert(record.id().to_string(), value);
        Ok(())
    }

    fn find_by_id<T: Record>(&self, id: &str) -> Result<Option<T>> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        collections
            .get(T::COLLECTION)
            .and_then(|c| c.get(id))
            .map(|value| serde_json::from_value(value.clone()).map_err(AppError::from))
            .transpose()
    }

    fn scan<T: Record>(&self, predicate: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        let mut found = Vec::new();
        if let Some(collection) = collections.get(T::COLLECTION) {
            for value in collection.values() {
                let record: T = serde_json::from_value(value.clone())?;
                if predicate(&record) {
                    found.push(record);
                }
            }
        }
        Ok(found)
    }

    fn replace<T: Record>(&self, record: &mut T) -> Result<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let collection = collections.entry(T::COLLECTION).or_default();

        let stored_version = collection
            .get(record.id())
            .and_then(|value| value.get("version"))
            .and_then(Value::as_i64);
        if stored_version != Some(record.version()) {
            return Err(AppError::ConcurrentModification {
                entity: T::ENTITY,
                id: record.id().to_string(),
            });
        }

        record.set_version(record.version() + 1);
        let value = match serde_json::to_value(&*record) {
            Ok(value) => value,
            Err(e) => {
                record.set_version(record.version() - 1);
                return Err(e.into());
            }
        };
        if let Err(e) = ensure_unique::<T>(collection, record.id(), &value) {
            record.set_version(record.version() - 1);
            return Err(e);
        }
        collection.insert(record.id().to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn insert_stint(&self, stint: &Stint) -> Result<()> {
        self.insert(stint)
    }

    async fn get_stint(&self, id: &str) -> Result<Option<Stint>> {
        self.find_by_id(id)
    }

    async fn list_stints(&self, filter: &StintFilter) -> Result<Vec<Stint>> {
        let mut stints = self.scan(|s: &Stint| filter.matches(s))?;
        stints.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stints)
    }

    async fn save_stint(&self, stint: &mut Stint) -> Result<()> {
        self.replace(stint)
    }

    async fn insert_application(&self, application: &Application) -> Result<()> {
        self.insert(application)
    }

    async fn get_application(&self, id: &str) -> Result<Option<Application>> {
        self.find_by_id(id)
    }

    async fn applications_for_stint(&self, stint_id: &str) -> Result<Vec<Application>> {
        let mut applications = self.scan(|a: &Application| a.stint_id == stint_id)?;
        applications.sort_by(|a, b| a.applied_at.cmp(&b.applied_at));
        Ok(applications)
    }

    async fn save_application(&self, application: &mut Application) -> Result<()> {
        self.replace(application)
    }

    async fn insert_intent(&self, intent: &PaymentIntent) -> Result<()> {
        self.insert(intent)
    }

    async fn get_intent(&self, id: &str) -> Result<Option<PaymentIntent>> {
        self.find_by_id(id)
    }

    async fn intent_by_gateway_ref(&self, gateway_ref: &str) -> Result<Option<PaymentIntent>> {
        Ok(self
            .scan(|i: &PaymentIntent| i.gateway_ref.as_deref() == Some(gateway_ref))?
            .into_iter()
            .next())
    }

    async fn intents_for_stint(&self, stint_id: &str) -> Result<Vec<PaymentIntent>> {
        self.scan(|i: &PaymentIntent| i.stint_id == stint_id)
    }

    async fn active_intents(&self) -> Result<Vec<PaymentIntent>> {
        self.scan(|i: &PaymentIntent| i.status.is_active())
    }

    async fn save_intent(&self, intent: &mut PaymentIntent) -> Result<()> {
        self.replace(intent)
    }

    async fn insert_dispute(&self, dispute: &Dispute) -> Result<()> {
        self.insert(dispute)
    }

    async fn get_dispute(&self, id: &str) -> Result<Option<Dispute>> {
        self.find_by_id(id)
    }

    async fn disputes_for_stint(&self, stint_id: &str) -> Result<Vec<Dispute>> {
        self.scan(|d: &Dispute| d.stint_id == stint_id)
    }

    async fn save_dispute(&self, dispute: &mut Dispute) -> Result<()> {
        self.replace(dispute)
    }

    async fn insert_payout(&self, payout: &Payout) -> Result<()> {
        self.insert(payout)
    }

    async fn payout_for_stint(&self, stint_id: &str) -> Result<Option<Payout>> {
        Ok(self
            .scan(|p: &Payout| p.stint_id == stint_id)?
            .into_iter()
            .next())
    }

    async fn payout_by_gateway_ref(&self, gateway_ref: &str) -> Result<Option<Payout>> {
        Ok(self
            .scan(|p: &Payout| p.gateway_ref.as_deref() == Some(gateway_ref))?
            .into_iter()
            .next())
    }

    async fn save_payout(&self, payout: &mut Payout) -> Result<()> {
        self.replace(payout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stint::NewStint;
    use chrono::{NaiveDate, NaiveTime, Utc};

    fn stint() -> Stint {
        Stint::new(
            "emp-1",
            NewStint {
                role: "Chef".into(),
                shift_date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
                start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                city: "Mombasa".into(),
                offered_rate: 3_000.0,
                currency: "KES".into(),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn stale_version_write_is_rejected() {
        let store = MemoryStore::new();
        let original = stint();
        store.insert_stint(&original).await.unwrap();

        let mut first = store.get_stint(&original.id).await.unwrap().unwrap();
        let mut second = first.clone();

        first.city = "Kilifi".into();
        store.save_stint(&mut first).await.unwrap();
        assert_eq!(first.version, 1);

        second.city = "Malindi".into();
        match store.save_stint(&mut second).await {
            Err(AppError::ConcurrentModification { entity: "stint", .. }) => {}
            other => panic!("expected concurrent modification, got {other:?}"),
        }
        assert_eq!(second.version, 0);

        let stored = store.get_stint(&original.id).await.unwrap().unwrap();
        assert_eq!(stored.city, "Kilifi");
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryStore::new();
        let s = stint();
        store.insert_stint(&s).await.unwrap();
        assert!(matches!(
            store.insert_stint(&s).await,
            Err(AppError::DuplicateKey)
        ));
        assert_eq!(store.count::<Stint>(), 1);
    }

    fn intent(application_id: &str) -> PaymentIntent {
        use crate::models::payment_intent::IntentParties;
        PaymentIntent::new(
            IntentParties {
                stint_id: "stint-1",
                application_id,
                employer_id: "emp-1",
                professional_id: "pro-1",
            },
            3_450,
            "KES",
            chrono::Duration::minutes(15),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn second_active_intent_for_a_pair_is_rejected() {
        let store = MemoryStore::new();
        let mut first = intent("app-1");
        store.insert_intent(&first).await.unwrap();

        assert!(matches!(
            store.insert_intent(&intent("app-1")).await,
            Err(AppError::DuplicateKey)
        ));
        store.insert_intent(&intent("app-2")).await.unwrap();

        first.cancel(Utc::now()).unwrap();
        store.save_intent(&mut first).await.unwrap();
        store.insert_intent(&intent("app-1")).await.unwrap();
        assert_eq!(store.count::<PaymentIntent>(), 3);
    }

    #[tokio::test]
    async fn withdrawn_application_frees_the_slot() {
        use crate::models::application::NewApplication;
        let store = MemoryStore::new();
        let apply = || Application::new("stint-1", "pro-1", NewApplication::default(), Utc::now());

        let mut first = apply();
        store.insert_application(&first).await.unwrap();
        assert!(matches!(
            store.insert_application(&apply()).await,
            Err(AppError::DuplicateKey)
        ));

        first.withdraw(Utc::now()).unwrap();
        store.save_application(&mut first).await.unwrap();
        store.insert_application(&apply()).await.unwrap();
    }
}
