// services/marketplace.rs
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::PolicyConfig;
use crate::database::MarketStore;
use crate::errors::{AppError, Result};
use crate::models::{
    application::Application,
    dispute::Dispute,
    notification::{Notification, NotificationKind},
    payment_intent::PaymentIntent,
    stint::Stint,
};
use crate::services::{
    clock::Clock,
    fee_calculator::FeeBreakdown,
    gateway::PaymentGateway,
    locks::KeyedLocks,
    notifier::{self, Notifier},
};

/// Core of the service. Operations are grouped by concern in sibling modules
/// (`applications`, `payment_intents`, `stint_machine`, `time_tracking`,
/// `disputes`); all of them share this state.
pub struct Marketplace {
    pub(crate) store: Arc<dyn MarketStore>,
    pub(crate) gateway: Arc<dyn PaymentGateway>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) policy: PolicyConfig,
    pub(crate) locks: KeyedLocks,
}

impl Marketplace {
    pub fn new(
        store: Arc<dyn MarketStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        policy: PolicyConfig,
    ) -> Self {
        Marketplace {
            store,
            gateway,
            notifier,
            clock,
            policy,
            locks: KeyedLocks::new(),
        }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Fee split for an amount under the configured policy.
    pub fn quote(&self, amount: f64, currency: &str) -> Result<FeeBreakdown> {
        self.policy.fees.calculate(amount, currency)
    }

    /// What the employer pays if this application wins.
    pub(crate) fn fees_for(&self, stint: &Stint, application: &Application) -> Result<FeeBreakdown> {
        self.quote(application.agreed_amount(stint), &stint.currency)
    }

    pub(crate) async fn load_stint(&self, id: &str) -> Result<Stint> {
        self.store
            .get_stint(id)
            .await?
            .ok_or_else(|| AppError::not_found("stint", id))
    }

    pub(crate) async fn load_application(&self, id: &str) -> Result<Application> {
        self.store
            .get_application(id)
            .await?
            .ok_or_else(|| AppError::not_found("application", id))
    }

    pub(crate) async fn load_intent(&self, id: &str) -> Result<PaymentIntent> {
        self.store
            .get_intent(id)
            .await?
            .ok_or_else(|| AppError::not_found("payment intent", id))
    }

    pub(crate) async fn load_dispute(&self, id: &str) -> Result<Dispute> {
        self.store
            .get_dispute(id)
            .await?
            .ok_or_else(|| AppError::not_found("dispute", id))
    }

    pub(crate) fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        title: &str,
        body: String,
        data: serde_json::Value,
    ) {
        notifier::dispatch(
            self.notifier.clone(),
            Notification::new(user_id, kind, title, body, data),
        );
    }
}
