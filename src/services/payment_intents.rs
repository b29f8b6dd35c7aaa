// services/payment_intents.rs
//! Payment attempts for an accepted application.
//!
//! Every mutation of an intent runs under the stint lock and is persisted
//! with a versioned write, so a success, a cancellation and an expiry racing
//! on the same intent leave exactly one terminal state behind. Gateway calls
//! are made outside the lock and bounded by the configured timeout.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, warn};

use crate::errors::{AppError, Result};
use crate::models::{
    application::ApplicationStatus,
    caller::{Caller, Role},
    notification::NotificationKind,
    payment_intent::{FailureKind, IntentParties, IntentStatus, PaymentIntent},
    stint::Stint,
};
use crate::services::{
    gateway::GatewayStatus,
    marketplace::Marketplace,
    mpesa_service::{classify_result_code, normalize_msisdn},
};

#[derive(Debug, Clone)]
pub struct CreateIntent {
    pub stint_id: String,
    pub application_id: String,
    pub amount: i64,
    pub currency: String,
}

/// Returned by an STK push. `countdown_secs` is only for the payer's prompt;
/// the intent's `expires_at` decides when polling stops.
#[derive(Debug, Clone)]
pub struct MpesaPrompt {
    pub intent: PaymentIntent,
    pub customer_message: String,
    pub countdown_secs: u64,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub intent: PaymentIntent,
    pub stint: Stint,
}

impl Marketplace {
    pub async fn create_intent(&self, caller: &Caller, req: CreateIntent) -> Result<PaymentIntent> {
        caller.require_role(Role::Employer)?;
        if req.amount <= 0 {
            return Err(AppError::InvalidAmount(format!(
                "amount must be positive (got {})",
                req.amount
            )));
        }

        let _guard = self.locks.lock(&req.stint_id).await;
        let mut stint = self.load_stint(&req.stint_id).await?;
        if !stint.is_employer(&caller.user_id) {
            return Err(AppError::forbidden("only the stint's employer can pay for it"));
        }
        let application = self.load_application(&req.application_id).await?;
        if application.stint_id != stint.id {
            return Err(AppError::invalid_data("application does not belong to this stint"));
        }
        if application.status != ApplicationStatus::Pending {
            return Err(AppError::ApplicationNotPending {
                status: application.status,
            });
        }

        let now = self.now();
        let previously_selected = stint.selected_application_id.clone();
        let lapsed = self.lapse_stale_hold(&mut stint, now).await?;
        // Claims the hold when none exists, so a retry after a failed payment
        // does not need another accept.
        stint.select(&application.id, now)?;

        self.expire_stale_for_pair(&stint.id, &application.id, now).await?;
        if let Some(active) = self
            .store
            .intents_for_stint(&stint.id)
            .await?
            .into_iter()
            .find(|i| i.application_id == application.id && i.status.is_active())
        {
            return Err(AppError::IntentAlreadyActive {
                intent_id: active.id,
            });
        }

        let fees = self.fees_for(&stint, &application)?;
        if req.amount != fees.total_amount || !req.currency.eq_ignore_ascii_case(&fees.currency) {
            return Err(AppError::invalid_data(format!(
                "amount must equal the quoted total of {} {}",
                fees.total_amount, fees.currency
            )));
        }

        if lapsed || previously_selected.as_deref() != Some(application.id.as_str()) {
            self.store.save_stint(&mut stint).await?;
        }

        let intent = PaymentIntent::new(
            IntentParties {
                stint_id: &stint.id,
                application_id: &application.id,
                employer_id: &stint.employer_id,
                professional_id: &application.professional_id,
            },
            fees.total_amount,
            &fees.currency,
            self.policy.intent_ttl(),
            now,
        );
        match self.store.insert_intent(&intent).await {
            Ok(()) => {}
            Err(AppError::DuplicateKey) => {
                return Err(self.active_intent_conflict(&stint.id, &application.id).await);
            }
            Err(e) => return Err(e),
        }

        info!(
            intent_id = %intent.id,
            stint_id = %stint.id,
            amount = intent.amount,
            expires_at = %intent.expires_at,
            "payment intent created"
        );
        Ok(intent)
    }

    /// Another process won the active slot for this pair between our check
    /// and the insert.
    async fn active_intent_conflict(&self, stint_id: &str, application_id: &str) -> AppError {
        match self.store.intents_for_stint(stint_id).await {
            Ok(intents) => intents
                .into_iter()
                .find(|i| i.application_id == application_id && i.status.is_active())
                .map(|active| AppError::IntentAlreadyActive {
                    intent_id: active.id,
                })
                .unwrap_or(AppError::DuplicateKey),
            Err(e) => e,
        }
    }

    /// Loads an intent the caller may act on as payer.
    async fn payer_intent(&self, caller: &Caller, intent_id: &str) -> Result<PaymentIntent> {
        let intent = self.load_intent(intent_id).await?;
        if intent.employer_id != caller.user_id {
            return Err(AppError::forbidden("only the paying employer can use this intent"));
        }
        Ok(intent)
    }

    /// Intents past their deadline are expired on first touch.
    async fn ensure_intent_live(&self, intent: PaymentIntent) -> Result<PaymentIntent> {
        let now = self.now();
        if intent.is_stale(now) {
            self.expire_intent(&intent.id).await?;
        }
        intent.ensure_live(now)?;
        Ok(intent)
    }

    pub async fn initiate_mpesa(
        &self,
        caller: &Caller,
        intent_id: &str,
        phone_number: &str,
    ) -> Result<MpesaPrompt> {
        let msisdn = normalize_msisdn(phone_number)?;
        let intent = self.payer_intent(caller, intent_id).await?;
        let intent = self.ensure_intent_live(intent).await?;

        let initiation = tokio::time::timeout(
            self.policy.gateway_timeout(),
            self.gateway.initiate_mpesa(&intent, &msisdn),
        )
        .await??;

        let _guard = self.locks.lock(&intent.stint_id).await;
        let mut intent = self.load_intent(intent_id).await?;
        if let Err(err) = intent.mark_mpesa_pending(initiation.checkout_request_id.clone(), self.now()) {
            warn!(
                intent_id = %intent.id,
                checkout_request_id = %initiation.checkout_request_id,
                "STK push sent but intent is no longer live: {}",
                err
            );
            return Err(err);
        }
        self.store.save_intent(&mut intent).await?;

        info!(
            intent_id = %intent.id,
            checkout_request_id = %initiation.checkout_request_id,
            "STK push sent"
        );
        Ok(MpesaPrompt {
            intent,
            customer_message: initiation.customer_message,
            countdown_secs: self.policy.mpesa_countdown_secs,
            poll_interval_secs: self.policy.poll_interval_secs,
        })
    }

    pub async fn initiate_card(
        &self,
        caller: &Caller,
        intent_id: &str,
        email: Option<&str>,
        redirect_url: &str,
    ) -> Result<PaymentIntent> {
        let email = email
            .or(caller.email.as_deref())
            .ok_or_else(|| AppError::invalid_data("an email address is required for card payments"))?;
        let intent = self.payer_intent(caller, intent_id).await?;
        let intent = self.ensure_intent_live(intent).await?;

        let initiation = tokio::time::timeout(
            self.policy.gateway_timeout(),
            self.gateway.initiate_card(&intent, email, redirect_url),
        )
        .await??;

        let _guard = self.locks.lock(&intent.stint_id).await;
        let mut intent = self.load_intent(intent_id).await?;
        intent.mark_card_pending(initiation.reference, initiation.checkout_url, self.now())?;
        self.store.save_intent(&mut intent).await?;

        info!(intent_id = %intent.id, "card checkout link issued");
        Ok(intent)
    }

    /// Poll target. Pending intents are refreshed from the gateway first.
    pub async fn get_intent(&self, caller: &Caller, intent_id: &str) -> Result<PaymentIntent> {
        let intent = self.load_intent(intent_id).await?;
        let party = intent.employer_id == caller.user_id || intent.professional_id == caller.user_id;
        if !(party || caller.is_admin()) {
            return Err(AppError::forbidden("not a party to this payment"));
        }
        self.refresh_intent(intent).await
    }

    pub async fn refresh_intent_by_id(&self, intent_id: &str) -> Result<PaymentIntent> {
        let intent = self.load_intent(intent_id).await?;
        self.refresh_intent(intent).await
    }

    /// Brings an active intent up to date. Gateway trouble is logged and the
    /// intent returned as-is; the next poll tries again.
    async fn refresh_intent(&self, intent: PaymentIntent) -> Result<PaymentIntent> {
        if !intent.status.is_active() {
            return Ok(intent);
        }
        if intent.is_stale(self.now()) {
            return self.expire_intent(&intent.id).await;
        }
        if intent.status != IntentStatus::Pending {
            return Ok(intent);
        }

        let status = match tokio::time::timeout(
            self.policy.gateway_timeout(),
            self.gateway.query_status(&intent),
        )
        .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!(intent_id = %intent.id, "gateway status query failed: {}", e);
                return Ok(intent);
            }
            Err(_) => {
                warn!(intent_id = %intent.id, "gateway status query timed out");
                return Ok(intent);
            }
        };

        if status == GatewayStatus::Pending {
            return Ok(intent);
        }
        if let Err(e) = self.apply_gateway_status(&intent.id, status).await {
            warn!(intent_id = %intent.id, "could not apply gateway outcome: {}", e);
        }
        self.load_intent(&intent.id).await
    }

    /// Single entry point for gateway outcomes, whether polled or pushed.
    pub async fn apply_gateway_status(&self, intent_id: &str, status: GatewayStatus) -> Result<PaymentIntent> {
        match status {
            GatewayStatus::Pending => self.load_intent(intent_id).await,
            GatewayStatus::Succeeded { receipt } => self.record_success(intent_id, receipt).await,
            GatewayStatus::Failed { kind, reason } => self.record_failure(intent_id, kind, reason).await,
        }
    }

    /// Applies a payment success exactly once and confirms the stint.
    ///
    /// A replayed success finds the intent already `success` and only re-runs
    /// the confirmation, which is itself idempotent. A success arriving after
    /// the intent was cancelled, failed or expired is refused and logged.
    pub async fn record_success(&self, intent_id: &str, receipt: Option<String>) -> Result<PaymentIntent> {
        let intent = self.load_intent(intent_id).await?;
        let _guard = self.locks.lock(&intent.stint_id).await;
        let mut intent = self.load_intent(intent_id).await?;
        let now = self.now();

        match intent.status {
            IntentStatus::Success => {
                info!(intent_id = %intent.id, "duplicate success delivery");
                self.confirm_from_payment(&intent).await?;
                return Ok(intent);
            }
            status if status.is_terminal() => {
                warn!(
                    intent_id = %intent.id,
                    status = %status,
                    "late payment success rejected on a terminal intent"
                );
                return Err(match status {
                    IntentStatus::Expired => AppError::IntentExpired {
                        intent_id: intent.id,
                    },
                    status => AppError::IntentAlreadyTerminal { status },
                });
            }
            _ if intent.is_past_expiry(now) => {
                warn!(
                    intent_id = %intent.id,
                    expires_at = %intent.expires_at,
                    "payment success arrived after expiry"
                );
                self.expire_locked(&mut intent, now).await?;
                return Err(AppError::IntentExpired {
                    intent_id: intent.id,
                });
            }
            _ => {}
        }

        intent.succeed(receipt, now)?;
        self.store.save_intent(&mut intent).await?;
        info!(
            intent_id = %intent.id,
            receipt = ?intent.receipt_number,
            "payment succeeded"
        );

        if let Err(e) = self.confirm_from_payment(&intent).await {
            error!(
                intent_id = %intent.id,
                stint_id = %intent.stint_id,
                "payment captured but stint confirmation failed: {}",
                e
            );
            return Err(e);
        }
        Ok(intent)
    }

    pub async fn record_failure(
        &self,
        intent_id: &str,
        kind: FailureKind,
        reason: String,
    ) -> Result<PaymentIntent> {
        let intent = self.load_intent(intent_id).await?;
        let _guard = self.locks.lock(&intent.stint_id).await;
        let mut intent = self.load_intent(intent_id).await?;
        let now = self.now();

        if intent.status == IntentStatus::Failed {
            return Ok(intent);
        }
        if intent.is_stale(now) {
            self.expire_locked(&mut intent, now).await?;
            return Ok(intent);
        }
        intent.fail(kind, reason, now)?;
        self.store.save_intent(&mut intent).await?;
        self.release_selection(&intent.stint_id, &intent.application_id)
            .await?;

        info!(
            intent_id = %intent.id,
            kind = ?kind,
            "payment failed: {}",
            intent.failure_reason.as_deref().unwrap_or_default()
        );
        self.notify(
            &intent.employer_id,
            NotificationKind::PaymentFailed,
            "Payment failed",
            format!(
                "Your payment did not go through: {}",
                intent.failure_reason.as_deref().unwrap_or("declined")
            ),
            json!({ "intent_id": intent.id, "stint_id": intent.stint_id, "kind": kind }),
        );
        Ok(intent)
    }

    /// Explicit cancellation. The stint stays as it is apart from releasing
    /// the hold on the applicant.
    pub async fn cancel_intent(&self, caller: &Caller, intent_id: &str) -> Result<PaymentIntent> {
        let intent = self.load_intent(intent_id).await?;
        if !(intent.employer_id == caller.user_id || caller.is_admin()) {
            return Err(AppError::forbidden("only the paying employer can cancel this payment"));
        }

        let _guard = self.locks.lock(&intent.stint_id).await;
        let mut intent = self.load_intent(intent_id).await?;
        intent.cancel(self.now())?;
        self.store.save_intent(&mut intent).await?;
        self.gateway_cancel(&intent).await;
        self.release_selection(&intent.stint_id, &intent.application_id)
            .await?;

        info!(intent_id = %intent.id, "payment intent cancelled");
        Ok(intent)
    }

    /// Gateway-side cancellation is best effort.
    async fn gateway_cancel(&self, intent: &PaymentIntent) {
        match tokio::time::timeout(self.policy.gateway_timeout(), self.gateway.cancel(intent)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(intent_id = %intent.id, "gateway cancel failed: {}", e),
            Err(_) => warn!(intent_id = %intent.id, "gateway cancel timed out"),
        }
    }

    /// Cancels every active intent on the stint, or only those of one
    /// application. Caller holds the stint lock.
    pub(crate) async fn cancel_active_intents(
        &self,
        stint_id: &str,
        application_id: Option<&str>,
    ) -> Result<usize> {
        let now = self.now();
        let mut cancelled = 0;
        for mut intent in self.store.intents_for_stint(stint_id).await? {
            if !intent.status.is_active() {
                continue;
            }
            if application_id.is_some_and(|id| id != intent.application_id) {
                continue;
            }
            intent.cancel(now)?;
            self.store.save_intent(&mut intent).await?;
            self.gateway_cancel(&intent).await;
            cancelled += 1;
        }
        Ok(cancelled)
    }

    /// Frees an open stint held for this application. Caller holds the lock.
    pub(crate) async fn release_selection(&self, stint_id: &str, application_id: &str) -> Result<()> {
        let mut stint = self.load_stint(stint_id).await?;
        if stint.release_selection(application_id, self.now()) {
            self.store.save_stint(&mut stint).await?;
            info!(stint_id = %stint_id, application_id = %application_id, "stint hold released");
        }
        Ok(())
    }

    /// An employer who accepted but never paid must not block the stint
    /// forever: a hold older than the intent TTL with no live intent behind
    /// it is dropped. Mutates `stint` only; the caller saves it.
    pub(crate) async fn lapse_stale_hold(&self, stint: &mut Stint, now: DateTime<Utc>) -> Result<bool> {
        let (Some(selected), Some(selected_at)) = (stint.selected_application_id.clone(), stint.selected_at) else {
            return Ok(false);
        };
        if now < selected_at + self.policy.intent_ttl() {
            return Ok(false);
        }
        let live = self
            .store
            .intents_for_stint(&stint.id)
            .await?
            .iter()
            .any(|i| i.application_id == selected && i.status.is_active() && !i.is_stale(now));
        if live {
            return Ok(false);
        }
        info!(stint_id = %stint.id, application_id = %selected, "stale stint hold lapsed");
        Ok(stint.release_selection(&selected, now))
    }

    async fn expire_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        let intent = self.load_intent(intent_id).await?;
        let _guard = self.locks.lock(&intent.stint_id).await;
        let mut intent = self.load_intent(intent_id).await?;
        if intent.is_stale(self.now()) {
            self.expire_locked(&mut intent, self.now()).await?;
        }
        Ok(intent)
    }

    async fn expire_locked(&self, intent: &mut PaymentIntent, now: DateTime<Utc>) -> Result<()> {
        intent.expire(now)?;
        self.store.save_intent(intent).await?;
        self.release_selection(&intent.stint_id, &intent.application_id)
            .await?;
        info!(intent_id = %intent.id, "payment intent expired");
        Ok(())
    }

    async fn expire_stale_for_pair(
        &self,
        stint_id: &str,
        application_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for mut intent in self.store.intents_for_stint(stint_id).await? {
            if intent.application_id == application_id && intent.is_stale(now) {
                intent.expire(now)?;
                self.store.save_intent(&mut intent).await?;
                info!(intent_id = %intent.id, "payment intent expired");
            }
        }
        Ok(())
    }

    /// Expires every active intent past its deadline. Returns how many.
    pub async fn expire_stale_intents(&self) -> Result<usize> {
        let now = self.now();
        let mut expired = 0;
        for intent in self.store.active_intents().await? {
            if !intent.is_stale(now) {
                continue;
            }
            match self.expire_intent(&intent.id).await {
                Ok(updated) if updated.status == IntentStatus::Expired => expired += 1,
                Ok(_) => {}
                Err(e) => warn!(intent_id = %intent.id, "could not expire intent: {}", e),
            }
        }
        Ok(expired)
    }

    /// Repairs a payment that succeeded while its stint stayed open by
    /// re-running the confirmation. Never charges again.
    pub async fn reconcile_intent(&self, caller: &Caller, intent_id: &str) -> Result<Reconciliation> {
        let intent = self.load_intent(intent_id).await?;
        if !(intent.employer_id == caller.user_id || caller.is_admin()) {
            return Err(AppError::forbidden("only the paying employer can reconcile this payment"));
        }

        let intent = if intent.status.is_active() {
            self.refresh_intent(intent).await?
        } else {
            intent
        };

        if intent.status == IntentStatus::Success {
            let _guard = self.locks.lock(&intent.stint_id).await;
            let stint = self.confirm_from_payment(&intent).await?;
            return Ok(Reconciliation { intent, stint });
        }
        let stint = self.load_stint(&intent.stint_id).await?;
        Ok(Reconciliation { intent, stint })
    }

    /// Daraja STK callback, keyed by CheckoutRequestID.
    pub async fn handle_mpesa_callback(
        &self,
        checkout_request_id: &str,
        result_code: i64,
        result_desc: &str,
        receipt: Option<String>,
    ) -> Result<()> {
        let Some(intent) = self.store.intent_by_gateway_ref(checkout_request_id).await? else {
            warn!(
                checkout_request_id = %checkout_request_id,
                "STK callback for an unknown checkout request"
            );
            return Ok(());
        };

        let status = match classify_result_code(result_code, result_desc) {
            GatewayStatus::Succeeded { .. } => GatewayStatus::Succeeded { receipt },
            other => other,
        };
        self.apply_gateway_status(&intent.id, status).await?;
        Ok(())
    }

    /// Card webhook. The payload is only a hint; the outcome is re-read from
    /// the processor before anything changes.
    pub async fn handle_card_webhook(&self, tx_ref: &str) -> Result<PaymentIntent> {
        self.refresh_intent_by_id(tx_ref).await
    }
}
