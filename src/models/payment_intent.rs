use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Mpesa,
    Card,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Initiated,
    Pending,
    Success,
    Failed,
    Cancelled,
    Expired,
}

impl IntentStatus {
    pub const ACTIVE: [IntentStatus; 2] = [IntentStatus::Initiated, IntentStatus::Pending];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Initiated => "initiated",
            IntentStatus::Pending => "pending",
            IntentStatus::Success => "success",
            IntentStatus::Failed => "failed",
            IntentStatus::Cancelled => "cancelled",
            IntentStatus::Expired => "expired",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, IntentStatus::Initiated | IntentStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a payment attempt ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientFunds,
    UserCancelledPin,
    Timeout,
    Declined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    #[serde(rename = "_id")]
    pub id: String,
    pub stint_id: String,
    pub application_id: String,
    pub employer_id: String,
    pub professional_id: String,
    pub amount: i64,
    pub currency: String,
    pub method: Option<PaymentMethod>,
    pub status: IntentStatus,
    /// M-Pesa CheckoutRequestID of the latest STK push.
    pub gateway_ref: Option<String>,
    pub flutterwave_ref: Option<String>,
    pub checkout_url: Option<String>,
    pub receipt_number: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// `stint:application` while the intent is active; unique across intents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_slot: Option<String>,
    pub version: i64,
}

pub struct IntentParties<'a> {
    pub stint_id: &'a str,
    pub application_id: &'a str,
    pub employer_id: &'a str,
    pub professional_id: &'a str,
}

impl PaymentIntent {
    pub fn new(
        parties: IntentParties<'_>,
        amount: i64,
        currency: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        PaymentIntent {
            id: format!("pi_{}", uuid::Uuid::new_v4().simple()),
            stint_id: parties.stint_id.to_string(),
            application_id: parties.application_id.to_string(),
            employer_id: parties.employer_id.to_string(),
            professional_id: parties.professional_id.to_string(),
            amount,
            currency: currency.to_uppercase(),
            method: None,
            status: IntentStatus::Initiated,
            gateway_ref: None,
            flutterwave_ref: None,
            checkout_url: None,
            receipt_number: None,
            failure_kind: None,
            failure_reason: None,
            created_at: now,
            expires_at: now + ttl,
            resolved_at: None,
            updated_at: now,
            active_slot: Some(format!("{}:{}", parties.stint_id, parties.application_id)),
            version: 0,
        }
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Active but already past its deadline; the next write must expire it.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.is_past_expiry(now)
    }

    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    fn ensure_active(&self) -> Result<()> {
        match self.status {
            IntentStatus::Expired => Err(AppError::IntentExpired {
                intent_id: self.id.clone(),
            }),
            status if status.is_terminal() => Err(AppError::IntentAlreadyTerminal { status }),
            _ => Ok(()),
        }
    }

    /// Active and not yet past `expires_at`.
    pub fn ensure_live(&self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_active()?;
        if self.is_past_expiry(now) {
            return Err(AppError::IntentExpired {
                intent_id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Records a gateway hand-off. Re-initiating a pending intent is allowed.
    pub fn mark_mpesa_pending(&mut self, checkout_request_id: String, now: DateTime<Utc>) -> Result<()> {
        self.ensure_live(now)?;
        self.method = Some(PaymentMethod::Mpesa);
        self.gateway_ref = Some(checkout_request_id);
        self.status = IntentStatus::Pending;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_card_pending(
        &mut self,
        reference: String,
        checkout_url: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_live(now)?;
        self.method = Some(PaymentMethod::Card);
        self.flutterwave_ref = Some(reference);
        self.checkout_url = Some(checkout_url);
        self.status = IntentStatus::Pending;
        self.updated_at = now;
        Ok(())
    }

    /// Only a payment handed to a gateway can succeed.
    pub fn succeed(&mut self, receipt: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.ensure_live(now)?;
        if self.status != IntentStatus::Pending {
            return Err(AppError::InvalidTransition {
                entity: "payment intent",
                from: self.status.to_string(),
                attempted: IntentStatus::Success.to_string(),
            });
        }
        self.status = IntentStatus::Success;
        self.active_slot = None;
        self.receipt_number = receipt;
        self.resolved_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, kind: FailureKind, reason: String, now: DateTime<Utc>) -> Result<()> {
        self.ensure_active()?;
        self.status = IntentStatus::Failed;
        self.active_slot = None;
        self.failure_kind = Some(kind);
        self.failure_reason = Some(reason);
        self.resolved_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_active()?;
        self.status = IntentStatus::Cancelled;
        self.active_slot = None;
        self.resolved_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_active()?;
        self.status = IntentStatus::Expired;
        self.active_slot = None;
        self.resolved_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}
