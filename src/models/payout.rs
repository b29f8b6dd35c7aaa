use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{AppError, Result};
use crate::services::fee_calculator::FeeBreakdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Voided by a full refund to the employer.
    Cancelled,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
            PayoutStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    #[serde(rename = "_id")]
    pub id: String,
    pub stint_id: String,
    pub professional_id: String,
    pub gross_amount: i64,
    pub platform_fee_amount: i64,
    pub net_amount: i64,
    pub refund_amount: i64,
    pub currency: String,
    pub payout_method: String,
    pub destination: Option<String>,
    pub status: PayoutStatus,
    pub funds_are_frozen: bool,
    pub release_after: DateTime<Utc>,
    /// B2C ConversationID while a transfer is in flight.
    pub gateway_ref: Option<String>,
    /// M-Pesa transaction id once the transfer settled.
    #[serde(default)]
    pub receipt_number: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Payout {
    /// Builds the payout from the fees locked at confirmation.
    pub fn from_locked_fees(
        stint_id: &str,
        professional_id: &str,
        fees: &FeeBreakdown,
        destination: Option<String>,
        release_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let payout_method = if destination.is_some() { "mpesa" } else { "manual" };
        Payout {
            id: uuid::Uuid::new_v4().to_string(),
            stint_id: stint_id.to_string(),
            professional_id: professional_id.to_string(),
            gross_amount: fees.shift_amount,
            platform_fee_amount: fees.platform_fee,
            net_amount: fees.professional_payout,
            refund_amount: 0,
            currency: fees.currency.clone(),
            payout_method: payout_method.to_string(),
            destination,
            status: PayoutStatus::Pending,
            funds_are_frozen: false,
            release_after,
            gateway_ref: None,
            receipt_number: None,
            failure_reason: None,
            created_at: now,
            completed_at: None,
            updated_at: now,
            version: 0,
        }
    }

    fn invalid(&self, attempted: &str) -> AppError {
        AppError::InvalidTransition {
            entity: "payout",
            from: self.status.to_string(),
            attempted: attempted.to_string(),
        }
    }

    pub fn freeze(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !matches!(self.status, PayoutStatus::Pending | PayoutStatus::Failed) {
            return Err(self.invalid("frozen"));
        }
        self.funds_are_frozen = true;
        self.updated_at = now;
        Ok(())
    }

    pub fn unfreeze(&mut self, now: DateTime<Utc>) {
        self.funds_are_frozen = false;
        self.updated_at = now;
    }

    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.funds_are_frozen {
            return Err(AppError::FundsFrozen);
        }
        if !matches!(self.status, PayoutStatus::Pending | PayoutStatus::Failed) {
            return Err(self.invalid(PayoutStatus::Processing.as_str()));
        }
        self.status = PayoutStatus::Processing;
        self.gateway_ref = None;
        self.failure_reason = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(&mut self, gateway_ref: Option<String>, now: DateTime<Utc>) -> Result<()> {
        if self.status != PayoutStatus::Processing {
            return Err(self.invalid(PayoutStatus::Completed.as_str()));
        }
        self.status = PayoutStatus::Completed;
        self.gateway_ref = gateway_ref;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// The processor accepted the transfer but has not settled it yet.
    pub fn mark_submitted(&mut self, gateway_ref: String, now: DateTime<Utc>) -> Result<()> {
        if self.status != PayoutStatus::Processing {
            return Err(self.invalid("submitted"));
        }
        self.gateway_ref = Some(gateway_ref);
        self.updated_at = now;
        Ok(())
    }

    pub fn is_awaiting_result(&self) -> bool {
        self.status == PayoutStatus::Processing && self.gateway_ref.is_some()
    }

    /// Moves an unsettled payout to the end of a new review window.
    pub fn reschedule(&mut self, release_after: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        if self.status != PayoutStatus::Pending {
            return Err(self.invalid("rescheduled"));
        }
        self.release_after = release_after;
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, reason: String, now: DateTime<Utc>) -> Result<()> {
        if self.status != PayoutStatus::Processing {
            return Err(self.invalid(PayoutStatus::Failed.as_str()));
        }
        self.status = PayoutStatus::Failed;
        self.failure_reason = Some(reason);
        self.updated_at = now;
        Ok(())
    }

    /// Full refund: nothing goes to the professional.
    pub fn void(&mut self, refund_amount: i64, now: DateTime<Utc>) -> Result<()> {
        if !matches!(self.status, PayoutStatus::Pending | PayoutStatus::Failed) {
            return Err(self.invalid(PayoutStatus::Cancelled.as_str()));
        }
        self.status = PayoutStatus::Cancelled;
        self.net_amount = 0;
        self.refund_amount = refund_amount;
        self.funds_are_frozen = false;
        self.updated_at = now;
        Ok(())
    }

    /// Scales the professional's share and refunds the employer the rest of
    /// the shift amount.
    pub fn apply_partial(&mut self, professional_percent: u8, now: DateTime<Utc>) -> Result<()> {
        if professional_percent > 100 {
            return Err(AppError::invalid_data(
                "professional_percent must be between 0 and 100",
            ));
        }
        if !matches!(self.status, PayoutStatus::Pending | PayoutStatus::Failed) {
            return Err(self.invalid("partial"));
        }
        let share = f64::from(professional_percent) / 100.0;
        self.net_amount = (self.net_amount as f64 * share).round() as i64;
        self.refund_amount = (self.gross_amount as f64 * (1.0 - share)).round() as i64;
        self.updated_at = now;
        Ok(())
    }
}
