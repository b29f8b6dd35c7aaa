use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{AppError, Result};
use crate::models::stint::Stint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Withdrawn => "withdrawn",
        }
    }

    /// Withdrawn applications no longer count against the one-per-stint rule.
    pub fn is_active(&self) -> bool {
        !matches!(self, ApplicationStatus::Withdrawn)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    #[serde(rename = "_id")]
    pub id: String,
    pub stint_id: String,
    pub professional_id: String,
    pub professional_name: String,
    pub is_bid: bool,
    pub bid_amount: Option<f64>,
    pub message: Option<String>,
    pub payout_phone: Option<String>,
    pub status: ApplicationStatus,
    pub rejection_reason: Option<String>,
    pub applied_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// `stint:professional` until the application is withdrawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_slot: Option<String>,
    pub version: i64,
}

#[derive(Debug, Clone, Default)]
pub struct NewApplication {
    pub professional_name: String,
    pub bid_amount: Option<f64>,
    pub message: Option<String>,
    pub payout_phone: Option<String>,
}

impl Application {
    pub fn new(
        stint_id: &str,
        professional_id: &str,
        new: NewApplication,
        now: DateTime<Utc>,
    ) -> Self {
        Application {
            id: uuid::Uuid::new_v4().to_string(),
            stint_id: stint_id.to_string(),
            professional_id: professional_id.to_string(),
            professional_name: new.professional_name,
            is_bid: new.bid_amount.is_some(),
            bid_amount: new.bid_amount,
            message: new.message,
            payout_phone: new.payout_phone,
            status: ApplicationStatus::Pending,
            rejection_reason: None,
            applied_at: now,
            updated_at: now,
            active_slot: Some(format!("{stint_id}:{professional_id}")),
            version: 0,
        }
    }

    /// Shift amount the employer pays for this applicant: the bid if one was
    /// made, the stint's offered rate otherwise.
    pub fn agreed_amount(&self, stint: &Stint) -> f64 {
        match (self.is_bid, self.bid_amount) {
            (true, Some(bid)) => bid,
            _ => stint.offered_rate,
        }
    }

    fn ensure_pending(&self) -> Result<()> {
        if self.status != ApplicationStatus::Pending {
            return Err(AppError::ApplicationNotPending {
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn accept(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_pending()?;
        self.status = ApplicationStatus::Accepted;
        self.updated_at = now;
        Ok(())
    }

    pub fn reject(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.ensure_pending()?;
        self.status = ApplicationStatus::Rejected;
        self.rejection_reason = reason;
        self.updated_at = now;
        Ok(())
    }

    pub fn withdraw(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_pending()?;
        self.status = ApplicationStatus::Withdrawn;
        self.active_slot = None;
        self.updated_at = now;
        Ok(())
    }
}
