use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeParty {
    Employer,
    Professional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    Resolved,
    Escalated,
    ClosedNoResponse,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "open",
            DisputeStatus::UnderReview => "under_review",
            DisputeStatus::Resolved => "resolved",
            DisputeStatus::Escalated => "escalated",
            DisputeStatus::ClosedNoResponse => "closed_no_response",
        }
    }

    /// Still holding funds.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            DisputeStatus::Open | DisputeStatus::UnderReview | DisputeStatus::Escalated
        )
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisputeOutcome {
    ReleaseToProfessional,
    RefundToEmployer,
    /// Professional receives `professional_percent` of the net payout; the
    /// employer is refunded the rest of the shift amount.
    Partial { professional_percent: u8 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    #[serde(rename = "_id")]
    pub id: String,
    pub stint_id: String,
    pub opened_by: DisputeParty,
    pub opened_by_user_id: String,
    pub issue_type: String,
    pub description: String,
    pub status: DisputeStatus,
    pub funds_are_frozen: bool,
    pub resolution: Option<DisputeOutcome>,
    pub resolution_note: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Dispute {
    pub fn open(
        stint_id: &str,
        opened_by: DisputeParty,
        opened_by_user_id: &str,
        issue_type: String,
        description: String,
        now: DateTime<Utc>,
    ) -> Self {
        Dispute {
            id: uuid::Uuid::new_v4().to_string(),
            stint_id: stint_id.to_string(),
            opened_by,
            opened_by_user_id: opened_by_user_id.to_string(),
            issue_type,
            description,
            status: DisputeStatus::Open,
            funds_are_frozen: true,
            resolution: None,
            resolution_note: None,
            opened_at: now,
            resolved_at: None,
            updated_at: now,
            version: 0,
        }
    }

    fn move_to(&mut self, next: DisputeStatus, allowed_from: &[DisputeStatus], now: DateTime<Utc>) -> Result<()> {
        if !allowed_from.contains(&self.status) {
            return Err(AppError::InvalidTransition {
                entity: "dispute",
                from: self.status.to_string(),
                attempted: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn start_review(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.move_to(DisputeStatus::UnderReview, &[DisputeStatus::Open], now)
    }

    pub fn escalate(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.move_to(
            DisputeStatus::Escalated,
            &[DisputeStatus::Open, DisputeStatus::UnderReview],
            now,
        )
    }

    pub fn resolve(
        &mut self,
        outcome: DisputeOutcome,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.move_to(
            DisputeStatus::Resolved,
            &[
                DisputeStatus::Open,
                DisputeStatus::UnderReview,
                DisputeStatus::Escalated,
            ],
            now,
        )?;
        self.funds_are_frozen = false;
        self.resolution = Some(outcome);
        self.resolution_note = note;
        self.resolved_at = Some(now);
        Ok(())
    }
}
