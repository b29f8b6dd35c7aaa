use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{AppError, Result};
use crate::models::application::Application;
use crate::services::fee_calculator::FeeBreakdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StintStatus {
    Open,
    Confirmed,
    InProgress,
    Completed,
    Disputed,
    Closed,
    PaidOut,
    Refunded,
    Cancelled,
}

impl StintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StintStatus::Open => "open",
            StintStatus::Confirmed => "confirmed",
            StintStatus::InProgress => "in_progress",
            StintStatus::Completed => "completed",
            StintStatus::Disputed => "disputed",
            StintStatus::Closed => "closed",
            StintStatus::PaidOut => "paid_out",
            StintStatus::Refunded => "refunded",
            StintStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(self, next: StintStatus) -> bool {
        use StintStatus::*;
        matches!(
            (self, next),
            (Open, Confirmed)
                | (Open, Cancelled)
                | (Confirmed, InProgress)
                | (Confirmed, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Disputed)
                | (Completed, Disputed)
                | (Completed, Closed)
                | (Disputed, Closed)
                | (Disputed, Refunded)
                | (Closed, PaidOut)
        )
    }

    /// Statuses in which the stint is bound to exactly one professional.
    pub fn has_assignee(self) -> bool {
        use StintStatus::*;
        matches!(
            self,
            Confirmed | InProgress | Completed | Disputed | Closed | PaidOut | Refunded
        )
    }
}

impl fmt::Display for StintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Drops fixes that cannot be real coordinates; a bad fix counts as absent.
    pub fn sanitized(self) -> Option<GeoPoint> {
        let valid = self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng);
        valid.then_some(self)
    }
}

/// Advisory classification of a clock-in against the scheduled start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockTiming {
    Early,
    OnTime,
    Late,
}

impl ClockTiming {
    pub fn classify(scheduled: DateTime<Utc>, actual: DateTime<Utc>, grace: Duration) -> Self {
        if actual < scheduled - grace {
            ClockTiming::Early
        } else if actual > scheduled + grace {
            ClockTiming::Late
        } else {
            ClockTiming::OnTime
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stint {
    #[serde(rename = "_id")]
    pub id: String,
    pub role: String,
    pub shift_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub city: String,
    pub offered_rate: f64,
    pub currency: String,
    pub employer_id: String,
    pub status: StintStatus,

    // Pending-payment sub-state of an open stint
    pub selected_application_id: Option<String>,
    pub selected_at: Option<DateTime<Utc>>,

    pub accepted_application_id: Option<String>,
    pub accepted_professional_id: Option<String>,
    pub accepted_professional_name: Option<String>,
    pub fees: Option<FeeBreakdown>,
    pub confirmed_at: Option<DateTime<Utc>>,

    pub clock_in_time: Option<DateTime<Utc>>,
    pub clock_in_location: Option<GeoPoint>,
    pub clock_in_timing: Option<ClockTiming>,
    pub clock_out_time: Option<DateTime<Utc>>,
    pub clock_out_location: Option<GeoPoint>,
    pub elapsed_minutes: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,

    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub refund_amount: Option<i64>,

    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewStint {
    pub role: String,
    pub shift_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub city: String,
    pub offered_rate: f64,
    pub currency: String,
}

impl Stint {
    pub fn new(employer_id: &str, new: NewStint, now: DateTime<Utc>) -> Self {
        Stint {
            id: uuid::Uuid::new_v4().to_string(),
            role: new.role,
            shift_date: new.shift_date,
            start_time: new.start_time,
            end_time: new.end_time,
            city: new.city,
            offered_rate: new.offered_rate,
            currency: new.currency.to_uppercase(),
            employer_id: employer_id.to_string(),
            status: StintStatus::Open,
            selected_application_id: None,
            selected_at: None,
            accepted_application_id: None,
            accepted_professional_id: None,
            accepted_professional_name: None,
            fees: None,
            confirmed_at: None,
            clock_in_time: None,
            clock_in_location: None,
            clock_in_timing: None,
            clock_out_time: None,
            clock_out_location: None,
            elapsed_minutes: None,
            completed_at: None,
            paid_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            refund_amount: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn scheduled_start(&self) -> DateTime<Utc> {
        self.shift_date.and_time(self.start_time).and_utc()
    }

    /// Holds iff the professional binding matches the status.
    pub fn assignment_is_consistent(&self) -> bool {
        self.accepted_professional_id.is_some() == self.status.has_assignee()
    }

    pub fn is_employer(&self, user_id: &str) -> bool {
        self.employer_id == user_id
    }

    pub fn is_assigned_to(&self, user_id: &str) -> bool {
        self.accepted_professional_id.as_deref() == Some(user_id)
    }

    fn transition(&mut self, next: StintStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            tracing::error!(
                stint_id = %self.id,
                "rejected out-of-order stint transition {} -> {}",
                self.status,
                next
            );
            return Err(AppError::InvalidStintTransition {
                from: self.status,
                attempted: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Binds the pending-payment sub-state to one application.
    pub fn select(&mut self, application_id: &str, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            StintStatus::Open => match &self.selected_application_id {
                Some(selected) if selected == application_id => Ok(()),
                Some(selected) => Err(AppError::StintAlreadyAssigned {
                    application_id: selected.clone(),
                }),
                None => {
                    self.selected_application_id = Some(application_id.to_string());
                    self.selected_at = Some(now);
                    self.updated_at = now;
                    Ok(())
                }
            },
            status if status.has_assignee() => Err(AppError::StintAlreadyAssigned {
                application_id: self.accepted_application_id.clone().unwrap_or_default(),
            }),
            status => Err(AppError::StintNotOpen { status }),
        }
    }

    /// Returns true if a selection was cleared.
    pub fn release_selection(&mut self, application_id: &str, now: DateTime<Utc>) -> bool {
        if self.status == StintStatus::Open
            && self.selected_application_id.as_deref() == Some(application_id)
        {
            self.selected_application_id = None;
            self.selected_at = None;
            self.updated_at = now;
            return true;
        }
        false
    }

    pub fn confirm(
        &mut self,
        application: &Application,
        fees: FeeBreakdown,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(selected) = &self.selected_application_id {
            if selected != &application.id {
                return Err(AppError::StintAlreadyAssigned {
                    application_id: selected.clone(),
                });
            }
        }
        self.transition(StintStatus::Confirmed, now)?;
        self.selected_application_id = None;
        self.selected_at = None;
        self.accepted_application_id = Some(application.id.clone());
        self.accepted_professional_id = Some(application.professional_id.clone());
        self.accepted_professional_name = Some(application.professional_name.clone());
        self.fees = Some(fees);
        self.confirmed_at = Some(now);
        Ok(())
    }

    pub fn clock_in(
        &mut self,
        location: Option<GeoPoint>,
        timing: ClockTiming,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transition(StintStatus::InProgress, now)?;
        self.clock_in_time = Some(now);
        self.clock_in_location = location;
        self.clock_in_timing = Some(timing);
        Ok(())
    }

    pub fn clock_out(&mut self, location: Option<GeoPoint>, now: DateTime<Utc>) -> Result<()> {
        self.transition(StintStatus::Completed, now)?;
        self.clock_out_time = Some(now);
        self.clock_out_location = location;
        self.elapsed_minutes = self
            .clock_in_time
            .map(|started| (now - started).num_minutes().max(0));
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        let was_confirmed = self.status == StintStatus::Confirmed;
        self.transition(StintStatus::Cancelled, now)?;
        self.selected_application_id = None;
        self.selected_at = None;
        // A confirmed stint has been paid for; the employer is owed the locked total.
        if was_confirmed {
            self.refund_amount = self.fees.as_ref().map(|f| f.total_amount);
        }
        // Cancelled stints carry no assignee.
        self.accepted_professional_id = None;
        self.cancelled_at = Some(now);
        self.cancellation_reason = Some(reason.to_string());
        Ok(())
    }

    pub fn mark_disputed(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(StintStatus::Disputed, now)
    }

    pub fn close(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(StintStatus::Closed, now)
    }

    pub fn mark_paid_out(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(StintStatus::PaidOut, now)?;
        self.paid_at = Some(now);
        Ok(())
    }

    pub fn mark_refunded(&mut self, refund_amount: i64, now: DateTime<Utc>) -> Result<()> {
        self.transition(StintStatus::Refunded, now)?;
        self.refund_amount = Some(refund_amount);
        Ok(())
    }

    /// End of the post-completion review window, if the stint has completed.
    pub fn review_window_end(&self, window: Duration) -> Option<DateTime<Utc>> {
        self.completed_at.map(|completed| completed + window)
    }
}
