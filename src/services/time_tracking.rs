// services/time_tracking.rs
use serde_json::json;
use tracing::{info, warn};

use crate::errors::{AppError, Result};
use crate::models::{
    caller::Caller,
    notification::NotificationKind,
    stint::{ClockTiming, GeoPoint, Stint, StintStatus},
};
use crate::services::marketplace::Marketplace;

impl Marketplace {
    /// Loads the stint and checks the state before the caller, so an
    /// out-of-order clock event reports the transition problem first.
    async fn stint_for_clock_event(
        &self,
        caller: &Caller,
        stint_id: &str,
        required: StintStatus,
        attempted: StintStatus,
    ) -> Result<Stint> {
        let stint = self.load_stint(stint_id).await?;
        if stint.status != required {
            warn!(
                stint_id = %stint.id,
                "clock event rejected: stint is {}, not {}",
                stint.status,
                required
            );
            return Err(AppError::InvalidStintTransition {
                from: stint.status,
                attempted,
            });
        }
        if !stint.is_assigned_to(&caller.user_id) {
            return Err(AppError::forbidden("only the booked professional can clock in or out"));
        }
        Ok(stint)
    }

    /// `confirmed → in_progress`. Arriving early or late is recorded, never
    /// refused, and a missing or unusable location does not block.
    pub async fn clock_in(&self, caller: &Caller, stint_id: &str, location: Option<GeoPoint>) -> Result<Stint> {
        let mut stint = self
            .stint_for_clock_event(caller, stint_id, StintStatus::Confirmed, StintStatus::InProgress)
            .await?;
        let now = self.now();
        let location = location.and_then(GeoPoint::sanitized);
        let timing = ClockTiming::classify(stint.scheduled_start(), now, self.policy.clock_in_grace());

        stint.clock_in(location, timing, now)?;
        self.store.save_stint(&mut stint).await?;

        info!(
            stint_id = %stint.id,
            timing = ?timing,
            located = location.is_some(),
            "clocked in"
        );
        self.notify(
            &stint.employer_id,
            NotificationKind::ClockedIn,
            "Shift started",
            format!(
                "{} clocked in for the {} stint",
                stint.accepted_professional_name.as_deref().unwrap_or("Your professional"),
                stint.role
            ),
            json!({ "stint_id": stint.id, "timing": timing }),
        );
        Ok(stint)
    }

    /// `in_progress → completed`. Opens the review window and sets aside the
    /// payout, which stays pending until the window passes.
    pub async fn clock_out(&self, caller: &Caller, stint_id: &str, location: Option<GeoPoint>) -> Result<Stint> {
        let mut stint = self
            .stint_for_clock_event(caller, stint_id, StintStatus::InProgress, StintStatus::Completed)
            .await?;
        let now = self.now();

        stint.clock_out(location.and_then(GeoPoint::sanitized), now)?;
        self.store.save_stint(&mut stint).await?;
        let payout = self.ensure_payout(&stint).await?;

        info!(
            stint_id = %stint.id,
            elapsed_minutes = ?stint.elapsed_minutes,
            release_after = %payout.release_after,
            "clocked out"
        );
        self.notify(
            &stint.employer_id,
            NotificationKind::StintCompleted,
            "Shift completed",
            format!(
                "The {} stint is complete. You can raise an issue until {}",
                stint.role,
                payout.release_after.format("%Y-%m-%d %H:%M UTC")
            ),
            json!({ "stint_id": stint.id, "review_window_ends": payout.release_after }),
        );
        Ok(stint)
    }
}
