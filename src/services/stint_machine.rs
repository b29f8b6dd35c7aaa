// services/stint_machine.rs
use serde_json::json;
use tracing::{error, info, warn};

use crate::database::StintFilter;
use crate::errors::{AppError, Result};
use crate::models::{
    application::ApplicationStatus,
    caller::{Caller, Role},
    notification::NotificationKind,
    payment_intent::PaymentIntent,
    stint::{NewStint, Stint, StintStatus},
};
use crate::services::marketplace::Marketplace;

#[derive(Debug, Clone, Default)]
pub struct StintQuery {
    pub status: Option<StintStatus>,
    /// Only stints posted by the caller.
    pub mine: bool,
}

impl Marketplace {
    pub async fn post_stint(&self, caller: &Caller, new: NewStint) -> Result<Stint> {
        caller.require_role(Role::Employer)?;
        if new.role.trim().is_empty() || new.city.trim().is_empty() {
            return Err(AppError::invalid_data("role and city are required"));
        }
        if !new.offered_rate.is_finite() || new.offered_rate <= 0.0 {
            return Err(AppError::InvalidAmount(format!(
                "offered rate must be a positive amount (got {})",
                new.offered_rate
            )));
        }
        // Validates the currency along with the amount.
        self.quote(new.offered_rate, &new.currency)?;

        let stint = Stint::new(&caller.user_id, new, self.now());
        self.store.insert_stint(&stint).await?;
        info!(stint_id = %stint.id, role = %stint.role, "stint posted");
        Ok(stint)
    }

    pub async fn get_stint(&self, stint_id: &str) -> Result<Stint> {
        self.load_stint(stint_id).await
    }

    pub async fn list_stints(&self, caller: &Caller, query: StintQuery) -> Result<Vec<Stint>> {
        let filter = StintFilter {
            employer_id: query.mine.then(|| caller.user_id.clone()),
            status: query.status,
        };
        self.store.list_stints(&filter).await
    }

    /// `open → confirmed` on payment success. Caller holds the stint lock.
    ///
    /// Idempotent: a stint already confirmed for this intent's application is
    /// returned unchanged, after repairing the application's status if an
    /// earlier attempt stopped half way. Notifications go out only on the
    /// call that performs the transition.
    pub(crate) async fn confirm_from_payment(&self, intent: &PaymentIntent) -> Result<Stint> {
        let mut stint = self.load_stint(&intent.stint_id).await?;
        let mut application = self.load_application(&intent.application_id).await?;
        let now = self.now();

        if stint.status != StintStatus::Open {
            if stint.accepted_application_id.as_deref() == Some(application.id.as_str())
                && stint.status.has_assignee()
            {
                if application.status == ApplicationStatus::Pending {
                    application.accept(now)?;
                    self.store.save_application(&mut application).await?;
                    warn!(application_id = %application.id, "repaired application left pending after confirmation");
                }
                return Ok(stint);
            }
            error!(
                stint_id = %stint.id,
                intent_id = %intent.id,
                status = %stint.status,
                "payment captured for a stint that can no longer be confirmed"
            );
            return Err(AppError::InvalidStintTransition {
                from: stint.status,
                attempted: StintStatus::Confirmed,
            });
        }

        let fees = self.fees_for(&stint, &application)?;
        if fees.total_amount != intent.amount {
            warn!(
                intent_id = %intent.id,
                "captured amount {} differs from the locked total {}",
                intent.amount,
                fees.total_amount
            );
        }
        stint.confirm(&application, fees, now)?;
        application.accept(now)?;

        self.store.save_stint(&mut stint).await?;
        self.store.save_application(&mut application).await?;

        let mut rejected = Vec::new();
        for mut other in self.store.applications_for_stint(&stint.id).await? {
            if other.id == application.id || other.status != ApplicationStatus::Pending {
                continue;
            }
            other.reject(Some("Another professional was booked".to_string()), now)?;
            match self.store.save_application(&mut other).await {
                Ok(()) => rejected.push(other),
                Err(e) => warn!(application_id = %other.id, "could not reject losing application: {}", e),
            }
        }

        info!(
            stint_id = %stint.id,
            professional_id = %application.professional_id,
            rejected = rejected.len(),
            "stint confirmed"
        );

        let data = json!({ "stint_id": stint.id, "intent_id": intent.id });
        self.notify(
            &application.professional_id,
            NotificationKind::ApplicationAccepted,
            "You're booked",
            format!("You have been booked for the {} stint on {}", stint.role, stint.shift_date),
            data.clone(),
        );
        self.notify(
            &stint.employer_id,
            NotificationKind::PaymentReceived,
            "Payment received",
            format!(
                "{} {} received; {} is booked",
                intent.currency, intent.amount, application.professional_name
            ),
            data,
        );
        for other in rejected {
            self.notify(
                &other.professional_id,
                NotificationKind::ApplicationRejected,
                "Stint filled",
                format!("The {} stint has been filled", stint.role),
                json!({ "stint_id": stint.id, "application_id": other.id }),
            );
        }

        Ok(stint)
    }

    /// `open|confirmed → cancelled`, before anyone clocks in. Cancels every
    /// payment in flight and rejects the applications still waiting.
    pub async fn cancel_stint(&self, caller: &Caller, stint_id: &str, reason: &str) -> Result<Stint> {
        let _guard = self.locks.lock(stint_id).await;
        let mut stint = self.load_stint(stint_id).await?;
        if !(stint.is_employer(&caller.user_id) || caller.is_admin()) {
            return Err(AppError::forbidden("only the stint's employer can cancel it"));
        }
        let professional = stint.accepted_professional_id.clone();
        let now = self.now();

        stint.cancel(reason, now)?;
        self.store.save_stint(&mut stint).await?;

        let cancelled_intents = self.cancel_active_intents(&stint.id, None).await?;
        let mut rejected = 0;
        for mut application in self.store.applications_for_stint(&stint.id).await? {
            if application.status != ApplicationStatus::Pending {
                continue;
            }
            application.reject(Some("Stint cancelled".to_string()), now)?;
            self.store.save_application(&mut application).await?;
            rejected += 1;
            self.notify(
                &application.professional_id,
                NotificationKind::StintCancelled,
                "Stint cancelled",
                format!("The {} stint you applied for was cancelled", stint.role),
                json!({ "stint_id": stint.id }),
            );
        }

        if let Some(professional_id) = professional {
            self.notify(
                &professional_id,
                NotificationKind::StintCancelled,
                "Booking cancelled",
                format!("Your booking for the {} stint was cancelled: {}", stint.role, reason),
                json!({ "stint_id": stint.id }),
            );
        }

        info!(
            stint_id = %stint.id,
            cancelled_intents,
            rejected,
            refund = ?stint.refund_amount,
            "stint cancelled"
        );
        Ok(stint)
    }
}
