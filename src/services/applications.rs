// services/applications.rs
use serde_json::json;
use tracing::{info, warn};

use crate::errors::{AppError, Result};
use crate::models::{
    application::{Application, ApplicationStatus, NewApplication},
    caller::{Caller, Role},
    notification::NotificationKind,
    stint::{Stint, StintStatus},
};
use crate::services::{
    fee_calculator::FeeBreakdown, marketplace::Marketplace, mpesa_service::normalize_msisdn,
};

/// Result of accepting an application: the stint is now held for this
/// applicant until the employer pays `fees.total_amount`.
#[derive(Debug, Clone)]
pub struct Acceptance {
    pub application: Application,
    pub stint: Stint,
    pub fees: FeeBreakdown,
}

impl Marketplace {
    pub async fn apply(
        &self,
        caller: &Caller,
        stint_id: &str,
        mut new: NewApplication,
    ) -> Result<Application> {
        caller.require_role(Role::Professional)?;

        if let Some(bid) = new.bid_amount {
            if !bid.is_finite() || bid <= 0.0 {
                return Err(AppError::InvalidAmount(format!(
                    "bid must be a positive amount (got {})",
                    bid
                )));
            }
        }
        new.payout_phone = new
            .payout_phone
            .as_deref()
            .map(normalize_msisdn)
            .transpose()?;
        if new.professional_name.trim().is_empty() {
            new.professional_name = caller
                .name
                .clone()
                .unwrap_or_else(|| "Professional".to_string());
        }

        let _guard = self.locks.lock(stint_id).await;
        let stint = self.load_stint(stint_id).await?;
        if stint.is_employer(&caller.user_id) {
            return Err(AppError::forbidden("you cannot apply to your own stint"));
        }

        let existing = self.store.applications_for_stint(stint_id).await?;
        if let Some(active) = existing
            .iter()
            .find(|a| a.professional_id == caller.user_id && a.status.is_active())
        {
            return Err(AppError::DuplicateApplication {
                application_id: active.id.clone(),
            });
        }
        if stint.status != StintStatus::Open {
            return Err(AppError::StintNotOpen {
                status: stint.status,
            });
        }

        let application = Application::new(stint_id, &caller.user_id, new, self.now());
        match self.store.insert_application(&application).await {
            Ok(()) => {}
            Err(AppError::DuplicateKey) => {
                let winner = self
                    .store
                    .applications_for_stint(stint_id)
                    .await?
                    .into_iter()
                    .find(|a| a.professional_id == caller.user_id && a.status.is_active());
                return Err(match winner {
                    Some(active) => AppError::DuplicateApplication {
                        application_id: active.id,
                    },
                    None => AppError::DuplicateKey,
                });
            }
            Err(e) => return Err(e),
        }

        info!(
            stint_id = %stint_id,
            application_id = %application.id,
            is_bid = application.is_bid,
            "application submitted"
        );
        self.notify(
            &stint.employer_id,
            NotificationKind::ApplicationReceived,
            "New application",
            format!(
                "{} applied for your {} stint",
                application.professional_name, stint.role
            ),
            json!({ "stint_id": stint_id, "application_id": application.id }),
        );

        Ok(application)
    }

    /// The stint's employer sees every application; a professional sees
    /// only their own.
    pub async fn list_applications(&self, caller: &Caller, stint_id: &str) -> Result<Vec<Application>> {
        let stint = self.load_stint(stint_id).await?;
        let mut applications = self.store.applications_for_stint(stint_id).await?;
        if !(stint.is_employer(&caller.user_id) || caller.is_admin()) {
            applications.retain(|a| a.professional_id == caller.user_id);
        }
        applications.sort_by_key(|a| a.applied_at);
        Ok(applications)
    }

    /// Fee quote for paying this applicant.
    pub async fn quote_application(&self, caller: &Caller, application_id: &str) -> Result<FeeBreakdown> {
        let application = self.load_application(application_id).await?;
        let stint = self.load_stint(&application.stint_id).await?;
        if !(stint.is_employer(&caller.user_id) || caller.is_admin()) {
            return Err(AppError::forbidden("only the stint's employer can see this quote"));
        }
        self.fees_for(&stint, &application)
    }

    /// Picks the winner. Does not confirm: the stint stays `open`, held for
    /// this application until its payment succeeds.
    pub async fn accept(&self, caller: &Caller, application_id: &str) -> Result<Acceptance> {
        caller.require_role(Role::Employer)?;
        let application = self.load_application(application_id).await?;

        let _guard = self.locks.lock(&application.stint_id).await;
        let mut stint = self.load_stint(&application.stint_id).await?;
        let application = self.load_application(application_id).await?;
        if !stint.is_employer(&caller.user_id) {
            return Err(AppError::forbidden("only the stint's employer can accept applications"));
        }

        let now = self.now();
        self.lapse_stale_hold(&mut stint, now).await?;
        stint.select(&application.id, now)?;
        if application.status != ApplicationStatus::Pending {
            return Err(AppError::ApplicationNotPending {
                status: application.status,
            });
        }
        let fees = self.fees_for(&stint, &application)?;

        if let Err(err) = self.store.save_stint(&mut stint).await {
            return Err(self.explain_lost_selection(err, &stint.id, &application.id).await);
        }

        info!(
            stint_id = %stint.id,
            application_id = %application.id,
            total = fees.total_amount,
            "application accepted, awaiting payment"
        );
        Ok(Acceptance {
            application,
            stint,
            fees,
        })
    }

    /// Another process may have selected a different applicant between our
    /// read and write; report that as the conflict it is.
    async fn explain_lost_selection(&self, err: AppError, stint_id: &str, application_id: &str) -> AppError {
        if !matches!(err, AppError::ConcurrentModification { .. }) {
            return err;
        }
        match self.store.get_stint(stint_id).await {
            Ok(Some(current)) => match current.selected_application_id.or(current.accepted_application_id) {
                Some(winner) if winner != application_id => AppError::StintAlreadyAssigned {
                    application_id: winner,
                },
                _ => err,
            },
            _ => err,
        }
    }

    pub async fn reject(
        &self,
        caller: &Caller,
        application_id: &str,
        reason: Option<String>,
    ) -> Result<Application> {
        let application = self.load_application(application_id).await?;

        let _guard = self.locks.lock(&application.stint_id).await;
        let mut application = self.load_application(application_id).await?;
        let stint = self.load_stint(&application.stint_id).await?;
        if !(stint.is_employer(&caller.user_id) || caller.is_admin()) {
            return Err(AppError::forbidden("only the stint's employer can reject applications"));
        }

        application.reject(reason, self.now())?;
        self.store.save_application(&mut application).await?;
        self.abandon_selection(&stint.id, &application.id).await?;

        info!(application_id = %application.id, "application rejected");
        self.notify(
            &application.professional_id,
            NotificationKind::ApplicationRejected,
            "Application not selected",
            format!("Your application for the {} stint was not selected", stint.role),
            json!({
                "stint_id": stint.id,
                "application_id": application.id,
                "reason": application.rejection_reason,
            }),
        );
        Ok(application)
    }

    pub async fn withdraw(&self, caller: &Caller, application_id: &str) -> Result<Application> {
        let application = self.load_application(application_id).await?;
        if application.professional_id != caller.user_id {
            return Err(AppError::forbidden("only the applicant can withdraw an application"));
        }

        let _guard = self.locks.lock(&application.stint_id).await;
        let mut application = self.load_application(application_id).await?;
        application.withdraw(self.now())?;
        self.store.save_application(&mut application).await?;
        self.abandon_selection(&application.stint_id, &application.id).await?;

        info!(application_id = %application.id, "application withdrawn");
        Ok(application)
    }

    /// Drops any payment in flight for this application and frees the stint
    /// for another applicant. Caller holds the stint lock.
    async fn abandon_selection(&self, stint_id: &str, application_id: &str) -> Result<()> {
        let cancelled = self
            .cancel_active_intents(stint_id, Some(application_id))
            .await?;
        if cancelled > 0 {
            warn!(
                stint_id = %stint_id,
                application_id = %application_id,
                cancelled,
                "cancelled in-flight payment for an application that left the running"
            );
        }
        self.release_selection(stint_id, application_id).await
    }
}
