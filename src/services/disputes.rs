// services/disputes.rs
//! Dispute & payout gate.
//!
//! A payout is materialised from the fees locked at confirmation when the
//! stint completes (or when a dispute needs something to freeze). Funds move
//! only once the review window has passed with no dispute, or when an admin
//! resolves the dispute. M-Pesa settles transfers asynchronously, so a stint
//! is `paid_out` only after the B2C result reports success.

use serde_json::json;
use tracing::{error, info, warn};

use crate::database::StintFilter;
use crate::errors::{AppError, Result};
use crate::models::{
    caller::Caller,
    dispute::{Dispute, DisputeOutcome, DisputeParty},
    notification::NotificationKind,
    payout::{Payout, PayoutStatus},
    stint::{Stint, StintStatus},
};
use crate::services::marketplace::Marketplace;

#[derive(Debug, Clone)]
pub struct OpenDispute {
    pub opened_by: DisputeParty,
    pub issue_type: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub dispute: Dispute,
    pub stint: Stint,
    pub payout: Payout,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettlementReport {
    pub paid_out: usize,
    /// Transfers accepted by the processor whose result has not arrived.
    pub awaiting_result: usize,
    pub failed: usize,
}

impl Marketplace {
    fn ensure_party(&self, caller: &Caller, stint: &Stint) -> Result<()> {
        if stint.is_employer(&caller.user_id) || stint.is_assigned_to(&caller.user_id) || caller.is_admin() {
            return Ok(());
        }
        Err(AppError::forbidden("not a party to this stint"))
    }

    /// Returns the stint's payout, creating it from the locked fees on first
    /// use. Safe to call any number of times.
    pub(crate) async fn ensure_payout(&self, stint: &Stint) -> Result<Payout> {
        let window = self.policy.dispute_window();
        if let Some(mut existing) = self.store.payout_for_stint(&stint.id).await? {
            // A payout set aside mid-shift follows the window that opens at completion.
            if let Some(window_end) = stint.review_window_end(window) {
                if existing.status == PayoutStatus::Pending && existing.release_after != window_end {
                    existing.reschedule(window_end, self.now())?;
                    self.store.save_payout(&mut existing).await?;
                    info!(stint_id = %stint.id, release_after = %window_end, "payout rescheduled");
                }
            }
            return Ok(existing);
        }

        let (Some(fees), Some(professional_id)) = (&stint.fees, &stint.accepted_professional_id) else {
            error!(stint_id = %stint.id, status = %stint.status, "payout requested for a stint without locked fees");
            return Err(AppError::InvalidStintTransition {
                from: stint.status,
                attempted: StintStatus::Closed,
            });
        };

        let destination = match &stint.accepted_application_id {
            Some(id) => self
                .store
                .get_application(id)
                .await?
                .and_then(|a| a.payout_phone),
            None => None,
        };
        let now = self.now();
        let release_after = stint.review_window_end(window).unwrap_or(now + window);

        let payout = Payout::from_locked_fees(&stint.id, professional_id, fees, destination, release_after, now);
        match self.store.insert_payout(&payout).await {
            Ok(()) => {
                info!(
                    stint_id = %stint.id,
                    net = payout.net_amount,
                    release_after = %payout.release_after,
                    "payout set aside"
                );
                Ok(payout)
            }
            // Lost a creation race; the other writer's record is the payout.
            Err(AppError::DuplicateKey) => self
                .store
                .payout_for_stint(&stint.id)
                .await?
                .ok_or_else(|| AppError::service("payout vanished after duplicate insert")),
            Err(e) => Err(e),
        }
    }

    /// Payout for work that has been done. Nothing is owed before the stint
    /// completes.
    pub async fn compute_payout(&self, caller: &Caller, stint_id: &str) -> Result<Payout> {
        let stint = self.load_stint(stint_id).await?;
        self.ensure_party(caller, &stint)?;
        if !matches!(
            stint.status,
            StintStatus::Completed
                | StintStatus::Disputed
                | StintStatus::Closed
                | StintStatus::PaidOut
                | StintStatus::Refunded
        ) {
            return Err(AppError::InvalidStintTransition {
                from: stint.status,
                attempted: StintStatus::Closed,
            });
        }
        self.ensure_payout(&stint).await
    }

    pub async fn get_payout(&self, caller: &Caller, stint_id: &str) -> Result<Payout> {
        let stint = self.load_stint(stint_id).await?;
        self.ensure_party(caller, &stint)?;
        self.store
            .payout_for_stint(stint_id)
            .await?
            .ok_or_else(|| AppError::not_found("payout", stint_id))
    }

    pub async fn open_dispute(&self, caller: &Caller, stint_id: &str, req: OpenDispute) -> Result<Dispute> {
        if req.issue_type.trim().is_empty() || req.description.trim().is_empty() {
            return Err(AppError::invalid_data("issue type and description are required"));
        }

        let _guard = self.locks.lock(stint_id).await;
        let mut stint = self.load_stint(stint_id).await?;
        let side = if stint.is_employer(&caller.user_id) {
            DisputeParty::Employer
        } else if stint.is_assigned_to(&caller.user_id) {
            DisputeParty::Professional
        } else {
            return Err(AppError::forbidden("only the employer or the booked professional can open a dispute"));
        };
        if side != req.opened_by {
            return Err(AppError::forbidden("a dispute can only be opened on your own side of the stint"));
        }

        let now = self.now();
        match stint.status {
            StintStatus::InProgress => {}
            StintStatus::Completed => {
                if let Some(closed_at) = stint.review_window_end(self.policy.dispute_window()) {
                    if now >= closed_at {
                        return Err(AppError::DisputeWindowClosed { closed_at });
                    }
                }
            }
            other => {
                return Err(AppError::InvalidStintTransition {
                    from: other,
                    attempted: StintStatus::Disputed,
                })
            }
        }

        let mut payout = self.ensure_payout(&stint).await?;
        stint.mark_disputed(now)?;
        self.store.save_stint(&mut stint).await?;
        payout.freeze(now)?;
        self.store.save_payout(&mut payout).await?;

        let dispute = Dispute::open(
            &stint.id,
            side,
            &caller.user_id,
            req.issue_type,
            req.description,
            now,
        );
        self.store.insert_dispute(&dispute).await?;

        info!(
            stint_id = %stint.id,
            dispute_id = %dispute.id,
            opened_by = ?side,
            "dispute opened, payout frozen"
        );
        let counterparty = match side {
            DisputeParty::Employer => stint.accepted_professional_id.clone(),
            DisputeParty::Professional => Some(stint.employer_id.clone()),
        };
        if let Some(user_id) = counterparty {
            self.notify(
                &user_id,
                NotificationKind::DisputeOpened,
                "Dispute opened",
                format!("A dispute was opened on the {} stint: {}", stint.role, dispute.issue_type),
                json!({ "stint_id": stint.id, "dispute_id": dispute.id }),
            );
        }
        Ok(dispute)
    }

    pub async fn get_dispute(&self, caller: &Caller, dispute_id: &str) -> Result<Dispute> {
        let dispute = self.load_dispute(dispute_id).await?;
        let stint = self.load_stint(&dispute.stint_id).await?;
        self.ensure_party(caller, &stint)?;
        Ok(dispute)
    }

    pub async fn list_disputes(&self, caller: &Caller, stint_id: &str) -> Result<Vec<Dispute>> {
        let stint = self.load_stint(stint_id).await?;
        self.ensure_party(caller, &stint)?;
        self.store.disputes_for_stint(stint_id).await
    }

    pub async fn review_dispute(&self, caller: &Caller, dispute_id: &str) -> Result<Dispute> {
        caller.require_admin()?;
        let mut dispute = self.load_dispute(dispute_id).await?;
        dispute.start_review(self.now())?;
        self.store.save_dispute(&mut dispute).await?;
        info!(dispute_id = %dispute.id, "dispute under review");
        Ok(dispute)
    }

    pub async fn escalate_dispute(&self, caller: &Caller, dispute_id: &str) -> Result<Dispute> {
        caller.require_admin()?;
        let mut dispute = self.load_dispute(dispute_id).await?;
        dispute.escalate(self.now())?;
        self.store.save_dispute(&mut dispute).await?;
        warn!(dispute_id = %dispute.id, "dispute escalated");
        Ok(dispute)
    }

    /// Admin decision. Unfreezes the payout and finalises it per outcome:
    /// release pays the professional in full, refund voids the payout and
    /// returns the employer's total, partial splits the shift amount.
    pub async fn resolve_dispute(
        &self,
        caller: &Caller,
        dispute_id: &str,
        outcome: DisputeOutcome,
        note: Option<String>,
    ) -> Result<Resolution> {
        caller.require_admin()?;
        if let DisputeOutcome::Partial { professional_percent } = outcome {
            if professional_percent > 100 {
                return Err(AppError::invalid_data("professional_percent must be between 0 and 100"));
            }
        }

        let dispute = self.load_dispute(dispute_id).await?;
        let _guard = self.locks.lock(&dispute.stint_id).await;
        let mut dispute = self.load_dispute(dispute_id).await?;
        let mut stint = self.load_stint(&dispute.stint_id).await?;
        let mut payout = self.ensure_payout(&stint).await?;
        let now = self.now();

        dispute.resolve(outcome, note, now)?;
        match outcome {
            DisputeOutcome::ReleaseToProfessional => {
                stint.close(now)?;
                payout.unfreeze(now);
            }
            DisputeOutcome::RefundToEmployer => {
                let refund = stint.fees.as_ref().map_or(payout.gross_amount, |f| f.total_amount);
                stint.mark_refunded(refund, now)?;
                payout.void(refund, now)?;
            }
            DisputeOutcome::Partial { professional_percent } => {
                stint.close(now)?;
                payout.apply_partial(professional_percent, now)?;
                payout.unfreeze(now);
                stint.refund_amount = Some(payout.refund_amount);
            }
        }

        self.store.save_stint(&mut stint).await?;
        self.store.save_payout(&mut payout).await?;
        self.store.save_dispute(&mut dispute).await?;
        info!(
            dispute_id = %dispute.id,
            stint_id = %stint.id,
            outcome = ?outcome,
            net = payout.net_amount,
            refund = payout.refund_amount,
            "dispute resolved"
        );

        if stint.status == StintStatus::Closed {
            self.disburse(&mut stint, &mut payout).await?;
        }

        let data = json!({ "stint_id": stint.id, "dispute_id": dispute.id, "outcome": outcome });
        let mut parties = vec![stint.employer_id.clone()];
        parties.extend(stint.accepted_professional_id.clone());
        for user_id in parties {
            self.notify(
                &user_id,
                NotificationKind::DisputeResolved,
                "Dispute resolved",
                format!("The dispute on the {} stint has been resolved", stint.role),
                data.clone(),
            );
        }

        Ok(Resolution {
            dispute,
            stint,
            payout,
        })
    }

    /// Pays a payout out through the gateway. Caller holds the stint lock and
    /// the stint is `closed`. A transfer the processor only queued leaves the
    /// payout `processing` until its result arrives. A gateway failure leaves
    /// the payout `failed` and the stint `closed`, ready for a retry.
    async fn disburse(&self, stint: &mut Stint, payout: &mut Payout) -> Result<()> {
        payout.begin_processing(self.now())?;
        self.store.save_payout(payout).await?;

        let outcome = if payout.net_amount <= 0 {
            Ok(None)
        } else if payout.destination.is_none() {
            warn!(stint_id = %stint.id, "no M-Pesa number on file; payout recorded for manual settlement");
            Ok(None)
        } else {
            match tokio::time::timeout(self.policy.gateway_timeout(), self.gateway.disburse(payout)).await {
                Ok(Ok(disbursement)) => Ok(Some(disbursement)),
                Ok(Err(e)) => Err(e),
                Err(elapsed) => Err(AppError::from(elapsed)),
            }
        };

        match outcome {
            Ok(Some(disbursement)) if !disbursement.settled => {
                payout.mark_submitted(disbursement.reference, self.now())?;
                self.store.save_payout(payout).await?;
                info!(
                    stint_id = %stint.id,
                    conversation_id = ?payout.gateway_ref,
                    "payout submitted, awaiting the transfer result"
                );
                Ok(())
            }
            Ok(settled) => {
                let reference = settled.map(|d| d.reference);
                self.finish_payout(stint, payout, reference).await
            }
            Err(e) => self.fail_payout(stint, payout, e.to_string()).await,
        }
    }

    /// `closed → paid_out` once the money has actually moved.
    async fn finish_payout(&self, stint: &mut Stint, payout: &mut Payout, reference: Option<String>) -> Result<()> {
        let now = self.now();
        payout.complete(reference, now)?;
        self.store.save_payout(payout).await?;
        stint.mark_paid_out(now)?;
        self.store.save_stint(stint).await?;
        info!(stint_id = %stint.id, net = payout.net_amount, "payout completed");
        self.notify(
            &payout.professional_id,
            NotificationKind::PayoutSent,
            "Payout sent",
            format!("{} {} has been sent to you", payout.currency, payout.net_amount),
            json!({ "stint_id": stint.id, "payout_id": payout.id }),
        );
        Ok(())
    }

    async fn fail_payout(&self, stint: &Stint, payout: &mut Payout, reason: String) -> Result<()> {
        payout.fail(reason, self.now())?;
        self.store.save_payout(payout).await?;
        warn!(
            stint_id = %stint.id,
            "payout failed: {}",
            payout.failure_reason.as_deref().unwrap_or_default()
        );
        self.notify(
            &payout.professional_id,
            NotificationKind::PayoutFailed,
            "Payout delayed",
            "We could not send your payout yet; it will be retried".to_string(),
            json!({ "stint_id": stint.id, "payout_id": payout.id }),
        );
        Ok(())
    }

    /// Daraja B2C result, keyed by ConversationID. Only a successful result
    /// pays the stint out; any other leaves it `closed` for a retry. Replays
    /// and results for superseded transfers are ignored.
    pub async fn handle_b2c_result(
        &self,
        conversation_id: &str,
        result_code: i64,
        result_desc: &str,
        transaction_id: Option<String>,
    ) -> Result<()> {
        let outcome = if result_code == 0 {
            Ok(transaction_id.filter(|id| !id.is_empty()))
        } else {
            Err(format!("{} (result code {})", result_desc, result_code))
        };
        self.apply_transfer_outcome(conversation_id, outcome).await
    }

    /// Daraja gave up on a queued B2C request without processing it.
    pub async fn handle_b2c_timeout(&self, conversation_id: &str) -> Result<()> {
        self.apply_transfer_outcome(
            conversation_id,
            Err("transfer request timed out in the M-Pesa queue".to_string()),
        )
        .await
    }

    async fn apply_transfer_outcome(
        &self,
        conversation_id: &str,
        outcome: std::result::Result<Option<String>, String>,
    ) -> Result<()> {
        let Some(payout) = self.store.payout_by_gateway_ref(conversation_id).await? else {
            warn!(conversation_id = %conversation_id, "B2C result for an unknown transfer");
            return Ok(());
        };
        let _guard = self.locks.lock(&payout.stint_id).await;
        let mut payout = self
            .store
            .payout_by_gateway_ref(conversation_id)
            .await?
            .ok_or_else(|| AppError::not_found("payout", conversation_id))?;
        if !payout.is_awaiting_result() {
            info!(
                payout_id = %payout.id,
                status = %payout.status,
                "B2C result for a settled payout ignored"
            );
            return Ok(());
        }

        let mut stint = self.load_stint(&payout.stint_id).await?;
        match outcome {
            Ok(receipt) => {
                payout.receipt_number = receipt;
                let reference = payout.gateway_ref.clone();
                self.finish_payout(&mut stint, &mut payout, reference).await
            }
            Err(reason) => self.fail_payout(&stint, &mut payout, reason).await,
        }
    }

    /// `completed → closed → paid_out` once the review window has passed.
    /// Caller holds the stint lock.
    async fn release_locked(&self, stint_id: &str) -> Result<Payout> {
        let mut stint = self.load_stint(stint_id).await?;
        if stint.status != StintStatus::Completed {
            return Err(AppError::InvalidStintTransition {
                from: stint.status,
                attempted: StintStatus::Closed,
            });
        }
        let now = self.now();
        if let Some(closes_at) = stint.review_window_end(self.policy.dispute_window()) {
            if now < closes_at {
                return Err(AppError::ReviewWindowOpen { closes_at });
            }
        }

        let mut payout = self.ensure_payout(&stint).await?;
        stint.close(now)?;
        self.store.save_stint(&mut stint).await?;
        self.disburse(&mut stint, &mut payout).await?;
        Ok(payout)
    }

    pub async fn release_payout(&self, caller: &Caller, stint_id: &str) -> Result<Payout> {
        caller.require_admin()?;
        let _guard = self.locks.lock(stint_id).await;
        self.release_locked(stint_id).await
    }

    /// Tries a failed disbursement again.
    pub async fn retry_payout(&self, caller: &Caller, stint_id: &str) -> Result<Payout> {
        caller.require_admin()?;
        let _guard = self.locks.lock(stint_id).await;
        let mut stint = self.load_stint(stint_id).await?;
        let mut payout = self
            .store
            .payout_for_stint(stint_id)
            .await?
            .ok_or_else(|| AppError::not_found("payout", stint_id))?;
        if stint.status != StintStatus::Closed || payout.status != PayoutStatus::Failed {
            return Err(AppError::InvalidTransition {
                entity: "payout",
                from: payout.status.to_string(),
                attempted: PayoutStatus::Processing.to_string(),
            });
        }
        self.disburse(&mut stint, &mut payout).await?;
        Ok(payout)
    }

    /// Settles every completed stint whose review window has passed without
    /// a dispute.
    pub async fn settle_elapsed(&self) -> Result<SettlementReport> {
        let now = self.now();
        let window = self.policy.dispute_window();
        let mut report = SettlementReport::default();

        let completed = self
            .store
            .list_stints(&StintFilter {
                employer_id: None,
                status: Some(StintStatus::Completed),
            })
            .await?;
        for stint in completed {
            if stint.review_window_end(window).map_or(true, |end| now < end) {
                continue;
            }
            let _guard = self.locks.lock(&stint.id).await;
            match self.release_locked(&stint.id).await {
                Ok(payout) if payout.status == PayoutStatus::Completed => report.paid_out += 1,
                Ok(payout) if payout.is_awaiting_result() => report.awaiting_result += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    warn!(stint_id = %stint.id, "could not settle stint: {}", e);
                    report.failed += 1;
                }
            }
        }

        if report != SettlementReport::default() {
            info!(
                paid_out = report.paid_out,
                awaiting_result = report.awaiting_result,
                failed = report.failed,
                "review windows settled"
            );
        }
        Ok(report)
    }
}
