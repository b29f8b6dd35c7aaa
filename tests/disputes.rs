mod common;

use chrono::Duration;
use std::sync::atomic::Ordering;

use common::{shift_start, Harness};
use stint_api::errors::AppError;
use stint_api::models::{
    dispute::{DisputeOutcome, DisputeParty, DisputeStatus},
    notification::NotificationKind,
    payout::PayoutStatus,
    stint::StintStatus,
};
use stint_api::services::disputes::{OpenDispute, SettlementReport};

fn complaint(opened_by: DisputeParty) -> OpenDispute {
    OpenDispute {
        opened_by,
        issue_type: "left_early".to_string(),
        description: "Left the ward two hours before the end of the shift".to_string(),
    }
}

#[tokio::test]
async fn dispute_freezes_the_payout_until_resolved() {
    let h = Harness::new();
    let stint = h.complete(5_000.0).await;

    h.clock.advance(Duration::hours(2));
    let dispute = h
        .market
        .open_dispute(&h.employer, &stint.id, complaint(DisputeParty::Employer))
        .await
        .unwrap();
    assert_eq!(dispute.status, DisputeStatus::Open);
    assert!(dispute.funds_are_frozen);
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::Disputed
    );
    let payout = h.payout(&stint.id).await.unwrap();
    assert!(payout.funds_are_frozen);

    // Past the window nothing is released while the dispute is open.
    h.clock.advance(Duration::hours(30));
    assert_eq!(h.market.settle_elapsed().await.unwrap(), SettlementReport::default());
    assert!(h.gateway.disbursements().is_empty());

    h.drain_notifications().await;
    assert!(h
        .notifier
        .kinds_for("pro-1")
        .contains(&NotificationKind::DisputeOpened));
}

#[tokio::test]
async fn release_outcome_pays_the_professional_in_full() {
    let h = Harness::new();
    let stint = h.complete(5_000.0).await;
    let dispute = h
        .market
        .open_dispute(&h.employer, &stint.id, complaint(DisputeParty::Employer))
        .await
        .unwrap();

    let err = h
        .market
        .resolve_dispute(&h.employer, &dispute.id, DisputeOutcome::ReleaseToProfessional, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let resolution = h
        .market
        .resolve_dispute(
            &h.admin,
            &dispute.id,
            DisputeOutcome::ReleaseToProfessional,
            Some("Timesheet confirms full shift".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(resolution.dispute.status, DisputeStatus::Resolved);
    assert!(!resolution.dispute.funds_are_frozen);
    assert_eq!(resolution.stint.status, StintStatus::PaidOut);
    assert_eq!(resolution.payout.status, PayoutStatus::Completed);
    assert_eq!(resolution.payout.net_amount, 4_750);
    assert_eq!(h.gateway.disbursements(), vec![("pro-1".to_string(), 4_750)]);
}

#[tokio::test]
async fn refund_outcome_voids_the_payout() {
    let h = Harness::new();
    let stint = h.complete(5_000.0).await;
    let dispute = h
        .market
        .open_dispute(&h.professional, &stint.id, complaint(DisputeParty::Professional))
        .await
        .unwrap();

    let resolution = h
        .market
        .resolve_dispute(&h.admin, &dispute.id, DisputeOutcome::RefundToEmployer, None)
        .await
        .unwrap();
    assert_eq!(resolution.stint.status, StintStatus::Refunded);
    assert_eq!(resolution.stint.refund_amount, Some(5_750));
    assert_eq!(resolution.payout.status, PayoutStatus::Cancelled);
    assert_eq!(resolution.payout.net_amount, 0);
    assert!(h.gateway.disbursements().is_empty());
}

#[tokio::test]
async fn partial_outcome_splits_the_shift_amount() {
    let h = Harness::new();
    let stint = h.complete(5_000.0).await;
    let dispute = h
        .market
        .open_dispute(&h.employer, &stint.id, complaint(DisputeParty::Employer))
        .await
        .unwrap();

    let err = h
        .market
        .resolve_dispute(
            &h.admin,
            &dispute.id,
            DisputeOutcome::Partial {
                professional_percent: 150,
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));

    let resolution = h
        .market
        .resolve_dispute(
            &h.admin,
            &dispute.id,
            DisputeOutcome::Partial {
                professional_percent: 60,
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(resolution.payout.net_amount, 2_850);
    assert_eq!(resolution.payout.refund_amount, 2_000);
    assert_eq!(resolution.stint.refund_amount, Some(2_000));
    assert_eq!(resolution.stint.status, StintStatus::PaidOut);
}

#[tokio::test]
async fn dispute_window_closes_after_a_day() {
    let h = Harness::new();
    let stint = h.complete(5_000.0).await;

    h.clock.advance(Duration::hours(24));
    let err = h
        .market
        .open_dispute(&h.employer, &stint.id, complaint(DisputeParty::Employer))
        .await
        .unwrap_err();
    match err {
        AppError::DisputeWindowClosed { closed_at } => {
            assert_eq!(Some(closed_at), stint.completed_at.map(|t| t + Duration::hours(24)))
        }
        other => panic!("expected DisputeWindowClosed, got {:?}", other),
    }
}

#[tokio::test]
async fn only_parties_dispute_and_only_for_their_side() {
    let h = Harness::new();
    let stint = h.complete(5_000.0).await;

    let err = h
        .market
        .open_dispute(&h.rival, &stint.id, complaint(DisputeParty::Professional))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = h
        .market
        .open_dispute(&h.employer, &stint.id, complaint(DisputeParty::Professional))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn dispute_can_be_raised_mid_shift() {
    let h = Harness::new();
    let (stint, _, _) = h.book(5_000.0).await;
    h.clock.set(shift_start());
    h.market
        .clock_in(&h.professional, &stint.id, None)
        .await
        .unwrap();

    let dispute = h
        .market
        .open_dispute(&h.professional, &stint.id, complaint(DisputeParty::Professional))
        .await
        .unwrap();
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::Disputed
    );
    assert!(h.payout(&stint.id).await.unwrap().funds_are_frozen);

    let reviewed = h.market.review_dispute(&h.admin, &dispute.id).await.unwrap();
    assert_eq!(reviewed.status, DisputeStatus::UnderReview);
    let escalated = h.market.escalate_dispute(&h.admin, &dispute.id).await.unwrap();
    assert_eq!(escalated.status, DisputeStatus::Escalated);
    assert!(matches!(
        h.market.review_dispute(&h.admin, &dispute.id).await,
        Err(AppError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn no_dispute_before_the_shift_starts() {
    let h = Harness::new();
    let (stint, _, _) = h.book(5_000.0).await;
    let err = h
        .market
        .open_dispute(&h.employer, &stint.id, complaint(DisputeParty::Employer))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidStintTransition {
            from: StintStatus::Confirmed,
            attempted: StintStatus::Disputed
        }
    ));
}

#[tokio::test]
async fn undisputed_stint_pays_out_after_the_window() {
    let h = Harness::new();
    let stint = h.complete(5_000.0).await;

    let err = h.market.release_payout(&h.admin, &stint.id).await.unwrap_err();
    assert!(matches!(err, AppError::ReviewWindowOpen { .. }));
    assert_eq!(h.market.settle_elapsed().await.unwrap(), SettlementReport::default());

    h.clock.advance(Duration::hours(24));
    let report = h.market.settle_elapsed().await.unwrap();
    assert_eq!(report.paid_out, 1);

    let paid = h.market.get_stint(&stint.id).await.unwrap();
    assert_eq!(paid.status, StintStatus::PaidOut);
    assert!(paid.paid_at.is_some());
    let payout = h.market.get_payout(&h.professional, &stint.id).await.unwrap();
    assert_eq!(payout.status, PayoutStatus::Completed);
    assert_eq!(payout.gateway_ref.as_deref(), Some(format!("B2C-{}", stint.id).as_str()));

    // Settling again is a no-op.
    assert_eq!(h.market.settle_elapsed().await.unwrap(), SettlementReport::default());
    assert_eq!(h.gateway.disbursements().len(), 1);

    h.drain_notifications().await;
    assert!(h.notifier.kinds_for("pro-1").contains(&NotificationKind::PayoutSent));
}

#[tokio::test]
async fn failed_disbursement_can_be_retried() {
    let h = Harness::new();
    let stint = h.complete(5_000.0).await;
    h.gateway.fail_disbursement.store(true, Ordering::SeqCst);

    h.clock.advance(Duration::hours(25));
    let report = h.market.settle_elapsed().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::Closed
    );
    let payout = h.payout(&stint.id).await.unwrap();
    assert_eq!(payout.status, PayoutStatus::Failed);
    assert!(payout.failure_reason.is_some());

    let err = h.market.retry_payout(&h.employer, &stint.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    h.gateway.fail_disbursement.store(false, Ordering::SeqCst);
    let payout = h.market.retry_payout(&h.admin, &stint.id).await.unwrap();
    assert_eq!(payout.status, PayoutStatus::Completed);
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::PaidOut
    );
}

#[tokio::test]
async fn payout_computation_is_idempotent() {
    let h = Harness::new();
    let stint = h.complete(5_000.0).await;

    let first = h.market.compute_payout(&h.employer, &stint.id).await.unwrap();
    let second = h.market.compute_payout(&h.professional, &stint.id).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.net_amount, 4_750);

    let err = h.market.compute_payout(&h.rival, &stint.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn no_payout_is_owed_before_the_work_is_done() {
    let h = Harness::new();
    let (stint, _, _) = h.book(5_000.0).await;

    let err = h.market.compute_payout(&h.employer, &stint.id).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidStintTransition {
            from: StintStatus::Confirmed,
            ..
        }
    ));
    assert!(h.payout(&stint.id).await.is_none());

    h.clock.set(shift_start());
    h.market.clock_in(&h.professional, &stint.id, None).await.unwrap();
    h.clock.advance(Duration::hours(8));
    let completed = h.market.clock_out(&h.professional, &stint.id, None).await.unwrap();

    let payout = h.market.compute_payout(&h.employer, &stint.id).await.unwrap();
    let completed_at = completed.completed_at.unwrap();
    assert_eq!(payout.release_after, completed_at + Duration::hours(24));
}

#[tokio::test]
async fn queued_transfer_pays_out_only_when_the_result_succeeds() {
    let h = Harness::new();
    let stint = h.complete(5_000.0).await;
    h.gateway.queue_disbursements.store(true, Ordering::SeqCst);

    h.clock.advance(Duration::hours(25));
    let report = h.market.settle_elapsed().await.unwrap();
    assert_eq!(report.awaiting_result, 1);
    assert_eq!(report.paid_out, 0);

    let payout = h.payout(&stint.id).await.unwrap();
    assert_eq!(payout.status, PayoutStatus::Processing);
    let conversation_id = payout.gateway_ref.clone().unwrap();
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::Closed
    );

    h.market
        .handle_b2c_result(&conversation_id, 0, "The service request is processed successfully.", Some("RKT7Y4ZQ1P".to_string()))
        .await
        .unwrap();
    let payout = h.payout(&stint.id).await.unwrap();
    assert_eq!(payout.status, PayoutStatus::Completed);
    assert_eq!(payout.receipt_number.as_deref(), Some("RKT7Y4ZQ1P"));
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::PaidOut
    );

    // A replayed result changes nothing.
    h.market
        .handle_b2c_result(&conversation_id, 2001, "The initiator information is invalid.", None)
        .await
        .unwrap();
    assert_eq!(h.payout(&stint.id).await.unwrap().status, PayoutStatus::Completed);

    h.drain_notifications().await;
    assert!(h.notifier.kinds_for("pro-1").contains(&NotificationKind::PayoutSent));
}

#[tokio::test]
async fn failed_transfer_result_leaves_the_payout_retryable() {
    let h = Harness::new();
    let stint = h.complete(5_000.0).await;
    h.gateway.queue_disbursements.store(true, Ordering::SeqCst);
    h.clock.advance(Duration::hours(25));
    h.market.release_payout(&h.admin, &stint.id).await.unwrap();
    let conversation_id = h.payout(&stint.id).await.unwrap().gateway_ref.unwrap();

    h.market
        .handle_b2c_result(&conversation_id, 1, "The balance is insufficient for the transaction.", None)
        .await
        .unwrap();
    let payout = h.payout(&stint.id).await.unwrap();
    assert_eq!(payout.status, PayoutStatus::Failed);
    assert!(payout.failure_reason.unwrap().contains("insufficient"));
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::Closed
    );

    // The retry goes out as a new transfer; its queue timeout fails it again.
    h.market.retry_payout(&h.admin, &stint.id).await.unwrap();
    let retried = h.payout(&stint.id).await.unwrap();
    assert!(retried.is_awaiting_result());
    h.market
        .handle_b2c_timeout(retried.gateway_ref.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(h.payout(&stint.id).await.unwrap().status, PayoutStatus::Failed);
    assert_eq!(h.gateway.disbursements().len(), 2);
}
