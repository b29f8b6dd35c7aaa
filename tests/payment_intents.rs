mod common;

use chrono::Duration;
use std::sync::atomic::Ordering;

use common::{checkout_id, Harness, PHONE};
use stint_api::database::MarketStore;
use stint_api::errors::AppError;
use stint_api::models::{
    application::ApplicationStatus,
    notification::NotificationKind,
    payment_intent::{FailureKind, IntentStatus, PaymentMethod},
    stint::StintStatus,
};
use stint_api::services::{
    clock::Clock,
    payment_intents::CreateIntent,
    resolution::{IntentResolver, PollingResolver},
};

#[tokio::test]
async fn intent_amount_must_match_the_quote() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    h.market.accept(&h.employer, &application.id).await.unwrap();

    let err = h
        .market
        .create_intent(
            &h.employer,
            CreateIntent {
                stint_id: stint.id.clone(),
                application_id: application.id.clone(),
                amount: 5_000,
                currency: "KES".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
}

#[tokio::test]
async fn one_active_intent_per_pair() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;
    assert_eq!(intent.status, IntentStatus::Initiated);
    assert_eq!(intent.amount, 5_750);
    assert_eq!(intent.expires_at, intent.created_at + Duration::minutes(15));

    let err = h
        .market
        .create_intent(
            &h.employer,
            CreateIntent {
                stint_id: stint.id.clone(),
                application_id: application.id.clone(),
                amount: 5_750,
                currency: "KES".to_string(),
            },
        )
        .await
        .unwrap_err();
    match err {
        AppError::IntentAlreadyActive { intent_id } => assert_eq!(intent_id, intent.id),
        other => panic!("expected IntentAlreadyActive, got {:?}", other),
    }
}

#[tokio::test]
async fn happy_path_confirms_the_stint() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let loser = h.apply(&stint, &h.rival, None).await;
    let intent = h.start_payment(&application).await;

    let prompt = h
        .market
        .initiate_mpesa(&h.employer, &intent.id, PHONE)
        .await
        .unwrap();
    assert_eq!(prompt.intent.status, IntentStatus::Pending);
    assert_eq!(prompt.intent.method, Some(PaymentMethod::Mpesa));
    assert_eq!(prompt.countdown_secs, 120);

    // Still pending at the gateway: polling changes nothing.
    let polled = h.market.get_intent(&h.employer, &intent.id).await.unwrap();
    assert_eq!(polled.status, IntentStatus::Pending);
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::Open
    );

    h.gateway.succeed("QKX1234ABC");
    let polled = h.market.get_intent(&h.employer, &intent.id).await.unwrap();
    assert_eq!(polled.status, IntentStatus::Success);
    assert_eq!(polled.receipt_number.as_deref(), Some("QKX1234ABC"));

    let stint = h.market.get_stint(&stint.id).await.unwrap();
    assert_eq!(stint.status, StintStatus::Confirmed);
    assert_eq!(stint.accepted_professional_id.as_deref(), Some("pro-1"));
    assert!(stint.confirmed_at.is_some());
    assert_eq!(stint.fees.as_ref().map(|f| f.total_amount), Some(5_750));
    assert!(stint.assignment_is_consistent());

    assert_eq!(h.application(&application.id).await.status, ApplicationStatus::Accepted);
    assert_eq!(h.application(&loser.id).await.status, ApplicationStatus::Rejected);

    h.drain_notifications().await;
    assert!(h
        .notifier
        .kinds_for("pro-1")
        .contains(&NotificationKind::ApplicationAccepted));
    assert!(h
        .notifier
        .kinds_for("emp-1")
        .contains(&NotificationKind::PaymentReceived));
    assert!(h
        .notifier
        .kinds_for("pro-2")
        .contains(&NotificationKind::ApplicationRejected));
}

#[tokio::test]
async fn failed_payment_leaves_the_stint_open_for_a_retry() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;
    h.market
        .initiate_mpesa(&h.employer, &intent.id, PHONE)
        .await
        .unwrap();

    h.gateway.fail(FailureKind::InsufficientFunds);
    let failed = h.market.get_intent(&h.employer, &intent.id).await.unwrap();
    assert_eq!(failed.status, IntentStatus::Failed);
    assert_eq!(failed.failure_kind, Some(FailureKind::InsufficientFunds));

    let stint_now = h.market.get_stint(&stint.id).await.unwrap();
    assert_eq!(stint_now.status, StintStatus::Open);
    assert_eq!(stint_now.selected_application_id, None);
    assert_eq!(h.application(&application.id).await.status, ApplicationStatus::Pending);

    h.drain_notifications().await;
    assert!(h
        .notifier
        .kinds_for("emp-1")
        .contains(&NotificationKind::PaymentFailed));

    // No second accept needed before paying again.
    h.gateway.respond_with(None);
    let retry = h
        .market
        .create_intent(
            &h.employer,
            CreateIntent {
                stint_id: stint.id.clone(),
                application_id: application.id.clone(),
                amount: 5_750,
                currency: "KES".to_string(),
            },
        )
        .await
        .unwrap();
    assert_ne!(retry.id, intent.id);
    assert_eq!(retry.status, IntentStatus::Initiated);
}

#[tokio::test]
async fn invalid_phone_never_reaches_the_gateway() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;

    let err = h
        .market
        .initiate_mpesa(&h.employer, &intent.id, "0712")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidPhoneNumber(_)));
    assert_eq!(h.gateway.stk_pushes.load(Ordering::SeqCst), 0);
    assert_eq!(h.intent(&intent.id).await.status, IntentStatus::Initiated);
}

#[tokio::test]
async fn gateway_outage_is_retryable_and_keeps_the_intent() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;

    h.gateway.unavailable.store(true, Ordering::SeqCst);
    let err = h
        .market
        .initiate_mpesa(&h.employer, &intent.id, PHONE)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::GatewayUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(h.intent(&intent.id).await.status, IntentStatus::Initiated);

    h.gateway.unavailable.store(false, Ordering::SeqCst);
    let prompt = h
        .market
        .initiate_mpesa(&h.employer, &intent.id, PHONE)
        .await
        .unwrap();
    assert_eq!(prompt.intent.status, IntentStatus::Pending);
}

#[tokio::test]
async fn abandoned_intent_expires_and_late_success_is_refused() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;
    h.market
        .initiate_mpesa(&h.employer, &intent.id, PHONE)
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(16));
    let expired = h.market.get_intent(&h.employer, &intent.id).await.unwrap();
    assert_eq!(expired.status, IntentStatus::Expired);
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().selected_application_id,
        None
    );

    let err = h
        .market
        .record_success(&intent.id, Some("LATE123".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::IntentExpired { .. }));
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::Open
    );
}

#[tokio::test]
async fn success_after_the_prompt_countdown_still_confirms() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;
    let prompt = h
        .market
        .initiate_mpesa(&h.employer, &intent.id, PHONE)
        .await
        .unwrap();

    // The payer's prompt has run out, the intent has not.
    h.clock.advance(Duration::seconds(prompt.countdown_secs as i64 + 1));
    let polled = h.market.get_intent(&h.employer, &intent.id).await.unwrap();
    assert_eq!(polled.status, IntentStatus::Pending);
    assert!(polled.seconds_remaining(h.clock.now()) > 0);

    h.gateway.succeed("QLATE0121");
    let polled = h.market.get_intent(&h.employer, &intent.id).await.unwrap();
    assert_eq!(polled.status, IntentStatus::Success);
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::Confirmed
    );
}

#[tokio::test]
async fn success_before_any_gateway_handoff_is_refused() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;

    let err = h.market.record_success(&intent.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
    assert_eq!(h.intent(&intent.id).await.status, IntentStatus::Initiated);
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::Open
    );
}

#[tokio::test]
async fn sweeper_pass_expires_stale_intents() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;

    assert_eq!(h.market.expire_stale_intents().await.unwrap(), 0);
    h.clock.advance(Duration::minutes(15));
    assert_eq!(h.market.expire_stale_intents().await.unwrap(), 1);
    assert_eq!(h.intent(&intent.id).await.status, IntentStatus::Expired);
}

#[tokio::test]
async fn cancelled_intent_is_final() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;
    h.market
        .initiate_mpesa(&h.employer, &intent.id, PHONE)
        .await
        .unwrap();

    let cancelled = h.market.cancel_intent(&h.employer, &intent.id).await.unwrap();
    assert_eq!(cancelled.status, IntentStatus::Cancelled);
    let stint_now = h.market.get_stint(&stint.id).await.unwrap();
    assert_eq!(stint_now.status, StintStatus::Open);
    assert_eq!(stint_now.selected_application_id, None);

    let err = h.market.cancel_intent(&h.employer, &intent.id).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::IntentAlreadyTerminal {
            status: IntentStatus::Cancelled
        }
    ));

    let err = h.market.record_success(&intent.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::IntentAlreadyTerminal { .. }));
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::Open
    );
}

#[tokio::test]
async fn duplicate_callbacks_confirm_once() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;
    h.market
        .initiate_mpesa(&h.employer, &intent.id, PHONE)
        .await
        .unwrap();

    let checkout = checkout_id(&intent);
    for _ in 0..3 {
        h.market
            .handle_mpesa_callback(
                &checkout,
                0,
                "The service request is processed successfully.",
                Some("QKX1234ABC".to_string()),
            )
            .await
            .unwrap();
    }

    let stint = h.market.get_stint(&stint.id).await.unwrap();
    assert_eq!(stint.status, StintStatus::Confirmed);
    assert_eq!(h.intent(&intent.id).await.status, IntentStatus::Success);

    h.drain_notifications().await;
    let accepted = h
        .notifier
        .kinds_for("pro-1")
        .into_iter()
        .filter(|k| *k == NotificationKind::ApplicationAccepted)
        .count();
    assert_eq!(accepted, 1);
}

#[tokio::test]
async fn cancelled_pin_callback_fails_the_intent() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;
    h.market
        .initiate_mpesa(&h.employer, &intent.id, PHONE)
        .await
        .unwrap();

    h.market
        .handle_mpesa_callback(&checkout_id(&intent), 1032, "Request cancelled by user", None)
        .await
        .unwrap();
    let failed = h.intent(&intent.id).await;
    assert_eq!(failed.status, IntentStatus::Failed);
    assert_eq!(failed.failure_kind, Some(FailureKind::UserCancelledPin));

    // Unknown checkout ids are acknowledged and ignored.
    h.market
        .handle_mpesa_callback("ws_CO_unknown", 0, "ok", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn card_payment_resolves_through_the_webhook() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;

    let pending = h
        .market
        .initiate_card(&h.employer, &intent.id, None, "https://app.test/paid")
        .await
        .unwrap();
    assert_eq!(pending.method, Some(PaymentMethod::Card));
    assert!(pending.checkout_url.is_some());

    h.gateway.succeed("FLW-998877");
    let settled = h.market.handle_card_webhook(&intent.id).await.unwrap();
    assert_eq!(settled.status, IntentStatus::Success);
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::Confirmed
    );
}

#[tokio::test]
async fn resolver_returns_on_resolution_or_deadline() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;
    h.market
        .initiate_mpesa(&h.employer, &intent.id, PHONE)
        .await
        .unwrap();

    let resolver = PollingResolver::new(h.market.clone());
    let deadline = common::start_of_day();
    let still_pending = resolver.await_resolution(&intent.id, deadline).await.unwrap();
    assert_eq!(still_pending.status, IntentStatus::Pending);

    h.gateway.succeed("QKX1234ABC");
    let resolved = resolver
        .await_resolution(&intent.id, deadline + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(resolved.status, IntentStatus::Success);
}

#[tokio::test]
async fn reconcile_repairs_a_success_left_unconfirmed() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let mut intent = h.start_payment(&application).await;

    // Success written without the confirmation step, as after a crash.
    intent.succeed(Some("QKX1234ABC".to_string()), common::start_of_day()).unwrap();
    h.store.save_intent(&mut intent).await.unwrap();
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::Open
    );

    let report = h.market.reconcile_intent(&h.employer, &intent.id).await.unwrap();
    assert_eq!(report.stint.status, StintStatus::Confirmed);
    assert_eq!(h.application(&application.id).await.status, ApplicationStatus::Accepted);

    // Running it again changes nothing.
    let again = h.market.reconcile_intent(&h.employer, &intent.id).await.unwrap();
    assert_eq!(again.stint.version, report.stint.version);
}

#[tokio::test]
async fn only_parties_can_read_an_intent() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let intent = h.start_payment(&application).await;

    let err = h.market.get_intent(&h.rival, &intent.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    h.market.get_intent(&h.professional, &intent.id).await.unwrap();
}
