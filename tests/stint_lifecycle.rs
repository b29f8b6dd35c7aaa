mod common;

use chrono::Duration;

use common::{shift_start, Harness, PHONE};
use stint_api::errors::AppError;
use stint_api::models::{
    application::ApplicationStatus,
    payment_intent::IntentStatus,
    payout::PayoutStatus,
    stint::{ClockTiming, GeoPoint, StintStatus},
};
use stint_api::services::stint_machine::StintQuery;

#[tokio::test]
async fn posting_validates_rate_and_role() {
    let h = Harness::new();
    let err = h
        .market
        .post_stint(&h.employer, Harness::new_stint(0.0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    let err = h
        .market
        .post_stint(&h.professional, Harness::new_stint(5_000.0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let stint = h.post_stint(5_000.0).await;
    assert_eq!(stint.status, StintStatus::Open);
    assert!(stint.assignment_is_consistent());
}

#[tokio::test]
async fn listing_filters_by_owner_and_status() {
    let h = Harness::new();
    h.post_stint(5_000.0).await;
    h.book(6_000.0).await;

    let open = h
        .market
        .list_stints(
            &h.professional,
            StintQuery {
                status: Some(StintStatus::Open),
                mine: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(open.len(), 1);

    let mine = h
        .market
        .list_stints(&h.employer, StintQuery { status: None, mine: true })
        .await
        .unwrap();
    assert_eq!(mine.len(), 2);
    let none = h
        .market
        .list_stints(&h.professional, StintQuery { status: None, mine: true })
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn clock_events_must_follow_the_state_machine() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;

    let err = h
        .market
        .clock_in(&h.professional, &stint.id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidStintTransition {
            from: StintStatus::Open,
            attempted: StintStatus::InProgress
        }
    ));

    let (booked, _, _) = h.book(5_000.0).await;
    let err = h
        .market
        .clock_out(&h.professional, &booked.id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidStintTransition {
            from: StintStatus::Confirmed,
            attempted: StintStatus::Completed
        }
    ));

    let err = h.market.clock_in(&h.rival, &booked.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn late_clock_in_is_recorded_not_refused() {
    let h = Harness::new();
    let (stint, _, _) = h.book(5_000.0).await;

    h.clock.set(shift_start() + Duration::minutes(40));
    let started = h
        .market
        .clock_in(
            &h.professional,
            &stint.id,
            Some(GeoPoint {
                lat: 512.0,
                lng: 36.8,
            }),
        )
        .await
        .unwrap();
    assert_eq!(started.status, StintStatus::InProgress);
    assert_eq!(started.clock_in_timing, Some(ClockTiming::Late));
    // An impossible fix counts as no fix.
    assert_eq!(started.clock_in_location, None);
}

#[tokio::test]
async fn clock_in_and_out_complete_the_shift() {
    let h = Harness::new();
    let (stint, _, _) = h.book(5_000.0).await;

    h.clock.set(shift_start() - Duration::minutes(5));
    let location = GeoPoint {
        lat: -1.2921,
        lng: 36.8219,
    };
    let started = h
        .market
        .clock_in(&h.professional, &stint.id, Some(location))
        .await
        .unwrap();
    assert_eq!(started.clock_in_timing, Some(ClockTiming::OnTime));
    assert_eq!(started.clock_in_location, Some(location));

    h.clock.advance(Duration::minutes(485));
    let done = h
        .market
        .clock_out(&h.professional, &stint.id, None)
        .await
        .unwrap();
    assert_eq!(done.status, StintStatus::Completed);
    assert_eq!(done.elapsed_minutes, Some(485));

    let payout = h.payout(&stint.id).await.expect("payout set aside at clock-out");
    assert_eq!(payout.status, PayoutStatus::Pending);
    assert_eq!(payout.net_amount, 4_750);
    assert_eq!(payout.platform_fee_amount, 250);
    assert_eq!(payout.destination.as_deref(), Some("254712345678"));
    assert_eq!(
        Some(payout.release_after),
        done.completed_at.map(|t| t + Duration::hours(24))
    );
}

#[tokio::test]
async fn cancelling_an_open_stint_stops_payment_and_releases_applicants() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let application = h.apply(&stint, &h.professional, None).await;
    let other = h.apply(&stint, &h.rival, None).await;
    let intent = h.start_payment(&application).await;
    h.market
        .initiate_mpesa(&h.employer, &intent.id, PHONE)
        .await
        .unwrap();

    let cancelled = h
        .market
        .cancel_stint(&h.employer, &stint.id, "Ward closed")
        .await
        .unwrap();
    assert_eq!(cancelled.status, StintStatus::Cancelled);
    assert_eq!(cancelled.refund_amount, None);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Ward closed"));

    assert_eq!(h.intent(&intent.id).await.status, IntentStatus::Cancelled);
    assert_eq!(h.application(&application.id).await.status, ApplicationStatus::Rejected);
    assert_eq!(h.application(&other.id).await.status, ApplicationStatus::Rejected);

    // A success arriving now cannot resurrect the stint.
    assert!(h.market.record_success(&intent.id, None).await.is_err());
    assert_eq!(
        h.market.get_stint(&stint.id).await.unwrap().status,
        StintStatus::Cancelled
    );
}

#[tokio::test]
async fn cancelling_a_confirmed_stint_records_the_refund() {
    let h = Harness::new();
    let (stint, application, _) = h.book(5_000.0).await;

    let err = h
        .market
        .cancel_stint(&h.professional, &stint.id, "no")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let cancelled = h
        .market
        .cancel_stint(&h.employer, &stint.id, "Patient discharged")
        .await
        .unwrap();
    assert_eq!(cancelled.refund_amount, Some(5_750));
    assert_eq!(cancelled.accepted_professional_id, None);
    assert!(cancelled.assignment_is_consistent());
    assert_eq!(h.application(&application.id).await.status, ApplicationStatus::Accepted);
}

#[tokio::test]
async fn no_cancellation_after_clock_in() {
    let h = Harness::new();
    let (stint, _, _) = h.book(5_000.0).await;
    h.clock.set(shift_start());
    h.market
        .clock_in(&h.professional, &stint.id, None)
        .await
        .unwrap();

    let err = h
        .market
        .cancel_stint(&h.employer, &stint.id, "too late")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidStintTransition {
            from: StintStatus::InProgress,
            attempted: StintStatus::Cancelled
        }
    ));
}

#[tokio::test]
async fn unpaid_hold_lapses_after_the_intent_window() {
    let h = Harness::new();
    let stint = h.post_stint(5_000.0).await;
    let first = h.apply(&stint, &h.professional, None).await;
    let second = h.apply(&stint, &h.rival, None).await;
    h.market.accept(&h.employer, &first.id).await.unwrap();

    assert!(matches!(
        h.market.accept(&h.employer, &second.id).await,
        Err(AppError::StintAlreadyAssigned { .. })
    ));

    h.clock.advance(Duration::minutes(16));
    let acceptance = h.market.accept(&h.employer, &second.id).await.unwrap();
    assert_eq!(acceptance.stint.selected_application_id.as_deref(), Some(second.id.as_str()));
    assert_eq!(h.application(&first.id).await.status, ApplicationStatus::Pending);
}
