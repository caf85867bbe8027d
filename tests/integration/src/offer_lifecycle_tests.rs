//! Offer lifetime, countdown and alert scenarios

use crate::test_utils::*;
use chrono::Duration as ChronoDuration;
use proptest::prelude::*;
use resq_dispatch::testing::{sample_offer, t0, wait_for, TestRig};
use resq_dispatch::{DriverAction, RespondOutcome, VehicleState};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_unanswered_offer_cleared_at_deadline_without_server_call() {
    let rig = TestRig::new();
    let (_core, mut rx) = start_core(&rig);
    let start = Instant::now();

    rig.feed.push(sample_offer(12, "101", t0(), 5));
    let snap = wait_for(&mut rx, |s| s.offer.is_some()).await;
    assert_eq!(snap.state, VehicleState::OfferPending);
    assert_eq!(snap.actions, vec![DriverAction::Accept, DriverAction::Decline]);

    let snap = wait_for(&mut rx, |s| s.offer.is_none()).await;
    let elapsed = start.elapsed();
    assert!(elapsed <= Duration::from_secs(5), "cleared late: {:?}", elapsed);
    assert!(elapsed >= Duration::from_millis(4750), "cleared early: {:?}", elapsed);
    assert_eq!(snap.state, VehicleState::Idle);
    assert!(rig.api.respond_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_countdown_projects_remaining_lifetime() {
    let rig = TestRig::new();
    let (_core, mut rx) = start_core(&rig);

    rig.feed.push(sample_offer(12, "101", t0(), 20));
    let snap = wait_for(&mut rx, |s| s.offer.is_some()).await;
    let view = snap.offer.unwrap();
    assert_eq!(view.countdown.seconds_left, 20);
    assert_eq!(view.ends_at, t0() + ChronoDuration::seconds(20));

    let snap = wait_for(&mut rx, |s| {
        s.offer.as_ref().map_or(false, |o| o.countdown.seconds_left == 10)
    })
    .await;
    let percent = snap.offer.unwrap().countdown.percent_left;
    assert!((percent - 50.0).abs() < f32::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn test_missing_ttl_uses_default_lifetime() {
    let rig = TestRig::new();
    let (_core, mut rx) = start_core(&rig);
    let start = Instant::now();

    rig.feed.push(sample_offer(12, "101", t0(), 0));
    let snap = wait_for(&mut rx, |s| s.offer.is_some()).await;
    assert_eq!(snap.offer.unwrap().countdown.seconds_left, 15);

    wait_for(&mut rx, |s| s.offer.is_none()).await;
    assert!(start.elapsed() <= Duration::from_secs(15));
    assert!(start.elapsed() > Duration::from_secs(14));
}

#[tokio::test(start_paused = true)]
async fn test_reoffer_resets_countdown_and_alerts_again() {
    let rig = TestRig::new();
    let (_core, mut rx) = start_core(&rig);
    let start = Instant::now();

    rig.feed.push(sample_offer(12, "101", t0(), 10));
    wait_for(&mut rx, |s| s.offer.is_some()).await;
    assert_eq!(rig.alerts.count(), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let again = t0() + ChronoDuration::seconds(6);
    rig.feed.push(sample_offer(12, "101", again, 10));
    let snap = wait_for(&mut rx, |s| {
        s.offer.as_ref().map_or(false, |o| o.offer.offered_at == again)
    })
    .await;
    assert_eq!(snap.offer.unwrap().countdown.seconds_left, 10);
    assert_eq!(rig.alerts.count(), 2);

    // The first offer's deadline passes without clearing the second
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(rx.borrow().offer.is_some());

    wait_for(&mut rx, |s| s.offer.is_none()).await;
    assert!(start.elapsed() <= Duration::from_secs(16));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_notification_does_not_alert_twice() {
    let rig = TestRig::new();
    let (_core, mut rx) = start_core(&rig);

    rig.feed.push(sample_offer(12, "101", t0(), 30));
    rig.feed.push(sample_offer(12, "101", t0(), 30));
    wait_for(&mut rx, |s| s.offer.is_some()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(rig.alerts.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_offer_for_other_vehicle_ignored() {
    let rig = TestRig::new();
    let (core, _rx) = start_core(&rig);

    rig.feed.push(sample_offer(99, "101", t0(), 30));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(core.snapshot().offer.is_none());
    assert_eq!(rig.alerts.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_offer_clears_without_alert() {
    let rig = TestRig::new();
    let (_core, mut rx) = start_core(&rig);

    rig.feed.push(sample_offer(12, "101", t0(), 30));
    wait_for(&mut rx, |s| s.offer.is_some()).await;

    let mut cancelled = sample_offer(12, "101", t0() + ChronoDuration::seconds(2), 30);
    cancelled.is_cancelled = true;
    rig.feed.push(cancelled);

    wait_for(&mut rx, |s| s.offer.is_none()).await;
    assert_eq!(rig.alerts.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_decline_clears_offer_and_creates_nothing() {
    let rig = TestRig::new();
    let (core, mut rx) = start_core(&rig);

    rig.feed.push(sample_offer(12, "101", t0(), 30));
    wait_for(&mut rx, |s| s.offer.is_some()).await;

    assert_eq!(core.respond(false).await.unwrap(), RespondOutcome::Declined);
    let snap = core.snapshot();
    assert!(snap.offer.is_none());
    assert!(snap.assignment.is_none());
    assert!(!snap.polling);

    let calls = rig.api.respond_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].request_id, 101);
    assert_eq!(calls[0].vehicle_id, 12);
    assert!(!calls[0].accepted);
}

#[tokio::test(start_paused = true)]
async fn test_respond_without_offer_is_ignored() {
    let rig = TestRig::new();
    let (core, _rx) = start_core(&rig);

    assert_eq!(core.respond(true).await.unwrap(), RespondOutcome::Ignored);
    assert!(rig.api.respond_calls().is_empty());
}

fn offer_clear_time(ttl: u32) -> Duration {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("test runtime");
    runtime.block_on(async move {
        let rig = TestRig::new();
        let (_core, mut rx) = start_core(&rig);
        let start = Instant::now();
        rig.feed.push(sample_offer(12, "101", t0(), ttl));
        wait_for(&mut rx, |s| s.offer.is_some()).await;
        wait_for(&mut rx, |s| s.offer.is_none()).await;
        start.elapsed()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_offer_never_outlives_its_deadline(ttl in 1u32..90) {
        let elapsed = offer_clear_time(ttl);
        prop_assert!(elapsed <= Duration::from_secs(u64::from(ttl)));
        prop_assert!(elapsed + Duration::from_millis(250) >= Duration::from_secs(u64::from(ttl)));
    }
}
