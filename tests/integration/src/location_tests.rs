//! Position sampling, fallback retransmission and capability loss

use crate::test_utils::*;
use resq_dispatch::testing::{sample_offer, t0, wait_for, TestRig};
use resq_dispatch::PositionError;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_failed_fallback_retransmits_last_known_position() {
    let rig = TestRig::new();
    rig.positions.push_fix(DEPOT);
    let (_core, mut rx) = start_core(&rig);

    wait_for(&mut rx, |s| s.position.is_some()).await;
    rig.positions
        .fail_next_samples([PositionError::Timeout, PositionError::Unavailable("no sky".into())]);

    tokio::time::sleep(Duration::from_secs(19)).await;

    // Initial sample, the streamed fix, then two retransmissions at 9s and 18s
    let reports = rig.api.reports();
    assert_eq!(reports.len(), 4, "reports: {:?}", reports);
    assert!(reports
        .iter()
        .all(|r| r.latitude == DEPOT.lat && r.longitude == DEPOT.lng && r.vehicle_id == 12));
    assert_eq!(rig.positions.sample_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failed_fallback_without_fix_reports_nothing() {
    let rig = TestRig::new();
    let (core, _rx) = start_core(&rig);

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(rig.api.reports().is_empty());
    let snap = core.snapshot();
    assert!(snap.position.is_none());
    assert!(snap.location_enabled);
}

#[tokio::test(start_paused = true)]
async fn test_streamed_fixes_are_reported_and_kept() {
    let rig = TestRig::new();
    let (_core, mut rx) = start_core(&rig);
    // Let the initial one-shot sample miss
    tokio::time::sleep(Duration::from_millis(1)).await;

    let moved = resq_core::GeoPoint { lat: 9.6700, lng: 80.0200 };
    rig.positions.push_fix(DEPOT);
    wait_for(&mut rx, |s| s.position.map(|p| p.point) == Some(DEPOT)).await;
    rig.positions.push_fix(moved);
    wait_for(&mut rx, |s| s.position.map(|p| p.point) == Some(moved)).await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    let reports = rig.api.reports();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].latitude, moved.lat);
    assert!(reports.iter().all(|r| r.address.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn test_transient_stream_error_keeps_location_enabled() {
    let rig = TestRig::new();
    rig.positions.push_fix(DEPOT);
    let (core, mut rx) = start_core(&rig);
    wait_for(&mut rx, |s| s.position.is_some()).await;

    rig.positions.push_error(PositionError::Timeout);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let snap = core.snapshot();
    assert!(snap.location_enabled);
    assert_eq!(snap.position.map(|p| p.point), Some(DEPOT));
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_disables_location_and_route() {
    let rig = TestRig::new();
    rig.positions.deny(PositionError::PermissionDenied);
    let (core, mut rx) = start_core(&rig);

    wait_for(&mut rx, |s| !s.location_enabled).await;
    rig.feed.push(sample_offer(12, "101", t0(), 30));
    let snap = wait_for(&mut rx, |s| s.offer.is_some()).await;
    assert!(snap.route.is_none());
    assert!(snap.position.is_none());

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(rig.api.reports().is_empty());
    assert_eq!(rig.positions.sample_count(), 1);
    assert!(core.snapshot().route.is_none());
}
