//! Accept, reconciliation and status-advance scenarios

use crate::test_utils::*;
use resq_dispatch::testing::{sample_offer, t0, wait_for, TestRig};
use resq_dispatch::{ApiError, DispatchError, DriverAction, RespondOutcome, VehicleSnapshot};
use resq_domain::{AssignmentStatus, Tracked};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn confirmed_id(s: &VehicleSnapshot) -> Option<i64> {
    s.assignment
        .as_ref()
        .filter(|a| a.assignment.is_confirmed())
        .and_then(|a| a.assignment.value().id)
}

/// Bring the rig to a confirmed assignment 42 with the vehicle at the depot.
async fn accept_and_confirm(
    rig: &TestRig,
    core: &resq_dispatch::VehicleCore,
    rx: &mut tokio::sync::watch::Receiver<VehicleSnapshot>,
) -> VehicleSnapshot {
    rig.positions.push_fix(DEPOT);
    rig.feed.push(sample_offer(12, "101", t0(), 30));
    wait_for(rx, |s| s.offer.is_some() && s.position.is_some()).await;

    rig.api.set_latest(Some(hospital_record(42, "Dispatched")));
    assert_eq!(core.respond(true).await.unwrap(), RespondOutcome::Accepted);
    wait_for(rx, |s| {
        confirmed_id(s) == Some(42) && s.route.as_ref().map_or(false, |r| !r.path.is_empty())
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn test_accept_confirmed_by_server_shows_assignment_and_route() {
    let rig = TestRig::new();
    let (core, mut rx) = start_core(&rig);

    let snap = accept_and_confirm(&rig, &core, &mut rx).await;

    let card = snap.assignment.as_ref().unwrap();
    assert!(matches!(card.assignment, Tracked::Confirmed(_)));
    assert_eq!(card.assignment.value().status, AssignmentStatus::Dispatched);
    assert!(snap.offer.is_none());
    assert!(snap.polling);

    let route = snap.route.unwrap();
    assert_eq!(route.destination, HOSPITAL);
    assert_eq!(route.origin, DEPOT);
    assert!(!route.degraded);
    assert!(route.bounds.contains(&DEPOT));
    assert!(route.bounds.contains(&HOSPITAL));

    let calls = rig.api.respond_calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].accepted);
}

#[tokio::test(start_paused = true)]
async fn test_accept_shows_optimistic_view_before_confirmation() {
    let rig = TestRig::new();
    rig.api.fail_fetch(Some(ApiError::Transport("offline".into())));
    let (core, mut rx) = start_core(&rig);

    rig.feed.push(sample_offer(12, "101", t0(), 30));
    wait_for(&mut rx, |s| s.offer.is_some()).await;
    core.respond(true).await.unwrap();

    let snap = core.snapshot();
    let card = snap.assignment.unwrap();
    assert!(matches!(card.assignment, Tracked::Optimistic(_)));
    assert_eq!(card.assignment.value().id, None);
    // Status actions wait for a server id
    assert!(snap.actions.is_empty());
    assert!(snap.polling);
}

#[tokio::test(start_paused = true)]
async fn test_accept_then_completed_poll_retracts_view() {
    let rig = TestRig::new();
    let (core, mut rx) = start_core(&rig);

    rig.feed.push(sample_offer(12, "101", t0(), 30));
    wait_for(&mut rx, |s| s.offer.is_some()).await;

    rig.api.set_latest(Some(hospital_record(42, "CompletedByDispatcher")));
    assert_eq!(core.respond(true).await.unwrap(), RespondOutcome::Accepted);

    let snap = wait_for(&mut rx, |s| s.assignment.is_none()).await;
    assert!(!snap.polling);
    assert!(snap.route.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_accept_then_cancelled_poll_retracts_view() {
    let rig = TestRig::new();
    let (core, mut rx) = start_core(&rig);

    accept_and_confirm(&rig, &core, &mut rx).await;
    rig.api.set_latest(Some(hospital_record(42, "Cancelled")));

    let snap = wait_for(&mut rx, |s| s.assignment.is_none()).await;
    assert!(!snap.polling);
    assert!(snap.route.is_none());
    assert_eq!(snap.state, resq_dispatch::VehicleState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_failed_accept_keeps_offer_and_creates_nothing() {
    let rig = TestRig::new();
    rig.api.fail_respond(Some(ApiError::Rejected("Offer expired".into())));
    let (core, mut rx) = start_core(&rig);

    rig.feed.push(sample_offer(12, "101", t0(), 30));
    wait_for(&mut rx, |s| s.offer.is_some()).await;

    assert!(matches!(
        core.respond(true).await,
        Err(DispatchError::Api(ApiError::Rejected(_)))
    ));
    let snap = core.snapshot();
    assert!(snap.offer.is_some());
    assert!(snap.assignment.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_second_respond_while_in_flight_is_refused() {
    let rig = TestRig::new();
    rig.api.set_respond_delay(Duration::from_secs(2));
    let (core, mut rx) = start_core(&rig);
    let core = Arc::new(core);

    rig.feed.push(sample_offer(12, "101", t0(), 30));
    wait_for(&mut rx, |s| s.offer.is_some()).await;

    let first = tokio::spawn({
        let core = core.clone();
        async move { core.respond(true).await }
    });
    wait_for(&mut rx, |s| !s.actions.contains(&DriverAction::Accept)).await;

    assert!(matches!(
        core.respond(false).await,
        Err(DispatchError::ResponseInFlight(_))
    ));
    assert_eq!(first.await.unwrap().unwrap(), RespondOutcome::Accepted);
    assert_eq!(rig.api.respond_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mark_arrived_leaves_only_completion() {
    let rig = TestRig::new();
    let (core, mut rx) = start_core(&rig);
    let snap = accept_and_confirm(&rig, &core, &mut rx).await;
    assert_eq!(snap.actions, vec![DriverAction::MarkArrived]);

    assert!(core.mark_arrived().await.unwrap());
    let snap = core.snapshot();
    assert_eq!(snap.actions, vec![DriverAction::MarkCompleted]);
    assert_eq!(
        snap.assignment.unwrap().assignment.value().status,
        AssignmentStatus::Arrived
    );
    assert_eq!(rig.api.status_calls(), vec![(42, AssignmentStatus::Arrived)]);

    // A later poll echoing the arrival keeps the same actions
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(core.snapshot().actions, vec![DriverAction::MarkCompleted]);
}

#[tokio::test(start_paused = true)]
async fn test_mark_completed_clears_destination_route_and_polling() {
    let rig = TestRig::new();
    let (core, mut rx) = start_core(&rig);
    accept_and_confirm(&rig, &core, &mut rx).await;

    assert!(core.mark_arrived().await.unwrap());
    assert!(core.mark_completed().await.unwrap());

    let snap = core.snapshot();
    assert!(snap.assignment.is_none());
    assert!(snap.route.is_none());
    assert!(!snap.polling);
    assert!(snap.actions.is_empty());

    let fetches = rig.api.fetch_count();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(rig.api.fetch_count(), fetches);
}

#[tokio::test(start_paused = true)]
async fn test_failed_status_update_leaves_assignment_unchanged() {
    let rig = TestRig::new();
    let (core, mut rx) = start_core(&rig);
    accept_and_confirm(&rig, &core, &mut rx).await;

    rig.api.fail_status(Some(ApiError::Transport("timeout".into())));
    assert!(!core.mark_arrived().await.unwrap());

    let snap = core.snapshot();
    assert_eq!(
        snap.assignment.unwrap().assignment.value().status,
        AssignmentStatus::Dispatched
    );
    assert_eq!(snap.actions, vec![DriverAction::MarkArrived]);
}

#[tokio::test(start_paused = true)]
async fn test_status_advance_without_assignment_is_refused() {
    let rig = TestRig::new();
    let (core, _rx) = start_core(&rig);

    assert!(matches!(
        core.mark_arrived().await,
        Err(DispatchError::NoAssignment)
    ));
    assert!(rig.api.status_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_assignment_discovered_already_arrived() {
    let rig = TestRig::new();
    rig.api.set_latest(Some(hospital_record(42, "Arrived at scene")));
    let (_core, mut rx) = start_core(&rig);

    let snap = wait_for(&mut rx, |s| confirmed_id(s) == Some(42)).await;
    assert_eq!(snap.actions, vec![DriverAction::MarkCompleted]);
    assert!(snap.polling);
}

#[tokio::test(start_paused = true)]
async fn test_polling_active_iff_assignment_view_exists() {
    let rig = TestRig::new();
    let (core, mut rx) = start_core(&rig);

    let violations = Arc::new(Mutex::new(Vec::new()));
    let watcher = tokio::spawn({
        let mut rx = core.subscribe();
        let violations = violations.clone();
        async move {
            while rx.changed().await.is_ok() {
                let snap = rx.borrow_and_update().clone();
                if snap.running && snap.polling != snap.assignment.is_some() {
                    violations.lock().unwrap().push(snap);
                }
            }
        }
    });

    accept_and_confirm(&rig, &core, &mut rx).await;
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(core.mark_arrived().await.unwrap());
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(core.mark_completed().await.unwrap());
    tokio::time::sleep(Duration::from_secs(25)).await;

    rig.feed.push(sample_offer(12, "102", t0() + chrono::Duration::seconds(75), 30));
    rig.api.set_latest(Some(hospital_record(43, "Dispatched")));
    wait_for(&mut rx, |s| s.offer.is_some()).await;
    core.respond(true).await.unwrap();
    wait_for(&mut rx, |s| confirmed_id(s) == Some(43)).await;
    rig.api.set_latest(Some(hospital_record(43, "Cancelled")));
    wait_for(&mut rx, |s| s.assignment.is_none()).await;

    core.shutdown().await;
    watcher.await.unwrap();
    let violations = violations.lock().unwrap();
    assert!(violations.is_empty(), "polling out of step: {:?}", violations);
}

#[tokio::test(start_paused = true)]
async fn test_new_offer_on_top_of_assignment_takes_route_priority() {
    let rig = TestRig::new();
    let (core, mut rx) = start_core(&rig);
    accept_and_confirm(&rig, &core, &mut rx).await;

    let mut offer = sample_offer(12, "102", t0() + chrono::Duration::seconds(5), 30);
    let elsewhere = resq_core::GeoPoint { lat: 9.70, lng: 80.05 };
    offer.request.location = elsewhere;
    rig.feed.push(offer);

    let snap = wait_for(&mut rx, |s| {
        s.route.as_ref().map_or(false, |r| r.destination == elsewhere)
    })
    .await;
    assert!(matches!(
        snap.state,
        resq_dispatch::VehicleState::AssignmentActive { offer_pending: true, .. }
    ));

    // Declining the new offer keeps the confirmed assignment of another request
    assert_eq!(core.respond(false).await.unwrap(), RespondOutcome::Declined);
    let snap = wait_for(&mut rx, |s| {
        s.route.as_ref().map_or(false, |r| r.destination == HOSPITAL)
    })
    .await;
    assert_eq!(confirmed_id(&snap), Some(42));
}
