//! Vehicle core driven by a real `graphql-transport-ws` offer feed

use crate::test_utils::*;
use resq_dispatch::testing::{t0, wait_for, TestRig};
use resq_dispatch::{CoreParts, VehicleCore, VehicleState};
use resq_gateway::GraphqlOfferFeed;
use serde_json::json;
use std::sync::Arc;

fn parts_with_feed(rig: &TestRig, feed: GraphqlOfferFeed) -> CoreParts {
    CoreParts {
        feed: Arc::new(feed),
        ..rig.parts()
    }
}

#[tokio::test]
async fn test_offer_pushed_over_websocket_reaches_snapshot() {
    init_test_logging();
    let server = LoopbackOfferServer::start().await;
    let rig = TestRig::new();
    let feed = GraphqlOfferFeed::new(server.url(), "test-token", 0).unwrap();
    let core = VehicleCore::start(parts_with_feed(&rig, feed)).unwrap();
    let mut rx = core.subscribe();

    server.push(offer_payload(101, "2025-03-01T08:00:00Z", 30));
    let snap = wait_for(&mut rx, |s| s.offer.is_some()).await;

    let view = snap.offer.unwrap();
    assert_eq!(snap.state, VehicleState::OfferPending);
    assert_eq!(view.offer.request.id.to_string(), "101");
    assert_eq!(view.offer.request.location, HOSPITAL);
    assert_eq!(view.offer.offered_at, t0());
    assert_eq!(view.offer.ttl_seconds, 30);
    assert_eq!(
        view.proof_image_url.as_deref(),
        Some("http://localhost:5000/uploads/proof.jpg")
    );
    assert_eq!(rig.alerts.count(), 1);

    let handshake = server.finish().await;
    assert_eq!(handshake["init"]["Authorization"], "Bearer test-token");
    assert_eq!(handshake["subscribe"]["id"], "offers-12");
    assert_eq!(handshake["subscribe"]["payload"]["variables"], json!({ "vehicleId": 12 }));

    core.shutdown().await;
}

#[tokio::test]
async fn test_cancellation_over_websocket_clears_offer() {
    init_test_logging();
    let server = LoopbackOfferServer::start().await;
    let rig = TestRig::new();
    let feed = GraphqlOfferFeed::new(server.url(), "test-token", 0).unwrap();
    let core = VehicleCore::start(parts_with_feed(&rig, feed)).unwrap();
    let mut rx = core.subscribe();

    let mut cancelled = offer_payload(101, "2025-03-01T08:00:00Z", 30);
    cancelled["data"]["onVehicleAssignmentOffered"]["isCancelled"] = json!(true);
    server.push(offer_payload(101, "2025-03-01T08:00:00Z", 30));
    wait_for(&mut rx, |s| s.offer.is_some()).await;
    server.push(cancelled);
    wait_for(&mut rx, |s| s.offer.is_none()).await;

    assert_eq!(rig.alerts.count(), 1);
    server.finish().await;
    core.shutdown().await;
}
