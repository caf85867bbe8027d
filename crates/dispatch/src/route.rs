//! Route Overlay
//!
//! A function of (position, destination, active). While active with both
//! endpoints known it keeps a route from the vehicle to the destination and
//! a bounding box around both; otherwise it holds nothing. A routing failure
//! degrades to the two endpoints, never to an empty view.

use async_trait::async_trait;
use resq_core::{Bounds, GeoPoint};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::handle::{self, SubscriptionHandle};
use crate::inbox::CoreEvent;
use crate::runtime::CoreContext;

/// Routing provider failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    /// Provider could not be reached
    #[error("Routing provider unavailable: {0}")]
    Unavailable(String),

    /// Provider found no route between the points
    #[error("No route found")]
    NoRoute,

    /// Provider answered with something unusable
    #[error("Invalid routing response: {0}")]
    InvalidResponse(String),
}

/// Computed path between two points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePath {
    /// Polyline from origin to destination
    pub points: Vec<GeoPoint>,
    /// Path length in meters
    pub distance_m: f64,
    /// Expected travel time in seconds, when the provider knows it
    pub duration_s: Option<f64>,
}

/// Route computation collaborator
#[async_trait]
pub trait RouteProvider: Send + Sync + 'static {
    /// Route from `from` to `to`.
    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<RoutePath, RouteError>;
}

/// Direct line between the endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct StraightLineProvider;

#[async_trait]
impl RouteProvider for StraightLineProvider {
    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<RoutePath, RouteError> {
        Ok(RoutePath {
            points: vec![from, to],
            distance_m: from.haversine_distance(&to),
            duration_s: None,
        })
    }
}

/// Published route state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteView {
    /// Vehicle position the route was computed from
    pub origin: GeoPoint,
    /// Active destination
    pub destination: GeoPoint,
    /// Polyline; empty while the first computation is pending
    pub path: Vec<GeoPoint>,
    /// Path length in meters, once known
    pub distance_m: Option<f64>,
    /// Travel time in seconds, once known
    pub duration_s: Option<f64>,
    /// The provider failed and only the endpoints are shown
    pub degraded: bool,
    /// Box containing both endpoints and the whole path
    pub bounds: Bounds,
}

impl RouteView {
    fn pending(origin: GeoPoint, destination: GeoPoint) -> Self {
        Self {
            origin,
            destination,
            path: Vec::new(),
            distance_m: None,
            duration_s: None,
            degraded: false,
            bounds: endpoint_bounds(origin, destination),
        }
    }

    fn computed(origin: GeoPoint, destination: GeoPoint, path: RoutePath) -> Self {
        let mut bounds = endpoint_bounds(origin, destination);
        for p in &path.points {
            bounds.extend(p);
        }
        Self {
            origin,
            destination,
            path: path.points,
            distance_m: Some(path.distance_m),
            duration_s: path.duration_s,
            degraded: false,
            bounds,
        }
    }

    fn degraded(origin: GeoPoint, destination: GeoPoint) -> Self {
        Self {
            origin,
            destination,
            path: vec![origin, destination],
            distance_m: Some(origin.haversine_distance(&destination)),
            duration_s: None,
            degraded: true,
            bounds: endpoint_bounds(origin, destination),
        }
    }
}

fn endpoint_bounds(a: GeoPoint, b: GeoPoint) -> Bounds {
    let mut bounds = Bounds {
        south_west: a,
        north_east: a,
    };
    bounds.extend(&b);
    bounds
}

/// Owner of the route view
pub(crate) struct RouteOverlay {
    provider: Arc<dyn RouteProvider>,
    drift_threshold_m: f64,
    view: Option<RouteView>,
    /// Endpoints of the most recent computation request
    target: Option<(GeoPoint, GeoPoint)>,
    generation: u64,
    compute: Option<SubscriptionHandle>,
}

impl RouteOverlay {
    pub(crate) fn new(provider: Arc<dyn RouteProvider>, drift_threshold_m: f64) -> Self {
        Self {
            provider,
            drift_threshold_m,
            view: None,
            target: None,
            generation: 0,
            compute: None,
        }
    }

    pub(crate) fn view(&self) -> Option<&RouteView> {
        self.view.as_ref()
    }

    /// Re-evaluate for the current inputs. Returns `true` when the view changed.
    pub(crate) fn update(
        &mut self,
        position: Option<GeoPoint>,
        destination: Option<GeoPoint>,
        active: bool,
        ctx: &CoreContext,
    ) -> bool {
        let (origin, destination) = match (active, position, destination) {
            (true, Some(p), Some(d)) => (p, d),
            _ => return self.clear(),
        };

        let recompute = match self.target {
            None => true,
            Some((last_origin, last_destination)) => {
                last_destination != destination
                    || origin.haversine_distance(&last_origin) > self.drift_threshold_m
            }
        };
        if !recompute {
            return false;
        }

        self.generation += 1;
        let generation = self.generation;
        self.target = Some((origin, destination));

        let destination_changed = self
            .view
            .as_ref()
            .map_or(true, |v| v.destination != destination);
        if destination_changed {
            self.view = Some(RouteView::pending(origin, destination));
        }

        debug!(generation, ?origin, ?destination, "Computing route");
        let provider = self.provider.clone();
        let inbox = ctx.inbox.clone();
        handle::replace(
            &mut self.compute,
            SubscriptionHandle::spawn("route-compute", async move {
                let result = provider.route(origin, destination).await;
                inbox.post(CoreEvent::RouteComputed { generation, result });
            }),
        );
        destination_changed
    }

    /// A computation finished. Results for superseded requests are dropped.
    pub(crate) fn on_computed(
        &mut self,
        generation: u64,
        result: Result<RoutePath, RouteError>,
    ) -> bool {
        if generation != self.generation {
            return false;
        }
        let (origin, destination) = match self.target {
            Some(t) => t,
            None => return false,
        };
        self.compute = None;
        let view = match result {
            Ok(path) if !path.points.is_empty() => RouteView::computed(origin, destination, path),
            Ok(_) => {
                warn!("Routing provider returned an empty path, showing endpoints only");
                RouteView::degraded(origin, destination)
            }
            Err(e) => {
                warn!(error = %e, "Route computation failed, showing endpoints only");
                RouteView::degraded(origin, destination)
            }
        };
        self.view = Some(view);
        true
    }

    pub(crate) fn clear(&mut self) -> bool {
        handle::clear(&mut self.compute);
        self.target = None;
        self.generation += 1;
        self.view.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::CoreContext;

    const HOSPITAL: GeoPoint = GeoPoint { lat: 9.6615, lng: 80.0255 };
    const DEPOT: GeoPoint = GeoPoint { lat: 9.6800, lng: 80.0100 };

    struct FailingProvider;

    #[async_trait]
    impl RouteProvider for FailingProvider {
        async fn route(&self, _: GeoPoint, _: GeoPoint) -> Result<RoutePath, RouteError> {
            Err(RouteError::Unavailable("offline".into()))
        }
    }

    async fn settle(
        overlay: &mut RouteOverlay,
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<CoreEvent>,
    ) {
        match rx.recv().await {
            Some(CoreEvent::RouteComputed { generation, result }) => {
                overlay.on_computed(generation, result);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_route_bounds_contain_both_points() {
        let (ctx, mut rx) = CoreContext::for_test(12);
        let mut overlay = RouteOverlay::new(Arc::new(StraightLineProvider), 25.0);

        assert!(overlay.update(Some(DEPOT), Some(HOSPITAL), true, &ctx));
        settle(&mut overlay, &mut rx).await;

        let view = overlay.view().unwrap();
        assert!(!view.degraded);
        assert_eq!(view.path, vec![DEPOT, HOSPITAL]);
        assert!(view.bounds.contains(&DEPOT));
        assert!(view.bounds.contains(&HOSPITAL));
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_to_endpoints() {
        let (ctx, mut rx) = CoreContext::for_test(12);
        let mut overlay = RouteOverlay::new(Arc::new(FailingProvider), 25.0);

        overlay.update(Some(DEPOT), Some(HOSPITAL), true, &ctx);
        settle(&mut overlay, &mut rx).await;

        let view = overlay.view().unwrap();
        assert!(view.degraded);
        assert!(view.bounds.contains(&DEPOT));
        assert!(view.bounds.contains(&HOSPITAL));
    }

    #[tokio::test]
    async fn test_inactive_or_missing_endpoint_clears() {
        let (ctx, mut rx) = CoreContext::for_test(12);
        let mut overlay = RouteOverlay::new(Arc::new(StraightLineProvider), 25.0);
        overlay.update(Some(DEPOT), Some(HOSPITAL), true, &ctx);
        settle(&mut overlay, &mut rx).await;

        assert!(overlay.update(None, Some(HOSPITAL), true, &ctx));
        assert!(overlay.view().is_none());

        overlay.update(Some(DEPOT), Some(HOSPITAL), true, &ctx);
        assert!(overlay.update(Some(DEPOT), Some(HOSPITAL), false, &ctx));
        assert!(overlay.view().is_none());
    }

    #[tokio::test]
    async fn test_small_drift_does_not_recompute() {
        let (ctx, mut rx) = CoreContext::for_test(12);
        let mut overlay = RouteOverlay::new(Arc::new(StraightLineProvider), 25.0);
        overlay.update(Some(DEPOT), Some(HOSPITAL), true, &ctx);
        settle(&mut overlay, &mut rx).await;
        let generation = overlay.generation;

        // ~1 m north
        let nudged = GeoPoint { lat: DEPOT.lat + 0.00001, lng: DEPOT.lng };
        overlay.update(Some(nudged), Some(HOSPITAL), true, &ctx);
        assert_eq!(overlay.generation, generation);

        // ~110 m north
        let moved = GeoPoint { lat: DEPOT.lat + 0.001, lng: DEPOT.lng };
        overlay.update(Some(moved), Some(HOSPITAL), true, &ctx);
        assert_eq!(overlay.generation, generation + 1);
    }

    #[tokio::test]
    async fn test_superseded_result_dropped() {
        let (ctx, _rx) = CoreContext::for_test(12);
        let mut overlay = RouteOverlay::new(Arc::new(StraightLineProvider), 25.0);
        overlay.update(Some(DEPOT), Some(HOSPITAL), true, &ctx);
        let stale = overlay.generation;
        overlay.update(Some(DEPOT), Some(GeoPoint { lat: 9.7, lng: 80.1 }), true, &ctx);

        let path = RoutePath {
            points: vec![DEPOT, HOSPITAL],
            distance_m: 1.0,
            duration_s: None,
        };
        assert!(!overlay.on_computed(stale, Ok(path)));
        assert!(overlay.view().unwrap().path.is_empty());
    }
}
