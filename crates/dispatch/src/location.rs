//! Location Publisher
//!
//! Takes one immediate sample on activation, then follows the device's
//! continuous position stream. A fallback re-sample runs on a fixed interval
//! independent of the stream; when that sample fails, the last known
//! position is retransmitted instead. Every sample is reported upstream as a
//! fire-and-forget call.
//!
//! Capability failures (no positioning support, permission denied) stop the
//! publisher for the rest of the session. The route overlay then never sees
//! a position and stays empty.

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use resq_core::GeoPoint;
use resq_domain::VehiclePosition;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::api::{DispatchApi, LocationReport};
use crate::handle::{self, SubscriptionHandle};
use crate::inbox::{CoreEvent, Inbox};
use crate::runtime::CoreContext;

/// Device positioning failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PositionError {
    /// The device has no positioning capability
    #[error("Positioning is not supported")]
    Unsupported,

    /// The user refused positioning access
    #[error("Positioning permission denied")]
    PermissionDenied,

    /// A fix could not be obtained right now
    #[error("Position unavailable: {0}")]
    Unavailable(String),

    /// No fix within the sampling deadline
    #[error("Position sample timed out")]
    Timeout,
}

impl PositionError {
    /// Whether the failure disables positioning for the session.
    pub fn is_capability(&self) -> bool {
        matches!(self, PositionError::Unsupported | PositionError::PermissionDenied)
    }
}

/// Continuous stream of position fixes
pub type PositionStream = BoxStream<'static, Result<GeoPoint, PositionError>>;

/// Device positioning collaborator
#[async_trait]
pub trait PositionSource: Send + Sync + 'static {
    /// One-shot fix.
    async fn sample(&self) -> Result<GeoPoint, PositionError>;

    /// Continuous fixes until the stream is dropped.
    async fn watch(&self) -> Result<PositionStream, PositionError>;
}

/// Owner of [`VehiclePosition`]
pub(crate) struct LocationPublisher {
    source: Arc<dyn PositionSource>,
    position: Option<VehiclePosition>,
    enabled: bool,
    watch: Option<SubscriptionHandle>,
    fallback: Option<SubscriptionHandle>,
}

impl LocationPublisher {
    pub(crate) fn new(source: Arc<dyn PositionSource>) -> Self {
        Self {
            source,
            position: None,
            enabled: true,
            watch: None,
            fallback: None,
        }
    }

    pub(crate) fn position(&self) -> Option<VehiclePosition> {
        self.position
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Open the watch stream and the fallback interval.
    pub(crate) fn activate(&mut self, ctx: &CoreContext) {
        let source = self.source.clone();
        let inbox = ctx.inbox.clone();
        handle::replace(
            &mut self.watch,
            SubscriptionHandle::spawn("location-watch", watch_positions(source, inbox)),
        );

        let source = self.source.clone();
        let inbox = ctx.inbox.clone();
        let period = ctx.config.timing.location_fallback();
        handle::replace(
            &mut self.fallback,
            SubscriptionHandle::spawn("location-fallback", async move {
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let result = source.sample().await;
                    if !inbox.post(CoreEvent::FallbackSampled(result)) {
                        break;
                    }
                }
            }),
        );
    }

    pub(crate) fn deactivate(&mut self) {
        handle::clear(&mut self.watch);
        handle::clear(&mut self.fallback);
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.watch.is_some() || self.fallback.is_some()
    }

    /// Apply a fresh fix. Returns `true` when the position changed.
    pub(crate) fn on_sample(&mut self, point: GeoPoint, ctx: &mut CoreContext) -> bool {
        if !self.enabled {
            return false;
        }
        let changed = self.position.map(|p| p.point) != Some(point);
        self.position = Some(VehiclePosition::new(point, ctx.clock.now()));
        transmit(ctx, point);
        changed
    }

    /// Handle a failed fix from the stream or the one-shot sample.
    pub(crate) fn on_failure(&mut self, err: PositionError) -> bool {
        if err.is_capability() {
            return self.disable(&err);
        }
        debug!(error = %err, "Position sample failed");
        false
    }

    /// Fallback tick result. A failed sample retransmits the last known fix.
    pub(crate) fn on_fallback(
        &mut self,
        result: Result<GeoPoint, PositionError>,
        ctx: &mut CoreContext,
    ) -> bool {
        match result {
            Ok(point) => self.on_sample(point, ctx),
            Err(err) if err.is_capability() => self.disable(&err),
            Err(err) => {
                if let Some(last) = self.position.filter(|_| self.enabled) {
                    debug!(error = %err, "Fallback sample failed, retransmitting last known position");
                    transmit(ctx, last.point);
                } else {
                    debug!(error = %err, "Fallback sample failed with no known position");
                }
                false
            }
        }
    }

    fn disable(&mut self, err: &PositionError) -> bool {
        if !self.enabled {
            return false;
        }
        warn!(error = %err, "Positioning unavailable, location publishing disabled");
        self.enabled = false;
        self.deactivate();
        true
    }
}

async fn watch_positions(source: Arc<dyn PositionSource>, inbox: Inbox) {
    let first = source.sample().await;
    let posted = match first {
        Ok(point) => inbox.post(CoreEvent::PositionSampled(point)),
        Err(e) => {
            let capability = e.is_capability();
            let posted = inbox.post(CoreEvent::PositionFailed(e));
            if capability {
                return;
            }
            posted
        }
    };
    if !posted {
        return;
    }

    let mut stream = match source.watch().await {
        Ok(stream) => stream,
        Err(e) => {
            inbox.post(CoreEvent::PositionFailed(e));
            return;
        }
    };
    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(point) => CoreEvent::PositionSampled(point),
            Err(e) => CoreEvent::PositionFailed(e),
        };
        if !inbox.post(event) {
            return;
        }
    }
    debug!("Position stream ended");
}

/// Best-effort report; failures are logged and dropped.
fn transmit(ctx: &mut CoreContext, point: GeoPoint) {
    let api: Arc<dyn DispatchApi> = ctx.api.clone();
    let report = LocationReport {
        vehicle_id: ctx.session.vehicle_id,
        latitude: point.lat,
        longitude: point.lng,
        address: String::new(),
    };
    ctx.tasks.spawn(async move {
        let vehicle_id = report.vehicle_id;
        match api.report_location(report).await {
            Ok(ack) if ack.success => {}
            Ok(ack) => error!(vehicle_id, message = %ack.message, "Location report rejected"),
            Err(e) => error!(vehicle_id, error = %e, "Location report failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDispatchApi, ScriptedPositions};

    const DEPOT: GeoPoint = GeoPoint { lat: 9.68, lng: 80.01 };

    fn publisher() -> (LocationPublisher, Arc<ScriptedPositions>) {
        let positions = Arc::new(ScriptedPositions::default());
        (LocationPublisher::new(positions.clone()), positions)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_updates_position_and_reports() {
        let api = Arc::new(MockDispatchApi::new());
        let (mut ctx, _rx) = CoreContext::for_test_with_api(12, api.clone());
        let (mut publisher, _) = publisher();

        assert!(publisher.on_sample(DEPOT, &mut ctx));
        ctx.drain().await;

        assert_eq!(publisher.position().map(|p| p.point), Some(DEPOT));
        let reports = api.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].vehicle_id, 12);
        assert_eq!(reports[0].latitude, DEPOT.lat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fallback_retransmits_last_known() {
        let api = Arc::new(MockDispatchApi::new());
        let (mut ctx, _rx) = CoreContext::for_test_with_api(12, api.clone());
        let (mut publisher, _) = publisher();

        publisher.on_sample(DEPOT, &mut ctx);
        publisher.on_fallback(Err(PositionError::Timeout), &mut ctx);
        publisher.on_fallback(Err(PositionError::Unavailable("no signal".into())), &mut ctx);
        ctx.drain().await;

        let reports = api.reports();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.latitude == DEPOT.lat && r.longitude == DEPOT.lng));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fallback_without_position_sends_nothing() {
        let api = Arc::new(MockDispatchApi::new());
        let (mut ctx, _rx) = CoreContext::for_test_with_api(12, api.clone());
        let (mut publisher, _) = publisher();

        publisher.on_fallback(Err(PositionError::Timeout), &mut ctx);
        ctx.drain().await;
        assert!(api.reports().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_failure_is_absorbed() {
        let api = Arc::new(MockDispatchApi::new());
        api.fail_reports(Some(crate::api::ApiError::Transport("offline".into())));
        let (mut ctx, _rx) = CoreContext::for_test_with_api(12, api.clone());
        let (mut publisher, _) = publisher();

        publisher.on_sample(DEPOT, &mut ctx);
        ctx.drain().await;
        assert_eq!(publisher.position().map(|p| p.point), Some(DEPOT));
        assert_eq!(api.reports().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_disables_publisher() {
        let (ctx, mut rx) = CoreContext::for_test(12);
        let (mut publisher, positions) = publisher();
        positions.deny(PositionError::PermissionDenied);

        publisher.activate(&ctx);
        assert!(publisher.is_streaming());

        match rx.recv().await {
            Some(CoreEvent::PositionFailed(err)) => assert!(publisher.on_failure(err)),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!publisher.is_enabled());
        assert!(!publisher.is_streaming());
        // A second capability failure is not reported again
        assert!(!publisher.on_failure(PositionError::PermissionDenied));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_stream_feeds_inbox() {
        let (ctx, mut rx) = CoreContext::for_test(12);
        let (mut publisher, positions) = publisher();
        positions.push_fix(DEPOT);

        publisher.activate(&ctx);
        // Initial one-shot sample, then the buffered stream fix
        for _ in 0..2 {
            match rx.recv().await {
                Some(CoreEvent::PositionSampled(p)) => assert_eq!(p, DEPOT),
                other => panic!("unexpected event {:?}", other),
            }
        }
        publisher.deactivate();
        assert!(!publisher.is_streaming());
    }
}
