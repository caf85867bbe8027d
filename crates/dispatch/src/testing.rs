//! In-memory collaborators for tests
//!
//! Enabled for this crate's unit tests and, through the `testing` feature,
//! for downstream test crates.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::{self, StreamExt};
use resq_core::{Clock, Config, GeoPoint, TokioClock};
use resq_domain::{
    AssignmentRecord, AssignmentStatus, Offer, OfferKey, RecordRequest, RequestId,
    RequestSnapshot, Requester, Session, VehicleId,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::api::{Ack, ApiError, DispatchApi, LocationReport, OfferFeed, OfferStream, RespondCommand};
use crate::location::{PositionError, PositionSource, PositionStream};
use crate::offer::AlertSink;
use crate::route::{RouteProvider, StraightLineProvider};
use crate::runtime::{CoreParts, VehicleSnapshot};
use crate::session::MemorySessionStore;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Fixed reference instant used by the fixtures
pub fn t0() -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0) {
        chrono::LocalResult::Single(t) => t,
        _ => Utc::now(),
    }
}

/// Session for `vehicle_id`
pub fn sample_session(vehicle_id: VehicleId) -> Session {
    Session {
        vehicle_id,
        code: format!("RV-{vehicle_id}"),
        plate_number: "NP-4521".to_string(),
        category: Some("Ambulance".to_string()),
        token: "test-token".to_string(),
    }
}

/// Offer for `request_id` located at the Jaffna teaching hospital
pub fn sample_offer(
    vehicle_id: VehicleId,
    request_id: &str,
    offered_at: DateTime<Utc>,
    ttl_seconds: u32,
) -> Offer {
    Offer {
        vehicle_id,
        request: RequestSnapshot {
            id: RequestId(request_id.to_string()),
            address: Some("Hospital Rd, Jaffna".to_string()),
            created_at: None,
            description: Some("Road traffic accident".to_string()),
            location: GeoPoint { lat: 9.6615, lng: 80.0255 },
            proof_image_url: None,
            category: Some("Trauma".to_string()),
            requester: Some(Requester {
                name: Some("S. Tharshan".to_string()),
                phone: Some("+94770000000".to_string()),
            }),
        },
        offered_at,
        ttl_seconds,
        is_cancelled: false,
    }
}

/// Assignment record as the server would return it
pub fn sample_record(
    id: i64,
    request_id: &str,
    status: &str,
    location: Option<GeoPoint>,
) -> AssignmentRecord {
    AssignmentRecord {
        id,
        request: RecordRequest {
            id: RequestId(request_id.to_string()),
            status: status.to_string(),
            location,
            address: Some("Hospital Rd, Jaffna".to_string()),
            description: Some("Road traffic accident".to_string()),
            proof_image_url: None,
            category: Some("Trauma".to_string()),
            requester: None,
        },
    }
}

#[derive(Default)]
struct MockState {
    responds: Vec<RespondCommand>,
    status_updates: Vec<(i64, AssignmentStatus)>,
    reports: Vec<LocationReport>,
    latest: Option<AssignmentRecord>,
    fetches: usize,
    respond_error: Option<ApiError>,
    status_error: Option<ApiError>,
    fetch_error: Option<ApiError>,
    report_error: Option<ApiError>,
    respond_delay: Duration,
}

/// Dispatch server double that records every call
#[derive(Default)]
pub struct MockDispatchApi {
    state: Mutex<MockState>,
}

impl MockDispatchApi {
    /// Server with no assignment and every call succeeding
    pub fn new() -> Self {
        Self::default()
    }

    /// Record returned by the assignment query from now on.
    pub fn set_latest(&self, record: Option<AssignmentRecord>) {
        lock(&self.state).latest = record;
    }

    /// Make the respond command fail (or succeed again with `None`).
    pub fn fail_respond(&self, err: Option<ApiError>) {
        lock(&self.state).respond_error = err;
    }

    /// Make status updates fail (or succeed again with `None`).
    pub fn fail_status(&self, err: Option<ApiError>) {
        lock(&self.state).status_error = err;
    }

    /// Make the assignment query fail (or succeed again with `None`).
    pub fn fail_fetch(&self, err: Option<ApiError>) {
        lock(&self.state).fetch_error = err;
    }

    /// Make location reports fail (or succeed again with `None`).
    pub fn fail_reports(&self, err: Option<ApiError>) {
        lock(&self.state).report_error = err;
    }

    /// Delay before the respond command answers
    pub fn set_respond_delay(&self, delay: Duration) {
        lock(&self.state).respond_delay = delay;
    }

    /// Respond commands received so far
    pub fn respond_calls(&self) -> Vec<RespondCommand> {
        lock(&self.state).responds.clone()
    }

    /// Status updates received so far
    pub fn status_calls(&self) -> Vec<(i64, AssignmentStatus)> {
        lock(&self.state).status_updates.clone()
    }

    /// Location reports received so far
    pub fn reports(&self) -> Vec<LocationReport> {
        lock(&self.state).reports.clone()
    }

    /// Number of assignment queries served
    pub fn fetch_count(&self) -> usize {
        lock(&self.state).fetches
    }
}

#[async_trait]
impl DispatchApi for MockDispatchApi {
    async fn respond_to_offer(&self, command: RespondCommand) -> Result<Ack, ApiError> {
        let (delay, error) = {
            let mut state = lock(&self.state);
            state.responds.push(command);
            (state.respond_delay, state.respond_error.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match error {
            Some(e) => Err(e),
            None => Ok(Ack {
                success: true,
                message: "ok".to_string(),
            }),
        }
    }

    async fn latest_assignment(
        &self,
        _vehicle_id: VehicleId,
    ) -> Result<Option<AssignmentRecord>, ApiError> {
        let mut state = lock(&self.state);
        state.fetches += 1;
        match &state.fetch_error {
            Some(e) => Err(e.clone()),
            None => Ok(state.latest.clone()),
        }
    }

    async fn update_assignment_status(
        &self,
        assignment_id: i64,
        status: AssignmentStatus,
    ) -> Result<Option<AssignmentRecord>, ApiError> {
        let mut state = lock(&self.state);
        state.status_updates.push((assignment_id, status.clone()));
        if let Some(e) = &state.status_error {
            return Err(e.clone());
        }
        if let Some(record) = state.latest.as_mut().filter(|r| r.id == assignment_id) {
            record.request.status = status.as_wire().to_string();
        }
        Ok(state.latest.clone())
    }

    async fn report_location(&self, report: LocationReport) -> Result<Ack, ApiError> {
        let mut state = lock(&self.state);
        state.reports.push(report);
        match &state.report_error {
            Some(e) => Err(e.clone()),
            None => Ok(Ack {
                success: true,
                message: "ok".to_string(),
            }),
        }
    }
}

/// Offer feed driven by the test
pub struct ScriptedFeed {
    tx: Mutex<Option<mpsc::UnboundedSender<Result<Offer, ApiError>>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<Offer, ApiError>>>>,
    subscriptions: Mutex<Vec<VehicleId>>,
}

impl Default for ScriptedFeed {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            subscriptions: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedFeed {
    /// Deliver an offer event.
    pub fn push(&self, offer: Offer) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            let _ = tx.send(Ok(offer));
        }
    }

    /// Deliver an unusable event.
    pub fn push_error(&self, err: ApiError) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            let _ = tx.send(Err(err));
        }
    }

    /// End the stream. A later subscribe opens a new one.
    pub fn close(&self) {
        lock(&self.tx).take();
    }

    /// Number of subscribe calls
    pub fn subscriptions(&self) -> usize {
        lock(&self.subscriptions).len()
    }
}

#[async_trait]
impl OfferFeed for ScriptedFeed {
    async fn subscribe(&self, vehicle_id: VehicleId) -> Result<OfferStream, ApiError> {
        lock(&self.subscriptions).push(vehicle_id);
        // A resubscription after close() gets a fresh channel
        let rx = match lock(&self.rx).take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                *lock(&self.tx) = Some(tx);
                rx
            }
        };
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

/// Position source driven by the test
pub struct ScriptedPositions {
    current: Mutex<Option<GeoPoint>>,
    sample_failures: Mutex<VecDeque<PositionError>>,
    watch_error: Mutex<Option<PositionError>>,
    tx: mpsc::UnboundedSender<Result<GeoPoint, PositionError>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<GeoPoint, PositionError>>>>,
    samples: Mutex<usize>,
}

impl Default for ScriptedPositions {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            current: Mutex::new(None),
            sample_failures: Mutex::new(VecDeque::new()),
            watch_error: Mutex::new(None),
            tx,
            rx: Mutex::new(Some(rx)),
            samples: Mutex::new(0),
        }
    }
}

impl ScriptedPositions {
    /// Device reports a new fix on the stream; later one-shot samples return it.
    pub fn push_fix(&self, point: GeoPoint) {
        *lock(&self.current) = Some(point);
        let _ = self.tx.send(Ok(point));
    }

    /// Stream reports an error.
    pub fn push_error(&self, err: PositionError) {
        let _ = self.tx.send(Err(err));
    }

    /// The next one-shot samples fail with these errors, in order.
    pub fn fail_next_samples(&self, errors: impl IntoIterator<Item = PositionError>) {
        lock(&self.sample_failures).extend(errors);
    }

    /// Every one-shot sample and watch call fails with `err`.
    pub fn deny(&self, err: PositionError) {
        *lock(&self.watch_error) = Some(err);
    }

    /// Number of one-shot samples taken
    pub fn sample_count(&self) -> usize {
        *lock(&self.samples)
    }
}

#[async_trait]
impl PositionSource for ScriptedPositions {
    async fn sample(&self) -> Result<GeoPoint, PositionError> {
        *lock(&self.samples) += 1;
        if let Some(err) = lock(&self.watch_error).clone() {
            return Err(err);
        }
        if let Some(err) = lock(&self.sample_failures).pop_front() {
            return Err(err);
        }
        (*lock(&self.current)).ok_or_else(|| PositionError::Unavailable("no fix yet".to_string()))
    }

    async fn watch(&self) -> Result<PositionStream, PositionError> {
        if let Some(err) = lock(&self.watch_error).clone() {
            return Err(err);
        }
        let rx = lock(&self.rx)
            .take()
            .ok_or_else(|| PositionError::Unavailable("already watching".to_string()))?;
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

/// Alert sink that records every notification identity
#[derive(Default)]
pub struct RecordingAlerts {
    keys: Mutex<Vec<OfferKey>>,
}

impl RecordingAlerts {
    /// Identities alerted so far
    pub fn keys(&self) -> Vec<OfferKey> {
        lock(&self.keys).clone()
    }

    /// Number of alerts raised
    pub fn count(&self) -> usize {
        lock(&self.keys).len()
    }
}

impl AlertSink for RecordingAlerts {
    fn offer_alert(&self, offer: &Offer) {
        lock(&self.keys).push(offer.key());
    }
}

/// A full set of in-memory collaborators for vehicle 12
pub struct TestRig {
    /// Session cache holding vehicle 12
    pub session: Arc<MemorySessionStore>,
    /// Server double
    pub api: Arc<MockDispatchApi>,
    /// Offer feed
    pub feed: Arc<ScriptedFeed>,
    /// Device positions
    pub positions: Arc<ScriptedPositions>,
    /// Alert recorder
    pub alerts: Arc<RecordingAlerts>,
    /// Route provider
    pub routes: Arc<dyn RouteProvider>,
    /// Settings
    pub config: Config,
}

impl TestRig {
    /// Rig for vehicle 12 with default settings.
    pub fn new() -> Self {
        let session = MemorySessionStore::new();
        session.put_raw(resq_domain::SESSION_TOKEN_KEY, "test-token");
        session.put_raw(
            resq_domain::SESSION_INFO_KEY,
            r#"{"id":"12","code":"RV-12","plateNumber":"NP-4521"}"#,
        );
        Self {
            session: Arc::new(session),
            api: Arc::new(MockDispatchApi::new()),
            feed: Arc::new(ScriptedFeed::default()),
            positions: Arc::new(ScriptedPositions::default()),
            alerts: Arc::new(RecordingAlerts::default()),
            routes: Arc::new(StraightLineProvider),
            config: Config::default_config(),
        }
    }

    /// Parts for [`crate::VehicleCore::start`], on a clock anchored at [`t0`].
    ///
    /// Call from inside the test runtime so the clock follows paused time.
    pub fn parts(&self) -> CoreParts {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(t0()));
        CoreParts {
            session: self.session.clone(),
            api: self.api.clone(),
            feed: self.feed.clone(),
            positions: self.positions.clone(),
            routes: self.routes.clone(),
            alerts: self.alerts.clone(),
            clock,
            config: self.config.clone(),
        }
    }
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until a published snapshot satisfies `pred`.
///
/// Panics after ten minutes of (virtual) time.
pub async fn wait_for<F>(rx: &mut watch::Receiver<VehicleSnapshot>, mut pred: F) -> VehicleSnapshot
where
    F: FnMut(&VehicleSnapshot) -> bool,
{
    let wait = async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if pred(&snapshot) {
                    return snapshot.clone();
                }
            }
            if rx.changed().await.is_err() {
                let snapshot = rx.borrow().clone();
                if pred(&snapshot) {
                    return snapshot;
                }
                panic!("vehicle core stopped before the condition held: {:?}", snapshot);
            }
        }
    };
    match tokio::time::timeout(Duration::from_secs(600), wait).await {
        Ok(snapshot) => snapshot,
        Err(_) => panic!("timed out waiting for vehicle snapshot"),
    }
}
