//! Single-reducer runtime
//!
//! [`VehicleCore::start`] spawns one reducer task that owns every component.
//! Producers post into the inbox; the reducer applies one event at a time,
//! re-evaluates the route, publishes a [`VehicleSnapshot`] and only then
//! answers the caller waiting on the event, so a caller that sees its reply
//! can already read the resulting state.

use futures_util::StreamExt;
use resq_core::{Clock, Config};
use resq_domain::{
    resolve_image_url, Assignment, AssignmentStatus, Session, Tracked, VehicleId, VehiclePosition,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::api::{DispatchApi, OfferFeed};
use crate::error::{DispatchError, Result};
use crate::handle::{self, SubscriptionHandle};
use crate::inbox::{Command, CoreEvent, Inbox};
use crate::location::{LocationPublisher, PositionSource};
use crate::machine::{available_actions, DriverAction, VehicleState};
use crate::offer::{AlertSink, OfferChannel, OfferView};
use crate::reconciler::AssignmentReconciler;
use crate::respond::{RespondOutcome, ResponseCoordinator};
use crate::route::{RouteOverlay, RouteProvider, RouteView};
use crate::session::SessionProvider;

/// First resubscribe delay after the offer feed ends
const FEED_RETRY_INITIAL: Duration = Duration::from_secs(1);
/// Upper bound of the resubscribe backoff
const FEED_RETRY_MAX: Duration = Duration::from_secs(30);

/// Collaborators and settings for one vehicle session
pub struct CoreParts {
    /// Current-session accessor
    pub session: Arc<dyn SessionProvider>,
    /// Dispatch server commands and queries
    pub api: Arc<dyn DispatchApi>,
    /// Pushed offer events
    pub feed: Arc<dyn OfferFeed>,
    /// Device positioning
    pub positions: Arc<dyn PositionSource>,
    /// Route computation
    pub routes: Arc<dyn RouteProvider>,
    /// New-offer alerts
    pub alerts: Arc<dyn AlertSink>,
    /// Wall clock used for offer deadlines
    pub clock: Arc<dyn Clock>,
    /// Timing, routing and server settings
    pub config: Config,
}

/// Assignment as shown to the driver
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentCard {
    /// Local view, tagged optimistic or confirmed
    pub assignment: Tracked<Assignment>,
    /// Proof image resolved against the asset server
    pub proof_image_url: Option<String>,
}

/// Everything a consumer needs to render the vehicle's situation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleSnapshot {
    /// Session vehicle
    pub vehicle_id: VehicleId,
    /// Derived state
    pub state: VehicleState,
    /// Active offer, if any
    pub offer: Option<OfferView>,
    /// Current assignment, if any
    pub assignment: Option<AssignmentCard>,
    /// Latest known position
    pub position: Option<VehiclePosition>,
    /// Route toward the active destination
    pub route: Option<RouteView>,
    /// Assignment polling is running
    pub polling: bool,
    /// Positioning is available on this device
    pub location_enabled: bool,
    /// The offer feed subscription is open
    pub feed_connected: bool,
    /// What the driver can do right now
    pub actions: Vec<DriverAction>,
    /// The core has not been shut down
    pub running: bool,
}

impl VehicleSnapshot {
    fn initial(vehicle_id: VehicleId) -> Self {
        Self {
            vehicle_id,
            state: VehicleState::Idle,
            offer: None,
            assignment: None,
            position: None,
            route: None,
            polling: false,
            location_enabled: true,
            feed_connected: false,
            actions: Vec::new(),
            running: true,
        }
    }
}

/// Shared plumbing handed to components by the reducer
pub(crate) struct CoreContext {
    pub(crate) inbox: Inbox,
    pub(crate) tasks: JoinSet<()>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: Config,
    pub(crate) api: Arc<dyn DispatchApi>,
    pub(crate) session: Session,
}

/// Handle to a running vehicle core
///
/// Dropping the handle shuts the core down.
pub struct VehicleCore {
    inbox: Inbox,
    snapshots: watch::Receiver<VehicleSnapshot>,
}

impl VehicleCore {
    /// Start the core for the current session.
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// [`DispatchError::NoSession`] without spawning anything when there is
    /// no session; the caller should send the user to authentication.
    pub fn start(parts: CoreParts) -> Result<Self> {
        let session = parts
            .session
            .current_session()
            .ok_or(DispatchError::NoSession)?;
        info!(
            vehicle_id = session.vehicle_id,
            code = %session.code,
            "Starting vehicle core"
        );

        let (inbox, rx) = Inbox::channel();
        let (snapshot_tx, snapshot_rx) =
            watch::channel(VehicleSnapshot::initial(session.vehicle_id));

        let drift = parts.config.routing.recompute_drift_m;
        let ctx = CoreContext {
            inbox: inbox.clone(),
            tasks: JoinSet::new(),
            clock: parts.clock,
            config: parts.config,
            api: parts.api,
            session: session.clone(),
        };
        let mut reducer = Reducer {
            offers: OfferChannel::new(session.vehicle_id),
            responder: ResponseCoordinator::new(),
            reconciler: AssignmentReconciler::new(),
            location: LocationPublisher::new(parts.positions),
            route: RouteOverlay::new(parts.routes, drift),
            session_source: parts.session,
            feed: parts.feed,
            alerts: parts.alerts,
            feed_pump: None,
            feed_retry: None,
            feed_backoff: FEED_RETRY_INITIAL,
            feed_connected: false,
            snapshots: snapshot_tx,
            running: true,
            ctx,
        };
        reducer.activate();
        tokio::spawn(reducer.run(rx));

        Ok(Self {
            inbox,
            snapshots: snapshot_rx,
        })
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> VehicleSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every published change.
    pub fn subscribe(&self) -> watch::Receiver<VehicleSnapshot> {
        self.snapshots.clone()
    }

    /// Accept or decline the active offer.
    ///
    /// Resolves once the server has answered and the outcome is applied.
    /// Without an active offer this is a no-op returning
    /// [`RespondOutcome::Ignored`].
    pub async fn respond(&self, accepted: bool) -> Result<RespondOutcome> {
        let (reply, rx) = oneshot::channel();
        if !self.inbox.command(Command::Respond { accepted, reply }) {
            return Err(DispatchError::Stopped);
        }
        rx.await.map_err(|_| DispatchError::Stopped)?
    }

    /// Report arrival. `Ok(false)` when the server call failed.
    pub async fn mark_arrived(&self) -> Result<bool> {
        self.advance(AssignmentStatus::Arrived).await
    }

    /// Report completion. `Ok(false)` when the server call failed.
    pub async fn mark_completed(&self) -> Result<bool> {
        self.advance(AssignmentStatus::Completed).await
    }

    async fn advance(&self, status: AssignmentStatus) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        if !self.inbox.command(Command::AdvanceStatus { status, reply }) {
            return Err(DispatchError::Stopped);
        }
        rx.await.map_err(|_| DispatchError::Stopped)?
    }

    /// Ask for an out-of-cycle assignment refresh.
    pub fn refresh_assignment(&self) {
        self.inbox.command(Command::RefreshAssignment);
    }

    /// Stop every timer, stream and in-flight call, then wait for the reducer.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.inbox.command(Command::Shutdown { done: Some(done) }) {
            let _ = rx.await;
        }
    }

    /// Whether the reducer is still accepting events.
    pub fn is_running(&self) -> bool {
        !self.inbox.is_closed()
    }
}

impl Drop for VehicleCore {
    fn drop(&mut self) {
        self.inbox.command(Command::Shutdown { done: None });
    }
}

/// Deferred answers, sent after the snapshot is published
enum Reply {
    Respond(oneshot::Sender<Result<RespondOutcome>>, Result<RespondOutcome>),
    Status(oneshot::Sender<Result<bool>>, Result<bool>),
    Done(Option<oneshot::Sender<()>>),
}

impl Reply {
    fn send(self) {
        match self {
            Reply::Respond(tx, value) => {
                let _ = tx.send(value);
            }
            Reply::Status(tx, value) => {
                let _ = tx.send(value);
            }
            Reply::Done(Some(tx)) => {
                let _ = tx.send(());
            }
            Reply::Done(None) => {}
        }
    }
}

struct Reducer {
    ctx: CoreContext,
    session_source: Arc<dyn SessionProvider>,
    feed: Arc<dyn OfferFeed>,
    alerts: Arc<dyn AlertSink>,
    offers: OfferChannel,
    responder: ResponseCoordinator,
    reconciler: AssignmentReconciler,
    location: LocationPublisher,
    route: RouteOverlay,
    feed_pump: Option<SubscriptionHandle>,
    feed_retry: Option<SubscriptionHandle>,
    feed_backoff: Duration,
    feed_connected: bool,
    snapshots: watch::Sender<VehicleSnapshot>,
    running: bool,
}

impl Reducer {
    fn activate(&mut self) {
        self.start_feed();
        self.location.activate(&self.ctx);
        self.reconciler.refresh(&mut self.ctx);
        self.publish();
    }

    fn start_feed(&mut self) {
        let feed = self.feed.clone();
        let inbox = self.ctx.inbox.clone();
        let vehicle_id = self.ctx.session.vehicle_id;
        handle::clear(&mut self.feed_retry);
        handle::replace(
            &mut self.feed_pump,
            SubscriptionHandle::spawn("offer-feed", pump_offers(feed, vehicle_id, inbox)),
        );
    }

    /// Resubscribe after a backoff that doubles up to [`FEED_RETRY_MAX`].
    fn schedule_feed_retry(&mut self) {
        let delay = self.feed_backoff;
        self.feed_backoff = (delay * 2).min(FEED_RETRY_MAX);
        let inbox = self.ctx.inbox.clone();
        info!(
            vehicle_id = self.ctx.session.vehicle_id,
            retry_in_ms = delay.as_millis() as u64,
            "Scheduling offer feed resubscription"
        );
        handle::replace(
            &mut self.feed_retry,
            SubscriptionHandle::timeout("offer-feed-retry", delay, move || {
                inbox.post(CoreEvent::FeedRetry);
            }),
        );
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CoreEvent>) {
        while self.running {
            tokio::select! {
                event = rx.recv() => {
                    let event = match event {
                        Some(event) => event,
                        None => break,
                    };
                    let reply = self.handle(event);
                    self.update_route();
                    self.publish();
                    if let Some(reply) = reply {
                        reply.send();
                    }
                }
                Some(joined) = self.ctx.tasks.join_next(), if !self.ctx.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Background call panicked");
                        }
                    }
                }
            }
        }
        if self.running {
            self.teardown();
            self.publish();
        }
        debug!(vehicle_id = self.ctx.session.vehicle_id, "Vehicle core reducer exited");
    }

    fn handle(&mut self, event: CoreEvent) -> Option<Reply> {
        match event {
            CoreEvent::OfferReceived(offer) => {
                self.offers.on_event(offer, &self.ctx, self.alerts.as_ref());
            }
            CoreEvent::FeedOpened => {
                self.feed_connected = true;
                self.feed_backoff = FEED_RETRY_INITIAL;
            }
            CoreEvent::FeedClosed => {
                warn!(vehicle_id = self.ctx.session.vehicle_id, "Offer feed closed");
                self.feed_pump = None;
                self.feed_connected = false;
                if !self.session_alive() {
                    return self.end_session();
                }
                self.schedule_feed_retry();
            }
            CoreEvent::FeedRetry => {
                self.feed_retry = None;
                if !self.session_alive() {
                    return self.end_session();
                }
                self.start_feed();
            }
            CoreEvent::OfferExpired { generation } => {
                self.offers.on_expired(generation);
            }
            CoreEvent::CountdownTick { generation } => {
                self.offers.on_tick(generation, &self.ctx);
            }
            CoreEvent::PositionSampled(point) => {
                self.location.on_sample(point, &mut self.ctx);
            }
            CoreEvent::PositionFailed(err) => {
                self.location.on_failure(err);
            }
            CoreEvent::FallbackSampled(result) => {
                self.location.on_fallback(result, &mut self.ctx);
            }
            CoreEvent::PollTick => {
                if !self.session_alive() {
                    return self.end_session();
                }
                self.reconciler.refresh(&mut self.ctx);
            }
            CoreEvent::AssignmentFetched { seq, result } => {
                self.reconciler.on_fetched(seq, result, &self.ctx);
            }
            CoreEvent::RouteComputed { generation, result } => {
                self.route.on_computed(generation, result);
            }
            CoreEvent::RespondSettled {
                key,
                request,
                accepted,
                result,
                reply,
            } => {
                self.responder.settle(&key);
                let outcome = match result {
                    Ok(_) => {
                        if accepted {
                            self.reconciler.on_accepted(&request, &mut self.ctx);
                        } else {
                            self.reconciler.on_declined(&request.id, &self.ctx);
                        }
                        self.offers.clear_if(&key);
                        info!(request_id = %request.id, accepted, "Offer response recorded");
                        Ok(if accepted {
                            RespondOutcome::Accepted
                        } else {
                            RespondOutcome::Declined
                        })
                    }
                    Err(e) => {
                        warn!(request_id = %request.id, accepted, error = %e, "Offer response failed");
                        Err(DispatchError::Api(e))
                    }
                };
                return Some(Reply::Respond(reply, outcome));
            }
            CoreEvent::StatusSettled {
                assignment_id,
                status,
                result,
                reply,
            } => {
                let (ok, _) =
                    self.reconciler
                        .on_status_settled(assignment_id, status, result, &self.ctx);
                return Some(Reply::Status(reply, Ok(ok)));
            }
            CoreEvent::Command(command) => return self.command(command),
        }
        None
    }

    fn command(&mut self, command: Command) -> Option<Reply> {
        match command {
            Command::Respond { accepted, reply } => {
                if !self.session_alive() {
                    let done = self.end_session();
                    let _ = reply.send(Err(DispatchError::NoSession));
                    return done;
                }
                self.responder
                    .begin(self.offers.active(), accepted, &mut self.ctx, reply);
            }
            Command::AdvanceStatus { status, reply } => {
                if !self.session_alive() {
                    let done = self.end_session();
                    let _ = reply.send(Err(DispatchError::NoSession));
                    return done;
                }
                self.reconciler.begin_status(status, &mut self.ctx, reply);
            }
            Command::RefreshAssignment => self.reconciler.refresh(&mut self.ctx),
            Command::Shutdown { done } => {
                info!(vehicle_id = self.ctx.session.vehicle_id, "Stopping vehicle core");
                self.teardown();
                return Some(Reply::Done(done));
            }
        }
        None
    }

    fn session_alive(&self) -> bool {
        self.session_source
            .current_session()
            .map_or(false, |s| s.vehicle_id == self.ctx.session.vehicle_id)
    }

    fn end_session(&mut self) -> Option<Reply> {
        warn!(vehicle_id = self.ctx.session.vehicle_id, "Session lost, stopping vehicle core");
        self.teardown();
        None
    }

    /// Stop everything synchronously. No callback fires afterwards.
    fn teardown(&mut self) {
        handle::clear(&mut self.feed_pump);
        handle::clear(&mut self.feed_retry);
        self.feed_connected = false;
        self.offers.teardown();
        self.responder.teardown();
        self.reconciler.teardown();
        self.location.deactivate();
        self.route.clear();
        self.ctx.tasks.abort_all();
        self.running = false;
    }

    /// Offer location wins over the assignment destination.
    fn update_route(&mut self) {
        if !self.running {
            return;
        }
        let destination = self
            .offers
            .active()
            .map(|o| o.request.location)
            .or_else(|| self.reconciler.view().map(|a| a.value().destination));
        let position = self.location.position().map(|p| p.point);
        self.route
            .update(position, destination, destination.is_some(), &self.ctx);
    }

    fn snapshot(&self) -> VehicleSnapshot {
        let offer = self.offers.view(&self.ctx);
        let assignment = self.reconciler.view().cloned();
        let state = VehicleState::derive(offer.is_some(), assignment.as_ref().map(Tracked::value));
        let actions = if self.running {
            available_actions(
                offer.is_some(),
                self.responder.is_in_flight(),
                assignment.as_ref(),
                self.reconciler.status_in_flight(),
            )
        } else {
            Vec::new()
        };
        let asset_base = &self.ctx.config.server.asset_base_url;
        VehicleSnapshot {
            vehicle_id: self.ctx.session.vehicle_id,
            state,
            offer,
            assignment: assignment.map(|a| AssignmentCard {
                proof_image_url: resolve_image_url(a.value().proof_image_url.as_deref(), asset_base),
                assignment: a,
            }),
            position: self.location.position(),
            route: self.route.view().cloned(),
            polling: self.reconciler.is_polling(),
            location_enabled: self.location.is_enabled() && self.location.is_streaming(),
            feed_connected: self.feed_connected,
            actions,
            running: self.running,
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        let previous_state = self.snapshots.borrow().state.clone();
        if !previous_state.can_transition_to(&next.state) {
            warn!(from = ?previous_state, to = ?next.state, "Unexpected vehicle state transition");
        }
        self.snapshots.send_if_modified(move |current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn pump_offers(feed: Arc<dyn OfferFeed>, vehicle_id: VehicleId, inbox: Inbox) {
    let mut stream = match feed.subscribe(vehicle_id).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(vehicle_id, error = %e, "Offer feed subscription failed");
            inbox.post(CoreEvent::FeedClosed);
            return;
        }
    };
    info!(vehicle_id, "Subscribed to offer feed");
    if !inbox.post(CoreEvent::FeedOpened) {
        return;
    }
    while let Some(item) = stream.next().await {
        match item {
            Ok(offer) => {
                if !inbox.post(CoreEvent::OfferReceived(offer)) {
                    return;
                }
            }
            Err(e) => warn!(vehicle_id, error = %e, "Dropping unusable offer event"),
        }
    }
    inbox.post(CoreEvent::FeedClosed);
}

#[cfg(test)]
impl CoreContext {
    /// Context wired to a fresh inbox, a mock API and a paused-time clock.
    pub(crate) fn for_test(vehicle_id: VehicleId) -> (Self, mpsc::UnboundedReceiver<CoreEvent>) {
        Self::for_test_with_api(vehicle_id, Arc::new(crate::testing::MockDispatchApi::new()))
    }

    pub(crate) fn for_test_with_api(
        vehicle_id: VehicleId,
        api: Arc<dyn DispatchApi>,
    ) -> (Self, mpsc::UnboundedReceiver<CoreEvent>) {
        let (inbox, rx) = Inbox::channel();
        let ctx = Self {
            inbox,
            tasks: JoinSet::new(),
            clock: Arc::new(resq_core::TokioClock::starting_at(crate::testing::t0())),
            config: Config::default_config(),
            api,
            session: crate::testing::sample_session(vehicle_id),
        };
        (ctx, rx)
    }

    /// Run every spawned call to completion.
    pub(crate) async fn drain(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }
}
