//! Ordered inbox feeding the reducer
//!
//! Producers never touch component state. They post a [`CoreEvent`] and the
//! reducer applies events one at a time in arrival order.

use resq_core::GeoPoint;
use resq_domain::{AssignmentRecord, AssignmentStatus, Offer, OfferKey, RequestSnapshot};
use tokio::sync::{mpsc, oneshot};

use crate::api::{Ack, ApiError};
use crate::error::Result;
use crate::location::PositionError;
use crate::respond::RespondOutcome;
use crate::route::{RouteError, RoutePath};

/// Caller-facing requests
#[derive(Debug)]
pub(crate) enum Command {
    Respond {
        accepted: bool,
        reply: oneshot::Sender<Result<RespondOutcome>>,
    },
    AdvanceStatus {
        status: AssignmentStatus,
        reply: oneshot::Sender<Result<bool>>,
    },
    RefreshAssignment,
    Shutdown {
        done: Option<oneshot::Sender<()>>,
    },
}

/// Everything the reducer reacts to
#[derive(Debug)]
pub(crate) enum CoreEvent {
    OfferReceived(Offer),
    FeedOpened,
    FeedClosed,
    FeedRetry,
    OfferExpired {
        generation: u64,
    },
    CountdownTick {
        generation: u64,
    },
    PositionSampled(GeoPoint),
    PositionFailed(PositionError),
    FallbackSampled(std::result::Result<GeoPoint, PositionError>),
    PollTick,
    AssignmentFetched {
        seq: u64,
        result: std::result::Result<Option<AssignmentRecord>, ApiError>,
    },
    RouteComputed {
        generation: u64,
        result: std::result::Result<RoutePath, RouteError>,
    },
    RespondSettled {
        key: OfferKey,
        request: RequestSnapshot,
        accepted: bool,
        result: std::result::Result<Ack, ApiError>,
        reply: oneshot::Sender<Result<RespondOutcome>>,
    },
    StatusSettled {
        assignment_id: i64,
        status: AssignmentStatus,
        result: std::result::Result<Option<AssignmentRecord>, ApiError>,
        reply: oneshot::Sender<Result<bool>>,
    },
    Command(Command),
}

/// Sending half of the inbox, cloned into every producer
#[derive(Debug, Clone)]
pub(crate) struct Inbox {
    tx: mpsc::UnboundedSender<CoreEvent>,
}

impl Inbox {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<CoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Post an event. Returns `false` once the reducer has gone away.
    pub(crate) fn post(&self, event: CoreEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub(crate) fn command(&self, command: Command) -> bool {
        self.post(CoreEvent::Command(command))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
