//! Assignment Reconciler
//!
//! Owns the single local assignment view and merges three inputs into it:
//! the outcome of an accept, periodic server confirmation, and the driver's
//! status advances. Server truth always wins over the optimistic guess, but
//! "no information" never clears anything.
//!
//! Each fetch carries a sequence number. Local mutations raise a floor so a
//! fetch that started before the mutation cannot overwrite it when it lands.

use resq_domain::{Assignment, AssignmentRecord, AssignmentStatus, RequestId, RequestSnapshot, Tracked};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::api::{ApiError, DispatchApi};
use crate::error::{DispatchError, Result};
use crate::handle::{self, SubscriptionHandle};
use crate::inbox::CoreEvent;
use crate::runtime::CoreContext;

/// Merge the latest server record into the local view.
///
/// - no record, or a record without coordinates: keep `current`
/// - cancelled or completed record: no view
/// - anything else: the record, confirmed
pub fn reconcile(
    current: Option<Tracked<Assignment>>,
    record: Option<&AssignmentRecord>,
) -> Option<Tracked<Assignment>> {
    let record = match record {
        Some(r) => r,
        None => return current,
    };
    let assignment = match record.to_assignment() {
        Some(assignment) => assignment,
        None => return current,
    };
    if assignment.status.is_terminal() {
        return None;
    }
    Some(Tracked::Confirmed(assignment))
}

/// Owner of the local assignment view
pub(crate) struct AssignmentReconciler {
    view: Option<Tracked<Assignment>>,
    next_seq: u64,
    floor: u64,
    applied: u64,
    status_in_flight: Option<i64>,
    poll: Option<SubscriptionHandle>,
}

impl AssignmentReconciler {
    pub(crate) fn new() -> Self {
        Self {
            view: None,
            next_seq: 1,
            floor: 0,
            applied: 0,
            status_in_flight: None,
            poll: None,
        }
    }

    pub(crate) fn view(&self) -> Option<&Tracked<Assignment>> {
        self.view.as_ref()
    }

    pub(crate) fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    pub(crate) fn status_in_flight(&self) -> bool {
        self.status_in_flight.is_some()
    }

    /// Query the server for the latest record.
    pub(crate) fn refresh(&mut self, ctx: &mut CoreContext) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let api: Arc<dyn DispatchApi> = ctx.api.clone();
        let inbox = ctx.inbox.clone();
        let vehicle_id = ctx.session.vehicle_id;
        ctx.tasks.spawn(async move {
            let result = api.latest_assignment(vehicle_id).await;
            inbox.post(CoreEvent::AssignmentFetched { seq, result });
        });
    }

    /// Apply a fetch result. Returns `true` when the view changed.
    pub(crate) fn on_fetched(
        &mut self,
        seq: u64,
        result: std::result::Result<Option<AssignmentRecord>, ApiError>,
        ctx: &CoreContext,
    ) -> bool {
        if seq < self.floor || seq <= self.applied {
            debug!(seq, floor = self.floor, applied = self.applied, "Discarding stale assignment fetch");
            return false;
        }
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(vehicle_id = ctx.session.vehicle_id, error = %e, "Assignment refresh failed");
                return false;
            }
        };
        self.applied = seq;

        let next = reconcile(self.view.clone(), record.as_ref());
        if next == self.view {
            return false;
        }
        match (&self.view, &next) {
            (Some(prev), None) => info!(
                request_id = %prev.value().request_id,
                "Assignment ended on server, clearing local view"
            ),
            (_, Some(now)) => debug!(
                assignment_id = ?now.value().id,
                status = now.value().status.as_wire(),
                "Assignment confirmed"
            ),
            (None, None) => {}
        }
        self.view = next;
        self.sync_polling(ctx);
        true
    }

    /// Optimistic view after a successful accept, followed by an immediate refresh.
    pub(crate) fn on_accepted(&mut self, request: &RequestSnapshot, ctx: &mut CoreContext) {
        self.raise_floor();
        self.view = Some(Tracked::Optimistic(Assignment::from_offer_snapshot(request)));
        self.sync_polling(ctx);
        self.refresh(ctx);
    }

    /// A successful decline retracts any accepted view that is not confirmed
    /// for some other request.
    pub(crate) fn on_declined(&mut self, request_id: &RequestId, ctx: &CoreContext) -> bool {
        let retract = match &self.view {
            Some(Tracked::Optimistic(_)) => true,
            Some(Tracked::Confirmed(a)) => &a.request_id == request_id,
            None => false,
        };
        if !retract {
            return false;
        }
        self.raise_floor();
        self.view = None;
        self.sync_polling(ctx);
        true
    }

    /// Send a status advance for the held assignment.
    pub(crate) fn begin_status(
        &mut self,
        status: AssignmentStatus,
        ctx: &mut CoreContext,
        reply: oneshot::Sender<Result<bool>>,
    ) {
        let assignment = match &self.view {
            Some(view) => view.value(),
            None => {
                let _ = reply.send(Err(DispatchError::NoAssignment));
                return;
            }
        };
        let assignment_id = match assignment.id {
            Some(id) => id,
            None => {
                let _ = reply.send(Err(DispatchError::UnknownAssignment));
                return;
            }
        };
        if let Some(pending) = self.status_in_flight {
            let _ = reply.send(Err(DispatchError::StatusUpdateInFlight(pending)));
            return;
        }
        self.status_in_flight = Some(assignment_id);

        let api: Arc<dyn DispatchApi> = ctx.api.clone();
        let inbox = ctx.inbox.clone();
        info!(assignment_id, status = status.as_wire(), "Advancing assignment status");
        ctx.tasks.spawn(async move {
            let result = api
                .update_assignment_status(assignment_id, status.clone())
                .await;
            inbox.post(CoreEvent::StatusSettled {
                assignment_id,
                status,
                result,
                reply,
            });
        });
    }

    /// Apply a finished status advance. Returns whether the call succeeded
    /// and whether the view changed.
    pub(crate) fn on_status_settled(
        &mut self,
        assignment_id: i64,
        status: AssignmentStatus,
        result: std::result::Result<Option<AssignmentRecord>, ApiError>,
        ctx: &CoreContext,
    ) -> (bool, bool) {
        if self.status_in_flight == Some(assignment_id) {
            self.status_in_flight = None;
        }
        if let Err(e) = result {
            warn!(assignment_id, status = status.as_wire(), error = %e, "Status update failed");
            return (false, false);
        }

        let holds_same = self
            .view
            .as_ref()
            .map_or(false, |v| v.value().id == Some(assignment_id));
        if !holds_same {
            debug!(assignment_id, "Status update settled for an assignment no longer held");
            return (true, false);
        }

        self.raise_floor();
        if status.is_terminal() {
            info!(assignment_id, status = status.as_wire(), "Assignment finished");
            self.view = None;
        } else if let Some(view) = self.view.as_mut() {
            view.value_mut().status = status;
        }
        self.sync_polling(ctx);
        (true, true)
    }

    pub(crate) fn teardown(&mut self) {
        handle::clear(&mut self.poll);
        self.status_in_flight = None;
        self.view = None;
    }

    fn raise_floor(&mut self) {
        self.floor = self.next_seq;
    }

    /// Poll while, and only while, a view exists.
    fn sync_polling(&mut self, ctx: &CoreContext) {
        match (&self.view, &self.poll) {
            (Some(_), None) => {
                let inbox = ctx.inbox.clone();
                self.poll = Some(SubscriptionHandle::interval(
                    "assignment-poll",
                    ctx.config.timing.assignment_poll(),
                    move || inbox.post(CoreEvent::PollTick),
                ));
                debug!("Assignment polling started");
            }
            (None, Some(_)) => {
                handle::clear(&mut self.poll);
                debug!("Assignment polling stopped");
            }
            _ => {}
        }
    }
}
