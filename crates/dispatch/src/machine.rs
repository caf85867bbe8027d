//! Vehicle state machine
//!
//! The state is derived from the offer and assignment views rather than
//! stored, so it can never disagree with them.

use resq_domain::{Assignment, AssignmentStatus, Tracked};
use serde::{Deserialize, Serialize};

/// Conceptual vehicle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleState {
    /// No offer and no assignment
    Idle,
    /// An offer is waiting for a decision
    OfferPending,
    /// Working an accepted assignment; a further offer may be showing
    AssignmentActive {
        /// Current assignment status
        status: AssignmentStatus,
        /// A new offer is displayed on top of the assignment
        offer_pending: bool,
    },
}

impl VehicleState {
    /// Derive the state from the current views.
    pub fn derive(offer_present: bool, assignment: Option<&Assignment>) -> Self {
        match assignment {
            Some(a) => VehicleState::AssignmentActive {
                status: a.status.clone(),
                offer_pending: offer_present,
            },
            None if offer_present => VehicleState::OfferPending,
            None => VehicleState::Idle,
        }
    }

    /// Check if a transition between two observed states is legal
    pub fn can_transition_to(&self, next: &VehicleState) -> bool {
        use VehicleState::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Idle, OfferPending) => true,
            // Discovered by polling
            (Idle, AssignmentActive { .. }) => true,
            (OfferPending, Idle) => true,
            (OfferPending, AssignmentActive { .. }) => true,
            (AssignmentActive { .. }, Idle) => true,
            (AssignmentActive { .. }, OfferPending) => true,
            (AssignmentActive { status: from, .. }, AssignmentActive { status: to, .. }) => {
                status_can_advance(from, to)
            }
            _ => false,
        }
    }
}

/// Forward-only status progression of one assignment. A different request
/// replacing the held one shows up as `Dispatched` again and is also allowed.
fn status_can_advance(from: &AssignmentStatus, to: &AssignmentStatus) -> bool {
    use AssignmentStatus::*;
    match (from, to) {
        (Completed, _) | (Cancelled, _) => false,
        (Dispatched, _) => true,
        (Arrived, Arrived) | (Arrived, Completed) | (Arrived, Cancelled) => true,
        (Arrived, Dispatched) => true,
        (Arrived, Other(_)) => true,
        (Other(_), _) => true,
    }
}

/// Actions the driver can take right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverAction {
    /// Accept the active offer
    Accept,
    /// Decline the active offer
    Decline,
    /// Report arrival at the destination
    MarkArrived,
    /// Report the assignment completed
    MarkCompleted,
}

/// Available actions for the current views.
///
/// Offer actions need an offer and no response in flight. Status actions
/// need a server-confirmed assignment id and no status update in flight.
/// Arrival comes first; once arrived, only completion remains.
pub fn available_actions(
    offer_present: bool,
    respond_in_flight: bool,
    assignment: Option<&Tracked<Assignment>>,
    status_in_flight: bool,
) -> Vec<DriverAction> {
    let mut actions = Vec::new();
    if offer_present && !respond_in_flight {
        actions.push(DriverAction::Accept);
        actions.push(DriverAction::Decline);
    }
    if let Some(a) = assignment.map(Tracked::value) {
        if a.id.is_some() && !status_in_flight {
            if a.status.is_arrived() {
                actions.push(DriverAction::MarkCompleted);
            } else if !a.status.is_terminal() {
                actions.push(DriverAction::MarkArrived);
            }
        }
    }
    actions
}
