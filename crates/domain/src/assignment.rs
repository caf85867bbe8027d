//! Accepted assignments
//!
//! An assignment links this vehicle to a request once an offer is accepted.
//! Status moves `Dispatched -> Arrived -> Completed`, or to `Cancelled` at any
//! point before completion. At most one non-terminal assignment is held
//! locally at a time.

use resq_core::GeoPoint;
use serde::{Deserialize, Serialize};

use crate::offer::{RequestId, RequestSnapshot, Requester};

/// Assignment lifecycle status
///
/// The server reports status as free text. Classification is by
/// case-insensitive substring, so `"CancelledByDispatcher"` is `Cancelled`
/// and `"Completed"` / `"completion confirmed"` are `Completed`. Text that
/// matches nothing known is kept verbatim and treated as in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentStatus {
    Dispatched,
    Arrived,
    Completed,
    Cancelled,
    Other(String),
}

impl AssignmentStatus {
    pub fn from_server_text(text: &str) -> Self {
        let lower = text.to_ascii_lowercase();
        if lower.contains("cancel") {
            AssignmentStatus::Cancelled
        } else if lower.contains("complete") {
            AssignmentStatus::Completed
        } else if lower.contains("arriv") {
            AssignmentStatus::Arrived
        } else if lower.contains("dispatch") {
            AssignmentStatus::Dispatched
        } else {
            AssignmentStatus::Other(text.to_string())
        }
    }

    /// Completed and cancelled assignments are removed from the local view.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssignmentStatus::Completed | AssignmentStatus::Cancelled)
    }

    pub fn is_arrived(&self) -> bool {
        matches!(self, AssignmentStatus::Arrived)
    }

    /// Text sent by the status update command.
    pub fn as_wire(&self) -> &str {
        match self {
            AssignmentStatus::Dispatched => "Dispatched",
            AssignmentStatus::Arrived => "Arrived",
            AssignmentStatus::Completed => "Completed",
            AssignmentStatus::Cancelled => "Cancelled",
            AssignmentStatus::Other(text) => text,
        }
    }
}

/// Local view of the vehicle's current assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Unknown until the server confirms an optimistic accept
    pub id: Option<i64>,
    pub request_id: RequestId,
    pub status: AssignmentStatus,
    pub destination: GeoPoint,
    pub address: Option<String>,
    pub description: Option<String>,
    pub proof_image_url: Option<String>,
    pub category: Option<String>,
    pub requester: Option<Requester>,
}

impl Assignment {
    /// Optimistic view built from the offer that was just accepted.
    pub fn from_offer_snapshot(request: &RequestSnapshot) -> Self {
        Self {
            id: None,
            request_id: request.id.clone(),
            status: AssignmentStatus::Dispatched,
            destination: request.location,
            address: request.address.clone(),
            description: request.description.clone(),
            proof_image_url: request.proof_image_url.clone(),
            category: request.category.clone(),
            requester: request.requester.clone(),
        }
    }
}

/// Request part of an assignment record returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRequest {
    pub id: RequestId,
    pub status: String,
    /// Missing coordinates make the whole record "no information".
    pub location: Option<GeoPoint>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub proof_image_url: Option<String>,
    pub category: Option<String>,
    pub requester: Option<Requester>,
}

/// Most recent assignment record for this vehicle, as queried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub id: i64,
    pub request: RecordRequest,
}

impl AssignmentRecord {
    pub fn status(&self) -> AssignmentStatus {
        AssignmentStatus::from_server_text(&self.request.status)
    }

    /// Confirmed local view, or `None` when the record lacks coordinates.
    pub fn to_assignment(&self) -> Option<Assignment> {
        let destination = self.request.location?;
        Some(Assignment {
            id: Some(self.id),
            request_id: self.request.id.clone(),
            status: self.status(),
            destination,
            address: self.request.address.clone(),
            description: self.request.description.clone(),
            proof_image_url: self.request.proof_image_url.clone(),
            category: self.request.category.clone(),
            requester: self.request.requester.clone(),
        })
    }
}

/// A locally held value tagged with where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Tracked<T> {
    /// Applied locally ahead of server confirmation
    Optimistic(T),
    /// Mirrors the last server answer
    Confirmed(T),
}

impl<T> Tracked<T> {
    pub fn value(&self) -> &T {
        match self {
            Tracked::Optimistic(v) | Tracked::Confirmed(v) => v,
        }
    }

    pub fn value_mut(&mut self) -> &mut T {
        match self {
            Tracked::Optimistic(v) | Tracked::Confirmed(v) => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Tracked::Optimistic(v) | Tracked::Confirmed(v) => v,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Tracked::Confirmed(_))
    }
}
