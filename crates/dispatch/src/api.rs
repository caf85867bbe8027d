//! Server-side collaborators, specified at their interface boundary
//!
//! The core never talks to the network directly. It calls a [`DispatchApi`]
//! for commands and queries and consumes an [`OfferFeed`] for pushed offers.
//! Transport adapters live in `resq-gateway`.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use resq_domain::{AssignmentRecord, AssignmentStatus, Offer, VehicleId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of a server call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Network or protocol failure; the call may or may not have reached the server
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered but refused the command
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// The server answered with a payload that could not be used
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Plain `{success, message}` acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Whether the server applied the command
    pub success: bool,
    /// Free-text detail
    #[serde(default)]
    pub message: String,
}

/// Accept or decline decision for one offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondCommand {
    /// Request the offer refers to
    pub request_id: i64,
    /// Responding vehicle
    pub vehicle_id: VehicleId,
    /// `true` to accept
    pub accepted: bool,
}

/// One outbound position sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationReport {
    /// Reporting vehicle
    pub vehicle_id: VehicleId,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Reverse-geocoded address, empty when unknown
    pub address: String,
}

/// Commands and queries against the dispatch server
#[async_trait]
pub trait DispatchApi: Send + Sync + 'static {
    /// Send an accept/decline decision. Exactly one call per driver tap.
    async fn respond_to_offer(&self, command: RespondCommand) -> Result<Ack, ApiError>;

    /// Most recent assignment record for the vehicle, if any.
    async fn latest_assignment(
        &self,
        vehicle_id: VehicleId,
    ) -> Result<Option<AssignmentRecord>, ApiError>;

    /// Advance an assignment to `Arrived` or `Completed`; returns the echoed record.
    async fn update_assignment_status(
        &self,
        assignment_id: i64,
        status: AssignmentStatus,
    ) -> Result<Option<AssignmentRecord>, ApiError>;

    /// Publish a position sample. Fire-and-forget from the caller's perspective.
    async fn report_location(&self, report: LocationReport) -> Result<Ack, ApiError>;
}

/// Stream of offer events for one vehicle. `Err` items are unusable events.
pub type OfferStream = BoxStream<'static, Result<Offer, ApiError>>;

/// Push feed of offer events
#[async_trait]
pub trait OfferFeed: Send + Sync + 'static {
    /// Subscribe to offer events targeting `vehicle_id`.
    async fn subscribe(&self, vehicle_id: VehicleId) -> Result<OfferStream, ApiError>;
}
