//! Dispatch core errors

use thiserror::Error;

use crate::api::ApiError;

/// Errors surfaced to callers of the vehicle core
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No authenticated vehicle; the caller should send the user to login
    #[error("No vehicle session")]
    NoSession,

    /// A response for the current offer is already on its way
    #[error("A response for offer {0} is already in flight")]
    ResponseInFlight(String),

    /// Request or vehicle id could not be converted for the respond command
    #[error("Invalid ids for respond: request_id={request_id}, vehicle_id={vehicle_id}")]
    InvalidIds {
        /// Request id as received
        request_id: String,
        /// Vehicle id of the session
        vehicle_id: i64,
    },

    /// Status advance requested with no local assignment
    #[error("No active assignment")]
    NoAssignment,

    /// Status advance requested before the server confirmed an assignment id
    #[error("Assignment id not yet known")]
    UnknownAssignment,

    /// A status update is already on its way
    #[error("A status update for assignment {0} is already in flight")]
    StatusUpdateInFlight(i64),

    /// Server call failed
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Session persistence failed
    #[error("Session store error: {0}")]
    SessionStore(String),

    /// The core has been shut down
    #[error("Vehicle core stopped")]
    Stopped,
}

impl From<rusqlite::Error> for DispatchError {
    fn from(e: rusqlite::Error) -> Self {
        DispatchError::SessionStore(e.to_string())
    }
}

impl From<resq_domain::DomainError> for DispatchError {
    fn from(e: resq_domain::DomainError) -> Self {
        DispatchError::SessionStore(e.to_string())
    }
}

/// Result alias for the dispatch core
pub type Result<T> = std::result::Result<T, DispatchError>;
