//! Gateway error types

use resq_dispatch::{ApiError, RouteError};
use thiserror::Error;

/// Failures talking to the dispatch server or the routing provider
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Non-success HTTP status
    #[error("Server returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// The server answered with GraphQL errors
    #[error("GraphQL errors: {0}")]
    Graphql(String),

    /// The response did not have the expected shape
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The subscription protocol was violated
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid endpoint URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Graphql(msg) => ApiError::Rejected(msg),
            GatewayError::Malformed(msg) => ApiError::Malformed(msg),
            GatewayError::Serialization(e) => ApiError::Malformed(e.to_string()),
            other => ApiError::Transport(other.to_string()),
        }
    }
}

impl From<GatewayError> for RouteError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Malformed(msg) => RouteError::InvalidResponse(msg),
            GatewayError::Serialization(e) => RouteError::InvalidResponse(e.to_string()),
            other => RouteError::Unavailable(other.to_string()),
        }
    }
}
