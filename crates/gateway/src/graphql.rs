//! GraphQL over HTTP
//!
//! Every command and query goes out as a JSON `POST` of `{query, variables}`
//! carrying the session's bearer token. The response envelope is unpacked
//! here so callers only ever see typed data or a [`GatewayError`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{GatewayError, Result};

/// Longest response body kept in a status error
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: &'a Value,
}

/// Standard GraphQL response envelope
#[derive(Debug, Deserialize)]
pub(crate) struct GraphqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphqlErrorEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub(crate) struct GraphqlErrorEntry {
    pub message: String,
}

impl<T> GraphqlResponse<T> {
    /// Errors win over data; a response with neither is malformed.
    pub(crate) fn into_result(self) -> Result<T> {
        if !self.errors.is_empty() {
            let joined = self
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(GatewayError::Graphql(joined));
        }
        self.data
            .ok_or_else(|| GatewayError::Malformed("response carried no data".to_string()))
    }
}

/// Authenticated GraphQL HTTP client
#[derive(Clone)]
pub struct GraphqlClient {
    http: reqwest::Client,
    endpoint: Url,
    token: String,
}

impl GraphqlClient {
    /// Create a client for `endpoint` that authenticates with `token`.
    pub fn new(endpoint: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: Url::parse(endpoint)?,
            token: token.into(),
        })
    }

    /// Endpoint this client posts to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Run one operation and decode its `data` member.
    pub async fn execute<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let body = GraphqlRequest {
            query,
            variables: &variables,
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .header("GraphQL-Preflight", "1")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            text.truncate(MAX_ERROR_BODY);
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let raw = response.bytes().await?;
        debug!(endpoint = %self.endpoint, bytes = raw.len(), "GraphQL response received");
        let envelope: GraphqlResponse<T> = serde_json::from_slice(&raw)?;
        envelope.into_result()
    }
}
