//! Network adapters for the ResQ dispatch core
//!
//! Implements the collaborator traits of `resq-dispatch` against the real
//! dispatch server:
//! - [`GraphqlDispatchApi`]: commands and queries as GraphQL over HTTP
//! - [`GraphqlOfferFeed`]: pushed offers over a `graphql-transport-ws` subscription
//! - [`OsrmRouteProvider`]: driving routes from an OSRM-compatible service

pub mod client;
pub mod error;
pub mod graphql;
pub mod routing;
pub mod subscription;
mod wire;

pub use client::GraphqlDispatchApi;
pub use error::{GatewayError, Result};
pub use graphql::GraphqlClient;
pub use routing::OsrmRouteProvider;
pub use subscription::GraphqlOfferFeed;
