//! Core functionality for the ResQ vehicle dispatch system.
//!
//! This crate provides the ambient pieces shared by every other crate in the
//! workspace: configuration loading, the common error type, logging
//! initialization, and the geographic and clock primitives the dispatch core
//! is built on.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{Config, RoutingConfig, ServerConfig, SessionConfig, TimingConfig};
pub use error::{Error, Result};
pub use types::{Bounds, Clock, GeoPoint, ManualClock, SystemClock, TokioClock};
