//! End-to-end scenarios for the vehicle dispatch core
//!
//! This test suite validates:
//! - offer lifetime, countdown reset and alert de-duplication
//! - accept/decline against server confirmation and reconciliation polls
//! - status advances and their effect on route, polling and driver actions
//! - location fallback and capability failures
//! - the real subscription adapter feeding a running core

pub mod test_utils;

#[cfg(test)]
mod offer_lifecycle_tests;

#[cfg(test)]
mod assignment_flow_tests;

#[cfg(test)]
mod location_tests;

#[cfg(test)]
mod gateway_feed_tests;
