//! Domain model for the ResQ vehicle dispatch core
//!
//! This crate contains pure domain logic with no I/O dependencies:
//! - Session identity of the logged-in vehicle
//! - Dispatch offers, their lifetime and countdown projection
//! - Accepted assignments and server status classification
//! - Vehicle position samples

pub mod assignment;
pub mod error;
pub mod media;
pub mod offer;
pub mod position;
pub mod session;

pub use assignment::{Assignment, AssignmentRecord, AssignmentStatus, RecordRequest, Tracked};
pub use error::{DomainError, Result};
pub use media::resolve_image_url;
pub use offer::{Countdown, Offer, OfferKey, RequestId, RequestSnapshot, Requester};
pub use position::VehiclePosition;
pub use session::{parse_int_id, Session, VehicleId, SESSION_INFO_KEY, SESSION_TOKEN_KEY};
