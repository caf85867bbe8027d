//! Dispatch offers
//!
//! An offer proposes one rescue request to one vehicle. It is valid only
//! while `now < offered_at + ttl` and it has not been cancelled. A repeat
//! notification for the same request with a new `offered_at` is a new offer
//! with a fresh lifetime.

use chrono::{DateTime, Utc};
use resq_core::GeoPoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::session::VehicleId;

/// Request identifier as delivered by the server (number or string on the wire)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    /// Integer form required by the respond command.
    pub fn as_i64(&self) -> Option<i64> {
        self.0.trim().parse().ok()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Person who raised the request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl Requester {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none()
    }
}

/// The rescue request an offer refers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub id: RequestId,
    pub address: Option<String>,
    pub created_at: Option<String>,
    pub description: Option<String>,
    pub location: GeoPoint,
    pub proof_image_url: Option<String>,
    pub category: Option<String>,
    pub requester: Option<Requester>,
}

/// Notification identity used to de-duplicate alerts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferKey {
    pub request_id: RequestId,
    pub offered_at: DateTime<Utc>,
}

impl fmt::Display for OfferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.request_id, self.offered_at.to_rfc3339())
    }
}

/// One dispatch proposal for this vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub vehicle_id: VehicleId,
    pub request: RequestSnapshot,
    pub offered_at: DateTime<Utc>,
    /// Lifetime in seconds as sent by the server; zero means "use the default".
    pub ttl_seconds: u32,
    pub is_cancelled: bool,
}

/// Projection of the remaining lifetime for display
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Countdown {
    /// Whole seconds left, rounded up, clamped to `[0, ttl]`
    pub seconds_left: u32,
    /// Fraction of the lifetime left, clamped to `[0, 100]`
    pub percent_left: f32,
}

impl Countdown {
    pub fn is_elapsed(&self) -> bool {
        self.seconds_left == 0
    }
}

impl Offer {
    pub fn key(&self) -> OfferKey {
        OfferKey {
            request_id: self.request.id.clone(),
            offered_at: self.offered_at,
        }
    }

    /// Lifetime in seconds, substituting `default_ttl` when the server sent none.
    pub fn effective_ttl(&self, default_ttl: u32) -> u32 {
        if self.ttl_seconds == 0 {
            default_ttl
        } else {
            self.ttl_seconds
        }
    }

    pub fn ends_at(&self, default_ttl: u32) -> DateTime<Utc> {
        self.offered_at + chrono::Duration::seconds(i64::from(self.effective_ttl(default_ttl)))
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>, default_ttl: u32) -> bool {
        !self.is_cancelled && now < self.ends_at(default_ttl)
    }

    /// Time until expiry, zero if already past.
    pub fn remaining(&self, now: DateTime<Utc>, default_ttl: u32) -> Duration {
        (self.ends_at(default_ttl) - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn countdown(&self, now: DateTime<Utc>, default_ttl: u32) -> Countdown {
        let ttl = self.effective_ttl(default_ttl);
        let remaining_ms = (self.ends_at(default_ttl) - now).num_milliseconds().max(0);
        let ceil_secs = (remaining_ms + 999) / 1000;
        let seconds_left = ceil_secs.clamp(0, i64::from(ttl)) as u32;
        let percent_left = if ttl == 0 {
            0.0
        } else {
            (seconds_left as f32 / ttl as f32 * 100.0).clamp(0.0, 100.0)
        };
        Countdown {
            seconds_left,
            percent_left,
        }
    }
}
