//! Vehicle position samples

use chrono::{DateTime, Utc};
use resq_core::GeoPoint;
use serde::{Deserialize, Serialize};

/// Latest known position of this vehicle. Only the newest sample is kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub point: GeoPoint,
    pub sampled_at: DateTime<Utc>,
}

impl VehiclePosition {
    pub fn new(point: GeoPoint, sampled_at: DateTime<Utc>) -> Self {
        Self { point, sampled_at }
    }

    /// Age of the sample relative to `now`, zero for samples from the future.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.sampled_at)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_age() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let p = VehiclePosition::new(GeoPoint { lat: 1.0, lng: 2.0 }, t);
        assert_eq!(p.age(t + chrono::Duration::seconds(9)).as_secs(), 9);
        assert_eq!(p.age(t - chrono::Duration::seconds(1)).as_secs(), 0);
    }
}
