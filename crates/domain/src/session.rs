//! Vehicle session identity
//!
//! The authentication collaborator stores two entries after a successful
//! login: the bearer token and a JSON record describing the vehicle. A
//! session exists only when both are present and the record carries a
//! usable vehicle id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, Result};

/// Storage key holding the bearer token
pub const SESSION_TOKEN_KEY: &str = "resq.rv.jwt";
/// Storage key holding the vehicle record
pub const SESSION_INFO_KEY: &str = "resq.rv.info";

/// Server-side rescue vehicle identifier
pub type VehicleId = i64;

/// Authenticated vehicle identity, immutable for the life of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub vehicle_id: VehicleId,
    pub code: String,
    pub plate_number: String,
    pub category: Option<String>,
    pub token: String,
}

/// Vehicle record as written by the login flow
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredVehicle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rescue_vehicle_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vehicle_id: Option<Value>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    plate_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rescue_vehicle_category: Option<StoredCategory>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct StoredCategory {
    #[serde(default)]
    name: Option<String>,
}

/// Parse an integer id from a JSON number or numeric string.
pub fn parse_int_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

impl Session {
    /// Rebuild a session from the two stored entries.
    pub fn from_stored(token: &str, info_json: &str) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(DomainError::MissingField("token"));
        }

        let stored: StoredVehicle = serde_json::from_str(info_json)?;
        let raw_id = stored
            .id
            .as_ref()
            .or(stored.rescue_vehicle_id.as_ref())
            .or(stored.vehicle_id.as_ref())
            .ok_or(DomainError::MissingField("id"))?;
        let vehicle_id =
            parse_int_id(raw_id).ok_or_else(|| DomainError::InvalidId(raw_id.to_string()))?;

        Ok(Self {
            vehicle_id,
            code: stored.code.unwrap_or_default(),
            plate_number: stored.plate_number.unwrap_or_default(),
            category: stored.rescue_vehicle_category.and_then(|c| c.name),
            token: token.to_string(),
        })
    }

    /// Serialize the vehicle record in the shape the login flow writes.
    pub fn to_stored_info(&self) -> Result<String> {
        let stored = StoredVehicle {
            id: Some(Value::String(self.vehicle_id.to_string())),
            code: Some(self.code.clone()),
            plate_number: Some(self.plate_number.clone()),
            rescue_vehicle_category: self.category.clone().map(|name| StoredCategory {
                name: Some(name),
            }),
            ..StoredVehicle::default()
        };
        Ok(serde_json::to_string(&stored)?)
    }
}
