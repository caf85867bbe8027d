//! Wire shapes of the dispatch server and their mapping to the domain
//!
//! Ids arrive as numbers or strings, coordinates may be missing, and the
//! offer TTL may be null. Mapping is lenient where the domain has a fallback
//! and strict where it does not: an offer without coordinates is rejected,
//! while an assignment record without coordinates is kept with no location.

use chrono::{DateTime, Utc};
use resq_core::GeoPoint;
use resq_domain::{
    parse_int_id, AssignmentRecord, Offer, RecordRequest, RequestId, RequestSnapshot, Requester,
    VehicleId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct NamedDto {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CivilianDto {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OfferRequestDto {
    pub id: Value,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default, rename = "proofImageURL")]
    pub proof_image_url: Option<String>,
    #[serde(default)]
    pub emergency_sub_category: Option<NamedDto>,
    #[serde(default)]
    pub civilian: Option<CivilianDto>,
}

/// One `onVehicleAssignmentOffered` event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OfferPayload {
    pub request: OfferRequestDto,
    #[serde(default)]
    pub is_cancelled: bool,
    pub offered_at: String,
    #[serde(default)]
    pub offer_ttl_seconds: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecordRequestDto {
    pub id: Value,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "proofImageURL")]
    pub proof_image_url: Option<String>,
    #[serde(default)]
    pub emergency_sub_category: Option<NamedDto>,
    #[serde(default)]
    pub civilian: Option<CivilianDto>,
}

/// One entry of the `assignments` query
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AssignmentDto {
    pub id: Value,
    #[serde(default)]
    pub rescue_vehicle_request: Option<RecordRequestDto>,
}

/// `{success, message}` mutation result
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub(crate) struct AckDto {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

fn request_id(value: &Value) -> Result<RequestId> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(RequestId(s.trim().to_string())),
        Value::Number(n) => Ok(RequestId(n.to_string())),
        other => Err(GatewayError::Malformed(format!("unusable request id {}", other))),
    }
}

fn location(latitude: Option<f64>, longitude: Option<f64>) -> Option<GeoPoint> {
    match (latitude, longitude) {
        (Some(lat), Some(lng)) => GeoPoint::new(lat, lng).ok(),
        _ => None,
    }
}

fn requester(civilian: Option<CivilianDto>) -> Option<Requester> {
    let civilian = civilian?;
    let requester = Requester {
        name: non_empty(civilian.name),
        phone: non_empty(civilian.phone_number),
    };
    if requester.is_empty() {
        None
    } else {
        Some(requester)
    }
}

fn category(named: Option<NamedDto>) -> Option<String> {
    non_empty(named.and_then(|n| n.name))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl OfferPayload {
    /// Domain offer for `vehicle_id`. Missing coordinates or an unreadable
    /// `offeredAt` make the event unusable.
    pub(crate) fn into_offer(self, vehicle_id: VehicleId) -> Result<Offer> {
        let req = self.request;
        let id = request_id(&req.id)?;
        let location = location(req.latitude, req.longitude).ok_or_else(|| {
            GatewayError::Malformed(format!("offer for request {} has no usable coordinates", id))
        })?;
        let offered_at = DateTime::parse_from_rfc3339(&self.offered_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| GatewayError::Malformed(format!("offeredAt '{}': {}", self.offered_at, e)))?;
        let ttl_seconds = self
            .offer_ttl_seconds
            .and_then(|t| u32::try_from(t).ok())
            .unwrap_or(0);

        Ok(Offer {
            vehicle_id,
            request: RequestSnapshot {
                id,
                address: non_empty(req.address),
                created_at: req.created_at,
                description: non_empty(req.description),
                location,
                proof_image_url: non_empty(req.proof_image_url),
                category: category(req.emergency_sub_category),
                requester: requester(req.civilian),
            },
            offered_at,
            ttl_seconds,
            is_cancelled: self.is_cancelled,
        })
    }
}

impl AssignmentDto {
    pub(crate) fn into_record(self) -> Result<AssignmentRecord> {
        let id = parse_int_id(&self.id)
            .ok_or_else(|| GatewayError::Malformed(format!("unusable assignment id {}", self.id)))?;
        let req = self.rescue_vehicle_request.ok_or_else(|| {
            GatewayError::Malformed(format!("assignment {} has no request", id))
        })?;

        Ok(AssignmentRecord {
            id,
            request: RecordRequest {
                id: request_id(&req.id)?,
                status: req.status.unwrap_or_default(),
                location: location(req.latitude, req.longitude),
                address: non_empty(req.address),
                description: non_empty(req.description),
                proof_image_url: non_empty(req.proof_image_url),
                category: category(req.emergency_sub_category),
                requester: requester(req.civilian),
            },
        })
    }
}
