//! [`DispatchApi`] over GraphQL

use async_trait::async_trait;
use resq_core::ServerConfig;
use resq_dispatch::{Ack, ApiError, DispatchApi, LocationReport, RespondCommand};
use resq_domain::{AssignmentRecord, AssignmentStatus, Session, VehicleId};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::graphql::GraphqlClient;
use crate::wire::{AckDto, AssignmentDto};

/// Accept or decline an offer
pub const RESPOND_TO_ASSIGNMENT: &str = r#"
mutation RespondToAssignment($input: VehicleAssignmentResponseInput!) {
  respondToAssignment(input: $input) {
    success
    message
  }
}"#;

/// Most recent assignments of a vehicle, newest first
pub const ONGOING_BY_VEHICLE: &str = r#"
query OngoingByVehicle($rescueVehicleId: Int!) {
  assignments(
    where: { rescueVehicleId: { eq: $rescueVehicleId } }
    order: { id: DESC }
  ) {
    id
    rescueVehicleRequest {
      id
      status
      latitude
      longitude
      address
      description
      createdAt
      emergencySubCategory { name }
      proofImageURL
      civilian { name phoneNumber }
    }
  }
}"#;

/// Advance an assignment's status
pub const UPDATE_ASSIGNMENT_STATUS: &str = r#"
mutation UpdateAssignmentStatus($input: UpdateAssignmentStatusInput!) {
  updateAssignmentStatus(input: $input) {
    id
    rescueVehicleRequest {
      id
      status
      latitude
      longitude
      address
      description
      emergencySubCategory { name }
      proofImageURL
    }
  }
}"#;

/// Publish the vehicle position
pub const HANDLE_RESCUE_VEHICLE_LOCATION: &str = r#"
mutation HandleRescueVehicleLocation($input: RescueVehicleLocationInput!) {
  handleRescueVehicleLocation(input: $input) {
    success
    message
  }
}"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondData {
    respond_to_assignment: AckDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationData {
    handle_rescue_vehicle_location: AckDto,
}

#[derive(Debug, Deserialize)]
struct AssignmentsData {
    #[serde(default)]
    assignments: Option<Vec<AssignmentDto>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusData {
    #[serde(default)]
    update_assignment_status: Option<AssignmentDto>,
}

fn ack(dto: AckDto) -> Ack {
    Ack {
        success: dto.success,
        message: dto.message.unwrap_or_default(),
    }
}

/// Dispatch server client for one authenticated session
#[derive(Clone)]
pub struct GraphqlDispatchApi {
    client: GraphqlClient,
}

impl GraphqlDispatchApi {
    /// Wrap an existing GraphQL client.
    pub fn new(client: GraphqlClient) -> Self {
        Self { client }
    }

    /// Client for `session` against the configured HTTP endpoint.
    pub fn for_session(server: &ServerConfig, session: &Session) -> Result<Self> {
        let client = GraphqlClient::new(
            &server.graphql_http_url,
            session.token.clone(),
            server.request_timeout(),
        )?;
        Ok(Self::new(client))
    }
}

fn first_record(assignments: Option<Vec<AssignmentDto>>) -> Result<Option<AssignmentRecord>> {
    assignments
        .and_then(|list| list.into_iter().next())
        .map(AssignmentDto::into_record)
        .transpose()
}

#[async_trait]
impl DispatchApi for GraphqlDispatchApi {
    #[instrument(skip(self), fields(request_id = command.request_id))]
    async fn respond_to_offer(&self, command: RespondCommand) -> std::result::Result<Ack, ApiError> {
        let data: RespondData = self
            .client
            .execute(RESPOND_TO_ASSIGNMENT, json!({ "input": command }))
            .await?;
        Ok(ack(data.respond_to_assignment))
    }

    async fn latest_assignment(
        &self,
        vehicle_id: VehicleId,
    ) -> std::result::Result<Option<AssignmentRecord>, ApiError> {
        let data: AssignmentsData = self
            .client
            .execute(ONGOING_BY_VEHICLE, json!({ "rescueVehicleId": vehicle_id }))
            .await?;
        let record = first_record(data.assignments)?;
        debug!(vehicle_id, found = record.is_some(), "Latest assignment fetched");
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn update_assignment_status(
        &self,
        assignment_id: i64,
        status: AssignmentStatus,
    ) -> std::result::Result<Option<AssignmentRecord>, ApiError> {
        let input = json!({
            "input": { "assignmentId": assignment_id, "status": status.as_wire() }
        });
        let data: StatusData = self.client.execute(UPDATE_ASSIGNMENT_STATUS, input).await?;
        Ok(data
            .update_assignment_status
            .map(AssignmentDto::into_record)
            .transpose()?)
    }

    async fn report_location(&self, report: LocationReport) -> std::result::Result<Ack, ApiError> {
        let data: LocationData = self
            .client
            .execute(HANDLE_RESCUE_VEHICLE_LOCATION, location_input(&report))
            .await?;
        Ok(ack(data.handle_rescue_vehicle_location))
    }
}

/// `RescueVehicleLocationInput` keys the vehicle as `rescueVehicleId`.
fn location_input(report: &LocationReport) -> serde_json::Value {
    json!({
        "input": {
            "rescueVehicleId": report.vehicle_id,
            "latitude": report.latitude,
            "longitude": report.longitude,
            "address": report.address,
        }
    })
}
