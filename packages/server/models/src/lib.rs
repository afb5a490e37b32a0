#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the sigor dispatch server.
//!
//! These types are serialized to JSON for the REST API. They are separate
//! from the database row types to allow independent evolution of the API
//! contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigor_database_models::{
    BaseRow, DispatchRow, OccurrenceFilter, OccurrenceHistoryRow, OccurrenceRow, OrganizationRow,
    VehicleCrewRow, VehicleRow,
};
use sigor_dispatch_models::{
    DispatchStatus, OccurrenceStatus, OccurrenceType, OrganizationType, PriorityLevel,
    VehicleStatus,
};
use uuid::Uuid;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
}

/// One offending request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiFieldError {
    pub field: String,
    pub message: String,
}

/// Error body returned with every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Stable snake_case error code.
    pub error: String,
    /// Text suitable for showing to the user.
    pub message: String,
    /// Field errors, for validation failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<ApiFieldError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiOrganization {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub organization_type: OrganizationType,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<OrganizationRow> for ApiOrganization {
    fn from(row: OrganizationRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            code: row.code,
            organization_type: row.organization_type,
            phone: row.phone,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiBase {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_active: bool,
}

impl From<BaseRow> for ApiBase {
    fn from(row: BaseRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            address: row.address,
            latitude: row.latitude,
            longitude: row.longitude,
            is_active: row.is_active,
        }
    }
}

/// A vehicle as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiVehicle {
    pub id: Uuid,
    pub base_id: Uuid,
    pub organization_id: Uuid,
    /// Human code, e.g. `USA-01`.
    pub identifier: String,
    pub vehicle_type: String,
    pub capacity: Option<i32>,
    pub status: VehicleStatus,
    pub updated_at: DateTime<Utc>,
}

impl From<VehicleRow> for ApiVehicle {
    fn from(row: VehicleRow) -> Self {
        Self {
            id: row.id,
            base_id: row.base_id,
            organization_id: row.organization_id,
            identifier: row.identifier,
            vehicle_type: row.vehicle_type,
            capacity: row.capacity,
            status: row.status,
            updated_at: row.updated_at,
        }
    }
}

/// An occurrence as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiOccurrence {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Human-readable code, e.g. `SAMU-2026-00042`.
    pub code: String,
    pub occurrence_type: OccurrenceType,
    pub priority: PriorityLevel,
    pub status: OccurrenceStatus,
    /// Whether the occurrence is completed or cancelled.
    pub closed: bool,
    pub title: String,
    pub description: Option<String>,
    pub caller_name: Option<String>,
    pub caller_phone: Option<String>,
    pub location_address: Option<String>,
    pub location_reference: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<Uuid>,
}

impl From<OccurrenceRow> for ApiOccurrence {
    fn from(row: OccurrenceRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            code: row.code,
            occurrence_type: row.occurrence_type,
            priority: row.priority,
            closed: row.status.is_terminal(),
            status: row.status,
            title: row.title,
            description: row.description,
            caller_name: row.caller_name,
            caller_phone: row.caller_phone,
            location_address: row.location_address,
            location_reference: row.location_reference,
            latitude: row.latitude,
            longitude: row.longitude,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            closed_at: row.closed_at,
            closed_by: row.closed_by,
        }
    }
}

/// A dispatch as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDispatch {
    pub id: Uuid,
    pub occurrence_id: Uuid,
    pub vehicle_id: Uuid,
    pub dispatched_by: Uuid,
    pub status: DispatchStatus,
    pub dispatched_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl From<DispatchRow> for ApiDispatch {
    fn from(row: DispatchRow) -> Self {
        Self {
            id: row.id,
            occurrence_id: row.occurrence_id,
            vehicle_id: row.vehicle_id,
            dispatched_by: row.dispatched_by,
            status: row.status,
            dispatched_at: row.dispatched_at,
            acknowledged_at: row.acknowledged_at,
            arrived_at: row.arrived_at,
            completed_at: row.completed_at,
            notes: row.notes,
        }
    }
}

/// One audit record of an occurrence's status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHistoryEntry {
    pub id: Uuid,
    pub dispatch_id: Option<Uuid>,
    pub previous_status: Option<OccurrenceStatus>,
    pub new_status: OccurrenceStatus,
    pub changed_by: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<OccurrenceHistoryRow> for ApiHistoryEntry {
    fn from(row: OccurrenceHistoryRow) -> Self {
        Self {
            id: row.id,
            dispatch_id: row.dispatch_id,
            previous_status: row.previous_status,
            new_status: row.new_status,
            changed_by: row.changed_by,
            notes: row.notes,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCrewMember {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl From<VehicleCrewRow> for ApiCrewMember {
    fn from(row: VehicleCrewRow) -> Self {
        Self {
            id: row.id,
            vehicle_id: row.vehicle_id,
            user_id: row.user_id,
            joined_at: row.joined_at,
            left_at: row.left_at,
            is_active: row.is_active,
        }
    }
}

/// The vehicle a user is on and their membership record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCrewAssignment {
    pub crew: ApiCrewMember,
    pub vehicle: ApiVehicle,
}

/// A dispatch together with the occurrence state it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDispatchResult {
    pub dispatch: ApiDispatch,
    pub occurrence: ApiOccurrence,
}

/// Body of `POST /api/occurrences/{id}/status`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAdvanceOccurrence {
    pub status: OccurrenceStatus,
    pub notes: Option<String>,
}

/// Body of `POST /api/occurrences/{id}/dispatches`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAssignVehicle {
    pub vehicle_id: Uuid,
    pub notes: Option<String>,
}

/// Body of `POST /api/dispatches/{id}/status`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAdvanceDispatch {
    pub status: DispatchStatus,
    pub notes: Option<String>,
}

/// Body of `PUT /api/vehicles/{id}/service-status`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServiceStatus {
    pub status: VehicleStatus,
}

/// Query parameters for the occurrences endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceQueryParams {
    /// Comma-separated list of statuses to include. Terminal statuses are
    /// ignored; empty means every open status.
    pub statuses: Option<String>,
    /// Comma-separated list of occurrence types to include.
    pub types: Option<String>,
    pub priority: Option<PriorityLevel>,
    pub organization_id: Option<Uuid>,
    /// Free-text search over code, title and address.
    pub search: Option<String>,
    /// Start of the creation window (ISO 8601).
    pub from: Option<DateTime<Utc>>,
    /// End of the creation window (ISO 8601).
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<u32>,
}

impl From<&OccurrenceQueryParams> for OccurrenceFilter {
    fn from(p: &OccurrenceQueryParams) -> Self {
        Self {
            organization_id: p.organization_id,
            statuses: parse_list(p.statuses.as_deref()),
            types: parse_list(p.types.as_deref()),
            priority: p.priority,
            search: p
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            created_from: p.from,
            created_to: p.to,
            limit: p.limit,
        }
    }
}

/// Query parameters for the event stream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQueryParams {
    /// Organization whose dashboard the session follows.
    pub organization_id: Option<Uuid>,
    pub sound_enabled: Option<bool>,
    /// Playback volume between 0 and 1.
    pub sound_volume: Option<f32>,
    pub critical_alerts: Option<bool>,
    pub high_priority_alerts: Option<bool>,
}

/// Parses a comma-separated list, skipping unknown entries.
fn parse_list<T: std::str::FromStr>(value: Option<&str>) -> Vec<T> {
    value
        .map(|s| s.split(',').filter_map(|c| c.trim().parse().ok()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_build_filter() {
        let params: OccurrenceQueryParams = serde_json::from_value(serde_json::json!({
            "statuses": "pending, en_route,bogus",
            "types": "fire,rescue",
            "priority": "critical",
            "search": "  ",
            "limit": 20,
        }))
        .unwrap();

        let filter = OccurrenceFilter::from(&params);
        assert_eq!(
            filter.statuses,
            vec![OccurrenceStatus::Pending, OccurrenceStatus::EnRoute]
        );
        assert_eq!(
            filter.types,
            vec![OccurrenceType::Fire, OccurrenceType::Rescue]
        );
        assert_eq!(filter.priority, Some(PriorityLevel::Critical));
        assert_eq!(filter.search, None);
        assert_eq!(filter.limit, Some(20));
    }

    #[test]
    fn error_body_omits_empty_fields() {
        let body = serde_json::to_value(ApiError {
            error: "not_found".to_string(),
            message: "gone".to_string(),
            fields: Vec::new(),
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "error": "not_found", "message": "gone" })
        );
    }
}
