#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Database row types, write payloads and query filters.
//!
//! These types represent the shapes of data as stored in and retrieved from
//! the dispatch store. They are distinct from the API request/response
//! types in `sigor_server_models`.

pub mod change;
pub mod filter;

pub use change::{ChangeEvent, ChangeOperation, ChangeRecord, Table};
pub use filter::OccurrenceFilter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigor_dispatch_models::{
    DispatchStatus, OccurrenceStatus, OccurrenceType, OrganizationType, PriorityLevel,
    VehicleStatus,
};
use uuid::Uuid;

/// A dispatch authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationRow {
    pub id: Uuid,
    pub name: String,
    /// Short unique code, also the prefix of occurrence codes.
    pub code: String,
    pub organization_type: OrganizationType,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A physical dispatch point owned by an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A dispatchable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleRow {
    pub id: Uuid,
    pub base_id: Uuid,
    /// Owning organization of the base, denormalized for scoping.
    pub organization_id: Uuid,
    /// Human code, unique within the organization.
    pub identifier: String,
    /// Free-form vehicle kind (ambulance, patrol car, ladder truck...).
    pub vehicle_type: String,
    pub capacity: Option<i32>,
    pub status: VehicleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Human-readable unique code, e.g. `SAMU-2026-00042`.
    pub code: String,
    pub occurrence_type: OccurrenceType,
    pub priority: PriorityLevel,
    pub status: OccurrenceStatus,
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
    /// Set on entering a terminal status.
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<Uuid>,
}

/// The binding of one vehicle to one occurrence for one response episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRow {
    pub id: Uuid,
    pub occurrence_id: Uuid,
    pub vehicle_id: Uuid,
    /// Organization of the parent occurrence, denormalized for scoping.
    pub organization_id: Uuid,
    pub dispatched_by: Uuid,
    pub status: DispatchStatus,
    pub dispatched_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// One append-only audit record of an occurrence or dispatch transition.
///
/// Dispatch transitions carry `dispatch_id` and record dispatch statuses
/// by their occurrence-status name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceHistoryRow {
    pub id: Uuid,
    /// Store-assigned, strictly increasing across all history rows.
    pub seq: i64,
    pub occurrence_id: Uuid,
    pub dispatch_id: Option<Uuid>,
    pub previous_status: Option<OccurrenceStatus>,
    pub new_status: OccurrenceStatus,
    pub changed_by: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A shift-membership record binding one user to one vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleCrewRow {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    /// `None` while the membership is active.
    pub left_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// A history row to append; the store assigns `id` and `seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub occurrence_id: Uuid,
    pub dispatch_id: Option<Uuid>,
    pub previous_status: Option<OccurrenceStatus>,
    pub new_status: OccurrenceStatus,
    pub changed_by: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Columns written by a conditional occurrence status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccurrenceStatusUpdate {
    pub status: OccurrenceStatus,
    pub updated_at: DateTime<Utc>,
    /// Written only when the column is still empty.
    pub closed_at: Option<DateTime<Utc>>,
    /// Written only when the column is still empty.
    pub closed_by: Option<Uuid>,
}

impl OccurrenceStatusUpdate {
    /// Builds the update for moving into `status` at `at`, closing the
    /// occurrence when `status` is terminal.
    #[must_use]
    pub const fn new(status: OccurrenceStatus, at: DateTime<Utc>, actor: Uuid) -> Self {
        let terminal = status.is_terminal();
        Self {
            status,
            updated_at: at,
            closed_at: if terminal { Some(at) } else { None },
            closed_by: if terminal { Some(actor) } else { None },
        }
    }
}

/// Columns written by a conditional dispatch status update. The timestamp
/// column stamped is chosen by [`DispatchStatus::stamps`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStatusUpdate {
    pub status: DispatchStatus,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_update_closes_occurrence() {
        let at = Utc::now();
        let actor = Uuid::new_v4();

        let update = OccurrenceStatusUpdate::new(OccurrenceStatus::Cancelled, at, actor);
        assert_eq!(update.closed_at, Some(at));
        assert_eq!(update.closed_by, Some(actor));

        let update = OccurrenceStatusUpdate::new(OccurrenceStatus::EnRoute, at, actor);
        assert_eq!(update.closed_at, None);
        assert_eq!(update.closed_by, None);
    }
}
