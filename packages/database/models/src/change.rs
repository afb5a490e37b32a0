//! Row-level change notifications emitted after a committed write.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
    BaseRow, DispatchRow, OccurrenceHistoryRow, OccurrenceRow, OrganizationRow, VehicleCrewRow,
    VehicleRow,
};

/// A watched table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Table {
    Organizations,
    Bases,
    Vehicles,
    Occurrences,
    Dispatches,
    VehicleCrew,
    OccurrenceHistory,
}

impl Table {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Organizations,
            Self::Bases,
            Self::Vehicles,
            Self::Occurrences,
            Self::Dispatches,
            Self::VehicleCrew,
            Self::OccurrenceHistory,
        ]
    }
}

/// What happened to the row.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// The affected row, as it was after the write (or before, for deletes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "row", rename_all = "snake_case")]
pub enum ChangeRecord {
    Organization(OrganizationRow),
    Base(BaseRow),
    Vehicle(VehicleRow),
    Occurrence(OccurrenceRow),
    Dispatch(DispatchRow),
    Crew(VehicleCrewRow),
    History(OccurrenceHistoryRow),
}

impl ChangeRecord {
    #[must_use]
    pub const fn table(&self) -> Table {
        match self {
            Self::Organization(_) => Table::Organizations,
            Self::Base(_) => Table::Bases,
            Self::Vehicle(_) => Table::Vehicles,
            Self::Occurrence(_) => Table::Occurrences,
            Self::Dispatch(_) => Table::Dispatches,
            Self::Crew(_) => Table::VehicleCrew,
            Self::History(_) => Table::OccurrenceHistory,
        }
    }

    /// Primary key of the affected row.
    #[must_use]
    pub const fn entity_id(&self) -> Uuid {
        match self {
            Self::Organization(row) => row.id,
            Self::Base(row) => row.id,
            Self::Vehicle(row) => row.id,
            Self::Occurrence(row) => row.id,
            Self::Dispatch(row) => row.id,
            Self::Crew(row) => row.id,
            Self::History(row) => row.id,
        }
    }

    /// The state component of the row that makes two notifications about
    /// the same entity distinct. Two events with equal `(entity_id,
    /// status_key)` describe the same logical transition.
    #[must_use]
    pub fn status_key(&self) -> Option<&str> {
        match self {
            Self::Vehicle(row) => Some(row.status.as_ref()),
            Self::Occurrence(row) => Some(row.status.as_ref()),
            Self::Dispatch(row) => Some(row.status.as_ref()),
            Self::Crew(row) => Some(if row.is_active { "active" } else { "left" }),
            Self::Base(row) => Some(if row.is_active { "active" } else { "inactive" }),
            Self::Organization(_) | Self::History(_) => None,
        }
    }

    /// Organization the row belongs to, when the row carries one.
    #[must_use]
    pub const fn organization_id(&self) -> Option<Uuid> {
        match self {
            Self::Organization(row) => Some(row.id),
            Self::Base(row) => Some(row.organization_id),
            Self::Vehicle(row) => Some(row.organization_id),
            Self::Occurrence(row) => Some(row.organization_id),
            Self::Dispatch(row) => Some(row.organization_id),
            Self::Crew(_) | Self::History(_) => None,
        }
    }

    /// Vehicle the row concerns, when the row carries one.
    #[must_use]
    pub const fn vehicle_id(&self) -> Option<Uuid> {
        match self {
            Self::Vehicle(row) => Some(row.id),
            Self::Dispatch(row) => Some(row.vehicle_id),
            Self::Crew(row) => Some(row.vehicle_id),
            Self::Organization(_) | Self::Base(_) | Self::Occurrence(_) | Self::History(_) => {
                None
            }
        }
    }

    /// User the row concerns, when the row carries one.
    #[must_use]
    pub const fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::Crew(row) => Some(row.user_id),
            _ => None,
        }
    }
}

/// One committed row change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub operation: ChangeOperation,
    #[serde(flatten)]
    pub record: ChangeRecord,
}

impl ChangeEvent {
    #[must_use]
    pub const fn insert(record: ChangeRecord) -> Self {
        Self {
            operation: ChangeOperation::Insert,
            record,
        }
    }

    #[must_use]
    pub const fn update(record: ChangeRecord) -> Self {
        Self {
            operation: ChangeOperation::Update,
            record,
        }
    }

    #[must_use]
    pub const fn table(&self) -> Table {
        self.record.table()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sigor_dispatch_models::VehicleStatus;

    use super::*;

    fn vehicle(status: VehicleStatus) -> VehicleRow {
        let now = Utc::now();
        VehicleRow {
            id: Uuid::nil(),
            base_id: Uuid::nil(),
            organization_id: Uuid::from_u128(7),
            identifier: "USA-01".to_string(),
            vehicle_type: "ambulance".to_string(),
            capacity: Some(3),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn vehicle_record_exposes_scope() {
        let record = ChangeRecord::Vehicle(vehicle(VehicleStatus::Busy));
        assert_eq!(record.table(), Table::Vehicles);
        assert_eq!(record.status_key(), Some("busy"));
        assert_eq!(record.organization_id(), Some(Uuid::from_u128(7)));
        assert_eq!(record.vehicle_id(), Some(Uuid::nil()));
        assert_eq!(record.user_id(), None);
    }

    #[test]
    fn status_key_distinguishes_transitions() {
        let busy = ChangeRecord::Vehicle(vehicle(VehicleStatus::Busy));
        let available = ChangeRecord::Vehicle(vehicle(VehicleStatus::Available));
        assert_eq!(busy.entity_id(), available.entity_id());
        assert_ne!(busy.status_key(), available.status_key());
    }
}
