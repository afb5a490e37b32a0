//! Table subscriptions and the filters that scope them.

use serde::{Deserialize, Serialize};
use sigor_database_models::{ChangeEvent, Table};
use uuid::Uuid;

/// Which rows of a table a subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum SubscriptionScope {
    /// Every row.
    All,
    /// Rows belonging to one organization.
    Organization(Uuid),
    /// Rows concerning one vehicle.
    Vehicle(Uuid),
    /// Rows concerning one user.
    User(Uuid),
}

impl SubscriptionScope {
    /// Rows that carry no value for the scoped column never match a
    /// narrowed scope.
    #[must_use]
    pub fn matches(self, event: &ChangeEvent) -> bool {
        let record = &event.record;
        match self {
            Self::All => true,
            Self::Organization(id) => record.organization_id() == Some(id),
            Self::Vehicle(id) => record.vehicle_id() == Some(id),
            Self::User(id) => record.user_id() == Some(id),
        }
    }
}

/// A live subscription to one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub table: Table,
    pub scope: SubscriptionScope,
}

impl Subscription {
    #[must_use]
    pub const fn new(table: Table, scope: SubscriptionScope) -> Self {
        Self { table, scope }
    }

    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.table() == self.table && self.scope.matches(event)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sigor_database_models::{ChangeRecord, VehicleCrewRow};

    use super::*;

    fn crew_event(user_id: Uuid, vehicle_id: Uuid) -> ChangeEvent {
        ChangeEvent::insert(ChangeRecord::Crew(VehicleCrewRow {
            id: Uuid::new_v4(),
            vehicle_id,
            user_id,
            joined_at: Utc::now(),
            left_at: None,
            is_active: true,
        }))
    }

    #[test]
    fn scope_filters_by_carried_column() {
        let user = Uuid::new_v4();
        let vehicle = Uuid::new_v4();
        let event = crew_event(user, vehicle);

        assert!(Subscription::new(Table::VehicleCrew, SubscriptionScope::User(user)).matches(&event));
        assert!(
            Subscription::new(Table::VehicleCrew, SubscriptionScope::Vehicle(vehicle))
                .matches(&event)
        );
        assert!(
            !Subscription::new(Table::VehicleCrew, SubscriptionScope::User(Uuid::new_v4()))
                .matches(&event)
        );
        assert!(!Subscription::new(Table::Dispatches, SubscriptionScope::All).matches(&event));
    }

    #[test]
    fn organization_scope_skips_rows_without_organization() {
        let event = crew_event(Uuid::new_v4(), Uuid::new_v4());
        assert!(!SubscriptionScope::Organization(Uuid::new_v4()).matches(&event));
    }
}
