//! Shared setup for engine tests.

use sigor_database::MemoryStore;
use sigor_database_models::{BaseRow, OccurrenceRow, OrganizationRow, VehicleRow};
use sigor_dispatch_models::{AppRole, OccurrenceType, OrganizationType, PriorityLevel};
use uuid::Uuid;

use crate::{
    Actor, NewBase, NewOccurrence, NewOrganization, NewVehicle, create_base, create_occurrence,
    create_organization, register_vehicle,
};

/// One SAMU organization with a single base, an admin and a dispatcher.
pub struct Fixture {
    pub store: MemoryStore,
    pub admin: Actor,
    pub dispatcher: Actor,
    pub organization: OrganizationRow,
    pub base: BaseRow,
}

impl Fixture {
    pub async fn new() -> Self {
        let store = MemoryStore::new();
        let admin = Actor::new(Uuid::new_v4(), AppRole::Admin);
        let dispatcher = Actor::new(Uuid::new_v4(), AppRole::DispatcherSamu);

        let organization = create_organization(
            &store,
            &admin,
            &NewOrganization {
                name: "SAMU Regional".to_string(),
                code: "SAMU".to_string(),
                organization_type: OrganizationType::Samu,
                phone: Some("192".to_string()),
            },
        )
        .await
        .unwrap();

        let base = create_base(
            &store,
            &admin,
            organization.id,
            &NewBase {
                name: "Base Centro".to_string(),
                address: Some("Rua Central, 1".to_string()),
                latitude: Some(-23.55),
                longitude: Some(-46.63),
            },
        )
        .await
        .unwrap();

        Self {
            store,
            admin,
            dispatcher,
            organization,
            base,
        }
    }

    pub async fn vehicle(&self, identifier: &str) -> VehicleRow {
        register_vehicle(
            &self.store,
            &self.admin,
            self.base.id,
            &NewVehicle {
                identifier: identifier.to_string(),
                vehicle_type: "ambulance".to_string(),
                capacity: Some(4),
            },
        )
        .await
        .unwrap()
    }

    pub async fn occurrence(&self, occurrence_type: OccurrenceType) -> OccurrenceRow {
        self.occurrence_with(occurrence_type, PriorityLevel::High)
            .await
    }

    pub async fn occurrence_with(
        &self,
        occurrence_type: OccurrenceType,
        priority: PriorityLevel,
    ) -> OccurrenceRow {
        create_occurrence(
            &self.store,
            &self.dispatcher,
            &NewOccurrence {
                organization_id: Some(self.organization.id),
                occurrence_type: Some(occurrence_type),
                priority: Some(priority),
                title: format!("{occurrence_type} call"),
                ..NewOccurrence::default()
            },
        )
        .await
        .unwrap()
    }

    /// A fresh field-crew user.
    pub fn crew_member(&self) -> Actor {
        Actor::new(Uuid::new_v4(), AppRole::SamuTeam)
    }
}
