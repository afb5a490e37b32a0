//! Organizations, bases and vehicles.

use chrono::{DateTime, Utc};
use sigor_database::{Store, StoreTransaction};
use sigor_database_models::{BaseRow, OrganizationRow, VehicleRow};
use sigor_dispatch_models::VehicleStatus;
use uuid::Uuid;

use crate::{
    Actor, EngineError, EntityKind, NewBase, NewOrganization, NewVehicle, ValidationErrors, finish,
};

/// Registers a dispatch authority. Its type can never change afterwards.
///
/// # Errors
///
/// * [`EngineError::Unauthorized`] unless the actor is an administrator
/// * [`EngineError::Validation`] if a field is malformed or the code is
///   already taken
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn create_organization<S: Store + ?Sized>(
    store: &S,
    actor: &Actor,
    input: &NewOrganization,
) -> Result<OrganizationRow, EngineError> {
    let mut tx = store.begin().await?;
    let result = insert_organization(tx.as_mut(), actor, input, Utc::now()).await;
    let row = finish("create_organization", tx, result).await?;

    log::info!(
        "Created {} organization {} ({})",
        row.organization_type,
        row.code,
        row.id
    );
    Ok(row)
}

async fn insert_organization(
    tx: &mut dyn StoreTransaction,
    actor: &Actor,
    input: &NewOrganization,
    now: DateTime<Utc>,
) -> Result<OrganizationRow, EngineError> {
    actor.require(actor.role.can_manage_fleet(), "manage organizations")?;
    let valid = input.validate()?;

    if tx.find_organization_by_code(&valid.code).await?.is_some() {
        return Err(ValidationErrors::single("code", "is already in use").into());
    }

    let row = OrganizationRow {
        id: Uuid::new_v4(),
        name: valid.name,
        code: valid.code,
        organization_type: valid.organization_type,
        phone: valid.phone,
        created_at: now,
    };
    tx.insert_organization(&row).await?;
    Ok(row)
}

/// Adds a base to an organization.
///
/// # Errors
///
/// * [`EngineError::Unauthorized`] unless the actor is an administrator
/// * [`EngineError::Validation`] if a field is malformed
/// * [`EngineError::NotFound`] if the organization does not exist
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn create_base<S: Store + ?Sized>(
    store: &S,
    actor: &Actor,
    organization_id: Uuid,
    input: &NewBase,
) -> Result<BaseRow, EngineError> {
    let mut tx = store.begin().await?;
    let result = insert_base(tx.as_mut(), actor, organization_id, input, Utc::now()).await;
    let row = finish("create_base", tx, result).await?;

    log::info!("Created base {} for organization {organization_id}", row.name);
    Ok(row)
}

async fn insert_base(
    tx: &mut dyn StoreTransaction,
    actor: &Actor,
    organization_id: Uuid,
    input: &NewBase,
    now: DateTime<Utc>,
) -> Result<BaseRow, EngineError> {
    actor.require(actor.role.can_manage_fleet(), "manage bases")?;
    let valid = input.validate()?;

    if tx.get_organization(organization_id).await?.is_none() {
        return Err(EngineError::not_found(
            EntityKind::Organization,
            organization_id,
        ));
    }

    let row = BaseRow {
        id: Uuid::new_v4(),
        organization_id,
        name: valid.name,
        address: valid.address,
        latitude: valid.latitude,
        longitude: valid.longitude,
        is_active: true,
        created_at: now,
    };
    tx.insert_base(&row).await?;
    Ok(row)
}

/// Registers a vehicle at a base. New vehicles start `available`.
///
/// # Errors
///
/// * [`EngineError::Unauthorized`] unless the actor is an administrator
/// * [`EngineError::Validation`] if a field is malformed or the identifier
///   is already used within the organization
/// * [`EngineError::NotFound`] if the base does not exist
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn register_vehicle<S: Store + ?Sized>(
    store: &S,
    actor: &Actor,
    base_id: Uuid,
    input: &NewVehicle,
) -> Result<VehicleRow, EngineError> {
    let mut tx = store.begin().await?;
    let result = insert_vehicle(tx.as_mut(), actor, base_id, input, Utc::now()).await;
    let row = finish("register_vehicle", tx, result).await?;

    log::info!(
        "Registered vehicle {} ({}) at base {base_id}",
        row.identifier,
        row.id
    );
    Ok(row)
}

async fn insert_vehicle(
    tx: &mut dyn StoreTransaction,
    actor: &Actor,
    base_id: Uuid,
    input: &NewVehicle,
    now: DateTime<Utc>,
) -> Result<VehicleRow, EngineError> {
    actor.require(actor.role.can_manage_fleet(), "manage vehicles")?;
    let valid = input.validate()?;

    let base = tx
        .get_base(base_id)
        .await?
        .ok_or_else(|| EngineError::not_found(EntityKind::Base, base_id))?;

    if tx
        .find_vehicle_by_identifier(base.organization_id, &valid.identifier)
        .await?
        .is_some()
    {
        return Err(ValidationErrors::single(
            "identifier",
            "is already in use in this organization",
        )
        .into());
    }

    let row = VehicleRow {
        id: Uuid::new_v4(),
        base_id: base.id,
        organization_id: base.organization_id,
        identifier: valid.identifier,
        vehicle_type: valid.vehicle_type,
        capacity: valid.capacity,
        status: VehicleStatus::Available,
        created_at: now,
        updated_at: now,
    };
    tx.insert_vehicle(&row).await?;
    Ok(row)
}

/// Puts a vehicle in or out of service.
///
/// `busy` is never set by hand. A vehicle still held by crew or an open
/// dispatch cannot change service status.
///
/// # Errors
///
/// * [`EngineError::Unauthorized`] if the actor may not dispatch
/// * [`EngineError::Validation`] if `status` is `busy`
/// * [`EngineError::NotFound`] if the vehicle does not exist
/// * [`EngineError::VehicleUnavailable`] if the vehicle is held
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn set_vehicle_service_status<S: Store + ?Sized>(
    store: &S,
    actor: &Actor,
    vehicle_id: Uuid,
    status: VehicleStatus,
) -> Result<VehicleRow, EngineError> {
    let mut tx = store.begin().await?;
    let result = set_service_status(tx.as_mut(), actor, vehicle_id, status, Utc::now()).await;
    let row = finish("set_vehicle_service_status", tx, result).await?;

    log::info!("Vehicle {} is now {}", row.identifier, row.status);
    Ok(row)
}

async fn set_service_status(
    tx: &mut dyn StoreTransaction,
    actor: &Actor,
    vehicle_id: Uuid,
    status: VehicleStatus,
    now: DateTime<Utc>,
) -> Result<VehicleRow, EngineError> {
    actor.require(actor.role.can_dispatch(), "change vehicle service status")?;

    if !status.is_manually_settable() {
        return Err(ValidationErrors::single(
            "status",
            "busy is derived from crew and dispatches",
        )
        .into());
    }

    let vehicle = tx
        .get_vehicle(vehicle_id)
        .await?
        .ok_or_else(|| EngineError::not_found(EntityKind::Vehicle, vehicle_id))?;

    let held = !tx.active_crew_for_vehicle(vehicle.id).await?.is_empty()
        || !tx
            .list_open_dispatches_for_vehicle(vehicle.id)
            .await?
            .is_empty();
    if held {
        return Err(EngineError::VehicleUnavailable { vehicle_id });
    }

    if vehicle.status == status {
        return Ok(vehicle);
    }

    if !tx
        .update_vehicle_status(vehicle.id, vehicle.status, status, now)
        .await?
    {
        return Err(EngineError::VehicleUnavailable { vehicle_id });
    }

    Ok(VehicleRow {
        status,
        updated_at: now,
        ..vehicle
    })
}

#[cfg(test)]
mod tests {
    use sigor_database::StoreReader as _;
    use sigor_dispatch_models::{AppRole, OccurrenceType, OrganizationType};

    use super::*;
    use crate::testing::Fixture;
    use crate::{ErrorKind, assign_vehicle, join_vehicle};

    #[tokio::test]
    async fn organization_codes_are_unique() {
        let fx = Fixture::new().await;
        let input = NewOrganization {
            name: "Outra SAMU".to_string(),
            code: "samu".to_string(),
            organization_type: OrganizationType::Samu,
            phone: None,
        };
        let err = create_organization(&fx.store, &fx.admin, &input)
            .await
            .unwrap_err();
        let EngineError::Validation(errors) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert!(errors.has("code"));
    }

    #[tokio::test]
    async fn only_admins_manage_fleet() {
        let fx = Fixture::new().await;
        let input = NewBase {
            name: "Base Norte".to_string(),
            ..NewBase::default()
        };
        let err = create_base(&fx.store, &fx.dispatcher, fx.organization.id, &input)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn vehicle_identifiers_are_unique_per_organization() {
        let fx = Fixture::new().await;
        fx.vehicle("USA-01").await;

        let input = NewVehicle {
            identifier: "USA-01".to_string(),
            vehicle_type: "ambulance".to_string(),
            capacity: None,
        };
        let err = register_vehicle(&fx.store, &fx.admin, fx.base.id, &input)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let other = create_organization(
            &fx.store,
            &fx.admin,
            &NewOrganization {
                name: "Corpo de Bombeiros".to_string(),
                code: "CBM".to_string(),
                organization_type: OrganizationType::Fire,
                phone: None,
            },
        )
        .await
        .unwrap();
        let base = create_base(
            &fx.store,
            &fx.admin,
            other.id,
            &NewBase {
                name: "Quartel Central".to_string(),
                ..NewBase::default()
            },
        )
        .await
        .unwrap();
        let vehicle = register_vehicle(&fx.store, &fx.admin, base.id, &input)
            .await
            .unwrap();
        assert_eq!(vehicle.organization_id, other.id);
        assert_eq!(vehicle.status, VehicleStatus::Available);
    }

    #[tokio::test]
    async fn service_status_cannot_be_busy() {
        let fx = Fixture::new().await;
        let vehicle = fx.vehicle("USA-01").await;
        let err = set_vehicle_service_status(&fx.store, &fx.admin, vehicle.id, VehicleStatus::Busy)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn held_vehicle_cannot_leave_service() {
        let fx = Fixture::new().await;
        let crewed = fx.vehicle("USA-01").await;
        let dispatched = fx.vehicle("USA-02").await;
        join_vehicle(&fx.store, &fx.crew_member(), crewed.id)
            .await
            .unwrap();
        let occurrence = fx.occurrence(OccurrenceType::Medical).await;
        assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, dispatched.id, None)
            .await
            .unwrap();

        for id in [crewed.id, dispatched.id] {
            let err = set_vehicle_service_status(&fx.store, &fx.admin, id, VehicleStatus::OffDuty)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::VehicleUnavailable);
            assert_eq!(
                fx.store.get_vehicle(id).await.unwrap().unwrap().status,
                VehicleStatus::Busy
            );
        }
    }

    #[tokio::test]
    async fn maintenance_vehicle_is_not_assignable_until_restored() {
        let fx = Fixture::new().await;
        let vehicle = fx.vehicle("USA-01").await;
        let occurrence = fx.occurrence(OccurrenceType::Medical).await;

        set_vehicle_service_status(&fx.store, &fx.dispatcher, vehicle.id, VehicleStatus::Maintenance)
            .await
            .unwrap();
        let err = assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, vehicle.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VehicleUnavailable);

        let restored = set_vehicle_service_status(
            &fx.store,
            &fx.dispatcher,
            vehicle.id,
            VehicleStatus::Available,
        )
        .await
        .unwrap();
        assert_eq!(restored.status, VehicleStatus::Available);
        assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, vehicle.id, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn crew_cannot_change_service_status() {
        let fx = Fixture::new().await;
        let vehicle = fx.vehicle("USA-01").await;
        let crew = Actor::new(Uuid::new_v4(), AppRole::SamuTeam);
        let err = set_vehicle_service_status(&fx.store, &crew, vehicle.id, VehicleStatus::OffDuty)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
}
