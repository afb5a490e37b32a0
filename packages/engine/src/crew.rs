//! Shift membership of users on vehicles.
//!
//! Crew presence is one of the two reasons a vehicle is held (the other is
//! an open dispatch), so every join and leave ends by recomputing the
//! vehicle's status from both inside the same transaction.

use chrono::{DateTime, Utc};
use sigor_database::{Store, StoreTransaction};
use sigor_database_models::VehicleCrewRow;
use sigor_dispatch_models::VehicleStatus;
use uuid::Uuid;

use crate::{Actor, EngineError, EntityKind, finish};

/// Puts the actor on a vehicle's crew, marking the vehicle busy.
///
/// # Errors
///
/// * [`EngineError::Unauthorized`] if the actor's role does not ride
///   vehicles
/// * [`EngineError::NotFound`] if the vehicle does not exist
/// * [`EngineError::AlreadyCrewing`] if the actor already has an active
///   crew row, on this vehicle or any other
/// * [`EngineError::VehicleUnavailable`] if the vehicle is out of service
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn join_vehicle<S: Store + ?Sized>(
    store: &S,
    actor: &Actor,
    vehicle_id: Uuid,
) -> Result<VehicleCrewRow, EngineError> {
    let mut tx = store.begin().await?;
    let result = join(tx.as_mut(), actor, vehicle_id, Utc::now()).await;
    let row = finish("join_vehicle", tx, result).await?;

    log::info!("User {} joined vehicle {vehicle_id}", actor.id);
    Ok(row)
}

async fn join(
    tx: &mut dyn StoreTransaction,
    actor: &Actor,
    vehicle_id: Uuid,
    now: DateTime<Utc>,
) -> Result<VehicleCrewRow, EngineError> {
    actor.require(actor.role.can_crew(), "join vehicle crews")?;

    let vehicle = tx
        .get_vehicle(vehicle_id)
        .await?
        .ok_or_else(|| EngineError::not_found(EntityKind::Vehicle, vehicle_id))?;

    if let Some(existing) = tx.active_crew_for_user(actor.id).await? {
        return Err(EngineError::AlreadyCrewing {
            user_id: actor.id,
            vehicle_id: existing.vehicle_id,
        });
    }

    if matches!(
        vehicle.status,
        VehicleStatus::Maintenance | VehicleStatus::OffDuty
    ) {
        return Err(EngineError::VehicleUnavailable { vehicle_id });
    }

    let row = VehicleCrewRow {
        id: Uuid::new_v4(),
        vehicle_id: vehicle.id,
        user_id: actor.id,
        joined_at: now,
        left_at: None,
        is_active: true,
    };
    if !tx.insert_crew(&row).await? {
        return Err(EngineError::AlreadyCrewing {
            user_id: actor.id,
            vehicle_id,
        });
    }

    tx.refresh_vehicle_status(vehicle.id, now).await?;

    Ok(row)
}

/// Ends the actor's active crew membership.
///
/// The vehicle returns to `available` only if no other crew member and no
/// open dispatch still holds it.
///
/// # Errors
///
/// * [`EngineError::NotCrewing`] if the actor has no active crew row
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn leave_vehicle<S: Store + ?Sized>(
    store: &S,
    actor: &Actor,
) -> Result<VehicleCrewRow, EngineError> {
    let mut tx = store.begin().await?;
    let result = leave(tx.as_mut(), actor, Utc::now()).await;
    let row = finish("leave_vehicle", tx, result).await?;

    log::info!("User {} left vehicle {}", actor.id, row.vehicle_id);
    Ok(row)
}

async fn leave(
    tx: &mut dyn StoreTransaction,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<VehicleCrewRow, EngineError> {
    let not_crewing = || EngineError::NotCrewing { user_id: actor.id };

    let crew = tx
        .active_crew_for_user(actor.id)
        .await?
        .ok_or_else(not_crewing)?;

    if !tx.close_crew(crew.id, now).await? {
        return Err(not_crewing());
    }

    tx.refresh_vehicle_status(crew.vehicle_id, now).await?;

    Ok(VehicleCrewRow {
        left_at: Some(now),
        is_active: false,
        ..crew
    })
}
