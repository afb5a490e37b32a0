//! Read APIs over current state.
//!
//! These run against any [`StoreReader`], either a store (each read is its
//! own snapshot) or an open transaction.

use serde::Serialize;
use sigor_database::StoreReader;
use sigor_database_models::{
    DispatchRow, OccurrenceFilter, OccurrenceHistoryRow, OccurrenceRow, VehicleCrewRow, VehicleRow,
};
use sigor_dispatch_models::{AppRole, OccurrenceStatus, VehicleStatus};
use uuid::Uuid;

use crate::{EngineError, EntityKind};

/// A user's active crew membership together with the vehicle it is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrewAssignment {
    pub crew: VehicleCrewRow,
    pub vehicle: VehicleRow,
}

/// The occurrence filter backing a role's dashboard: open occurrences of
/// the types the role watches, optionally within one organization.
#[must_use]
pub fn dashboard_filter(role: AppRole, organization_id: Option<Uuid>) -> OccurrenceFilter {
    OccurrenceFilter {
        organization_id,
        ..OccurrenceFilter::active().with_types(role.watched_occurrence_types())
    }
}

/// Lists open occurrences matching `filter`, highest priority first.
///
/// Any status criterion in `filter` is narrowed to non-terminal statuses;
/// if none of the requested statuses is open the result is empty.
///
/// # Errors
///
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn list_active_occurrences<R: StoreReader + ?Sized>(
    store: &R,
    filter: &OccurrenceFilter,
) -> Result<Vec<OccurrenceRow>, EngineError> {
    let mut filter = filter.clone();
    if filter.statuses.is_empty() {
        filter.statuses = OccurrenceStatus::ACTIVE.to_vec();
    } else {
        filter.statuses.retain(|s| !s.is_terminal());
        if filter.statuses.is_empty() {
            return Ok(Vec::new());
        }
    }
    Ok(store.list_occurrences(&filter).await?)
}

/// Lists occurrences in any status matching `filter`.
///
/// # Errors
///
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn list_occurrences<R: StoreReader + ?Sized>(
    store: &R,
    filter: &OccurrenceFilter,
) -> Result<Vec<OccurrenceRow>, EngineError> {
    Ok(store.list_occurrences(filter).await?)
}

/// # Errors
///
/// * [`EngineError::NotFound`] if the occurrence does not exist
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn get_occurrence<R: StoreReader + ?Sized>(
    store: &R,
    occurrence_id: Uuid,
) -> Result<OccurrenceRow, EngineError> {
    store
        .get_occurrence(occurrence_id)
        .await?
        .ok_or_else(|| EngineError::not_found(EntityKind::Occurrence, occurrence_id))
}

/// The audit trail of an occurrence in transition order.
///
/// # Errors
///
/// * [`EngineError::NotFound`] if the occurrence does not exist
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn get_occurrence_history<R: StoreReader + ?Sized>(
    store: &R,
    occurrence_id: Uuid,
) -> Result<Vec<OccurrenceHistoryRow>, EngineError> {
    get_occurrence(store, occurrence_id).await?;
    Ok(store.list_history(occurrence_id).await?)
}

/// Every dispatch of an occurrence, oldest first.
///
/// # Errors
///
/// * [`EngineError::NotFound`] if the occurrence does not exist
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn list_occurrence_dispatches<R: StoreReader + ?Sized>(
    store: &R,
    occurrence_id: Uuid,
) -> Result<Vec<DispatchRow>, EngineError> {
    get_occurrence(store, occurrence_id).await?;
    Ok(store.list_dispatches_for_occurrence(occurrence_id).await?)
}

/// # Errors
///
/// * [`EngineError::NotFound`] if the dispatch does not exist
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn get_dispatch<R: StoreReader + ?Sized>(
    store: &R,
    dispatch_id: Uuid,
) -> Result<DispatchRow, EngineError> {
    store
        .get_dispatch(dispatch_id)
        .await?
        .ok_or_else(|| EngineError::not_found(EntityKind::Dispatch, dispatch_id))
}

/// # Errors
///
/// * [`EngineError::NotFound`] if the vehicle does not exist
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn get_vehicle<R: StoreReader + ?Sized>(
    store: &R,
    vehicle_id: Uuid,
) -> Result<VehicleRow, EngineError> {
    store
        .get_vehicle(vehicle_id)
        .await?
        .ok_or_else(|| EngineError::not_found(EntityKind::Vehicle, vehicle_id))
}

/// Vehicles of an organization that can be dispatched right now.
///
/// # Errors
///
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn list_available_vehicles<R: StoreReader + ?Sized>(
    store: &R,
    organization_id: Uuid,
) -> Result<Vec<VehicleRow>, EngineError> {
    Ok(store
        .list_vehicles(organization_id, Some(VehicleStatus::Available))
        .await?)
}

/// Every vehicle of an organization regardless of status.
///
/// # Errors
///
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn list_vehicles<R: StoreReader + ?Sized>(
    store: &R,
    organization_id: Uuid,
) -> Result<Vec<VehicleRow>, EngineError> {
    Ok(store.list_vehicles(organization_id, None).await?)
}

/// The open dispatches holding a vehicle, which is what a crew's
/// dashboard shows.
///
/// # Errors
///
/// * [`EngineError::NotFound`] if the vehicle does not exist
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn list_vehicle_dispatches<R: StoreReader + ?Sized>(
    store: &R,
    vehicle_id: Uuid,
) -> Result<Vec<DispatchRow>, EngineError> {
    get_vehicle(store, vehicle_id).await?;
    Ok(store.list_open_dispatches_for_vehicle(vehicle_id).await?)
}

/// Users currently on a vehicle's crew.
///
/// # Errors
///
/// * [`EngineError::NotFound`] if the vehicle does not exist
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn list_crew_members<R: StoreReader + ?Sized>(
    store: &R,
    vehicle_id: Uuid,
) -> Result<Vec<VehicleCrewRow>, EngineError> {
    get_vehicle(store, vehicle_id).await?;
    Ok(store.active_crew_for_vehicle(vehicle_id).await?)
}

/// The vehicle a user is currently crewing, if any.
///
/// # Errors
///
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn get_current_crew_assignment<R: StoreReader + ?Sized>(
    store: &R,
    user_id: Uuid,
) -> Result<Option<CrewAssignment>, EngineError> {
    let Some(crew) = store.active_crew_for_user(user_id).await? else {
        return Ok(None);
    };
    let vehicle = get_vehicle(store, crew.vehicle_id).await?;
    Ok(Some(CrewAssignment { crew, vehicle }))
}
