//! Vehicle assignment and per-dispatch status progression.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sigor_database::{Store, StoreTransaction};
use sigor_database_models::{
    DispatchRow, DispatchStatusUpdate, NewHistoryEntry, OccurrenceRow, OccurrenceStatusUpdate,
};
use sigor_dispatch_models::{DispatchStatus, OccurrenceStatus, VehicleStatus};
use uuid::Uuid;

use crate::lifecycle::load_occurrence;
use crate::validation::validate_notes;
use crate::{Actor, EngineError, EntityKind, finish};

/// Result of a successful [`assign_vehicle`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub dispatch: DispatchRow,
    /// The occurrence after the assignment, `dispatched` if it was pending.
    pub occurrence: OccurrenceRow,
}

/// Result of a successful [`advance_dispatch_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchTransition {
    pub dispatch: DispatchRow,
    /// The parent occurrence after re-deriving its status.
    pub occurrence: OccurrenceRow,
}

/// Assigns an available vehicle to an open occurrence.
///
/// The vehicle is claimed with a conditional `available -> busy` write, so
/// of two concurrent assignments of the same vehicle exactly one succeeds.
/// A pending occurrence moves to `dispatched` in the same transaction.
///
/// # Errors
///
/// * [`EngineError::Unauthorized`] if the actor may not dispatch
/// * [`EngineError::NotFound`] if the occurrence or vehicle does not exist
/// * [`EngineError::OccurrenceClosed`] if the occurrence is terminal
/// * [`EngineError::VehicleUnavailable`] if the claim lost
/// * [`EngineError::Validation`] if `notes` is too long
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn assign_vehicle<S: Store + ?Sized>(
    store: &S,
    actor: &Actor,
    occurrence_id: Uuid,
    vehicle_id: Uuid,
    notes: Option<&str>,
) -> Result<Assignment, EngineError> {
    let notes = validate_notes(notes)?;
    let mut tx = store.begin().await?;
    let result = assign(tx.as_mut(), actor, occurrence_id, vehicle_id, notes, Utc::now()).await;
    let assignment = finish("assign_vehicle", tx, result).await?;

    log::info!(
        "Dispatched vehicle {} to occurrence {} (dispatch {})",
        vehicle_id,
        assignment.occurrence.code,
        assignment.dispatch.id
    );
    Ok(assignment)
}

async fn assign(
    tx: &mut dyn StoreTransaction,
    actor: &Actor,
    occurrence_id: Uuid,
    vehicle_id: Uuid,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<Assignment, EngineError> {
    actor.require(actor.role.can_dispatch(), "assign vehicles")?;

    let occurrence = load_occurrence(tx, occurrence_id).await?;
    let vehicle = tx
        .get_vehicle(vehicle_id)
        .await?
        .ok_or_else(|| EngineError::not_found(EntityKind::Vehicle, vehicle_id))?;

    if occurrence.status.is_terminal() {
        return Err(EngineError::OccurrenceClosed { occurrence_id });
    }

    let claimed = tx
        .update_vehicle_status(
            vehicle.id,
            VehicleStatus::Available,
            VehicleStatus::Busy,
            now,
        )
        .await?;
    if !claimed {
        return Err(EngineError::VehicleUnavailable { vehicle_id });
    }

    let dispatch = DispatchRow {
        id: Uuid::new_v4(),
        occurrence_id: occurrence.id,
        vehicle_id: vehicle.id,
        organization_id: occurrence.organization_id,
        dispatched_by: actor.id,
        status: DispatchStatus::Dispatched,
        dispatched_at: now,
        acknowledged_at: None,
        arrived_at: None,
        completed_at: None,
        notes: notes.clone(),
    };
    tx.insert_dispatch(&dispatch).await?;

    let (occurrence, previous_status) = if occurrence.status == OccurrenceStatus::Pending {
        let update = OccurrenceStatusUpdate::new(OccurrenceStatus::Dispatched, now, actor.id);
        let updated = tx
            .update_occurrence_status(occurrence.id, OccurrenceStatus::Pending, &update)
            .await?
            .ok_or_else(|| {
                EngineError::invalid_transition(
                    EntityKind::Occurrence,
                    OccurrenceStatus::Pending,
                    OccurrenceStatus::Dispatched,
                )
            })?;
        (updated, Some(OccurrenceStatus::Pending))
    } else {
        // an additional vehicle on an occurrence already in progress
        (occurrence, None)
    };

    tx.append_history(&NewHistoryEntry {
        occurrence_id: occurrence.id,
        dispatch_id: Some(dispatch.id),
        previous_status,
        new_status: OccurrenceStatus::Dispatched,
        changed_by: actor.id,
        notes,
        created_at: now,
    })
    .await?;

    Ok(Assignment {
        dispatch,
        occurrence,
    })
}

/// Moves a dispatch one step forward and re-derives its occurrence.
///
/// The parent occurrence follows the most advanced open dispatch and is
/// completed once every dispatch is closed and at least one completed. On
/// `completed` the vehicle's status is recomputed, which frees it unless
/// crew or another open dispatch still holds it.
///
/// # Errors
///
/// * [`EngineError::Unauthorized`] if the actor is read-only
/// * [`EngineError::NotFound`] if the dispatch does not exist
/// * [`EngineError::OccurrenceClosed`] if the parent occurrence is terminal
/// * [`EngineError::InvalidTransition`] if `target` is not the next step,
///   including retrying a step that already applied
/// * [`EngineError::Validation`] if `notes` is too long
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn advance_dispatch_status<S: Store + ?Sized>(
    store: &S,
    actor: &Actor,
    dispatch_id: Uuid,
    target: DispatchStatus,
    notes: Option<&str>,
) -> Result<DispatchTransition, EngineError> {
    let notes = validate_notes(notes)?;
    let mut tx = store.begin().await?;
    let result = advance_dispatch(tx.as_mut(), actor, dispatch_id, target, notes, Utc::now()).await;
    let transition = finish("advance_dispatch_status", tx, result).await?;

    log::info!(
        "Dispatch {} moved to {}; occurrence {} is {}",
        transition.dispatch.id,
        transition.dispatch.status,
        transition.occurrence.code,
        transition.occurrence.status
    );
    Ok(transition)
}

async fn advance_dispatch(
    tx: &mut dyn StoreTransaction,
    actor: &Actor,
    dispatch_id: Uuid,
    target: DispatchStatus,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<DispatchTransition, EngineError> {
    actor.require(actor.role.can_operate(), "advance dispatches")?;

    let dispatch = tx
        .get_dispatch(dispatch_id)
        .await?
        .ok_or_else(|| EngineError::not_found(EntityKind::Dispatch, dispatch_id))?;
    let occurrence = load_occurrence(tx, dispatch.occurrence_id).await?;

    if occurrence.status.is_terminal() {
        return Err(EngineError::OccurrenceClosed {
            occurrence_id: occurrence.id,
        });
    }

    let from = dispatch.status;
    if !from.can_advance_to(target, occurrence.occurrence_type) {
        return Err(EngineError::invalid_transition(
            EntityKind::Dispatch,
            from,
            target,
        ));
    }

    let updated = tx
        .update_dispatch_status(
            dispatch.id,
            from,
            &DispatchStatusUpdate { status: target, at: now },
        )
        .await?
        .ok_or_else(|| EngineError::invalid_transition(EntityKind::Dispatch, from, target))?;

    let siblings = tx.list_dispatches_for_occurrence(occurrence.id).await?;
    let derived = occurrence
        .status
        .derive_from_dispatches(siblings.iter().map(|d| d.status));

    let occurrence = if derived == occurrence.status {
        occurrence
    } else {
        let update = OccurrenceStatusUpdate::new(derived, now, actor.id);
        let expected = occurrence.status;
        tx.update_occurrence_status(occurrence.id, expected, &update)
            .await?
            .ok_or_else(|| {
                EngineError::invalid_transition(EntityKind::Occurrence, expected, derived)
            })?
    };

    tx.append_history(&NewHistoryEntry {
        occurrence_id: occurrence.id,
        dispatch_id: Some(dispatch.id),
        previous_status: Some(from.as_occurrence_status()),
        new_status: target.as_occurrence_status(),
        changed_by: actor.id,
        notes,
        created_at: now,
    })
    .await?;

    if !target.is_open() {
        tx.refresh_vehicle_status(dispatch.vehicle_id, now).await?;
    }

    Ok(DispatchTransition {
        dispatch: updated,
        occurrence,
    })
}

/// Closes every open dispatch of an occurrence that just became terminal
/// and recomputes the status of each vehicle they held.
pub(crate) async fn close_open_dispatches(
    tx: &mut dyn StoreTransaction,
    occurrence_id: Uuid,
    terminal: OccurrenceStatus,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let closing = if terminal == OccurrenceStatus::Cancelled {
        DispatchStatus::Cancelled
    } else {
        DispatchStatus::Completed
    };

    let dispatches = tx.list_dispatches_for_occurrence(occurrence_id).await?;
    for dispatch in dispatches.into_iter().filter(|d| d.status.is_open()) {
        let update = DispatchStatusUpdate {
            status: closing,
            at: now,
        };
        if tx
            .update_dispatch_status(dispatch.id, dispatch.status, &update)
            .await?
            .is_none()
        {
            return Err(EngineError::invalid_transition(
                EntityKind::Dispatch,
                dispatch.status,
                closing,
            ));
        }
        tx.refresh_vehicle_status(dispatch.vehicle_id, now).await?;
        log::debug!(
            "Closed dispatch {} as {closing} with occurrence {occurrence_id}",
            dispatch.id
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sigor_database::{MemoryStore, StoreReader as _};
    use sigor_dispatch_models::{AppRole, OccurrenceType};

    use super::*;
    use crate::testing::Fixture;
    use crate::{ErrorKind, advance_occurrence_status, join_vehicle};

    #[tokio::test]
    async fn medical_scenario_runs_to_completion() {
        let fx = Fixture::new().await;
        let occurrence = fx.occurrence(OccurrenceType::Medical).await;
        assert_eq!(occurrence.status, OccurrenceStatus::Pending);

        let v1 = fx.vehicle("USA-01").await;
        let assignment = assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, v1.id, None)
            .await
            .unwrap();
        assert_eq!(assignment.occurrence.status, OccurrenceStatus::Dispatched);
        assert_eq!(
            fx.store.get_vehicle(v1.id).await.unwrap().unwrap().status,
            VehicleStatus::Busy
        );
        let history = fx.store.list_history(occurrence.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous_status, Some(OccurrenceStatus::Pending));
        assert_eq!(history[0].new_status, OccurrenceStatus::Dispatched);
        assert_eq!(history[0].dispatch_id, Some(assignment.dispatch.id));

        let crew = fx.crew_member();
        let steps = [
            (DispatchStatus::EnRoute, OccurrenceStatus::EnRoute, 2),
            (DispatchStatus::OnScene, OccurrenceStatus::OnScene, 3),
            (DispatchStatus::Transporting, OccurrenceStatus::Transporting, 4),
            (DispatchStatus::Completed, OccurrenceStatus::Completed, 5),
        ];
        for (target, expected, rows) in steps {
            let transition =
                advance_dispatch_status(&fx.store, &crew, assignment.dispatch.id, target, None)
                    .await
                    .unwrap();
            assert_eq!(transition.dispatch.status, target);
            assert_eq!(transition.occurrence.status, expected);
            assert_eq!(
                fx.store.list_history(occurrence.id).await.unwrap().len(),
                rows
            );
        }

        let occurrence = fx.store.get_occurrence(occurrence.id).await.unwrap().unwrap();
        assert_eq!(occurrence.status, OccurrenceStatus::Completed);
        assert!(occurrence.closed_at.is_some());
        assert_eq!(occurrence.closed_by, Some(crew.id));

        let dispatch = fx
            .store
            .get_dispatch(assignment.dispatch.id)
            .await
            .unwrap()
            .unwrap();
        assert!(dispatch.acknowledged_at.is_some());
        assert!(dispatch.arrived_at.is_some());
        assert!(dispatch.completed_at.is_some());

        assert_eq!(
            fx.store.get_vehicle(v1.id).await.unwrap().unwrap().status,
            VehicleStatus::Available
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_assignments_of_one_vehicle_admit_one_winner() {
        let fx = Fixture::new().await;
        let first = fx.occurrence(OccurrenceType::Medical).await;
        let second = fx.occurrence(OccurrenceType::Medical).await;
        let v1 = fx.vehicle("USA-01").await;
        let store: Arc<MemoryStore> = Arc::new(fx.store.clone());

        let mut handles = Vec::new();
        for occurrence in [&first, &second] {
            let store = Arc::clone(&store);
            let dispatcher = Actor::new(Uuid::new_v4(), AppRole::DispatcherSamu);
            let occurrence_id = occurrence.id;
            let vehicle_id = v1.id;
            handles.push(tokio::spawn(async move {
                assign_vehicle(store.as_ref(), &dispatcher, occurrence_id, vehicle_id, None).await
            }));
        }

        let mut won = 0;
        let mut lost = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(e) => {
                    assert_eq!(e.kind(), ErrorKind::VehicleUnavailable);
                    lost += 1;
                }
            }
        }
        assert_eq!((won, lost), (1, 1));

        assert_eq!(
            store.get_vehicle(v1.id).await.unwrap().unwrap().status,
            VehicleStatus::Busy
        );
        assert_eq!(
            store
                .list_open_dispatches_for_vehicle(v1.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn crewed_vehicle_cannot_be_assigned() {
        let fx = Fixture::new().await;
        let occurrence = fx.occurrence(OccurrenceType::Fire).await;
        let vehicle = fx.vehicle("ABT-02").await;
        join_vehicle(&fx.store, &fx.crew_member(), vehicle.id)
            .await
            .unwrap();

        let err = assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, vehicle.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VehicleUnavailable);
        assert!(
            fx.store
                .list_dispatches_for_occurrence(occurrence.id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn second_vehicle_records_history_without_previous_status() {
        let fx = Fixture::new().await;
        let occurrence = fx.occurrence(OccurrenceType::Fire).await;
        let a = fx.vehicle("ABT-01").await;
        let b = fx.vehicle("ABT-02").await;

        assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, a.id, None)
            .await
            .unwrap();
        let second = assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, b.id, Some("backup"))
            .await
            .unwrap();

        assert_eq!(second.occurrence.status, OccurrenceStatus::Dispatched);
        let history = fx.store.list_history(occurrence.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].previous_status, None);
        assert_eq!(history[1].dispatch_id, Some(second.dispatch.id));
        assert!(history[0].seq < history[1].seq);
    }

    #[tokio::test]
    async fn occurrence_follows_most_advanced_open_dispatch() {
        let fx = Fixture::new().await;
        let crew = fx.crew_member();
        let occurrence = fx.occurrence(OccurrenceType::Fire).await;
        let a = fx.vehicle("ABT-01").await;
        let b = fx.vehicle("ABT-02").await;
        let first = assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, a.id, None)
            .await
            .unwrap();
        let second = assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, b.id, None)
            .await
            .unwrap();

        for target in [DispatchStatus::EnRoute, DispatchStatus::OnScene] {
            advance_dispatch_status(&fx.store, &crew, first.dispatch.id, target, None)
                .await
                .unwrap();
        }
        let transition =
            advance_dispatch_status(&fx.store, &crew, second.dispatch.id, DispatchStatus::EnRoute, None)
                .await
                .unwrap();
        assert_eq!(transition.occurrence.status, OccurrenceStatus::OnScene);

        // first truck done, second still open: the occurrence stays open
        let transition =
            advance_dispatch_status(&fx.store, &crew, first.dispatch.id, DispatchStatus::Completed, None)
                .await
                .unwrap();
        assert_eq!(transition.occurrence.status, OccurrenceStatus::OnScene);
        assert_eq!(
            fx.store.get_vehicle(a.id).await.unwrap().unwrap().status,
            VehicleStatus::Available
        );
        assert_eq!(
            fx.store.get_vehicle(b.id).await.unwrap().unwrap().status,
            VehicleStatus::Busy
        );

        advance_dispatch_status(&fx.store, &crew, second.dispatch.id, DispatchStatus::OnScene, None)
            .await
            .unwrap();
        let transition =
            advance_dispatch_status(&fx.store, &crew, second.dispatch.id, DispatchStatus::Completed, None)
                .await
                .unwrap();
        assert_eq!(transition.occurrence.status, OccurrenceStatus::Completed);
    }

    #[tokio::test]
    async fn retried_step_is_rejected_not_duplicated() {
        let fx = Fixture::new().await;
        let crew = fx.crew_member();
        let occurrence = fx.occurrence(OccurrenceType::Police).await;
        let vehicle = fx.vehicle("VTR-01").await;
        let assignment = assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, vehicle.id, None)
            .await
            .unwrap();

        advance_dispatch_status(&fx.store, &crew, assignment.dispatch.id, DispatchStatus::EnRoute, None)
            .await
            .unwrap();
        let err = advance_dispatch_status(
            &fx.store,
            &crew,
            assignment.dispatch.id,
            DispatchStatus::EnRoute,
            None,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(fx.store.list_history(occurrence.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn police_dispatch_cannot_transport() {
        let fx = Fixture::new().await;
        let crew = fx.crew_member();
        let occurrence = fx.occurrence(OccurrenceType::Police).await;
        let vehicle = fx.vehicle("VTR-01").await;
        let assignment = assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, vehicle.id, None)
            .await
            .unwrap();
        for target in [DispatchStatus::EnRoute, DispatchStatus::OnScene] {
            advance_dispatch_status(&fx.store, &crew, assignment.dispatch.id, target, None)
                .await
                .unwrap();
        }

        let err = advance_dispatch_status(
            &fx.store,
            &crew,
            assignment.dispatch.id,
            DispatchStatus::Transporting,
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn closed_occurrence_rejects_assignment_and_dispatch_steps() {
        let fx = Fixture::new().await;
        let occurrence = fx.occurrence(OccurrenceType::Medical).await;
        let a = fx.vehicle("USA-01").await;
        let b = fx.vehicle("USA-02").await;
        let assignment = assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, a.id, None)
            .await
            .unwrap();
        advance_occurrence_status(
            &fx.store,
            &fx.dispatcher,
            occurrence.id,
            OccurrenceStatus::Cancelled,
            None,
        )
        .await
        .unwrap();
        let history = fx.store.list_history(occurrence.id).await.unwrap();

        let err = assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, b.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OccurrenceClosed);
        assert_eq!(
            fx.store.get_vehicle(b.id).await.unwrap().unwrap().status,
            VehicleStatus::Available
        );

        let err = advance_dispatch_status(
            &fx.store,
            &fx.crew_member(),
            assignment.dispatch.id,
            DispatchStatus::EnRoute,
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OccurrenceClosed);
        assert_eq!(fx.store.list_history(occurrence.id).await.unwrap(), history);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let fx = Fixture::new().await;
        let occurrence = fx.occurrence(OccurrenceType::Medical).await;

        let err = assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound {
                entity: EntityKind::Vehicle,
                ..
            }
        ));

        let err = advance_dispatch_status(
            &fx.store,
            &fx.dispatcher,
            Uuid::new_v4(),
            DispatchStatus::EnRoute,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound {
                entity: EntityKind::Dispatch,
                ..
            }
        ));
    }
}
