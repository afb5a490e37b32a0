//! Occurrence creation and explicit status changes.

use chrono::{DateTime, Datelike as _, Utc};
use sigor_database::{Store, StoreTransaction};
use sigor_database_models::{NewHistoryEntry, OccurrenceRow, OccurrenceStatusUpdate};
use sigor_dispatch_models::OccurrenceStatus;
use uuid::Uuid;

use crate::code::occurrence_code;
use crate::dispatch::close_open_dispatches;
use crate::validation::validate_notes;
use crate::{Actor, EngineError, EntityKind, NewOccurrence, finish};

/// Registers a new occurrence in `pending` status.
///
/// The occurrence code is drawn from the organization's yearly counter in
/// the same transaction, so concurrent creations never share a code.
///
/// # Errors
///
/// * [`EngineError::Unauthorized`] if the actor may not dispatch
/// * [`EngineError::Validation`] listing every offending field
/// * [`EngineError::NotFound`] if the organization does not exist
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn create_occurrence<S: Store + ?Sized>(
    store: &S,
    actor: &Actor,
    input: &NewOccurrence,
) -> Result<OccurrenceRow, EngineError> {
    let mut tx = store.begin().await?;
    let result = insert_occurrence(tx.as_mut(), actor, input, Utc::now()).await;
    let row = finish("create_occurrence", tx, result).await?;

    log::info!(
        "Created occurrence {} ({}, {}) for organization {}",
        row.code,
        row.occurrence_type,
        row.priority,
        row.organization_id
    );
    Ok(row)
}

async fn insert_occurrence(
    tx: &mut dyn StoreTransaction,
    actor: &Actor,
    input: &NewOccurrence,
    now: DateTime<Utc>,
) -> Result<OccurrenceRow, EngineError> {
    actor.require(actor.role.can_dispatch(), "create occurrences")?;
    let valid = input.validate()?;

    let organization = tx
        .get_organization(valid.organization_id)
        .await?
        .ok_or_else(|| EngineError::not_found(EntityKind::Organization, valid.organization_id))?;

    let number = tx.next_occurrence_number(organization.id, now.year()).await?;

    let row = OccurrenceRow {
        id: Uuid::new_v4(),
        organization_id: organization.id,
        code: occurrence_code(&organization.code, now.year(), number),
        occurrence_type: valid.occurrence_type,
        priority: valid.priority,
        status: OccurrenceStatus::Pending,
        title: valid.title,
        description: valid.description,
        caller_name: valid.caller_name,
        caller_phone: valid.caller_phone,
        location_address: valid.location_address,
        location_reference: valid.location_reference,
        latitude: valid.latitude,
        longitude: valid.longitude,
        created_by: actor.id,
        created_at: now,
        updated_at: now,
        closed_at: None,
        closed_by: None,
    };
    tx.insert_occurrence(&row).await?;

    Ok(row)
}

/// Moves an occurrence one step along its state machine, or cancels it.
///
/// The status is written before the history row, and both before any open
/// dispatch is closed. Entering a terminal status closes every open
/// dispatch (`cancelled` or `completed` to match) and recomputes the
/// status of the vehicles they held.
///
/// # Errors
///
/// * [`EngineError::NotFound`] if the occurrence does not exist
/// * [`EngineError::InvalidTransition`] if `target` is not a legal
///   successor of the current status, including any change out of a
///   terminal status
/// * [`EngineError::Unauthorized`] if the actor may not cancel, or is
///   read-only
/// * [`EngineError::Validation`] if `notes` is too long
/// * [`EngineError::StoreUnavailable`] on store failure
pub async fn advance_occurrence_status<S: Store + ?Sized>(
    store: &S,
    actor: &Actor,
    occurrence_id: Uuid,
    target: OccurrenceStatus,
    notes: Option<&str>,
) -> Result<OccurrenceRow, EngineError> {
    let notes = validate_notes(notes)?;
    let mut tx = store.begin().await?;
    let result = advance_occurrence(tx.as_mut(), actor, occurrence_id, target, notes, Utc::now()).await;
    let row = finish("advance_occurrence_status", tx, result).await?;

    log::info!(
        "Occurrence {} moved to {} by {}",
        row.code,
        row.status,
        actor.id
    );
    Ok(row)
}

async fn advance_occurrence(
    tx: &mut dyn StoreTransaction,
    actor: &Actor,
    occurrence_id: Uuid,
    target: OccurrenceStatus,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<OccurrenceRow, EngineError> {
    let occurrence = load_occurrence(tx, occurrence_id).await?;
    let from = occurrence.status;

    if from.is_terminal() {
        return Err(EngineError::invalid_transition(
            EntityKind::Occurrence,
            from,
            target,
        ));
    }

    if target == OccurrenceStatus::Cancelled {
        actor.require(actor.role.can_cancel(), "cancel occurrences")?;
    } else {
        actor.require(actor.role.can_operate(), "advance occurrences")?;
    }

    if !from.can_advance_to(target, occurrence.occurrence_type) {
        return Err(EngineError::invalid_transition(
            EntityKind::Occurrence,
            from,
            target,
        ));
    }

    let update = OccurrenceStatusUpdate::new(target, now, actor.id);
    let updated = tx
        .update_occurrence_status(occurrence.id, from, &update)
        .await?
        .ok_or_else(|| EngineError::invalid_transition(EntityKind::Occurrence, from, target))?;

    tx.append_history(&NewHistoryEntry {
        occurrence_id: occurrence.id,
        dispatch_id: None,
        previous_status: Some(from),
        new_status: target,
        changed_by: actor.id,
        notes,
        created_at: now,
    })
    .await?;

    if target.is_terminal() {
        close_open_dispatches(tx, occurrence.id, target, now).await?;
    }

    Ok(updated)
}

pub(crate) async fn load_occurrence(
    tx: &dyn StoreTransaction,
    id: Uuid,
) -> Result<OccurrenceRow, EngineError> {
    tx.get_occurrence(id)
        .await?
        .ok_or_else(|| EngineError::not_found(EntityKind::Occurrence, id))
}

#[cfg(test)]
mod tests {
    use sigor_database::StoreReader as _;
    use sigor_dispatch_models::{
        AppRole, DispatchStatus, OccurrenceType, PriorityLevel, VehicleStatus,
    };

    use super::*;
    use crate::testing::Fixture;
    use crate::{ErrorKind, assign_vehicle};

    #[tokio::test]
    async fn create_assigns_pending_status_and_sequential_codes() {
        let fx = Fixture::new().await;
        let first = fx.occurrence(OccurrenceType::Medical).await;
        let second = fx.occurrence(OccurrenceType::Fire).await;

        assert_eq!(first.status, OccurrenceStatus::Pending);
        assert_eq!(first.created_by, fx.dispatcher.id);
        let year = Utc::now().year();
        assert_eq!(first.code, format!("SAMU-{year}-00001"));
        assert_eq!(second.code, format!("SAMU-{year}-00002"));
        assert!(fx.store.list_history(first.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_short_title_and_missing_fields() {
        let fx = Fixture::new().await;
        let input = NewOccurrence {
            organization_id: Some(fx.organization.id),
            title: "Fire".to_string(),
            ..NewOccurrence::default()
        };
        let err = create_occurrence(&fx.store, &fx.dispatcher, &input)
            .await
            .unwrap_err();
        let EngineError::Validation(errors) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert!(errors.has("title"));
        assert!(errors.has("occurrence_type"));
        assert!(errors.has("priority"));
    }

    #[tokio::test]
    async fn create_requires_existing_organization() {
        let fx = Fixture::new().await;
        let input = NewOccurrence {
            organization_id: Some(Uuid::new_v4()),
            occurrence_type: Some(OccurrenceType::Police),
            priority: Some(PriorityLevel::Low),
            title: "Noise complaint".to_string(),
            ..NewOccurrence::default()
        };
        let err = create_occurrence(&fx.store, &fx.dispatcher, &input)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn observers_cannot_create() {
        let fx = Fixture::new().await;
        let observer = Actor::new(Uuid::new_v4(), AppRole::Observer);
        let input = NewOccurrence {
            organization_id: Some(fx.organization.id),
            occurrence_type: Some(OccurrenceType::Police),
            priority: Some(PriorityLevel::Low),
            title: "Noise complaint".to_string(),
            ..NewOccurrence::default()
        };
        let err = create_occurrence(&fx.store, &observer, &input)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn pending_cannot_skip_to_en_route() {
        let fx = Fixture::new().await;
        let occurrence = fx.occurrence(OccurrenceType::Police).await;

        let err = advance_occurrence_status(
            &fx.store,
            &fx.dispatcher,
            occurrence.id,
            OccurrenceStatus::EnRoute,
            None,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        let stored = fx.store.get_occurrence(occurrence.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OccurrenceStatus::Pending);
        assert!(fx.store.list_history(occurrence.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_dispatchers_cancel() {
        let fx = Fixture::new().await;
        let occurrence = fx.occurrence(OccurrenceType::Medical).await;
        let crew = fx.crew_member();

        let err = advance_occurrence_status(
            &fx.store,
            &crew,
            occurrence.id,
            OccurrenceStatus::Cancelled,
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let cancelled = advance_occurrence_status(
            &fx.store,
            &fx.dispatcher,
            occurrence.id,
            OccurrenceStatus::Cancelled,
            Some("duplicate call"),
        )
        .await
        .unwrap();
        assert_eq!(cancelled.status, OccurrenceStatus::Cancelled);
        assert_eq!(cancelled.closed_by, Some(fx.dispatcher.id));
        assert!(cancelled.closed_at.is_some());

        let history = fx.store.list_history(occurrence.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous_status, Some(OccurrenceStatus::Pending));
        assert_eq!(history[0].notes.as_deref(), Some("duplicate call"));
    }

    #[tokio::test]
    async fn cancelling_releases_dispatched_vehicles() {
        let fx = Fixture::new().await;
        let occurrence = fx.occurrence(OccurrenceType::Fire).await;
        let vehicle = fx.vehicle("ABT-01").await;
        let assignment = assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, vehicle.id, None)
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

        let dispatch = fx
            .store
            .get_dispatch(assignment.dispatch.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dispatch.status, DispatchStatus::Cancelled);
        assert!(dispatch.completed_at.is_some());

        let vehicle = fx.store.get_vehicle(vehicle.id).await.unwrap().unwrap();
        assert_eq!(vehicle.status, VehicleStatus::Available);

        // assign + cancel; closing the dispatch adds no row of its own
        assert_eq!(fx.store.list_history(occurrence.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn completed_occurrence_rejects_cancel() {
        let fx = Fixture::new().await;
        let occurrence = fx.occurrence(OccurrenceType::Police).await;
        let vehicle = fx.vehicle("VTR-10").await;
        assign_vehicle(&fx.store, &fx.dispatcher, occurrence.id, vehicle.id, None)
            .await
            .unwrap();
        for target in [
            OccurrenceStatus::EnRoute,
            OccurrenceStatus::OnScene,
            OccurrenceStatus::Completed,
        ] {
            advance_occurrence_status(&fx.store, &fx.dispatcher, occurrence.id, target, None)
                .await
                .unwrap();
        }
        let before = fx.store.get_occurrence(occurrence.id).await.unwrap().unwrap();
        let history_before = fx.store.list_history(occurrence.id).await.unwrap();

        let err = advance_occurrence_status(
            &fx.store,
            &fx.dispatcher,
            occurrence.id,
            OccurrenceStatus::Cancelled,
            None,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(
            fx.store.get_occurrence(occurrence.id).await.unwrap().unwrap(),
            before
        );
        assert_eq!(
            fx.store.list_history(occurrence.id).await.unwrap(),
            history_before
        );
    }

    #[tokio::test]
    async fn missing_occurrence_is_not_found() {
        let fx = Fixture::new().await;
        let err = advance_occurrence_status(
            &fx.store,
            &fx.dispatcher,
            Uuid::new_v4(),
            OccurrenceStatus::Cancelled,
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
