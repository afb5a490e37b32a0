//! PostgreSQL [`Store`] backend on `switchy_database`.
//!
//! Each transaction runs at `SERIALIZABLE` isolation, so the conditional
//! updates in [`queries`] compose into atomic multi-statement commands.
//! When a conditional claim (vehicle status, crew membership) loses to a
//! concurrent commit, the serialization failure is reported as "no row
//! matched" so the caller sees the same outcome as a plain lost race. Any
//! other serialization failure surfaces as [`DbError::Database`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sigor_database_models::{
    BaseRow, ChangeEvent, ChangeRecord, DispatchRow, DispatchStatusUpdate, NewHistoryEntry,
    OccurrenceFilter, OccurrenceHistoryRow, OccurrenceRow, OccurrenceStatusUpdate,
    OrganizationRow, VehicleCrewRow, VehicleRow,
};
use sigor_dispatch_models::{DispatchStatus, OccurrenceStatus, VehicleStatus};
use switchy_database::{Database, DatabaseTransaction};
use uuid::Uuid;

use crate::feed::DEFAULT_FEED_CAPACITY;
use crate::{ChangeFeed, DbError, Store, StoreReader, StoreTransaction, queries};

/// A [`Store`] backed by a PostgreSQL connection.
pub struct SqlStore {
    db: Box<dyn Database>,
    feed: ChangeFeed,
}

impl std::fmt::Debug for SqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStore")
            .field("subscribers", &self.feed.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl SqlStore {
    #[must_use]
    pub fn new(db: Box<dyn Database>) -> Self {
        Self::with_feed_capacity(db, DEFAULT_FEED_CAPACITY)
    }

    #[must_use]
    pub fn with_feed_capacity(db: Box<dyn Database>, capacity: usize) -> Self {
        Self {
            db,
            feed: ChangeFeed::new(capacity),
        }
    }

    /// The underlying connection, e.g. for running migrations.
    #[must_use]
    pub fn database(&self) -> &dyn Database {
        self.db.as_ref()
    }
}

#[async_trait]
impl StoreReader for SqlStore {
    async fn get_organization(&self, id: Uuid) -> Result<Option<OrganizationRow>, DbError> {
        queries::get_organization(self.db.as_ref(), id).await
    }

    async fn find_organization_by_code(
        &self,
        code: &str,
    ) -> Result<Option<OrganizationRow>, DbError> {
        queries::find_organization_by_code(self.db.as_ref(), code).await
    }

    async fn get_base(&self, id: Uuid) -> Result<Option<BaseRow>, DbError> {
        queries::get_base(self.db.as_ref(), id).await
    }

    async fn get_vehicle(&self, id: Uuid) -> Result<Option<VehicleRow>, DbError> {
        queries::get_vehicle(self.db.as_ref(), id).await
    }

    async fn find_vehicle_by_identifier(
        &self,
        organization_id: Uuid,
        identifier: &str,
    ) -> Result<Option<VehicleRow>, DbError> {
        queries::find_vehicle_by_identifier(self.db.as_ref(), organization_id, identifier).await
    }

    async fn list_vehicles(
        &self,
        organization_id: Uuid,
        status: Option<VehicleStatus>,
    ) -> Result<Vec<VehicleRow>, DbError> {
        queries::list_vehicles(self.db.as_ref(), organization_id, status).await
    }

    async fn get_occurrence(&self, id: Uuid) -> Result<Option<OccurrenceRow>, DbError> {
        queries::get_occurrence(self.db.as_ref(), id).await
    }

    async fn list_occurrences(
        &self,
        filter: &OccurrenceFilter,
    ) -> Result<Vec<OccurrenceRow>, DbError> {
        queries::list_occurrences(self.db.as_ref(), filter).await
    }

    async fn get_dispatch(&self, id: Uuid) -> Result<Option<DispatchRow>, DbError> {
        queries::get_dispatch(self.db.as_ref(), id).await
    }

    async fn list_dispatches_for_occurrence(
        &self,
        occurrence_id: Uuid,
    ) -> Result<Vec<DispatchRow>, DbError> {
        queries::list_dispatches_for_occurrence(self.db.as_ref(), occurrence_id).await
    }

    async fn list_open_dispatches_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<DispatchRow>, DbError> {
        queries::list_open_dispatches_for_vehicle(self.db.as_ref(), vehicle_id).await
    }

    async fn list_history(
        &self,
        occurrence_id: Uuid,
    ) -> Result<Vec<OccurrenceHistoryRow>, DbError> {
        queries::list_history(self.db.as_ref(), occurrence_id).await
    }

    async fn active_crew_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<VehicleCrewRow>, DbError> {
        queries::active_crew_for_user(self.db.as_ref(), user_id).await
    }

    async fn active_crew_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<VehicleCrewRow>, DbError> {
        queries::active_crew_for_vehicle(self.db.as_ref(), vehicle_id).await
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, DbError> {
        let txn = self.db.begin_transaction().await?;
        if let Err(e) = txn
            .exec_raw("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .await
        {
            if let Err(rollback) = txn.rollback().await {
                log::warn!("Failed to roll back transaction after isolation error: {rollback}");
            }
            return Err(e.into());
        }
        Ok(Box::new(SqlTransaction {
            txn,
            events: Vec::new(),
            feed: self.feed.clone(),
        }))
    }

    fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

/// An open [`SqlStore`] transaction.
pub struct SqlTransaction {
    txn: Box<dyn DatabaseTransaction>,
    events: Vec<ChangeEvent>,
    feed: ChangeFeed,
}

impl std::fmt::Debug for SqlTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlTransaction")
            .field("pending_events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl SqlTransaction {
    fn db(&self) -> &dyn Database {
        self.txn.as_ref()
    }
}

/// Maps a serialization failure on a conditional claim to `Ok(None)`.
fn lost_race_as_none<T>(result: Result<T, DbError>) -> Result<Option<T>, DbError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_serialization_failure() => {
            log::debug!("Conditional write lost to a concurrent transaction: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl StoreReader for SqlTransaction {
    async fn get_organization(&self, id: Uuid) -> Result<Option<OrganizationRow>, DbError> {
        queries::get_organization(self.db(), id).await
    }

    async fn find_organization_by_code(
        &self,
        code: &str,
    ) -> Result<Option<OrganizationRow>, DbError> {
        queries::find_organization_by_code(self.db(), code).await
    }

    async fn get_base(&self, id: Uuid) -> Result<Option<BaseRow>, DbError> {
        queries::get_base(self.db(), id).await
    }

    async fn get_vehicle(&self, id: Uuid) -> Result<Option<VehicleRow>, DbError> {
        queries::get_vehicle(self.db(), id).await
    }

    async fn find_vehicle_by_identifier(
        &self,
        organization_id: Uuid,
        identifier: &str,
    ) -> Result<Option<VehicleRow>, DbError> {
        queries::find_vehicle_by_identifier(self.db(), organization_id, identifier).await
    }

    async fn list_vehicles(
        &self,
        organization_id: Uuid,
        status: Option<VehicleStatus>,
    ) -> Result<Vec<VehicleRow>, DbError> {
        queries::list_vehicles(self.db(), organization_id, status).await
    }

    async fn get_occurrence(&self, id: Uuid) -> Result<Option<OccurrenceRow>, DbError> {
        queries::get_occurrence(self.db(), id).await
    }

    async fn list_occurrences(
        &self,
        filter: &OccurrenceFilter,
    ) -> Result<Vec<OccurrenceRow>, DbError> {
        queries::list_occurrences(self.db(), filter).await
    }

    async fn get_dispatch(&self, id: Uuid) -> Result<Option<DispatchRow>, DbError> {
        queries::get_dispatch(self.db(), id).await
    }

    async fn list_dispatches_for_occurrence(
        &self,
        occurrence_id: Uuid,
    ) -> Result<Vec<DispatchRow>, DbError> {
        queries::list_dispatches_for_occurrence(self.db(), occurrence_id).await
    }

    async fn list_open_dispatches_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<DispatchRow>, DbError> {
        queries::list_open_dispatches_for_vehicle(self.db(), vehicle_id).await
    }

    async fn list_history(
        &self,
        occurrence_id: Uuid,
    ) -> Result<Vec<OccurrenceHistoryRow>, DbError> {
        queries::list_history(self.db(), occurrence_id).await
    }

    async fn active_crew_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<VehicleCrewRow>, DbError> {
        queries::active_crew_for_user(self.db(), user_id).await
    }

    async fn active_crew_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<VehicleCrewRow>, DbError> {
        queries::active_crew_for_vehicle(self.db(), vehicle_id).await
    }
}

#[async_trait]
impl StoreTransaction for SqlTransaction {
    async fn insert_organization(&mut self, row: &OrganizationRow) -> Result<(), DbError> {
        queries::insert_organization(self.db(), row).await?;
        self.events
            .push(ChangeEvent::insert(ChangeRecord::Organization(row.clone())));
        Ok(())
    }

    async fn insert_base(&mut self, row: &BaseRow) -> Result<(), DbError> {
        queries::insert_base(self.db(), row).await?;
        self.events
            .push(ChangeEvent::insert(ChangeRecord::Base(row.clone())));
        Ok(())
    }

    async fn insert_vehicle(&mut self, row: &VehicleRow) -> Result<(), DbError> {
        queries::insert_vehicle(self.db(), row).await?;
        self.events
            .push(ChangeEvent::insert(ChangeRecord::Vehicle(row.clone())));
        Ok(())
    }

    async fn update_vehicle_status(
        &mut self,
        id: Uuid,
        expected: VehicleStatus,
        status: VehicleStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let updated = lost_race_as_none(
            queries::update_vehicle_status(self.db(), id, expected, status, at).await,
        )?
        .flatten();
        Ok(updated.is_some_and(|row| {
            self.events
                .push(ChangeEvent::update(ChangeRecord::Vehicle(row)));
            true
        }))
    }

    async fn refresh_vehicle_status(
        &mut self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<VehicleRow>, DbError> {
        let updated = queries::refresh_vehicle_status(self.db(), id, at).await?;
        if let Some(row) = &updated {
            self.events
                .push(ChangeEvent::update(ChangeRecord::Vehicle(row.clone())));
        }
        Ok(updated)
    }

    async fn next_occurrence_number(
        &mut self,
        organization_id: Uuid,
        year: i32,
    ) -> Result<i64, DbError> {
        queries::next_occurrence_number(self.db(), organization_id, year).await
    }

    async fn insert_occurrence(&mut self, row: &OccurrenceRow) -> Result<(), DbError> {
        queries::insert_occurrence(self.db(), row).await?;
        self.events
            .push(ChangeEvent::insert(ChangeRecord::Occurrence(row.clone())));
        Ok(())
    }

    async fn update_occurrence_status(
        &mut self,
        id: Uuid,
        expected: OccurrenceStatus,
        update: &OccurrenceStatusUpdate,
    ) -> Result<Option<OccurrenceRow>, DbError> {
        let updated = queries::update_occurrence_status(self.db(), id, expected, update).await?;
        if let Some(row) = &updated {
            self.events
                .push(ChangeEvent::update(ChangeRecord::Occurrence(row.clone())));
        }
        Ok(updated)
    }

    async fn insert_dispatch(&mut self, row: &DispatchRow) -> Result<(), DbError> {
        queries::insert_dispatch(self.db(), row).await?;
        self.events
            .push(ChangeEvent::insert(ChangeRecord::Dispatch(row.clone())));
        Ok(())
    }

    async fn update_dispatch_status(
        &mut self,
        id: Uuid,
        expected: DispatchStatus,
        update: &DispatchStatusUpdate,
    ) -> Result<Option<DispatchRow>, DbError> {
        let updated = queries::update_dispatch_status(self.db(), id, expected, update).await?;
        if let Some(row) = &updated {
            self.events
                .push(ChangeEvent::update(ChangeRecord::Dispatch(row.clone())));
        }
        Ok(updated)
    }

    async fn append_history(
        &mut self,
        entry: &NewHistoryEntry,
    ) -> Result<OccurrenceHistoryRow, DbError> {
        let row = queries::append_history(self.db(), entry).await?;
        self.events
            .push(ChangeEvent::insert(ChangeRecord::History(row.clone())));
        Ok(row)
    }

    async fn insert_crew(&mut self, row: &VehicleCrewRow) -> Result<bool, DbError> {
        let inserted = lost_race_as_none(queries::insert_crew(self.db(), row).await)?
            .unwrap_or(false);
        if inserted {
            self.events
                .push(ChangeEvent::insert(ChangeRecord::Crew(row.clone())));
        }
        Ok(inserted)
    }

    async fn close_crew(&mut self, id: Uuid, left_at: DateTime<Utc>) -> Result<bool, DbError> {
        let closed = queries::close_crew(self.db(), id, left_at).await?;
        Ok(closed.is_some_and(|row| {
            self.events
                .push(ChangeEvent::update(ChangeRecord::Crew(row)));
            true
        }))
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let Self { txn, events, feed } = *self;
        txn.commit().await?;
        feed.publish(events);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        let Self { txn, events, .. } = *self;
        log::debug!("Rolling back transaction, discarding {} change events", events.len());
        txn.rollback().await?;
        Ok(())
    }
}
