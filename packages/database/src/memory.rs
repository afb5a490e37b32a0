//! In-memory [`Store`] backend.
//!
//! Transactions are serialised: [`MemoryStore::begin`] takes an owned lock
//! on the tables and works on a private copy, which replaces the shared
//! tables on commit. Dropping or rolling back the transaction discards
//! the copy. Reads on the store itself wait for any open transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sigor_database_models::{
    BaseRow, ChangeEvent, ChangeRecord, DispatchRow, DispatchStatusUpdate, NewHistoryEntry,
    OccurrenceFilter, OccurrenceHistoryRow, OccurrenceRow, OccurrenceStatusUpdate,
    OrganizationRow, VehicleCrewRow, VehicleRow,
};
use sigor_dispatch_models::{DispatchStatus, OccurrenceStatus, TimestampField, VehicleStatus};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::feed::DEFAULT_FEED_CAPACITY;
use crate::{ChangeFeed, DbError, Store, StoreReader, StoreTransaction};

#[derive(Debug, Clone, Default)]
struct Tables {
    organizations: BTreeMap<Uuid, OrganizationRow>,
    bases: BTreeMap<Uuid, BaseRow>,
    vehicles: BTreeMap<Uuid, VehicleRow>,
    occurrences: BTreeMap<Uuid, OccurrenceRow>,
    dispatches: BTreeMap<Uuid, DispatchRow>,
    history: Vec<OccurrenceHistoryRow>,
    crew: BTreeMap<Uuid, VehicleCrewRow>,
    sequences: BTreeMap<(Uuid, i32), i64>,
    last_history_seq: i64,
}

impl Tables {
    fn organization(&self, id: Uuid) -> Option<OrganizationRow> {
        self.organizations.get(&id).cloned()
    }

    fn organization_by_code(&self, code: &str) -> Option<OrganizationRow> {
        self.organizations
            .values()
            .find(|org| org.code == code)
            .cloned()
    }

    fn base(&self, id: Uuid) -> Option<BaseRow> {
        self.bases.get(&id).cloned()
    }

    fn vehicle(&self, id: Uuid) -> Option<VehicleRow> {
        self.vehicles.get(&id).cloned()
    }

    fn vehicle_by_identifier(&self, organization_id: Uuid, identifier: &str) -> Option<VehicleRow> {
        self.vehicles
            .values()
            .find(|v| v.organization_id == organization_id && v.identifier == identifier)
            .cloned()
    }

    fn vehicles(&self, organization_id: Uuid, status: Option<VehicleStatus>) -> Vec<VehicleRow> {
        let mut rows: Vec<_> = self
            .vehicles
            .values()
            .filter(|v| v.organization_id == organization_id)
            .filter(|v| status.is_none_or(|s| v.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        rows
    }

    fn occurrence(&self, id: Uuid) -> Option<OccurrenceRow> {
        self.occurrences.get(&id).cloned()
    }

    fn occurrences(&self, filter: &OccurrenceFilter) -> Vec<OccurrenceRow> {
        let mut rows: Vec<_> = self
            .occurrences
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        filter.order_and_limit(&mut rows);
        rows
    }

    fn dispatch(&self, id: Uuid) -> Option<DispatchRow> {
        self.dispatches.get(&id).cloned()
    }

    fn sorted_dispatches(&self, predicate: impl Fn(&DispatchRow) -> bool) -> Vec<DispatchRow> {
        let mut rows: Vec<_> = self
            .dispatches
            .values()
            .filter(|d| predicate(d))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.dispatched_at.cmp(&b.dispatched_at).then(a.id.cmp(&b.id)));
        rows
    }

    fn occurrence_dispatches(&self, occurrence_id: Uuid) -> Vec<DispatchRow> {
        self.sorted_dispatches(|d| d.occurrence_id == occurrence_id)
    }

    fn open_vehicle_dispatches(&self, vehicle_id: Uuid) -> Vec<DispatchRow> {
        self.sorted_dispatches(|d| d.vehicle_id == vehicle_id && d.status.is_open())
    }

    fn history(&self, occurrence_id: Uuid) -> Vec<OccurrenceHistoryRow> {
        let mut rows: Vec<_> = self
            .history
            .iter()
            .filter(|h| h.occurrence_id == occurrence_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
        rows
    }

    fn user_crew(&self, user_id: Uuid) -> Option<VehicleCrewRow> {
        self.crew
            .values()
            .find(|c| c.user_id == user_id && c.is_active)
            .cloned()
    }

    fn vehicle_crew(&self, vehicle_id: Uuid) -> Vec<VehicleCrewRow> {
        let mut rows: Vec<_> = self
            .crew
            .values()
            .filter(|c| c.vehicle_id == vehicle_id && c.is_active)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        rows
    }
}

/// A [`Store`] kept entirely in process memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Creates an empty store whose change feed buffers `capacity` events
    /// per subscriber.
    #[must_use]
    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            feed: ChangeFeed::new(capacity),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreReader for MemoryStore {
    async fn get_organization(&self, id: Uuid) -> Result<Option<OrganizationRow>, DbError> {
        Ok(self.tables.lock().await.organization(id))
    }

    async fn find_organization_by_code(
        &self,
        code: &str,
    ) -> Result<Option<OrganizationRow>, DbError> {
        Ok(self.tables.lock().await.organization_by_code(code))
    }

    async fn get_base(&self, id: Uuid) -> Result<Option<BaseRow>, DbError> {
        Ok(self.tables.lock().await.base(id))
    }

    async fn get_vehicle(&self, id: Uuid) -> Result<Option<VehicleRow>, DbError> {
        Ok(self.tables.lock().await.vehicle(id))
    }

    async fn find_vehicle_by_identifier(
        &self,
        organization_id: Uuid,
        identifier: &str,
    ) -> Result<Option<VehicleRow>, DbError> {
        Ok(self
            .tables
            .lock()
            .await
            .vehicle_by_identifier(organization_id, identifier))
    }

    async fn list_vehicles(
        &self,
        organization_id: Uuid,
        status: Option<VehicleStatus>,
    ) -> Result<Vec<VehicleRow>, DbError> {
        Ok(self.tables.lock().await.vehicles(organization_id, status))
    }

    async fn get_occurrence(&self, id: Uuid) -> Result<Option<OccurrenceRow>, DbError> {
        Ok(self.tables.lock().await.occurrence(id))
    }

    async fn list_occurrences(
        &self,
        filter: &OccurrenceFilter,
    ) -> Result<Vec<OccurrenceRow>, DbError> {
        Ok(self.tables.lock().await.occurrences(filter))
    }

    async fn get_dispatch(&self, id: Uuid) -> Result<Option<DispatchRow>, DbError> {
        Ok(self.tables.lock().await.dispatch(id))
    }

    async fn list_dispatches_for_occurrence(
        &self,
        occurrence_id: Uuid,
    ) -> Result<Vec<DispatchRow>, DbError> {
        Ok(self.tables.lock().await.occurrence_dispatches(occurrence_id))
    }

    async fn list_open_dispatches_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<DispatchRow>, DbError> {
        Ok(self.tables.lock().await.open_vehicle_dispatches(vehicle_id))
    }

    async fn list_history(
        &self,
        occurrence_id: Uuid,
    ) -> Result<Vec<OccurrenceHistoryRow>, DbError> {
        Ok(self.tables.lock().await.history(occurrence_id))
    }

    async fn active_crew_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<VehicleCrewRow>, DbError> {
        Ok(self.tables.lock().await.user_crew(user_id))
    }

    async fn active_crew_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<VehicleCrewRow>, DbError> {
        Ok(self.tables.lock().await.vehicle_crew(vehicle_id))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, DbError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            events: Vec::new(),
            feed: self.feed.clone(),
        }))
    }

    fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

/// An open [`MemoryStore`] transaction. Holds the store lock until it is
/// committed, rolled back or dropped.
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    events: Vec<ChangeEvent>,
    feed: ChangeFeed,
}

impl std::fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("pending_events", &self.events.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StoreReader for MemoryTransaction {
    async fn get_organization(&self, id: Uuid) -> Result<Option<OrganizationRow>, DbError> {
        Ok(self.working.organization(id))
    }

    async fn find_organization_by_code(
        &self,
        code: &str,
    ) -> Result<Option<OrganizationRow>, DbError> {
        Ok(self.working.organization_by_code(code))
    }

    async fn get_base(&self, id: Uuid) -> Result<Option<BaseRow>, DbError> {
        Ok(self.working.base(id))
    }

    async fn get_vehicle(&self, id: Uuid) -> Result<Option<VehicleRow>, DbError> {
        Ok(self.working.vehicle(id))
    }

    async fn find_vehicle_by_identifier(
        &self,
        organization_id: Uuid,
        identifier: &str,
    ) -> Result<Option<VehicleRow>, DbError> {
        Ok(self.working.vehicle_by_identifier(organization_id, identifier))
    }

    async fn list_vehicles(
        &self,
        organization_id: Uuid,
        status: Option<VehicleStatus>,
    ) -> Result<Vec<VehicleRow>, DbError> {
        Ok(self.working.vehicles(organization_id, status))
    }

    async fn get_occurrence(&self, id: Uuid) -> Result<Option<OccurrenceRow>, DbError> {
        Ok(self.working.occurrence(id))
    }

    async fn list_occurrences(
        &self,
        filter: &OccurrenceFilter,
    ) -> Result<Vec<OccurrenceRow>, DbError> {
        Ok(self.working.occurrences(filter))
    }

    async fn get_dispatch(&self, id: Uuid) -> Result<Option<DispatchRow>, DbError> {
        Ok(self.working.dispatch(id))
    }

    async fn list_dispatches_for_occurrence(
        &self,
        occurrence_id: Uuid,
    ) -> Result<Vec<DispatchRow>, DbError> {
        Ok(self.working.occurrence_dispatches(occurrence_id))
    }

    async fn list_open_dispatches_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<DispatchRow>, DbError> {
        Ok(self.working.open_vehicle_dispatches(vehicle_id))
    }

    async fn list_history(
        &self,
        occurrence_id: Uuid,
    ) -> Result<Vec<OccurrenceHistoryRow>, DbError> {
        Ok(self.working.history(occurrence_id))
    }

    async fn active_crew_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<VehicleCrewRow>, DbError> {
        Ok(self.working.user_crew(user_id))
    }

    async fn active_crew_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<VehicleCrewRow>, DbError> {
        Ok(self.working.vehicle_crew(vehicle_id))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_organization(&mut self, row: &OrganizationRow) -> Result<(), DbError> {
        if self.working.organizations.contains_key(&row.id)
            || self.working.organization_by_code(&row.code).is_some()
        {
            return Err(DbError::constraint(format!(
                "organization code {} already exists",
                row.code
            )));
        }
        self.working.organizations.insert(row.id, row.clone());
        self.events
            .push(ChangeEvent::insert(ChangeRecord::Organization(row.clone())));
        Ok(())
    }

    async fn insert_base(&mut self, row: &BaseRow) -> Result<(), DbError> {
        if !self.working.organizations.contains_key(&row.organization_id) {
            return Err(DbError::constraint(format!(
                "base references unknown organization {}",
                row.organization_id
            )));
        }
        self.working.bases.insert(row.id, row.clone());
        self.events
            .push(ChangeEvent::insert(ChangeRecord::Base(row.clone())));
        Ok(())
    }

    async fn insert_vehicle(&mut self, row: &VehicleRow) -> Result<(), DbError> {
        if !self.working.bases.contains_key(&row.base_id) {
            return Err(DbError::constraint(format!(
                "vehicle references unknown base {}",
                row.base_id
            )));
        }
        if self
            .working
            .vehicle_by_identifier(row.organization_id, &row.identifier)
            .is_some()
        {
            return Err(DbError::constraint(format!(
                "vehicle identifier {} already exists",
                row.identifier
            )));
        }
        self.working.vehicles.insert(row.id, row.clone());
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
        let Some(vehicle) = self.working.vehicles.get_mut(&id) else {
            return Ok(false);
        };
        if vehicle.status != expected {
            return Ok(false);
        }
        vehicle.status = status;
        vehicle.updated_at = at;
        self.events
            .push(ChangeEvent::update(ChangeRecord::Vehicle(vehicle.clone())));
        Ok(true)
    }

    async fn refresh_vehicle_status(
        &mut self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<VehicleRow>, DbError> {
        let crew = self.working.vehicle_crew(id).len();
        let open = self.working.open_vehicle_dispatches(id).len();
        let Some(vehicle) = self.working.vehicles.get_mut(&id) else {
            return Ok(None);
        };
        let derived = vehicle.status.derive(crew, open);
        if derived == vehicle.status {
            return Ok(None);
        }
        vehicle.status = derived;
        vehicle.updated_at = at;
        let row = vehicle.clone();
        self.events
            .push(ChangeEvent::update(ChangeRecord::Vehicle(row.clone())));
        Ok(Some(row))
    }

    async fn next_occurrence_number(
        &mut self,
        organization_id: Uuid,
        year: i32,
    ) -> Result<i64, DbError> {
        let counter = self
            .working
            .sequences
            .entry((organization_id, year))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_occurrence(&mut self, row: &OccurrenceRow) -> Result<(), DbError> {
        if !self.working.organizations.contains_key(&row.organization_id) {
            return Err(DbError::constraint(format!(
                "occurrence references unknown organization {}",
                row.organization_id
            )));
        }
        if self.working.occurrences.values().any(|o| o.code == row.code) {
            return Err(DbError::constraint(format!(
                "occurrence code {} already exists",
                row.code
            )));
        }
        self.working.occurrences.insert(row.id, row.clone());
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
        let Some(occurrence) = self.working.occurrences.get_mut(&id) else {
            return Ok(None);
        };
        if occurrence.status != expected {
            return Ok(None);
        }
        occurrence.status = update.status;
        occurrence.updated_at = update.updated_at;
        occurrence.closed_at = occurrence.closed_at.or(update.closed_at);
        occurrence.closed_by = occurrence.closed_by.or(update.closed_by);
        let row = occurrence.clone();
        self.events
            .push(ChangeEvent::update(ChangeRecord::Occurrence(row.clone())));
        Ok(Some(row))
    }

    async fn insert_dispatch(&mut self, row: &DispatchRow) -> Result<(), DbError> {
        if !self.working.occurrences.contains_key(&row.occurrence_id)
            || !self.working.vehicles.contains_key(&row.vehicle_id)
        {
            return Err(DbError::constraint(
                "dispatch references unknown occurrence or vehicle",
            ));
        }
        self.working.dispatches.insert(row.id, row.clone());
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
        let Some(dispatch) = self.working.dispatches.get_mut(&id) else {
            return Ok(None);
        };
        if dispatch.status != expected {
            return Ok(None);
        }
        dispatch.status = update.status;
        let column = match update.status.stamps() {
            Some(TimestampField::Acknowledged) => Some(&mut dispatch.acknowledged_at),
            Some(TimestampField::Arrived) => Some(&mut dispatch.arrived_at),
            Some(TimestampField::Completed) => Some(&mut dispatch.completed_at),
            None => None,
        };
        if let Some(column) = column {
            column.get_or_insert(update.at);
        }
        let row = dispatch.clone();
        self.events
            .push(ChangeEvent::update(ChangeRecord::Dispatch(row.clone())));
        Ok(Some(row))
    }

    async fn append_history(
        &mut self,
        entry: &NewHistoryEntry,
    ) -> Result<OccurrenceHistoryRow, DbError> {
        if !self.working.occurrences.contains_key(&entry.occurrence_id) {
            return Err(DbError::constraint(format!(
                "history references unknown occurrence {}",
                entry.occurrence_id
            )));
        }
        self.working.last_history_seq += 1;
        let row = OccurrenceHistoryRow {
            id: Uuid::new_v4(),
            seq: self.working.last_history_seq,
            occurrence_id: entry.occurrence_id,
            dispatch_id: entry.dispatch_id,
            previous_status: entry.previous_status,
            new_status: entry.new_status,
            changed_by: entry.changed_by,
            notes: entry.notes.clone(),
            created_at: entry.created_at,
        };
        self.working.history.push(row.clone());
        self.events
            .push(ChangeEvent::insert(ChangeRecord::History(row.clone())));
        Ok(row)
    }

    async fn insert_crew(&mut self, row: &VehicleCrewRow) -> Result<bool, DbError> {
        if !self.working.vehicles.contains_key(&row.vehicle_id) {
            return Err(DbError::constraint(format!(
                "crew references unknown vehicle {}",
                row.vehicle_id
            )));
        }
        if self.working.user_crew(row.user_id).is_some() {
            return Ok(false);
        }
        self.working.crew.insert(row.id, row.clone());
        self.events
            .push(ChangeEvent::insert(ChangeRecord::Crew(row.clone())));
        Ok(true)
    }

    async fn close_crew(&mut self, id: Uuid, left_at: DateTime<Utc>) -> Result<bool, DbError> {
        let Some(crew) = self.working.crew.get_mut(&id) else {
            return Ok(false);
        };
        if !crew.is_active {
            return Ok(false);
        }
        crew.is_active = false;
        crew.left_at = Some(left_at);
        self.events
            .push(ChangeEvent::update(ChangeRecord::Crew(crew.clone())));
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let Self {
            mut guard,
            working,
            events,
            feed,
        } = *self;
        *guard = working;
        // Publishing before unlocking keeps the feed in commit order.
        feed.publish(events);
        drop(guard);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        log::trace!("Rolling back in-memory transaction with {} pending events", self.events.len());
        Ok(())
    }
}
