//! The generic transactional store contract.
//!
//! Reads are available both on the store itself (autocommit snapshots) and
//! inside a transaction. All writes happen inside a [`StoreTransaction`];
//! conditional writes take the expected prior value and report whether
//! they applied, which is how every atomic claim is expressed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sigor_database_models::{
    BaseRow, DispatchRow, DispatchStatusUpdate, NewHistoryEntry, OccurrenceFilter,
    OccurrenceHistoryRow, OccurrenceRow, OccurrenceStatusUpdate, OrganizationRow,
    VehicleCrewRow, VehicleRow,
};
use sigor_dispatch_models::{DispatchStatus, OccurrenceStatus, VehicleStatus};
use uuid::Uuid;

use crate::{ChangeFeed, ChangeSubscription, DbError};

/// Read access shared by stores and open transactions.
#[async_trait]
pub trait StoreReader: Send + Sync {
    async fn get_organization(&self, id: Uuid) -> Result<Option<OrganizationRow>, DbError>;

    async fn find_organization_by_code(
        &self,
        code: &str,
    ) -> Result<Option<OrganizationRow>, DbError>;

    async fn get_base(&self, id: Uuid) -> Result<Option<BaseRow>, DbError>;

    async fn get_vehicle(&self, id: Uuid) -> Result<Option<VehicleRow>, DbError>;

    /// Looks a vehicle up by its human identifier within an organization.
    async fn find_vehicle_by_identifier(
        &self,
        organization_id: Uuid,
        identifier: &str,
    ) -> Result<Option<VehicleRow>, DbError>;

    /// Lists an organization's vehicles ordered by identifier, optionally
    /// restricted to one status.
    async fn list_vehicles(
        &self,
        organization_id: Uuid,
        status: Option<VehicleStatus>,
    ) -> Result<Vec<VehicleRow>, DbError>;

    async fn get_occurrence(&self, id: Uuid) -> Result<Option<OccurrenceRow>, DbError>;

    /// Lists occurrences matching `filter`, highest priority first, then
    /// newest first.
    async fn list_occurrences(
        &self,
        filter: &OccurrenceFilter,
    ) -> Result<Vec<OccurrenceRow>, DbError>;

    async fn get_dispatch(&self, id: Uuid) -> Result<Option<DispatchRow>, DbError>;

    /// Every dispatch of an occurrence, oldest first.
    async fn list_dispatches_for_occurrence(
        &self,
        occurrence_id: Uuid,
    ) -> Result<Vec<DispatchRow>, DbError>;

    /// Dispatches still holding the vehicle, oldest first.
    async fn list_open_dispatches_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<DispatchRow>, DbError>;

    /// History of an occurrence ordered by `(created_at, seq)`.
    async fn list_history(&self, occurrence_id: Uuid)
    -> Result<Vec<OccurrenceHistoryRow>, DbError>;

    async fn active_crew_for_user(&self, user_id: Uuid)
    -> Result<Option<VehicleCrewRow>, DbError>;

    /// Active crew of a vehicle ordered by join time.
    async fn active_crew_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<VehicleCrewRow>, DbError>;
}

/// One atomic unit of work.
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it
/// back. Change events recorded by the write methods reach the feed only on
/// a successful commit.
#[async_trait]
pub trait StoreTransaction: StoreReader {
    async fn insert_organization(&mut self, row: &OrganizationRow) -> Result<(), DbError>;

    async fn insert_base(&mut self, row: &BaseRow) -> Result<(), DbError>;

    async fn insert_vehicle(&mut self, row: &VehicleRow) -> Result<(), DbError>;

    /// Sets a vehicle's status only if it currently equals `expected`.
    ///
    /// Returns whether the update applied.
    async fn update_vehicle_status(
        &mut self,
        id: Uuid,
        expected: VehicleStatus,
        status: VehicleStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError>;

    /// Recomputes a vehicle's status from its active crew and open
    /// dispatches in a single statement (see [`VehicleStatus::derive`]).
    ///
    /// Returns the updated row when the status changed.
    async fn refresh_vehicle_status(
        &mut self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<VehicleRow>, DbError>;

    /// Atomically advances and returns the occurrence counter for an
    /// organization and year, starting at 1.
    async fn next_occurrence_number(
        &mut self,
        organization_id: Uuid,
        year: i32,
    ) -> Result<i64, DbError>;

    async fn insert_occurrence(&mut self, row: &OccurrenceRow) -> Result<(), DbError>;

    /// Applies `update` only if the occurrence status equals `expected`.
    ///
    /// Returns the updated row when the update applied.
    async fn update_occurrence_status(
        &mut self,
        id: Uuid,
        expected: OccurrenceStatus,
        update: &OccurrenceStatusUpdate,
    ) -> Result<Option<OccurrenceRow>, DbError>;

    async fn insert_dispatch(&mut self, row: &DispatchRow) -> Result<(), DbError>;

    /// Applies `update` only if the dispatch status equals `expected`,
    /// stamping the column named by [`DispatchStatus::stamps`] if empty.
    ///
    /// Returns the updated row when the update applied.
    async fn update_dispatch_status(
        &mut self,
        id: Uuid,
        expected: DispatchStatus,
        update: &DispatchStatusUpdate,
    ) -> Result<Option<DispatchRow>, DbError>;

    async fn append_history(
        &mut self,
        entry: &NewHistoryEntry,
    ) -> Result<OccurrenceHistoryRow, DbError>;

    /// Inserts an active crew row unless the user already has one.
    ///
    /// Returns whether the row was inserted.
    async fn insert_crew(&mut self, row: &VehicleCrewRow) -> Result<bool, DbError>;

    /// Marks an active crew row as left.
    ///
    /// Returns whether the row was still active.
    async fn close_crew(&mut self, id: Uuid, left_at: DateTime<Utc>) -> Result<bool, DbError>;

    /// Commits the transaction and publishes its change events.
    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    /// Discards every write made through this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// A transactional store with a change feed.
#[async_trait]
pub trait Store: StoreReader {
    /// Starts a new transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, DbError>;

    /// The feed on which committed changes are published.
    fn feed(&self) -> &ChangeFeed;

    /// Shorthand for `self.feed().subscribe()`.
    fn subscribe(&self) -> ChangeSubscription {
        self.feed().subscribe()
    }
}
