//! Raw SQL for the PostgreSQL backend.
//!
//! Every function takes a `&dyn Database`, which is either the pooled
//! connection or an open transaction. Ids are stored as TEXT and
//! timestamps as UTC `TIMESTAMP`.

use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use sigor_database_models::{
    BaseRow, DispatchRow, DispatchStatusUpdate, NewHistoryEntry, OccurrenceFilter,
    OccurrenceHistoryRow, OccurrenceRow, OccurrenceStatusUpdate, OrganizationRow,
    VehicleCrewRow, VehicleRow,
};
use sigor_dispatch_models::{DispatchStatus, OccurrenceStatus, TimestampField, VehicleStatus};
use switchy_database::{Database, DatabaseValue, Row};
use uuid::Uuid;

use crate::DbError;

fn id_value(id: Uuid) -> DatabaseValue {
    DatabaseValue::String(id.to_string())
}

fn opt_id_value(id: Option<Uuid>) -> DatabaseValue {
    id.map_or(DatabaseValue::Null, id_value)
}

fn text_value(value: &str) -> DatabaseValue {
    DatabaseValue::String(value.to_string())
}

fn opt_text_value(value: Option<&str>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, text_value)
}

fn time_value(at: DateTime<Utc>) -> DatabaseValue {
    DatabaseValue::DateTime(at.naive_utc())
}

fn opt_time_value(at: Option<DateTime<Utc>>) -> DatabaseValue {
    at.map_or(DatabaseValue::Null, time_value)
}

fn opt_real_value(value: Option<f64>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, DatabaseValue::Real64)
}

fn bad_column(column: &str, e: impl std::fmt::Display) -> DbError {
    DbError::conversion(format!("Failed to parse column {column}: {e}"))
}

fn get_string(row: &Row, column: &str) -> Result<String, DbError> {
    row.to_value(column).map_err(|e| bad_column(column, e))
}

fn get_opt_string(row: &Row, column: &str) -> Result<Option<String>, DbError> {
    row.to_value(column).map_err(|e| bad_column(column, e))
}

fn get_id(row: &Row, column: &str) -> Result<Uuid, DbError> {
    let text = get_string(row, column)?;
    Uuid::parse_str(&text).map_err(|e| bad_column(column, e))
}

fn get_opt_id(row: &Row, column: &str) -> Result<Option<Uuid>, DbError> {
    get_opt_string(row, column)?
        .map(|text| Uuid::parse_str(&text).map_err(|e| bad_column(column, e)))
        .transpose()
}

fn get_enum<T: FromStr>(row: &Row, column: &str) -> Result<T, DbError>
where
    T::Err: std::fmt::Display,
{
    let text = get_string(row, column)?;
    text.parse().map_err(|e| bad_column(column, e))
}

fn get_opt_enum<T: FromStr>(row: &Row, column: &str) -> Result<Option<T>, DbError>
where
    T::Err: std::fmt::Display,
{
    get_opt_string(row, column)?
        .map(|text| text.parse().map_err(|e| bad_column(column, e)))
        .transpose()
}

fn get_time(row: &Row, column: &str) -> Result<DateTime<Utc>, DbError> {
    let naive: NaiveDateTime = row.to_value(column).map_err(|e| bad_column(column, e))?;
    Ok(naive.and_utc())
}

fn get_opt_time(row: &Row, column: &str) -> Result<Option<DateTime<Utc>>, DbError> {
    let naive: Option<NaiveDateTime> = row.to_value(column).map_err(|e| bad_column(column, e))?;
    Ok(naive.map(|n| n.and_utc()))
}

fn get_opt_real(row: &Row, column: &str) -> Result<Option<f64>, DbError> {
    row.to_value(column).map_err(|e| bad_column(column, e))
}

fn organization_from_row(row: &Row) -> Result<OrganizationRow, DbError> {
    Ok(OrganizationRow {
        id: get_id(row, "id")?,
        name: get_string(row, "name")?,
        code: get_string(row, "code")?,
        organization_type: get_enum(row, "type")?,
        phone: get_opt_string(row, "phone")?,
        created_at: get_time(row, "created_at")?,
    })
}

fn base_from_row(row: &Row) -> Result<BaseRow, DbError> {
    Ok(BaseRow {
        id: get_id(row, "id")?,
        organization_id: get_id(row, "organization_id")?,
        name: get_string(row, "name")?,
        address: get_opt_string(row, "address")?,
        latitude: get_opt_real(row, "latitude")?,
        longitude: get_opt_real(row, "longitude")?,
        is_active: row
            .to_value("is_active")
            .map_err(|e| bad_column("is_active", e))?,
        created_at: get_time(row, "created_at")?,
    })
}

fn vehicle_from_row(row: &Row) -> Result<VehicleRow, DbError> {
    let capacity: Option<i32> = row
        .to_value("capacity")
        .map_err(|e| bad_column("capacity", e))?;
    Ok(VehicleRow {
        id: get_id(row, "id")?,
        base_id: get_id(row, "base_id")?,
        organization_id: get_id(row, "organization_id")?,
        identifier: get_string(row, "identifier")?,
        vehicle_type: get_string(row, "type")?,
        capacity,
        status: get_enum(row, "status")?,
        created_at: get_time(row, "created_at")?,
        updated_at: get_time(row, "updated_at")?,
    })
}

fn occurrence_from_row(row: &Row) -> Result<OccurrenceRow, DbError> {
    Ok(OccurrenceRow {
        id: get_id(row, "id")?,
        organization_id: get_id(row, "organization_id")?,
        code: get_string(row, "code")?,
        occurrence_type: get_enum(row, "type")?,
        priority: get_enum(row, "priority")?,
        status: get_enum(row, "status")?,
        title: get_string(row, "title")?,
        description: get_opt_string(row, "description")?,
        caller_name: get_opt_string(row, "caller_name")?,
        caller_phone: get_opt_string(row, "caller_phone")?,
        location_address: get_opt_string(row, "location_address")?,
        location_reference: get_opt_string(row, "location_reference")?,
        latitude: get_opt_real(row, "latitude")?,
        longitude: get_opt_real(row, "longitude")?,
        created_by: get_id(row, "created_by")?,
        created_at: get_time(row, "created_at")?,
        updated_at: get_time(row, "updated_at")?,
        closed_at: get_opt_time(row, "closed_at")?,
        closed_by: get_opt_id(row, "closed_by")?,
    })
}

fn dispatch_from_row(row: &Row) -> Result<DispatchRow, DbError> {
    Ok(DispatchRow {
        id: get_id(row, "id")?,
        occurrence_id: get_id(row, "occurrence_id")?,
        vehicle_id: get_id(row, "vehicle_id")?,
        organization_id: get_id(row, "organization_id")?,
        dispatched_by: get_id(row, "dispatched_by")?,
        status: get_enum(row, "status")?,
        dispatched_at: get_time(row, "dispatched_at")?,
        acknowledged_at: get_opt_time(row, "acknowledged_at")?,
        arrived_at: get_opt_time(row, "arrived_at")?,
        completed_at: get_opt_time(row, "completed_at")?,
        notes: get_opt_string(row, "notes")?,
    })
}

fn history_from_row(row: &Row) -> Result<OccurrenceHistoryRow, DbError> {
    Ok(OccurrenceHistoryRow {
        id: get_id(row, "id")?,
        seq: row.to_value("seq").map_err(|e| bad_column("seq", e))?,
        occurrence_id: get_id(row, "occurrence_id")?,
        dispatch_id: get_opt_id(row, "dispatch_id")?,
        previous_status: get_opt_enum(row, "previous_status")?,
        new_status: get_enum(row, "new_status")?,
        changed_by: get_id(row, "changed_by")?,
        notes: get_opt_string(row, "notes")?,
        created_at: get_time(row, "created_at")?,
    })
}

fn crew_from_row(row: &Row) -> Result<VehicleCrewRow, DbError> {
    Ok(VehicleCrewRow {
        id: get_id(row, "id")?,
        vehicle_id: get_id(row, "vehicle_id")?,
        user_id: get_id(row, "user_id")?,
        joined_at: get_time(row, "joined_at")?,
        left_at: get_opt_time(row, "left_at")?,
        is_active: row
            .to_value("is_active")
            .map_err(|e| bad_column("is_active", e))?,
    })
}

async fn fetch_optional<T>(
    db: &dyn Database,
    sql: &str,
    params: &[DatabaseValue],
    map: fn(&Row) -> Result<T, DbError>,
) -> Result<Option<T>, DbError> {
    let rows = db.query_raw_params(sql, params).await?;
    rows.first().map(map).transpose()
}

async fn fetch_all<T>(
    db: &dyn Database,
    sql: &str,
    params: &[DatabaseValue],
    map: fn(&Row) -> Result<T, DbError>,
) -> Result<Vec<T>, DbError> {
    let rows = db.query_raw_params(sql, params).await?;
    rows.iter().map(map).collect()
}

// Reads

/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn get_organization(
    db: &dyn Database,
    id: Uuid,
) -> Result<Option<OrganizationRow>, DbError> {
    fetch_optional(
        db,
        "SELECT * FROM organizations WHERE id = $1",
        &[id_value(id)],
        organization_from_row,
    )
    .await
}

/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn find_organization_by_code(
    db: &dyn Database,
    code: &str,
) -> Result<Option<OrganizationRow>, DbError> {
    fetch_optional(
        db,
        "SELECT * FROM organizations WHERE code = $1",
        &[text_value(code)],
        organization_from_row,
    )
    .await
}

/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn get_base(db: &dyn Database, id: Uuid) -> Result<Option<BaseRow>, DbError> {
    fetch_optional(
        db,
        "SELECT * FROM bases WHERE id = $1",
        &[id_value(id)],
        base_from_row,
    )
    .await
}

/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn get_vehicle(db: &dyn Database, id: Uuid) -> Result<Option<VehicleRow>, DbError> {
    fetch_optional(
        db,
        "SELECT * FROM vehicles WHERE id = $1",
        &[id_value(id)],
        vehicle_from_row,
    )
    .await
}

/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn find_vehicle_by_identifier(
    db: &dyn Database,
    organization_id: Uuid,
    identifier: &str,
) -> Result<Option<VehicleRow>, DbError> {
    fetch_optional(
        db,
        "SELECT * FROM vehicles WHERE organization_id = $1 AND identifier = $2",
        &[id_value(organization_id), text_value(identifier)],
        vehicle_from_row,
    )
    .await
}

/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn list_vehicles(
    db: &dyn Database,
    organization_id: Uuid,
    status: Option<VehicleStatus>,
) -> Result<Vec<VehicleRow>, DbError> {
    match status {
        Some(status) => {
            fetch_all(
                db,
                "SELECT * FROM vehicles WHERE organization_id = $1 AND status = $2
                 ORDER BY identifier",
                &[id_value(organization_id), text_value(status.as_ref())],
                vehicle_from_row,
            )
            .await
        }
        None => {
            fetch_all(
                db,
                "SELECT * FROM vehicles WHERE organization_id = $1 ORDER BY identifier",
                &[id_value(organization_id)],
                vehicle_from_row,
            )
            .await
        }
    }
}

/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn get_occurrence(
    db: &dyn Database,
    id: Uuid,
) -> Result<Option<OccurrenceRow>, DbError> {
    fetch_optional(
        db,
        "SELECT * FROM occurrences WHERE id = $1",
        &[id_value(id)],
        occurrence_from_row,
    )
    .await
}

/// Lists occurrences matching `filter`.
///
/// Builds the WHERE clause dynamically; ordering is by priority rank
/// descending, then `created_at` descending.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn list_occurrences(
    db: &dyn Database,
    filter: &OccurrenceFilter,
) -> Result<Vec<OccurrenceRow>, DbError> {
    let mut sql = String::from("SELECT * FROM occurrences WHERE TRUE");
    let mut params: Vec<DatabaseValue> = Vec::new();

    if let Some(organization_id) = filter.organization_id {
        params.push(id_value(organization_id));
        let _ = write!(sql, " AND organization_id = ${}", params.len());
    }

    if !filter.statuses.is_empty() {
        let mut placeholders = Vec::with_capacity(filter.statuses.len());
        for status in &filter.statuses {
            params.push(text_value(status.as_ref()));
            placeholders.push(format!("${}", params.len()));
        }
        let _ = write!(sql, " AND status IN ({})", placeholders.join(", "));
    }

    if !filter.types.is_empty() {
        let mut placeholders = Vec::with_capacity(filter.types.len());
        for occurrence_type in &filter.types {
            params.push(text_value(occurrence_type.as_ref()));
            placeholders.push(format!("${}", params.len()));
        }
        let _ = write!(sql, " AND type IN ({})", placeholders.join(", "));
    }

    if let Some(priority) = filter.priority {
        params.push(text_value(priority.as_ref()));
        let _ = write!(sql, " AND priority = ${}", params.len());
    }

    if let Some(term) = filter.normalized_search() {
        params.push(DatabaseValue::String(format!("%{term}%")));
        let n = params.len();
        let _ = write!(
            sql,
            " AND (LOWER(code) LIKE ${n} OR LOWER(title) LIKE ${n}
                   OR LOWER(COALESCE(location_address, '')) LIKE ${n})"
        );
    }

    if let Some(from) = filter.created_from {
        params.push(time_value(from));
        let _ = write!(sql, " AND created_at >= ${}", params.len());
    }

    if let Some(to) = filter.created_to {
        params.push(time_value(to));
        let _ = write!(sql, " AND created_at < ${}", params.len());
    }

    sql.push_str(
        " ORDER BY CASE priority
             WHEN 'critical' THEN 4 WHEN 'high' THEN 3 WHEN 'medium' THEN 2 ELSE 1
         END DESC, created_at DESC",
    );

    if let Some(limit) = filter.limit {
        let _ = write!(sql, " LIMIT {limit}");
    }

    fetch_all(db, &sql, &params, occurrence_from_row).await
}

/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn get_dispatch(db: &dyn Database, id: Uuid) -> Result<Option<DispatchRow>, DbError> {
    fetch_optional(
        db,
        "SELECT * FROM dispatches WHERE id = $1",
        &[id_value(id)],
        dispatch_from_row,
    )
    .await
}

/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn list_dispatches_for_occurrence(
    db: &dyn Database,
    occurrence_id: Uuid,
) -> Result<Vec<DispatchRow>, DbError> {
    fetch_all(
        db,
        "SELECT * FROM dispatches WHERE occurrence_id = $1 ORDER BY dispatched_at, id",
        &[id_value(occurrence_id)],
        dispatch_from_row,
    )
    .await
}

/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn list_open_dispatches_for_vehicle(
    db: &dyn Database,
    vehicle_id: Uuid,
) -> Result<Vec<DispatchRow>, DbError> {
    fetch_all(
        db,
        "SELECT * FROM dispatches
         WHERE vehicle_id = $1 AND status NOT IN ('completed', 'cancelled')
         ORDER BY dispatched_at, id",
        &[id_value(vehicle_id)],
        dispatch_from_row,
    )
    .await
}

/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn list_history(
    db: &dyn Database,
    occurrence_id: Uuid,
) -> Result<Vec<OccurrenceHistoryRow>, DbError> {
    fetch_all(
        db,
        "SELECT * FROM occurrence_history WHERE occurrence_id = $1 ORDER BY created_at, seq",
        &[id_value(occurrence_id)],
        history_from_row,
    )
    .await
}

/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn active_crew_for_user(
    db: &dyn Database,
    user_id: Uuid,
) -> Result<Option<VehicleCrewRow>, DbError> {
    fetch_optional(
        db,
        "SELECT * FROM vehicle_crew WHERE user_id = $1 AND is_active",
        &[id_value(user_id)],
        crew_from_row,
    )
    .await
}

/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be parsed.
pub async fn active_crew_for_vehicle(
    db: &dyn Database,
    vehicle_id: Uuid,
) -> Result<Vec<VehicleCrewRow>, DbError> {
    fetch_all(
        db,
        "SELECT * FROM vehicle_crew WHERE vehicle_id = $1 AND is_active
         ORDER BY joined_at, id",
        &[id_value(vehicle_id)],
        crew_from_row,
    )
    .await
}

// Writes

/// # Errors
///
/// Returns [`DbError`] if the insert fails (including a duplicate code).
pub async fn insert_organization(db: &dyn Database, row: &OrganizationRow) -> Result<(), DbError> {
    db.exec_raw_params(
        "INSERT INTO organizations (id, name, code, type, phone, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
        &[
            id_value(row.id),
            text_value(&row.name),
            text_value(&row.code),
            text_value(row.organization_type.as_ref()),
            opt_text_value(row.phone.as_deref()),
            time_value(row.created_at),
        ],
    )
    .await?;
    Ok(())
}

/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn insert_base(db: &dyn Database, row: &BaseRow) -> Result<(), DbError> {
    db.exec_raw_params(
        "INSERT INTO bases (id, organization_id, name, address, latitude, longitude, is_active, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        &[
            id_value(row.id),
            id_value(row.organization_id),
            text_value(&row.name),
            opt_text_value(row.address.as_deref()),
            opt_real_value(row.latitude),
            opt_real_value(row.longitude),
            DatabaseValue::Bool(row.is_active),
            time_value(row.created_at),
        ],
    )
    .await?;
    Ok(())
}

/// # Errors
///
/// Returns [`DbError`] if the insert fails (including a duplicate
/// identifier within the organization).
pub async fn insert_vehicle(db: &dyn Database, row: &VehicleRow) -> Result<(), DbError> {
    db.exec_raw_params(
        "INSERT INTO vehicles (
            id, base_id, organization_id, identifier, type, capacity, status,
            created_at, updated_at
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        &[
            id_value(row.id),
            id_value(row.base_id),
            id_value(row.organization_id),
            text_value(&row.identifier),
            text_value(&row.vehicle_type),
            row.capacity.map_or(DatabaseValue::Null, DatabaseValue::Int32),
            text_value(row.status.as_ref()),
            time_value(row.created_at),
            time_value(row.updated_at),
        ],
    )
    .await?;
    Ok(())
}

/// Conditional status update; returns the updated row if the vehicle was
/// in `expected`.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub async fn update_vehicle_status(
    db: &dyn Database,
    id: Uuid,
    expected: VehicleStatus,
    status: VehicleStatus,
    at: DateTime<Utc>,
) -> Result<Option<VehicleRow>, DbError> {
    fetch_optional(
        db,
        "UPDATE vehicles SET status = $3, updated_at = $4
         WHERE id = $1 AND status = $2
         RETURNING *",
        &[
            id_value(id),
            text_value(expected.as_ref()),
            text_value(status.as_ref()),
            time_value(at),
        ],
        vehicle_from_row,
    )
    .await
}

/// Recomputes the derived vehicle status in one statement. Returns the row
/// only when the status changed.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub async fn refresh_vehicle_status(
    db: &dyn Database,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<Option<VehicleRow>, DbError> {
    fetch_optional(
        db,
        "WITH derived AS (
            SELECT v.id,
                   CASE
                       WHEN EXISTS (
                           SELECT 1 FROM vehicle_crew c
                           WHERE c.vehicle_id = v.id AND c.is_active
                       ) OR EXISTS (
                           SELECT 1 FROM dispatches d
                           WHERE d.vehicle_id = v.id
                             AND d.status NOT IN ('completed', 'cancelled')
                       ) THEN 'busy'
                       WHEN v.status = 'busy' THEN 'available'
                       ELSE v.status
                   END AS status
            FROM vehicles v
            WHERE v.id = $1
         )
         UPDATE vehicles
         SET status = derived.status, updated_at = $2
         FROM derived
         WHERE vehicles.id = derived.id AND vehicles.status <> derived.status
         RETURNING vehicles.*",
        &[id_value(id), time_value(at)],
        vehicle_from_row,
    )
    .await
}

/// Advances the `(organization, year)` counter and returns its new value.
///
/// # Errors
///
/// Returns [`DbError`] if the upsert fails.
pub async fn next_occurrence_number(
    db: &dyn Database,
    organization_id: Uuid,
    year: i32,
) -> Result<i64, DbError> {
    let rows = db
        .query_raw_params(
            "INSERT INTO occurrence_sequences (organization_id, year, last_value)
             VALUES ($1, $2, 1)
             ON CONFLICT (organization_id, year) DO UPDATE
                 SET last_value = occurrence_sequences.last_value + 1
             RETURNING last_value",
            &[id_value(organization_id), DatabaseValue::Int32(year)],
        )
        .await?;

    let row = rows
        .first()
        .ok_or_else(|| DbError::conversion("Failed to get occurrence sequence value"))?;

    row.to_value("last_value")
        .map_err(|e| bad_column("last_value", e))
}

/// # Errors
///
/// Returns [`DbError`] if the insert fails (including a duplicate code).
pub async fn insert_occurrence(db: &dyn Database, row: &OccurrenceRow) -> Result<(), DbError> {
    db.exec_raw_params(
        "INSERT INTO occurrences (
            id, organization_id, code, type, priority, status, title, description,
            caller_name, caller_phone, location_address, location_reference,
            latitude, longitude, created_by, created_at, updated_at, closed_at, closed_by
         ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
            $11, $12, $13, $14, $15, $16, $17, $18, $19
         )",
        &[
            id_value(row.id),
            id_value(row.organization_id),
            text_value(&row.code),
            text_value(row.occurrence_type.as_ref()),
            text_value(row.priority.as_ref()),
            text_value(row.status.as_ref()),
            text_value(&row.title),
            opt_text_value(row.description.as_deref()),
            opt_text_value(row.caller_name.as_deref()),
            opt_text_value(row.caller_phone.as_deref()),
            opt_text_value(row.location_address.as_deref()),
            opt_text_value(row.location_reference.as_deref()),
            opt_real_value(row.latitude),
            opt_real_value(row.longitude),
            id_value(row.created_by),
            time_value(row.created_at),
            time_value(row.updated_at),
            opt_time_value(row.closed_at),
            opt_id_value(row.closed_by),
        ],
    )
    .await?;
    Ok(())
}

/// Conditional status update; `closed_at`/`closed_by` are only written
/// while still empty.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub async fn update_occurrence_status(
    db: &dyn Database,
    id: Uuid,
    expected: OccurrenceStatus,
    update: &OccurrenceStatusUpdate,
) -> Result<Option<OccurrenceRow>, DbError> {
    fetch_optional(
        db,
        "UPDATE occurrences
         SET status = $3,
             updated_at = $4,
             closed_at = COALESCE(closed_at, $5),
             closed_by = COALESCE(closed_by, $6)
         WHERE id = $1 AND status = $2
         RETURNING *",
        &[
            id_value(id),
            text_value(expected.as_ref()),
            text_value(update.status.as_ref()),
            time_value(update.updated_at),
            opt_time_value(update.closed_at),
            opt_id_value(update.closed_by),
        ],
        occurrence_from_row,
    )
    .await
}

/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn insert_dispatch(db: &dyn Database, row: &DispatchRow) -> Result<(), DbError> {
    db.exec_raw_params(
        "INSERT INTO dispatches (
            id, occurrence_id, vehicle_id, organization_id, dispatched_by, status,
            dispatched_at, acknowledged_at, arrived_at, completed_at, notes
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        &[
            id_value(row.id),
            id_value(row.occurrence_id),
            id_value(row.vehicle_id),
            id_value(row.organization_id),
            id_value(row.dispatched_by),
            text_value(row.status.as_ref()),
            time_value(row.dispatched_at),
            opt_time_value(row.acknowledged_at),
            opt_time_value(row.arrived_at),
            opt_time_value(row.completed_at),
            opt_text_value(row.notes.as_deref()),
        ],
    )
    .await?;
    Ok(())
}

/// Conditional status update stamping the transition's timestamp column
/// if it is still empty.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub async fn update_dispatch_status(
    db: &dyn Database,
    id: Uuid,
    expected: DispatchStatus,
    update: &DispatchStatusUpdate,
) -> Result<Option<DispatchRow>, DbError> {
    let stamp_column = update.status.stamps().map(|field| match field {
        TimestampField::Acknowledged => "acknowledged_at",
        TimestampField::Arrived => "arrived_at",
        TimestampField::Completed => "completed_at",
    });

    let mut sql = String::from("UPDATE dispatches SET status = $3");
    let mut params = vec![
        id_value(id),
        text_value(expected.as_ref()),
        text_value(update.status.as_ref()),
    ];
    if let Some(column) = stamp_column {
        params.push(time_value(update.at));
        let _ = write!(sql, ", {column} = COALESCE({column}, $4)");
    }
    sql.push_str(" WHERE id = $1 AND status = $2 RETURNING *");

    fetch_optional(db, &sql, &params, dispatch_from_row).await
}

/// Appends a history row; the database assigns `seq`.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn append_history(
    db: &dyn Database,
    entry: &NewHistoryEntry,
) -> Result<OccurrenceHistoryRow, DbError> {
    let id = Uuid::new_v4();
    let rows = db
        .query_raw_params(
            "INSERT INTO occurrence_history (
                id, occurrence_id, dispatch_id, previous_status, new_status,
                changed_by, notes, created_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING seq",
            &[
                id_value(id),
                id_value(entry.occurrence_id),
                opt_id_value(entry.dispatch_id),
                opt_text_value(entry.previous_status.as_ref().map(AsRef::as_ref)),
                text_value(entry.new_status.as_ref()),
                id_value(entry.changed_by),
                opt_text_value(entry.notes.as_deref()),
                time_value(entry.created_at),
            ],
        )
        .await?;

    let row = rows
        .first()
        .ok_or_else(|| DbError::conversion("Failed to get history seq from insert"))?;
    let seq: i64 = row.to_value("seq").map_err(|e| bad_column("seq", e))?;

    Ok(OccurrenceHistoryRow {
        id,
        seq,
        occurrence_id: entry.occurrence_id,
        dispatch_id: entry.dispatch_id,
        previous_status: entry.previous_status,
        new_status: entry.new_status,
        changed_by: entry.changed_by,
        notes: entry.notes.clone(),
        created_at: entry.created_at,
    })
}

/// Inserts an active crew row unless the user already has one (enforced
/// by the `vehicle_crew_one_active_per_user` partial unique index).
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn insert_crew(db: &dyn Database, row: &VehicleCrewRow) -> Result<bool, DbError> {
    let rows = db
        .query_raw_params(
            "INSERT INTO vehicle_crew (id, vehicle_id, user_id, joined_at, left_at, is_active)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (user_id) WHERE is_active DO NOTHING
             RETURNING id",
            &[
                id_value(row.id),
                id_value(row.vehicle_id),
                id_value(row.user_id),
                time_value(row.joined_at),
                opt_time_value(row.left_at),
                DatabaseValue::Bool(row.is_active),
            ],
        )
        .await?;
    Ok(!rows.is_empty())
}

/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub async fn close_crew(
    db: &dyn Database,
    id: Uuid,
    left_at: DateTime<Utc>,
) -> Result<Option<VehicleCrewRow>, DbError> {
    fetch_optional(
        db,
        "UPDATE vehicle_crew SET is_active = FALSE, left_at = $2
         WHERE id = $1 AND is_active
         RETURNING *",
        &[id_value(id), time_value(left_at)],
        crew_from_row,
    )
    .await
}
