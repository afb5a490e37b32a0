//! HTTP handler functions for the dispatch API.

use std::convert::Infallible;

use actix_web::{HttpRequest, HttpResponse, web};
use serde::Serialize;
use sigor_database_models::{DispatchRow, OccurrenceFilter, OccurrenceRow};
use sigor_dispatch_models::AppRole;
use sigor_engine::{
    Actor, NewBase, NewOccurrence, NewOrganization, NewVehicle, advance_dispatch_status,
    advance_occurrence_status, assign_vehicle, create_base, create_occurrence,
    create_organization, join_vehicle, leave_vehicle, queries, register_vehicle,
    set_vehicle_service_status,
};
use sigor_realtime::{AlertPreferences, ClientProfile, spawn_session};
use sigor_server_models::{
    ApiAdvanceDispatch, ApiAdvanceOccurrence, ApiAssignVehicle, ApiBase, ApiCrewAssignment,
    ApiCrewMember, ApiDispatch, ApiDispatchResult, ApiHealth, ApiHistoryEntry, ApiOccurrence,
    ApiOrganization, ApiServiceStatus, ApiVehicle, EventQueryParams, OccurrenceQueryParams,
};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{AppState, error::ApiFailure};

/// Header carrying the acting user's id.
pub const ACTOR_ID_HEADER: &str = "X-Actor-Id";
/// Header carrying the acting user's role.
pub const ACTOR_ROLE_HEADER: &str = "X-Actor-Role";

type ApiResult = Result<HttpResponse, ApiFailure>;

/// Reads the acting user from the request headers. Authentication happens
/// upstream; the headers are trusted as given.
fn actor(req: &HttpRequest) -> Result<Actor, ApiFailure> {
    let id = header(req, ACTOR_ID_HEADER)
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or(ApiFailure::Actor(ACTOR_ID_HEADER))?;
    let role = header(req, ACTOR_ROLE_HEADER)
        .and_then(|v| v.parse::<AppRole>().ok())
        .ok_or(ApiFailure::Actor(ACTOR_ROLE_HEADER))?;

    Ok(Actor::new(id, role))
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

fn list<T, R: From<T>>(rows: Vec<T>) -> Vec<R> {
    rows.into_iter().map(R::from).collect()
}

fn dispatch_result(dispatch: DispatchRow, occurrence: OccurrenceRow) -> ApiDispatchResult {
    ApiDispatchResult {
        dispatch: dispatch.into(),
        occurrence: occurrence.into(),
    }
}

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `POST /api/organizations`
pub async fn create_organization_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<NewOrganization>,
) -> ApiResult {
    let actor = actor(&req)?;
    let row = create_organization(state.store.as_ref(), &actor, &body).await?;
    Ok(HttpResponse::Created().json(ApiOrganization::from(row)))
}

/// `POST /api/organizations/{id}/bases`
pub async fn create_base_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<NewBase>,
) -> ApiResult {
    let actor = actor(&req)?;
    let row = create_base(state.store.as_ref(), &actor, path.into_inner(), &body).await?;
    Ok(HttpResponse::Created().json(ApiBase::from(row)))
}

/// `POST /api/bases/{id}/vehicles`
pub async fn register_vehicle_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<NewVehicle>,
) -> ApiResult {
    let actor = actor(&req)?;
    let row = register_vehicle(state.store.as_ref(), &actor, path.into_inner(), &body).await?;
    Ok(HttpResponse::Created().json(ApiVehicle::from(row)))
}

/// `GET /api/organizations/{id}/vehicles`
pub async fn vehicles(state: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult {
    let rows = queries::list_vehicles(state.store.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(list::<_, ApiVehicle>(rows)))
}

/// `GET /api/organizations/{id}/vehicles/available`
pub async fn available_vehicles(state: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult {
    let rows = queries::list_available_vehicles(state.store.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(list::<_, ApiVehicle>(rows)))
}

/// `PUT /api/vehicles/{id}/service-status`
pub async fn service_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<ApiServiceStatus>,
) -> ApiResult {
    let actor = actor(&req)?;
    let row =
        set_vehicle_service_status(state.store.as_ref(), &actor, path.into_inner(), body.status)
            .await?;
    Ok(HttpResponse::Ok().json(ApiVehicle::from(row)))
}

/// `GET /api/vehicles/{id}/crew`
pub async fn vehicle_crew(state: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult {
    let rows = queries::list_crew_members(state.store.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(list::<_, ApiCrewMember>(rows)))
}

/// `GET /api/vehicles/{id}/dispatches`
///
/// Open dispatches of the vehicle, oldest first.
pub async fn vehicle_dispatches(state: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult {
    let rows = queries::list_vehicle_dispatches(state.store.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(list::<_, ApiDispatch>(rows)))
}

/// `POST /api/vehicles/{id}/crew`
pub async fn join(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> ApiResult {
    let actor = actor(&req)?;
    let row = join_vehicle(state.store.as_ref(), &actor, path.into_inner()).await?;
    Ok(HttpResponse::Created().json(ApiCrewMember::from(row)))
}

/// `DELETE /api/crew`
pub async fn leave(state: web::Data<AppState>, req: HttpRequest) -> ApiResult {
    let actor = actor(&req)?;
    let row = leave_vehicle(state.store.as_ref(), &actor).await?;
    Ok(HttpResponse::Ok().json(ApiCrewMember::from(row)))
}

/// `GET /api/users/{id}/crew`
///
/// Responds `null` when the user is not on any vehicle.
pub async fn user_crew(state: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult {
    let assignment =
        queries::get_current_crew_assignment(state.store.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(assignment.map(|a| ApiCrewAssignment {
        crew: a.crew.into(),
        vehicle: a.vehicle.into(),
    })))
}

/// `GET /api/occurrences`
///
/// Open occurrences matching the query, highest priority first.
pub async fn occurrences(
    state: web::Data<AppState>,
    params: web::Query<OccurrenceQueryParams>,
) -> ApiResult {
    let filter = OccurrenceFilter::from(&*params);
    let rows = queries::list_active_occurrences(state.store.as_ref(), &filter).await?;
    Ok(HttpResponse::Ok().json(list::<_, ApiOccurrence>(rows)))
}

/// `POST /api/occurrences`
pub async fn create_occurrence_handler(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<NewOccurrence>,
) -> ApiResult {
    let actor = actor(&req)?;
    let row = create_occurrence(state.store.as_ref(), &actor, &body).await?;
    Ok(HttpResponse::Created().json(ApiOccurrence::from(row)))
}

/// `GET /api/occurrences/{id}`
pub async fn occurrence(state: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult {
    let row = queries::get_occurrence(state.store.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiOccurrence::from(row)))
}

/// `POST /api/occurrences/{id}/status`
pub async fn advance_occurrence(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<ApiAdvanceOccurrence>,
) -> ApiResult {
    let actor = actor(&req)?;
    let row = advance_occurrence_status(
        state.store.as_ref(),
        &actor,
        path.into_inner(),
        body.status,
        body.notes.as_deref(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(ApiOccurrence::from(row)))
}

/// `GET /api/occurrences/{id}/history`
pub async fn occurrence_history(state: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult {
    let rows = queries::get_occurrence_history(state.store.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(list::<_, ApiHistoryEntry>(rows)))
}

/// `GET /api/occurrences/{id}/dispatches`
pub async fn occurrence_dispatches(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ApiResult {
    let rows = queries::list_occurrence_dispatches(state.store.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(list::<_, ApiDispatch>(rows)))
}

/// `POST /api/occurrences/{id}/dispatches`
pub async fn assign(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<ApiAssignVehicle>,
) -> ApiResult {
    let actor = actor(&req)?;
    let assignment = assign_vehicle(
        state.store.as_ref(),
        &actor,
        path.into_inner(),
        body.vehicle_id,
        body.notes.as_deref(),
    )
    .await?;
    Ok(HttpResponse::Created().json(dispatch_result(
        assignment.dispatch,
        assignment.occurrence,
    )))
}

/// `POST /api/dispatches/{id}/status`
pub async fn advance_dispatch(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<ApiAdvanceDispatch>,
) -> ApiResult {
    let actor = actor(&req)?;
    let transition = advance_dispatch_status(
        state.store.as_ref(),
        &actor,
        path.into_inner(),
        body.status,
        body.notes.as_deref(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(dispatch_result(
        transition.dispatch,
        transition.occurrence,
    )))
}

/// `GET /api/events`
///
/// Server-Sent Events stream for the calling user's session. The first
/// `view` event carries the full [`LocalView`](sigor_realtime::LocalView);
/// every `change` event after it carries one deduplicated notification,
/// alert included. A `view` event is re-sent after the stream falls
/// behind. The session ends when the client disconnects.
pub async fn events(
    state: web::Data<AppState>,
    req: HttpRequest,
    params: web::Query<EventQueryParams>,
) -> ApiResult {
    let actor = actor(&req)?;
    let defaults = AlertPreferences::default();
    let profile = ClientProfile {
        user_id: actor.id,
        role: actor.role,
        organization_id: params.organization_id,
        preferences: AlertPreferences {
            sound_enabled: params.sound_enabled.unwrap_or(defaults.sound_enabled),
            sound_volume: params.sound_volume.unwrap_or(defaults.sound_volume),
            critical_alerts: params.critical_alerts.unwrap_or(defaults.critical_alerts),
            high_priority_alerts: params
                .high_priority_alerts
                .unwrap_or(defaults.high_priority_alerts),
        },
    };

    let handle = spawn_session(state.store.clone(), profile).await?;
    let mut rx = handle.subscribe();
    log::info!("Event stream opened for {} ({})", actor.id, actor.role);

    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(sse_frame("view", &handle.view()));
        loop {
            match rx.recv().await {
                Ok(notification) => yield Ok(sse_frame("change", &notification)),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("Event stream for {} skipped {missed} notifications", actor.id);
                    yield Ok(sse_frame("view", &handle.view()));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream))
}

fn sse_frame(event: &str, data: &impl Serialize) -> web::Bytes {
    match serde_json::to_string(data) {
        Ok(json) => web::Bytes::from(format!("event: {event}\ndata: {json}\n\n")),
        Err(e) => {
            log::error!("Failed to serialize {event} event: {e}");
            web::Bytes::from_static(b": serialization failed\n\n")
        }
    }
}
