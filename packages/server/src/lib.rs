#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the sigor emergency dispatch system.
//!
//! Exposes every engine command and read as a JSON endpoint under `/api`,
//! plus `/api/events`, a Server-Sent Events stream that runs one realtime
//! session per connected client. The acting user is taken from the
//! `X-Actor-Id` and `X-Actor-Role` headers.

pub mod config;
pub mod error;
mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, Scope, middleware, web};
use sigor_database::Store;

pub use config::{ConfigError, ServerConfig, StoreKind};
pub use handlers::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};

/// Shared application state.
pub struct AppState {
    /// Store every command and read runs against.
    pub store: Arc<dyn Store>,
}

/// The `/api` scope with every route registered.
#[must_use]
pub fn api_scope() -> Scope {
    web::scope("/api")
        .route("/health", web::get().to(handlers::health))
        .route(
            "/organizations",
            web::post().to(handlers::create_organization_handler),
        )
        .route(
            "/organizations/{id}/bases",
            web::post().to(handlers::create_base_handler),
        )
        .route(
            "/organizations/{id}/vehicles",
            web::get().to(handlers::vehicles),
        )
        .route(
            "/organizations/{id}/vehicles/available",
            web::get().to(handlers::available_vehicles),
        )
        .route(
            "/bases/{id}/vehicles",
            web::post().to(handlers::register_vehicle_handler),
        )
        .route(
            "/vehicles/{id}/service-status",
            web::put().to(handlers::service_status),
        )
        .route("/vehicles/{id}/crew", web::get().to(handlers::vehicle_crew))
        .route("/vehicles/{id}/crew", web::post().to(handlers::join))
        .route(
            "/vehicles/{id}/dispatches",
            web::get().to(handlers::vehicle_dispatches),
        )
        .route("/crew", web::delete().to(handlers::leave))
        .route("/users/{id}/crew", web::get().to(handlers::user_crew))
        .route("/occurrences", web::get().to(handlers::occurrences))
        .route(
            "/occurrences",
            web::post().to(handlers::create_occurrence_handler),
        )
        .route("/occurrences/{id}", web::get().to(handlers::occurrence))
        .route(
            "/occurrences/{id}/status",
            web::post().to(handlers::advance_occurrence),
        )
        .route(
            "/occurrences/{id}/history",
            web::get().to(handlers::occurrence_history),
        )
        .route(
            "/occurrences/{id}/dispatches",
            web::get().to(handlers::occurrence_dispatches),
        )
        .route(
            "/occurrences/{id}/dispatches",
            web::post().to(handlers::assign),
        )
        .route(
            "/dispatches/{id}/status",
            web::post().to(handlers::advance_dispatch),
        )
        .route("/events", web::get().to(handlers::events))
}

/// Starts the dispatch API server.
///
/// Reads [`ServerConfig`] from the environment, opens the configured store
/// (running migrations for PostgreSQL) and starts the Actix-Web HTTP
/// server. This is a regular async function; the caller is responsible
/// for providing the async runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
///
/// # Panics
///
/// Panics if the configuration is invalid, the database connection fails
/// or migrations fail.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = ServerConfig::from_env().expect("Invalid server configuration");
    log::info!("Opening {} store...", config.store);
    let store = config.open_store().await.expect("Failed to open store");

    let state = web::Data::new(AppState { store });

    let ServerConfig {
        bind_addr, port, ..
    } = config;
    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .service(api_scope())
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
