//! Mapping of engine failures onto HTTP responses.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use sigor_engine::{EngineError, ErrorKind};
use sigor_server_models::{ApiError, ApiFieldError};

/// A request failure, rendered as an [`ApiError`] body.
#[derive(Debug, thiserror::Error)]
pub enum ApiFailure {
    /// The engine rejected or failed the request.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The `X-Actor-Id` / `X-Actor-Role` headers are missing or malformed.
    #[error("Missing or invalid actor headers: {0}")]
    Actor(&'static str),
}

impl ApiFailure {
    const fn kind(&self) -> ErrorKind {
        match self {
            Self::Engine(e) => e.kind(),
            Self::Actor(_) => ErrorKind::Unauthorized,
        }
    }
}

impl ResponseError for ApiFailure {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidTransition
            | ErrorKind::VehicleUnavailable
            | ErrorKind::OccurrenceClosed
            | ErrorKind::AlreadyCrewing
            | ErrorKind::NotCrewing => StatusCode::CONFLICT,
            ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            Self::Engine(e) => {
                if e.is_retryable() {
                    log::error!("Request failed: {e}");
                } else {
                    log::debug!("Request rejected: {e}");
                }
                let fields = match e {
                    EngineError::Validation(errors) => errors
                        .fields()
                        .iter()
                        .map(|f| ApiFieldError {
                            field: f.field.to_string(),
                            message: f.message.clone(),
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                ApiError {
                    error: e.kind().to_string(),
                    message: e.user_message(),
                    fields,
                }
            }
            Self::Actor(reason) => {
                log::debug!("Request rejected: {self}");
                ApiError {
                    error: self.kind().to_string(),
                    message: format!("Missing or invalid actor headers: {reason}."),
                    fields: Vec::new(),
                }
            }
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}
