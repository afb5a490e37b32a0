//! Engine error taxonomy.

use std::fmt;

use serde::Serialize;
use sigor_database::DbError;
use sigor_dispatch_models::AppRole;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

/// Kind of entity a [`EngineError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    Organization,
    Base,
    Vehicle,
    Occurrence,
    Dispatch,
}

/// Stable, machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    InvalidTransition,
    VehicleUnavailable,
    OccurrenceClosed,
    AlreadyCrewing,
    NotCrewing,
    Unauthorized,
    StoreUnavailable,
}

/// One offending input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Every field-level problem found in one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    #[must_use]
    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    /// Whether `field` has at least one error.
    #[must_use]
    pub fn has(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// `Ok(value)` when no error was recorded.
    ///
    /// # Errors
    ///
    /// Returns `self` if any field error was recorded.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", error.field, error.message)?;
        }
        Ok(())
    }
}

/// Errors returned by engine commands and reads.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input.
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// A referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of the missing entity.
        entity: EntityKind,
        /// Id that was looked up.
        id: Uuid,
    },

    /// The requested status change is not an edge of the state machine
    /// from the current status.
    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        /// Occurrence or dispatch.
        entity: EntityKind,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// The vehicle was not available when the claim was attempted.
    #[error("Vehicle {vehicle_id} is not available")]
    VehicleUnavailable {
        /// The contested vehicle.
        vehicle_id: Uuid,
    },

    /// A write was attempted against a completed or cancelled occurrence.
    #[error("Occurrence {occurrence_id} is already closed")]
    OccurrenceClosed {
        /// The closed occurrence.
        occurrence_id: Uuid,
    },

    /// The user already has an active crew assignment.
    #[error("User {user_id} is already crewing vehicle {vehicle_id}")]
    AlreadyCrewing {
        /// The user.
        user_id: Uuid,
        /// Vehicle of the existing assignment.
        vehicle_id: Uuid,
    },

    /// The user has no active crew assignment.
    #[error("User {user_id} is not crewing any vehicle")]
    NotCrewing {
        /// The user.
        user_id: Uuid,
    },

    /// The actor's role does not permit the action.
    #[error("Actor {actor_id} with role {role} may not {action}")]
    Unauthorized {
        /// Acting user.
        actor_id: Uuid,
        /// Role the actor acted with.
        role: AppRole,
        /// Short description of the denied action.
        action: &'static str,
    },

    /// Transient store failure; the only retryable kind.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] DbError),
}

impl EngineError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::VehicleUnavailable { .. } => ErrorKind::VehicleUnavailable,
            Self::OccurrenceClosed { .. } => ErrorKind::OccurrenceClosed,
            Self::AlreadyCrewing { .. } => ErrorKind::AlreadyCrewing,
            Self::NotCrewing { .. } => ErrorKind::NotCrewing,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
        }
    }

    /// Whether the caller may retry the same request unchanged. Every
    /// other kind means the request must be reformulated after re-reading.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Acknowledgement text suitable for a toast or banner.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(errors) => {
                let fields: Vec<_> = errors.fields().iter().map(|e| e.field).collect();
                format!("Please correct the following fields: {}.", fields.join(", "))
            }
            Self::NotFound { entity, .. } => {
                format!("That {entity} no longer exists. Refresh and try again.")
            }
            Self::InvalidTransition { from, to, .. } => format!(
                "Cannot change status from {} to {}. Refresh to see the latest state.",
                from.replace('_', " "),
                to.replace('_', " ")
            ),
            Self::VehicleUnavailable { .. } => {
                "Someone else already dispatched that vehicle, pick another.".to_string()
            }
            Self::OccurrenceClosed { .. } => "This occurrence is already closed.".to_string(),
            Self::AlreadyCrewing { .. } => {
                "You are already on a vehicle. Leave it before joining another.".to_string()
            }
            Self::NotCrewing { .. } => "You are not on any vehicle.".to_string(),
            Self::Unauthorized { .. } => "You don't have permission to do that.".to_string(),
            Self::StoreUnavailable(_) => {
                "The dispatch service is temporarily unavailable. Please try again.".to_string()
            }
        }
    }

    pub(crate) const fn not_found(entity: EntityKind, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub(crate) fn invalid_transition(
        entity: EntityKind,
        from: impl AsRef<str>,
        to: impl AsRef<str>,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.as_ref().to_string(),
            to: to.as_ref().to_string(),
        }
    }
}

impl From<ValidationErrors> for EngineError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_failures_are_retryable() {
        let store = EngineError::StoreUnavailable(DbError::Conversion {
            message: "boom".to_string(),
        });
        assert!(store.is_retryable());
        assert_eq!(store.kind(), ErrorKind::StoreUnavailable);

        let lost = EngineError::VehicleUnavailable {
            vehicle_id: Uuid::nil(),
        };
        assert!(!lost.is_retryable());
        assert_eq!(
            lost.user_message(),
            "Someone else already dispatched that vehicle, pick another."
        );
    }

    #[test]
    fn kind_codes_are_snake_case() {
        assert_eq!(ErrorKind::ValidationError.as_ref(), "validation_error");
        assert_eq!(ErrorKind::AlreadyCrewing.to_string(), "already_crewing");
    }

    #[test]
    fn validation_message_names_fields() {
        let mut errors = ValidationErrors::new();
        errors.push("title", "must be at least 5 characters");
        errors.push("priority", "is required");
        let error = EngineError::from(errors);
        assert_eq!(
            error.user_message(),
            "Please correct the following fields: title, priority."
        );
        assert_eq!(
            error.to_string(),
            "Validation failed: title: must be at least 5 characters; priority: is required"
        );
    }
}
