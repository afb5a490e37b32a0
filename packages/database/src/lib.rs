#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Transactional dispatch store.
//!
//! The engine talks to storage only through the [`Store`] /
//! [`StoreTransaction`] contract defined in [`store`]. Every write made
//! through a transaction records a [`ChangeEvent`](sigor_database_models::ChangeEvent)
//! which is published on the store's [`ChangeFeed`] once, and only if, the
//! transaction commits.
//!
//! Two backends are provided:
//!
//! * [`sql::SqlStore`] on `switchy_database` (PostgreSQL, `SERIALIZABLE`
//!   transactions, raw SQL via `query_raw_params()`), with the schema
//!   applied by [`run_migrations`] through `switchy_schema`.
//! * [`memory::MemoryStore`], which serialises whole transactions behind an
//!   async mutex. Used by tests and single-process deployments.

pub mod db;
pub mod feed;
pub mod memory;
pub mod queries;
pub mod sql;
pub mod store;

pub use feed::{ChangeFeed, ChangeSubscription, FeedError};
pub use memory::MemoryStore;
pub use sql::SqlStore;
pub use store::{Store, StoreReader, StoreTransaction};

use include_dir::{Dir, include_dir};
use switchy_database::Database;
use switchy_schema::discovery::embedded::EmbeddedMigrationSource;
use switchy_schema::runner::MigrationRunner;

/// Embedded SQL migrations from the `migrations/` directory.
static MIGRATIONS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/../../migrations");

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] switchy_schema::MigrationError),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// A uniqueness or reference constraint rejected a write.
    #[error("Constraint violation: {message}")]
    Constraint {
        /// Which constraint was violated.
        message: String,
    },
}

impl DbError {
    pub(crate) fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
        }
    }

    pub(crate) fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Whether PostgreSQL aborted the statement with SQLSTATE `40001`
    /// because a concurrent transaction committed a conflicting write.
    ///
    /// The transaction is unusable afterwards and must be rolled back.
    #[must_use]
    pub fn is_serialization_failure(&self) -> bool {
        match self {
            Self::Database(e) => is_serialization_failure_message(&format!("{e} {e:?}")),
            _ => false,
        }
    }
}

fn is_serialization_failure_message(message: &str) -> bool {
    message.contains("could not serialize access") || message.contains("SqlState(E40001)")
}

/// Runs all pending database migrations.
///
/// # Errors
///
/// Returns [`DbError`] if any migration fails to apply.
pub async fn run_migrations(db: &dyn Database) -> Result<(), DbError> {
    let source = EmbeddedMigrationSource::new(&MIGRATIONS_DIR);
    let runner = MigrationRunner::new(Box::new(source));
    runner.run(db).await?;
    log::info!("Database migrations completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_serialization_failures() {
        assert!(is_serialization_failure_message(
            "db error: ERROR: could not serialize access due to concurrent update"
        ));
        assert!(is_serialization_failure_message(
            "DbError { severity: \"ERROR\", code: SqlState(E40001), .. }"
        ));
        assert!(!is_serialization_failure_message(
            "db error: ERROR: duplicate key value violates unique constraint \"vehicles_identifier\""
        ));
        assert!(!is_serialization_failure_message(
            "db error: ERROR: deadlock detected (SqlState(E40P01))"
        ));
    }

    #[test]
    fn other_errors_are_not_serialization_failures() {
        assert!(!DbError::constraint("could not serialize access").is_serialization_failure());
        assert!(!DbError::conversion("bad column").is_serialization_failure());
    }
}
