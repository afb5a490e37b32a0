#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Occurrence lifecycle, dispatch assignment and vehicle crew coordination.
//!
//! Every command takes the acting user explicitly as an [`Actor`], runs as
//! one store transaction and either commits all of its writes or none of
//! them. Races between clients are settled inside the store through
//! conditional writes keyed on the previously observed status; the engine
//! never retries on its own. A command that fails with
//! [`EngineError::StoreUnavailable`] may be retried unchanged, any other
//! failure means the caller must re-read state first.

pub mod actor;
pub mod code;
pub mod crew;
pub mod dispatch;
pub mod error;
pub mod fleet;
pub mod lifecycle;
pub mod queries;
pub mod validation;

#[cfg(test)]
mod testing;

pub use actor::Actor;
pub use crew::{join_vehicle, leave_vehicle};
pub use dispatch::{Assignment, DispatchTransition, advance_dispatch_status, assign_vehicle};
pub use error::{EngineError, EntityKind, ErrorKind, FieldError, ValidationErrors};
pub use fleet::{create_base, create_organization, register_vehicle, set_vehicle_service_status};
pub use lifecycle::{advance_occurrence_status, create_occurrence};
pub use queries::CrewAssignment;
pub use validation::{NewBase, NewOccurrence, NewOrganization, NewVehicle};

use sigor_database::StoreTransaction;

/// Commits `tx` if `result` is `Ok`, rolls it back otherwise.
///
/// Rejections are logged at `debug` since they are the caller's to
/// handle; store failures at `warn`.
pub(crate) async fn finish<T>(
    command: &str,
    tx: Box<dyn StoreTransaction>,
    result: Result<T, EngineError>,
) -> Result<T, EngineError> {
    match result {
        Ok(value) => {
            if let Err(e) = tx.commit().await {
                log::warn!("{command}: commit failed: {e}");
                return Err(e.into());
            }
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                log::warn!("{command}: rollback failed: {rollback}");
            }
            if e.is_retryable() {
                log::warn!("{command} failed: {e}");
            } else {
                log::debug!("{command} rejected: {e}");
            }
            Err(e)
        }
    }
}
