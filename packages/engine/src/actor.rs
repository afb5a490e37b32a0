//! The identity on whose behalf a command runs.

use serde::{Deserialize, Serialize};
use sigor_dispatch_models::AppRole;
use uuid::Uuid;

use crate::EngineError;

/// Caller identity and role, passed explicitly to every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: AppRole,
}

impl Actor {
    #[must_use]
    pub const fn new(id: Uuid, role: AppRole) -> Self {
        Self { id, role }
    }

    /// Fails with [`EngineError::Unauthorized`] unless `allowed`.
    pub(crate) const fn require(&self, allowed: bool, action: &'static str) -> Result<(), EngineError> {
        if allowed {
            Ok(())
        } else {
            Err(EngineError::Unauthorized {
                actor_id: self.id,
                role: self.role,
                action,
            })
        }
    }
}
