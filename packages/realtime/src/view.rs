//! The state a client session renders.

use serde::Serialize;
use sigor_database::Store;
use sigor_database_models::{DispatchRow, OccurrenceFilter, OccurrenceRow, VehicleRow};
use sigor_engine::{CrewAssignment, EngineError, queries};
use uuid::Uuid;

/// A session's cached view of current state. Rebuilt from scratch by
/// [`LocalView::fetch`], so it always equals what a fresh read returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocalView {
    /// Open occurrences on the session's dashboard.
    pub active_occurrences: Vec<OccurrenceRow>,
    /// Dispatchable vehicles of the session's organization.
    pub available_vehicles: Vec<VehicleRow>,
    pub current_crew: Option<CrewAssignment>,
    /// Open dispatches of the vehicle the user is crewing.
    pub vehicle_dispatches: Vec<DispatchRow>,
}

impl LocalView {
    /// Reads every part of the view for one user.
    ///
    /// # Errors
    ///
    /// * [`EngineError::StoreUnavailable`] on store failure
    pub async fn fetch(
        store: &dyn Store,
        user_id: Uuid,
        organization_id: Option<Uuid>,
        filter: &OccurrenceFilter,
    ) -> Result<Self, EngineError> {
        let active_occurrences = queries::list_active_occurrences(store, filter).await?;

        let available_vehicles = match organization_id {
            Some(id) => queries::list_available_vehicles(store, id).await?,
            None => Vec::new(),
        };

        let current_crew = queries::get_current_crew_assignment(store, user_id).await?;

        let vehicle_dispatches = match &current_crew {
            Some(assignment) => {
                queries::list_vehicle_dispatches(store, assignment.vehicle.id).await?
            }
            None => Vec::new(),
        };

        Ok(Self {
            active_occurrences,
            available_vehicles,
            current_crew,
            vehicle_dispatches,
        })
    }

    /// The vehicle the user is crewing, if any.
    #[must_use]
    pub fn current_vehicle(&self) -> Option<Uuid> {
        self.current_crew.as_ref().map(|c| c.vehicle.id)
    }
}
