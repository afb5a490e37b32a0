//! Occurrence listing filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigor_dispatch_models::{OccurrenceStatus, OccurrenceType, PriorityLevel};
use uuid::Uuid;

use crate::OccurrenceRow;

/// Parameters for listing occurrences. Empty sets and `None` fields do not
/// filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceFilter {
    pub organization_id: Option<Uuid>,
    pub statuses: Vec<OccurrenceStatus>,
    pub types: Vec<OccurrenceType>,
    pub priority: Option<PriorityLevel>,
    /// Case-insensitive substring matched against code, title and address.
    pub search: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl OccurrenceFilter {
    /// A filter over every non-terminal status.
    #[must_use]
    pub fn active() -> Self {
        Self {
            statuses: OccurrenceStatus::ACTIVE.to_vec(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    #[must_use]
    pub fn with_types(mut self, types: &[OccurrenceType]) -> Self {
        self.types = types.to_vec();
        self
    }

    /// The search term lowercased and trimmed, or `None` when blank.
    #[must_use]
    pub fn normalized_search(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    /// Whether `row` satisfies every criterion of this filter.
    #[must_use]
    pub fn matches(&self, row: &OccurrenceRow) -> bool {
        if self.organization_id.is_some_and(|id| id != row.organization_id) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&row.status) {
            return false;
        }
        if !self.types.is_empty() && !self.types.contains(&row.occurrence_type) {
            return false;
        }
        if self.priority.is_some_and(|p| p != row.priority) {
            return false;
        }
        if self.created_from.is_some_and(|from| row.created_at < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| row.created_at >= to) {
            return false;
        }
        if let Some(term) = self.normalized_search() {
            let hit = row.code.to_lowercase().contains(&term)
                || row.title.to_lowercase().contains(&term)
                || row
                    .location_address
                    .as_deref()
                    .is_some_and(|a| a.to_lowercase().contains(&term));
            if !hit {
                return false;
            }
        }
        true
    }

    /// Sorts rows the way listings present them: highest priority first,
    /// then newest first, then applies `limit`.
    pub fn order_and_limit(&self, rows: &mut Vec<OccurrenceRow>) {
        rows.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        if let Some(limit) = self.limit {
            rows.truncate(limit as usize);
        }
    }
}
