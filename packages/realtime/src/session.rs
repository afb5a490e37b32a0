//! Per-client event processing.
//!
//! The change feed is treated as at-least-once: the same row change may
//! arrive more than once. A session remembers the last `(entity id,
//! status)` it saw for every live entity and the ids it already alerted on,
//! so a repeated event neither re-renders nor re-alerts. Nothing is
//! remembered until the event has been fully processed; an event whose
//! processing failed is handled again when redelivered.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use sigor_database::Store;
use sigor_database_models::{
    ChangeEvent, ChangeOperation, ChangeRecord, DispatchRow, OccurrenceFilter, OccurrenceRow,
    Table,
};
use sigor_dispatch_models::AppRole;
use sigor_engine::{EngineError, queries};
use uuid::Uuid;

use crate::{Alert, AlertKind, AlertPreferences, LocalView, Subscription, SubscriptionScope};

/// Who a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub user_id: Uuid,
    pub role: AppRole,
    /// Organization whose dashboard the user sees. Administrators see every
    /// organization regardless.
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub preferences: AlertPreferences,
}

/// A change event delivered to a session, with the alert it warrants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub event: ChangeEvent,
    pub alert: Option<Alert>,
}

/// How many alerted ids a session keeps for suppressing repeat alerts.
pub const ALERTED_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
enum AlertTrigger {
    NewDispatch(DispatchRow),
    NewOccurrence(OccurrenceRow),
}

impl AlertTrigger {
    const fn id(&self) -> Uuid {
        match self {
            Self::NewDispatch(row) => row.id,
            Self::NewOccurrence(row) => row.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Observation {
    /// Outside every subscription.
    Ignored,
    /// Already seen.
    Duplicate,
    Fresh {
        key: Option<String>,
        trigger: Option<AlertTrigger>,
    },
}

/// Insertion-ordered id set that forgets its oldest entries past a
/// capacity.
#[derive(Debug, Clone)]
struct RecentIds {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    fn insert(&mut self, id: Uuid) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Whether no further status change is expected for the event's entity.
fn is_settled(event: &ChangeEvent) -> bool {
    if event.operation == ChangeOperation::Delete {
        return true;
    }
    match &event.record {
        ChangeRecord::Occurrence(row) => row.status.is_terminal(),
        ChangeRecord::Dispatch(row) => !row.status.is_open(),
        ChangeRecord::Crew(row) => !row.is_active,
        _ => false,
    }
}

/// Event processing state of one client.
#[derive(Debug, Clone)]
pub struct ClientSession {
    profile: ClientProfile,
    filter: OccurrenceFilter,
    view: LocalView,
    last_seen: HashMap<Uuid, Option<String>>,
    alerted: RecentIds,
}

impl ClientSession {
    #[must_use]
    pub fn new(profile: ClientProfile) -> Self {
        let organization_id = match profile.role {
            AppRole::Admin => None,
            _ => profile.organization_id,
        };
        Self {
            filter: queries::dashboard_filter(profile.role, organization_id),
            profile,
            view: LocalView::default(),
            last_seen: HashMap::new(),
            alerted: RecentIds::new(ALERTED_CAPACITY),
        }
    }

    #[must_use]
    pub const fn profile(&self) -> &ClientProfile {
        &self.profile
    }

    #[must_use]
    pub const fn view(&self) -> &LocalView {
        &self.view
    }

    /// The filter backing the session's occurrence list.
    #[must_use]
    pub const fn dashboard_filter(&self) -> &OccurrenceFilter {
        &self.filter
    }

    /// The subscriptions this session currently holds. Vehicle-scoped
    /// subscriptions follow the vehicle the user is crewing.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let organization_scope = match (self.profile.role, self.profile.organization_id) {
            (AppRole::Admin, _) | (_, None) => SubscriptionScope::All,
            (_, Some(id)) => SubscriptionScope::Organization(id),
        };

        let mut subscriptions = vec![
            Subscription::new(
                Table::VehicleCrew,
                SubscriptionScope::User(self.profile.user_id),
            ),
            Subscription::new(Table::Occurrences, organization_scope),
        ];

        if let Some(vehicle_id) = self.view.current_vehicle() {
            subscriptions.push(Subscription::new(
                Table::Dispatches,
                SubscriptionScope::Vehicle(vehicle_id),
            ));
            subscriptions.push(Subscription::new(
                Table::Vehicles,
                SubscriptionScope::Vehicle(vehicle_id),
            ));
        }

        if !self.profile.role.is_field_crew() {
            subscriptions.push(Subscription::new(Table::Dispatches, organization_scope));
            subscriptions.push(Subscription::new(Table::Vehicles, organization_scope));
        }

        subscriptions
    }

    /// Rebuilds the view with a full re-fetch.
    ///
    /// # Errors
    ///
    /// * [`EngineError::StoreUnavailable`] on store failure
    pub async fn refresh(&mut self, store: &dyn Store) -> Result<(), EngineError> {
        self.view = LocalView::fetch(
            store,
            self.profile.user_id,
            self.profile.organization_id,
            &self.filter,
        )
        .await?;
        Ok(())
    }

    /// Processes one change event.
    ///
    /// Returns `None` for events outside the session's subscriptions and
    /// for duplicates. Otherwise the view is re-fetched and the returned
    /// notification carries an alert when the event warrants one and the
    /// user's preferences allow it.
    ///
    /// # Errors
    ///
    /// * [`EngineError::StoreUnavailable`] on store failure. The event is
    ///   not recorded as seen, so a redelivery is processed in full.
    pub async fn handle(
        &mut self,
        store: &dyn Store,
        event: &ChangeEvent,
    ) -> Result<Option<Notification>, EngineError> {
        let (key, trigger) = match self.observe(event) {
            Observation::Ignored => return Ok(None),
            Observation::Duplicate => {
                log::trace!(
                    "Session {}: duplicate {} event for {}",
                    self.profile.user_id,
                    event.table(),
                    event.record.entity_id()
                );
                return Ok(None);
            }
            Observation::Fresh { key, trigger } => (key, trigger),
        };

        let alert = match &trigger {
            Some(AlertTrigger::NewDispatch(dispatch)) => store
                .get_occurrence(dispatch.occurrence_id)
                .await?
                .and_then(|occurrence| {
                    Alert::new(
                        AlertKind::NewDispatch,
                        &occurrence,
                        Some(dispatch.id),
                        &self.profile.preferences,
                    )
                }),
            Some(AlertTrigger::NewOccurrence(occurrence)) => Alert::new(
                AlertKind::NewOccurrence,
                occurrence,
                None,
                &self.profile.preferences,
            ),
            None => None,
        };

        self.refresh(store).await?;
        self.remember(event, key, trigger.as_ref());

        Ok(Some(Notification {
            event: event.clone(),
            alert,
        }))
    }

    fn observe(&self, event: &ChangeEvent) -> Observation {
        if !self.subscriptions().iter().any(|s| s.matches(event)) {
            return Observation::Ignored;
        }

        let key = match event.operation {
            ChangeOperation::Delete => Some(ChangeOperation::Delete.to_string()),
            ChangeOperation::Insert | ChangeOperation::Update => {
                event.record.status_key().map(str::to_string)
            }
        };
        if self.last_seen.get(&event.record.entity_id()) == Some(&key) {
            return Observation::Duplicate;
        }

        Observation::Fresh {
            key,
            trigger: self.alert_trigger(event),
        }
    }

    /// Records a fully processed event.
    fn remember(
        &mut self,
        event: &ChangeEvent,
        key: Option<String>,
        trigger: Option<&AlertTrigger>,
    ) {
        let id = event.record.entity_id();
        if is_settled(event) {
            self.last_seen.remove(&id);
        } else {
            self.last_seen.insert(id, key);
        }
        if let Some(trigger) = trigger {
            self.alerted.insert(trigger.id());
        }
    }

    fn alert_trigger(&self, event: &ChangeEvent) -> Option<AlertTrigger> {
        if event.operation != ChangeOperation::Insert {
            return None;
        }
        match &event.record {
            ChangeRecord::Dispatch(dispatch)
                if self.view.current_vehicle() == Some(dispatch.vehicle_id)
                    && !self.alerted.contains(dispatch.id) =>
            {
                Some(AlertTrigger::NewDispatch(dispatch.clone()))
            }
            ChangeRecord::Occurrence(occurrence)
                if !self.profile.role.watched_occurrence_types().is_empty()
                    && self.filter.matches(occurrence)
                    && !self.alerted.contains(occurrence.id) =>
            {
                Some(AlertTrigger::NewOccurrence(occurrence.clone()))
            }
            _ => None,
        }
    }
}
