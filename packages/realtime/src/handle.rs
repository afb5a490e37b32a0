//! Background task driving a [`ClientSession`] from the store's change
//! feed.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use sigor_database::{FeedError, Store};
use sigor_database_models::Table;
use sigor_engine::EngineError;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};

use crate::{ClientProfile, ClientSession, LocalView, Notification};

/// Notifications buffered per [`SessionHandle::subscribe`] receiver.
pub const NOTIFICATION_CAPACITY: usize = 256;

type Callback = Box<dyn Fn(&Notification) + Send + Sync>;
type Callbacks = Arc<Mutex<BTreeMap<Table, Vec<Callback>>>>;

/// A running client session. Dropping the handle stops the session.
pub struct SessionHandle {
    profile: ClientProfile,
    view: watch::Receiver<LocalView>,
    notifications: broadcast::Sender<Notification>,
    callbacks: Callbacks,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

/// Starts a session for `profile`.
///
/// The feed subscription is taken before the initial fetch, so no change
/// committed after this call returns can be missed.
///
/// # Errors
///
/// * [`EngineError::StoreUnavailable`] if the initial fetch fails
pub async fn spawn_session(
    store: Arc<dyn Store>,
    profile: ClientProfile,
) -> Result<SessionHandle, EngineError> {
    let mut feed = store.subscribe();
    let mut session = ClientSession::new(profile);
    session.refresh(store.as_ref()).await?;

    let (view_tx, view) = watch::channel(session.view().clone());
    let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
    let callbacks: Callbacks = Arc::default();

    let task = {
        let notifications = notifications.clone();
        let callbacks = callbacks.clone();
        tokio::spawn(async move {
            let user_id = session.profile().user_id;
            log::debug!("Session {user_id} started");

            loop {
                let outcome = match feed.recv().await {
                    Ok(event) => session.handle(store.as_ref(), &event).await,
                    Err(FeedError::Lagged(missed)) => {
                        log::warn!("Session {user_id} missed {missed} events, resyncing");
                        session.refresh(store.as_ref()).await.map(|()| None)
                    }
                    Err(FeedError::Closed) => break,
                };

                let notification = match outcome {
                    Ok(notification) => notification,
                    Err(e) => {
                        log::error!("Session {user_id} failed to process an event: {e}");
                        continue;
                    }
                };

                view_tx.send_if_modified(|current| {
                    if current == session.view() {
                        false
                    } else {
                        current.clone_from(session.view());
                        true
                    }
                });

                if let Some(notification) = notification {
                    if let Some(alert) = &notification.alert {
                        log::info!("Session {user_id}: {}", alert.title);
                    }
                    dispatch_callbacks(&callbacks, &notification);
                    // no receivers is fine
                    let _ = notifications.send(notification);
                }
            }

            log::debug!("Session {user_id} stopped");
        })
    };

    Ok(SessionHandle {
        profile,
        view,
        notifications,
        callbacks,
        task,
    })
}

fn dispatch_callbacks(callbacks: &Callbacks, notification: &Notification) {
    let callbacks = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(registered) = callbacks.get(&notification.event.table()) {
        for callback in registered {
            callback(notification);
        }
    }
}

impl SessionHandle {
    #[must_use]
    pub const fn profile(&self) -> &ClientProfile {
        &self.profile
    }

    /// Registers `callback` for every notification about `table`.
    pub fn on_change(&self, table: Table, callback: impl Fn(&Notification) + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table)
            .or_default()
            .push(Box::new(callback));
    }

    /// A stream of every notification from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// The most recent view.
    #[must_use]
    pub fn view(&self) -> LocalView {
        self.view.borrow().clone()
    }

    /// A receiver that is woken whenever the view changes.
    #[must_use]
    pub fn watch_view(&self) -> watch::Receiver<LocalView> {
        self.view.clone()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use chrono::Utc;
    use sigor_database::{MemoryStore, StoreReader as _};
    use sigor_database_models::{ChangeEvent, ChangeRecord, DispatchRow};
    use sigor_dispatch_models::{
        AppRole, DispatchStatus, OccurrenceStatus, OccurrenceType, OrganizationType,
        PriorityLevel,
    };
    use sigor_engine::{
        Actor, NewBase, NewOccurrence, NewOrganization, NewVehicle, assign_vehicle, create_base,
        create_occurrence, create_organization, join_vehicle, register_vehicle,
    };
    use uuid::Uuid;

    use super::*;
    use crate::{AlertKind, AlertPreferences};

    const WAIT: Duration = Duration::from_secs(5);

    struct World {
        store: Arc<dyn Store>,
        memory: Arc<MemoryStore>,
        dispatcher: Actor,
        organization_id: Uuid,
        vehicle_id: Uuid,
    }

    impl World {
        async fn new() -> Self {
            Self::with_store(MemoryStore::new()).await
        }

        async fn with_store(memory: MemoryStore) -> Self {
            let memory = Arc::new(memory);
            let admin = Actor::new(Uuid::new_v4(), AppRole::Admin);
            let organization = create_organization(
                memory.as_ref(),
                &admin,
                &NewOrganization {
                    name: "Bombeiros".to_string(),
                    code: "CBM".to_string(),
                    organization_type: OrganizationType::Fire,
                    phone: None,
                },
            )
            .await
            .unwrap();
            let base = create_base(
                memory.as_ref(),
                &admin,
                organization.id,
                &NewBase {
                    name: "Central".to_string(),
                    ..NewBase::default()
                },
            )
            .await
            .unwrap();
            let vehicle = register_vehicle(
                memory.as_ref(),
                &admin,
                base.id,
                &NewVehicle {
                    identifier: "ABT-01".to_string(),
                    vehicle_type: "fire engine".to_string(),
                    capacity: Some(6),
                },
            )
            .await
            .unwrap();

            Self {
                store: memory.clone(),
                memory,
                dispatcher: Actor::new(Uuid::new_v4(), AppRole::DispatcherFire),
                organization_id: organization.id,
                vehicle_id: vehicle.id,
            }
        }

        fn profile(&self, role: AppRole) -> ClientProfile {
            ClientProfile {
                user_id: Uuid::new_v4(),
                role,
                organization_id: Some(self.organization_id),
                preferences: AlertPreferences::default(),
            }
        }

        async fn occurrence(&self, occurrence_type: OccurrenceType) -> Uuid {
            create_occurrence(
                self.memory.as_ref(),
                &self.dispatcher,
                &NewOccurrence {
                    organization_id: Some(self.organization_id),
                    occurrence_type: Some(occurrence_type),
                    priority: Some(PriorityLevel::Critical),
                    title: "Warehouse fire".to_string(),
                    location_address: Some("Av. Brasil, 500".to_string()),
                    ..NewOccurrence::default()
                },
            )
            .await
            .unwrap()
            .id
        }
    }

    async fn next_alert(rx: &mut broadcast::Receiver<Notification>) -> Notification {
        tokio::time::timeout(WAIT, async {
            loop {
                let notification = rx.recv().await.unwrap();
                if notification.alert.is_some() {
                    return notification;
                }
            }
        })
        .await
        .unwrap()
    }

    async fn converge(handle: &SessionHandle, done: impl Fn(&LocalView) -> bool) {
        let mut view = handle.watch_view();
        tokio::time::timeout(WAIT, view.wait_for(|v| done(v)))
            .await
            .unwrap()
            .unwrap();
    }

    /// Crewed vehicles are never claimable, so dispatches to them arrive
    /// from writers outside this process; publish one straight to the feed.
    async fn crewed_dispatch(world: &World, crew: &Actor) -> DispatchRow {
        join_vehicle(world.memory.as_ref(), crew, world.vehicle_id)
            .await
            .unwrap();
        let occurrence_id = world.occurrence(OccurrenceType::Fire).await;
        DispatchRow {
            id: Uuid::new_v4(),
            occurrence_id,
            vehicle_id: world.vehicle_id,
            organization_id: world.organization_id,
            dispatched_by: world.dispatcher.id,
            status: DispatchStatus::Dispatched,
            dispatched_at: Utc::now(),
            acknowledged_at: None,
            arrived_at: None,
            completed_at: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn crew_is_alerted_when_its_vehicle_is_dispatched() {
        let world = World::new().await;
        let profile = world.profile(AppRole::Firefighter);
        let crew = Actor::new(profile.user_id, profile.role);
        let handle = spawn_session(world.store.clone(), profile).await.unwrap();
        let mut rx = handle.subscribe();

        let dispatch = crewed_dispatch(&world, &crew).await;
        converge(&handle, |v| v.current_crew.is_some()).await;
        world
            .memory
            .feed()
            .publish(vec![ChangeEvent::insert(ChangeRecord::Dispatch(dispatch.clone()))]);

        let notification = next_alert(&mut rx).await;
        let alert = notification.alert.unwrap();
        let occurrence = world
            .store
            .get_occurrence(dispatch.occurrence_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.kind, AlertKind::NewDispatch);
        assert_eq!(alert.dispatch_id, Some(dispatch.id));
        assert!(alert.requires_dismissal);
        assert_eq!(
            alert.body,
            format!("{} - Warehouse fire\nAv. Brasil, 500", occurrence.code)
        );
    }

    #[tokio::test]
    async fn redelivered_event_does_not_alert_twice() {
        let world = World::new().await;
        let profile = world.profile(AppRole::Firefighter);
        let crew = Actor::new(profile.user_id, profile.role);
        let handle = spawn_session(world.store.clone(), profile).await.unwrap();
        let mut rx = handle.subscribe();

        let dispatch = crewed_dispatch(&world, &crew).await;
        converge(&handle, |v| v.current_crew.is_some()).await;

        let insert = ChangeEvent::insert(ChangeRecord::Dispatch(dispatch.clone()));
        let mut en_route = dispatch;
        en_route.status = DispatchStatus::EnRoute;
        // the last event marks the end of the redelivered ones
        world.memory.feed().publish(vec![
            insert.clone(),
            insert.clone(),
            insert,
            ChangeEvent::update(ChangeRecord::Dispatch(en_route)),
        ]);

        let mut alerts = 0;
        tokio::time::timeout(WAIT, async {
            loop {
                let notification = rx.recv().await.unwrap();
                if notification.alert.is_some() {
                    alerts += 1;
                }
                if let ChangeRecord::Dispatch(row) = &notification.event.record
                    && row.status == DispatchStatus::EnRoute
                {
                    break;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(alerts, 1);
    }

    #[tokio::test]
    async fn dispatchers_are_alerted_for_their_occurrence_types_only() {
        let world = World::new().await;
        let fire = spawn_session(world.store.clone(), world.profile(AppRole::DispatcherFire))
            .await
            .unwrap();
        let police = spawn_session(world.store.clone(), world.profile(AppRole::DispatcherPolice))
            .await
            .unwrap();
        let mut fire_rx = fire.subscribe();
        let mut police_rx = police.subscribe();

        let occurrence_id = world.occurrence(OccurrenceType::Rescue).await;

        let notification = next_alert(&mut fire_rx).await;
        let alert = notification.alert.unwrap();
        assert_eq!(alert.kind, AlertKind::NewOccurrence);
        assert_eq!(alert.occurrence_id, occurrence_id);
        converge(&fire, |v| v.active_occurrences.len() == 1).await;

        let notification = tokio::time::timeout(WAIT, police_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.alert, None);
        assert!(police.view().active_occurrences.is_empty());
    }

    #[tokio::test]
    async fn disabled_preferences_suppress_alerts() {
        let world = World::new().await;
        let mut profile = world.profile(AppRole::DispatcherFire);
        profile.preferences.critical_alerts = false;
        let handle = spawn_session(world.store.clone(), profile).await.unwrap();
        let mut rx = handle.subscribe();

        world.occurrence(OccurrenceType::Fire).await;

        let notification = tokio::time::timeout(WAIT, rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.event.table(), Table::Occurrences);
        assert_eq!(notification.alert, None);
    }

    #[tokio::test]
    async fn view_converges_with_fresh_read() {
        let world = World::new().await;
        let profile = world.profile(AppRole::DispatcherFire);
        let handle = spawn_session(world.store.clone(), profile).await.unwrap();
        assert_eq!(handle.view().available_vehicles.len(), 1);

        let occurrence_id = world.occurrence(OccurrenceType::Fire).await;
        assign_vehicle(
            world.memory.as_ref(),
            &world.dispatcher,
            occurrence_id,
            world.vehicle_id,
            None,
        )
        .await
        .unwrap();

        converge(&handle, |v| {
            v.available_vehicles.is_empty()
                && v.active_occurrences.len() == 1
                && v.active_occurrences[0].status
                    == OccurrenceStatus::Dispatched
        })
        .await;

        let session = ClientSession::new(profile);
        let fresh = LocalView::fetch(
            world.store.as_ref(),
            profile.user_id,
            profile.organization_id,
            session.dashboard_filter(),
        )
        .await
        .unwrap();
        assert_eq!(handle.view(), fresh);
    }

    #[tokio::test]
    async fn lagging_session_resyncs() {
        let world = World::with_store(MemoryStore::with_feed_capacity(1)).await;
        let handle = spawn_session(world.store.clone(), world.profile(AppRole::DispatcherFire))
            .await
            .unwrap();

        for _ in 0..5 {
            world.occurrence(OccurrenceType::Fire).await;
        }

        converge(&handle, |v| v.active_occurrences.len() == 5).await;
    }

    #[tokio::test]
    async fn on_change_fires_for_registered_table() {
        let world = World::new().await;
        let handle = spawn_session(world.store.clone(), world.profile(AppRole::DispatcherFire))
            .await
            .unwrap();
        let occurrences = Arc::new(AtomicUsize::new(0));
        let vehicles = Arc::new(AtomicUsize::new(0));
        {
            let occurrences = occurrences.clone();
            handle.on_change(Table::Occurrences, move |_| {
                occurrences.fetch_add(1, Ordering::SeqCst);
            });
            let vehicles = vehicles.clone();
            handle.on_change(Table::Vehicles, move |_| {
                vehicles.fetch_add(1, Ordering::SeqCst);
            });
        }
        let mut rx = handle.subscribe();

        world.occurrence(OccurrenceType::Fire).await;
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(occurrences.load(Ordering::SeqCst), 1);
        assert_eq!(vehicles.load(Ordering::SeqCst), 0);
    }
}
