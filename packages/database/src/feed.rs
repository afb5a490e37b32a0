//! In-process change feed.
//!
//! A thin wrapper over a `tokio::sync::broadcast` channel. Every subscriber
//! sees every committed event in commit order; a subscriber that falls
//! more than `capacity` events behind is told how many it missed and is
//! expected to re-fetch its view from the store.

use sigor_database_models::ChangeEvent;
use tokio::sync::broadcast;

/// Default per-subscriber buffer size.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Errors returned when receiving from a [`ChangeSubscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The subscriber fell behind and `0` events were dropped.
    #[error("Change feed subscriber lagged, {0} events missed")]
    Lagged(u64),

    /// The store owning the feed was dropped.
    #[error("Change feed closed")]
    Closed,
}

/// Publisher side of the change feed. Cloning yields another handle onto
/// the same channel.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    /// Creates a feed buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Registers a new subscriber. It receives only events published after
    /// this call.
    #[must_use]
    pub fn subscribe(&self) -> ChangeSubscription {
        ChangeSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Publishes committed events in order.
    pub fn publish(&self, events: Vec<ChangeEvent>) {
        let count = events.len();
        for event in events {
            // No subscribers is not an error.
            let _ = self.sender.send(event);
        }
        if count > 0 {
            log::trace!(
                "Published {count} change events to {} subscribers",
                self.sender.receiver_count()
            );
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

/// Receiving side of the change feed.
#[derive(Debug)]
pub struct ChangeSubscription {
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    /// Waits for the next committed event.
    ///
    /// # Errors
    ///
    /// * [`FeedError::Lagged`] if events were dropped for this subscriber;
    ///   the subscription stays usable and resumes with the oldest retained
    ///   event.
    /// * [`FeedError::Closed`] once the feed is gone.
    pub async fn recv(&mut self) -> Result<ChangeEvent, FeedError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(n) => FeedError::Lagged(n),
            broadcast::error::RecvError::Closed => FeedError::Closed,
        })
    }

    /// Returns the next event if one is already buffered.
    ///
    /// # Errors
    ///
    /// Same as [`Self::recv`]; an empty buffer yields `Ok(None)`.
    pub fn try_recv(&mut self) -> Result<Option<ChangeEvent>, FeedError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(FeedError::Lagged(n)),
            Err(broadcast::error::TryRecvError::Closed) => Err(FeedError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sigor_database_models::{ChangeRecord, VehicleCrewRow};
    use uuid::Uuid;

    use super::*;

    fn crew_event() -> ChangeEvent {
        ChangeEvent::insert(ChangeRecord::Crew(VehicleCrewRow {
            id: Uuid::new_v4(),
            vehicle_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            joined_at: Utc::now(),
            left_at: None,
            is_active: true,
        }))
    }

    #[tokio::test]
    async fn subscribers_receive_in_publish_order() {
        let feed = ChangeFeed::new(8);
        let mut sub = feed.subscribe();
        let first = crew_event();
        let second = crew_event();

        feed.publish(vec![first.clone(), second.clone()]);

        assert_eq!(sub.recv().await, Ok(first));
        assert_eq!(sub.recv().await, Ok(second));
        assert_eq!(sub.try_recv(), Ok(None));
    }

    #[tokio::test]
    async fn slow_subscriber_is_told_it_lagged() {
        let feed = ChangeFeed::new(2);
        let mut sub = feed.subscribe();

        feed.publish((0..5).map(|_| crew_event()).collect());

        assert_eq!(sub.recv().await, Err(FeedError::Lagged(3)));
        assert!(sub.recv().await.is_ok());
    }

    #[tokio::test]
    async fn dropping_the_feed_closes_subscriptions() {
        let feed = ChangeFeed::new(2);
        let mut sub = feed.subscribe();
        drop(feed);
        assert_eq!(sub.recv().await, Err(FeedError::Closed));
    }
}
