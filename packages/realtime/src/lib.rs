#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Realtime propagation of committed changes to connected clients.
//!
//! Each client runs a [`ClientSession`] fed by the store's change feed. A
//! session filters events through its table subscriptions, drops
//! redelivered ones, rebuilds its [`LocalView`] from a fresh read and
//! decides whether the event warrants an [`Alert`]. A session that falls
//! behind the feed resynchronizes with a full re-fetch.

pub mod alert;
pub mod handle;
pub mod scope;
pub mod session;
pub mod view;

pub use alert::{Alert, AlertKind, AlertPreferences, SoundCue};
pub use handle::{NOTIFICATION_CAPACITY, SessionHandle, spawn_session};
pub use scope::{Subscription, SubscriptionScope};
pub use session::{ClientProfile, ClientSession, Notification};
pub use view::LocalView;
