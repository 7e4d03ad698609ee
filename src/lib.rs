//! # pollwatch
//!
//! Watches a content source for new items and notifies the people who asked
//! to hear about them.
//!
//! ## Core Concepts
//!
//! - **Tracked entities**: saved searches and monitored accounts, each with a
//!   cursor remembering the newest item already seen
//! - **Subscribers**: users linked to entities in both directions, kept
//!   consistent by one transactional store
//! - **Detection**: a newest-first page plus a cursor yields the unseen items,
//!   oldest first
//! - **Fan-out**: each new item goes once to every active, reachable
//!   subscriber of the entity that produced it
//!
//! ## Example
//!
//! ```ignore
//! use pollwatch::{Notifier, NotifierConfig, Poller, Store};
//! use std::sync::Arc;
//!
//! let config = NotifierConfig::load("pollwatch.toml")?;
//! let store = Arc::new(Store::open(config.store_config())?);
//! let notifier = Arc::new(Notifier::new(
//!     Arc::clone(&store),
//!     Arc::clone(&source),
//!     messenger,
//!     config.notify.alerted_capacity,
//!     config.notify.caption_limit,
//! ));
//! let handle = Poller::new(store, source, notifier, config.poll_interval()).start();
//! // ...
//! handle.shutdown().await;
//! ```

pub mod config;
pub mod detect;
pub mod error;
pub mod messenger;
pub mod notify;
pub mod poller;
pub mod service;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-exports
pub use config::{LogConfig, LogFormat, LogLevel, NotifierConfig};
pub use detect::{detect_new, detect_new_by, Detection, FeedItem};
pub use error::{
    ConfigError, DeliveryError, LimitScope, Result, ServiceError, SourceError, StoreError,
};
pub use messenger::{escape_html, truncate_html, Messenger, ParseMode};
pub use notify::{AlertedSet, FanOutReport, Notification, Notifier, Trigger};
pub use poller::{CycleReport, Poller, PollerHandle, PollerState, DEFAULT_POLL_INTERVAL};
pub use service::SubscriptionService;
pub use source::{ContentSource, Journal, Rating, RecentActivity, Submission};
pub use store::{
    Inconsistency, MonitorLimits, Store, StoreConfig, Subscriber, Subscriptions, TrackedAccount,
    TrackedSearch,
};
pub use telemetry::init_logging;
pub use types::*;
