//! Core types shared by the store and the notification engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Messaging-platform user identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub i64);

impl SubscriberId {
    /// Key bytes used in the subscribers bucket.
    pub fn key(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Debug for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriberId({})", self.0)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an item in the content source. Monotonically increasing
/// within a stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id space an item belongs to. Submissions found by a search and
/// submissions of a monitored account share a namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    Submission,
    Journal,
}

/// Identity of an item across triggers, used for deduplication.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub namespace: Namespace,
    pub id: ItemId,
}

impl ItemKey {
    pub fn submission(id: ItemId) -> Self {
        Self {
            namespace: Namespace::Submission,
            id,
        }
    }

    pub fn journal(id: ItemId) -> Self {
        Self {
            namespace: Namespace::Journal,
            id,
        }
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// The Unix epoch, used for entities that never ran.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Which relationship a subscribe/unsubscribe call targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// A saved search.
    Search,
    /// New submissions of a monitored account.
    AccountSubmissions,
    /// New journals of a monitored account.
    AccountJournals,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKind::Search => f.write_str("search"),
            SubscriptionKind::AccountSubmissions => f.write_str("account submissions"),
            SubscriptionKind::AccountJournals => f.write_str("account journals"),
        }
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub search_count: u64,
    pub account_count: u64,
    pub subscriber_count: u64,
    pub active_subscriber_count: u64,
    pub unreachable_subscriber_count: u64,
    /// Bytes currently occupied by the commit log.
    pub file_size_bytes: u64,
    /// Bytes of live keys and values.
    pub live_size_bytes: u64,
}
