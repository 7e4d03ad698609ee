//! Persisted records and key normalization.

use super::tx::Bucket;
use crate::error::Result;
use crate::types::{ItemId, SubscriberId, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Normalize a search string: trim and collapse internal whitespace runs.
pub fn normalize_search(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize an account name: trim and lower-case.
pub fn normalize_account(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A JSON-encoded value stored in one bucket.
pub trait Record: Serialize + DeserializeOwned {
    const BUCKET: Bucket;

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A tracked entity: a record polled on every cycle, keyed by a string.
pub trait Entity: Record {
    /// Human-readable kind, used in logs and errors.
    const NAME: &'static str;

    fn key(&self) -> &str;
}

/// A saved search and the subscribers waiting on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSearch {
    pub search: String,
    pub last_run: Timestamp,
    /// Id of the newest result seen; `None` until the first successful poll.
    pub last_id: Option<ItemId>,
    pub subscribers: BTreeSet<SubscriberId>,
}

impl TrackedSearch {
    pub fn new(search: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            last_run: Timestamp::EPOCH,
            last_id: None,
            subscribers: BTreeSet::new(),
        }
    }
}

impl Record for TrackedSearch {
    const BUCKET: Bucket = Bucket::Searches;
}

impl Entity for TrackedSearch {
    const NAME: &'static str = "search";

    fn key(&self) -> &str {
        &self.search
    }
}

/// A monitored account with independent submission and journal streams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAccount {
    pub username: String,
    pub last_run: Timestamp,
    pub last_submission_id: Option<ItemId>,
    pub last_journal_id: Option<ItemId>,
    pub submission_subscribers: BTreeSet<SubscriberId>,
    pub journal_subscribers: BTreeSet<SubscriberId>,
}

impl TrackedAccount {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            last_run: Timestamp::EPOCH,
            last_submission_id: None,
            last_journal_id: None,
            submission_subscribers: BTreeSet::new(),
            journal_subscribers: BTreeSet::new(),
        }
    }

    /// No subscriber left on either stream.
    pub fn is_unwatched(&self) -> bool {
        self.submission_subscribers.is_empty() && self.journal_subscribers.is_empty()
    }
}

impl Record for TrackedAccount {
    const BUCKET: Bucket = Bucket::Accounts;
}

impl Entity for TrackedAccount {
    const NAME: &'static str = "account";

    fn key(&self) -> &str {
        &self.username
    }
}

/// Whether messages can still reach a subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    #[default]
    Reachable,
    /// The front end reported the recipient gone (blocked, deleted).
    Unreachable { since: Timestamp },
}

/// A messaging-platform user and the reverse side of every relationship.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub username: String,
    pub started: bool,
    pub last_updated: Timestamp,
    #[serde(default)]
    pub searches: BTreeSet<String>,
    #[serde(default)]
    pub submission_accounts: BTreeSet<String>,
    #[serde(default)]
    pub journal_accounts: BTreeSet<String>,
    #[serde(default)]
    pub delivery: DeliveryStatus,
}

impl Subscriber {
    pub fn new(id: SubscriberId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            started: false,
            last_updated: Timestamp::EPOCH,
            searches: BTreeSet::new(),
            submission_accounts: BTreeSet::new(),
            journal_accounts: BTreeSet::new(),
            delivery: DeliveryStatus::Reachable,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self.delivery, DeliveryStatus::Unreachable { .. })
    }

    /// Started and not known to be unreachable.
    pub fn accepts_notifications(&self) -> bool {
        self.started && !self.is_unreachable()
    }

    /// Number of distinct accounts this subscriber monitors, counting an
    /// account watched for both streams once.
    pub fn monitored_account_count(&self) -> usize {
        self.submission_accounts.union(&self.journal_accounts).count()
    }
}

impl Record for Subscriber {
    const BUCKET: Bucket = Bucket::Subscribers;
}

/// A subscriber's full subscription list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subscriptions {
    pub searches: Vec<String>,
    pub submission_accounts: Vec<String>,
    pub journal_accounts: Vec<String>,
}

impl From<&Subscriber> for Subscriptions {
    fn from(subscriber: &Subscriber) -> Self {
        Self {
            searches: subscriber.searches.iter().cloned().collect(),
            submission_accounts: subscriber.submission_accounts.iter().cloned().collect(),
            journal_accounts: subscriber.journal_accounts.iter().cloned().collect(),
        }
    }
}

impl Subscriptions {
    pub fn is_empty(&self) -> bool {
        self.searches.is_empty()
            && self.submission_accounts.is_empty()
            && self.journal_accounts.is_empty()
    }
}
