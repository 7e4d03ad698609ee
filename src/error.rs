//! Error types for the store and the notification engine.

use crate::types::{ItemId, SubscriberId, SubscriptionKind};
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Search not found: {0}")]
    SearchNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Subscriber not found: {0}")]
    SubscriberNotFound(SubscriberId),

    #[error("Bucket missing: {0}")]
    MissingBucket(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Store not initialized at {0}")]
    NotInitialized(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Checksum mismatch at offset {offset}: expected {expected}, got {got}")]
    ChecksumMismatch { offset: u64, expected: u32, got: u32 },

    #[error("Record {key} is not bound to this transaction (bound to {bound})")]
    NotIterationBound { key: String, bound: String },

    #[error("Monitor limit reached: {scope} limit is {limit}")]
    LimitReached { scope: LimitScope, limit: usize },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Store task failed: {0}")]
    TaskFailed(String),
}

impl StoreError {
    /// Whether the error reports a missing counterpart record rather than a
    /// broken store.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::SearchNotFound(_)
                | StoreError::AccountNotFound(_)
                | StoreError::SubscriberNotFound(_)
        )
    }

    /// Whether the error concerns one record only, leaving the rest of the
    /// store usable.
    pub fn is_record_local(&self) -> bool {
        matches!(
            self,
            StoreError::Deserialization(_)
                | StoreError::Serialization(_)
                | StoreError::NotIterationBound { .. }
        )
    }
}

/// Which monitor limit was hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitScope {
    /// Accounts monitored by one subscriber.
    PerSubscriber,
    /// Accounts tracked by the whole store.
    Total,
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitScope::PerSubscriber => f.write_str("per-subscriber"),
            LimitScope::Total => f.write_str("total"),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            StoreError::Deserialization(e.to_string())
        } else {
            StoreError::Serialization(e.to_string())
        }
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure surfaced to the dialog layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("subscriber {0} has not started notifications")]
    NotActive(SubscriberId),

    #[error("{0} key must not be empty")]
    EmptyKey(SubscriptionKind),

    #[error("not subscribed to search: {0}")]
    SearchNotFound(String),

    #[error("not monitoring account: {0}")]
    AccountNotFound(String),

    #[error("unknown subscriber: {0}")]
    SubscriberNotFound(SubscriberId),

    #[error("monitor limit reached: {scope} limit is {limit}")]
    LimitReached { scope: LimitScope, limit: usize },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SearchNotFound(key) => ServiceError::SearchNotFound(key),
            StoreError::AccountNotFound(key) => ServiceError::AccountNotFound(key),
            StoreError::SubscriberNotFound(id) => ServiceError::SubscriberNotFound(id),
            StoreError::LimitReached { scope, limit } => ServiceError::LimitReached { scope, limit },
            other => ServiceError::Store(other),
        }
    }
}

/// Configuration could not be loaded or is out of range.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure reported by the content source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("content source unavailable: {0}")]
    Unavailable(String),

    #[error("preview not available for item {0}")]
    PreviewUnavailable(ItemId),
}

/// Failure reported by the messaging front end.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The recipient blocked the bot or no longer exists.
    #[error("recipient unreachable: {0}")]
    Unreachable(String),

    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Failure text fragments that mean the recipient will never accept messages.
const UNREACHABLE_MARKERS: &[&str] = &[
    "bot was blocked",
    "user is deactivated",
    "chat not found",
    "bot was kicked",
    "bot can't initiate conversation",
];

impl DeliveryError {
    /// Classify a raw front-end failure description.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        if UNREACHABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
            DeliveryError::Unreachable(message)
        } else {
            DeliveryError::Failed(message)
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, DeliveryError::Unreachable(_))
    }
}
