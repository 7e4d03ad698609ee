//! Subscribe and unsubscribe: both sides of a relationship in one commit.

use super::records::{
    normalize_account, normalize_search, Subscriber, TrackedAccount, TrackedSearch,
};
use super::tx::{Bucket, WriteTx};
use super::Store;
use crate::error::{LimitScope, Result, StoreError};
use crate::types::{SubscriberId, SubscriptionKind, Timestamp};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Optional caps on account monitoring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MonitorLimits {
    /// Distinct accounts one subscriber may monitor.
    pub per_subscriber: Option<usize>,
    /// Distinct accounts the whole store may track.
    pub total: Option<usize>,
}

/// Normalize a raw key for `kind`.
pub fn normalize_key(kind: SubscriptionKind, raw: &str) -> Result<String> {
    let key = match kind {
        SubscriptionKind::Search => normalize_search(raw),
        SubscriptionKind::AccountSubmissions | SubscriptionKind::AccountJournals => {
            normalize_account(raw)
        }
    };
    if key.is_empty() {
        return Err(StoreError::InvalidOperation(format!("empty {} key", kind)));
    }
    Ok(key)
}

fn not_found(kind: SubscriptionKind, key: String) -> StoreError {
    match kind {
        SubscriptionKind::Search => StoreError::SearchNotFound(key),
        _ => StoreError::AccountNotFound(key),
    }
}

fn account_stream(account: &mut TrackedAccount, kind: SubscriptionKind) -> &mut BTreeSet<SubscriberId> {
    match kind {
        SubscriptionKind::AccountJournals => &mut account.journal_subscribers,
        _ => &mut account.submission_subscribers,
    }
}

fn subscriber_index(subscriber: &mut Subscriber, kind: SubscriptionKind) -> &mut BTreeSet<String> {
    match kind {
        SubscriptionKind::Search => &mut subscriber.searches,
        SubscriptionKind::AccountSubmissions => &mut subscriber.submission_accounts,
        SubscriptionKind::AccountJournals => &mut subscriber.journal_accounts,
    }
}

fn load_subscriber(tx: &WriteTx<'_>, id: SubscriberId) -> Result<Subscriber> {
    tx.get_record::<Subscriber>(&id.key())?
        .ok_or(StoreError::SubscriberNotFound(id))
}

pub(super) fn put_subscriber(tx: &mut WriteTx<'_>, subscriber: &mut Subscriber) -> Result<()> {
    subscriber.last_updated = Timestamp::now();
    tx.put_record(&subscriber.id.key(), subscriber)
}

impl Store {
    /// Subscribe `id` to the entity `raw_key` of `kind`, creating the entity
    /// if needed. Returns `false` if the pair already existed.
    pub fn add_subscriber(
        &self,
        kind: SubscriptionKind,
        id: SubscriberId,
        raw_key: &str,
    ) -> Result<bool> {
        self.add_subscriber_with_limits(kind, id, raw_key, &MonitorLimits::default())
    }

    /// Like [`Store::add_subscriber`], enforcing account-monitor limits in
    /// the same transaction.
    pub fn add_subscriber_with_limits(
        &self,
        kind: SubscriptionKind,
        id: SubscriberId,
        raw_key: &str,
        limits: &MonitorLimits,
    ) -> Result<bool> {
        let key = normalize_key(kind, raw_key)?;
        let added = self.update(|tx| {
            let mut subscriber = load_subscriber(tx, id)?;
            match kind {
                SubscriptionKind::Search => add_search(tx, &mut subscriber, &key),
                _ => add_account(tx, &mut subscriber, kind, &key, limits),
            }
        })?;
        if added {
            info!(subscriber = %id, %kind, key = %key, "Added subscription");
        }
        Ok(added)
    }

    /// Unsubscribe `id` from the entity `raw_key` of `kind`. The entity is
    /// deleted once nobody subscribes to it.
    ///
    /// Reports the kind's not-found error unless the relationship existed on
    /// both sides. A one-sided leftover is still cleaned up.
    pub fn remove_subscriber(
        &self,
        kind: SubscriptionKind,
        id: SubscriberId,
        raw_key: &str,
    ) -> Result<()> {
        let key = normalize_key(kind, raw_key)?;
        let existed = self.update(|tx| {
            let mut subscriber = load_subscriber(tx, id)?;
            match kind {
                SubscriptionKind::Search => remove_search(tx, &mut subscriber, &key),
                _ => remove_account(tx, &mut subscriber, kind, &key),
            }
        })?;
        if !existed {
            return Err(not_found(kind, key));
        }
        info!(subscriber = %id, %kind, key = %key, "Removed subscription");
        Ok(())
    }
}

fn add_search(tx: &mut WriteTx<'_>, subscriber: &mut Subscriber, key: &str) -> Result<bool> {
    let mut search = match tx.get_record::<TrackedSearch>(key)? {
        Some(search) => search,
        None => {
            debug!(search = %key, "Creating tracked search");
            TrackedSearch::new(key)
        }
    };

    let entity_changed = search.subscribers.insert(subscriber.id);
    let subscriber_changed = subscriber.searches.insert(key.to_string());
    if entity_changed {
        tx.put_record(key, &search)?;
    }
    if subscriber_changed {
        put_subscriber(tx, subscriber)?;
    }
    Ok(entity_changed || subscriber_changed)
}

fn add_account(
    tx: &mut WriteTx<'_>,
    subscriber: &mut Subscriber,
    kind: SubscriptionKind,
    key: &str,
    limits: &MonitorLimits,
) -> Result<bool> {
    let existing = tx.get_record::<TrackedAccount>(key)?;
    let is_new = existing.is_none();

    let already_monitored =
        subscriber.submission_accounts.contains(key) || subscriber.journal_accounts.contains(key);
    if !already_monitored {
        if let Some(limit) = limits.per_subscriber {
            if subscriber.monitored_account_count() >= limit {
                return Err(StoreError::LimitReached {
                    scope: LimitScope::PerSubscriber,
                    limit,
                });
            }
        }
    }
    if is_new {
        if let Some(limit) = limits.total {
            if tx.keys(Bucket::Accounts)?.len() >= limit {
                return Err(StoreError::LimitReached {
                    scope: LimitScope::Total,
                    limit,
                });
            }
        }
    }

    let mut account = existing.unwrap_or_else(|| {
        debug!(account = %key, "Creating tracked account");
        TrackedAccount::new(key)
    });
    let entity_changed = account_stream(&mut account, kind).insert(subscriber.id);
    let subscriber_changed = subscriber_index(subscriber, kind).insert(key.to_string());
    if entity_changed {
        tx.put_record(key, &account)?;
    }
    if subscriber_changed {
        put_subscriber(tx, subscriber)?;
    }
    Ok(entity_changed || subscriber_changed)
}

fn remove_search(tx: &mut WriteTx<'_>, subscriber: &mut Subscriber, key: &str) -> Result<bool> {
    let subscriber_changed = subscriber.searches.remove(key);

    let entity_changed = match tx.get_record::<TrackedSearch>(key)? {
        Some(mut search) => {
            let removed = search.subscribers.remove(&subscriber.id);
            if search.subscribers.is_empty() {
                debug!(search = %key, "Deleting unsubscribed search");
                tx.delete_record::<TrackedSearch>(key)?;
            } else if removed {
                tx.put_record(key, &search)?;
            }
            removed
        }
        None => false,
    };

    if subscriber_changed {
        put_subscriber(tx, subscriber)?;
    }
    Ok(entity_changed && subscriber_changed)
}

fn remove_account(
    tx: &mut WriteTx<'_>,
    subscriber: &mut Subscriber,
    kind: SubscriptionKind,
    key: &str,
) -> Result<bool> {
    let subscriber_changed = subscriber_index(subscriber, kind).remove(key);

    let entity_changed = match tx.get_record::<TrackedAccount>(key)? {
        Some(mut account) => {
            let removed = account_stream(&mut account, kind).remove(&subscriber.id);
            if account.is_unwatched() {
                debug!(account = %key, "Deleting unmonitored account");
                tx.delete_record::<TrackedAccount>(key)?;
            } else if removed {
                tx.put_record(key, &account)?;
            }
            removed
        }
        None => false,
    };

    if subscriber_changed {
        put_subscriber(tx, subscriber)?;
    }
    Ok(entity_changed && subscriber_changed)
}
