//! Relationship invariant checks.

use super::records::{Subscriber, TrackedAccount, TrackedSearch};
use super::Store;
use crate::error::Result;
use crate::types::{SubscriberId, SubscriptionKind};
use std::collections::BTreeMap;
use std::fmt;

/// One broken invariant found by [`Store::check_consistency`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inconsistency {
    /// The entity lists a subscriber whose reverse index does not list it
    /// (or whose record is missing).
    EntityOnly {
        kind: SubscriptionKind,
        key: String,
        subscriber: SubscriberId,
    },
    /// The subscriber lists an entity that does not list it back (or does
    /// not exist).
    SubscriberOnly {
        kind: SubscriptionKind,
        key: String,
        subscriber: SubscriberId,
    },
    /// An entity is stored without any subscriber.
    Unwatched { kind: &'static str, key: String },
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inconsistency::EntityOnly {
                kind,
                key,
                subscriber,
            } => write!(
                f,
                "{} '{}' lists subscriber {} which does not list it back",
                kind, key, subscriber
            ),
            Inconsistency::SubscriberOnly {
                kind,
                key,
                subscriber,
            } => write!(
                f,
                "subscriber {} lists {} '{}' which does not list it back",
                subscriber, kind, key
            ),
            Inconsistency::Unwatched { kind, key } => {
                write!(f, "{} '{}' has no subscribers", kind, key)
            }
        }
    }
}

impl Store {
    /// Check both directions of every relationship and that no entity is
    /// stored empty.
    pub fn check_consistency(&self) -> Result<Vec<Inconsistency>> {
        self.view(|tx| {
            let searches: Vec<TrackedSearch> = tx.records()?;
            let accounts: Vec<TrackedAccount> = tx.records()?;
            let subscribers: BTreeMap<SubscriberId, Subscriber> = tx
                .records::<Subscriber>()?
                .into_iter()
                .map(|s| (s.id, s))
                .collect();

            let mut problems = Vec::new();

            for search in &searches {
                if search.subscribers.is_empty() {
                    problems.push(Inconsistency::Unwatched {
                        kind: "search",
                        key: search.search.clone(),
                    });
                }
                for id in &search.subscribers {
                    let listed = subscribers
                        .get(id)
                        .is_some_and(|s| s.searches.contains(&search.search));
                    if !listed {
                        problems.push(Inconsistency::EntityOnly {
                            kind: SubscriptionKind::Search,
                            key: search.search.clone(),
                            subscriber: *id,
                        });
                    }
                }
            }

            for account in &accounts {
                if account.is_unwatched() {
                    problems.push(Inconsistency::Unwatched {
                        kind: "account",
                        key: account.username.clone(),
                    });
                }
                let streams = [
                    (
                        SubscriptionKind::AccountSubmissions,
                        &account.submission_subscribers,
                    ),
                    (
                        SubscriptionKind::AccountJournals,
                        &account.journal_subscribers,
                    ),
                ];
                for (kind, ids) in streams {
                    for id in ids {
                        let listed = subscribers.get(id).is_some_and(|s| {
                            let index = match kind {
                                SubscriptionKind::AccountJournals => &s.journal_accounts,
                                _ => &s.submission_accounts,
                            };
                            index.contains(&account.username)
                        });
                        if !listed {
                            problems.push(Inconsistency::EntityOnly {
                                kind,
                                key: account.username.clone(),
                                subscriber: *id,
                            });
                        }
                    }
                }
            }

            let search_map: BTreeMap<&str, &TrackedSearch> =
                searches.iter().map(|s| (s.search.as_str(), s)).collect();
            let account_map: BTreeMap<&str, &TrackedAccount> =
                accounts.iter().map(|a| (a.username.as_str(), a)).collect();

            for subscriber in subscribers.values() {
                for key in &subscriber.searches {
                    let listed = search_map
                        .get(key.as_str())
                        .is_some_and(|s| s.subscribers.contains(&subscriber.id));
                    if !listed {
                        problems.push(Inconsistency::SubscriberOnly {
                            kind: SubscriptionKind::Search,
                            key: key.clone(),
                            subscriber: subscriber.id,
                        });
                    }
                }
                for key in &subscriber.submission_accounts {
                    let listed = account_map
                        .get(key.as_str())
                        .is_some_and(|a| a.submission_subscribers.contains(&subscriber.id));
                    if !listed {
                        problems.push(Inconsistency::SubscriberOnly {
                            kind: SubscriptionKind::AccountSubmissions,
                            key: key.clone(),
                            subscriber: subscriber.id,
                        });
                    }
                }
                for key in &subscriber.journal_accounts {
                    let listed = account_map
                        .get(key.as_str())
                        .is_some_and(|a| a.journal_subscribers.contains(&subscriber.id));
                    if !listed {
                        problems.push(Inconsistency::SubscriberOnly {
                            kind: SubscriptionKind::AccountJournals,
                            key: key.clone(),
                            subscriber: subscriber.id,
                        });
                    }
                }
            }

            Ok(problems)
        })
    }
}
