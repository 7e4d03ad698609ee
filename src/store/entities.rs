//! Iteration over tracked entities with transaction-bound write access.

use super::records::{Entity, TrackedAccount, TrackedSearch};
use super::tx::{Bucket, WriteTx};
use super::Store;
use crate::error::{Result, StoreError};
use crate::types::SubscriberId;
use std::marker::PhantomData;
use tracing::debug;

/// Write access to one entity inside the transaction that loaded it.
///
/// The scope borrows the transaction, so it cannot outlive it, and it only
/// saves the record it was created for.
pub struct EntityScope<'s, 'tx, E: Entity> {
    tx: &'s mut WriteTx<'tx>,
    key: String,
    _entity: PhantomData<E>,
}

impl<'s, 'tx, E: Entity> EntityScope<'s, 'tx, E> {
    fn new(tx: &'s mut WriteTx<'tx>, key: String) -> Self {
        Self {
            tx,
            key,
            _entity: PhantomData,
        }
    }

    /// Key of the record this scope is bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Persist `entity` in the enclosing transaction.
    pub fn save(&mut self, entity: &E) -> Result<()> {
        if entity.key() != self.key {
            return Err(StoreError::NotIterationBound {
                key: entity.key().to_string(),
                bound: self.key.clone(),
            });
        }
        self.tx.put_record(&self.key, entity)
    }

    /// Whether a subscriber record exists as of this transaction.
    pub fn has_subscriber(&self, id: SubscriberId) -> Result<bool> {
        Ok(self
            .tx
            .get(Bucket::Subscribers, id.key().as_bytes())?
            .is_some())
    }
}

impl Store {
    /// Visit every tracked search in key order inside one write transaction.
    ///
    /// An error from `f` rolls back every save made during the iteration.
    pub fn iterate_searches<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&mut TrackedSearch, &mut EntityScope<'_, '_, TrackedSearch>) -> Result<()>,
    {
        self.iterate(f)
    }

    /// Visit every tracked account in key order inside one write transaction.
    pub fn iterate_accounts<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&mut TrackedAccount, &mut EntityScope<'_, '_, TrackedAccount>) -> Result<()>,
    {
        self.iterate(f)
    }

    fn iterate<E, F>(&self, mut f: F) -> Result<()>
    where
        E: Entity,
        F: FnMut(&mut E, &mut EntityScope<'_, '_, E>) -> Result<()>,
    {
        self.update(|tx| {
            let keys = tx.string_keys(E::BUCKET)?;
            debug!(kind = E::NAME, count = keys.len(), "Iterating entities");
            for key in keys {
                let Some(mut entity) = tx.get_record::<E>(&key)? else {
                    continue;
                };
                let mut scope = EntityScope::new(tx, key);
                f(&mut entity, &mut scope)?;
            }
            Ok(())
        })
    }

    /// Run `f` on one search in its own transaction. Returns `None` when the
    /// search no longer exists.
    pub fn update_search<T, F>(&self, search: &str, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut TrackedSearch, &mut EntityScope<'_, '_, TrackedSearch>) -> Result<T>,
    {
        self.update_entity(search, f)
    }

    /// Run `f` on one account in its own transaction. Returns `None` when the
    /// account no longer exists.
    pub fn update_account<T, F>(&self, username: &str, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut TrackedAccount, &mut EntityScope<'_, '_, TrackedAccount>) -> Result<T>,
    {
        self.update_entity(username, f)
    }

    fn update_entity<E, T, F>(&self, key: &str, f: F) -> Result<Option<T>>
    where
        E: Entity,
        F: FnOnce(&mut E, &mut EntityScope<'_, '_, E>) -> Result<T>,
    {
        self.update(|tx| {
            let Some(mut entity) = tx.get_record::<E>(key)? else {
                return Ok(None);
            };
            let mut scope = EntityScope::new(tx, key.to_string());
            f(&mut entity, &mut scope).map(Some)
        })
    }

    /// Keys of all tracked searches.
    pub fn search_keys(&self) -> Result<Vec<String>> {
        self.view(|tx| tx.string_keys(Bucket::Searches))
    }

    /// Keys of all tracked accounts.
    pub fn account_keys(&self) -> Result<Vec<String>> {
        self.view(|tx| tx.string_keys(Bucket::Accounts))
    }

    pub fn get_search(&self, search: &str) -> Result<Option<TrackedSearch>> {
        self.view(|tx| tx.get_record(search))
    }

    pub fn get_account(&self, username: &str) -> Result<Option<TrackedAccount>> {
        self.view(|tx| tx.get_record(username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StoreConfig, Subscriber};
    use crate::types::{ItemId, SubscriptionKind};
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> Store {
        Store::open(StoreConfig::at(dir.path().join("test.db"))).unwrap()
    }

    fn seed(store: &Store) {
        let mut subscriber = Subscriber::new(SubscriberId(1), "amy");
        subscriber.started = true;
        store.save_subscriber(&mut subscriber).unwrap();
        store
            .add_subscriber(SubscriptionKind::Search, SubscriberId(1), "fox")
            .unwrap();
        store
            .add_subscriber(SubscriptionKind::Search, SubscriberId(1), "wolf")
            .unwrap();
    }

    #[test]
    fn test_iterate_saves_through_scope() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        seed(&store);

        let mut seen = Vec::new();
        store
            .iterate_searches(|search, scope| {
                seen.push(search.search.clone());
                search.last_id = Some(ItemId(10));
                scope.save(search)
            })
            .unwrap();

        assert_eq!(seen, vec!["fox".to_string(), "wolf".to_string()]);
        assert_eq!(
            store.get_search("wolf").unwrap().unwrap().last_id,
            Some(ItemId(10))
        );
    }

    #[test]
    fn test_scope_rejects_other_key() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        seed(&store);

        let result = store.iterate_searches(|search, scope| {
            let mut other = search.clone();
            other.search = "not-this-one".into();
            scope.save(&other)
        });
        assert!(matches!(result, Err(StoreError::NotIterationBound { .. })));
        assert!(store.get_search("not-this-one").unwrap().is_none());
    }

    #[test]
    fn test_callback_error_rolls_back_everything() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        seed(&store);

        let result = store.iterate_searches(|search, scope| {
            search.last_id = Some(ItemId(99));
            scope.save(search)?;
            if search.search == "wolf" {
                return Err(StoreError::InvalidOperation("stop".into()));
            }
            Ok(())
        });
        assert!(result.is_err());

        // The save made for "fox" before the failure is gone too
        assert_eq!(store.get_search("fox").unwrap().unwrap().last_id, None);
    }

    #[test]
    fn test_scope_sees_subscribers() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        seed(&store);

        let found = store
            .update_search("fox", |_, scope| {
                Ok((
                    scope.has_subscriber(SubscriberId(1))?,
                    scope.has_subscriber(SubscriberId(404))?,
                ))
            })
            .unwrap();
        assert_eq!(found, Some((true, false)));
    }

    #[test]
    fn test_update_vanished_entity() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let result = store
            .update_account("nobody", |_, _| Ok(()))
            .unwrap();
        assert!(result.is_none());
    }
}
