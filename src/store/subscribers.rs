//! Subscriber records.

use super::records::{DeliveryStatus, Subscriber, Subscriptions};
use super::subscriptions::put_subscriber;
use super::Store;
use crate::error::{Result, StoreError};
use crate::types::{SubscriberId, Timestamp};
use tracing::{info, warn};

impl Store {
    pub fn get_subscriber(&self, id: SubscriberId) -> Result<Option<Subscriber>> {
        self.view(|tx| tx.get_record(&id.key()))
    }

    /// Persist `subscriber`, refreshing its `last_updated` timestamp.
    pub fn save_subscriber(&self, subscriber: &mut Subscriber) -> Result<()> {
        self.update(|tx| put_subscriber(tx, subscriber))
    }

    /// All subscribers in key order.
    pub fn list_subscribers(&self) -> Result<Vec<Subscriber>> {
        self.view(|tx| tx.records())
    }

    /// Everything `id` is subscribed to.
    pub fn list_subscriptions(&self, id: SubscriberId) -> Result<Subscriptions> {
        let subscriber = self
            .get_subscriber(id)?
            .ok_or(StoreError::SubscriberNotFound(id))?;
        Ok(Subscriptions::from(&subscriber))
    }

    /// Create the subscriber if needed and mark it started. Re-activation
    /// also clears an unreachable status.
    pub fn activate_subscriber(&self, id: SubscriberId, username: &str) -> Result<Subscriber> {
        let subscriber = self.update(|tx| {
            let mut subscriber = tx
                .get_record::<Subscriber>(&id.key())?
                .unwrap_or_else(|| Subscriber::new(id, username));
            subscriber.started = true;
            subscriber.delivery = DeliveryStatus::Reachable;
            if !username.is_empty() {
                subscriber.username = username.to_string();
            }
            put_subscriber(tx, &mut subscriber)?;
            Ok(subscriber)
        })?;
        info!(subscriber = %id, "Subscriber activated");
        Ok(subscriber)
    }

    /// Clear the started flag. Subscriptions are kept.
    pub fn deactivate_subscriber(&self, id: SubscriberId) -> Result<()> {
        self.update(|tx| {
            let mut subscriber = tx
                .get_record::<Subscriber>(&id.key())?
                .ok_or(StoreError::SubscriberNotFound(id))?;
            if subscriber.started {
                subscriber.started = false;
                put_subscriber(tx, &mut subscriber)?;
            }
            Ok(())
        })?;
        info!(subscriber = %id, "Subscriber deactivated");
        Ok(())
    }

    /// Record that messages to `id` can no longer be delivered. Returns
    /// `true` if the status changed.
    pub fn mark_unreachable(&self, id: SubscriberId) -> Result<bool> {
        let changed = self.update(|tx| {
            let Some(mut subscriber) = tx.get_record::<Subscriber>(&id.key())? else {
                return Ok(false);
            };
            if subscriber.is_unreachable() {
                return Ok(false);
            }
            subscriber.delivery = DeliveryStatus::Unreachable {
                since: Timestamp::now(),
            };
            put_subscriber(tx, &mut subscriber)?;
            Ok(true)
        })?;
        if changed {
            warn!(subscriber = %id, "Subscriber marked unreachable");
        }
        Ok(changed)
    }

    /// Clear an unreachable status without touching the started flag.
    /// Returns `true` if the status changed.
    pub fn reset_delivery(&self, id: SubscriberId) -> Result<bool> {
        self.update(|tx| {
            let mut subscriber = tx
                .get_record::<Subscriber>(&id.key())?
                .ok_or(StoreError::SubscriberNotFound(id))?;
            if !subscriber.is_unreachable() {
                return Ok(false);
            }
            subscriber.delivery = DeliveryStatus::Reachable;
            put_subscriber(tx, &mut subscriber)?;
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use crate::types::SubscriptionKind;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> Store {
        Store::open(StoreConfig::at(dir.path().join("test.db"))).unwrap()
    }

    #[test]
    fn test_save_refreshes_last_updated() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let mut subscriber = Subscriber::new(SubscriberId(5), "eve");
        assert_eq!(subscriber.last_updated, Timestamp::EPOCH);
        store.save_subscriber(&mut subscriber).unwrap();
        assert!(subscriber.last_updated > Timestamp::EPOCH);

        let loaded = store.get_subscriber(SubscriberId(5)).unwrap().unwrap();
        assert_eq!(loaded, subscriber);
    }

    #[test]
    fn test_activate_clears_unreachable() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let id = SubscriberId(9);

        store.activate_subscriber(id, "zed").unwrap();
        assert!(store.mark_unreachable(id).unwrap());
        assert!(!store.mark_unreachable(id).unwrap());

        let subscriber = store.get_subscriber(id).unwrap().unwrap();
        assert!(!subscriber.accepts_notifications());

        let subscriber = store.activate_subscriber(id, "zed").unwrap();
        assert!(subscriber.accepts_notifications());
    }

    #[test]
    fn test_deactivate_keeps_subscriptions() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let id = SubscriberId(3);

        store.activate_subscriber(id, "kim").unwrap();
        store
            .add_subscriber(SubscriptionKind::Search, id, "fox")
            .unwrap();
        store.deactivate_subscriber(id).unwrap();

        let subscriber = store.get_subscriber(id).unwrap().unwrap();
        assert!(!subscriber.started);
        assert_eq!(
            store.list_subscriptions(id).unwrap().searches,
            vec!["fox".to_string()]
        );
    }

    #[test]
    fn test_list_subscriptions_unknown() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        assert!(matches!(
            store.list_subscriptions(SubscriberId(1)),
            Err(StoreError::SubscriberNotFound(_))
        ));
        assert!(matches!(
            store.deactivate_subscriber(SubscriberId(1)),
            Err(StoreError::SubscriberNotFound(_))
        ));
    }

    #[test]
    fn test_reset_delivery() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let id = SubscriberId(4);

        store.activate_subscriber(id, "lee").unwrap();
        assert!(!store.reset_delivery(id).unwrap());
        store.mark_unreachable(id).unwrap();
        assert!(store.reset_delivery(id).unwrap());
        assert!(store
            .get_subscriber(id)
            .unwrap()
            .unwrap()
            .accepts_notifications());
    }
}
