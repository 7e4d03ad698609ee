//! Subscription facade for the dialog layer.

use crate::error::{ServiceError, StoreError};
use crate::store::{MonitorLimits, Store, Subscriber, Subscriptions};
use crate::types::{SubscriberId, SubscriptionKind};
use std::sync::Arc;

/// Commands the chat front end runs on behalf of a user.
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<Store>,
    limits: MonitorLimits,
}

impl SubscriptionService {
    pub fn new(store: Arc<Store>, limits: MonitorLimits) -> Self {
        Self { store, limits }
    }

    /// Start notifications, creating the subscriber on first use.
    pub fn activate(&self, id: SubscriberId, username: &str) -> Result<Subscriber, ServiceError> {
        Ok(self.store.activate_subscriber(id, username)?)
    }

    /// Stop notifications. Subscriptions are kept for a later restart.
    pub fn deactivate(&self, id: SubscriberId) -> Result<(), ServiceError> {
        Ok(self.store.deactivate_subscriber(id)?)
    }

    pub fn is_active(&self, id: SubscriberId) -> Result<bool, ServiceError> {
        Ok(self
            .store
            .get_subscriber(id)?
            .is_some_and(|s| s.started))
    }

    pub fn subscribe_search(&self, id: SubscriberId, query: &str) -> Result<bool, ServiceError> {
        self.subscribe(SubscriptionKind::Search, id, query)
    }

    pub fn unsubscribe_search(&self, id: SubscriberId, query: &str) -> Result<(), ServiceError> {
        self.unsubscribe(SubscriptionKind::Search, id, query)
    }

    pub fn subscribe_account_submissions(
        &self,
        id: SubscriberId,
        account: &str,
    ) -> Result<bool, ServiceError> {
        self.subscribe(SubscriptionKind::AccountSubmissions, id, account)
    }

    pub fn subscribe_account_journals(
        &self,
        id: SubscriberId,
        account: &str,
    ) -> Result<bool, ServiceError> {
        self.subscribe(SubscriptionKind::AccountJournals, id, account)
    }

    pub fn unsubscribe_account_submissions(
        &self,
        id: SubscriberId,
        account: &str,
    ) -> Result<(), ServiceError> {
        self.unsubscribe(SubscriptionKind::AccountSubmissions, id, account)
    }

    pub fn unsubscribe_account_journals(
        &self,
        id: SubscriberId,
        account: &str,
    ) -> Result<(), ServiceError> {
        self.unsubscribe(SubscriptionKind::AccountJournals, id, account)
    }

    pub fn list_subscriptions_for(&self, id: SubscriberId) -> Result<Subscriptions, ServiceError> {
        Ok(self.store.list_subscriptions(id)?)
    }

    fn subscribe(
        &self,
        kind: SubscriptionKind,
        id: SubscriberId,
        raw_key: &str,
    ) -> Result<bool, ServiceError> {
        if raw_key.trim().is_empty() {
            return Err(ServiceError::EmptyKey(kind));
        }
        if !self.is_active(id)? {
            return Err(ServiceError::NotActive(id));
        }
        Ok(self
            .store
            .add_subscriber_with_limits(kind, id, raw_key, &self.limits)?)
    }

    fn unsubscribe(
        &self,
        kind: SubscriptionKind,
        id: SubscriberId,
        raw_key: &str,
    ) -> Result<(), ServiceError> {
        if raw_key.trim().is_empty() {
            return Err(ServiceError::EmptyKey(kind));
        }
        match self.store.remove_subscriber(kind, id, raw_key) {
            Ok(()) => Ok(()),
            Err(StoreError::SubscriberNotFound(_)) => Err(ServiceError::NotActive(id)),
            Err(e) => Err(e.into()),
        }
    }
}
