//! Process-local record of delivered (subscriber, item) pairs.

use crate::types::{ItemKey, SubscriberId};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Bounded set of pairs already notified. The oldest pairs are evicted first;
/// the persisted cursors keep old items from coming back anyway.
pub struct AlertedSet {
    seen: Mutex<LruCache<(SubscriberId, ItemKey), ()>>,
}

impl AlertedSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record the pair. Returns `true` the first time it is seen.
    pub fn check_and_record(&self, subscriber: SubscriberId, item: ItemKey) -> bool {
        self.seen.lock().put((subscriber, item), ()).is_none()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
