//! Scaling tests with synthetic stores of thousands of relationships.
//!
//! Measures population, replay on reopen, a full iteration pass, and
//! compaction, and checks the relationship invariants still hold afterwards.

use pollwatch::{ItemId, Store, StoreConfig, SubscriberId, SubscriptionKind};
use std::time::Instant;
use tempfile::TempDir;

const SUBSCRIBERS: i64 = 200;
const SEARCHES_PER_SUBSCRIBER: usize = 10;

fn test_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        path: dir.path().join("pollwatch.db"),
        sync_on_commit: false,
        ..StoreConfig::default()
    }
}

/// Timing helper
struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    fn report_with_count(&self, count: usize) {
        let ms = self.start.elapsed().as_secs_f64() * 1000.0;
        let per_item = if count > 0 { ms / count as f64 } else { 0.0 };
        println!(
            "  {} took {:.2}ms ({} items, {:.4}ms/item)",
            self.name, ms, count, per_item
        );
    }
}

fn populate(store: &Store) -> usize {
    let mut added = 0;
    for id in 0..SUBSCRIBERS {
        store
            .activate_subscriber(SubscriberId(id), &format!("user{id}"))
            .unwrap();
        for n in 0..SEARCHES_PER_SUBSCRIBER {
            // Overlapping queries so most searches have several subscribers.
            let query = format!("query {}", (id as usize * 7 + n) % 300);
            if store
                .add_subscriber(SubscriptionKind::Search, SubscriberId(id), &query)
                .unwrap()
            {
                added += 1;
            }
        }
        let account = format!("artist{}", id % 50);
        store
            .add_subscriber(SubscriptionKind::AccountSubmissions, SubscriberId(id), &account)
            .unwrap();
        added += 1;
    }
    added
}

#[test]
fn test_scaling_populate_and_reopen() {
    let dir = TempDir::new().unwrap();

    let timer = Timer::new("populate");
    let (added, searches) = {
        let store = Store::open(test_config(&dir)).unwrap();
        let added = populate(&store);
        (added, store.search_keys().unwrap().len())
    };
    timer.report_with_count(added);

    let timer = Timer::new("reopen");
    let store = Store::open(test_config(&dir)).unwrap();
    timer.report_with_count(added);

    let stats = store.stats().unwrap();
    assert_eq!(stats.subscriber_count, SUBSCRIBERS as u64);
    assert_eq!(stats.search_count, searches as u64);
    assert_eq!(stats.account_count, 50);
    assert!(store.check_consistency().unwrap().is_empty());
}

#[test]
fn test_scaling_iteration_pass() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(test_config(&dir)).unwrap();
    populate(&store);

    let timer = Timer::new("iterate searches");
    let mut visited = 0;
    store
        .iterate_searches(|search, scope| {
            visited += 1;
            for &id in &search.subscribers {
                assert!(scope.has_subscriber(id).unwrap());
            }
            search.last_id = Some(ItemId(visited));
            scope.save(search)
        })
        .unwrap();
    timer.report_with_count(visited as usize);

    assert_eq!(visited as usize, store.search_keys().unwrap().len());
    let first = store.search_keys().unwrap().remove(0);
    assert_eq!(
        store.get_search(&first).unwrap().unwrap().last_id,
        Some(ItemId(1))
    );
}

#[test]
fn test_scaling_churn_then_compact() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(test_config(&dir)).unwrap();
    populate(&store);

    // Everyone drops every search; only accounts remain.
    let timer = Timer::new("unsubscribe all searches");
    let mut removed = 0;
    for subscriber in store.list_subscribers().unwrap() {
        for query in &subscriber.searches {
            store
                .remove_subscriber(SubscriptionKind::Search, subscriber.id, query)
                .unwrap();
            removed += 1;
        }
    }
    timer.report_with_count(removed);
    assert!(store.search_keys().unwrap().is_empty());

    let timer = Timer::new("compact");
    let (before, after) = store.compact().unwrap();
    timer.report_with_count(1);
    println!("  {} -> {} bytes", before, after);
    assert!(after < before);
    assert!(store.check_consistency().unwrap().is_empty());
}
