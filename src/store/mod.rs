//! Transactional subscription store.
//!
//! Everything lives in one file: a commit log replayed into memory on open.
//! Write transactions are serialized; readers never block on a writer until
//! the moment its commit is applied.

mod consistency;
mod entities;
mod log;
mod records;
mod subscribers;
mod subscriptions;
mod tx;

pub use consistency::Inconsistency;
pub use entities::EntityScope;
pub use log::{LOG_FORMAT_VERSION, LOG_MAGIC};
pub use records::{
    normalize_account, normalize_search, DeliveryStatus, Entity, Record, Subscriber,
    Subscriptions, TrackedAccount, TrackedSearch,
};
pub use subscriptions::MonitorLimits;
pub use tx::{Bucket, ReadTx, WriteTx};

use crate::error::{Result, StoreError};
use crate::types::StoreStats;
use fs2::FileExt;
use log::CommitLog;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tx::Buckets;

/// Key of the schema marker in the metadata bucket.
pub const VERSION_KEY: &[u8] = b"version";

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: &str = "1";

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Path of the store file.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync every commit before it becomes visible.
    pub sync_on_commit: bool,

    /// Never compact a log smaller than this.
    pub compact_min_bytes: u64,

    /// Compact once the log is this many times larger than the live data.
    pub compact_ratio: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./pollwatch.db"),
            create_if_missing: true,
            sync_on_commit: true,
            compact_min_bytes: 1024 * 1024,
            compact_ratio: 4.0,
        }
    }
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// The subscription store.
pub struct Store {
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    log: Mutex<CommitLog>,

    /// Committed contents. Writers hold the upgradable guard for the whole
    /// transaction, which serializes them without blocking readers.
    buckets: RwLock<Buckets>,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open(config: StoreConfig) -> Result<Self> {
        if !config.path.exists() && !config.create_if_missing {
            return Err(StoreError::NotInitialized(
                config.path.display().to_string(),
            ));
        }
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = Self::acquire_lock(&config.path)?;
        let (log, replay) = CommitLog::open(&config.path, config.sync_on_commit)?;

        info!(
            path = %config.path.display(),
            commits = replay.commits,
            searches = replay.buckets.len(Bucket::Searches),
            accounts = replay.buckets.len(Bucket::Accounts),
            subscribers = replay.buckets.len(Bucket::Subscribers),
            "Opened store"
        );

        let store = Self {
            config,
            _lock_file: lock_file,
            log: Mutex::new(log),
            buckets: RwLock::new(replay.buckets),
        };
        store.ensure_schema()?;
        store.maybe_compact();
        Ok(store)
    }

    /// Open with default settings at `path`.
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(StoreConfig::at(path))
    }

    fn ensure_schema(&self) -> Result<()> {
        self.update(|tx| {
            tx.create_bucket_if_missing(Bucket::Metadata);
            match tx.get(Bucket::Metadata, VERSION_KEY)? {
                None => {
                    for bucket in Bucket::ALL {
                        tx.create_bucket_if_missing(bucket);
                    }
                    tx.put(
                        Bucket::Metadata,
                        VERSION_KEY,
                        SCHEMA_VERSION.as_bytes().to_vec(),
                    )?;
                    info!(version = SCHEMA_VERSION, "Initialized store schema");
                    Ok(())
                }
                Some(found) if found != SCHEMA_VERSION.as_bytes() => {
                    Err(StoreError::VersionMismatch {
                        expected: SCHEMA_VERSION.to_string(),
                        found: String::from_utf8_lossy(&found).into_owned(),
                    })
                }
                Some(_) => {
                    for bucket in Bucket::ALL {
                        if !tx.has_bucket(bucket) {
                            return Err(StoreError::MissingBucket(bucket.name()));
                        }
                    }
                    Ok(())
                }
            }
        })
    }

    /// Run `f` against a consistent snapshot of the committed data.
    pub fn view<T>(&self, f: impl FnOnce(&ReadTx<'_>) -> Result<T>) -> Result<T> {
        let buckets = self.buckets.read();
        let tx = ReadTx::new(&buckets);
        f(&tx)
    }

    /// Run `f` inside a write transaction.
    ///
    /// If `f` returns an error nothing is written. Otherwise its changes are
    /// appended to the log and then made visible, all at once. Once that has
    /// happened the transaction reports success, whatever follows.
    pub fn update<T>(&self, f: impl FnOnce(&mut WriteTx<'_>) -> Result<T>) -> Result<T> {
        let guard = self.buckets.upgradable_read();
        let mut tx = WriteTx::new(&guard);
        let value = f(&mut tx)?;
        if tx.is_empty() {
            return Ok(value);
        }
        let ops = tx.into_ops();

        self.log.lock().append(&ops)?;

        let mut buckets = RwLockUpgradableReadGuard::upgrade(guard);
        buckets.apply(&ops).map_err(|e| {
            StoreError::Corruption(format!("committed transaction failed to apply: {}", e))
        })?;
        drop(buckets);

        self.maybe_compact();
        Ok(value)
    }

    /// Run a store call on tokio's blocking pool. Commits may fsync, which
    /// must not stall a runtime worker.
    pub async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }

    /// Compact when the log has outgrown the live data. A failure leaves the
    /// current log in place and is only logged.
    fn maybe_compact(&self) {
        let buckets = self.buckets.upgradable_read();
        let mut log = self.log.lock();
        let file_size = log.len();
        if file_size < self.config.compact_min_bytes {
            return;
        }
        let live = buckets.live_size().max(1);
        if (file_size as f64) < self.config.compact_ratio * live as f64 {
            return;
        }
        match log.rewrite(&buckets) {
            Ok(()) => info!(
                before_bytes = file_size,
                after_bytes = log.len(),
                "Compacted store"
            ),
            Err(e) => warn!(
                path = %self.config.path.display(),
                error = %e,
                "Compaction failed, keeping the current log"
            ),
        }
    }

    /// Rewrite the log to hold only live data, regardless of thresholds.
    /// Returns the (before, after) file sizes.
    pub fn compact(&self) -> Result<(u64, u64)> {
        let buckets = self.buckets.upgradable_read();
        let mut log = self.log.lock();
        let before = log.len();
        log.rewrite(&buckets)?;
        let after = log.len();
        info!(before_bytes = before, after_bytes = after, "Compacted store");
        Ok((before, after))
    }

    /// Store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let file_size_bytes = self.log.lock().len();
        self.view(|tx| {
            let subscribers: Vec<Subscriber> = tx.records()?;
            Ok(StoreStats {
                search_count: tx.count(Bucket::Searches) as u64,
                account_count: tx.count(Bucket::Accounts) as u64,
                subscriber_count: subscribers.len() as u64,
                active_subscriber_count: subscribers.iter().filter(|s| s.started).count() as u64,
                unreachable_subscriber_count: subscribers
                    .iter()
                    .filter(|s| s.is_unreachable())
                    .count() as u64,
                file_size_bytes,
                live_size_bytes: tx.live_size(),
            })
        })
    }

    /// Sync the log to disk.
    pub fn sync(&self) -> Result<()> {
        self.log.lock().sync()
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        let lock_file = File::create(PathBuf::from(lock_path))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        debug!(path = %path.display(), "Acquired store lock");
        Ok(lock_file)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
