//! Buckets and read/write transactions over them.
//!
//! A write transaction never touches the committed buckets directly. Puts and
//! deletes go into an overlay that reads consult first; on commit the overlay
//! is turned into a [`Commit`] that is logged and then applied.

use super::records::Record;
use crate::error::{Result, StoreError};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Logical record family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bucket {
    Metadata,
    Searches,
    Accounts,
    Subscribers,
}

impl Bucket {
    /// Every bucket a versioned store must contain.
    pub const ALL: [Bucket; 4] = [
        Bucket::Metadata,
        Bucket::Searches,
        Bucket::Accounts,
        Bucket::Subscribers,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Bucket::Metadata => "metadata",
            Bucket::Searches => "searches",
            Bucket::Accounts => "accounts",
            Bucket::Subscribers => "subscribers",
        }
    }
}

/// A single change inside a commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    CreateBucket(Bucket),
    Put {
        bucket: Bucket,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        bucket: Bucket,
        key: Vec<u8>,
    },
}

/// One committed transaction as written to the log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commit {
    pub timestamp: Timestamp,
    pub ops: Vec<Op>,
}

type BucketMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// Committed contents of the store.
#[derive(Clone, Debug, Default)]
pub struct Buckets {
    inner: BTreeMap<Bucket, BucketMap>,
}

impl Buckets {
    pub fn contains(&self, bucket: Bucket) -> bool {
        self.inner.contains_key(&bucket)
    }

    fn bucket(&self, bucket: Bucket) -> Result<&BucketMap> {
        self.inner
            .get(&bucket)
            .ok_or(StoreError::MissingBucket(bucket.name()))
    }

    /// Apply a commit. Puts and deletes against a missing bucket are
    /// corruption: the bucket must be created by an earlier op.
    pub fn apply(&mut self, ops: &[Op]) -> Result<()> {
        for op in ops {
            match op {
                Op::CreateBucket(bucket) => {
                    self.inner.entry(*bucket).or_default();
                }
                Op::Put { bucket, key, value } => {
                    self.inner
                        .get_mut(bucket)
                        .ok_or_else(|| {
                            StoreError::Corruption(format!(
                                "put into missing bucket {}",
                                bucket.name()
                            ))
                        })?
                        .insert(key.clone(), value.clone());
                }
                Op::Delete { bucket, key } => {
                    self.inner
                        .get_mut(bucket)
                        .ok_or_else(|| {
                            StoreError::Corruption(format!(
                                "delete from missing bucket {}",
                                bucket.name()
                            ))
                        })?
                        .remove(key);
                }
            }
        }
        Ok(())
    }

    /// Ops that recreate the current contents from nothing.
    pub fn to_ops(&self) -> Vec<Op> {
        let mut ops = Vec::new();
        for (bucket, map) in &self.inner {
            ops.push(Op::CreateBucket(*bucket));
            for (key, value) in map {
                ops.push(Op::Put {
                    bucket: *bucket,
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        ops
    }

    /// Number of keys in a bucket (0 if the bucket is missing).
    pub fn len(&self, bucket: Bucket) -> usize {
        self.inner.get(&bucket).map_or(0, BTreeMap::len)
    }

    /// Total bytes of live keys and values.
    pub fn live_size(&self) -> u64 {
        self.inner
            .values()
            .flat_map(|m| m.iter())
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }
}

/// Read-only view of the committed buckets.
pub struct ReadTx<'a> {
    buckets: &'a Buckets,
}

impl<'a> ReadTx<'a> {
    pub(crate) fn new(buckets: &'a Buckets) -> Self {
        Self { buckets }
    }

    pub fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<&'a [u8]>> {
        Ok(self.buckets.bucket(bucket)?.get(key).map(Vec::as_slice))
    }

    /// All entries of a bucket in key order.
    pub fn scan(&self, bucket: Bucket) -> Result<impl Iterator<Item = (&'a [u8], &'a [u8])>> {
        Ok(self
            .buckets
            .bucket(bucket)?
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice())))
    }

    pub fn keys(&self, bucket: Bucket) -> Result<Vec<Vec<u8>>> {
        Ok(self.buckets.bucket(bucket)?.keys().cloned().collect())
    }

    pub fn get_record<R: Record>(&self, key: &str) -> Result<Option<R>> {
        self.get(R::BUCKET, key.as_bytes())?
            .map(R::decode)
            .transpose()
    }

    /// Decode every record of a bucket in key order.
    pub fn records<R: Record>(&self) -> Result<Vec<R>> {
        self.scan(R::BUCKET)?.map(|(_, v)| R::decode(v)).collect()
    }

    pub fn count(&self, bucket: Bucket) -> usize {
        self.buckets.len(bucket)
    }

    pub fn live_size(&self) -> u64 {
        self.buckets.live_size()
    }

    pub fn string_keys(&self, bucket: Bucket) -> Result<Vec<String>> {
        self.keys(bucket)?
            .into_iter()
            .map(|key| utf8_key(bucket, key))
            .collect()
    }
}

fn utf8_key(bucket: Bucket, key: Vec<u8>) -> Result<String> {
    String::from_utf8(key)
        .map_err(|_| StoreError::Corruption(format!("non-UTF-8 key in {}", bucket.name())))
}

/// Write transaction. Changes are invisible to other readers until the
/// enclosing [`Store::update`](crate::Store::update) commits.
pub struct WriteTx<'a> {
    base: &'a Buckets,
    /// Pending value per key; `None` marks a delete.
    overlay: BTreeMap<(Bucket, Vec<u8>), Option<Vec<u8>>>,
    created: BTreeSet<Bucket>,
    ops: Vec<Op>,
}

impl<'a> WriteTx<'a> {
    pub(crate) fn new(base: &'a Buckets) -> Self {
        Self {
            base,
            overlay: BTreeMap::new(),
            created: BTreeSet::new(),
            ops: Vec::new(),
        }
    }

    pub fn has_bucket(&self, bucket: Bucket) -> bool {
        self.base.contains(bucket) || self.created.contains(&bucket)
    }

    fn require(&self, bucket: Bucket) -> Result<()> {
        if self.has_bucket(bucket) {
            Ok(())
        } else {
            Err(StoreError::MissingBucket(bucket.name()))
        }
    }

    pub fn create_bucket_if_missing(&mut self, bucket: Bucket) {
        if !self.has_bucket(bucket) {
            self.created.insert(bucket);
            self.ops.push(Op::CreateBucket(bucket));
        }
    }

    pub fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.require(bucket)?;
        if let Some(pending) = self.overlay.get(&(bucket, key.to_vec())) {
            return Ok(pending.clone());
        }
        if self.created.contains(&bucket) {
            return Ok(None);
        }
        Ok(self.base.bucket(bucket)?.get(key).cloned())
    }

    pub fn put(&mut self, bucket: Bucket, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.require(bucket)?;
        self.overlay
            .insert((bucket, key.to_vec()), Some(value.clone()));
        self.ops.push(Op::Put {
            bucket,
            key: key.to_vec(),
            value,
        });
        Ok(())
    }

    pub fn delete(&mut self, bucket: Bucket, key: &[u8]) -> Result<()> {
        self.require(bucket)?;
        self.overlay.insert((bucket, key.to_vec()), None);
        self.ops.push(Op::Delete {
            bucket,
            key: key.to_vec(),
        });
        Ok(())
    }

    /// Keys of a bucket as seen by this transaction, in key order.
    pub fn keys(&self, bucket: Bucket) -> Result<Vec<Vec<u8>>> {
        self.require(bucket)?;
        let mut keys: BTreeSet<Vec<u8>> = if self.created.contains(&bucket) {
            BTreeSet::new()
        } else {
            self.base.bucket(bucket)?.keys().cloned().collect()
        };
        for ((b, key), pending) in &self.overlay {
            if *b != bucket {
                continue;
            }
            match pending {
                Some(_) => {
                    keys.insert(key.clone());
                }
                None => {
                    keys.remove(key);
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    pub fn get_record<R: Record>(&self, key: &str) -> Result<Option<R>> {
        self.get(R::BUCKET, key.as_bytes())?
            .map(|bytes| R::decode(&bytes))
            .transpose()
    }

    pub fn put_record<R: Record>(&mut self, key: &str, record: &R) -> Result<()> {
        let value = record.encode()?;
        self.put(R::BUCKET, key.as_bytes(), value)
    }

    pub fn delete_record<R: Record>(&mut self, key: &str) -> Result<()> {
        self.delete(R::BUCKET, key.as_bytes())
    }

    /// Keys of a bucket as strings.
    pub fn string_keys(&self, bucket: Bucket) -> Result<Vec<String>> {
        self.keys(bucket)?
            .into_iter()
            .map(|key| utf8_key(bucket, key))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn into_ops(self) -> Vec<Op> {
        self.ops
    }
}
