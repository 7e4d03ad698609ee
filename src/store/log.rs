//! Append-only commit log.
//!
//! File layout: `PWS\0` magic, one format version byte, then frames of
//! `u32 LE length | MessagePack commit | u32 LE CRC32`. A commit is durable
//! once its frame has been written and synced.

use super::tx::{Buckets, Commit, Op};
use crate::error::{Result, StoreError};
use crate::types::Timestamp;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Magic bytes for the store file.
pub const LOG_MAGIC: &[u8; 4] = b"PWS\0";

/// Current on-disk format version.
pub const LOG_FORMAT_VERSION: u8 = 1;

/// Header size (magic + version byte).
pub const HEADER_LEN: u64 = 5;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Handle to the open log file.
pub struct CommitLog {
    path: PathBuf,
    writer: BufWriter<File>,
    len: u64,
    sync_on_commit: bool,
}

/// Result of replaying an existing log.
pub struct Replay {
    pub buckets: Buckets,
    pub commits: u64,
    /// Bytes dropped from a torn final frame.
    pub truncated_bytes: u64,
}

impl CommitLog {
    /// Open the log at `path`, creating it with a fresh header if missing,
    /// and replay every committed frame.
    pub fn open(path: impl AsRef<Path>, sync_on_commit: bool) -> Result<(Self, Replay)> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() || fs::metadata(&path)?.len() == 0 {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.write_all(LOG_MAGIC)?;
            file.write_all(&[LOG_FORMAT_VERSION])?;
            file.sync_all()?;
            drop(file);

            let log = Self::append_handle(path, HEADER_LEN, sync_on_commit)?;
            let replay = Replay {
                buckets: Buckets::default(),
                commits: 0,
                truncated_bytes: 0,
            };
            return Ok((log, replay));
        }

        let mut data = Vec::new();
        File::open(&path)?.read_to_end(&mut data)?;
        let (replay, valid_len) = replay_bytes(&data)?;

        if replay.truncated_bytes > 0 {
            warn!(
                path = %path.display(),
                dropped_bytes = replay.truncated_bytes,
                "Truncating incomplete final commit"
            );
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let log = Self::append_handle(path, valid_len, sync_on_commit)?;
        Ok((log, replay))
    }

    fn append_handle(path: PathBuf, len: u64, sync_on_commit: bool) -> Result<Self> {
        let mut file = OpenOptions::new().write(true).open(&path)?;
        file.seek(SeekFrom::Start(len))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            len,
            sync_on_commit,
        })
    }

    /// Append one commit. Returns once the frame is on disk (synced when
    /// `sync_on_commit` is set).
    pub fn append(&mut self, ops: &[Op]) -> Result<()> {
        let commit = Commit {
            timestamp: Timestamp::now(),
            ops: ops.to_vec(),
        };
        match self.write_commit(&commit) {
            Ok(written) => {
                self.len += written;
                Ok(())
            }
            Err(e) => {
                if let Err(reset) = self.discard_partial() {
                    warn!(path = %self.path.display(), error = %reset, "Unable to drop partial commit");
                }
                Err(e)
            }
        }
    }

    fn write_commit(&mut self, commit: &Commit) -> Result<u64> {
        let written = write_frame(&mut self.writer, commit)?;
        self.writer.flush()?;
        if self.sync_on_commit {
            self.writer.get_ref().sync_data()?;
        }
        Ok(written)
    }

    /// Cut the file back to the last complete frame and drop any bytes still
    /// buffered, so the next append starts on a frame boundary.
    fn discard_partial(&mut self) -> Result<()> {
        self.writer.get_ref().set_len(self.len)?;
        let fresh = Self::append_handle(self.path.clone(), self.len, self.sync_on_commit)?;
        let stale = std::mem::replace(self, fresh);
        let (_file, _unflushed) = stale.writer.into_parts();
        Ok(())
    }

    /// Current file length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len <= HEADER_LEN
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the log with commits holding only the live contents.
    ///
    /// The new file is written next to the old one and renamed over it, so a
    /// crash leaves either the old or the new log intact.
    pub fn rewrite(&mut self, buckets: &Buckets) -> Result<()> {
        self.rewrite_in_frames(buckets, MAX_FRAME_LEN)
    }

    fn rewrite_in_frames(&mut self, buckets: &Buckets, frame_budget: usize) -> Result<()> {
        let batches = split_ops(buckets.to_ops(), frame_budget)?;
        let tmp_path = self.path.with_extension("compact");

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(LOG_MAGIC)?;
        writer.write_all(&[LOG_FORMAT_VERSION])?;
        let mut len = HEADER_LEN;
        let timestamp = Timestamp::now();
        for ops in batches {
            len += write_frame(&mut writer, &Commit { timestamp, ops })?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;

        // The handle follows the file through the rename.
        let fresh = Self {
            path: self.path.clone(),
            writer,
            len,
            sync_on_commit: self.sync_on_commit,
        };
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            drop(fresh);
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        if let Some(parent) = self.path.parent() {
            // Persist the rename where the platform allows opening directories.
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        *self = fresh;
        Ok(())
    }

    /// Flush buffered bytes and sync the file.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Bytes a commit adds around its encoded ops: the struct and array headers
/// plus the timestamp, with room to spare.
const COMMIT_OVERHEAD: usize = 32;

/// Group `ops`, in order, into batches whose commits each fit in
/// `frame_budget` bytes.
fn split_ops(ops: Vec<Op>, frame_budget: usize) -> Result<Vec<Vec<Op>>> {
    let limit = frame_budget.saturating_sub(COMMIT_OVERHEAD);
    let mut batches = Vec::new();
    let mut batch = Vec::new();
    let mut batch_len = 0usize;

    for op in ops {
        let op_len = rmp_serde::to_vec(&op)?.len();
        if op_len > limit {
            return Err(StoreError::InvalidOperation(format!(
                "record of {} bytes does not fit in a {} byte frame",
                op_len, frame_budget
            )));
        }
        if !batch.is_empty() && batch_len + op_len > limit {
            batches.push(std::mem::take(&mut batch));
            batch_len = 0;
        }
        batch_len += op_len;
        batch.push(op);
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    Ok(batches)
}

fn write_frame<W: Write>(writer: &mut W, commit: &Commit) -> Result<u64> {
    let encoded = rmp_serde::to_vec(commit)?;
    if encoded.len() > MAX_FRAME_LEN {
        return Err(StoreError::InvalidOperation(format!(
            "commit of {} bytes exceeds the {} byte frame limit",
            encoded.len(),
            MAX_FRAME_LEN
        )));
    }
    let len = encoded.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&encoded)?;
    let checksum = crc32fast::hash(&encoded);
    writer.write_all(&checksum.to_le_bytes())?;
    Ok(encoded.len() as u64 + 8)
}

/// Replay a whole log image. Returns the rebuilt buckets and the length of
/// the valid prefix.
///
/// An incomplete or checksum-failing frame at the very end is a torn write
/// and is dropped. A bad frame followed by more data is corruption.
pub fn replay_bytes(data: &[u8]) -> Result<(Replay, u64)> {
    if data.len() < HEADER_LEN as usize {
        return Err(StoreError::InvalidFormat("file shorter than header".into()));
    }
    if &data[..4] != LOG_MAGIC {
        return Err(StoreError::InvalidFormat("invalid store magic".into()));
    }
    if data[4] != LOG_FORMAT_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "unsupported store format version: {}",
            data[4]
        )));
    }

    let mut buckets = Buckets::default();
    let mut commits = 0u64;
    let mut pos = HEADER_LEN as usize;

    while pos < data.len() {
        let remaining = data.len() - pos;
        if remaining < 4 {
            break;
        }
        let len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
            as usize;
        if len > MAX_FRAME_LEN {
            return Err(StoreError::Corruption(format!(
                "frame at offset {} claims {} bytes",
                pos, len
            )));
        }
        if remaining < 4 + len + 4 {
            break;
        }

        let payload = &data[pos + 4..pos + 4 + len];
        let crc_at = pos + 4 + len;
        let stored = u32::from_le_bytes([
            data[crc_at],
            data[crc_at + 1],
            data[crc_at + 2],
            data[crc_at + 3],
        ]);
        let computed = crc32fast::hash(payload);
        if stored != computed {
            if crc_at + 4 == data.len() {
                // Final frame only partially reached the disk.
                break;
            }
            return Err(StoreError::ChecksumMismatch {
                offset: pos as u64,
                expected: stored,
                got: computed,
            });
        }

        let commit: Commit = rmp_serde::from_slice(payload)?;
        buckets.apply(&commit.ops)?;
        commits += 1;
        pos = crc_at + 4;
    }

    let valid_len = pos as u64;
    let replay = Replay {
        buckets,
        commits,
        truncated_bytes: data.len() as u64 - valid_len,
    };
    Ok((replay, valid_len))
}
