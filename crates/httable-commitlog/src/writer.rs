//! Appends mutation batches to a commit log directory, rotating to a new
//! numbered file once the current one crosses a size threshold, and
//! coalescing concurrent `sync()` callers into a single Filesystem flush.
//! The coalescing is a leader/follower collapse over an append epoch
//! counter: the first caller to observe a given epoch performs the flush
//! and wakes every other caller waiting on that same epoch, so a burst of
//! concurrent commits costs one flush instead of one per caller.

use std::sync::Arc;

use httable_compress::BlockCodec;
use httable_error::Result;
use httable_fs::{FileHandle, Filesystem};
use httable_types::{SerializedKeyOwned, TableId, Value};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::frame::{encode_frame, encode_frame_raw, LINK_TABLE_ID};

fn file_name(index: u64) -> String {
    format!("{index:020}")
}

fn file_path(dir: &str, index: u64) -> String {
    format!("{dir}/{}", file_name(index))
}

fn next_file_index(fs: &dyn Filesystem, dir: &str) -> Result<u64> {
    let names = fs.readdir(dir)?;
    let max = names.iter().filter_map(|n| n.parse::<u64>().ok()).max();
    Ok(max.map_or(0, |m| m + 1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Idle,
    Flushing { target_epoch: u64 },
}

struct GroupCommit {
    state: SyncState,
    pending_epoch: u64,
    completed_epoch: u64,
}

impl GroupCommit {
    fn new() -> Self {
        Self {
            state: SyncState::Idle,
            pending_epoch: 0,
            completed_epoch: 0,
        }
    }

    fn record_append(&mut self) -> u64 {
        self.pending_epoch += 1;
        self.pending_epoch
    }
}

struct WriterState {
    file_index: u64,
    fd: FileHandle,
    file_size: u64,
    last_timestamp: u64,
    group_commit: GroupCommit,
}

/// A durable, ordered, block-compressed append log for one range (or
/// split fragment). One writer owns one directory of numbered files.
pub struct CommitLogWriter {
    fs: Arc<dyn Filesystem>,
    dir: String,
    codec: Box<dyn BlockCodec>,
    file_size_threshold: u64,
    state: Mutex<WriterState>,
    commit_cv: Condvar,
}

impl CommitLogWriter {
    pub fn open(fs: Arc<dyn Filesystem>, dir: impl Into<String>, codec: Box<dyn BlockCodec>, file_size_threshold: u64) -> Result<Self> {
        let dir = dir.into();
        fs.mkdirs(&dir)?;
        let file_index = next_file_index(fs.as_ref(), &dir)?;
        let fd = fs.create(&file_path(&dir, file_index), true, 0, 0, 0)?;
        Ok(Self {
            fs,
            dir,
            codec,
            file_size_threshold,
            state: Mutex::new(WriterState {
                file_index,
                fd,
                file_size: 0,
                last_timestamp: 0,
                group_commit: GroupCommit::new(),
            }),
            commit_cv: Condvar::new(),
        })
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Appends one mutation batch's already-encoded `(key, value)` pairs,
    /// returning `OK` only after the Filesystem accepted the write. The
    /// returned epoch identifies this append for [`Self::sync`]; a caller
    /// that needs this batch durable must call `sync(epoch)` afterward.
    pub fn append(&self, table_id: TableId, pairs: &[(SerializedKeyOwned, Value)], commit_ts: u64) -> Result<u64> {
        let frame = encode_frame(self.codec.as_ref(), table_id, commit_ts, pairs)?;
        self.append_frame(&frame, commit_ts)
    }

    /// Records, as a control frame, that `other_log_dir` must be replayed
    /// before this log during recovery (used for split logs and commits
    /// spanning logs).
    pub fn link(&self, other_log_dir: &str) -> Result<u64> {
        let frame = encode_frame_raw(self.codec.as_ref(), LINK_TABLE_ID, 0, other_log_dir.as_bytes())?;
        self.append_frame(&frame, 0)
    }

    fn append_frame(&self, frame: &[u8], commit_ts: u64) -> Result<u64> {
        let mut state = self.state.lock();
        self.fs.append(state.fd, frame, false)?;
        state.file_size += frame.len() as u64;
        state.last_timestamp = state.last_timestamp.max(commit_ts);
        let epoch = state.group_commit.record_append();

        if state.file_size >= self.file_size_threshold {
            self.rotate(&mut state)?;
        }
        Ok(epoch)
    }

    fn rotate(&self, state: &mut WriterState) -> Result<()> {
        self.fs.close(state.fd)?;
        state.file_index += 1;
        state.fd = self.fs.create(&file_path(&self.dir, state.file_index), true, 0, 0, 0)?;
        state.file_size = 0;
        debug!(dir = %self.dir, file_index = state.file_index, "commit log rotated to a new file");
        Ok(())
    }

    /// Flushes through the Filesystem, guaranteeing every append whose
    /// returned epoch is `<= epoch` is durable once this returns `Ok`.
    /// Concurrent callers targeting epochs already covered by an
    /// in-flight flush share its result rather than each issuing their
    /// own Filesystem `flush`.
    pub fn sync(&self, epoch: u64) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.group_commit.completed_epoch >= epoch {
                return Ok(());
            }
            match state.group_commit.state {
                SyncState::Flushing { .. } => {
                    self.commit_cv.wait(&mut state);
                }
                SyncState::Idle => {
                    let target_epoch = state.group_commit.pending_epoch;
                    state.group_commit.state = SyncState::Flushing { target_epoch };
                    let fd = state.fd;
                    drop(state);

                    let result = self.fs.flush(fd);
                    let mut reacquired = self.state.lock();
                    match &result {
                        Ok(()) => reacquired.group_commit.completed_epoch = target_epoch,
                        Err(err) => info!(dir = %self.dir, error = %err, "commit log group-commit flush failed"),
                    }
                    reacquired.group_commit.state = SyncState::Idle;
                    drop(reacquired);
                    self.commit_cv.notify_all();
                    return result;
                }
            }
        }
    }

    /// Deletes log files whose highest timestamp is `<= threshold_ts`,
    /// called after an access-group compaction has persisted every
    /// mutation up to that point. The currently-open file is never
    /// purged even if empty.
    pub fn purge(&self, threshold_ts: u64) -> Result<usize> {
        let state = self.state.lock();
        let current_index = state.file_index;
        drop(state);

        let names = self.fs.readdir(&self.dir)?;
        let mut removed = 0;
        for name in names {
            let Ok(index) = name.parse::<u64>() else { continue };
            if index >= current_index {
                continue;
            }
            let path = file_path(&self.dir, index);
            if file_highest_timestamp(self.fs.as_ref(), &path)? <= threshold_ts {
                self.fs.rmdir(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Scans one log file to find the highest commit timestamp it contains,
/// tolerating a truncated tail the same way replay does.
fn file_highest_timestamp(fs: &dyn Filesystem, path: &str) -> Result<u64> {
    use httable_fs::OpenFlags;

    let len = fs.length(path)? as usize;
    let fd = fs.open(path, OpenFlags::READ)?;
    let bytes = fs.pread(fd, 0, len)?;
    fs.close(fd)?;

    let mut pos = 0;
    let mut highest = 0u64;
    while pos < bytes.len() {
        let Some(header) = crate::frame::decode_frame_header(&bytes[pos..])? else { break };
        if bytes.len() - pos < header.frame_len() {
            break;
        }
        highest = highest.max(header.timestamp);
        pos += header.frame_len();
    }
    Ok(highest)
}
