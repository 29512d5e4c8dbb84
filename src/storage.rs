// src/storage.rs
//! Persisted state: the seen-fingerprint index, the scheduler's last-run marker and the
//! state-dir lock that keeps two processes from running the pipeline at once.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::fs;

use crate::error::StorageFailure;
use crate::model::{Fingerprint, SeenRecord};

/// Dedup history keyed by fingerprint. Both operations are atomic per key.
#[async_trait]
pub trait SeenStore: Send + Sync {
    async fn get_seen(&self, fingerprint: &Fingerprint) -> Result<Option<SeenRecord>, StorageFailure>;
    /// Insert or replace the record for `record.fingerprint`.
    async fn put_seen(&self, record: &SeenRecord) -> Result<(), StorageFailure>;

    /// Pick up records written by other processes since the last read.
    async fn refresh(&self) -> Result<(), StorageFailure> {
        Ok(())
    }
}

/// Scheduler bookkeeping that has to survive a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Local calendar date of the last successful run.
    pub last_run_date: Option<NaiveDate>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
}

#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Load-or-default: a missing file is a fresh install, not an error.
    async fn load(&self) -> Result<RunState, StorageFailure>;
    async fn save(&self, state: &RunState) -> Result<(), StorageFailure>;
}

// ------------------------------------------------------------
// In-memory
// ------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemorySeenStore {
    inner: Mutex<BTreeMap<Fingerprint, SeenRecord>>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<SeenRecord> {
        self.inner
            .lock()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SeenStore for MemorySeenStore {
    async fn get_seen(&self, fingerprint: &Fingerprint) -> Result<Option<SeenRecord>, StorageFailure> {
        let map = self
            .inner
            .lock()
            .map_err(|e| StorageFailure::new("get_seen", e))?;
        Ok(map.get(fingerprint).cloned())
    }

    async fn put_seen(&self, record: &SeenRecord) -> Result<(), StorageFailure> {
        let mut map = self
            .inner
            .lock()
            .map_err(|e| StorageFailure::new("put_seen", e))?;
        map.insert(record.fingerprint.clone(), record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRunStateStore {
    inner: Mutex<RunState>,
}

impl MemoryRunStateStore {
    pub fn with_state(state: RunState) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }
}

#[async_trait]
impl RunStateStore for MemoryRunStateStore {
    async fn load(&self) -> Result<RunState, StorageFailure> {
        self.inner
            .lock()
            .map(|s| s.clone())
            .map_err(|e| StorageFailure::new("load_run_state", e))
    }

    async fn save(&self, state: &RunState) -> Result<(), StorageFailure> {
        let mut s = self
            .inner
            .lock()
            .map_err(|e| StorageFailure::new("save_run_state", e))?;
        *s = state.clone();
        Ok(())
    }
}

// ------------------------------------------------------------
// JSON files
// ------------------------------------------------------------

/// Write via a sibling temp file and rename, so readers never see a half-written file.
async fn write_json_atomic<T: Serialize + ?Sized>(
    op: &'static str,
    path: &Path,
    value: &T,
) -> Result<(), StorageFailure> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| StorageFailure::new(op, format!("{}: {e}", dir.display())))?;
    }
    let json = serde_json::to_vec_pretty(value).map_err(|e| StorageFailure::new(op, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .await
        .map_err(|e| StorageFailure::new(op, format!("{}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StorageFailure::new(op, format!("{}: {e}", path.display())))?;
    Ok(())
}

/// `Ok(None)` when the file does not exist. A corrupt file is an error, never a silent reset.
async fn read_json<T: DeserializeOwned>(
    op: &'static str,
    path: &Path,
) -> Result<Option<T>, StorageFailure> {
    match fs::read_to_string(path).await {
        Ok(s) => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| StorageFailure::new(op, format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageFailure::new(op, format!("{}: {e}", path.display()))),
    }
}

/// Fold `rec` into `map`. The earliest `first_seen_at` wins and a set `posted_at` never
/// goes back to `None`.
fn merge_record(map: &mut BTreeMap<Fingerprint, SeenRecord>, rec: SeenRecord) {
    match map.get_mut(&rec.fingerprint) {
        None => {
            map.insert(rec.fingerprint.clone(), rec);
        }
        Some(cur) => {
            cur.first_seen_at = cur.first_seen_at.min(rec.first_seen_at);
            cur.posted_at = match (cur.posted_at, rec.posted_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
    }
}

/// Whole-index JSON file. Every put re-reads the file, merges and rewrites it atomically,
/// so records written by another process are kept, never overwritten.
pub struct JsonSeenStore {
    path: PathBuf,
    inner: tokio::sync::Mutex<BTreeMap<Fingerprint, SeenRecord>>,
}

impl JsonSeenStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageFailure> {
        let path = path.into();
        let mut map = BTreeMap::new();
        for r in read_json::<Vec<SeenRecord>>("open_seen", &path).await?.unwrap_or_default() {
            merge_record(&mut map, r);
        }
        tracing::debug!(target: "dedup", path = %path.display(), records = map.len(), "seen index loaded");
        Ok(Self {
            path,
            inner: tokio::sync::Mutex::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    async fn merge_from_disk(
        &self,
        op: &'static str,
        map: &mut BTreeMap<Fingerprint, SeenRecord>,
    ) -> Result<(), StorageFailure> {
        if let Some(disk) = read_json::<Vec<SeenRecord>>(op, &self.path).await? {
            for r in disk {
                merge_record(map, r);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SeenStore for JsonSeenStore {
    async fn get_seen(&self, fingerprint: &Fingerprint) -> Result<Option<SeenRecord>, StorageFailure> {
        Ok(self.inner.lock().await.get(fingerprint).cloned())
    }

    async fn put_seen(&self, record: &SeenRecord) -> Result<(), StorageFailure> {
        let mut map = self.inner.lock().await;
        let mut next = map.clone();
        self.merge_from_disk("put_seen", &mut next).await?;
        merge_record(&mut next, record.clone());
        let all: Vec<&SeenRecord> = next.values().collect();
        write_json_atomic("put_seen", &self.path, &all).await?;
        *map = next;
        Ok(())
    }

    async fn refresh(&self) -> Result<(), StorageFailure> {
        let mut map = self.inner.lock().await;
        let before = map.len();
        self.merge_from_disk("refresh_seen", &mut map).await?;
        tracing::debug!(target: "dedup", added = map.len() - before, "seen index refreshed");
        Ok(())
    }
}

/// Advisory exclusive lock on `<state_dir>/run.lock`, shared by every process using the dir.
#[derive(Debug, Clone)]
pub struct StateDirLock {
    path: PathBuf,
}

/// Held for the length of a run. The lock is released when the file handle closes.
#[derive(Debug)]
pub struct StateDirGuard {
    _file: File,
}

impl StateDirLock {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join("run.lock"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when another holder has the lock.
    pub fn try_acquire(&self) -> Result<Option<StateDirGuard>, StorageFailure> {
        let op = "lock_state_dir";
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| StorageFailure::new(op, format!("{}: {e}", dir.display())))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .map_err(|e| StorageFailure::new(op, format!("{}: {e}", self.path.display())))?;
        match fs2::FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(StateDirGuard { _file: file })),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(StorageFailure::new(op, format!("{}: {e}", self.path.display()))),
        }
    }
}

pub struct JsonRunStateStore {
    path: PathBuf,
}

impl JsonRunStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RunStateStore for JsonRunStateStore {
    async fn load(&self) -> Result<RunState, StorageFailure> {
        Ok(read_json("load_run_state", &self.path)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, state: &RunState) -> Result<(), StorageFailure> {
        write_json_atomic("save_run_state", &self.path, state).await
    }
}
