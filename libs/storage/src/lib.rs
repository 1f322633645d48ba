//! Durable state store backed by a single JSON file
//!
//! The file holds one versioned record, `{"version": n, "state": {...}}`.
//! Writes go to a temporary file in the same directory which is then renamed
//! over the record, so readers always see either the old or the new record.
//!
//! Compare-and-swap is serialized in two layers: a mutex for writers sharing
//! one [`FileStateStore`], and an advisory lock on `<file>.lock` for writers in
//! other processes. The lock file itself stays on disk between writes.

mod lock;

use lock::FileLock;
use parking_lot::Mutex;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use votesim_cluster::{ClusterState, StateStore, StoreError, StoreResult, Versioned};

/// State store that keeps the cluster record in a JSON file
pub struct FileStateStore {
    path: PathBuf,
    lock_path: PathBuf,
    writer: Mutex<()>,
    lock_attempts: u32,
    lock_backoff: Duration,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");

        Self {
            path,
            lock_path: PathBuf::from(lock_path),
            writer: Mutex::new(()),
            lock_attempts: 50,
            lock_backoff: Duration::from_millis(10),
        }
    }

    /// How long to wait for another process to release the lock file
    pub fn with_lock_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.lock_attempts = attempts.max(1);
        self.lock_backoff = backoff;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn read_record(&self) -> StoreResult<Option<Versioned<ClusterState>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Version of the stored record, treating a corrupt record as absent
    fn current_version(&self) -> StoreResult<Option<u64>> {
        match self.read_record() {
            Ok(record) => Ok(record.map(|record| record.version)),
            Err(StoreError::Corrupt(reason)) => {
                debug!(path = %self.path.display(), %reason, "overwriting corrupt state file");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn write_record(&self, version: u64, state: &ClusterState) -> StoreResult<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let mut bytes = serde_json::to_vec_pretty(&Versioned { version, state })?;
        bytes.push(b'\n');

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&bytes)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| StoreError::from(e.error))?;

        debug!(path = %self.path.display(), version, "state file written");
        Ok(())
    }

    /// Run `f` while holding both the in-process and the cross-process lock
    fn exclusive<T>(&self, f: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
        let _writer = self.writer.lock();
        let _lock = FileLock::acquire(&self.lock_path, self.lock_attempts, self.lock_backoff)?;
        f()
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> StoreResult<Option<Versioned<ClusterState>>> {
        self.read_record()
    }

    fn compare_and_swap(&self, expected: Option<u64>, state: &ClusterState) -> StoreResult<u64> {
        self.exclusive(|| {
            let actual = self.read_record()?.map(|record| record.version);
            if actual != expected {
                return Err(StoreError::Conflict { expected, actual });
            }

            let version = actual.map(|v| v + 1).unwrap_or(1);
            self.write_record(version, state)?;
            Ok(version)
        })
    }

    fn replace(&self, state: &ClusterState) -> StoreResult<u64> {
        self.exclusive(|| {
            // A corrupt record is overwritten, which is how a cluster is reset
            let current = self.current_version()?;
            let version = current.map(|v| v + 1).unwrap_or(1);
            self.write_record(version, state)?;
            Ok(version)
        })
    }
}
