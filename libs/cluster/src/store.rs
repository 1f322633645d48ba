//! Persistence port for the cluster state
//!
//! The whole cluster lives in one record. Writers use optimistic concurrency:
//! every record carries a version, and a write only lands if the version it
//! was derived from is still current.

use crate::state::ClusterState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// A stored value together with its version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Starts at 1 for the first write and grows by one per write
    pub version: u64,
    pub state: T,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("stored state is corrupt: {0}")]
    Corrupt(String),

    #[error("version conflict (expected {expected:?}, found {actual:?})")]
    Conflict {
        expected: Option<u64>,
        actual: Option<u64>,
    },
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Trait for cluster state backends
pub trait StateStore: Send + Sync {
    /// Read the current record; `Ok(None)` if the cluster was never initialized
    fn load(&self) -> StoreResult<Option<Versioned<ClusterState>>>;

    /// Write `state` only if the stored version equals `expected`
    ///
    /// `expected = None` means "only if no record exists". Returns the new
    /// version.
    fn compare_and_swap(&self, expected: Option<u64>, state: &ClusterState) -> StoreResult<u64>;

    /// Overwrite the record unconditionally, returning the new version
    fn replace(&self, state: &ClusterState) -> StoreResult<u64>;
}

/// In-memory store (for tests, demos and single-process use)
///
/// Keeps the record serialized so no caller ever shares the stored object.
pub struct MemoryStateStore {
    record: Mutex<Option<Versioned<Vec<u8>>>>,
    available: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            record: Mutex::new(None),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backing store going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }

    fn write(slot: &mut Option<Versioned<Vec<u8>>>, state: &ClusterState) -> StoreResult<u64> {
        let version = slot.as_ref().map(|r| r.version + 1).unwrap_or(1);
        *slot = Some(Versioned {
            version,
            state: serde_json::to_vec(state)?,
        });
        Ok(version)
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> StoreResult<Option<Versioned<ClusterState>>> {
        self.check_available()?;

        match &*self.record.lock() {
            Some(record) => Ok(Some(Versioned {
                version: record.version,
                state: serde_json::from_slice(&record.state)?,
            })),
            None => Ok(None),
        }
    }

    fn compare_and_swap(&self, expected: Option<u64>, state: &ClusterState) -> StoreResult<u64> {
        self.check_available()?;

        let mut slot = self.record.lock();
        let actual = slot.as_ref().map(|r| r.version);
        if actual != expected {
            return Err(StoreError::Conflict { expected, actual });
        }
        Self::write(&mut slot, state)
    }

    fn replace(&self, state: &ClusterState) -> StoreResult<u64> {
        self.check_available()?;
        Self::write(&mut self.record.lock(), state)
    }
}
