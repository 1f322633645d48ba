//! Cross-process advisory lock on a companion `<file>.lock`
//!
//! The lock belongs to the open file handle, so the kernel releases it when
//! the holder exits, however it exits. A lock file left on disk by a dead
//! writer is just an unlocked file.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::warn;
use votesim_cluster::{StoreError, StoreResult};

/// Exclusive lock, held for as long as the handle stays open
pub(crate) struct FileLock {
    _file: File,
}

impl FileLock {
    /// Lock `path` exclusively, retrying up to `attempts` times
    pub(crate) fn acquire(path: &Path, attempts: u32, backoff: Duration) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        for attempt in 1..=attempts {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { _file: file }),
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    if attempt < attempts {
                        thread::sleep(backoff);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(path = %path.display(), attempts, "state lock is still held");
        Err(StoreError::Unavailable(format!(
            "state is locked by another writer ({})",
            path.display()
        )))
    }
}
