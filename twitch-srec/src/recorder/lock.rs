//! Per-channel recording lock.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::Result;
use crate::utils::fs::{ensure_dir_all_with_op, io_error};

/// Interval between lock attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Result of [`FileLockGuard::try_acquire`].
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(FileLockGuard),
    /// Someone else (another worker or process) holds the lock.
    Busy,
}

impl LockAttempt {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Exclusive advisory lock on `<recorded-dir>.lock`, released on drop.
///
/// Not reentrant: a second acquisition of the same path fails even from the
/// same task.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    /// Try to take the lock, retrying until `timeout` elapses.
    ///
    /// Contention yields [`LockAttempt::Busy`]; only a failure to create or
    /// open the lock file is an error.
    pub async fn try_acquire(path: &Path, timeout: Duration) -> Result<LockAttempt> {
        if let Some(parent) = path.parent() {
            ensure_dir_all_with_op("creating lock directory", parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| io_error("opening lock file", path, e))?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %path.display(), "Lock acquired");
                    return Ok(LockAttempt::Acquired(Self {
                        file,
                        path: path.to_path_buf(),
                    }));
                }
                Err(e) if is_contended(&e) => {}
                Err(e) => return Err(io_error("locking", path, e)),
            }

            if Instant::now() >= deadline {
                debug!(path = %path.display(), "Lock busy");
                return Ok(LockAttempt::Busy);
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), "Failed to release lock: {e}");
        } else {
            debug!(path = %self.path.display(), "Lock released");
        }
    }
}
