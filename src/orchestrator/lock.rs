//! Process-wide update lock.
//!
//! At most one update may be in progress at a time, process-wide and
//! machine-wide. The lock is an OS advisory file lock under the work
//! root: a second acquisition attempt fails immediately rather than
//! queueing, and the kernel releases the lock if the holding process
//! dies, so a crashed run can never block future updates.
//!
//! The lock file's contents are JSON metadata (pid, acquisition time,
//! target version) written by the holder. The metadata is diagnostic
//! only: when a new run acquires the lock over metadata older than the
//! configured threshold, that earlier run crashed without cleaning up,
//! and the fact is logged loudly before the metadata is overwritten.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::LOCK_FILE_NAME;
use crate::core::UpdateError;
use crate::utils::fs as fsutil;

/// Metadata the lock holder records in the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMetadata {
    /// Process id of the holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// Version the holding run is updating to.
    pub target_version: String,
}

/// An exclusive lock over the update pipeline.
///
/// Held for the entire run, from before the download until the terminal
/// state. Released on drop.
#[derive(Debug)]
pub struct UpdateLock {
    _file: File,
    path: PathBuf,
}

impl UpdateLock {
    /// Acquire the update lock under `work_root`.
    ///
    /// Fails immediately with [`UpdateError::UpdateAlreadyInProgress`] if
    /// another process (or another task in this process) holds it;
    /// concurrent invocations are rejected, not queued.
    pub async fn acquire(
        work_root: &Path,
        target_version: &str,
        stale_after: Duration,
    ) -> Result<Self, UpdateError> {
        fsutil::ensure_dir(work_root).map_err(UpdateError::from_anyhow_io)?;
        let lock_path = work_root.join(LOCK_FILE_NAME);

        let path_for_task = lock_path.clone();
        let target_version = target_version.to_string();

        // File locking is blocking; keep it off the async runtime.
        let file = tokio::task::spawn_blocking(move || -> Result<File, UpdateError> {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path_for_task)?;

            match file.try_lock_exclusive() {
                Ok(true) => {}
                Ok(false) => {
                    return Err(UpdateError::UpdateAlreadyInProgress {
                        lock_path: path_for_task,
                    });
                }
                Err(e) => return Err(UpdateError::Io(e)),
            }

            // We own the lock. Anything already in the file is metadata
            // from a run that died without releasing cleanly.
            let mut previous = String::new();
            file.read_to_string(&mut previous).ok();
            if let Ok(stale) = serde_json::from_str::<LockMetadata>(&previous) {
                let age = Utc::now() - stale.acquired_at;
                if age.to_std().unwrap_or_default() > stale_after {
                    warn!(
                        "stale update lock metadata found (pid {}, acquired {}, targeting {}); \
                         the previous run appears to have crashed",
                        stale.pid, stale.acquired_at, stale.target_version
                    );
                } else {
                    debug!("reclaiming lock metadata from pid {}", stale.pid);
                }
            }

            let metadata = LockMetadata {
                pid: std::process::id(),
                acquired_at: Utc::now(),
                target_version,
            };
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            let json = serde_json::to_string_pretty(&metadata)
                .expect("lock metadata serializes to json");
            file.write_all(json.as_bytes())?;
            file.flush()?;

            Ok(file)
        })
        .await
        .map_err(|e| UpdateError::Io(std::io::Error::other(e)))??;

        debug!("acquired update lock at {}", lock_path.display());
        Ok(Self {
            _file: file,
            path: lock_path,
        })
    }

    /// Location of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the metadata currently recorded in a lock file, if any.
    pub fn read_metadata(work_root: &Path) -> Option<LockMetadata> {
        let content = std::fs::read_to_string(work_root.join(LOCK_FILE_NAME)).ok()?;
        serde_json::from_str(&content).ok()
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        // The OS releases the lock when the handle closes; unlock
        // explicitly for clarity.
        #[allow(unstable_name_collisions)]
        if let Err(e) = self._file.unlock() {
            warn!("failed to unlock {}: {e}", self.path.display());
        }
    }
}

impl UpdateError {
    fn from_anyhow_io(e: anyhow::Error) -> Self {
        match e.downcast::<std::io::Error>() {
            Ok(io) => UpdateError::Io(io),
            Err(other) => UpdateError::Io(std::io::Error::other(other.to_string())),
        }
    }
}
