//! Application of manifest operations to the live installation.
//!
//! `FileApplier` walks the manifest in order and performs each entry's
//! operation: `Add` copies the path from the unpacked payload into the
//! install root, `Remove` deletes it from the install root. Folder
//! entries apply recursively. Migration entries are never touched here;
//! they belong to the migration runner.
//!
//! The applier only ever runs after the backup manager has captured every
//! target it is about to overwrite or delete, so a failure partway
//! through the manifest is recoverable by rollback.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::UpdateError;
use crate::manifest::{ManifestAction, ManifestEntry};
use crate::utils::fs as fsutil;

/// Applies manifest entries from an unpacked payload to an install root.
pub struct FileApplier {
    unpacked_root: PathBuf,
    install_root: PathBuf,
}

impl FileApplier {
    /// Create an applier copying from `unpacked_root` into `install_root`.
    pub fn new(unpacked_root: PathBuf, install_root: PathBuf) -> Self {
        Self {
            unpacked_root,
            install_root,
        }
    }

    /// Apply every non-migration entry, in manifest order.
    ///
    /// Removing an already-absent path is a no-op; an `Add` whose source
    /// is missing from the payload is an error.
    ///
    /// # Errors
    ///
    /// [`UpdateError::ApplyFailed`] on the first unrecoverable filesystem
    /// error, identifying the entry that failed. The orchestrator's
    /// response is a rollback from the backups taken beforehand.
    pub async fn apply(&self, entries: &[ManifestEntry]) -> Result<(), UpdateError> {
        let mut applied = 0usize;

        for entry in entries.iter().filter(|e| !e.is_migration) {
            self.apply_entry(entry).map_err(|e| UpdateError::ApplyFailed {
                path: entry.path.clone(),
                source: e,
            })?;
            applied += 1;
        }

        info!("applied {applied} manifest entries");
        Ok(())
    }

    fn apply_entry(&self, entry: &ManifestEntry) -> Result<()> {
        let target = self.install_root.join(&entry.path);

        match entry.action {
            ManifestAction::Add => {
                let source = self.unpacked_root.join(&entry.path);
                if !source.exists() {
                    anyhow::bail!("payload is missing source path: {}", source.display());
                }

                debug!("adding {}", entry.path.display());
                let copied = if entry.is_folder {
                    fsutil::copy_dir(&source, &target)
                } else {
                    fsutil::remove_path(&target)?;
                    fsutil::copy_path(&source, &target)
                };
                copied.with_context(|| format!("failed to install {}", entry.path.display()))
            }
            ManifestAction::Remove => {
                if target.exists() {
                    debug!("removing {}", entry.path.display());
                    fsutil::remove_path(&target)
                        .with_context(|| format!("failed to remove {}", entry.path.display()))
                } else {
                    debug!("remove target already absent: {}", entry.path.display());
                    Ok(())
                }
            }
        }
    }
}
