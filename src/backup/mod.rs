//! Backup and restore of installation files around an update.
//!
//! `BackupManager` protects the live installation against failed updates.
//! Before any mutation, every manifest target that exists is copied to a
//! `.bak` sibling; a failure in any later phase restores those siblings
//! over their mutated counterparts, and a confirmed-successful update
//! deletes them.
//!
//! # Backup strategy
//!
//! Backups live next to their originals with a `.bak` suffix. This keeps
//! them on the same filesystem and in the same permission context as the
//! original, so restoration is a plain rename with no cross-device
//! complications.
//!
//! # Invariants
//!
//! - Backups are taken before any mutation and before database migrations
//!   run, so a failure at any later phase can restore the file state.
//! - `backup` is atomic per invocation: if one copy fails partway, the
//!   siblings already created in that call are removed before the error
//!   is returned.
//! - Entries slated for `Remove` are backed up too; without that, a
//!   failure later in the manifest could not restore an already-deleted
//!   file.
//! - Migrations are forward-only and are not undone here; only file state
//!   is restorable.
//!
//! # Examples
//!
//! ```rust,no_run
//! use patchup::backup::BackupManager;
//! use patchup::manifest::ManifestEntry;
//! use std::path::PathBuf;
//!
//! # async fn example(entries: &[ManifestEntry]) -> anyhow::Result<()> {
//! let manager = BackupManager::new(PathBuf::from("/srv/app"));
//!
//! manager.backup(entries).await?;
//!
//! // ... migrations and file application ...
//!
//! let update_failed = false;
//! if update_failed {
//!     manager.rollback(entries).await?;
//! } else {
//!     manager.cleanup_backups(entries).await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::constants::BACKUP_SUFFIX;
use crate::core::UpdateError;
use crate::manifest::ManifestEntry;
use crate::utils::fs as fsutil;

/// Creates, restores, and disposes of `.bak` siblings for manifest
/// targets under one install root.
pub struct BackupManager {
    install_root: PathBuf,
}

impl BackupManager {
    /// Create a manager rooted at the installation directory.
    pub fn new(install_root: PathBuf) -> Self {
        Self { install_root }
    }

    /// The `.bak` sibling path for an install-root-relative entry path.
    pub fn backup_path_for(&self, entry_path: &Path) -> PathBuf {
        fsutil::append_suffix(&self.install_root.join(entry_path), BACKUP_SUFFIX)
    }

    /// Copy every existing, non-migration target to its `.bak` sibling.
    ///
    /// Folders are copied recursively. Targets that do not exist yet have
    /// nothing to preserve and are skipped.
    ///
    /// # Errors
    ///
    /// [`UpdateError::BackupFailed`] if any copy fails. Backups already
    /// created by this call are removed first, so a failed invocation
    /// leaves no partial `.bak` set behind.
    pub async fn backup(&self, entries: &[ManifestEntry]) -> Result<(), UpdateError> {
        let mut created: Vec<PathBuf> = Vec::new();

        for entry in entries.iter().filter(|e| !e.is_migration) {
            let target = self.install_root.join(&entry.path);
            if !target.exists() {
                debug!("nothing to back up for {}", entry.path.display());
                continue;
            }

            let backup = self.backup_path_for(&entry.path);
            if let Err(e) = Self::copy_to_backup(&target, &backup) {
                warn!("backup of {} failed, removing {} partial backup(s)", target.display(), created.len());
                for stale in &created {
                    if let Err(cleanup) = fsutil::remove_path(stale) {
                        warn!("failed to remove partial backup {}: {cleanup:#}", stale.display());
                    }
                }
                return Err(UpdateError::BackupFailed {
                    path: entry.path.clone(),
                    source: e,
                });
            }
            created.push(backup);
        }

        info!("backed up {} path(s)", created.len());
        Ok(())
    }

    fn copy_to_backup(target: &Path, backup: &Path) -> Result<()> {
        // Replace any backup left over from an earlier run.
        fsutil::remove_path(backup)?;
        fsutil::copy_path(target, backup)
            .with_context(|| format!("failed to copy {} to {}", target.display(), backup.display()))
    }

    /// Restore every `.bak` sibling over its current counterpart.
    ///
    /// Each restore removes the (possibly mutated) target and renames the
    /// backup into its place, consuming the backup. Entries without a
    /// backup are skipped, so the call is idempotent and safe after a
    /// partial `backup` or a partial earlier `rollback`.
    pub async fn rollback(&self, entries: &[ManifestEntry]) -> Result<()> {
        let mut restored = 0usize;
        let mut first_err: Option<anyhow::Error> = None;

        for entry in entries.iter().filter(|e| !e.is_migration) {
            let backup = self.backup_path_for(&entry.path);
            if !backup.exists() {
                continue;
            }

            let target = self.install_root.join(&entry.path);
            let result = fsutil::remove_path(&target).and_then(|()| {
                std::fs::rename(&backup, &target).with_context(|| {
                    format!("failed to restore {} from {}", target.display(), backup.display())
                })
            });

            match result {
                Ok(()) => restored += 1,
                Err(e) => {
                    // Keep restoring the rest; report the first failure.
                    warn!("failed to restore {}: {e:#}", target.display());
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        info!("rolled back {restored} path(s)");
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Delete all remaining `.bak` siblings after a confirmed success.
    ///
    /// Only called once the file applier and the migration runner have
    /// both reported success.
    pub async fn cleanup_backups(&self, entries: &[ManifestEntry]) -> Result<()> {
        let mut first_err: Option<anyhow::Error> = None;

        for entry in entries.iter().filter(|e| !e.is_migration) {
            let backup = self.backup_path_for(&entry.path);
            if !backup.exists() {
                continue;
            }
            debug!("removing backup {}", backup.display());
            if let Err(e) = fsutil::remove_path(&backup) {
                warn!("failed to remove backup {}: {e:#}", backup.display());
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}
