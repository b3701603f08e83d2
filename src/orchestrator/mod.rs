//! The update orchestrator.
//!
//! [`Updater`] sequences the whole pipeline as an explicit state machine:
//!
//! ```text
//! Idle → Downloading → Validating → Unpacking → CheckingWritable
//!      → MaintenanceOn → BackingUp → (MigratingDb) → ApplyingFiles
//!      → MaintenanceOff → CleaningUp → Done
//! ```
//!
//! A terminal failure is reachable from every non-terminal state. What a
//! failure costs depends on where it happens, and that policy is data,
//! not buried control flow: [`recovery_for`] maps each phase to the
//! compensation the orchestrator performs before reporting.
//!
//! - Failures up to and including `CheckingWritable` mutate nothing; at
//!   worst the session's staging artifacts are deleted.
//! - Failures after `MaintenanceOn` roll the installation's files back
//!   from their `.bak` siblings, then always leave maintenance mode.
//!   Rollback failures are logged but never mask the original error.
//! - Once maintenance mode has been entered, every exit path goes through
//!   `MaintenanceOff` before terminating. The installation is never left
//!   offline indefinitely.
//!
//! Migration-bearing manifests run the database migrations before the
//! file phase, so new code never lands ahead of the schema it assumes.
//!
//! There are no automatic retries. A failed update is re-invoked from the
//! top; recovery is full-rollback-then-retry, not incremental resumption.
//!
//! # Examples
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use patchup::fetch::HttpDistributionClient;
//! use patchup::orchestrator::{Updater, UpdaterConfig};
//! use patchup::session::{CurrentVersion, TargetRelease};
//!
//! # async fn example(host: impl patchup::orchestrator::MigrationRunner
//! #     + patchup::orchestrator::DatabaseServices
//! #     + patchup::orchestrator::VersionStore
//! #     + patchup::orchestrator::UpdateInfoCache
//! #     + patchup::orchestrator::MaintenanceSwitch) -> anyhow::Result<()> {
//! let config = UpdaterConfig::new("/srv/app", "/srv/app/storage/updates");
//! let dist = HttpDistributionClient::new("https://releases.example.com");
//! let updater = Updater::new(config, dist, host);
//!
//! let local = CurrentVersion::new("1.9.0", 2800);
//! let target = TargetRelease::new("2.0.0", 3015, Utc::now());
//!
//! match updater.run(&target, &local).await {
//!     Ok(report) => {
//!         println!("updated to {}", report.installed.version);
//!         for warning in &report.warnings {
//!             eprintln!("warning: {warning}");
//!         }
//!     }
//!     Err(failure) if failure.rolled_back => {
//!         eprintln!("update failed and was rolled back: {}", failure.error);
//!     }
//!     Err(failure) => {
//!         eprintln!("update did not start: {}", failure.error);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::apply::FileApplier;
use crate::backup::BackupManager;
use crate::core::UpdateError;
use crate::fetch::{DistributionClient, PackageFetcher};
use crate::manifest::Manifest;
use crate::session::{self, CurrentVersion, InstalledVersion, TargetRelease, UpdateSession};
use crate::{precheck, unpack};

pub mod config;
pub mod host;
pub mod lock;


pub use config::UpdaterConfig;
pub use host::{
    DatabaseServices, MaintenanceSwitch, MigrationRunner, UpdateInfoCache, VersionStore,
};
pub use lock::{LockMetadata, UpdateLock};

/// Phases of one update run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    /// Nothing started yet; the lock is acquired here.
    Idle,
    /// Downloading the release package.
    Downloading,
    /// Verifying the package checksum.
    Validating,
    /// Extracting the package into the session folder.
    Unpacking,
    /// Loading the manifest and checking every target is writable.
    CheckingWritable,
    /// Taking the installation offline.
    MaintenanceOn,
    /// Copying targets to their `.bak` siblings.
    BackingUp,
    /// Running database migrations.
    MigratingDb,
    /// Applying manifest operations to the installation.
    ApplyingFiles,
    /// Bringing the installation back online.
    MaintenanceOff,
    /// Removing backups, session artifacts, and stale caches.
    CleaningUp,
    /// Terminal success.
    Done,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Downloading => "Downloading",
            Self::Validating => "Validating",
            Self::Unpacking => "Unpacking",
            Self::CheckingWritable => "CheckingWritable",
            Self::MaintenanceOn => "MaintenanceOn",
            Self::BackingUp => "BackingUp",
            Self::MigratingDb => "MigratingDb",
            Self::ApplyingFiles => "ApplyingFiles",
            Self::MaintenanceOff => "MaintenanceOff",
            Self::CleaningUp => "CleaningUp",
            Self::Done => "Done",
        };
        f.write_str(name)
    }
}

/// Compensation performed when a phase fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Report the failure; there is nothing on disk to undo.
    Report,
    /// Delete the session's staging artifacts (archive, unpack folder).
    DiscardSession,
    /// Restore installation files from backups, then discard the session.
    RollbackFiles,
}

/// The phase → recovery policy table.
///
/// This is the single place that decides which failures trigger a file
/// rollback.
pub const fn recovery_for(phase: UpdatePhase) -> Recovery {
    match phase {
        UpdatePhase::Idle | UpdatePhase::Downloading | UpdatePhase::Validating => Recovery::Report,
        UpdatePhase::Unpacking | UpdatePhase::CheckingWritable | UpdatePhase::MaintenanceOn => {
            Recovery::DiscardSession
        }
        UpdatePhase::BackingUp | UpdatePhase::MigratingDb | UpdatePhase::ApplyingFiles => {
            Recovery::RollbackFiles
        }
        UpdatePhase::MaintenanceOff | UpdatePhase::CleaningUp | UpdatePhase::Done => {
            Recovery::Report
        }
    }
}

/// Outcome of a successful update run.
#[derive(Debug)]
pub struct UpdateReport {
    /// Session uid of the run.
    pub uid: String,
    /// Version now recorded as installed.
    pub installed: InstalledVersion,
    /// Non-fatal problems from the cleanup phase. The update itself took
    /// effect; these describe what was left behind.
    pub warnings: Vec<String>,
}

/// A failed update run.
///
/// `rolled_back` distinguishes "the update did not start" (no state
/// changed) from "the update failed and the installation's files were
/// restored".
#[derive(Debug, Error)]
#[error("update failed during {phase}")]
pub struct UpdateFailure {
    /// Phase that failed.
    pub phase: UpdatePhase,
    /// The failure itself.
    #[source]
    pub error: UpdateError,
    /// Whether installation files were restored from backups.
    pub rolled_back: bool,
}

impl UpdateFailure {
    fn not_started(phase: UpdatePhase, error: UpdateError) -> Self {
        Self {
            phase,
            error,
            rolled_back: false,
        }
    }
}

/// Drives one update attempt through every phase.
///
/// Generic over the distribution client and the host services; both are
/// supplied by the embedding application. A single `run` call owns the
/// whole attempt, from lock acquisition to terminal state.
pub struct Updater<C, H> {
    config: UpdaterConfig,
    dist: C,
    host: H,
}

impl<C, H> Updater<C, H>
where
    C: DistributionClient,
    H: MigrationRunner + DatabaseServices + VersionStore + UpdateInfoCache + MaintenanceSwitch,
{
    /// Create an updater with the given configuration and collaborators.
    pub fn new(config: UpdaterConfig, dist: C, host: H) -> Self {
        Self { config, dist, host }
    }

    /// The active configuration.
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// The host services this updater drives.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Run one complete update attempt.
    ///
    /// Acquires the process-wide update lock, then walks the phases in
    /// order. The lock is held until this method returns.
    ///
    /// # Errors
    ///
    /// [`UpdateFailure`] identifying the failed phase, the underlying
    /// [`UpdateError`], and whether a file rollback was performed.
    pub async fn run(
        &self,
        target: &TargetRelease,
        local: &CurrentVersion,
    ) -> Result<UpdateReport, UpdateFailure> {
        let _lock = UpdateLock::acquire(
            &self.config.work_root,
            &target.version,
            Duration::from_secs(self.config.stale_lock_secs),
        )
        .await
        .map_err(|e| UpdateFailure::not_started(UpdatePhase::Idle, e))?;

        info!(
            "starting update {} (build {}) over {} (build {})",
            target.version, target.build, local.version, local.build
        );
        debug!("database server {}", self.host.server_version());
        if !target.is_newer_than(local) {
            warn!(
                "target {} (build {}) is not newer than the installed version; reinstalling",
                target.version, target.build
            );
        }

        // Downloading / Validating
        let fetcher = PackageFetcher::new(&self.dist, &self.config.work_root);
        let package = fetcher.fetch(target).await.map_err(|e| {
            let phase = match &e {
                UpdateError::ValidationFailed { .. } => UpdatePhase::Validating,
                _ => UpdatePhase::Downloading,
            };
            error!("update failed during {phase}: {e}");
            UpdateFailure::not_started(phase, e)
        })?;

        // Unpacking
        let unpack_dir = self.config.work_root.join(&package.uid);
        if let Err(e) = unpack::unpack_archive(&package.archive_path, &unpack_dir).await {
            return Err(self.fail_before_maintenance(
                UpdatePhase::Unpacking,
                e,
                &package.archive_path,
                &unpack_dir,
            ));
        }

        // Manifest load is part of the precondition stage: nothing has
        // been mutated yet and the session artifacts are simply dropped.
        let manifest = match Manifest::load(&unpack_dir, local).await {
            Ok(manifest) => manifest,
            Err(e) => {
                return Err(self.fail_before_maintenance(
                    UpdatePhase::CheckingWritable,
                    e,
                    &package.archive_path,
                    &unpack_dir,
                ));
            }
        };
        let session = UpdateSession::new(
            package.uid.clone(),
            package.archive_path.clone(),
            unpack_dir,
            manifest,
        );
        info!(
            "session {}: {} manifest entries, migrations: {}",
            session.uid,
            session.manifest.len(),
            session.has_migrations
        );

        // CheckingWritable
        let violations =
            precheck::check_writable(session.manifest.entries(), &self.config.install_root);
        if !violations.is_empty() {
            return Err(self.fail_before_maintenance(
                UpdatePhase::CheckingWritable,
                UpdateError::PathsNotWritable { violations },
                &session.archive_path,
                &session.unpack_dir,
            ));
        }

        // MaintenanceOn
        if let Err(e) = self.host.enable().await {
            return Err(self.fail_before_maintenance(
                UpdatePhase::MaintenanceOn,
                UpdateError::MaintenanceFailed { source: e },
                &session.archive_path,
                &session.unpack_dir,
            ));
        }
        info!("maintenance mode enabled");

        let backup_mgr = BackupManager::new(self.config.install_root.clone());

        // BackingUp
        if let Err(e) = backup_mgr.backup(session.manifest.entries()).await {
            return Err(self
                .fail_after_maintenance(UpdatePhase::BackingUp, e, &backup_mgr, &session)
                .await);
        }

        // MigratingDb
        if session.has_migrations {
            if let Err(e) = self.migrate_database().await {
                return Err(self
                    .fail_after_maintenance(UpdatePhase::MigratingDb, e, &backup_mgr, &session)
                    .await);
            }
        } else {
            debug!("no migrations in manifest, skipping database phase");
        }

        // ApplyingFiles
        let applier =
            FileApplier::new(session.unpack_dir.clone(), self.config.install_root.clone());
        if let Err(e) = applier.apply(session.manifest.entries()).await {
            return Err(self
                .fail_after_maintenance(UpdatePhase::ApplyingFiles, e, &backup_mgr, &session)
                .await);
        }

        // MaintenanceOff
        let mut warnings = Vec::new();
        match self.host.disable().await {
            Ok(()) => info!("maintenance mode disabled"),
            Err(e) => {
                // The installation stays offline until an operator clears
                // the flag by hand.
                error!("failed to leave maintenance mode: {e:#}");
                warnings.push(format!("maintenance mode could not be disabled: {e:#}"));
            }
        }

        // CleaningUp
        self.clean_up(&backup_mgr, &session, &mut warnings).await;

        let installed = InstalledVersion {
            version: target.version.clone(),
            build: target.build,
            date: target.date,
        };
        if let Err(e) = self.host.set_installed(&installed).await {
            warn!("failed to record installed version: {e:#}");
            warnings.push(format!("installed version was not recorded: {e:#}"));
        }
        if let Err(e) = self.host.flush().await {
            warn!("failed to flush update-info cache: {e:#}");
            warnings.push(format!("update-info cache was not flushed: {e:#}"));
        }

        info!(
            "update to {} (build {}) complete with {} warning(s)",
            installed.version,
            installed.build,
            warnings.len()
        );
        Ok(UpdateReport {
            uid: session.uid.clone(),
            installed,
            warnings,
        })
    }

    /// Back up the database if configured, then run migrations to top.
    async fn migrate_database(&self) -> Result<(), UpdateError> {
        if self.config.backup_database {
            match self.host.backup().await {
                Ok(Some(path)) => info!("database backed up to {}", path.display()),
                Ok(None) => warn!("database layer produced no backup"),
                Err(e) => {
                    return Err(UpdateError::MigrationFailed {
                        source: e.context("database backup failed"),
                    });
                }
            }
        }

        match self.host.run_to_top(None).await {
            Ok(true) => {
                info!("database migrations applied");
                Ok(())
            }
            Ok(false) => Err(UpdateError::MigrationFailed {
                source: anyhow::anyhow!("migration runner reported failure"),
            }),
            Err(e) => Err(UpdateError::MigrationFailed { source: e }),
        }
    }

    /// Compensate for a failure before maintenance mode was entered.
    ///
    /// Nothing in the installation has been mutated; per the recovery
    /// table, at most the staging artifacts are deleted.
    fn fail_before_maintenance(
        &self,
        phase: UpdatePhase,
        error: UpdateError,
        archive: &std::path::Path,
        unpack_dir: &std::path::Path,
    ) -> UpdateFailure {
        error!("update failed during {phase}: {error}");
        if recovery_for(phase) == Recovery::DiscardSession {
            if let Err(e) = session::discard_artifacts(archive, unpack_dir) {
                warn!("failed to discard session artifacts: {e:#}");
            }
        }
        UpdateFailure::not_started(phase, error)
    }

    /// Compensate for a failure after maintenance mode was entered.
    ///
    /// Rolls installation files back from their backups where the
    /// recovery table says so, then always leaves maintenance mode, then
    /// discards the session. The original error is what gets reported;
    /// compensation failures are logged only.
    async fn fail_after_maintenance(
        &self,
        phase: UpdatePhase,
        error: UpdateError,
        backup_mgr: &BackupManager,
        session: &UpdateSession,
    ) -> UpdateFailure {
        error!("update failed during {phase}: {error}");

        let mut rolled_back = false;
        if recovery_for(phase) == Recovery::RollbackFiles {
            match backup_mgr.rollback(session.manifest.entries()).await {
                Ok(()) => {
                    info!("installation files restored from backups");
                    rolled_back = true;
                }
                Err(e) => error!("file rollback failed: {e:#}"),
            }
        }

        match self.host.disable().await {
            Ok(()) => info!("maintenance mode disabled"),
            Err(e) => error!("failed to leave maintenance mode after failure: {e:#}"),
        }

        if let Err(e) = session.discard().await {
            warn!("failed to discard session artifacts: {e:#}");
        }

        UpdateFailure {
            phase,
            error,
            rolled_back,
        }
    }

    /// Post-success cleanup. Failures here are warnings, never errors:
    /// the update already took effect.
    async fn clean_up(
        &self,
        backup_mgr: &BackupManager,
        session: &UpdateSession,
        warnings: &mut Vec<String>,
    ) {
        if let Err(e) = backup_mgr.cleanup_backups(session.manifest.entries()).await {
            let cleanup = UpdateError::CleanupFailed {
                reason: format!("backup files were left behind: {e:#}"),
            };
            warn!("{cleanup}");
            warnings.push(cleanup.to_string());
        }

        if let Err(e) = session.discard().await {
            let cleanup = UpdateError::CleanupFailed {
                reason: format!("session artifacts were left behind: {e:#}"),
            };
            warn!("{cleanup}");
            warnings.push(cleanup.to_string());
        }
    }
}
