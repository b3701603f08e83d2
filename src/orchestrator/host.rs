//! Collaborator interfaces the orchestrator drives.
//!
//! The update core mutates files; everything else it needs from the host
//! application comes in through these traits. One host type usually
//! implements all of them, backed by whatever the application already has
//! for migrations, caching, and its maintenance flag. Implementations
//! report failures as [`anyhow::Error`]; the orchestrator wraps them into
//! typed update errors.

use std::path::PathBuf;

use anyhow::Result;

use crate::session::{InstalledVersion, PluginVersion};

/// Runs pending database migrations.
#[allow(async_fn_in_trait)]
pub trait MigrationRunner {
    /// Apply all pending migrations.
    ///
    /// `plugin` scopes the run to one plugin's migration track; `None`
    /// runs the application's own track, which is what an application
    /// update uses.
    ///
    /// Returns `Ok(true)` when every migration applied, `Ok(false)` when
    /// the runner completed but reported failure.
    async fn run_to_top(&self, plugin: Option<&str>) -> Result<bool>;
}

/// Database-level services consumed around migrations.
#[allow(async_fn_in_trait)]
pub trait DatabaseServices {
    /// Version string of the connected database server.
    fn server_version(&self) -> String;

    /// Produce a database backup before migrations run.
    ///
    /// Returns the backup's path, or `None` if the layer has backups
    /// disabled.
    async fn backup(&self) -> Result<Option<PathBuf>>;
}

/// Persistent record of installed versions.
#[allow(async_fn_in_trait)]
pub trait VersionStore {
    /// Record the application version that is now installed.
    async fn set_installed(&self, installed: &InstalledVersion) -> Result<()>;

    /// Record a plugin version that is now installed.
    ///
    /// Used by hosts that drive plugin updates through the same
    /// collaborators; an application update only records its own version.
    async fn set_plugin_installed(&self, plugin: &PluginVersion) -> Result<()>;
}

/// Cache of "an update is available" information shown to operators.
#[allow(async_fn_in_trait)]
pub trait UpdateInfoCache {
    /// Drop any cached update-availability info; it is stale once an
    /// update has been applied.
    async fn flush(&self) -> Result<()>;
}

/// The process-wide maintenance-mode flag.
///
/// Set before any destructive phase and cleared on every exit path; the
/// orchestrator treats the flag as a critical section and is its only
/// writer during an update.
#[allow(async_fn_in_trait)]
pub trait MaintenanceSwitch {
    /// Take the installation offline to end users.
    async fn enable(&self) -> Result<()>;

    /// Bring the installation back online.
    async fn disable(&self) -> Result<()>;
}
