//! Configuration for update orchestration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Settings controlling how an [`Updater`](super::Updater) run behaves.
///
/// The defaults prioritize safety: the database is backed up before
/// migrations run, and lock metadata older than a day is called out as
/// stale. Package checksum verification has no off switch; an unverified
/// package is never applied.
///
/// # TOML example
///
/// ```toml
/// install_root = "/srv/app"
/// work_root = "/srv/app/storage/updates"
/// backup_database = true
/// stale_lock_secs = 86400
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Root of the live installation the manifest paths resolve against.
    pub install_root: PathBuf,

    /// Staging directory for downloads, unpack folders, and the update
    /// lock. Created on first use.
    pub work_root: PathBuf,

    /// Whether to ask the database layer for a backup before running
    /// migrations. Only consulted for migration-bearing manifests.
    #[serde(default = "default_backup_database")]
    pub backup_database: bool,

    /// Age in seconds after which leftover lock metadata is reported as
    /// stale when a new run acquires the lock.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

fn default_backup_database() -> bool {
    true
}

const fn default_stale_lock_secs() -> u64 {
    86_400
}

impl UpdaterConfig {
    /// Create a configuration with default safety settings.
    pub fn new(install_root: impl Into<PathBuf>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            work_root: work_root.into(),
            backup_database: default_backup_database(),
            stale_lock_secs: default_stale_lock_secs(),
        }
    }

    /// Load a configuration from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }
}
