//! Update session state and version identities.
//!
//! An [`UpdateSession`] is the ephemeral value that correlates a
//! downloaded package with its unpacked folder and parsed manifest. It is
//! created once the archive has been verified and parsed, passed by
//! reference through every later phase, and discarded (files and folder)
//! on completion, successful or not. Holding this as an explicit value
//! rather than orchestrator fields keeps each phase independently
//! testable.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::manifest::Manifest;
use crate::utils::fs as fsutil;

/// The locally installed version and build, as recorded by the host
/// application's version store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentVersion {
    /// Dotted version string, e.g. `2.0.0`.
    pub version: String,
    /// Monotonic build counter within the version stream.
    pub build: u64,
}

impl CurrentVersion {
    /// Create a new version identity.
    pub fn new(version: impl Into<String>, build: u64) -> Self {
        Self {
            version: version.into(),
            build,
        }
    }

    /// The manifest marker line content for this version,
    /// e.g. `##2.0.0.3015`.
    pub fn marker(&self) -> String {
        format!("##{}.{}", self.version, self.build)
    }
}

/// The release an update run is targeting, as advertised by the
/// distribution endpoint's release listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRelease {
    /// Dotted version string of the release.
    pub version: String,
    /// Build counter of the release.
    pub build: u64,
    /// Publication date of the release.
    pub date: DateTime<Utc>,
}

impl TargetRelease {
    /// Create a new target release identity.
    pub fn new(version: impl Into<String>, build: u64, date: DateTime<Utc>) -> Self {
        Self {
            version: version.into(),
            build,
            date,
        }
    }

    /// Whether this release is newer than the installed version.
    ///
    /// Compares semver when both versions parse; ties and unparseable
    /// versions fall back to the build counter. Used for logging only:
    /// re-installing the current release is allowed, the same way a forced
    /// reinstall recovers a corrupted installation.
    pub fn is_newer_than(&self, local: &CurrentVersion) -> bool {
        match (
            semver::Version::parse(&self.version),
            semver::Version::parse(&local.version),
        ) {
            (Ok(target), Ok(current)) if target != current => target > current,
            _ => self.build > local.build,
        }
    }
}

/// A release with the content checksum the distribution endpoint
/// advertised for its package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    /// Version of the release.
    pub version: String,
    /// Build counter of the release.
    pub build: u64,
    /// Publication date of the release.
    pub date: DateTime<Utc>,
    /// Lowercase hex MD5 checksum of the package contents.
    pub checksum: String,
}

/// The version identity recorded in the host's persistent store after a
/// successful update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersion {
    /// Version that is now installed.
    pub version: String,
    /// Build that is now installed.
    pub build: u64,
    /// Release date of the installed build.
    pub date: DateTime<Utc>,
}

/// A plugin version identity, for hosts that track plugin installs
/// through the same version store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginVersion {
    /// Handle identifying the plugin.
    pub handle: String,
    /// Version that is now installed.
    pub version: String,
}

/// Ephemeral state for one update attempt.
///
/// The `uid` is derived from the verified archive checksum, so repeated
/// fetches of the same package resolve to the same working folder and
/// orphaned folders from interrupted runs are recognizable and reusable.
#[derive(Debug)]
pub struct UpdateSession {
    /// Unique id correlating the archive, unpack folder, and this run.
    pub uid: String,
    /// Path of the downloaded archive.
    pub archive_path: PathBuf,
    /// Folder the archive was extracted into.
    pub unpack_dir: PathBuf,
    /// Parsed, version-filtered manifest.
    pub manifest: Manifest,
    /// Whether the manifest carries database migrations.
    pub has_migrations: bool,
}

impl UpdateSession {
    /// Assemble a session once the archive is verified and parsed.
    pub fn new(
        uid: impl Into<String>,
        archive_path: PathBuf,
        unpack_dir: PathBuf,
        manifest: Manifest,
    ) -> Self {
        let has_migrations = manifest.has_migrations();
        Self {
            uid: uid.into(),
            archive_path,
            unpack_dir,
            manifest,
            has_migrations,
        }
    }

    /// Session id for a package with no usable checksum.
    ///
    /// Normal runs derive the uid from the verified archive checksum; this
    /// generated token exists for callers assembling sessions out of band.
    pub fn generated_uid() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// Delete the session's archive and unpack folder.
    ///
    /// Called on every terminal path. Failures are reported so the caller
    /// can downgrade them to warnings; nothing here is load-bearing for
    /// the update outcome itself.
    pub async fn discard(&self) -> Result<()> {
        debug!("discarding session {} artifacts", self.uid);
        discard_artifacts(&self.archive_path, &self.unpack_dir)
    }
}

/// Remove a downloaded archive and its unpack folder, tolerating absence.
pub(crate) fn discard_artifacts(archive: &Path, unpack_dir: &Path) -> Result<()> {
    let mut first_err = None;

    for path in [archive, unpack_dir] {
        if let Err(e) = fsutil::remove_path(path) {
            warn!("failed to remove {}: {e:#}", path.display());
            if first_err.is_none() {
                first_err = Some(e);
            }
        }
    }

    match first_err {
        None => Ok(()),
        Some(e) => Err(e).context("failed to discard session artifacts"),
    }
}
