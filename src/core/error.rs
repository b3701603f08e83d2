//! Error handling for the update pipeline.
//!
//! Every phase returns a typed [`UpdateError`] rather than raising through a
//! catch-all handler, so the orchestrator's recovery policy can branch on
//! error kind explicitly. Two principles shape the taxonomy:
//!
//! 1. **One variant per failure mode** so callers can match precisely on
//!    what went wrong (a checksum mismatch is not an unpack failure).
//! 2. **Batch reporting where the operator benefits**: the writability
//!    check returns *every* violation at once instead of failing on the
//!    first, so a single run surfaces all the paths that need fixing.
//!
//! Collaborator boundaries (distribution endpoint, migration runner,
//! maintenance switch) report failures as [`anyhow::Error`]; those are
//! wrapped into the matching variant with a `#[source]` chain preserved
//! for diagnostics.
//!
//! # Examples
//!
//! ```rust,no_run
//! use patchup::core::UpdateError;
//!
//! fn describe(err: &UpdateError) {
//!     match err {
//!         UpdateError::PathsNotWritable { violations } => {
//!             for v in violations {
//!                 eprintln!("  {v}");
//!             }
//!         }
//!         UpdateError::UpdateAlreadyInProgress { lock_path } => {
//!             eprintln!("another update holds {}", lock_path.display());
//!         }
//!         other => eprintln!("{other}"),
//!     }
//! }
//! ```

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single writability violation discovered during the precondition check.
///
/// The check never fails fast: the orchestrator receives the complete list
/// so the operator can fix every offending path in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathViolation {
    /// Absolute path that failed the check.
    pub path: PathBuf,
    /// Human-readable reason the path was rejected.
    pub reason: String,
}

impl fmt::Display for PathViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// The error type for all update pipeline operations.
///
/// Variants map one-to-one onto the pipeline phases that can produce them.
/// Failures raised before maintenance mode is entered leave no state to
/// undo; failures raised after it trigger the file rollback path.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Transport failure while downloading the update package.
    #[error("failed to download update {version} (build {build})")]
    DownloadFailed {
        /// Version that was being downloaded.
        version: String,
        /// Build number that was being downloaded.
        build: u64,
        /// Underlying transport error.
        #[source]
        source: anyhow::Error,
    },

    /// The downloaded package did not match the checksum advertised by the
    /// distribution endpoint, or no checksum was advertised at all.
    ///
    /// Verification fails closed: a missing expected checksum is never
    /// silently accepted.
    #[error("package validation failed for '{archive}': {reason}")]
    ValidationFailed {
        /// File name of the archive that failed validation.
        archive: String,
        /// What went wrong (mismatch details or missing checksum).
        reason: String,
    },

    /// Archive extraction did not complete.
    #[error("failed to unpack '{archive}': {reason}")]
    UnpackFailed {
        /// File name of the archive that failed to extract.
        archive: String,
        /// What went wrong (corrupt entry, disk space, unsafe path).
        reason: String,
    },

    /// No patch manifest was found at the expected location inside the
    /// unpacked archive.
    #[error("no update manifest found at {}", expected.display())]
    ManifestMissing {
        /// Path where the manifest was expected.
        expected: PathBuf,
    },

    /// A manifest line could not be decoded.
    #[error("invalid manifest line {line}: {reason}")]
    ManifestParseError {
        /// One-based line number of the offending line.
        line: usize,
        /// Why the line was rejected.
        reason: String,
    },

    /// One or more target paths failed the writability precondition.
    ///
    /// Carries the full batch of violations; nothing has been mutated when
    /// this is raised.
    #[error("{} path(s) are not writable", violations.len())]
    PathsNotWritable {
        /// Every violation discovered, in manifest order.
        violations: Vec<PathViolation>,
    },

    /// Copying a target to its `.bak` sibling failed.
    ///
    /// Backups created earlier in the same invocation have already been
    /// removed when this is raised.
    #[error("failed to back up '{}'", path.display())]
    BackupFailed {
        /// Install-root-relative path whose backup failed.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: anyhow::Error,
    },

    /// Applying a manifest entry to the live installation failed.
    #[error("failed to apply manifest entry '{}'", path.display())]
    ApplyFailed {
        /// Install-root-relative path whose application failed.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: anyhow::Error,
    },

    /// The database migration runner reported failure.
    #[error("database migration run failed")]
    MigrationFailed {
        /// Underlying migration error.
        #[source]
        source: anyhow::Error,
    },

    /// Toggling the maintenance-mode flag failed.
    #[error("maintenance mode toggle failed")]
    MaintenanceFailed {
        /// Underlying collaborator error.
        #[source]
        source: anyhow::Error,
    },

    /// Another update run already holds the process-wide lock.
    #[error("another update is already in progress (lock held at {})", lock_path.display())]
    UpdateAlreadyInProgress {
        /// Location of the contended lock file.
        lock_path: PathBuf,
    },

    /// Post-success cleanup did not fully complete.
    ///
    /// Non-fatal: the update itself already took effect. Surfaced as a
    /// warning on the final report, never as a hard failure.
    #[error("cleanup failed: {reason}")]
    CleanupFailed {
        /// What was left behind.
        reason: String,
    },

    /// IO error outside any more specific phase failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
