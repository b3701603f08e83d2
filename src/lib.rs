//! patchup - manifest-driven self-update orchestrator
//!
//! `patchup` implements the self-update core of a deployed application:
//! a multi-phase, partially-transactional upgrade procedure with
//! compensating actions on failure. One run downloads a release package,
//! verifies it, unpacks it, checks every target path is writable, takes
//! the installation offline, backs up every file it is about to touch,
//! runs database migrations, applies the manifest's file operations, and
//! cleans up. A failure at any phase after backups exist restores the
//! installation's files from their `.bak` siblings before the failure is
//! reported, and maintenance mode is cleared on every exit path.
//!
//! # Architecture overview
//!
//! ```text
//! 1. Fetch
//!    ├── Download the release archive into the work root
//!    └── Verify its MD5 against the endpoint-advertised checksum
//!
//! 2. Stage
//!    ├── Extract the archive into a checksum-derived session folder
//!    ├── Parse the line-oriented patch manifest
//!    └── Check writability of every target (full violation list)
//!
//! 3. Mutate (installation offline)
//!    ├── Back up every target to a .bak sibling
//!    ├── Run database migrations when the manifest carries any
//!    └── Apply Add/Remove operations to the installation
//!
//! 4. Finish
//!    ├── Leave maintenance mode (on every exit path)
//!    ├── Delete backups, archive, and session folder
//!    └── Record the new version, flush update-info caches
//! ```
//!
//! # Core modules
//!
//! - [`orchestrator`] - the phase state machine, update lock, and
//!   collaborator traits
//! - [`manifest`] - patch manifest parsing and version filtering
//! - [`fetch`] - package download and fail-closed checksum verification
//! - [`unpack`] - archive extraction into the session folder
//! - [`precheck`] - batch writability validation
//! - [`backup`] - `.bak` sibling creation, rollback, and disposal
//! - [`apply`] - manifest operations against the live installation
//! - [`session`] - per-attempt state and version identities
//!
//! # Safety model
//!
//! Every phase returns a typed [`UpdateError`]; the orchestrator's
//! recovery policy is an explicit phase table
//! ([`orchestrator::recovery_for`]). Callers can distinguish three
//! outcomes: the update never started (nothing changed), it failed and
//! the files were rolled back, or it succeeded with optional cleanup
//! warnings. There is no silent failure mode.
//!
//! A process-wide advisory file lock enforces at most one update in
//! progress at a time; concurrent attempts fail immediately with
//! [`UpdateError::UpdateAlreadyInProgress`] rather than queueing.
//!
//! # Example
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use patchup::fetch::HttpDistributionClient;
//! use patchup::{CurrentVersion, TargetRelease, Updater, UpdaterConfig};
//!
//! # async fn example(host: impl patchup::orchestrator::MigrationRunner
//! #     + patchup::orchestrator::DatabaseServices
//! #     + patchup::orchestrator::VersionStore
//! #     + patchup::orchestrator::UpdateInfoCache
//! #     + patchup::orchestrator::MaintenanceSwitch) -> anyhow::Result<()> {
//! let updater = Updater::new(
//!     UpdaterConfig::new("/srv/app", "/srv/app/storage/updates"),
//!     HttpDistributionClient::new("https://releases.example.com"),
//!     host,
//! );
//!
//! let report = updater
//!     .run(&TargetRelease::new("2.0.0", 3015, Utc::now()), &CurrentVersion::new("1.9.0", 2800))
//!     .await?;
//! println!("now running {} (build {})", report.installed.version, report.installed.build);
//! # Ok(())
//! # }
//! ```

pub mod apply;
pub mod backup;
pub mod constants;
pub mod core;
pub mod fetch;
pub mod manifest;
pub mod orchestrator;
pub mod precheck;
pub mod session;
pub mod unpack;
pub mod utils;

pub use crate::core::{PathViolation, UpdateError};
pub use crate::manifest::{Manifest, ManifestAction, ManifestEntry};
pub use crate::orchestrator::{
    Recovery, UpdateFailure, UpdatePhase, UpdateReport, Updater, UpdaterConfig,
};
pub use crate::session::{
    CurrentVersion, InstalledVersion, PluginVersion, TargetRelease, UpdateSession,
};
