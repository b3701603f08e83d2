//! Patch manifest parsing.
//!
//! An update archive carries a line-oriented manifest describing the file
//! and folder operations that turn one installed version into another.
//! Each line is `<path>;<action>`:
//!
//! ```text
//! ##2.0.0.3015
//! plugins/foo/Foo.php;Add
//! config/old.php;Remove
//! templates/;Add
//! migrations/m200101_alter_sessions.php;Add
//! ```
//!
//! Three line shapes exist beyond plain file operations:
//!
//! - **Version markers** (`##<version>.<build>`) demarcate the start of a
//!   release's change entries. They are never operations and never appear
//!   in the parsed entry list.
//! - **Folder entries** use a trailing `/` on the path. The marker is
//!   stripped here, once, and recorded as [`ManifestEntry::is_folder`];
//!   downstream consumers never re-parse path strings.
//! - **Migration entries** live under the migrations directory. They are
//!   flagged so the orchestrator knows to invoke the migration runner, and
//!   the file applier and backup manager skip them.
//!
//! Archives are cumulative: they may carry the full historical changelog.
//! Parsing therefore filters to the entries at-or-after the locally
//! installed version marker, which makes repeated parses of the same
//! content idempotent regardless of how many releases the archive spans.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::constants::{
    MANIFEST_FIELD_SEPARATOR, MANIFEST_FILE_NAME, MIGRATIONS_DIR, VERSION_MARKER_PREFIX,
};
use crate::core::UpdateError;
use crate::session::CurrentVersion;


/// Pattern for a version marker line: `##` followed by a dotted version
/// and a trailing build number.
static VERSION_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^##\d+(?:\.\d+)+$").expect("version marker pattern is valid"));

/// The operation a manifest entry performs against the installation.
///
/// Decoded once at parse time from the line's action token; consumers
/// never see the raw string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestAction {
    /// Copy the path from the unpacked payload into the installation,
    /// overwriting any existing target.
    Add,
    /// Delete the path from the installation if present.
    Remove,
}

/// One decoded manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Install-root-relative path, folder marker already stripped.
    pub path: PathBuf,
    /// What to do with the path.
    pub action: ManifestAction,
    /// Whether the path denotes a folder (operations apply recursively).
    pub is_folder: bool,
    /// Whether the path lives under the migrations directory.
    pub is_migration: bool,
}

/// An ordered, version-filtered sequence of [`ManifestEntry`] values.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Load and parse the manifest from an unpacked archive root.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::ManifestMissing`] if no manifest file exists
    /// at the expected location, or [`UpdateError::ManifestParseError`]
    /// for an undecodable line.
    pub async fn load(unpacked_root: &Path, local: &CurrentVersion) -> Result<Self, UpdateError> {
        let manifest_path = unpacked_root.join(MANIFEST_FILE_NAME);
        if !manifest_path.exists() {
            return Err(UpdateError::ManifestMissing {
                expected: manifest_path,
            });
        }

        let content = tokio::fs::read_to_string(&manifest_path).await?;
        Self::parse(&content, local)
    }

    /// Parse manifest content, keeping only entries at-or-after the local
    /// version marker.
    ///
    /// If the local marker never appears, every entry is kept: the archive
    /// then only spans releases newer than the installed one.
    pub fn parse(content: &str, local: &CurrentVersion) -> Result<Self, UpdateError> {
        let lines: Vec<&str> = content.lines().collect();
        let local_marker = local.marker();
        let start = lines.iter().position(|l| l.contains(&local_marker)).unwrap_or(0);
        if start > 0 {
            debug!("skipping {start} manifest line(s) preceding installed version {local_marker}");
        }

        let mut entries = Vec::new();
        for (idx, raw) in lines.iter().enumerate().skip(start) {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with(VERSION_MARKER_PREFIX) {
                if VERSION_MARKER_RE.is_match(line) {
                    continue;
                }
                return Err(UpdateError::ManifestParseError {
                    line: line_no,
                    reason: format!("malformed version marker '{line}'"),
                });
            }

            entries.push(Self::parse_entry(line, line_no)?);
        }

        Ok(Self { entries })
    }

    fn parse_entry(line: &str, line_no: usize) -> Result<ManifestEntry, UpdateError> {
        let mut fields = line.split(MANIFEST_FIELD_SEPARATOR);
        let raw_path = fields.next().unwrap_or_default().trim();
        let action_token = fields
            .next()
            .ok_or_else(|| UpdateError::ManifestParseError {
                line: line_no,
                reason: "expected '<path>;<action>'".to_string(),
            })?
            .trim();

        let action = match action_token {
            "Add" => ManifestAction::Add,
            "Remove" => ManifestAction::Remove,
            other => {
                return Err(UpdateError::ManifestParseError {
                    line: line_no,
                    reason: format!("unknown action token '{other}'"),
                });
            }
        };

        let is_folder = raw_path.ends_with('/');
        let stripped = raw_path.trim_end_matches('/');
        if stripped.is_empty() {
            return Err(UpdateError::ManifestParseError {
                line: line_no,
                reason: "empty path".to_string(),
            });
        }

        let path = PathBuf::from(stripped);
        validate_relative(&path, line_no)?;

        let is_migration =
            path.components().any(|c| c == Component::Normal(MIGRATIONS_DIR.as_ref()));

        Ok(ManifestEntry {
            path,
            action,
            is_folder,
            is_migration,
        })
    }

    /// All entries, in manifest order.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Entries the file applier and backup manager operate on, in order.
    ///
    /// Migration entries are excluded: those belong to the migration
    /// runner, not the filesystem pipeline.
    pub fn file_entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| !e.is_migration)
    }

    /// Whether any entry is a database migration.
    pub fn has_migrations(&self) -> bool {
        self.entries.iter().any(|e| e.is_migration)
    }

    /// Whether the manifest carries no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Rejects absolute paths and parent-directory traversal.
///
/// Manifest paths address locations inside the install root only; a path
/// that could escape it is refused at parse time, before any phase sees it.
fn validate_relative(path: &Path, line_no: usize) -> Result<(), UpdateError> {
    if path.is_absolute() {
        return Err(UpdateError::ManifestParseError {
            line: line_no,
            reason: format!("absolute path '{}' is not allowed", path.display()),
        });
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(UpdateError::ManifestParseError {
            line: line_no,
            reason: format!("path '{}' traverses outside the install root", path.display()),
        });
    }
    Ok(())
}
