//! Shared constants used across the update pipeline.

/// Name of the patch manifest file expected at the root of an unpacked
/// update archive.
pub const MANIFEST_FILE_NAME: &str = "update.manifest";

/// Suffix appended to a path to form its backup sibling.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Name of the process-wide update lock file, created under the work root.
pub const LOCK_FILE_NAME: &str = "update.lock";

/// Directory prefix that marks a manifest entry as a database migration.
pub const MIGRATIONS_DIR: &str = "migrations";

/// Field separator within a manifest line.
pub const MANIFEST_FIELD_SEPARATOR: char = ';';

/// Prefix of a version marker line inside the manifest.
pub const VERSION_MARKER_PREFIX: &str = "##";

/// File extension of update package archives.
pub const ARCHIVE_EXTENSION: &str = "zip";
