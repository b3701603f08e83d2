//! File system utilities for the update pipeline.
//!
//! These helpers wrap the handful of recursive and existence-tolerant
//! operations the backup manager and file applier share. Single-file
//! operations in the async phases use `tokio::fs` directly; the recursive
//! ones here are synchronous and cheap enough to call inline, since one
//! update run is strictly sequential anyway.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Ensures a directory exists, creating it and all parents if necessary.
///
/// Returns an error if the path exists but is not a directory.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        anyhow::bail!("path exists but is not a directory: {}", path.display());
    }
    Ok(())
}

/// Recursively copies a directory tree.
///
/// Creates the destination if needed and overwrites existing files.
/// Symlinks and other special files are skipped.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    ensure_dir(dst)?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("path escapes source root: {}", entry.path().display()))?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!("failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        }
        // Symlinks and special files are not part of update payloads.
    }

    Ok(())
}

/// Copies a file or directory to a new location.
///
/// Files get their parent directories created as needed; directories copy
/// recursively via [`copy_dir`].
pub fn copy_path(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        copy_dir(src, dst)
    } else {
        if let Some(parent) = dst.parent() {
            ensure_dir(parent)?;
        }
        fs::copy(src, dst)
            .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
        Ok(())
    }
}

/// Removes a file or directory tree, tolerating a missing target.
pub fn remove_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            if meta.is_dir() {
                fs::remove_dir_all(path)
                    .with_context(|| format!("failed to remove directory: {}", path.display()))
            } else {
                fs::remove_file(path)
                    .with_context(|| format!("failed to remove file: {}", path.display()))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to stat: {}", path.display())),
    }
}

/// Reports whether a path is writable according to its permission bits.
///
/// Mode bits rather than an `access(2)` probe, so the answer is stable
/// regardless of the effective uid the check runs under.
pub fn is_writable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => !meta.permissions().readonly(),
        Err(_) => false,
    }
}

/// Returns the nearest ancestor of `path` that exists on disk.
///
/// Used for the new-file case of the writability check: the applier
/// creates missing parents, so the constraint that matters is on the first
/// ancestor that already exists.
pub fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() {
            break;
        }
        if dir.exists() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

/// Appends a suffix to the final path component.
///
/// `plugins/foo/Foo.php` with `.bak` becomes `plugins/foo/Foo.php.bak`.
pub fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut out = path.to_path_buf();
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    out.set_file_name(format!("{name}{suffix}"));
    out
}
