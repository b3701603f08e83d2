//! Update archive extraction.
//!
//! Extracts the verified zip package into the session's working folder.
//! The folder name derives from the archive checksum, so re-fetching the
//! same release reuses the same location and an orphaned folder from an
//! interrupted run is simply overwritten on the next attempt.
//!
//! Entries whose names would escape the destination are rejected rather
//! than resolved; a partially extracted folder is removed before the
//! error is reported.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::UpdateError;
use crate::utils::fs as fsutil;

/// Extract `archive` into `dest`, replacing any previous contents.
///
/// Extraction runs on the blocking thread pool; the archive format is
/// plain zip.
///
/// # Errors
///
/// [`UpdateError::UnpackFailed`] on a corrupt archive, an unsafe entry
/// path, or any filesystem error. The destination folder does not survive
/// a failed extraction.
pub async fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), UpdateError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || extract(&archive, &dest))
        .await
        .map_err(|e| UpdateError::UnpackFailed {
            archive: String::new(),
            reason: format!("extraction task failed: {e}"),
        })?
}

fn extract(archive_path: &Path, dest: &Path) -> Result<(), UpdateError> {
    let archive_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    debug!("extracting {} into {}", archive_name, dest.display());

    if let Err(e) = extract_inner(archive_path, dest) {
        if let Err(cleanup) = fsutil::remove_path(dest) {
            warn!("failed to remove partially extracted folder: {cleanup:#}");
        }
        return Err(UpdateError::UnpackFailed {
            archive: archive_name,
            reason: format!("{e:#}"),
        });
    }

    Ok(())
}

fn extract_inner(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive_path)
        .with_context(|| format!("failed to open archive: {}", archive_path.display()))?;
    let mut zip = zip::ZipArchive::new(file).context("failed to read archive directory")?;

    // A stale folder from an interrupted run is replaced wholesale.
    fsutil::remove_path(dest)?;
    fsutil::ensure_dir(dest)?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .with_context(|| format!("failed to read archive entry {index}"))?;

        let rel: PathBuf = entry
            .enclosed_name()
            .with_context(|| format!("entry '{}' has an unsafe path", entry.name()))?;
        let target = dest.join(rel);

        if entry.is_dir() {
            fsutil::ensure_dir(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fsutil::ensure_dir(parent)?;
        }
        let mut out = std::fs::File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to write {}", target.display()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))
                .with_context(|| format!("failed to set permissions on {}", target.display()))?;
        }
    }

    Ok(())
}
