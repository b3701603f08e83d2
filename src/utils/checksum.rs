//! MD5 checksum helpers for package integrity verification.
//!
//! The distribution endpoint advertises an MD5 content checksum for every
//! release package; the fetcher recomputes it locally and compares before
//! anything is unpacked. MD5 is an integrity check against corrupted or
//! truncated downloads here, not an authentication mechanism.

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use std::path::Path;
use tracing::debug;

/// Compute the MD5 checksum of a file.
///
/// Returns the lowercase hex-encoded digest of the file's bytes.
///
/// # Errors
///
/// Fails if the file cannot be read.
pub async fn compute_md5(path: &Path) -> Result<String> {
    debug!("computing md5 checksum for {}", path.display());

    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read file for checksum: {}", path.display()))?;

    let mut hasher = Md5::new();
    hasher.update(&contents);
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the MD5 checksum of a byte slice.
pub fn md5_of_bytes(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Check a file against an expected checksum, case-insensitively.
///
/// Returns `Ok(true)` on a match, `Ok(false)` on a mismatch. Reading the
/// file is the only failure mode.
pub async fn matches_md5(path: &Path, expected: &str) -> Result<bool> {
    let actual = compute_md5(path).await?;
    Ok(actual.eq_ignore_ascii_case(expected))
}
