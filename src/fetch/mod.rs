//! Package download and integrity verification.
//!
//! The fetcher drives a [`DistributionClient`] to pull the release archive
//! into the work root, then recomputes the package's MD5 checksum and
//! compares it against the value the endpoint advertises. Verification
//! fails closed: a mismatch, or an endpoint that advertises no checksum at
//! all, aborts the run before anything is unpacked.
//!
//! The verified checksum doubles as the session uid, which makes repeated
//! fetches of the same release land in the same working folder.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::constants::ARCHIVE_EXTENSION;
use crate::core::UpdateError;
use crate::session::{ReleaseDescriptor, TargetRelease};
use crate::utils::{checksum, fs as fsutil};

/// Client for the remote distribution endpoint.
///
/// Implementations are supplied by the host; [`HttpDistributionClient`]
/// covers the plain HTTP layout.
#[allow(async_fn_in_trait)]
pub trait DistributionClient {
    /// Download the package for `version`/`build` to `dest`.
    ///
    /// Returns the file name the endpoint served the package under.
    async fn download_update(&self, version: &str, build: u64, dest: &Path) -> Result<String>;

    /// The MD5 checksum the endpoint advertises for the release package,
    /// if it advertises one.
    async fn release_md5(&self, version: &str, build: u64) -> Result<Option<String>>;
}

/// [`DistributionClient`] over a plain HTTP release endpoint.
///
/// Expects the endpoint to serve packages at
/// `{base}/download/{version}.{build}.zip` and their checksums at
/// `{base}/md5/{version}.{build}`.
#[derive(Debug, Clone)]
pub struct HttpDistributionClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDistributionClient {
    /// Create a client for the given endpoint base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn package_url(&self, version: &str, build: u64) -> String {
        format!("{}/download/{version}.{build}.{ARCHIVE_EXTENSION}", self.base_url)
    }

    fn md5_url(&self, version: &str, build: u64) -> String {
        format!("{}/md5/{version}.{build}", self.base_url)
    }
}

impl DistributionClient for HttpDistributionClient {
    async fn download_update(&self, version: &str, build: u64, dest: &Path) -> Result<String> {
        let url = self.package_url(version, build);
        debug!("downloading update package from {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        if !response.status().is_success() {
            anyhow::bail!("distribution endpoint returned HTTP {}", response.status());
        }

        let filename = response
            .url()
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or("update.zip")
            .to_string();

        let bytes = response.bytes().await.context("failed to read package body")?;

        // Stage through a temp file in the destination directory so a
        // truncated transfer never lands at the final path.
        let parent = dest.parent().context("download destination has no parent")?;
        let staged = tempfile::NamedTempFile::new_in(parent)
            .context("failed to create staging file for download")?;
        std::fs::write(staged.path(), &bytes).context("failed to write package to disk")?;
        staged.persist(dest).context("failed to move package into place")?;

        info!("downloaded {} ({} bytes)", filename, bytes.len());
        Ok(filename)
    }

    async fn release_md5(&self, version: &str, build: u64) -> Result<Option<String>> {
        let url = self.md5_url(version, build);
        debug!("fetching release checksum from {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        if !response.status().is_success() {
            warn!("checksum request returned HTTP {}", response.status());
            return Ok(None);
        }

        let body = response.text().await.context("failed to read checksum body")?;
        let checksum = body.trim();
        if checksum.is_empty() {
            return Ok(None);
        }
        Ok(Some(checksum.to_string()))
    }
}

/// A downloaded, checksum-verified update package.
#[derive(Debug)]
pub struct DownloadedPackage {
    /// Where the archive landed under the work root.
    pub archive_path: PathBuf,
    /// Release identity plus its verified checksum.
    pub descriptor: ReleaseDescriptor,
    /// Session uid derived from the verified checksum.
    pub uid: String,
}

/// Downloads and verifies release packages into the work root.
pub struct PackageFetcher<'a, C> {
    client: &'a C,
    work_root: &'a Path,
}

impl<'a, C: DistributionClient> PackageFetcher<'a, C> {
    /// Create a fetcher writing into `work_root`.
    pub fn new(client: &'a C, work_root: &'a Path) -> Self {
        Self { client, work_root }
    }

    /// Download the package for `target` and verify its checksum.
    ///
    /// A failed verification removes the downloaded archive before
    /// returning, so nothing unverified survives under the work root.
    ///
    /// # Errors
    ///
    /// [`UpdateError::DownloadFailed`] on transport failure,
    /// [`UpdateError::ValidationFailed`] on checksum mismatch or when the
    /// endpoint advertises no checksum.
    pub async fn fetch(&self, target: &TargetRelease) -> Result<DownloadedPackage, UpdateError> {
        fsutil::ensure_dir(self.work_root).map_err(|e| UpdateError::DownloadFailed {
            version: target.version.clone(),
            build: target.build,
            source: e,
        })?;

        let archive_path = self
            .work_root
            .join(format!("update-{}.{}.{ARCHIVE_EXTENSION}", target.version, target.build));

        info!("downloading update {} (build {})", target.version, target.build);
        self.client
            .download_update(&target.version, target.build, &archive_path)
            .await
            .map_err(|e| UpdateError::DownloadFailed {
                version: target.version.clone(),
                build: target.build,
                source: e,
            })?;

        match self.verify(target, &archive_path).await {
            Ok(checksum) => {
                info!("package checksum verified ({checksum})");
                Ok(DownloadedPackage {
                    uid: checksum.clone(),
                    descriptor: ReleaseDescriptor {
                        version: target.version.clone(),
                        build: target.build,
                        date: target.date,
                        checksum,
                    },
                    archive_path,
                })
            }
            Err(e) => {
                if let Err(cleanup) = fsutil::remove_path(&archive_path) {
                    warn!("failed to remove unverified archive: {cleanup:#}");
                }
                Err(e)
            }
        }
    }

    /// Compare the archive's MD5 against the endpoint-advertised value.
    ///
    /// Returns the verified lowercase checksum.
    async fn verify(&self, target: &TargetRelease, archive: &Path) -> Result<String, UpdateError> {
        let archive_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let expected = self
            .client
            .release_md5(&target.version, target.build)
            .await
            .map_err(|e| UpdateError::ValidationFailed {
                archive: archive_name.clone(),
                reason: format!("failed to obtain expected checksum: {e:#}"),
            })?
            .ok_or_else(|| UpdateError::ValidationFailed {
                archive: archive_name.clone(),
                reason: "distribution endpoint advertised no checksum".to_string(),
            })?;

        let actual =
            checksum::compute_md5(archive).await.map_err(|e| UpdateError::ValidationFailed {
                archive: archive_name.clone(),
                reason: format!("failed to compute checksum: {e:#}"),
            })?;

        if !actual.eq_ignore_ascii_case(&expected) {
            return Err(UpdateError::ValidationFailed {
                archive: archive_name,
                reason: format!("checksum mismatch: expected {expected}, got {actual}"),
            });
        }

        Ok(actual.to_lowercase())
    }
}
