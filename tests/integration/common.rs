//! Shared fixtures: a recording host, a static distribution client, and
//! archive/install-tree builders.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use patchup::UpdaterConfig;
use patchup::fetch::DistributionClient;
use patchup::orchestrator::{
    DatabaseServices, MaintenanceSwitch, MigrationRunner, UpdateInfoCache, VersionStore,
};
use patchup::session::{InstalledVersion, PluginVersion};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

/// Host mock that records every collaborator call in order.
#[derive(Default)]
pub struct RecordingHost {
    pub events: Mutex<Vec<String>>,
    pub installed: Mutex<Option<InstalledVersion>>,
    pub fail_enable: bool,
    pub fail_disable: bool,
    pub fail_migrations: bool,
    pub fail_db_backup: bool,
}

impl RecordingHost {
    fn record(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }

    /// Index of the first occurrence of `event`, panicking if absent.
    pub fn position(&self, event: &str) -> usize {
        let events = self.events();
        events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event '{event}' not recorded in {events:?}"))
    }
}

impl MigrationRunner for RecordingHost {
    async fn run_to_top(&self, plugin: Option<&str>) -> Result<bool> {
        assert!(plugin.is_none(), "application updates run the app migration track");
        self.record("migrate");
        Ok(!self.fail_migrations)
    }
}

impl DatabaseServices for RecordingHost {
    fn server_version(&self) -> String {
        "mock-db 1.0".to_string()
    }

    async fn backup(&self) -> Result<Option<PathBuf>> {
        self.record("db_backup");
        if self.fail_db_backup {
            anyhow::bail!("dump process exited with status 1");
        }
        Ok(Some(PathBuf::from("/tmp/db-backup.sql")))
    }
}

impl VersionStore for RecordingHost {
    async fn set_installed(&self, installed: &InstalledVersion) -> Result<()> {
        self.record("set_installed");
        *self.installed.lock().unwrap() = Some(installed.clone());
        Ok(())
    }

    async fn set_plugin_installed(&self, _plugin: &PluginVersion) -> Result<()> {
        self.record("set_plugin_installed");
        Ok(())
    }
}

impl UpdateInfoCache for RecordingHost {
    async fn flush(&self) -> Result<()> {
        self.record("flush_cache");
        Ok(())
    }
}

impl MaintenanceSwitch for RecordingHost {
    async fn enable(&self) -> Result<()> {
        self.record("maintenance_on");
        if self.fail_enable {
            anyhow::bail!("flag file is not writable");
        }
        Ok(())
    }

    async fn disable(&self) -> Result<()> {
        self.record("maintenance_off");
        if self.fail_disable {
            anyhow::bail!("flag file is not writable");
        }
        Ok(())
    }
}

/// Distribution client serving one fixed archive payload.
pub struct StaticDist {
    pub payload: Vec<u8>,
    pub advertised: Option<String>,
}

impl StaticDist {
    /// Serve `payload` with a matching advertised checksum.
    pub fn serving(payload: Vec<u8>) -> Self {
        let advertised = Some(patchup::utils::checksum::md5_of_bytes(&payload));
        Self { payload, advertised }
    }
}

impl DistributionClient for StaticDist {
    async fn download_update(&self, version: &str, build: u64, dest: &Path) -> Result<String> {
        std::fs::write(dest, &self.payload)?;
        Ok(format!("{version}.{build}.zip"))
    }

    async fn release_md5(&self, _version: &str, _build: u64) -> Result<Option<String>> {
        Ok(self.advertised.clone())
    }
}

/// Build a zip archive carrying a manifest and payload files.
pub fn build_archive(manifest: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    writer.start_file("update.manifest", options).unwrap();
    writer.write_all(manifest.as_bytes()).unwrap();

    for (name, body) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

/// A scratch installation with separate install and work roots.
pub struct TestEnv {
    pub tmp: TempDir,
    pub install_root: PathBuf,
    pub work_root: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let install_root = tmp.path().join("install");
        let work_root = tmp.path().join("work");
        std::fs::create_dir_all(&install_root).unwrap();
        Self {
            tmp,
            install_root,
            work_root,
        }
    }

    pub fn config(&self) -> UpdaterConfig {
        UpdaterConfig::new(&self.install_root, &self.work_root)
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.install_root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.install_root.join(rel)).unwrap()
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.install_root.join(rel).exists()
    }

    /// Names of leftover entries under the work root, lock file excluded.
    pub fn work_leftovers(&self) -> Vec<String> {
        if !self.work_root.exists() {
            return Vec::new();
        }
        std::fs::read_dir(&self.work_root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.as_str() != "update.lock")
            .collect()
    }

    /// Recursively collect install-root-relative paths ending in `.bak`.
    pub fn bak_files(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        collect_baks(&self.install_root, &mut found);
        found
    }
}

fn collect_baks(dir: &Path, found: &mut Vec<PathBuf>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "bak") {
            found.push(path.clone());
        }
        if path.is_dir() {
            collect_baks(&path, found);
        }
    }
}
