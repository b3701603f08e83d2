//! Failure phases, their compensation, and mutual exclusion.

use chrono::Utc;
use patchup::orchestrator::UpdateLock;
use patchup::{CurrentVersion, TargetRelease, UpdateError, UpdatePhase, Updater};
use std::time::Duration;

use super::common::{RecordingHost, StaticDist, TestEnv, build_archive};

fn local() -> CurrentVersion {
    CurrentVersion::new("1.9.0", 2800)
}

fn target() -> TargetRelease {
    TargetRelease::new("2.0.0", 3015, Utc::now())
}

#[tokio::test]
async fn checksum_mismatch_stops_before_any_side_effect() {
    let env = TestEnv::new();
    env.write("config/app.php", "untouched");

    let archive = build_archive("config/app.php;Add\n", &[("config/app.php", "new")]);
    let mut dist = StaticDist::serving(archive);
    dist.advertised = Some("00000000000000000000000000000000".to_string());
    let updater = Updater::new(env.config(), dist, RecordingHost::default());

    let failure = updater.run(&target(), &local()).await.unwrap_err();

    assert_eq!(failure.phase, UpdatePhase::Validating);
    assert!(!failure.rolled_back);
    assert!(matches!(failure.error, UpdateError::ValidationFailed { .. }));
    assert_eq!(env.read("config/app.php"), "untouched");
    assert_eq!(updater.host().count("maintenance_on"), 0);
    assert!(env.work_leftovers().is_empty(), "unverified archive must not survive");
}

#[tokio::test]
async fn missing_advertised_checksum_fails_closed() {
    let env = TestEnv::new();
    let archive = build_archive("config/app.php;Add\n", &[("config/app.php", "new")]);
    let mut dist = StaticDist::serving(archive);
    dist.advertised = None;
    let updater = Updater::new(env.config(), dist, RecordingHost::default());

    let failure = updater.run(&target(), &local()).await.unwrap_err();
    assert_eq!(failure.phase, UpdatePhase::Validating);
    assert!(matches!(failure.error, UpdateError::ValidationFailed { .. }));
}

#[tokio::test]
async fn transport_failure_reports_downloading_phase() {
    struct BrokenDist;
    impl patchup::fetch::DistributionClient for BrokenDist {
        async fn download_update(
            &self,
            _version: &str,
            _build: u64,
            _dest: &std::path::Path,
        ) -> anyhow::Result<String> {
            anyhow::bail!("connection reset by peer")
        }
        async fn release_md5(&self, _v: &str, _b: u64) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    let env = TestEnv::new();
    let updater = Updater::new(env.config(), BrokenDist, RecordingHost::default());

    let failure = updater.run(&target(), &local()).await.unwrap_err();
    assert_eq!(failure.phase, UpdatePhase::Downloading);
    assert!(matches!(failure.error, UpdateError::DownloadFailed { .. }));
}

#[tokio::test]
async fn corrupt_archive_fails_during_unpack() {
    let env = TestEnv::new();
    let payload = b"definitely not a zip".to_vec();
    let updater =
        Updater::new(env.config(), StaticDist::serving(payload), RecordingHost::default());

    let failure = updater.run(&target(), &local()).await.unwrap_err();

    assert_eq!(failure.phase, UpdatePhase::Unpacking);
    assert!(matches!(failure.error, UpdateError::UnpackFailed { .. }));
    assert!(env.work_leftovers().is_empty(), "leftovers: {:?}", env.work_leftovers());
}

#[tokio::test]
async fn archive_without_manifest_is_rejected() {
    let env = TestEnv::new();

    // A zip with files but no manifest at the expected location.
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    use std::io::Write as _;
    writer.start_file("config/app.php", zip::write::SimpleFileOptions::default()).unwrap();
    writer.write_all(b"new").unwrap();
    let payload = writer.finish().unwrap().into_inner();

    let updater =
        Updater::new(env.config(), StaticDist::serving(payload), RecordingHost::default());

    let failure = updater.run(&target(), &local()).await.unwrap_err();

    assert_eq!(failure.phase, UpdatePhase::CheckingWritable);
    assert!(matches!(failure.error, UpdateError::ManifestMissing { .. }));
    assert_eq!(updater.host().count("maintenance_on"), 0);
    assert!(env.work_leftovers().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn unwritable_targets_are_reported_in_full_before_any_mutation() {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;

    let env = TestEnv::new();
    env.write("config/a.php", "a");
    env.write("config/b.php", "b");
    let a = env.install_root.join("config/a.php");
    let b = env.install_root.join("config/b.php");
    std::fs::set_permissions(&a, Permissions::from_mode(0o444)).unwrap();
    std::fs::set_permissions(&b, Permissions::from_mode(0o444)).unwrap();

    let archive = build_archive(
        "config/a.php;Add\nconfig/b.php;Add\n",
        &[("config/a.php", "new"), ("config/b.php", "new")],
    );
    let updater = Updater::new(env.config(), StaticDist::serving(archive), RecordingHost::default());

    let failure = updater.run(&target(), &local()).await.unwrap_err();

    assert_eq!(failure.phase, UpdatePhase::CheckingWritable);
    match &failure.error {
        UpdateError::PathsNotWritable { violations } => {
            assert_eq!(violations.len(), 2, "both violations must be reported");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!failure.rolled_back);
    assert_eq!(updater.host().count("maintenance_on"), 0);
    assert_eq!(env.read("config/a.php"), "a");
    assert!(env.bak_files().is_empty());
}

#[tokio::test]
async fn maintenance_enable_failure_discards_session() {
    let env = TestEnv::new();
    let archive = build_archive("assets/a.txt;Add\n", &[("assets/a.txt", "a")]);
    let host = RecordingHost {
        fail_enable: true,
        ..Default::default()
    };
    let updater = Updater::new(env.config(), StaticDist::serving(archive), host);

    let failure = updater.run(&target(), &local()).await.unwrap_err();

    assert_eq!(failure.phase, UpdatePhase::MaintenanceOn);
    assert!(!failure.rolled_back);
    assert!(!env.exists("assets/a.txt"));
    assert!(env.work_leftovers().is_empty());
}

#[tokio::test]
async fn migration_failure_rolls_back_and_leaves_maintenance() {
    let env = TestEnv::new();
    env.write("config/app.php", "original");

    let archive = build_archive(
        "migrations/m1.php;Add\nconfig/app.php;Add\n",
        &[("config/app.php", "new")],
    );
    let host = RecordingHost {
        fail_migrations: true,
        ..Default::default()
    };
    let updater = Updater::new(env.config(), StaticDist::serving(archive), host);

    let failure = updater.run(&target(), &local()).await.unwrap_err();

    assert_eq!(failure.phase, UpdatePhase::MigratingDb);
    assert!(failure.rolled_back);
    assert!(matches!(failure.error, UpdateError::MigrationFailed { .. }));

    // No file was mutated yet, and the restored state carries no .baks.
    assert_eq!(env.read("config/app.php"), "original");
    assert!(env.bak_files().is_empty());

    let host = updater.host();
    assert_eq!(host.count("maintenance_on"), 1);
    assert_eq!(host.count("maintenance_off"), 1);
    assert_eq!(host.count("set_installed"), 0);
    assert!(env.work_leftovers().is_empty());
}

#[tokio::test]
async fn database_backup_failure_aborts_before_migrations() {
    let env = TestEnv::new();
    let archive = build_archive("migrations/m1.php;Add\n", &[]);
    let host = RecordingHost {
        fail_db_backup: true,
        ..Default::default()
    };
    let updater = Updater::new(env.config(), StaticDist::serving(archive), host);

    let failure = updater.run(&target(), &local()).await.unwrap_err();

    assert_eq!(failure.phase, UpdatePhase::MigratingDb);
    assert_eq!(updater.host().count("migrate"), 0);
    assert_eq!(updater.host().count("maintenance_off"), 1);
}

#[tokio::test]
async fn partial_apply_failure_restores_every_file() {
    let env = TestEnv::new();
    env.write("first.php", "orig-first");
    env.write("second.php", "orig-second");

    // The payload is missing second.php, so apply fails on entry two
    // after entry one has already been written.
    let archive = build_archive(
        "first.php;Add\nsecond.php;Add\n",
        &[("first.php", "new-first")],
    );
    let updater = Updater::new(env.config(), StaticDist::serving(archive), RecordingHost::default());

    let failure = updater.run(&target(), &local()).await.unwrap_err();

    assert_eq!(failure.phase, UpdatePhase::ApplyingFiles);
    assert!(failure.rolled_back);
    assert!(matches!(failure.error, UpdateError::ApplyFailed { .. }));

    assert_eq!(env.read("first.php"), "orig-first");
    assert_eq!(env.read("second.php"), "orig-second");
    assert!(env.bak_files().is_empty());

    let host = updater.host();
    assert_eq!(host.count("maintenance_on"), 1);
    assert_eq!(host.count("maintenance_off"), 1);
    assert_eq!(host.count("set_installed"), 0);
}

#[tokio::test]
async fn second_run_is_rejected_while_lock_is_held() {
    let env = TestEnv::new();
    env.write("config/app.php", "untouched");

    let held = UpdateLock::acquire(&env.work_root, "2.0.0", Duration::from_secs(86_400))
        .await
        .unwrap();

    let archive = build_archive("config/app.php;Add\n", &[("config/app.php", "new")]);
    let updater = Updater::new(env.config(), StaticDist::serving(archive), RecordingHost::default());

    let failure = updater.run(&target(), &local()).await.unwrap_err();

    assert_eq!(failure.phase, UpdatePhase::Idle);
    assert!(matches!(failure.error, UpdateError::UpdateAlreadyInProgress { .. }));
    assert!(!failure.rolled_back);
    assert_eq!(env.read("config/app.php"), "untouched");
    assert_eq!(updater.host().events().len(), 0, "no collaborator may be called");

    drop(held);

    // With the lock released, the same updater succeeds.
    updater.run(&target(), &local()).await.unwrap();
    assert_eq!(env.read("config/app.php"), "new");
}
