//! Successful end-to-end update runs.

use chrono::Utc;
use patchup::{CurrentVersion, TargetRelease, Updater};

use super::common::{RecordingHost, StaticDist, TestEnv, build_archive};

fn local() -> CurrentVersion {
    CurrentVersion::new("1.9.0", 2800)
}

fn target() -> TargetRelease {
    TargetRelease::new("2.0.0", 3015, Utc::now())
}

#[tokio::test]
async fn applies_adds_and_removes_end_to_end() {
    let env = TestEnv::new();
    env.write("plugins/foo/Foo.php", "v1");
    env.write("config/old.php", "legacy");

    let archive = build_archive(
        "plugins/foo/Foo.php;Add\nconfig/old.php;Remove\n",
        &[("plugins/foo/Foo.php", "v2")],
    );
    let updater = Updater::new(env.config(), StaticDist::serving(archive), RecordingHost::default());

    let report = updater.run(&target(), &local()).await.unwrap();

    assert_eq!(env.read("plugins/foo/Foo.php"), "v2");
    assert!(!env.exists("config/old.php"));
    assert_eq!(report.installed.version, "2.0.0");
    assert_eq!(report.installed.build, 3015);
    assert!(report.warnings.is_empty(), "unexpected warnings: {:?}", report.warnings);

    // Backups and session artifacts are gone; only the lock file remains.
    assert!(env.bak_files().is_empty());
    assert!(env.work_leftovers().is_empty(), "leftovers: {:?}", env.work_leftovers());

    let host = updater.host();
    assert_eq!(host.count("maintenance_on"), 1);
    assert_eq!(host.count("maintenance_off"), 1);
    assert!(host.position("maintenance_on") < host.position("maintenance_off"));
    assert_eq!(host.installed.lock().unwrap().as_ref().unwrap().version, "2.0.0");
    assert_eq!(host.count("flush_cache"), 1);
}

#[tokio::test]
async fn migrations_run_after_backup_and_before_files() {
    let env = TestEnv::new();
    env.write("config/app.php", "old config");

    let archive = build_archive(
        "migrations/m200101_alter_sessions.php;Add\nconfig/app.php;Add\n",
        &[("config/app.php", "new config")],
    );
    let updater = Updater::new(env.config(), StaticDist::serving(archive), RecordingHost::default());

    updater.run(&target(), &local()).await.unwrap();

    let host = updater.host();
    assert!(host.position("maintenance_on") < host.position("db_backup"));
    assert!(host.position("db_backup") < host.position("migrate"));
    assert!(host.position("migrate") < host.position("maintenance_off"));
    assert_eq!(env.read("config/app.php"), "new config");
    // The migration file itself is the runner's business, not the applier's.
    assert!(!env.exists("migrations/m200101_alter_sessions.php"));
}

#[tokio::test]
async fn migration_free_manifest_skips_database_phase() {
    let env = TestEnv::new();
    let archive = build_archive("assets/logo.svg;Add\n", &[("assets/logo.svg", "<svg/>")]);
    let updater = Updater::new(env.config(), StaticDist::serving(archive), RecordingHost::default());

    updater.run(&target(), &local()).await.unwrap();

    let host = updater.host();
    assert_eq!(host.count("migrate"), 0);
    assert_eq!(host.count("db_backup"), 0);
    assert_eq!(env.read("assets/logo.svg"), "<svg/>");
}

#[tokio::test]
async fn folder_entries_install_recursively() {
    let env = TestEnv::new();
    env.write("templates/index.twig", "stale");

    let archive = build_archive(
        "templates/;Add\n",
        &[
            ("templates/index.twig", "fresh"),
            ("templates/partials/nav.twig", "nav"),
        ],
    );
    let updater = Updater::new(env.config(), StaticDist::serving(archive), RecordingHost::default());

    updater.run(&target(), &local()).await.unwrap();

    assert_eq!(env.read("templates/index.twig"), "fresh");
    assert_eq!(env.read("templates/partials/nav.twig"), "nav");
    assert!(env.bak_files().is_empty());
}

#[tokio::test]
async fn cumulative_archive_is_filtered_to_local_version() {
    let env = TestEnv::new();
    env.write("config/ancient.php", "still here");

    // Entries before the installed version marker must not be replayed.
    let manifest = "\
config/ancient.php;Remove
##1.9.0.2800
plugins/bar/Bar.php;Add
";
    let archive = build_archive(manifest, &[("plugins/bar/Bar.php", "bar")]);
    let updater = Updater::new(env.config(), StaticDist::serving(archive), RecordingHost::default());

    updater.run(&target(), &local()).await.unwrap();

    assert!(env.exists("config/ancient.php"), "pre-marker entry must be skipped");
    assert_eq!(env.read("plugins/bar/Bar.php"), "bar");
}

#[tokio::test]
async fn maintenance_disable_failure_is_a_warning_not_an_error() {
    let env = TestEnv::new();
    let archive = build_archive("assets/a.txt;Add\n", &[("assets/a.txt", "a")]);
    let host = RecordingHost {
        fail_disable: true,
        ..Default::default()
    };
    let updater = Updater::new(env.config(), StaticDist::serving(archive), host);

    let report = updater.run(&target(), &local()).await.unwrap();

    assert_eq!(env.read("assets/a.txt"), "a");
    assert!(
        report.warnings.iter().any(|w| w.contains("maintenance")),
        "warnings: {:?}",
        report.warnings
    );
}

#[tokio::test]
async fn reinstalling_the_same_release_succeeds() {
    let env = TestEnv::new();
    env.write("config/app.php", "corrupted");

    let archive = build_archive("config/app.php;Add\n", &[("config/app.php", "pristine")]);
    let updater = Updater::new(env.config(), StaticDist::serving(archive), RecordingHost::default());

    // Target equals the installed version; the run proceeds as a reinstall.
    let same = TargetRelease::new("1.9.0", 2800, Utc::now());
    updater.run(&same, &local()).await.unwrap();

    assert_eq!(env.read("config/app.php"), "pristine");
}
