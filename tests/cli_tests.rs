//! Exit-code contract of the `gamesync` binary.

use std::fs;

use assert_cmd::Command;
use tempfile::TempDir;

/// Binary pointed at a fresh in-memory database, run from an empty directory
/// so no `.env` file is picked up.
fn gamesync(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("gamesync").expect("binary builds");
    cmd.current_dir(dir.path())
        .env("GAMESYNC_PROFILE", "test")
        .env("GAMESYNC_DATABASE_URL", "sqlite::memory:")
        .env("GAMESYNC_AUTO_MIGRATE", "true")
        .env("GAMESYNC_LOG_LEVEL", "warn")
        .env("GAMESYNC_IGDB_CLIENT_ID", "")
        .env("GAMESYNC_IGDB_CLIENT_SECRET", "")
        .env("GAMESYNC_STEAMGRIDDB_API_KEY", "");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().expect("command runs");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn refresh_without_candidates_succeeds() {
    let dir = TempDir::new().unwrap();
    let out = stdout_of(gamesync(&dir).args(["refresh-stale", "--min-days", "14"]));
    assert!(out.contains("no candidates"));

    let out = stdout_of(gamesync(&dir).args(["refresh-popular", "--limit", "5", "--force"]));
    assert!(out.contains("no candidates"));

    let out = stdout_of(gamesync(&dir).args(["refresh-recent", "--days", "30"]));
    assert!(out.contains("no candidates"));
}

#[test]
fn stats_dispatch_and_worker_on_empty_queue() {
    let dir = TempDir::new().unwrap();
    let out = stdout_of(gamesync(&dir).args(["sync-stats", "--threshold", "40", "--run"]));
    assert!(out.contains("no links due"));

    let out = stdout_of(gamesync(&dir).args(["sync-quaternary"]));
    assert!(out.contains("no links due"));

    let out = stdout_of(gamesync(&dir).args(["work", "--until-idle"]));
    assert!(out.contains("0 jobs run"));
}

#[test]
fn migrate_applies_schema() {
    let dir = TempDir::new().unwrap();
    let out = stdout_of(gamesync(&dir).arg("migrate"));
    assert!(out.contains("migrations applied"));
}

#[test]
fn import_of_comment_only_file_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let list = dir.path().join("ids.txt");
    fs::write(&list, "# nothing to import yet\n\n").unwrap();

    let out = stdout_of(gamesync(&dir).args(["import", "--file", list.to_str().unwrap()]));
    assert!(out.contains("no ids given"));
}

#[test]
fn bad_arguments_fail() {
    let dir = TempDir::new().unwrap();
    gamesync(&dir)
        .args(["import", "--ids", "12,abc"])
        .assert()
        .failure();
    gamesync(&dir).args(["enrich"]).assert().failure();
    gamesync(&dir)
        .args(["import", "--file", "missing.txt"])
        .assert()
        .failure();

    let list = dir.path().join("bad.txt");
    fs::write(&list, "1942\nnot-an-id\n").unwrap();
    gamesync(&dir)
        .args(["import", "--file", list.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn enrich_without_credentials_is_a_setup_failure() {
    let dir = TempDir::new().unwrap();
    let output = gamesync(&dir).args(["enrich", "1942"]).output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("IGDB credentials"));
}

#[test]
fn invalid_configuration_fails() {
    let dir = TempDir::new().unwrap();
    gamesync(&dir)
        .env("GAMESYNC_EXECUTOR_MAX_ATTEMPTS", "0")
        .args(["work", "--until-idle"])
        .assert()
        .failure();

    gamesync(&dir)
        .env("GAMESYNC_LOG_FORMAT", "xml")
        .arg("migrate")
        .assert()
        .failure();
}

#[test]
fn day_windows_outside_bounds_are_rejected() {
    let dir = TempDir::new().unwrap();
    for args in [
        ["refresh-stale", "--min-days=-5"],
        ["refresh-stale", "--min-days=1000000000"],
        ["refresh-recent", "--days=3651"],
        ["refresh-recent", "--days=-1"],
    ] {
        gamesync(&dir).args(args).assert().failure();
    }

    let out = stdout_of(gamesync(&dir).args(["refresh-stale", "--min-days=0"]));
    assert!(out.contains("no candidates"));
}
