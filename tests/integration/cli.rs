#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{runtime_dir, svm, write_marker_config};
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn info_shows_sorted_statuses() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let home = dir.join("home");
    fs::create_dir_all(&home).expect("failed to create home dir");
    let config_path = write_marker_config(dir);

    fs::write(dir.join("running-api"), "").expect("failed to create marker");

    svm(&home, &config_path)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("api"))
        .stdout(predicate::str::contains("RUNNING"))
        .stdout(predicate::str::contains("db"))
        .stdout(predicate::str::contains("STOPPED"));
}

#[test]
fn unknown_service_name_is_a_plain_error() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let home = dir.join("home");
    fs::create_dir_all(&home).expect("failed to create home dir");
    let config_path = write_marker_config(dir);

    svm(&home, &config_path)
        .args(["start", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unable to resolve name 'nope'"));
}

#[test]
fn start_and_halt_manage_the_stopped_set() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let home = dir.join("home");
    fs::create_dir_all(&home).expect("failed to create home dir");
    let config_path = write_marker_config(dir);

    svm(&home, &config_path)
        .args(["start", "api"])
        .assert()
        .success();
    assert!(dir.join("running-api").exists());

    svm(&home, &config_path)
        .args(["halt", "api"])
        .assert()
        .success();
    assert!(!dir.join("running-api").exists());

    let stopped = fs::read_to_string(runtime_dir(&home).join("stopped.json"))
        .expect("stopped set should exist after halt");
    assert!(stopped.contains("api"));

    // Starting again removes the manual-stop marker.
    svm(&home, &config_path)
        .args(["start", "api"])
        .assert()
        .success();
    let stopped = fs::read_to_string(runtime_dir(&home).join("stopped.json"))
        .expect("stopped set should still exist");
    assert!(!stopped.contains("api"));
}

#[test]
fn wildcard_targets_every_service() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let home = dir.join("home");
    fs::create_dir_all(&home).expect("failed to create home dir");
    let config_path = write_marker_config(dir);

    svm(&home, &config_path)
        .args(["start", "all"])
        .assert()
        .success();
    assert!(dir.join("running-api").exists());
    assert!(dir.join("running-db").exists());
}

#[test]
fn short_aliases_resolve_to_their_commands() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let home = dir.join("home");
    fs::create_dir_all(&home).expect("failed to create home dir");
    let config_path = write_marker_config(dir);

    svm(&home, &config_path).args(["s", "db"]).assert().success();
    assert!(dir.join("running-db").exists());

    svm(&home, &config_path).args(["r", "db"]).assert().success();
    assert!(dir.join("running-db").exists());

    svm(&home, &config_path).args(["h", "db"]).assert().success();
    assert!(!dir.join("running-db").exists());

    svm(&home, &config_path)
        .args(["i", "db"])
        .assert()
        .success()
        .stdout(predicate::str::contains("STOPPED"));
}

#[test]
fn config_disable_persists_and_blocks_start() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let home = dir.join("home");
    fs::create_dir_all(&home).expect("failed to create home dir");
    let config_path = write_marker_config(dir);

    svm(&home, &config_path)
        .args(["config", "disable", "api"])
        .assert()
        .success();

    let saved = fs::read_to_string(&config_path).expect("failed to read config");
    assert!(saved.contains("enabled: false"));

    svm(&home, &config_path)
        .args(["start", "api"])
        .assert()
        .stderr(predicate::str::contains("disabled"));
    assert!(!dir.join("running-api").exists());

    svm(&home, &config_path)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("DISABLED"));
}

#[test]
fn config_delete_removes_the_service() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let home = dir.join("home");
    fs::create_dir_all(&home).expect("failed to create home dir");
    let config_path = write_marker_config(dir);

    svm(&home, &config_path)
        .args(["config", "delete", "db"])
        .assert()
        .success();

    svm(&home, &config_path)
        .args(["info", "db"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unable to resolve name 'db'"));
}

#[test]
fn watcher_status_reports_stopped_without_a_daemon() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let home = dir.join("home");
    fs::create_dir_all(&home).expect("failed to create home dir");
    let config_path = write_marker_config(dir);

    svm(&home, &config_path)
        .args(["watcher", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("currently stopped"));

    svm(&home, &config_path)
        .args(["watcher", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("isn't running"));
}

#[test]
fn missing_config_file_fails_with_its_path() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let home = dir.join("home");
    fs::create_dir_all(&home).expect("failed to create home dir");

    svm(&home, &dir.join("absent.yaml"))
        .arg("info")
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.yaml"));
}
