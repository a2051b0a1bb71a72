#[path = "common/mod.rs"]
mod common;

use std::{fs, path::Path};

use common::{runtime_dir, svm};
use tempfile::tempdir;

/// A service that ignores its stop command; only kill takes it down.
fn write_stubborn_config(dir: &Path) -> std::path::PathBuf {
    let config = format!(
        r#"
services:
  stubborn:
    enabled: true
    shutdown_seconds: 2
    handler:
      type: bin
      start_command: "touch running"
      stop_command: "true"
      kill_command: "rm -f running; echo killed >> kill-count"
      is_running_command: "test -f running"
      shell: "/bin/sh"
      dir: "{dir}"
"#,
        dir = dir.display()
    );
    let path = dir.join("servman.yaml");
    fs::write(&path, config).expect("failed to write config");
    path
}

#[test]
fn unresponsive_service_is_killed_exactly_once() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let home = dir.join("home");
    fs::create_dir_all(&home).expect("failed to create home dir");
    let config_path = write_stubborn_config(dir);

    svm(&home, &config_path)
        .args(["start", "stubborn"])
        .assert()
        .success();
    assert!(dir.join("running").exists());

    svm(&home, &config_path)
        .args(["halt", "stubborn"])
        .assert()
        .success();

    assert!(!dir.join("running").exists());
    let kills = fs::read_to_string(dir.join("kill-count")).expect("kill log missing");
    assert_eq!(kills.lines().count(), 1);
}

#[test]
fn halt_is_idempotent_for_a_stopped_service() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let home = dir.join("home");
    fs::create_dir_all(&home).expect("failed to create home dir");
    let config_path = write_stubborn_config(dir);

    svm(&home, &config_path)
        .args(["halt", "stubborn"])
        .assert()
        .success();

    // Nothing ran and nothing was marked: the service was never up.
    assert!(!dir.join("kill-count").exists());
    assert!(!runtime_dir(&home).join("stopped.json").exists());
}

#[test]
fn restart_brings_a_running_service_back_up() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let home = dir.join("home");
    fs::create_dir_all(&home).expect("failed to create home dir");
    let config_path = write_stubborn_config(dir);

    svm(&home, &config_path)
        .args(["start", "stubborn"])
        .assert()
        .success();
    svm(&home, &config_path)
        .args(["restart", "stubborn"])
        .assert()
        .success();

    assert!(dir.join("running").exists());
    let stopped = fs::read_to_string(runtime_dir(&home).join("stopped.json"))
        .expect("stopped set should exist after restart");
    assert!(!stopped.contains("stubborn"));
}
