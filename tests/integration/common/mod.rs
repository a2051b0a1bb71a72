#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use assert_cmd::Command;

/// Builds an `svm` invocation whose runtime state lives under `home`.
pub fn svm(home: &Path, config: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("svm"));
    cmd.env("HOME", home)
        .arg("--config")
        .arg(config.to_str().unwrap());
    cmd
}

/// Writes a config with two marker-file bin services, `api` and `db`, whose
/// run state is a file named `running-<service>` in `dir`.
pub fn write_marker_config(dir: &Path) -> PathBuf {
    let config = format!(
        r#"
services:
  api:
    enabled: true
    shutdown_seconds: 1
    handler:
      type: bin
      start_command: "touch running-api; echo started >> start-count-api"
      stop_command: "rm -f running-api"
      kill_command: "rm -f running-api"
      is_running_command: "test -f running-api"
      shell: "/bin/sh"
      dir: "{dir}"
  db:
    enabled: true
    shutdown_seconds: 1
    handler:
      type: bin
      start_command: "touch running-db"
      stop_command: "rm -f running-db"
      kill_command: "rm -f running-db"
      is_running_command: "test -f running-db"
      shell: "/bin/sh"
      dir: "{dir}"
"#,
        dir = dir.display()
    );
    let path = dir.join("servman.yaml");
    fs::write(&path, config).expect("failed to write config");
    path
}

pub fn runtime_dir(home: &Path) -> PathBuf {
    home.join(".local/share/servman")
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

pub fn wait_for_removed(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if !path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for {:?} to be removed", path);
}

pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(100));
    }
    false
}
