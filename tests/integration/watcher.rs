#[path = "common/mod.rs"]
mod common;

use std::{fs, path::Path, thread, time::Duration};

use common::{wait_for_path, wait_until};
use tempfile::tempdir;

use servman::{
    bus::{Bus, BusCommand, WatcherStatus, CMD_STOP, CMD_UPDATE_STOPPED_SERVICES},
    registry::ServiceRegistry,
    watcher::Watcher,
};

fn write_config(dir: &Path, extra: &str) -> std::path::PathBuf {
    let config = format!(
        r#"
services:
  api:
    enabled: true
    shutdown_seconds: 1
    restart_seconds: 1
{extra}    handler:
      type: bin
      start_command: "touch running; echo started >> start-count"
      stop_command: "rm -f running"
      kill_command: "rm -f running"
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

fn spawn_watcher(config_path: &Path, bus: &Bus) -> thread::JoinHandle<()> {
    let registry = ServiceRegistry::load(config_path).expect("failed to load registry");
    let watcher = Watcher::new(registry, bus.clone());
    let handle = thread::spawn(move || {
        watcher.run().expect("watcher run failed");
    });

    let probe = bus.clone();
    assert!(
        wait_until(Duration::from_secs(5), move || {
            probe.watcher_status().expect("status read failed") == WatcherStatus::Running
        }),
        "watcher never published a heartbeat"
    );
    handle
}

fn stop_watcher(bus: &Bus, handle: thread::JoinHandle<()>) {
    bus.publish(&BusCommand::new(CMD_STOP))
        .expect("failed to publish stop");
    handle.join().expect("watcher thread panicked");
    assert_eq!(
        bus.watcher_status().expect("status read failed"),
        WatcherStatus::Stopped
    );
    // The daemon closed its side of the bus: the command socket is gone.
    assert!(!bus.root().join("events.sock").exists());
}

#[test]
fn crashed_service_comes_back() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config_path = write_config(dir, "");
    let bus = Bus::with_root(dir.join("bus")).expect("failed to create bus");

    let handle = spawn_watcher(&config_path, &bus);

    // The service is down at startup, so a crash restart is due.
    wait_for_path(&dir.join("running"));

    // Simulate a crash and watch it come back again.
    fs::remove_file(dir.join("running")).expect("failed to crash service");
    assert!(
        wait_until(Duration::from_secs(5), || dir.join("running").exists()),
        "crashed service was not restarted"
    );

    stop_watcher(&bus, handle);
}

#[test]
fn halted_service_stays_down() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config_path = write_config(dir, "");
    let bus = Bus::with_root(dir.join("bus")).expect("failed to create bus");

    let handle = spawn_watcher(&config_path, &bus);
    wait_for_path(&dir.join("running"));

    // An operator halt marks the intent first, then takes the service down.
    bus.add_stopped("api").expect("failed to mark stopped");
    bus.publish(&BusCommand::new(CMD_UPDATE_STOPPED_SERVICES))
        .expect("failed to publish update");
    fs::remove_file(dir.join("running")).expect("failed to stop service");

    // Several poll cycles later the watcher must not have undone the halt.
    thread::sleep(Duration::from_millis(3_500));
    assert!(!dir.join("running").exists());

    stop_watcher(&bus, handle);
}

#[test]
fn changed_watch_file_restarts_the_service() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config_path = write_config(dir, "    restart_on_change: \"watched.conf\"\n");
    fs::write(dir.join("watched.conf"), "v0").expect("failed to write watched file");
    let bus = Bus::with_root(dir.join("bus")).expect("failed to create bus");

    let handle = spawn_watcher(&config_path, &bus);
    wait_for_path(&dir.join("running"));
    let starts_before = fs::read_to_string(dir.join("start-count"))
        .map(|content| content.lines().count())
        .unwrap_or(0);

    thread::sleep(Duration::from_millis(200));
    fs::write(dir.join("watched.conf"), "v1").expect("failed to modify watched file");

    // Debounce window plus a stop/start round trip.
    assert!(
        wait_until(Duration::from_secs(10), || {
            fs::read_to_string(dir.join("start-count"))
                .map(|content| content.lines().count() > starts_before)
                .unwrap_or(false)
        }),
        "file change did not restart the service"
    );
    assert!(dir.join("running").exists());

    stop_watcher(&bus, handle);
}
