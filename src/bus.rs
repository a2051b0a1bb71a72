//! Coordination bus shared by every participating process.
//!
//! The bus is a runtime directory holding a heartbeat key and the stopped-set,
//! plus a unix socket command channel. CLI invocations and the watcher daemon
//! all agree on daemon liveness and intentional-stop state through it.

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
};
use strum_macros::AsRefStr;

use crate::constants::{HEARTBEAT_GRACE_MS, POLL_INTERVAL_MS, RUNTIME_DIR_NAME};
use crate::error::BusError;

/// Command name for re-parsing the watcher's configuration.
pub const CMD_RELOAD: &str = "reload";
/// Command name for graceful watcher termination.
pub const CMD_STOP: &str = "stop";
/// Command name announcing a stopped-set mutation.
pub const CMD_UPDATE_STOPPED_SERVICES: &str = "update-stopped-services";

/// Broadcast message sent over the command channel. Every subscriber receives
/// every message and filters by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusCommand {
    /// Command discriminator.
    pub name: String,
    /// Optional payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl BusCommand {
    /// Creates a payload-free command.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: None,
        }
    }
}

/// Liveness of the watcher daemon as derived from the heartbeat key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum WatcherStatus {
    /// Heartbeat is fresh.
    Running,
    /// Heartbeat was cleared by a deliberate stop.
    Stopped,
    /// Heartbeat exists but went stale; the watcher crashed or was killed.
    Dead,
}

/// Handle to the shared coordination store. Cloning is cheap; each clone talks
/// to the same runtime directory.
#[derive(Debug, Clone)]
pub struct Bus {
    root: PathBuf,
}

impl Bus {
    /// Opens the bus at the default per-user runtime directory.
    pub fn open() -> Result<Self, BusError> {
        let home = std::env::var("HOME").map_err(|_| BusError::MissingHome)?;
        let root = PathBuf::from(home)
            .join(".local/share")
            .join(RUNTIME_DIR_NAME);
        Self::with_root(root)
    }

    /// Opens the bus rooted at an explicit directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self, BusError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The runtime directory backing this bus.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn heartbeat_path(&self) -> PathBuf {
        self.root.join("heartbeat")
    }

    /// Path of the stopped-set file. Exposed so tests and handler probes can
    /// observe the set from outside this process.
    pub fn stopped_path(&self) -> PathBuf {
        self.root.join("stopped.json")
    }

    fn socket_path(&self) -> PathBuf {
        self.root.join("events.sock")
    }

    /// Writes the current timestamp to the heartbeat key.
    pub fn write_heartbeat(&self) -> Result<(), BusError> {
        fs::write(
            self.heartbeat_path(),
            Utc::now().timestamp_millis().to_string(),
        )?;
        Ok(())
    }

    /// Clears the heartbeat key so status queries immediately report
    /// `Stopped` instead of waiting for staleness.
    pub fn clear_heartbeat(&self) -> Result<(), BusError> {
        let path = self.heartbeat_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Derives the watcher's liveness from the heartbeat key.
    pub fn watcher_status(&self) -> Result<WatcherStatus, BusError> {
        let path = self.heartbeat_path();
        if !path.exists() {
            return Ok(WatcherStatus::Stopped);
        }

        let contents = fs::read_to_string(path)?;
        let Ok(written_at) = contents.trim().parse::<i64>() else {
            return Ok(WatcherStatus::Dead);
        };

        let fresh = Utc::now().timestamp_millis()
            < written_at + POLL_INTERVAL_MS + HEARTBEAT_GRACE_MS;
        Ok(if fresh {
            WatcherStatus::Running
        } else {
            WatcherStatus::Dead
        })
    }

    fn stopped_lock_path(&self) -> PathBuf {
        self.root.join("stopped.json.lock")
    }

    /// Takes the cross-process mutation lock for the stopped-set. The lock is
    /// released when the returned handle is dropped.
    fn lock_stopped(&self) -> Result<fs::File, BusError> {
        let lock = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.stopped_lock_path())?;
        lock.lock_exclusive()?;
        Ok(lock)
    }

    /// Returns the full stopped-set, the authoritative record of services
    /// that are intentionally not running. Reads take no lock; mutations
    /// replace the file via rename, so a reader always sees a complete
    /// document.
    pub fn stopped_services(&self) -> Result<Vec<String>, BusError> {
        let path = self.stopped_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Adds a service name to the stopped-set. The read-modify-write runs
    /// under the mutation lock so a concurrent mutator in another process
    /// cannot make this intent disappear.
    pub fn add_stopped(&self, name: &str) -> Result<(), BusError> {
        let _lock = self.lock_stopped()?;
        let mut stopped = self.stopped_services()?;
        if !stopped.iter().any(|entry| entry == name) {
            stopped.push(name.to_string());
            self.save_stopped(&stopped)?;
        }
        Ok(())
    }

    /// Removes a service name from the stopped-set, under the mutation lock.
    pub fn remove_stopped(&self, name: &str) -> Result<(), BusError> {
        let _lock = self.lock_stopped()?;
        let mut stopped = self.stopped_services()?;
        let before = stopped.len();
        stopped.retain(|entry| entry != name);
        if stopped.len() != before {
            self.save_stopped(&stopped)?;
        }
        Ok(())
    }

    fn save_stopped(&self, stopped: &[String]) -> Result<(), BusError> {
        let tmp = self.root.join("stopped.json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(stopped)?)?;
        fs::rename(tmp, self.stopped_path())?;
        Ok(())
    }

    /// Broadcasts a command over the channel. Delivery is only guaranteed to
    /// already-subscribed receivers; publishing with nobody listening is a
    /// silent no-op.
    pub fn publish(&self, command: &BusCommand) -> Result<(), BusError> {
        let path = self.socket_path();
        if !path.exists() {
            return Ok(());
        }

        let mut stream = match UnixStream::connect(&path) {
            Ok(stream) => stream,
            // A leftover socket from a dead subscriber refuses connections.
            Err(err) if err.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let payload = serde_json::to_vec(command)?;
        stream.write_all(&payload)?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }

    /// Binds the subscribe side of the command channel. Only one subscriber
    /// per bus; a stale socket file from a crashed daemon is replaced.
    pub fn subscribe(&self) -> Result<BusSubscriber, BusError> {
        let path = self.socket_path();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        Ok(BusSubscriber { listener, path })
    }
}

/// Receive side of the command channel, dedicated to the watcher daemon so a
/// blocked receive never starves heartbeat writes or set queries.
pub struct BusSubscriber {
    listener: UnixListener,
    path: PathBuf,
}

impl BusSubscriber {
    /// Blocks until the next broadcast command arrives.
    pub fn recv(&self) -> Result<BusCommand, BusError> {
        self.listener.set_nonblocking(false)?;
        let (stream, _addr) = self.listener.accept()?;
        Self::read_command(stream)
    }

    /// Polls for a pending broadcast command without blocking, so the owning
    /// loop can interleave a shutdown check between receives.
    pub fn try_recv(&self) -> Result<Option<BusCommand>, BusError> {
        self.listener.set_nonblocking(true)?;
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false)?;
                Self::read_command(stream).map(Some)
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn read_command(stream: UnixStream) -> Result<BusCommand, BusError> {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line)?;

        if line.trim().is_empty() {
            return Err(BusError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "empty bus command",
            )));
        }

        Ok(serde_json::from_str(line.trim())?)
    }
}

impl Drop for BusSubscriber {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
