//! Timing constants shared between the CLI and the watcher daemon.

use std::time::Duration;

/// Interval between watcher poll cycles, in milliseconds. Also used by status
/// queries to decide whether a heartbeat is still fresh.
pub const POLL_INTERVAL_MS: i64 = 1_000;

/// Extra slack granted on top of the poll interval before a heartbeat is
/// considered stale.
pub const HEARTBEAT_GRACE_MS: i64 = 1_000;

/// How long a tmux session listing stays valid before it is re-queried.
pub const RUNNING_CACHE_TTL: Duration = Duration::from_millis(5_000);

/// Quiet period applied to raw filesystem events before a restart is triggered.
pub const FILE_CHANGE_DEBOUNCE: Duration = Duration::from_millis(1_500);

/// Wait step between probes while a service is shutting down gracefully.
pub const ESCALATION_STEP: Duration = Duration::from_secs(1);

/// Directory under `$HOME/.local/share` holding bus runtime artifacts.
pub const RUNTIME_DIR_NAME: &str = "servman";

/// Shell used when a handler does not configure its own.
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Name token that expands to every registered service.
pub const WILDCARD_NAME: &str = "all";
