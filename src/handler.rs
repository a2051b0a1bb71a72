//! Process handlers: the capability to start, stop, kill, and probe the
//! external process backing a service.

use std::{
    collections::{BTreeMap, HashSet},
    io,
    process::{Command, Stdio},
    sync::{Arc, Mutex},
    time::Instant,
};
use tracing::debug;

use crate::config::HandlerConfig;
use crate::constants::RUNNING_CACHE_TTL;

/// Outcome of a handler shell command.
#[derive(Debug)]
pub struct CommandResult {
    /// Exit code of the command; `-1` when terminated by a signal.
    pub exit_code: i32,
    /// Combined stdout and stderr output.
    pub output: String,
}

/// Runs a shell command to completion and captures its combined output.
pub fn execute_command(
    command: &str,
    dir: &str,
    shell: &str,
    envs: Option<&BTreeMap<String, String>>,
) -> io::Result<CommandResult> {
    debug!("execute_command({command}, {dir}, {shell})");

    let mut cmd = Command::new(shell);
    cmd.arg("-c")
        .arg(command)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(envs) = envs {
        for (key, value) in envs {
            cmd.env(key, value);
        }
    }

    let output = cmd.output()?;
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(CommandResult {
        exit_code: output.status.code().unwrap_or(-1),
        output: combined,
    })
}

/// Wraps a value in single quotes for safe interpolation into a shell command.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Short-lived snapshot of the tmux session list, shared by every tmux handler
/// in one registry so a probe burst issues a single `tmux ls`.
#[derive(Debug, Default)]
pub struct RunningCache {
    inner: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    sessions: HashSet<String>,
    expires_at: Option<Instant>,
}

impl RunningCache {
    /// Creates an empty, already-expired cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Drops the snapshot so the next probe re-queries tmux.
    pub fn invalidate(&self) {
        self.lock().expires_at = None;
    }

    fn is_fresh(&self) -> bool {
        self.lock()
            .expires_at
            .is_some_and(|expires_at| Instant::now() < expires_at)
    }

    fn replace(&self, sessions: HashSet<String>) {
        let mut state = self.lock();
        state.sessions = sessions;
        state.expires_at = Some(Instant::now() + RUNNING_CACHE_TTL);
    }

    fn contains(&self, session: &str) -> bool {
        self.lock().sessions.contains(session)
    }
}

/// Handler over a process controlled by four explicit shell commands.
#[derive(Debug)]
pub struct BinHandler {
    start_command: String,
    stop_command: String,
    kill_command: String,
    is_running_command: String,
    shell: String,
    dir: String,
}

impl BinHandler {
    fn run(
        &self,
        command: &str,
        envs: Option<&BTreeMap<String, String>>,
    ) -> io::Result<i32> {
        execute_command(command, &self.dir, &self.shell, envs)
            .map(|result| result.exit_code)
    }
}

/// Handler over a process living inside a tmux session. Stop sends the
/// configured shutdown trigger; kill tears the session down.
#[derive(Debug)]
pub struct TmuxHandler {
    session: String,
    command: String,
    shutdown_trigger: String,
    shell: String,
    dir: String,
    cache: Arc<RunningCache>,
}

impl TmuxHandler {
    fn run(&self, command: &str) -> io::Result<i32> {
        execute_command(command, &self.dir, &self.shell, None)
            .map(|result| result.exit_code)
    }

    fn refresh_cache(&self) -> io::Result<()> {
        // `tmux ls` exits non-zero when no server is running; an empty
        // session list is the correct reading of that.
        let result = execute_command("tmux ls", &self.dir, &self.shell, None)?;
        let sessions = result
            .output
            .lines()
            .filter_map(|line| line.split(':').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        self.cache.replace(sessions);
        Ok(())
    }
}

/// A service's process handler; exactly one variant is active per service.
#[derive(Debug)]
pub enum ServiceHandler {
    /// Direct command execution.
    Bin(BinHandler),
    /// tmux-session-backed execution.
    Tmux(TmuxHandler),
}

impl ServiceHandler {
    /// Builds a handler from its validated configuration.
    pub fn from_config(config: &HandlerConfig, cache: &Arc<RunningCache>) -> Self {
        match config {
            HandlerConfig::Bin {
                start_command,
                stop_command,
                kill_command,
                is_running_command,
                shell,
                dir,
            } => ServiceHandler::Bin(BinHandler {
                start_command: start_command.clone(),
                stop_command: stop_command.clone(),
                kill_command: kill_command.clone(),
                is_running_command: is_running_command.clone(),
                shell: shell.clone(),
                dir: dir.clone(),
            }),
            HandlerConfig::Tmux {
                session,
                command,
                shutdown_trigger,
                shell,
                dir,
            } => ServiceHandler::Tmux(TmuxHandler {
                session: session.clone(),
                command: command.clone(),
                shutdown_trigger: shutdown_trigger.clone(),
                shell: shell.clone(),
                dir: dir.clone(),
                cache: Arc::clone(cache),
            }),
        }
    }

    /// Working directory the handler's commands run in.
    pub fn dir(&self) -> &str {
        match self {
            ServiceHandler::Bin(handler) => &handler.dir,
            ServiceHandler::Tmux(handler) => &handler.dir,
        }
    }

    /// Starts the process and returns the start command's exit code.
    pub fn start(&self, envs: Option<&BTreeMap<String, String>>) -> io::Result<i32> {
        match self {
            ServiceHandler::Bin(handler) => handler.run(&handler.start_command, envs),
            ServiceHandler::Tmux(handler) => {
                let full_command = match envs {
                    Some(envs) if !envs.is_empty() => {
                        let exports = envs
                            .iter()
                            .map(|(key, value)| {
                                format!("export {key}={}", shell_quote(value))
                            })
                            .collect::<Vec<_>>()
                            .join("; ");
                        format!("{exports}; {}", handler.command)
                    }
                    _ => handler.command.clone(),
                };

                handler.run(&format!(
                    "tmux new -d -s {} {}",
                    handler.session,
                    shell_quote(&full_command)
                ))
            }
        }
    }

    /// Asks the process to stop gracefully.
    pub fn stop(&self, envs: Option<&BTreeMap<String, String>>) -> io::Result<i32> {
        match self {
            ServiceHandler::Bin(handler) => handler.run(&handler.stop_command, envs),
            ServiceHandler::Tmux(handler) => handler.run(&format!(
                "tmux send -t {} {}",
                handler.session, handler.shutdown_trigger
            )),
        }
    }

    /// Terminates the process forcefully.
    pub fn kill(&self, envs: Option<&BTreeMap<String, String>>) -> io::Result<i32> {
        match self {
            ServiceHandler::Bin(handler) => handler.run(&handler.kill_command, envs),
            ServiceHandler::Tmux(handler) => {
                handler.run(&format!("tmux kill-session -t {}", handler.session))
            }
        }
    }

    /// Probes whether the process is currently running. Without `refresh` the
    /// tmux variant may serve a session list up to the cache TTL old; the bin
    /// variant always re-probes.
    pub fn is_running(
        &self,
        refresh: bool,
        envs: Option<&BTreeMap<String, String>>,
    ) -> io::Result<bool> {
        match self {
            ServiceHandler::Bin(handler) => handler
                .run(&handler.is_running_command, envs)
                .map(|exit_code| exit_code == 0),
            ServiceHandler::Tmux(handler) => {
                if refresh || !handler.cache.is_fresh() {
                    handler.refresh_cache()?;
                }
                Ok(handler.cache.contains(&handler.session))
            }
        }
    }
}
