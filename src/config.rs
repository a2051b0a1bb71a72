//! Configuration management for servman.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::constants::DEFAULT_SHELL;
use crate::error::ManagerError;

/// Represents the structure of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Map of service names to their respective definitions.
    pub services: BTreeMap<String, ServiceConfig>,
}

/// Definition of an individual service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Disabled services are neither auto-restarted nor startable from the CLI.
    pub enabled: bool,
    /// Optional environment variables passed to handler commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envs: Option<BTreeMap<String, String>>,
    /// How long to wait after a graceful stop before escalating to a kill.
    pub shutdown_seconds: u64,
    /// If set, the watcher restarts the service this many seconds after an
    /// unexpected exit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_seconds: Option<u64>,
    /// Path relative to the handler working directory; a change to this file
    /// makes the watcher restart the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_on_change: Option<String>,
    /// How the service process is started, stopped, and probed.
    pub handler: HandlerConfig,
}

/// Handler variants, selected by the `type` discriminant. An unknown
/// discriminant is a hard parse error, never a silent default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HandlerConfig {
    /// Direct shell command execution.
    Bin {
        /// Command that starts the process.
        start_command: String,
        /// Command that stops the process gracefully.
        stop_command: String,
        /// Command that terminates the process forcefully.
        kill_command: String,
        /// Probe command; exit code 0 means running.
        is_running_command: String,
        /// Shell used to run the commands.
        #[serde(default = "default_shell")]
        shell: String,
        /// Working directory for the commands.
        #[serde(default = "default_dir")]
        dir: String,
    },
    /// tmux-session-backed execution; stop and kill semantics derive from
    /// session control.
    Tmux {
        /// Name of the tmux session.
        session: String,
        /// Command executed inside the session.
        command: String,
        /// Keys sent to the session to stop the service gracefully.
        shutdown_trigger: String,
        /// Shell used to run the tmux client commands.
        #[serde(default = "default_shell")]
        shell: String,
        /// Working directory for the tmux client commands.
        #[serde(default = "default_dir")]
        dir: String,
    },
}

impl HandlerConfig {
    /// Working directory configured for this handler.
    pub fn dir(&self) -> &str {
        match self {
            HandlerConfig::Bin { dir, .. } => dir,
            HandlerConfig::Tmux { dir, .. } => dir,
        }
    }
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

fn default_dir() -> String {
    ".".to_string()
}

/// Expands `${VAR}` references within the raw config text. Bare `$VAR` is left
/// alone so handler commands can keep shell variables for runtime expansion.
fn expand_env_vars(input: &str) -> Result<String, ManagerError> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");
    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ManagerError::MissingEnvVar(name)),
        None => Ok(result.to_string()),
    }
}

/// Checks constraints the schema alone cannot express.
fn validate(config: &Config) -> Result<(), ManagerError> {
    for (name, service) in &config.services {
        if service.shutdown_seconds == 0 {
            return Err(ManagerError::ConfigInvalid {
                service: name.clone(),
                reason: "shutdown_seconds must be at least 1".into(),
            });
        }
    }
    Ok(())
}

/// Loads, expands, and schema-validates the configuration file. Any structural
/// violation is raised before a single service object is built.
pub fn load_config(config_path: &Path) -> Result<Config, ManagerError> {
    let content = fs::read_to_string(config_path).map_err(|e| {
        ManagerError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded = expand_env_vars(&content)?;
    let config: Config = serde_yaml::from_str(&expanded)?;
    validate(&config)?;
    Ok(config)
}

/// Serialises the configuration back to disk, overwriting the file. This makes
/// enable/disable and delete immediately durable for any later process start.
pub fn save_config(config: &Config, config_path: &Path) -> Result<(), ManagerError> {
    let content = serde_yaml::to_string(config)?;
    fs::write(config_path, content)?;
    Ok(())
}

/// Resolves a config path argument against the current directory.
pub fn resolve_config_path(path: &str) -> PathBuf {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        return candidate;
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(candidate),
        Err(_) => candidate,
    }
}
