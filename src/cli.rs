//! Command-line interface definitions for `svm`.

use clap::{Parser, Subcommand};

/// Service manager for long-running local processes.
#[derive(Parser, Debug)]
#[command(name = "svm", version, about, long_about = None)]
pub struct Cli {
    /// Path to the service configuration file.
    #[arg(short, long, global = true, default_value = "servman.yaml")]
    pub config: String,

    /// Seconds to wait before executing the command.
    #[arg(short, long, global = true, default_value_t = 0)]
    pub delay: u64,

    /// Log level filter (e.g. `info`, `servman=debug`).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Starts one or more services (`all` for every enabled service).
    #[command(alias = "s")]
    Start {
        /// Service names, or `all`.
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Stops one or more services, escalating to kill if needed.
    #[command(aliases = ["h", "stop"])]
    Halt {
        /// Service names, or `all`.
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Stops and then starts one or more services.
    #[command(alias = "r")]
    Restart {
        /// Service names, or `all`.
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Shows the current status of services.
    #[command(alias = "i")]
    Info {
        /// Service names, or `all` (default).
        #[arg(default_values_t = vec!["all".to_string()])]
        names: Vec<String>,
    },

    /// Edits the service configuration file.
    #[command(subcommand, alias = "cfg")]
    Config(ConfigAction),

    /// Controls the watcher daemon.
    #[command(subcommand)]
    Watcher(WatcherAction),
}

/// Configuration mutations persisted back to the config file.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Marks a service as enabled.
    #[command(alias = "en")]
    Enable {
        /// Service name.
        name: String,
    },
    /// Marks a service as disabled.
    #[command(alias = "dis")]
    Disable {
        /// Service name.
        name: String,
    },
    /// Removes a service from the configuration.
    #[command(alias = "del")]
    Delete {
        /// Service name.
        name: String,
    },
}

/// Watcher daemon lifecycle commands.
#[derive(Subcommand, Debug)]
pub enum WatcherAction {
    /// Runs the watcher daemon.
    Start {
        /// Detach from the terminal and run in the background.
        #[arg(short = 'D', long)]
        detach: bool,
    },
    /// Prints whether the watcher daemon is running.
    Status,
    /// Tells a running watcher daemon to reload its configuration.
    Reload,
    /// Tells a running watcher daemon to exit.
    Stop,
}
