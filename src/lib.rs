//! Servman is a small service manager for long-running local processes. It
//! starts, stops, and inspects services defined in a YAML file, and ships a
//! watcher daemon that restarts crashed services and reacts to watched-file
//! changes, while respecting services an operator stopped on purpose.

/// Coordination bus: heartbeat, stopped-set, and command channel.
pub mod bus;

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Shared timing and naming constants.
pub mod constants;

/// Error handling.
pub mod error;

/// Debounced file-change watching.
pub mod fswatch;

/// Process handlers that run, probe, and kill services.
pub mod handler;

/// Service registry backed by the configuration file.
pub mod registry;

/// A single managed service and its lifecycle operations.
pub mod service;

/// Watcher daemon event loop.
pub mod watcher;
