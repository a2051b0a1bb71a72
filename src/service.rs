//! Service lifecycle: start, graceful-then-forceful stop, and status probing.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::Arc,
    thread,
};
use strum_macros::AsRefStr;
use tracing::{error, info, warn};

use crate::bus::{Bus, BusCommand, CMD_UPDATE_STOPPED_SERVICES};
use crate::config::ServiceConfig;
use crate::constants::ESCALATION_STEP;
use crate::error::ManagerError;
use crate::handler::{RunningCache, ServiceHandler};

/// Observable state of a managed service. Ordering is the display order used
/// by the `info` subcommand (running services first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ServiceStatus {
    /// The backing process is alive.
    Running,
    /// Enabled but the backing process is not alive.
    Stopped,
    /// The service is disabled; lifecycle operations are rejected.
    Disabled,
}

/// One managed unit: lifecycle metadata plus exclusive ownership of a process
/// handler.
pub struct Service {
    /// Unique name; immutable after creation.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Disabled services are never auto-restarted and reject manual actions.
    pub enabled: bool,
    /// Optional environment passed to handler commands.
    pub envs: Option<BTreeMap<String, String>>,
    /// Grace period before a stop escalates to a kill.
    pub shutdown_seconds: u64,
    /// Crash-restart delay; `None` opts out of crash watching.
    pub restart_seconds: Option<u64>,
    /// File (relative to the handler dir) whose change triggers a restart.
    pub restart_on_change: Option<String>,
    handler: ServiceHandler,
    config: ServiceConfig,
}

impl Service {
    /// Builds a service from its validated configuration.
    pub fn from_config(
        name: &str,
        config: &ServiceConfig,
        cache: &Arc<RunningCache>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: config.description.clone(),
            enabled: config.enabled,
            envs: config.envs.clone(),
            shutdown_seconds: config.shutdown_seconds,
            restart_seconds: config.restart_seconds,
            restart_on_change: config.restart_on_change.clone(),
            handler: ServiceHandler::from_config(&config.handler, cache),
            config: config.clone(),
        }
    }

    /// The configuration this service was built from, with the current
    /// enablement flag, ready to be persisted.
    pub fn to_config(&self) -> ServiceConfig {
        let mut config = self.config.clone();
        config.enabled = self.enabled;
        config
    }

    /// Absolute or handler-relative path watched for file-change restarts.
    pub fn watch_path(&self) -> Option<PathBuf> {
        self.restart_on_change
            .as_ref()
            .map(|relative| PathBuf::from(self.handler.dir()).join(relative))
    }

    /// Probes the backing process. `refresh` bypasses the running cache.
    pub fn is_running(&self, refresh: bool) -> Result<bool, ManagerError> {
        self.handler
            .is_running(refresh, self.envs.as_ref())
            .map_err(|source| ManagerError::HandlerCommand {
                service: self.name.clone(),
                source,
            })
    }

    /// Returns `Disabled` without probing, otherwise the (cached) run state.
    pub fn status(&self) -> Result<ServiceStatus, ManagerError> {
        if !self.enabled {
            return Ok(ServiceStatus::Disabled);
        }
        Ok(if self.is_running(false)? {
            ServiceStatus::Running
        } else {
            ServiceStatus::Stopped
        })
    }

    /// Starts the service. Idempotent: a running service is left alone. A
    /// successful start removes the service from the stopped-set and
    /// broadcasts the change. Operational failures are logged, not raised, so
    /// a batch invocation continues past one bad service.
    pub fn start(&self, bus: &Bus) -> Result<(), ManagerError> {
        if !self.enabled {
            return Err(ManagerError::ServiceDisabled(self.name.clone()));
        }
        if let Err(err) = self.try_start(bus) {
            error!("Error while starting service '{}': {err}", self.name);
        }
        Ok(())
    }

    fn try_start(&self, bus: &Bus) -> Result<(), ManagerError> {
        if self.is_running(true)? {
            info!("Service '{}' already running", self.name);
            return Ok(());
        }

        info!("Starting service: '{}'", self.name);
        let exit_code = self
            .handler
            .start(self.envs.as_ref())
            .map_err(|source| ManagerError::HandlerCommand {
                service: self.name.clone(),
                source,
            })?;

        if !self.is_running(true)? {
            warn!(
                "Unable to start service: '{}', exit code: {exit_code}",
                self.name
            );
            return Ok(());
        }

        bus.remove_stopped(&self.name)?;
        bus.publish(&BusCommand::new(CMD_UPDATE_STOPPED_SERVICES))?;
        info!("Started service: '{}'", self.name);
        Ok(())
    }

    /// Stops the service, escalating to a kill after the grace period.
    /// Idempotent: a stopped service is left alone. The service is recorded in
    /// the stopped-set (and the change broadcast) before the stop command is
    /// issued, so a concurrent watcher poll cannot mistake the stop for a
    /// crash. Operational failures are logged, not raised.
    pub fn stop_or_kill(&self, bus: &Bus) -> Result<(), ManagerError> {
        if !self.enabled {
            return Err(ManagerError::ServiceDisabled(self.name.clone()));
        }
        if let Err(err) = self.try_stop_or_kill(bus) {
            error!("Error while stopping service '{}': {err}", self.name);
        }
        Ok(())
    }

    fn try_stop_or_kill(&self, bus: &Bus) -> Result<(), ManagerError> {
        if !self.is_running(true)? {
            info!("Service '{}' not running", self.name);
            return Ok(());
        }

        // Mark the intent first; the process must still look alive to any
        // concurrent observer when its name lands in the stopped-set.
        bus.add_stopped(&self.name)?;
        bus.publish(&BusCommand::new(CMD_UPDATE_STOPPED_SERVICES))?;

        info!("Stopping service: {}", self.name);
        let exit_code = self
            .handler
            .stop(self.envs.as_ref())
            .map_err(|source| ManagerError::HandlerCommand {
                service: self.name.clone(),
                source,
            })?;

        let mut stopped = false;
        for _ in 0..self.shutdown_seconds {
            thread::sleep(ESCALATION_STEP);
            if !self.is_running(true)? {
                stopped = true;
                break;
            }
        }

        if stopped {
            info!("Service stopped: '{}'", self.name);
        } else {
            warn!(
                "Service '{}' is still running after {} seconds. \
                 Stop exited with code {exit_code}. Killing it...",
                self.name, self.shutdown_seconds
            );
            self.handler
                .kill(self.envs.as_ref())
                .map_err(|source| ManagerError::HandlerCommand {
                    service: self.name.clone(),
                    source,
                })?;
            info!("Killed service: '{}'", self.name);
        }

        Ok(())
    }
}
