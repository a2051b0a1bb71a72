//! Error handling for servman.
use thiserror::Error;

/// Defines all possible errors that can occur in the service manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration. Also raised for an unknown handler
    /// `type` discriminant, which serde rejects during deserialization.
    #[error("Invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// Structural violation that the schema alone cannot express.
    #[error("Invalid configuration for service '{service}': {reason}")]
    ConfigInvalid {
        /// The service whose definition is invalid.
        service: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The configuration references an environment variable that is not set.
    #[error("Missing environment variable referenced in config: {0}")]
    MissingEnvVar(String),

    /// A name argument matched no registered service.
    #[error("Unable to resolve name '{0}'")]
    UnresolvedName(String),

    /// A service referenced by exact name does not exist.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Manual start/stop was requested for a disabled service.
    #[error("Service '{0}' is disabled")]
    ServiceDisabled(String),

    /// A handler shell command could not be executed.
    #[error("Failed to run handler command for service '{service}': {source}")]
    HandlerCommand {
        /// The service whose handler command failed.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error talking to the coordination bus.
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl ManagerError {
    /// Whether this error should be reported as a plain operator-facing
    /// message instead of being logged as an unexpected failure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ManagerError::ConfigReadError(_)
                | ManagerError::ConfigParseError(_)
                | ManagerError::ConfigInvalid { .. }
                | ManagerError::MissingEnvVar(_)
                | ManagerError::UnresolvedName(_)
                | ManagerError::ServiceNotFound(_)
                | ManagerError::ServiceDisabled(_)
        )
    }
}

/// Errors raised by the coordination bus helpers.
#[derive(Debug, Error)]
pub enum BusError {
    /// I/O failure against the runtime directory or the command socket.
    #[error("bus I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Failure serialising or parsing a bus message or the stopped-set file.
    #[error("failed to serialise bus message: {0}")]
    Serde(#[from] serde_json::Error),

    /// The runtime directory cannot be located.
    #[error("HOME environment variable not set")]
    MissingHome,
}
