use std::path::PathBuf;
use thiserror::Error;

/// A descriptor file that cannot be turned into a valid set of applications.
///
/// Loading is all-or-nothing: any of these aborts the whole file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Unsupported config file format: '{0}'. Use .json or .toml")]
    UnsupportedFormat(String),

    #[error("No applications declared in {0}")]
    NoApps(PathBuf),

    #[error("App '{app}': invalid '{field}': {reason}")]
    InvalidField {
        app: String,
        field: &'static str,
        reason: String,
    },

    #[error("App '{app}': name is declared more than once")]
    DuplicateName { app: String },
}

impl ConfigError {
    pub(crate) fn field(app: &str, field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidField {
            app: app.to_string(),
            field,
            reason: reason.into(),
        }
    }
}

/// Failure to create the OS process for an instance. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("App '{app}': {what} not found: {path}")]
    NotFound {
        app: String,
        what: &'static str,
        path: PathBuf,
    },

    #[error("App '{app}': permission denied executing {path}")]
    PermissionDenied { app: String, path: PathBuf },

    #[error("App '{app}': failed to spawn process: {reason}")]
    Spawn { app: String, reason: String },
}

/// Main error type for the overseer supervisor
#[derive(Debug, Error)]
pub enum OverseerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    // Registry errors
    #[error("App not found: {0}")]
    AppNotFound(String),

    #[error("App is already running: {0}")]
    AppAlreadyRunning(String),

    #[error("Failed to stop app {0}: {1}")]
    StopError(String, String),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Supervisor is not running")]
    SupervisorGone,

    // IPC-related errors
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Failed to connect to daemon: {0}")]
    ConnectionError(String),

    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Daemon already running")]
    DaemonAlreadyRunning,

    #[error("Daemon error: {0}")]
    DaemonError(String),

    #[error("Log error: {0}")]
    LogError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for overseer operations
pub type Result<T> = std::result::Result<T, OverseerError>;
