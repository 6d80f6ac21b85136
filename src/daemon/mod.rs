// Daemon module - Background process management

pub mod daemonize;
pub mod manager;
pub mod pid;
pub mod server;

pub use daemonize::daemonize;
pub use manager::{DaemonManager, DaemonStatus};
pub use pid::PidFile;
pub use server::Daemon;

use crate::error::{OverseerError, Result};
use std::path::{Path, PathBuf};

/// Environment variable overriding where the daemon keeps its files
pub const HOME_ENV: &str = "OVERSEER_HOME";

const DEFAULT_HOME: &str = "/tmp/overseer";

/// Filesystem locations shared by the daemon and the CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    pub home: PathBuf,
    pub socket: PathBuf,
    pub pid_file: PathBuf,
    /// Per-instance stdout/stderr files
    pub log_dir: PathBuf,
    /// The daemon's own output when running detached
    pub daemon_log: PathBuf,
}

impl DaemonPaths {
    /// Paths under `$OVERSEER_HOME`, or `/tmp/overseer` when unset
    pub fn from_env() -> Self {
        let home = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME));

        // The daemon changes directory to / when detaching
        let home = if home.is_relative() {
            std::env::current_dir()
                .map(|cwd| cwd.join(&home))
                .unwrap_or(home)
        } else {
            home
        };

        Self::with_home(home)
    }

    pub fn with_home<P: AsRef<Path>>(home: P) -> Self {
        let home = home.as_ref().to_path_buf();
        Self {
            socket: home.join("overseer.sock"),
            pid_file: home.join("overseer.pid"),
            log_dir: home.join("logs"),
            daemon_log: home.join("daemon.log"),
            home,
        }
    }

    /// Create the home and log directories
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).map_err(|e| {
            OverseerError::DaemonError(format!(
                "Failed to create {}: {}",
                self.log_dir.display(),
                e
            ))
        })
    }
}
