// Daemon lifecycle management

use super::pid::PidFile;
use crate::error::{OverseerError, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// How a daemon stop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Graceful,
    Killed,
}

/// Daemon manager for controlling daemon lifecycle
pub struct DaemonManager {
    pid_file: PidFile,
}

impl DaemonManager {
    pub fn with_pid_file(pid_file: PidFile) -> Self {
        Self { pid_file }
    }

    /// Check if the daemon is currently running
    pub fn is_running(&self) -> bool {
        self.pid_file.is_daemon_running()
    }

    /// Get the PID of the running daemon, if any
    pub fn get_pid(&self) -> Option<u32> {
        if self.is_running() {
            self.pid_file.read().ok()
        } else {
            None
        }
    }

    /// Record this process as the daemon (called from within the daemon)
    pub fn register_daemon(&self) -> Result<()> {
        if self.is_running() {
            return Err(OverseerError::DaemonAlreadyRunning);
        }

        // Stale file from a daemon that died without cleaning up
        if self.pid_file.exists() {
            self.pid_file.remove()?;
        }

        self.pid_file.write()
    }

    /// Stop the daemon with SIGTERM, escalating to SIGKILL after `timeout`.
    ///
    /// The daemon stops every app before exiting, so `timeout` should cover
    /// the apps' own stop timeouts.
    #[cfg(unix)]
    pub fn stop_daemon(&self, timeout: Duration) -> Result<StopOutcome> {
        let pid = self.get_pid().ok_or(OverseerError::DaemonNotRunning)?;

        let pid_t = Pid::from_raw(pid as i32);
        kill(pid_t, Signal::SIGTERM).map_err(|e| {
            OverseerError::DaemonError(format!("Failed to send SIGTERM: {}", e))
        })?;

        if self.wait_for_exit(timeout) {
            self.pid_file.remove()?;
            return Ok(StopOutcome::Graceful);
        }

        warn!("Daemon (PID {}) did not stop gracefully, sending SIGKILL", pid);
        kill(pid_t, Signal::SIGKILL).map_err(|e| {
            OverseerError::DaemonError(format!("Failed to send SIGKILL: {}", e))
        })?;

        if self.wait_for_exit(Duration::from_secs(1)) {
            self.pid_file.remove()?;
            return Ok(StopOutcome::Killed);
        }

        Err(OverseerError::DaemonError(
            "Failed to stop daemon even with SIGKILL".to_string(),
        ))
    }

    #[cfg(not(unix))]
    pub fn stop_daemon(&self, _timeout: Duration) -> Result<StopOutcome> {
        Err(OverseerError::DaemonError(
            "Daemon stop is only supported on Unix systems".to_string(),
        ))
    }

    fn wait_for_exit(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if !self.is_running() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        !self.is_running()
    }

    /// Unregister the daemon (called during daemon shutdown)
    pub fn unregister_daemon(&self) -> Result<()> {
        self.pid_file.remove()
    }

    /// Get daemon status information
    pub fn get_status(&self) -> DaemonStatus {
        DaemonStatus {
            running: self.is_running(),
            pid: self.get_pid(),
            pid_file: self.pid_file.path().to_path_buf(),
        }
    }
}

/// Daemon status information
#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub pid_file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp_dir: &TempDir) -> DaemonManager {
        DaemonManager::with_pid_file(PidFile::with_path(temp_dir.path().join("overseer.pid")))
    }

    #[test]
    fn test_daemon_manager_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);

        assert!(!manager.is_running());
        assert!(manager.get_pid().is_none());
        assert!(matches!(
            manager.stop_daemon(Duration::from_millis(10)),
            Err(OverseerError::DaemonNotRunning)
        ));
    }

    #[test]
    fn test_register_daemon_twice() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);

        manager.register_daemon().unwrap();
        assert!(manager.is_running());
        assert_eq!(manager.get_pid(), Some(std::process::id()));

        assert!(matches!(
            manager.register_daemon(),
            Err(OverseerError::DaemonAlreadyRunning)
        ));

        manager.unregister_daemon().unwrap();
        assert!(!manager.get_status().running);
    }
}
