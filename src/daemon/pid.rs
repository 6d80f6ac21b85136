// PID file management for daemon process

use crate::error::{OverseerError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Manages the daemon PID file
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write the current process PID to the file
    pub fn write(&self) -> Result<()> {
        let pid = std::process::id();
        fs::write(&self.path, pid.to_string())
            .map_err(|e| OverseerError::DaemonError(format!("Failed to write PID file: {}", e)))?;
        Ok(())
    }

    /// Read the PID from the file
    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| OverseerError::DaemonError(format!("Failed to read PID file: {}", e)))?;

        content
            .trim()
            .parse::<u32>()
            .map_err(|e| OverseerError::DaemonError(format!("Invalid PID in file: {}", e)))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Remove the PID file
    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.path).map_err(|e| {
                OverseerError::DaemonError(format!("Failed to remove PID file: {}", e))
            })?;
        }
        Ok(())
    }

    /// Check if the daemon is running by checking if the PID exists and is alive
    pub fn is_daemon_running(&self) -> bool {
        if !self.exists() {
            return false;
        }

        match self.read() {
            Ok(pid) => is_process_alive(pid),
            Err(_) => false,
        }
    }

    /// Get the path to the PID file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Check a PID with the null signal
#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        // Exists but owned by someone else
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_write_and_read_pid() {
        let temp_file = NamedTempFile::new().unwrap();
        let pid_file = PidFile::with_path(temp_file.path());

        pid_file.write().unwrap();

        let pid = pid_file.read().unwrap();
        assert_eq!(pid, std::process::id());
    }

    #[test]
    fn test_remove() {
        let temp_file = NamedTempFile::new().unwrap();
        let pid_file = PidFile::with_path(temp_file.path());

        pid_file.write().unwrap();
        assert!(pid_file.exists());

        pid_file.remove().unwrap();
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_is_daemon_running_current_process() {
        let temp_file = NamedTempFile::new().unwrap();
        let pid_file = PidFile::with_path(temp_file.path());

        pid_file.write().unwrap();
        assert!(pid_file.is_daemon_running());
    }

    #[test]
    fn test_garbage_pid_file_is_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("overseer.pid");
        fs::write(&path, "not-a-pid").unwrap();

        let pid_file = PidFile::with_path(&path);
        assert!(pid_file.read().is_err());
        assert!(!pid_file.is_daemon_running());
    }
}
