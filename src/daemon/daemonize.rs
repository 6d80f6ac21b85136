// Daemonization support for Unix systems

use crate::error::{OverseerError, Result};
use std::path::Path;

/// Detach from the terminal with the classic double fork.
///
/// Must run before any threads exist, so call it before building the
/// tokio runtime. stdin is redirected to /dev/null; stdout and stderr are
/// appended to `log_path`.
#[cfg(unix)]
pub fn daemonize(log_path: &Path) -> Result<()> {
    use nix::libc;
    use nix::unistd::{fork, setsid, ForkResult};
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;

    // Opened before forking so failures still reach the terminal
    let devnull = OpenOptions::new()
        .read(true)
        .open("/dev/null")
        .map_err(|e| OverseerError::DaemonError(format!("Failed to open /dev/null: {}", e)))?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| {
            OverseerError::DaemonError(format!("Failed to open {}: {}", log_path.display(), e))
        })?;

    // SAFETY: no other threads exist yet
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(e) => {
            return Err(OverseerError::DaemonError(format!("First fork failed: {}", e)));
        }
    }

    setsid().map_err(|e| OverseerError::DaemonError(format!("setsid failed: {}", e)))?;

    // Second fork so the daemon can never reacquire a controlling terminal
    // SAFETY: still single-threaded
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(e) => {
            return Err(OverseerError::DaemonError(format!("Second fork failed: {}", e)));
        }
    }

    std::env::set_current_dir("/").map_err(|e| {
        OverseerError::DaemonError(format!("Failed to change directory to /: {}", e))
    })?;

    // SAFETY: both descriptors are open for the duration of the calls
    unsafe {
        libc::dup2(devnull.as_raw_fd(), libc::STDIN_FILENO);
        libc::dup2(log.as_raw_fd(), libc::STDOUT_FILENO);
        libc::dup2(log.as_raw_fd(), libc::STDERR_FILENO);
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize(_log_path: &Path) -> Result<()> {
    Err(OverseerError::DaemonError(
        "Daemonization is only supported on Unix systems".to_string(),
    ))
}
