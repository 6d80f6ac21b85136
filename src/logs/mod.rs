// Logs module - Per-instance stdout/stderr files

mod reader;

pub use reader::{read_last_lines, LogEntry, LogSource};

use crate::error::{OverseerError, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Directory holding `<app>-<index>-out.log` / `<app>-<index>-err.log`
#[derive(Debug, Clone)]
pub struct LogDir {
    root: PathBuf,
}

impl LogDir {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of one instance's log for the given stream
    pub fn path(&self, app: &str, index: usize, source: LogSource) -> PathBuf {
        let suffix = match source {
            LogSource::Stdout => "out",
            LogSource::Stderr => "err",
        };
        self.root.join(format!("{}-{}-{}.log", app, index, suffix))
    }

    /// Open (append) both log files of an instance, creating the directory
    /// if needed. Returned handles are handed straight to the child.
    pub fn open(&self, app: &str, index: usize) -> Result<(File, File)> {
        fs::create_dir_all(&self.root).map_err(|e| {
            OverseerError::LogError(format!(
                "Failed to create log directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let open = |source| {
            let path = self.path(app, index, source);
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| {
                    OverseerError::LogError(format!("Failed to open {}: {}", path.display(), e))
                })
        };

        Ok((open(LogSource::Stdout)?, open(LogSource::Stderr)?))
    }

    /// Read the last `lines` lines of both streams of an instance
    pub async fn tail(&self, app: &str, index: usize, lines: usize) -> Result<Vec<LogEntry>> {
        let mut entries =
            read_last_lines(&self.path(app, index, LogSource::Stdout), lines, LogSource::Stdout)
                .await?;
        entries.extend(
            read_last_lines(&self.path(app, index, LogSource::Stderr), lines, LogSource::Stderr)
                .await?,
        );
        Ok(entries)
    }

    /// Delete every log file of an application
    pub fn remove(&self, app: &str, instance_count: usize) {
        for index in 0..instance_count {
            for source in [LogSource::Stdout, LogSource::Stderr] {
                let path = self.path(app, index, source);
                if path.exists() {
                    if let Err(e) = fs::remove_file(&path) {
                        warn!("Failed to remove log file {}: {}", path.display(), e);
                    }
                }
            }
        }
    }
}
