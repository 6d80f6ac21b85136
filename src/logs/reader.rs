use crate::error::{OverseerError, Result};
use std::collections::VecDeque;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Source of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Stdout,
    Stderr,
}

/// One line of captured output
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub source: LogSource,
    pub message: String,
}

impl LogEntry {
    /// Format the log entry for display
    pub fn format(&self) -> String {
        let prefix = match self.source {
            LogSource::Stdout => "[OUT]",
            LogSource::Stderr => "[ERR]",
        };
        format!("{} {}", prefix, self.message)
    }
}

/// Read the last `lines` lines of a log file.
///
/// A missing file reads as empty: the instance may simply not have
/// written anything yet.
pub async fn read_last_lines(
    file_path: &Path,
    lines: usize,
    source: LogSource,
) -> Result<Vec<LogEntry>> {
    if !file_path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(file_path)
        .await
        .map_err(|e| OverseerError::LogError(format!("Failed to open log file: {}", e)))?;

    let mut window = VecDeque::with_capacity(lines.min(4096));
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| OverseerError::LogError(format!("Failed to read log line: {}", e)))?;
        if read == 0 {
            break;
        }
        if lines == 0 {
            continue;
        }

        // Children may write arbitrary bytes
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches('\n').trim_end_matches('\r');
        if window.len() == lines {
            window.pop_front();
        }
        window.push_back(line.to_string());
    }

    Ok(window
        .into_iter()
        .map(|message| LogEntry { source, message })
        .collect())
}
