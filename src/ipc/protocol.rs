// IPC Protocol definitions for client-daemon communication

use crate::process::AppStatus;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Options for viewing logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOptions {
    pub name: String,
    /// Instance to read, 0 when omitted
    pub instance: Option<usize>,
    pub lines: usize,
}

/// Daemon management commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DaemonCommand {
    Stop,
    Status,
}

/// All available commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Load a descriptor file (absolute path, read by the daemon) and start its apps
    Start { config_path: PathBuf },
    Stop { name: String },
    Restart { name: String },
    Status,
    Logs(LogOptions),
    Delete { name: String },
    Daemon(DaemonCommand),
}

/// Response data variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    /// Apps started successfully
    Started { apps: Vec<String> },
    Stopped { name: String },
    Restarted { name: String },
    /// Snapshot of every registered app
    Status(Vec<AppStatus>),
    /// Log lines
    Logs(Vec<String>),
    Deleted { name: String },
    /// Daemon status
    DaemonStatus {
        pid: u32,
        uptime: Duration,
        apps: usize,
    },
    /// Generic success message
    Success(String),
}

/// Request message from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Response message from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, String>,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

impl Response {
    pub fn success(id: u64, data: ResponseData) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: u64, error: String) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = Request::new(
            7,
            Command::Start {
                config_path: PathBuf::from("/srv/apps.toml"),
            },
        );
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"id":7,"command":{"Start":{"config_path":"/srv/apps.toml"}}}"#
        );
    }

    #[test]
    fn test_error_response_carries_message() {
        let response = Response::error(3, "App not found: web".to_string());
        let json = serde_json::to_string(&response).unwrap();
        let decoded: Response = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.id, 3);
        assert_eq!(decoded.result.unwrap_err(), "App not found: web");
    }
}
