// IPC Client - Communicates with the daemon via Unix socket

use crate::error::{OverseerError, Result};
use crate::ipc::{Command, Request, Response, ResponseData};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Maximum number of connection retry attempts
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// IPC client for communicating with the daemon
pub struct IpcClient {
    socket_path: PathBuf,
    request_id: AtomicU64,
}

impl IpcClient {
    /// Create a new IPC client with a custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            request_id: AtomicU64::new(1),
        }
    }

    /// Send a command and return the daemon's answer, turning an error
    /// response into `OverseerError::DaemonError`
    pub fn call(&self, command: Command) -> Result<ResponseData> {
        self.send_command(command)?
            .result
            .map_err(OverseerError::DaemonError)
    }

    /// Send a command to the daemon and wait for a response
    pub fn send_command(&self, command: Command) -> Result<Response> {
        let request_id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(request_id, command);

        let mut last_error = None;
        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            match self.try_send_request(&request) {
                Ok(response) => {
                    if response.id != request_id {
                        return Err(OverseerError::ProtocolError(format!(
                            "Response ID mismatch: expected {}, got {}",
                            request_id, response.id
                        )));
                    }
                    return Ok(response);
                }
                // Nothing to retry against
                Err(OverseerError::DaemonNotRunning) => return Err(OverseerError::DaemonNotRunning),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRY_ATTEMPTS {
                        std::thread::sleep(RETRY_DELAY);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            OverseerError::ConnectionError("Failed to connect after retries".to_string())
        }))
    }

    /// Attempt to send a request to the daemon (single attempt)
    fn try_send_request(&self, request: &Request) -> Result<Response> {
        let mut stream = self.connect()?;

        let request_json = serde_json::to_string(request).map_err(|e| {
            OverseerError::SerializationError(format!("Failed to serialize request: {}", e))
        })?;

        writeln!(stream, "{}", request_json)
            .map_err(|e| OverseerError::IpcError(format!("Failed to write request: {}", e)))?;
        stream
            .flush()
            .map_err(|e| OverseerError::IpcError(format!("Failed to flush stream: {}", e)))?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader
            .read_line(&mut response_line)
            .map_err(|e| OverseerError::IpcError(format!("Failed to read response: {}", e)))?;

        serde_json::from_str(&response_line).map_err(|e| {
            OverseerError::DeserializationError(format!("Failed to deserialize response: {}", e))
        })
    }

    /// Establish a connection to the daemon's Unix socket
    fn connect(&self) -> Result<UnixStream> {
        if !self.socket_path.exists() {
            return Err(OverseerError::DaemonNotRunning);
        }

        UnixStream::connect(&self.socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused
                || e.kind() == std::io::ErrorKind::NotFound
            {
                OverseerError::DaemonNotRunning
            } else {
                OverseerError::ConnectionError(format!("Failed to connect to daemon: {}", e))
            }
        })
    }

    /// Whether a daemon is accepting connections on the socket
    pub fn is_daemon_reachable(&self) -> bool {
        self.connect().is_ok()
    }

    /// Get the socket path being used
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}
