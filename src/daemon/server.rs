// Daemon core - wires the supervisor to the IPC server

use super::DaemonPaths;
use crate::config::AppSpec;
use crate::error::{OverseerError, Result};
use crate::ipc::{Command, DaemonCommand, IpcServer, LogOptions, ResponseData};
use crate::logs::{LogDir, LogEntry};
use crate::process::{Supervisor, SupervisorConfig, SupervisorHandle};
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared by every IPC connection handler
struct CommandContext {
    supervisor: SupervisorHandle,
    logs: LogDir,
    start_time: SystemTime,
    shutdown: Arc<Notify>,
}

/// Main daemon struct that coordinates all components
pub struct Daemon {
    supervisor: SupervisorHandle,
    supervisor_task: JoinHandle<()>,
    ipc_server: IpcServer,
    logs: LogDir,
    start_time: SystemTime,
}

impl Daemon {
    /// Create a daemon with the default supervisor settings. Needs a
    /// running tokio runtime.
    pub fn new(paths: &DaemonPaths) -> Result<Self> {
        Self::with_config(
            paths,
            SupervisorConfig {
                log_dir: Some(paths.log_dir.clone()),
                ..SupervisorConfig::default()
            },
        )
    }

    pub fn with_config(paths: &DaemonPaths, config: SupervisorConfig) -> Result<Self> {
        paths.ensure_dirs()?;
        let logs = LogDir::new(config.log_dir.clone().unwrap_or_else(|| paths.log_dir.clone()));
        let (supervisor, supervisor_task) = Supervisor::spawn(config);

        Ok(Self {
            supervisor,
            supervisor_task,
            ipc_server: IpcServer::with_socket_path(&paths.socket),
            logs,
            start_time: SystemTime::now(),
        })
    }

    /// Serve clients until `shutdown_signal` resolves or a client asks the
    /// daemon to stop, then stop every app and remove the socket.
    pub async fn run<S>(mut self, shutdown_signal: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        self.ipc_server.start()?;
        info!(
            "IPC server listening on: {}",
            self.ipc_server.socket_path().display()
        );

        let shutdown = Arc::new(Notify::new());
        let context = Arc::new(CommandContext {
            supervisor: self.supervisor.clone(),
            logs: self.logs.clone(),
            start_time: self.start_time,
            shutdown: Arc::clone(&shutdown),
        });

        let ipc_server = self.ipc_server;
        let server_handle = tokio::spawn(async move {
            let result = ipc_server
                .run(move |command| {
                    let context = Arc::clone(&context);
                    async move { handle_command(command, &context).await }
                })
                .await;

            if let Err(e) = result {
                error!("IPC server error: {}", e);
            }
        });

        tokio::select! {
            _ = shutdown_signal => info!("Received shutdown signal, stopping daemon..."),
            _ = shutdown.notified() => info!("Stop requested by client, stopping daemon..."),
        }

        // Dropping the server removes the socket
        server_handle.abort();
        let _ = server_handle.await;

        if let Err(e) = self.supervisor.shutdown().await {
            error!("Error during graceful shutdown of apps: {}", e);
        }
        if let Err(e) = self.supervisor_task.await {
            error!("Supervisor task failed: {}", e);
        }

        info!("Daemon shutdown complete");
        Ok(())
    }
}

async fn handle_command(command: Command, context: &CommandContext) -> Result<ResponseData> {
    match command {
        Command::Start { config_path } => {
            let specs = AppSpec::from_file(&config_path)?;
            info!(
                "Loaded {} app(s) from {}",
                specs.len(),
                config_path.display()
            );
            let apps = context.supervisor.start(specs).await?;
            Ok(ResponseData::Started { apps })
        }

        Command::Stop { name } => {
            context.supervisor.stop(&name).await?;
            Ok(ResponseData::Stopped { name })
        }

        Command::Restart { name } => {
            context.supervisor.restart(&name).await?;
            Ok(ResponseData::Restarted { name })
        }

        Command::Status => Ok(ResponseData::Status(context.supervisor.status().await?)),

        Command::Logs(options) => read_logs(options, context).await,

        Command::Delete { name } => {
            context.supervisor.delete(&name).await?;
            Ok(ResponseData::Deleted { name })
        }

        Command::Daemon(DaemonCommand::Status) => {
            let uptime = SystemTime::now()
                .duration_since(context.start_time)
                .unwrap_or_default();
            let apps = context.supervisor.status().await?.len();
            Ok(ResponseData::DaemonStatus {
                pid: std::process::id(),
                uptime,
                apps,
            })
        }

        Command::Daemon(DaemonCommand::Stop) => {
            context.shutdown.notify_one();
            Ok(ResponseData::Success("Daemon is shutting down".to_string()))
        }
    }
}

async fn read_logs(options: LogOptions, context: &CommandContext) -> Result<ResponseData> {
    let status = context.supervisor.status().await?;
    let app = status
        .iter()
        .find(|app| app.name == options.name)
        .ok_or_else(|| OverseerError::AppNotFound(options.name.clone()))?;

    let index = options.instance.unwrap_or(0);
    if index >= app.instances.len() {
        return Err(OverseerError::LogError(format!(
            "App '{}' has no instance {} (instances: {})",
            app.name,
            index,
            app.instances.len()
        )));
    }

    let entries = context.logs.tail(&app.name, index, options.lines).await?;
    Ok(ResponseData::Logs(entries.iter().map(LogEntry::format).collect()))
}
