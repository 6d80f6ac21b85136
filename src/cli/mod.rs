// CLI module - User-facing command-line interface

mod output;

use crate::config::AppSpec;
use crate::daemon::{DaemonManager, DaemonPaths, PidFile, HOME_ENV};
use crate::daemon::manager::StopOutcome;
use crate::error::{OverseerError, Result};
use crate::ipc::{Command, DaemonCommand, IpcClient, LogOptions, ResponseData};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

/// How long `daemon start` waits for the socket to accept connections
const DAEMON_START_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `daemon stop` waits before SIGKILL; covers the apps' own stop timeouts
const DAEMON_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Overseer - a small process supervisor
#[derive(Parser)]
#[command(name = "overseer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every app declared in a config file (.json or .toml)
    Start {
        /// Path to the config file
        config: PathBuf,
    },

    /// Stop every instance of an app
    Stop {
        name: String,
    },

    /// Restart an app, clearing its crash history
    Restart {
        name: String,
    },

    /// Show all apps, or one app in detail
    #[command(alias = "list", alias = "ls")]
    Status {
        name: Option<String>,
    },

    /// Show the last lines an instance wrote
    Logs {
        name: String,

        /// Instance number
        #[arg(short, long)]
        instance: Option<usize>,

        /// Number of lines to display
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },

    /// Stop an app and forget it
    Delete {
        name: String,
    },

    /// Manage the daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon in the background
    Start,
    /// Stop the daemon and every app it supervises
    Stop,
    /// Check daemon status
    Status,
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute(&DaemonPaths::from_env())
    }

    /// Execute the parsed command
    fn execute(&self, paths: &DaemonPaths) -> Result<()> {
        let client = IpcClient::with_socket_path(&paths.socket);

        match &self.command {
            Commands::Start { config } => {
                // Reject a bad file before involving the daemon
                let specs = AppSpec::from_file(config)?;
                output::print_info(&format!(
                    "Loaded {} app(s) from {}",
                    specs.len(),
                    config.display()
                ));

                let config_path = config.canonicalize()?;
                if !client.is_daemon_reachable() {
                    start_daemon(paths, &client)?;
                }
                send(&client, Command::Start { config_path })
            }

            Commands::Stop { name } => send(&client, Command::Stop { name: name.clone() }),

            Commands::Restart { name } => send(&client, Command::Restart { name: name.clone() }),

            Commands::Status { name: None } => send(&client, Command::Status),

            Commands::Status { name: Some(name) } => match client.call(Command::Status)? {
                ResponseData::Status(apps) => {
                    let app = apps
                        .iter()
                        .find(|app| &app.name == name)
                        .ok_or_else(|| OverseerError::AppNotFound(name.clone()))?;
                    output::print_app_details(app);
                    Ok(())
                }
                other => Err(unexpected(&other)),
            },

            Commands::Logs {
                name,
                instance,
                lines,
            } => send(
                &client,
                Command::Logs(LogOptions {
                    name: name.clone(),
                    instance: *instance,
                    lines: *lines,
                }),
            ),

            Commands::Delete { name } => send(&client, Command::Delete { name: name.clone() }),

            Commands::Daemon { command } => match command {
                DaemonCommands::Start => {
                    if client.is_daemon_reachable() {
                        return Err(OverseerError::DaemonAlreadyRunning);
                    }
                    start_daemon(paths, &client)
                }
                DaemonCommands::Stop => stop_daemon(paths),
                DaemonCommands::Status => daemon_status(paths, &client),
            },
        }
    }
}

fn send(client: &IpcClient, command: Command) -> Result<()> {
    let data = client.call(command)?;
    output::print_success(&data);
    Ok(())
}

fn unexpected(data: &ResponseData) -> OverseerError {
    OverseerError::ProtocolError(format!("Unexpected response: {:?}", data))
}

/// `overseer-daemon` installed next to this executable
fn daemon_binary() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let daemon = exe.with_file_name("overseer-daemon");
    if daemon.exists() {
        Ok(daemon)
    } else {
        Err(OverseerError::DaemonError(format!(
            "Daemon binary not found at {}",
            daemon.display()
        )))
    }
}

/// Launch a detached daemon and wait until its socket accepts connections
fn start_daemon(paths: &DaemonPaths, client: &IpcClient) -> Result<()> {
    let binary = daemon_binary()?;
    let pb = output::create_progress_bar("Starting daemon...");

    let status = std::process::Command::new(&binary)
        .arg("--daemonize")
        .env(HOME_ENV, &paths.home)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => {}
        Ok(status) => {
            output::finish_progress_error(pb, "Daemon failed to start");
            return Err(OverseerError::DaemonError(format!(
                "{} exited with {}",
                binary.display(),
                status
            )));
        }
        Err(e) => {
            output::finish_progress_error(pb, "Daemon failed to start");
            return Err(e.into());
        }
    }

    if wait_for_socket(client, DAEMON_START_TIMEOUT) {
        output::finish_progress_success(pb, "Daemon started");
        Ok(())
    } else {
        output::finish_progress_error(pb, "Daemon did not come up");
        Err(OverseerError::DaemonError(format!(
            "No response on {} after {:?}; see {}",
            paths.socket.display(),
            DAEMON_START_TIMEOUT,
            paths.daemon_log.display()
        )))
    }
}

fn wait_for_socket(client: &IpcClient, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if client.is_daemon_reachable() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

fn stop_daemon(paths: &DaemonPaths) -> Result<()> {
    let manager = daemon_manager(&paths.pid_file);
    let pid = manager.get_pid().ok_or(OverseerError::DaemonNotRunning)?;

    let pb = output::create_progress_bar(&format!("Stopping daemon (PID: {})...", pid));
    match manager.stop_daemon(DAEMON_STOP_TIMEOUT) {
        Ok(StopOutcome::Graceful) => {
            output::finish_progress_success(pb, "Daemon stopped");
            Ok(())
        }
        Ok(StopOutcome::Killed) => {
            output::finish_progress_success(pb, "Daemon force-stopped with SIGKILL");
            Ok(())
        }
        Err(e) => {
            output::finish_progress_error(pb, "Failed to stop daemon");
            Err(e)
        }
    }
}

fn daemon_status(paths: &DaemonPaths, client: &IpcClient) -> Result<()> {
    let status = daemon_manager(&paths.pid_file).get_status();
    if !status.running {
        output::print_error("Daemon is not running");
        return Ok(());
    }

    match client.call(Command::Daemon(DaemonCommand::Status)) {
        Ok(data) => output::print_success(&data),
        Err(e) => {
            output::print_info(&format!(
                "Daemon process {} exists but does not answer: {}",
                status.pid.unwrap_or_default(),
                e
            ));
        }
    }
    Ok(())
}

fn daemon_manager(pid_file: &Path) -> DaemonManager {
    DaemonManager::with_pid_file(PidFile::with_path(pid_file))
}
