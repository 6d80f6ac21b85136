use anyhow::Context;
use clap::Parser;
use overseer::daemon::{daemonize, Daemon, DaemonManager, DaemonPaths, PidFile};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Overseer daemon - owns the supervisor and serves CLI requests
#[derive(Parser)]
#[command(name = "overseer-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Detach from the terminal and log to $OVERSEER_HOME/daemon.log
    #[arg(long)]
    daemonize: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let paths = DaemonPaths::from_env();
    paths.ensure_dirs()?;

    let daemon_manager = DaemonManager::with_pid_file(PidFile::with_path(&paths.pid_file));
    if daemon_manager.is_running() {
        anyhow::bail!(
            "Daemon already running (PID file: {})",
            paths.pid_file.display()
        );
    }

    // Forking is only safe before the runtime spawns its threads
    if args.daemonize {
        daemonize(&paths.daemon_log)?;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(!args.daemonize)
        .init();

    daemon_manager.register_daemon()?;
    info!(
        "Starting overseer daemon (PID {}, home {})",
        std::process::id(),
        paths.home.display()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let result = runtime.block_on(async {
        let daemon = Daemon::new(&paths)?;
        daemon.run(shutdown_signal()).await
    });

    daemon_manager.unregister_daemon()?;
    result.context("Daemon exited with an error")
}

/// Resolves on SIGTERM or SIGINT
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                warn!("Failed to install signal handlers, falling back to Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}
