// Integration test driving a daemon through its socket

use overseer::daemon::{Daemon, DaemonPaths};
use overseer::ipc::{Command, DaemonCommand, IpcClient, LogOptions, ResponseData};
use overseer::process::{AppState, SupervisorConfig};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, timeout, Instant};

async fn call(client: &Arc<IpcClient>, command: Command) -> overseer::error::Result<ResponseData> {
    let client = Arc::clone(client);
    tokio::task::spawn_blocking(move || client.call(command))
        .await
        .unwrap()
}

async fn wait_for_socket(client: &Arc<IpcClient>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !client.is_daemon_reachable() {
        assert!(Instant::now() < deadline, "daemon socket never came up");
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_daemon_lifecycle_over_ipc() {
    let home = TempDir::new().unwrap();
    let paths = DaemonPaths::with_home(home.path().join("home"));

    let work_dir = TempDir::new().unwrap();
    let config_path = work_dir.path().join("apps.json");
    std::fs::write(
        &config_path,
        r#"{ "apps": [
            { "name": "greeter", "script": "/bin/sh", "args": ["-c", "echo hello; echo oops >&2; sleep 30"] }
        ] }"#,
    )
    .unwrap();

    let daemon = Daemon::with_config(
        &paths,
        SupervisorConfig {
            poll_interval: Duration::from_millis(50),
            log_dir: Some(paths.log_dir.clone()),
            ..SupervisorConfig::default()
        },
    )
    .unwrap();
    let daemon_task = tokio::spawn(daemon.run(std::future::pending::<()>()));

    let client = Arc::new(IpcClient::with_socket_path(&paths.socket));
    wait_for_socket(&client).await;

    let started = call(&client, Command::Start { config_path }).await.unwrap();
    assert!(matches!(started, ResponseData::Started { apps } if apps == vec!["greeter"]));

    match call(&client, Command::Status).await.unwrap() {
        ResponseData::Status(apps) => {
            assert_eq!(apps.len(), 1);
            assert_eq!(apps[0].name, "greeter");
            assert_eq!(apps[0].state, AppState::Running);
        }
        other => panic!("Expected status, got {:?}", other),
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let logs = call(
            &client,
            Command::Logs(LogOptions {
                name: "greeter".to_string(),
                instance: None,
                lines: 10,
            }),
        )
        .await
        .unwrap();

        if let ResponseData::Logs(lines) = logs {
            if lines.contains(&"[OUT] hello".to_string()) && lines.contains(&"[ERR] oops".to_string())
            {
                break;
            }
        }
        assert!(Instant::now() < deadline, "log lines never appeared");
        sleep(Duration::from_millis(50)).await;
    }

    // Asking for an instance the app does not have is an error
    let missing_instance = call(
        &client,
        Command::Logs(LogOptions {
            name: "greeter".to_string(),
            instance: Some(4),
            lines: 10,
        }),
    )
    .await;
    assert!(missing_instance.is_err());

    let stopped = call(
        &client,
        Command::Stop {
            name: "greeter".to_string(),
        },
    )
    .await
    .unwrap();
    assert!(matches!(stopped, ResponseData::Stopped { .. }));

    match call(&client, Command::Daemon(DaemonCommand::Status)).await.unwrap() {
        ResponseData::DaemonStatus { pid, apps, .. } => {
            assert_eq!(pid, std::process::id());
            assert_eq!(apps, 1);
        }
        other => panic!("Expected daemon status, got {:?}", other),
    }

    call(&client, Command::Daemon(DaemonCommand::Stop)).await.unwrap();
    timeout(Duration::from_secs(10), daemon_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!paths.socket.exists());
}

#[tokio::test]
async fn test_start_with_invalid_config_reports_error() {
    let home = TempDir::new().unwrap();
    let paths = DaemonPaths::with_home(home.path());

    let config_path = home.path().join("broken.toml");
    std::fs::write(&config_path, "name = \"x\"\nscript = \"/bin/true\"\ninstances = 0\n").unwrap();

    let daemon = Daemon::with_config(&paths, SupervisorConfig::default()).unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let daemon_task = tokio::spawn(daemon.run(async {
        let _ = stop_rx.await;
    }));

    let client = Arc::new(IpcClient::with_socket_path(&paths.socket));
    wait_for_socket(&client).await;

    let result = call(&client, Command::Start { config_path }).await;
    match result {
        Err(overseer::error::OverseerError::DaemonError(message)) => {
            assert!(message.contains("instances"), "unexpected message: {}", message)
        }
        other => panic!("Expected a config error, got {:?}", other),
    }

    match call(&client, Command::Status).await.unwrap() {
        ResponseData::Status(apps) => assert!(apps.is_empty()),
        other => panic!("Expected status, got {:?}", other),
    }

    stop_tx.send(()).unwrap();
    timeout(Duration::from_secs(10), daemon_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
