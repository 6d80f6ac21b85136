// Integration tests for supervision: crash loops, limits, watch mode

use overseer::config::AppSpec;
use overseer::process::{
    AppState, AppStatus, ExitReport, InstanceState, MemorySampler, Supervisor, SupervisorConfig,
    SupervisorHandle,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, timeout, Instant};

/// Reports the same resident size for every process
struct FixedSampler(u64);

impl MemorySampler for FixedSampler {
    fn resident_bytes(&self, _pid: u32) -> Option<u64> {
        Some(self.0)
    }
}

fn config() -> SupervisorConfig {
    SupervisorConfig {
        poll_interval: Duration::from_millis(50),
        ..SupervisorConfig::default()
    }
}

fn sh(name: &str, script: &str) -> AppSpec {
    let mut spec = AppSpec::new(name, "/bin/sh");
    spec.args = vec!["-c".to_string(), script.to_string()];
    spec.restart_delay = Duration::from_millis(10);
    spec.stop_timeout = Duration::from_secs(2);
    spec
}

async fn app_status(handle: &SupervisorHandle, name: &str) -> AppStatus {
    handle
        .status()
        .await
        .unwrap()
        .into_iter()
        .find(|app| app.name == name)
        .unwrap_or_else(|| panic!("'{}' is not registered", name))
}

/// Poll until `check` accepts the app's status
async fn wait_until<F>(handle: &SupervisorHandle, name: &str, check: F) -> AppStatus
where
    F: Fn(&AppStatus) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let status = app_status(handle, name).await;
        if check(&status) {
            return status;
        }
        assert!(
            Instant::now() < deadline,
            "condition never held for '{}', last seen {:?}",
            name,
            status
        );
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_crash_loop_gives_up_after_max_restarts() {
    let (handle, _task) = Supervisor::spawn(config());

    let mut spec = sh("flaky", "exit 1");
    spec.max_restarts = 3;
    spec.restart_window = Duration::from_secs(10);
    handle.start(vec![spec]).await.unwrap();

    let status = wait_until(&handle, "flaky", |app| app.state == AppState::Crashed).await;
    let instance = &status.instances[0];
    assert_eq!(instance.state, InstanceState::Crashed);
    assert_eq!(instance.restart_count, 3);
    assert_eq!(instance.last_exit, Some(ExitReport::Code(1)));
    assert_eq!(instance.pid, None);
    assert!(!instance.relaunch_pending);

    // No further relaunch happens on its own
    sleep(Duration::from_millis(300)).await;
    let later = app_status(&handle, "flaky").await;
    assert_eq!(later.instances[0].restart_count, 3);
    assert_eq!(later.state, AppState::Crashed);
}

#[tokio::test]
async fn test_autorestart_disabled_settles_without_relaunch() {
    let (handle, _task) = Supervisor::spawn(config());

    let mut failing = sh("failing", "exit 3");
    failing.auto_restart = false;
    let mut finishing = sh("finishing", "exit 0");
    finishing.auto_restart = false;
    handle.start(vec![failing, finishing]).await.unwrap();

    let failed = wait_until(&handle, "failing", |app| app.state == AppState::Crashed).await;
    assert_eq!(failed.instances[0].restart_count, 0);
    assert_eq!(failed.instances[0].last_exit, Some(ExitReport::Code(3)));

    let finished = wait_until(&handle, "finishing", |app| app.state == AppState::Stopped).await;
    assert_eq!(finished.instances[0].restart_count, 0);
    assert_eq!(finished.instances[0].last_exit, Some(ExitReport::Code(0)));
}

#[tokio::test]
async fn test_clean_exit_is_relaunched_with_autorestart() {
    let (handle, _task) = Supervisor::spawn(config());
    handle
        .start(vec![sh("oneshot", "sleep 0.1; exit 0")])
        .await
        .unwrap();

    let status = wait_until(&handle, "oneshot", |app| app.total_restarts() >= 2).await;
    assert_eq!(status.instances[0].last_exit, Some(ExitReport::Code(0)));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_wins_over_pending_relaunch() {
    let (handle, _task) = Supervisor::spawn(config());

    let mut spec = sh("looping", "exit 1");
    spec.restart_delay = Duration::from_millis(200);
    spec.max_restarts = 100;
    handle.start(vec![spec]).await.unwrap();

    wait_until(&handle, "looping", |app| app.total_restarts() >= 1).await;
    timeout(Duration::from_secs(5), handle.stop("looping"))
        .await
        .unwrap()
        .unwrap();

    let stopped = app_status(&handle, "looping").await;
    assert_eq!(stopped.state, AppState::Stopped);
    let restarts = stopped.total_restarts();

    // Long enough for any timer armed before the stop to fire
    sleep(Duration::from_millis(800)).await;
    let later = app_status(&handle, "looping").await;
    assert_eq!(later.state, AppState::Stopped);
    assert_eq!(later.instances[0].pid, None);
    assert_eq!(later.total_restarts(), restarts);
}

#[tokio::test]
async fn test_memory_limit_triggers_relaunch() {
    let (handle, _task) = Supervisor::spawn(SupervisorConfig {
        sampler: Arc::new(FixedSampler(64 * 1024 * 1024)),
        ..config()
    });

    let mut spec = sh("hungry", "sleep 30");
    spec.memory_limit = Some(1024 * 1024);
    spec.max_restarts = 2;
    handle.start(vec![spec]).await.unwrap();

    // Every incarnation reads over the limit, so the loop ends at the threshold
    let status = wait_until(&handle, "hungry", |app| app.state == AppState::Crashed).await;
    let instance = &status.instances[0];
    assert_eq!(instance.restart_count, 2);
    assert_eq!(instance.last_exit, Some(ExitReport::Signal(9)));
}

#[tokio::test]
async fn test_memory_limit_without_autorestart_stops() {
    let (handle, _task) = Supervisor::spawn(SupervisorConfig {
        sampler: Arc::new(FixedSampler(64 * 1024 * 1024)),
        ..config()
    });

    let mut spec = sh("capped", "sleep 30");
    spec.memory_limit = Some(1024 * 1024);
    spec.auto_restart = false;
    handle.start(vec![spec]).await.unwrap();

    let status = wait_until(&handle, "capped", |app| app.state == AppState::Stopped).await;
    assert_eq!(status.instances[0].restart_count, 0);
    assert_eq!(status.instances[0].last_exit, Some(ExitReport::Signal(9)));
}

#[tokio::test]
async fn test_memory_under_limit_is_sampled() {
    let (handle, _task) = Supervisor::spawn(SupervisorConfig {
        sampler: Arc::new(FixedSampler(4096)),
        ..config()
    });

    let mut spec = sh("modest", "sleep 30");
    spec.memory_limit = Some(1024 * 1024);
    handle.start(vec![spec]).await.unwrap();

    let status = wait_until(&handle, "modest", |app| app.total_memory() == 4096).await;
    assert_eq!(status.state, AppState::Running);
    assert_eq!(status.total_restarts(), 0);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_watch_restarts_on_file_change() {
    let work_dir = TempDir::new().unwrap();
    std::fs::write(work_dir.path().join("app.conf"), "v1").unwrap();

    let (handle, _task) = Supervisor::spawn(config());
    let mut spec = sh("watched", "sleep 30");
    spec.working_directory = work_dir.path().to_path_buf();
    spec.watch = true;
    handle.start(vec![spec]).await.unwrap();

    let first_pid = app_status(&handle, "watched").await.instances[0].pid;
    sleep(Duration::from_millis(300)).await;
    std::fs::write(work_dir.path().join("app.conf"), "v2").unwrap();

    let status = wait_until(&handle, "watched", |app| {
        app.total_restarts() == 1 && app.state == AppState::Running
    })
    .await;
    assert_ne!(status.instances[0].pid, first_pid);

    // The new incarnation starts from a fresh baseline
    sleep(Duration::from_millis(300)).await;
    assert_eq!(app_status(&handle, "watched").await.total_restarts(), 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_during_fault_termination_keeps_app_stopped() {
    let work_dir = TempDir::new().unwrap();
    std::fs::write(work_dir.path().join("app.conf"), "v1").unwrap();

    let (handle, _task) = Supervisor::spawn(config());
    let mut spec = sh("stubborn", "trap '' TERM; while true; do sleep 0.1; done");
    spec.working_directory = work_dir.path().to_path_buf();
    spec.watch = true;
    spec.stop_timeout = Duration::from_secs(1);
    spec.restart_delay = Duration::from_millis(100);
    handle.start(vec![spec]).await.unwrap();

    sleep(Duration::from_millis(300)).await;
    std::fs::write(work_dir.path().join("app.conf"), "v2").unwrap();

    // SIGTERM is ignored, so the watch-triggered stop lingers until escalation
    wait_until(&handle, "stubborn", |app| {
        app.instances[0].state == InstanceState::Stopping
    })
    .await;
    timeout(Duration::from_secs(5), handle.stop("stubborn"))
        .await
        .unwrap()
        .unwrap();

    let stopped = app_status(&handle, "stubborn").await;
    assert_eq!(stopped.state, AppState::Stopped);
    assert_eq!(stopped.instances[0].last_exit, Some(ExitReport::Signal(9)));
    assert_eq!(stopped.total_restarts(), 0);

    // The relaunch the file change asked for never happens
    sleep(Duration::from_millis(500)).await;
    let later = app_status(&handle, "stubborn").await;
    assert_eq!(later.state, AppState::Stopped);
    assert_eq!(later.instances[0].pid, None);
    assert_eq!(later.total_restarts(), 0);
}

#[tokio::test]
async fn test_instances_get_distinct_identity() {
    let work_dir = TempDir::new().unwrap();

    let (handle, _task) = Supervisor::spawn(config());
    let mut spec = sh(
        "pool",
        "echo \"$OVERSEER_APP_NAME\" > \"marker-$OVERSEER_INSTANCE\"; sleep 30",
    );
    spec.working_directory = work_dir.path().to_path_buf();
    spec.instance_count = 3;
    handle.start(vec![spec]).await.unwrap();

    let status = app_status(&handle, "pool").await;
    let labels: Vec<&str> = status.instances.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["pool-0", "pool-1", "pool-2"]);

    let deadline = Instant::now() + Duration::from_secs(5);
    for index in 0..3 {
        let marker = work_dir.path().join(format!("marker-{}", index));
        while !marker.exists() {
            assert!(Instant::now() < deadline, "instance {} never ran", index);
            sleep(Duration::from_millis(20)).await;
        }
    }
    sleep(Duration::from_millis(50)).await;
    let contents = std::fs::read_to_string(work_dir.path().join("marker-2")).unwrap();
    assert_eq!(contents.trim(), "pool");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_clears_crashed_state() {
    let work_dir = TempDir::new().unwrap();
    let gate = work_dir.path().join("healthy");

    let (handle, _task) = Supervisor::spawn(config());
    let mut spec = sh("recovering", "test -f healthy || exit 1; sleep 30");
    spec.working_directory = work_dir.path().to_path_buf();
    spec.max_restarts = 2;
    handle.start(vec![spec]).await.unwrap();

    let crashed = wait_until(&handle, "recovering", |app| app.state == AppState::Crashed).await;
    assert_eq!(crashed.total_restarts(), 2);

    std::fs::write(&gate, "").unwrap();
    handle.restart("recovering").await.unwrap();

    let status = app_status(&handle, "recovering").await;
    assert_eq!(status.state, AppState::Running);
    assert_eq!(status.total_restarts(), 0);
    assert!(status.instances[0].pid.is_some());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_relaunch_is_reported_as_crashed() {
    let work_dir = TempDir::new().unwrap();
    let app_dir = work_dir.path().join("app");
    std::fs::create_dir(&app_dir).unwrap();

    let (handle, _task) = Supervisor::spawn(config());
    let mut spec = sh("vanishing", "sleep 0.3; exit 1");
    spec.working_directory = app_dir.clone();
    handle.start(vec![spec]).await.unwrap();

    // The relaunch after the first crash finds no working directory
    std::fs::remove_dir(&app_dir).unwrap();
    let status = wait_until(&handle, "vanishing", |app| app.state == AppState::Crashed).await;
    let instance = &status.instances[0];
    assert_eq!(instance.pid, None);
    assert!(!instance.relaunch_pending);
    let error = instance.last_error.as_deref().unwrap();
    assert!(error.contains("working directory not found"), "unexpected error: {}", error);

    std::fs::create_dir(&app_dir).unwrap();
    handle.restart("vanishing").await.unwrap();
    let recovered = app_status(&handle, "vanishing").await;
    assert!(recovered.instances[0].pid.is_some());
    assert_eq!(recovered.instances[0].last_error, None);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stopped_app_can_be_started_again() {
    let (handle, _task) = Supervisor::spawn(config());
    handle.start(vec![sh("again", "sleep 30")]).await.unwrap();
    handle.stop("again").await.unwrap();

    handle.start(vec![sh("again", "sleep 30")]).await.unwrap();
    let status = app_status(&handle, "again").await;
    assert_eq!(status.state, AppState::Running);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sleep_service_over_memory_ceiling_is_relaunched() {
    let config_dir = TempDir::new().unwrap();
    let config_path = config_dir.path().join("svc.json");
    std::fs::write(
        &config_path,
        r#"{ "name": "svc", "script": "/bin/sleep", "args": "100", "max_memory_restart": "1G" }"#,
    )
    .unwrap();
    let specs = AppSpec::from_file(&config_path).unwrap();
    assert_eq!(specs[0].memory_limit, Some(1024 * 1024 * 1024));

    let (handle, _task) = Supervisor::spawn(SupervisorConfig {
        sampler: Arc::new(FixedSampler(2 * 1024 * 1024 * 1024)),
        ..config()
    });
    handle.start(specs).await.unwrap();

    let status = wait_until(&handle, "svc", |app| app.total_restarts() >= 1).await;
    assert_eq!(status.instances[0].last_exit, Some(ExitReport::Signal(9)));
    handle.shutdown().await.unwrap();
}
