// Integration test for capturing instance output into log files

use overseer::config::AppSpec;
use overseer::logs::{LogDir, LogSource};
use overseer::process::spawn_process;
use tempfile::TempDir;

#[tokio::test]
async fn test_output_lands_in_instance_logs() {
    let temp_dir = TempDir::new().unwrap();
    let logs = LogDir::new(temp_dir.path().join("logs"));

    let mut spec = AppSpec::new("printer", "/bin/sh");
    spec.args = vec![
        "-c".to_string(),
        "for i in 1 2 3 4 5; do echo line-$i; done; echo broken >&2".to_string(),
    ];
    spec.instance_count = 2;

    let mut spawned = spawn_process(&spec, 1, Some(&logs)).unwrap();
    let status = spawned.child.wait().await.unwrap();
    assert!(status.success());

    assert!(logs.path("printer", 1, LogSource::Stdout).exists());
    assert!(!logs.path("printer", 0, LogSource::Stdout).exists());

    let entries = logs.tail("printer", 1, 2).await.unwrap();
    let formatted: Vec<String> = entries.iter().map(|e| e.format()).collect();
    assert_eq!(formatted, vec!["[OUT] line-4", "[OUT] line-5", "[ERR] broken"]);
}

#[tokio::test]
async fn test_relaunch_appends_to_existing_log() {
    let temp_dir = TempDir::new().unwrap();
    let logs = LogDir::new(temp_dir.path());

    let mut spec = AppSpec::new("counter", "/bin/sh");
    spec.args = vec!["-c".to_string(), "echo run".to_string()];

    for _ in 0..3 {
        let mut spawned = spawn_process(&spec, 0, Some(&logs)).unwrap();
        spawned.child.wait().await.unwrap();
    }

    let entries = logs.tail("counter", 0, 100).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.source == LogSource::Stdout));

    logs.remove("counter", 1);
    assert!(logs.tail("counter", 0, 100).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_binary_output_does_not_break_tail() {
    let temp_dir = TempDir::new().unwrap();
    let logs = LogDir::new(temp_dir.path());

    let mut spec = AppSpec::new("svc", "/bin/sh");
    spec.args = vec![
        "-c".to_string(),
        r"echo 'good line'; printf '\377\376 binary\n'; echo 'last good'".to_string(),
    ];

    let mut spawned = spawn_process(&spec, 0, Some(&logs)).unwrap();
    spawned.child.wait().await.unwrap();

    let entries = logs.tail("svc", 0, 10).await.unwrap();
    let messages: Vec<&str> = entries.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["good line", "\u{FFFD}\u{FFFD} binary", "last good"]);
}
