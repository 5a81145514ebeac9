//! CLI integration tests

use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;
use std::time::Duration;

use surge_lib::store::{FileStore, KvStore};

fn surgectl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_surgectl"))
        .args(args)
        .env_remove("SURGE_CONFIG")
        .env_remove("SURGE_STATE_PATH")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

async fn seed_state(path: &Path) {
    let store = Arc::new(FileStore::open(path).unwrap());
    store
        .put("lastAlertedIncreaseTs", "2024-01-01T00:05:00Z", None)
        .await
        .unwrap();
    store
        .put(
            "timeseries:2024-01-01T00:02:00Z",
            "8",
            Some(Duration::from_secs(86_400)),
        )
        .await
        .unwrap();
    store
        .put(
            "timeseries:2024-01-01T00:01:00Z",
            "5",
            Some(Duration::from_secs(86_400)),
        )
        .await
        .unwrap();
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = surgectl(&["--help"]);
    let stdout = stdout(&output);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("surge watcher"), "Should show app name");
    assert!(stdout.contains("run"), "Should show run command");
    assert!(stdout.contains("watermark"), "Should show watermark command");
    assert!(stdout.contains("archive"), "Should show archive command");
    assert!(stdout.contains("detect"), "Should show detect command");
}

#[test]
fn test_cli_version() {
    let output = surgectl(&["--version"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("surgectl"));
}

#[test]
fn test_invalid_command() {
    let output = surgectl(&["frobnicate"]);
    assert!(!output.status.success());
}

#[test]
fn test_run_without_credentials_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_surgectl"))
        .arg("run")
        .current_dir(dir.path())
        .env_clear()
        .env("HOME", dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SURGE_API_TOKEN"), "stderr: {}", stderr);
    assert!(stderr.contains("SURGE_SLACK_WEBHOOK_URL"), "stderr: {}", stderr);
}

#[tokio::test]
async fn test_watermark_show_json() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    seed_state(&state).await;

    let output = surgectl(&[
        "watermark",
        "show",
        "--state",
        state.to_str().unwrap(),
        "--format",
        "json",
    ]);

    assert!(output.status.success());
    let view: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(view["key"], "lastAlertedIncreaseTs");
    assert_eq!(view["watermark"], "2024-01-01T00:05:00Z");
}

#[tokio::test]
async fn test_watermark_never_moves_backward() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    seed_state(&state).await;
    let state_arg = state.to_str().unwrap();

    let backward = surgectl(&["watermark", "set", "2024-01-01T00:01:00Z", "--state", state_arg]);
    assert!(!backward.status.success());

    let forward = surgectl(&["watermark", "set", "2024-01-01T00:09:00Z", "--state", state_arg]);
    assert!(forward.status.success());

    let unconfirmed = surgectl(&["watermark", "clear", "--state", state_arg]);
    assert!(!unconfirmed.status.success());
    assert!(String::from_utf8_lossy(&unconfirmed.stderr).contains("--yes"));
    let kept = FileStore::open(&state).unwrap();
    assert_eq!(
        kept.get("lastAlertedIncreaseTs").await.unwrap().as_deref(),
        Some("2024-01-01T00:09:00Z")
    );

    let cleared = surgectl(&["watermark", "clear", "--yes", "--state", state_arg]);
    assert!(cleared.status.success());

    let store = FileStore::open(&state).unwrap();
    assert_eq!(store.get("lastAlertedIncreaseTs").await.unwrap(), None);
}

#[tokio::test]
async fn test_archive_list_and_get() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    seed_state(&state).await;
    let state_arg = state.to_str().unwrap();

    let output = surgectl(&["archive", "list", "--state", state_arg, "--format", "json"]);
    assert!(output.status.success());
    let points: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(points[0]["timestamp"], "2024-01-01T00:01:00Z");
    assert_eq!(points[1]["count"], 8);

    let hit = surgectl(&["archive", "get", "2024-01-01T00:02:00Z", "--state", state_arg]);
    assert!(hit.status.success());
    assert!(stdout(&hit).contains("= 8"));

    let miss = surgectl(&["archive", "get", "2024-01-01T00:03:00Z", "--state", state_arg]);
    assert!(!miss.status.success());
}

#[test]
fn test_detect_with_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let series = dir.path().join("series.json");
    std::fs::write(
        &series,
        r#"[
            {"timestamp":"2024-01-01T00:01:00Z","count":5},
            {"timestamp":"2024-01-01T00:02:00Z","count":5},
            {"timestamp":"2024-01-01T00:03:00Z","count":8},
            {"timestamp":"2024-01-01T00:04:00Z","count":8},
            {"timestamp":"2024-01-01T00:05:00Z","count":12}
        ]"#,
    )
    .unwrap();

    let output = surgectl(&[
        "detect",
        "--file",
        series.to_str().unwrap(),
        "--watermark",
        "2024-01-01T00:03:00Z",
        "--format",
        "json",
    ]);

    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(summary["detected"], 2);
    assert_eq!(summary["fresh"].as_array().unwrap().len(), 1);
    assert_eq!(summary["fresh"][0]["prevCount"], 8);
    assert_eq!(summary["watermark"], "2024-01-01T00:05:00Z");
}
