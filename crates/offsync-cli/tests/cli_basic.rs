//! Basic CLI E2E tests.
//!
//! Tests invoke CLI commands via cargo run against a throwaway HOME and
//! verify outputs. None of them need network access.

use std::path::Path;
use std::process::Command;

/// Run a CLI command and return (exit code, stdout, stderr).
fn run_cli(home: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new("cargo")
        .args(["run", "-q", "-p", "offsync-cli", "--"])
        .args(args)
        .env("HOME", home)
        .env_remove("OFFSYNC_ENV")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

#[test]
fn test_next_weekly() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(
        home.path(),
        &[
            "next",
            "--config",
            r#"{"frequency":"weekly","interval":1,"byWeekDays":[1,3]}"#,
            "--from",
            "2024-01-01T09:00:00Z",
        ],
    );
    assert_eq!(code, 0, "next failed");
    assert_eq!(stdout.trim(), "2024-01-03T09:00:00+00:00");
}

#[test]
fn test_next_without_frequency() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["next", "--config", "{}"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("no further occurrences"));
}

#[test]
fn test_config_set_get() {
    let home = tempfile::tempdir().unwrap();
    let (code, _, _) = run_cli(home.path(), &["config", "set", "dispatcher.max_retries", "7"]);
    assert_eq!(code, 0, "config set failed");

    let (code, stdout, _) = run_cli(home.path(), &["config", "get", "dispatcher.max_retries"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "7");
}

#[test]
fn test_config_get_unknown_key() {
    let home = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["config", "get", "nope.nothing"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("unknown key"));
}

#[test]
fn test_queue_list_json_empty() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["queue", "list", "--json"]);
    assert_eq!(code, 0, "queue list failed");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed, serde_json::json!([]));
}

#[test]
fn test_tombstones_and_stats_on_fresh_store() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["tombstones", "list"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("No tombstones."));

    let (code, stdout, _) = run_cli(home.path(), &["stats"]);
    assert_eq!(code, 0);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["totalProcessed"], 0);
}

#[test]
fn test_sync_without_remote_fails_cleanly() {
    let home = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["sync"]);
    assert_ne!(code, 0);
    assert!(stderr.starts_with("error:") || stderr.contains("error:"));
}
