//! Basic CLI E2E tests.
//!
//! Tests invoke the built binary with a throwaway config file and verify
//! outputs.

use std::path::Path;
use std::process::Command;

/// Run a CLI command against `config` and return (stdout, stderr, exit code).
fn run_cli(config: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_manifestos-cli"))
        .arg("--config-file")
        .arg(config)
        .args(args)
        .env_remove("MANIFESTOS_LOG")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn config_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
    dir.path().join("config.toml")
}

#[test]
fn test_reward_gold_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(
        &config_path(&dir),
        &[
            "reward",
            "gold",
            "--priority",
            "1",
            "--duration",
            "90",
            "--type",
            "learning",
            "--start",
            "2025-03-14T10:00:00Z",
            "--dimension",
            "knowledge",
            "--dimension",
            "career",
        ],
    );
    assert_eq!(code, 0, "reward gold failed");
    let record: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(record["final_gold"], 132);
    assert_eq!(record["difficulty"], "challenge");
}

#[test]
fn test_reward_gold_with_start_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(
        &config_path(&dir),
        &[
            "reward",
            "gold",
            "--priority",
            "1",
            "--duration",
            "90",
            "--type",
            "study",
            "--start",
            "2025-03-14T10:00:00Z",
            "--dimension",
            "a",
            "--dimension",
            "b",
            "--start-timed-out",
        ],
    );
    assert_eq!(code, 0);
    let record: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(record["final_gold"], 92);
    assert_eq!(record["start_timeout_penalty"], 40);
}

#[test]
fn test_reward_tables() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_path(&dir);

    let (stdout, _, code) = run_cli(&config, &["reward", "streak", "7"]);
    assert_eq!(code, 0);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["bonus"], 300);

    let (stdout, _, _) = run_cli(&config, &["reward", "delay", "0"]);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["penalty"], 0);

    let (stdout, _, _) = run_cli(&config, &["reward", "quality", "5", "--base", "20"]);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["adjustment"], 10);
}

#[test]
fn test_reward_habit_uses_ten_point_scale() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_path(&dir);

    let (stdout, _, code) = run_cli(&config, &["reward", "habit", "--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("severity 1-10"));

    let (stdout, _, code) = run_cli(&config, &["reward", "habit", "9"]);
    assert_eq!(code, 0);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["penalty"], 100);
}

#[test]
fn test_countdown_display() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_path(&dir);

    let (stdout, _, code) = run_cli(&config, &["countdown", "--kind", "start", "--seconds", "125"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "02:05");

    let (stdout, _, _) = run_cli(&config, &["countdown", "--kind", "finish", "--seconds", "125"]);
    assert_eq!(stdout.trim(), "2m 5s");

    let (stdout, _, _) = run_cli(&config, &["countdown", "--kind", "finish", "--seconds", "45"]);
    assert_eq!(stdout.trim(), "45s");
}

#[test]
fn test_config_set_get() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_path(&dir);

    let (_, _, code) = run_cli(&config, &["config", "set", "verification.start_window_secs", "60"]);
    assert_eq!(code, 0, "config set failed");

    let (stdout, _, code) = run_cli(&config, &["config", "get", "verification.start_window_secs"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "60");

    let (stdout, _, code) = run_cli(&config, &["config", "list"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("verification.start_window_secs = 60"));
}

#[test]
fn test_config_rejects_unknown_key() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(&config_path(&dir), &["config", "set", "verification.nope", "1"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}

fn write_tasks(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let tasks = serde_json::json!([
        {
            "id": "read",
            "title": "Read",
            "duration_minutes": 30,
            "scheduled_start": "2025-03-14T10:00:00Z",
            "scheduled_end": "2025-03-14T10:30:00Z",
            "task_type": "life",
            "verification": {
                "start_keywords": ["book"],
                "completion_keywords": ["bookmark"]
            }
        }
    ]);
    let path = dir.path().join("tasks.json");
    std::fs::write(&path, tasks.to_string()).unwrap();
    path
}

fn summary(stdout: &str) -> serde_json::Value {
    let last = stdout.lines().last().unwrap();
    serde_json::from_str(last).unwrap()
}

#[test]
fn test_simulate_verified_run() {
    let dir = tempfile::tempdir().unwrap();
    let tasks = write_tasks(&dir);
    let (stdout, stderr, code) = run_cli(
        &config_path(&dir),
        &[
            "simulate",
            tasks.to_str().unwrap(),
            "--accept-start",
            "--accept-complete",
        ],
    );
    assert_eq!(code, 0, "simulate failed: {stderr}");
    assert!(stdout.contains("\"type\":\"GoldAwarded\""));

    let summary = summary(&stdout);
    assert_eq!(summary["balance"], 8);
    assert_eq!(summary["tasks"][0]["status"], "completed");
    assert_eq!(summary["tasks"][0]["gold"], 8);
}

#[test]
fn test_simulate_unattended_run() {
    let dir = tempfile::tempdir().unwrap();
    let tasks = write_tasks(&dir);
    let (stdout, stderr, code) = run_cli(&config_path(&dir), &["simulate", tasks.to_str().unwrap()]);
    assert_eq!(code, 0, "simulate failed: {stderr}");

    let summary = summary(&stdout);
    assert_eq!(summary["balance"], 0);
    assert_eq!(summary["tasks"][0]["status"], "completed");
    assert_eq!(summary["tasks"][0]["start_timed_out"], true);
    assert_eq!(summary["tasks"][0]["completion_timed_out"], true);
}
