use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

const CONNECTION_VARS: [&str; 8] = [
    "PG_URL",
    "PG_HOST",
    "PG_PORT",
    "PG_DB",
    "PG_USER",
    "PG_PASSWORD",
    "PG_SSLMODE",
    "PG_CONNECT_TIMEOUT_SECS",
];

/// Run the binary in `dir` with no tailer or connection settings inherited.
fn run_in(dir: &Path, args: &[&str]) -> Output {
    let bin_path = env!("CARGO_BIN_EXE_pg-log-tail");
    let mut command = Command::new(bin_path);
    command.args(args).current_dir(dir);
    for key in CONNECTION_VARS {
        command.env_remove(key);
    }
    for key in [
        "TAIL_CONFIG",
        "TAIL_SCHEMA",
        "TAIL_TABLE",
        "TAIL_SINK_PATH",
        "TAIL_CHECKPOINT_PATH",
        "TAIL_POLL_INTERVAL_MS",
        "TAIL_QUERY_TIMEOUT_SECS",
        "RUST_LOG",
    ] {
        command.env_remove(key);
    }
    command.output().expect("Failed to execute command")
}

#[test]
fn test_checkpoint_command() {
    let temp_dir = tempdir().unwrap();
    let dir = temp_dir.path();
    let state_file = dir.join("last_timestamp.state");

    // `checkpoint show` before anything was stored
    let output = run_in(dir, &["checkpoint", "show"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("does not exist"));
    assert!(stdout.contains("1970-01-01T00:00:00Z"));
    assert!(!state_file.exists());

    // `checkpoint set`
    let output = run_in(dir, &["checkpoint", "set", "2024-01-01T00:00:03Z"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("set to 2024-01-01T00:00:03Z"));
    assert_eq!(
        fs::read_to_string(&state_file).unwrap(),
        "2024-01-01T00:00:03Z"
    );

    // `checkpoint show` after set
    let output = run_in(dir, &["checkpoint", "show"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2024-01-01T00:00:03Z"));

    // Moving backwards needs --force
    let output = run_in(dir, &["checkpoint", "set", "2024-01-01T00:00:01Z"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Refusing to move checkpoint backwards"));
    assert_eq!(
        fs::read_to_string(&state_file).unwrap(),
        "2024-01-01T00:00:03Z"
    );

    let output = run_in(
        dir,
        &["checkpoint", "set", "2024-01-01T00:00:01Z", "--force"],
    );
    assert!(output.status.success());
    assert_eq!(
        fs::read_to_string(&state_file).unwrap(),
        "2024-01-01T00:00:01Z"
    );
}

#[test]
fn test_checkpoint_custom_path() {
    let temp_dir = tempdir().unwrap();
    let dir = temp_dir.path();

    let output = run_in(
        dir,
        &[
            "checkpoint",
            "--checkpoint",
            "custom.state",
            "set",
            "2024-02-03T04:05:06.789Z",
        ],
    );
    assert!(output.status.success());
    assert_eq!(
        fs::read_to_string(dir.join("custom.state")).unwrap(),
        "2024-02-03T04:05:06.789Z"
    );
    assert!(!dir.join("last_timestamp.state").exists());
}

#[test]
fn test_checkpoint_set_rejects_garbage() {
    let temp_dir = tempdir().unwrap();
    let output = run_in(temp_dir.path(), &["checkpoint", "set", "yesterday"]);
    assert!(!output.status.success());
    assert!(!temp_dir.path().join("last_timestamp.state").exists());
}

#[test]
fn test_run_without_connection_config_fails() {
    let temp_dir = tempdir().unwrap();
    let dir = temp_dir.path();

    let output = run_in(dir, &["run", "--once"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Missing connection configuration"));
    assert!(stderr.contains("PG_HOST"));
    assert!(stderr.contains("PG_PASSWORD"));

    // Nothing was written
    assert!(!dir.join("last_timestamp.state").exists());
    assert!(!dir.join("logs").exists());
}

#[test]
fn test_run_rejects_invalid_table_name() {
    let temp_dir = tempdir().unwrap();
    let output = run_in(temp_dir.path(), &["run", "--once", "--table", "log; DROP"]);
    assert!(!output.status.success());
}

#[test]
fn test_decode_command() {
    let temp_dir = tempdir().unwrap();
    let dir = temp_dir.path();
    let sink = dir.join("app.log");
    fs::write(
        &sink,
        "[2024-01-01T00:00:01.000000Z] info: id=1 message=\"User logged in\"\n\
         [2024-01-01T00:00:02.000000Z] warn: id=2 message=\"two\\nlines\"\n",
    )
    .unwrap();

    let output = run_in(dir, &["decode", "app.log"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let values: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0]["message"], "User logged in");
    assert_eq!(values[1]["level"], "warn");
    assert_eq!(values[1]["message"], "two\nlines");
}

#[test]
fn test_decode_missing_file_fails() {
    let temp_dir = tempdir().unwrap();
    let output = run_in(temp_dir.path(), &["decode", "nope.log"]);
    assert!(!output.status.success());
}
