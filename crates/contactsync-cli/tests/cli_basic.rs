//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against its own temporary home
//! directory, so config and databases never touch the real user data.

use std::path::Path;
use std::process::Command;

/// Run a CLI command and return (exit code, stdout, stderr).
fn run_cli(home: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_contactsync"))
        .args(args)
        .env("HOME", home)
        .env_remove("CONTACTSYNC_ENV")
        .env_remove("CONTACTSYNC_LOG")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

#[test]
fn test_contacts_add_list_remove() {
    let home = tempfile::tempdir().unwrap();

    let (code, stdout, _) = run_cli(
        home.path(),
        &["contacts", "add", "--name", "Ada", "--email", "ada@example.com"],
    );
    assert_eq!(code, 0, "contacts add failed");
    let id = stdout
        .trim()
        .strip_prefix("Contact created: ")
        .expect("created message")
        .to_string();

    let (code, stdout, _) = run_cli(home.path(), &["contacts", "list", "--json"]);
    assert_eq!(code, 0);
    let listed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["local_id"], id.as_str());
    assert_eq!(listed[0]["record"]["emails"][0]["value"], "ada@example.com");

    let (code, _, _) = run_cli(home.path(), &["contacts", "edit", &id, "--note", "math"]);
    assert_eq!(code, 0);
    let (_, stdout, _) = run_cli(home.path(), &["contacts", "show", &id, "--json"]);
    let shown: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(shown["record"]["note"], "math");
    assert_eq!(shown["record"]["name"], "Ada");

    let (code, _, _) = run_cli(home.path(), &["contacts", "remove", &id]);
    assert_eq!(code, 0);
    let (_, stdout, _) = run_cli(home.path(), &["contacts", "list"]);
    assert!(stdout.contains("No contacts."));
}

#[test]
fn test_contacts_show_unknown_fails() {
    let home = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["contacts", "show", "missing"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error: contact not found: missing"));
}

#[test]
fn test_config_set_get() {
    let home = tempfile::tempdir().unwrap();

    let (code, _, _) = run_cli(
        home.path(),
        &["config", "set", "remote.base_url", "https://dir.example.com"],
    );
    assert_eq!(code, 0);
    let (code, stdout, _) = run_cli(home.path(), &["config", "get", "remote.base_url"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "https://dir.example.com");

    let (code, _, _) = run_cli(home.path(), &["config", "set", "remote.page_size", "many"]);
    assert_eq!(code, 1);
}

#[test]
fn test_sync_run_requires_base_url() {
    let home = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["sync", "run"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("remote.base_url"));
}

#[test]
fn test_sync_status_and_reset_on_fresh_state() {
    let home = tempfile::tempdir().unwrap();

    let (code, stdout, _) = run_cli(home.path(), &["sync", "status", "--json"]);
    assert_eq!(code, 0);
    let status: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["last_sync_at"], serde_json::Value::Null);
    assert_eq!(status["correlated_count"], 0);

    let (code, _, _) = run_cli(home.path(), &["sync", "reset"]);
    assert_eq!(code, 0);
}

#[test]
fn test_completions_generate() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["completions", "bash"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("contactsync"));
}
