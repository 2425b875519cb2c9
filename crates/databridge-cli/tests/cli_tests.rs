//! Integration tests for the `databridge` CLI binary.
//!
//! These tests exercise the CLI as a subprocess, verifying exit codes and
//! stdout/stderr output. None of them require a running `databridge-server`
//! — commands that do hit the network are pointed at an address nothing is
//! listening on, and we assert the exit-code taxonomy (spec §6) plus the
//! error surfacing around a failed connection.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::process::Command;

/// Helper: locate the `databridge` binary built by `cargo test`.
fn databridge_bin() -> String {
    let path = env!("CARGO_BIN_EXE_databridge");
    assert!(
        Path::new(path).exists(),
        "databridge binary not found at {path}"
    );
    path.to_owned()
}

/// Helper: run databridge with args against an unreachable server and
/// return (`exit_code`, stdout, stderr).
fn run(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(databridge_bin())
        .args(args)
        .env("DATABRIDGE_ADDR", "http://127.0.0.1:19999")
        .output()
        .expect("failed to execute databridge");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

// ── Version & help ───────────────────────────────────────────────────

#[test]
fn test_version_flag() {
    let (code, stdout, _) = run(&["--version"]);
    assert_eq!(code, 0, "databridge --version should exit 0");
    assert!(
        stdout.contains("databridge"),
        "version output should contain 'databridge': {stdout}"
    );
}

#[test]
fn test_help_flag() {
    let (code, stdout, _) = run(&["--help"]);
    assert_eq!(code, 0, "databridge --help should exit 0");
    assert!(
        stdout.contains("status"),
        "help should list 'status' command: {stdout}"
    );
    assert!(
        stdout.contains("connector"),
        "help should list 'connector' command: {stdout}"
    );
    assert!(
        stdout.contains("monitor"),
        "help should list 'monitor' command: {stdout}"
    );
}

#[test]
fn test_subcommand_help() {
    for sub in ["connector", "monitor"] {
        let (code, stdout, _) = run(&[sub, "--help"]);
        assert_eq!(code, 0, "{sub} --help should exit 0");
        assert!(!stdout.is_empty(), "{sub} --help should produce output");
    }
}

#[test]
fn test_missing_subcommand_fails() {
    let (code, _, stderr) = run(&[]);
    assert_ne!(code, 0, "invoking with no subcommand should fail");
    assert!(!stderr.is_empty(), "clap should print a usage error");
}

// ── Commands against an unreachable server ───────────────────────────
// The CLI carries no internal dependency on databridge-core or a stub
// server, so every networked command is exercised against a closed port
// and we assert it maps to a non-zero exit with a clear error.

#[test]
fn test_status_unreachable_server() {
    let (code, _, stderr) = run(&["status"]);
    assert_ne!(code, 0, "status against an unreachable server should fail");
    assert!(
        stderr.contains("Error"),
        "should report a connection error: {stderr}"
    );
}

#[test]
fn test_seal_status_unreachable_server() {
    let (code, _, stderr) = run(&["seal-status"]);
    assert_ne!(
        code, 0,
        "seal-status against an unreachable server should fail"
    );
    assert!(
        stderr.contains("Error"),
        "should report a connection error: {stderr}"
    );
}

#[test]
fn test_init_unreachable_server() {
    let (code, _, stderr) = run(&["init", "--shares", "5", "--threshold", "3"]);
    assert_ne!(code, 0, "init against an unreachable server should fail");
    assert!(
        stderr.contains("Error"),
        "should report a connection error: {stderr}"
    );
}

#[test]
fn test_unseal_unreachable_server() {
    let (code, _, stderr) = run(&["unseal", "dGVzdC1zaGFyZQ=="]);
    assert_ne!(code, 0, "unseal against an unreachable server should fail");
    assert!(
        stderr.contains("Error"),
        "should report a connection error: {stderr}"
    );
}

#[test]
fn test_connector_list_unreachable_server() {
    let (code, _, stderr) = run(&["connector", "list"]);
    assert_ne!(
        code, 0,
        "connector list against an unreachable server should fail"
    );
    assert!(
        stderr.contains("Error"),
        "should report a connection error: {stderr}"
    );
}

#[test]
fn test_connector_register_missing_required_args() {
    // `username`/`password` are required; clap should reject before any
    // network call is attempted.
    let (code, _, stderr) = run(&["connector", "register", "db1", "postgresql://host/db"]);
    assert_ne!(code, 0, "register without credentials should fail");
    assert!(
        stderr.contains("required") || stderr.contains("error"),
        "should report missing required arguments: {stderr}"
    );
}

#[test]
fn test_connector_schema_unreachable_server() {
    let (code, _, stderr) = run(&["connector", "schema", "db1"]);
    assert_ne!(
        code, 0,
        "connector schema against an unreachable server should fail"
    );
    assert!(
        stderr.contains("Error"),
        "should report a connection error: {stderr}"
    );
}

#[test]
fn test_monitor_health_unreachable_server() {
    let (code, _, stderr) = run(&["monitor", "health"]);
    assert_ne!(
        code, 0,
        "monitor health against an unreachable server should fail"
    );
    assert!(
        stderr.contains("Error"),
        "should report a connection error: {stderr}"
    );
}

#[test]
fn test_monitor_alerts_unreachable_server() {
    let (code, _, stderr) = run(&["monitor", "alerts"]);
    assert_ne!(
        code, 0,
        "monitor alerts against an unreachable server should fail"
    );
    assert!(
        stderr.contains("Error"),
        "should report a connection error: {stderr}"
    );
}

#[test]
fn test_custom_addr_flag_is_honored() {
    // Passing --addr should override the env var entirely.
    let output = Command::new(databridge_bin())
        .args(["--addr", "http://127.0.0.1:19998", "status"])
        .env("DATABRIDGE_ADDR", "http://127.0.0.1:19999")
        .output()
        .expect("failed to execute databridge");
    assert!(
        !output.status.success(),
        "status against a closed port should fail regardless of which flag set it"
    );
}
