//! CLI integration tests for passport-cli.
//!
//! These tests verify the CLI behavior by running the actual binary
//! against a temporary data directory and checking outputs and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const DEVICE_ID: &str = "6f1c5a52-7d1e-4a3b-9c55-2f7e0c9d1a10";

/// Get a Command for the passport binary bound to `data_dir`.
fn passport(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("passport").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("PASSPORT_ATTESTATION")
        .env_remove("PASSPORT_ALLOW_DUPLICATE_USERNAMES")
        .env("PASSPORT_DEVICE_ID", DEVICE_ID)
        .arg("--data-dir")
        .arg(data_dir.path());
    cmd
}

fn register(data_dir: &TempDir, username: &str) {
    passport(data_dir)
        .args(["--assume-yes", "register", username])
        .assert()
        .success();
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_displays_usage() {
    Command::cargo_bin("passport")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Key-based local sign-in"))
        .stdout(predicate::str::contains("register"))
        .stdout(predicate::str::contains("login"))
        .stdout(predicate::str::contains("forget-device"));
}

#[test]
fn test_version_displays_version() {
    Command::cargo_bin("passport")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("passport"));
}

#[test]
fn test_help_shows_exit_codes() {
    Command::cargo_bin("passport")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exit codes:"))
        .stdout(predicate::str::contains("66"))
        .stdout(predicate::str::contains("75"));
}

// ============================================================================
// Status and Registration
// ============================================================================

#[test]
fn test_status_on_fresh_data_dir() {
    let temp = TempDir::new().unwrap();

    passport(&temp)
        .args(["--format", "json", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"available\": true"))
        .stdout(predicate::str::contains(DEVICE_ID))
        .stdout(predicate::str::contains("\"accounts\": 0"));
}

#[test]
fn test_register_then_list_accounts() {
    let temp = TempDir::new().unwrap();
    register(&temp, "alice");

    passport(&temp)
        .arg("accounts")
        .assert()
        .success()
        .stdout(predicate::str::contains("alice"))
        .stdout(predicate::str::contains("1 device(s)"));

    passport(&temp)
        .args(["show", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(this device)"))
        .stdout(predicate::str::contains("attested"));

    assert!(temp.path().join("registry.json").exists());
    assert_eq!(
        std::fs::read_dir(temp.path().join("keys")).unwrap().count(),
        1
    );
}

#[test]
fn test_show_json_carries_no_secret_material() {
    let temp = TempDir::new().unwrap();
    register(&temp, "alice");

    let output = passport(&temp)
        .args(["--format", "json", "show", "alice"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout);
    let view: serde_json::Value = serde_json::from_str(&stdout).unwrap();

    assert_eq!(view["username"], "alice");
    assert_eq!(view["devices"][0]["this_device"], true);
    assert!(view["devices"][0].get("secret_key").is_none());
    assert!(view.get("password_digest").is_none());
}

#[test]
fn test_duplicate_username_is_usage_error() {
    let temp = TempDir::new().unwrap();
    register(&temp, "alice");

    passport(&temp)
        .args(["--assume-yes", "register", "alice"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("already taken"));
}

#[test]
fn test_declined_prompt_creates_nothing() {
    let temp = TempDir::new().unwrap();

    passport(&temp)
        .args(["register", "alice"])
        .write_stdin("n\n")
        .assert()
        .code(75)
        .stderr(predicate::str::contains("cancelled"));

    passport(&temp)
        .args(["--format", "json", "accounts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

// ============================================================================
// Sign-in
// ============================================================================

#[test]
fn test_login_with_device_key() {
    let temp = TempDir::new().unwrap();
    register(&temp, "alice");

    passport(&temp)
        .args(["login", "alice"])
        .write_stdin("y\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Welcome, alice!"));
}

#[test]
fn test_login_unknown_account_is_not_found() {
    let temp = TempDir::new().unwrap();

    passport(&temp)
        .args(["--assume-yes", "login", "nobody"])
        .assert()
        .code(66)
        .stderr(predicate::str::contains("--password"));
}

#[test]
fn test_forget_device_then_password_login_reenrolls() {
    let temp = TempDir::new().unwrap();
    passport(&temp)
        .args(["--assume-yes", "register", "alice", "--password", "secret"])
        .assert()
        .success();

    passport(&temp)
        .args(["--assume-yes", "forget-device", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No devices left"));

    passport(&temp)
        .arg("accounts")
        .assert()
        .success()
        .stdout(predicate::str::contains("No accounts on this device"));

    passport(&temp)
        .args(["--assume-yes", "login", "alice", "--password", "wrong"])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("Invalid credentials"));

    passport(&temp)
        .args(["--assume-yes", "login", "alice", "--password", "secret"])
        .assert()
        .success()
        .stdout(predicate::str::contains("enrolled for key sign-in"));

    passport(&temp)
        .arg("accounts")
        .assert()
        .success()
        .stdout(predicate::str::contains("alice"));
}

#[test]
fn test_password_cannot_enroll_key_only_account() {
    let temp = TempDir::new().unwrap();
    register(&temp, "alice");

    passport(&temp)
        .args(["--assume-yes", "forget-device", "alice"])
        .assert()
        .success();
    assert_eq!(
        std::fs::read_dir(temp.path().join("keys")).unwrap().count(),
        0
    );

    passport(&temp)
        .args(["--assume-yes", "login", "alice", "--password", "anything"])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("Invalid credentials"));

    passport(&temp)
        .arg("accounts")
        .assert()
        .success()
        .stdout(predicate::str::contains("No accounts on this device"));
}

#[test]
fn test_forget_user_removes_account_and_key() {
    let temp = TempDir::new().unwrap();
    register(&temp, "alice");

    passport(&temp)
        .args(["--assume-yes", "forget-user", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Account removed"));

    passport(&temp)
        .args(["show", "alice"])
        .assert()
        .code(66);
    assert_eq!(
        std::fs::read_dir(temp.path().join("keys")).unwrap().count(),
        0
    );
}

// ============================================================================
// Attestation
// ============================================================================

#[test]
fn test_retry_attestation_after_temporary_failure() {
    let temp = TempDir::new().unwrap();

    passport(&temp)
        .env("PASSPORT_ATTESTATION", "temporary")
        .args(["--assume-yes", "register", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pending (temporary failure)"));

    passport(&temp)
        .args(["retry-attestation", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Device key attested"));

    passport(&temp)
        .args(["retry-attestation", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to retry"));
}

#[test]
fn test_invalid_attestation_mode_rejected() {
    let temp = TempDir::new().unwrap();

    passport(&temp)
        .env("PASSPORT_ATTESTATION", "sometimes")
        .arg("status")
        .assert()
        .code(64);
}

// ============================================================================
// Quiet and Verbose Mode Tests
// ============================================================================

#[test]
fn test_quiet_mode_minimal_output() {
    let temp = TempDir::new().unwrap();

    let output = passport(&temp)
        .args(["--quiet", "--assume-yes", "register", "alice"])
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&output.get_output().stdout);
    assert!(
        stdout.trim().is_empty(),
        "Quiet mode should have no stdout, got: {}",
        stdout
    );
}

#[test]
fn test_color_never_no_ansi() {
    let temp = TempDir::new().unwrap();

    let output = passport(&temp)
        .args(["--color=never", "--assume-yes", "register", "alice"])
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&output.get_output().stdout);
    let stderr = String::from_utf8_lossy(&output.get_output().stderr);
    assert!(!stdout.contains("\x1b["));
    assert!(!stderr.contains("\x1b["));
}

#[test]
fn test_conflicting_verbose_quiet_rejected() {
    let temp = TempDir::new().unwrap();

    passport(&temp)
        .args(["--verbose", "--quiet", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}
