//! Smoke tests for the Tiller CLI.
//!
//! These tests verify basic CLI functionality:
//! - `tl --version` outputs version info
//! - `tl --help` outputs help text
//! - `tl` (no args) fails with usage

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a Command for the tl binary.
fn tl() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tl"))
}

#[test]
fn test_version_flag() {
    tl().arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tl"))
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_help_flag() {
    tl().arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("branches"))
        .stdout(predicate::str::contains("configure"));
}

#[test]
fn test_help_flag_short() {
    tl().arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn test_no_args_shows_usage() {
    tl().assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_config_help() {
    tl().args(["config", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("get"))
        .stdout(predicate::str::contains("set"));
}

#[test]
fn test_missing_repo_path_is_an_error() {
    tl().args(["-C", "/definitely/not/a/real/path", "branches"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
