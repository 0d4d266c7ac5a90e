//! Common test utilities for tiller integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pollute
//! the user's `~/.config/tiller/` and `~/.local/share/tiller/` directories.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// A test environment with isolated configuration and data.
///
/// `repo_dir` is an (initially empty) working directory; `init_repo` turns
/// it into a git repository. `tl()` points `TL_CONFIG_DIR` and `TL_DATA_DIR`
/// into the temp dir per-invocation, making tests parallel-safe.
pub struct TestEnv {
    pub repo_dir: TempDir,
    pub home_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with isolated directories.
    pub fn new() -> Self {
        Self {
            repo_dir: TempDir::new().unwrap(),
            home_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a new test environment whose working directory is a git
    /// repository with one commit on `main`.
    pub fn with_repo() -> Self {
        let env = Self::new();
        env.init_repo();
        env
    }

    /// Get a Command for the tl binary with isolated config and data.
    pub fn tl(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tl"));
        cmd.current_dir(self.repo_dir.path());
        cmd.env("TL_CONFIG_DIR", self.config_path());
        cmd.env("TL_DATA_DIR", self.data_path());
        for var in ["TL_URL", "TL_USERNAME", "TL_API_TOKEN", "TL_REPO", "TL_LOG"] {
            cmd.env_remove(var);
        }
        cmd
    }

    pub fn repo_path(&self) -> &Path {
        self.repo_dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.home_dir.path().join("config")
    }

    pub fn data_path(&self) -> PathBuf {
        self.home_dir.path().join("data")
    }

    pub fn config_kdl(&self) -> PathBuf {
        self.config_path().join("config.kdl")
    }

    pub fn state_kdl(&self) -> PathBuf {
        self.data_path().join("state.kdl")
    }

    /// Write config.kdl verbatim.
    pub fn write_config(&self, content: &str) {
        std::fs::create_dir_all(self.config_path()).unwrap();
        std::fs::write(self.config_kdl(), content).unwrap();
    }

    /// Run git in the repo directory, panicking on failure.
    pub fn git(&self, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(self.repo_path())
            .env("GIT_AUTHOR_NAME", "Test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "Test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .status()
            .expect("Failed to run git");
        assert!(status.success(), "git {:?} failed", args);
    }

    pub fn init_repo(&self) {
        self.git(&["init", "-q"]);
        self.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        self.git(&["commit", "-q", "--allow-empty", "-m", "init"]);
    }

    /// Create a branch at HEAD without checking it out.
    pub fn branch(&self, name: &str) {
        self.git(&["branch", name]);
    }

    pub fn checkout(&self, name: &str) {
        self.git(&["checkout", "-q", name]);
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a command's stdout as JSON.
pub fn parse_json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("stdout is not valid JSON")
}
