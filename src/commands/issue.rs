//! Single-issue lookups and host actions.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{App, Output, to_json_string};
use crate::config::Settings;
use crate::git::Repository;
use crate::models::Issue;
use crate::reconciler::extract_identifier;
use crate::tracker::browse_url;
use crate::view::{IssueTarget, ViewNode, ViewProjector, render_tree};
use crate::{Error, Result};

/// Environment variable naming the browser command (conventional).
const BROWSER_ENV: &str = "BROWSER";

/// Environment variable naming a clipboard command that reads stdin.
const CLIPBOARD_ENV: &str = "TL_CLIPBOARD";

/// A resolved issue with its children.
#[derive(Debug, Serialize)]
pub struct IssueOutput {
    pub issue: Issue,
    pub sub_issues: Vec<Issue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Output for IssueOutput {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let node = ViewNode::Issue {
            issue_key: self.issue.key.clone(),
            branch_name: None,
            issue: Some(self.issue.clone()),
            sub_issues: self.sub_issues.clone(),
            is_active: false,
        };
        let mut text = render_tree(&[node], true);
        if let Some(url) = &self.url {
            text.push_str(url);
        }
        text.trim_end().to_string()
    }
}

/// Resolve a single issue through the cache.
pub async fn issue(app: &App, key: &str) -> Result<IssueOutput> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::InvalidInput("Issue key must not be empty".to_string()));
    }

    let issue = app
        .cache
        .resolve_issue(key)
        .await
        .ok_or_else(|| Error::NotFound(format!("Issue {} could not be resolved", key)))?;
    let sub_issues = app.cache.resolve_child_issues(key).await;

    Ok(IssueOutput {
        url: app.client.issue_url(&issue.key),
        issue,
        sub_issues,
    })
}

/// Issue key found in a branch name.
#[derive(Debug, Serialize)]
pub struct KeyOutput {
    pub branch: String,
    pub key: Option<String>,
}

impl Output for KeyOutput {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        match &self.key {
            Some(key) => key.clone(),
            None => format!("No issue key in branch {}", self.branch),
        }
    }
}

/// Apply the configured pattern to a branch name.
pub fn extract_key(settings: &Settings, branch: &str) -> KeyOutput {
    KeyOutput {
        branch: branch.to_string(),
        key: extract_identifier(&settings.branch_pattern, branch),
    }
}

#[derive(Debug, Serialize)]
pub struct OpenOutput {
    pub key: String,
    pub url: String,
}

impl Output for OpenOutput {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        format!("Opened {} ({})", self.key, self.url)
    }
}

/// Open an issue (or the checked-out branch's issue) in the browser.
pub async fn open(app: &App, repo_path: &Path, key: Option<String>) -> Result<OpenOutput> {
    let target = resolve_target(app, repo_path, key).await?;
    let key = target
        .issue_key()
        .ok_or_else(|| Error::InvalidInput("Could not determine issue key to open".to_string()))?
        .to_string();

    let base_url = app
        .settings
        .tracker
        .base_url
        .as_deref()
        .ok_or_else(|| {
            Error::InvalidInput("Issue tracker URL not configured. Run `tl configure`.".to_string())
        })?;
    let url = browse_url(base_url, &key);

    launch_browser(&url).await?;
    Ok(OpenOutput { key, url })
}

#[derive(Debug, Serialize)]
pub struct ClipboardOutput {
    pub key: String,
    pub copied: bool,
}

impl Output for ClipboardOutput {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        format!("Copied {} to clipboard", self.key)
    }
}

/// Copy an issue key (or the checked-out branch's key) to the clipboard.
pub async fn copy(app: &App, repo_path: &Path, key: Option<String>) -> Result<ClipboardOutput> {
    let target = resolve_target(app, repo_path, key).await?;
    let key = target
        .issue_key()
        .ok_or_else(|| Error::InvalidInput("Could not determine issue key to copy".to_string()))?
        .to_string();

    copy_to_clipboard(&key).await?;
    Ok(ClipboardOutput { key, copied: true })
}

/// An explicit key, else the view node of the checked-out branch, else the
/// key in the checked-out branch's name.
async fn resolve_target(app: &App, repo_path: &Path, key: Option<String>) -> Result<IssueTarget> {
    if let Some(key) = key {
        return Ok(IssueTarget::Key(key));
    }

    let repository = app.repository(repo_path).await?;
    let mut reconciler = app.reconciler();
    reconciler.set_repository(repository.clone());
    reconciler.on_repository_state_changed().await;

    let mut projector = ViewProjector::new();
    projector.update(Arc::new(reconciler.records().to_vec()));
    if let Some(node) = projector.active_node() {
        return Ok(IssueTarget::Node(node));
    }

    // The issue did not resolve; the key in the branch name is still usable
    let head = repository
        .head_branch()
        .await?
        .ok_or_else(|| Error::InvalidInput("HEAD is detached; pass an issue key".to_string()))?;
    reconciler
        .extract_identifier(&head)
        .map(IssueTarget::Key)
        .ok_or_else(|| Error::NotFound(format!("No issue key in branch {}", head)))
}

async fn launch_browser(url: &str) -> Result<()> {
    let (program, mut args) = match std::env::var(BROWSER_ENV) {
        Ok(browser) if !browser.trim().is_empty() => split_command(&browser),
        _ => default_browser(),
    };
    args.push(url.to_string());
    run_host_command(&program, &args, None).await
}

async fn copy_to_clipboard(text: &str) -> Result<()> {
    let (program, args) = match std::env::var(CLIPBOARD_ENV) {
        Ok(command) if !command.trim().is_empty() => split_command(&command),
        _ => default_clipboard(),
    };
    run_host_command(&program, &args, Some(text)).await
}

fn split_command(command: &str) -> (String, Vec<String>) {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next().unwrap_or_default();
    (program, parts.collect())
}

fn default_browser() -> (String, Vec<String>) {
    if cfg!(target_os = "macos") {
        ("open".to_string(), vec![])
    } else if cfg!(windows) {
        (
            "cmd".to_string(),
            vec!["/C".to_string(), "start".to_string(), String::new()],
        )
    } else {
        ("xdg-open".to_string(), vec![])
    }
}

fn default_clipboard() -> (String, Vec<String>) {
    if cfg!(target_os = "macos") {
        ("pbcopy".to_string(), vec![])
    } else if cfg!(windows) {
        ("clip".to_string(), vec![])
    } else if std::env::var_os("WAYLAND_DISPLAY").is_some() {
        ("wl-copy".to_string(), vec![])
    } else {
        (
            "xclip".to_string(),
            vec!["-selection".to_string(), "clipboard".to_string()],
        )
    }
}

async fn run_host_command(program: &str, args: &[String], stdin: Option<&str>) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Other(format!("Failed to run {}: {}", program, e)))?;

    if let (Some(text), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(text.as_bytes()).await?;
        // Close stdin so the command sees EOF
        drop(pipe);
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(Error::Other(format!(
            "{} failed: {}",
            program,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
