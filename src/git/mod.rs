//! Repository access.
//!
//! The reconciler only sees the [`Repository`] trait: the checked-out
//! branch, a filtered and capped branch listing, and a subscription to
//! "something changed" events. [`GitCliRepository`] implements it by
//! shelling out to `git` and watching the git directory.

mod watch;

use std::path::{Path, PathBuf};
use std::process::Output;

use futures::FutureExt;
use futures::future::BoxFuture;
use regex::Regex;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Signal that HEAD or a local branch ref moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange;

/// A live stream of [`StateChange`] events.
///
/// Dropping the subscription stops whatever produces the events.
pub struct StateSubscription {
    rx: mpsc::UnboundedReceiver<StateChange>,
    _guard: Option<Box<dyn Send>>,
}

impl StateSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<StateChange>) -> Self {
        Self { rx, _guard: None }
    }

    /// Keep `guard` alive for as long as the subscription is.
    pub fn with_guard(rx: mpsc::UnboundedReceiver<StateChange>, guard: impl Send + 'static) -> Self {
        Self {
            rx,
            _guard: Some(Box::new(guard)),
        }
    }

    /// Wait for the next change. `None` once the producer is gone.
    pub async fn changed(&mut self) -> Option<StateChange> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for StateSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSubscription")
            .field("guarded", &self._guard.is_some())
            .finish()
    }
}

/// Which branches to list.
#[derive(Debug, Clone, Default)]
pub struct BranchQuery {
    /// Keep only names matching this pattern
    pub pattern: Option<Regex>,
    /// Keep at most this many (after filtering)
    pub limit: Option<usize>,
}

impl BranchQuery {
    /// Query for `pattern` capped at `max_branches` (0 = unlimited).
    pub fn new(pattern: Regex, max_branches: usize) -> Self {
        Self {
            pattern: Some(pattern),
            limit: (max_branches > 0).then_some(max_branches),
        }
    }

    /// Filter and cap branch names that are already ordered most recent first.
    pub fn apply(&self, branches: Vec<String>) -> Vec<String> {
        let matching = branches.into_iter().filter(|name| {
            self.pattern
                .as_ref()
                .is_none_or(|pattern| pattern.is_match(name))
        });
        match self.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }
}

/// What the reconciler needs from a repository.
pub trait Repository: Send + Sync {
    /// Working tree root.
    fn root(&self) -> &Path;

    /// Name of the checked-out branch, `None` when HEAD is detached.
    fn head_branch(&self) -> BoxFuture<'_, Result<Option<String>>>;

    /// Local branches, most recent commit first, filtered by `query`.
    fn branches<'a>(&'a self, query: &'a BranchQuery) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Subscribe to HEAD and branch ref changes.
    fn watch_state(&self) -> Result<StateSubscription>;
}

/// Repository backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCliRepository {
    root: PathBuf,
    git_dir: PathBuf,
    common_dir: PathBuf,
}

impl GitCliRepository {
    /// Locate the repository containing `path`.
    ///
    /// Fails when `git` cannot be run or `path` is not inside a work tree.
    pub async fn discover(path: &Path) -> Result<Self> {
        let output = run_git(
            path,
            &[
                "rev-parse",
                "--show-toplevel",
                "--absolute-git-dir",
                "--git-common-dir",
            ],
        )
        .await?;

        if !output.status.success() {
            return Err(Error::NotARepository(format!(
                "{}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines().map(str::trim);
        let (Some(root), Some(git_dir), Some(common_dir)) = (lines.next(), lines.next(), lines.next())
        else {
            return Err(Error::NotARepository(format!(
                "{}: not inside a work tree",
                path.display()
            )));
        };

        let common_dir = PathBuf::from(common_dir);
        let common_dir = if common_dir.is_absolute() {
            common_dir
        } else {
            path.join(common_dir)
        };

        tracing::debug!("Discovered repository at {}", root);
        Ok(Self {
            root: PathBuf::from(root),
            git_dir: PathBuf::from(git_dir),
            common_dir,
        })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    async fn git(&self, args: &[&str]) -> Result<Output> {
        run_git(&self.root, args).await
    }
}

impl Repository for GitCliRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    fn head_branch(&self) -> BoxFuture<'_, Result<Option<String>>> {
        async move {
            let output = self
                .git(&["symbolic-ref", "--quiet", "--short", "HEAD"])
                .await?;

            // Exit status 1 with --quiet means HEAD is detached
            if !output.status.success() {
                return Ok(None);
            }
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok((!name.is_empty()).then_some(name))
        }
        .boxed()
    }

    fn branches<'a>(&'a self, query: &'a BranchQuery) -> BoxFuture<'a, Result<Vec<String>>> {
        async move {
            let output = self
                .git(&[
                    "for-each-ref",
                    "--sort=-committerdate",
                    "--format=%(refname:short)",
                    "refs/heads/",
                ])
                .await?;

            if !output.status.success() {
                return Err(Error::Git(format!(
                    "git for-each-ref failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }

            let all = String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            Ok(query.apply(all))
        }
        .boxed()
    }

    fn watch_state(&self) -> Result<StateSubscription> {
        watch::watch_refs(&self.git_dir, &self.common_dir)
    }
}

async fn run_git(cwd: &Path, args: &[&str]) -> Result<Output> {
    Command::new("git")
        .args(args)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::Git(format!("Failed to run git: {}", e)))
}
