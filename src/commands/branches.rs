//! Branch listing, watching and refreshing.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use super::{App, Output, to_json_string};
use crate::Result;
use crate::git::Repository;
use crate::models::BranchRecord;
use crate::view::{ViewProjector, render_tree};

/// Tracked branches, in display order.
#[derive(Debug, Serialize)]
pub struct BranchesOutput {
    pub branches: Vec<BranchRecord>,
    pub count: usize,
    #[serde(skip)]
    pub expand: bool,
}

impl BranchesOutput {
    fn new(records: &[BranchRecord], expand: bool) -> Self {
        Self {
            branches: records.to_vec(),
            count: records.len(),
            expand,
        }
    }
}

impl Output for BranchesOutput {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        if self.branches.is_empty() {
            return "No tracked branches.".to_string();
        }
        let mut projector = ViewProjector::new();
        projector.update(Arc::new(self.branches.clone()));
        render_tree(&projector.roots(), self.expand)
            .trim_end()
            .to_string()
    }
}

/// Enumerate and resolve the branches of the repository at `repo_path`.
pub async fn branches(app: &App, repo_path: &Path, expand: bool) -> Result<BranchesOutput> {
    let repository = app.repository(repo_path).await?;
    let mut reconciler = app.reconciler();
    reconciler.open_repository(repository).await;
    Ok(BranchesOutput::new(reconciler.records(), expand))
}

/// Clear both cache tiers and resolve every branch again.
pub async fn refresh(app: &App, repo_path: &Path) -> Result<BranchesOutput> {
    let repository = app.repository(repo_path).await?;
    let mut reconciler = app.reconciler();
    reconciler.set_repository(repository);
    reconciler.manual_refresh().await;
    Ok(BranchesOutput::new(reconciler.records(), false))
}

/// Reconcile continuously, calling `on_update` with every published list,
/// until Ctrl-C.
pub async fn watch<F>(app: &App, repo_path: &Path, expand: bool, mut on_update: F) -> Result<()>
where
    F: FnMut(&BranchesOutput),
{
    let repository = app.repository(repo_path).await?;
    tracing::info!("Watching {}", repository.root().display());

    let (handle, task) = app.reconciler().spawn();
    let mut snapshots = handle.subscribe();
    handle.open_repository(repository)?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            snapshot = snapshots.recv() => match snapshot {
                Ok(snapshot) => on_update(&BranchesOutput::new(&snapshot, expand)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} stale snapshots", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::warn!("Could not listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    drop(handle);
    task.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::issue;

    #[test]
    fn test_branches_output_human() {
        let records = vec![BranchRecord::new(
            "ABC-1-foo",
            "ABC-1",
            Some(issue("ABC-1", "Foo")),
            Some(vec![]),
            true,
        )];
        let output = BranchesOutput::new(&records, false);
        assert_eq!(output.to_human(), "└── ✅ ✨ ABC-1 - Foo  (Current Branch)");

        let json: serde_json::Value = serde_json::from_str(&output.to_json()).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["branches"][0]["issue_key"], "ABC-1");
        assert_eq!(json["branches"][0]["is_active"], true);
        assert!(json.get("expand").is_none());
    }

    #[test]
    fn test_branches_output_empty() {
        let output = BranchesOutput::new(&[], true);
        assert_eq!(output.to_human(), "No tracked branches.");
        assert_eq!(output.to_json(), r#"{"branches":[],"count":0}"#);
    }
}
