//! Branch reconciliation.
//!
//! [`BranchReconciler`] owns the ordered [`BranchList`]. It extracts issue
//! keys from branch names, resolves them through the [`CacheManager`],
//! merges the results and publishes a snapshot after every pass.
//!
//! Triggers arrive as [`ReconcileInput`] messages through a
//! [`ReconcilerHandle`]; one [`BranchReconciler::run`] loop processes them
//! in order alongside the repository's state-change events, so passes never
//! interleave.

use std::sync::Arc;

use futures::future::join_all;
use regex::Regex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::cache::CacheManager;
use crate::config::Settings;
use crate::git::{BranchQuery, Repository, StateChange, StateSubscription};
use crate::models::{BranchList, BranchRecord};
use crate::{Error, Result};

/// Published list of branch records.
pub type Snapshot = Arc<Vec<BranchRecord>>;

/// Snapshots kept for slow subscribers before they start lagging.
const SNAPSHOT_CAPACITY: usize = 16;

/// Something the reconciler should react to.
pub enum ReconcileInput {
    /// A repository became available; replaces any previous one.
    RepositoryOpened(Arc<dyn Repository>),
    /// Re-enumerate the current repository.
    Reconcile,
    /// HEAD or a branch ref moved.
    StateChanged,
    /// Drop all cached data and start over.
    ManualRefresh,
}

impl std::fmt::Debug for ReconcileInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileInput::RepositoryOpened(repo) => f
                .debug_tuple("RepositoryOpened")
                .field(&repo.root())
                .finish(),
            ReconcileInput::Reconcile => write!(f, "Reconcile"),
            ReconcileInput::StateChanged => write!(f, "StateChanged"),
            ReconcileInput::ManualRefresh => write!(f, "ManualRefresh"),
        }
    }
}

/// Sends inputs to a running reconciler and hands out subscriptions.
#[derive(Clone)]
pub struct ReconcilerHandle {
    inputs: mpsc::UnboundedSender<ReconcileInput>,
    publisher: broadcast::Sender<Snapshot>,
}

impl ReconcilerHandle {
    pub fn send(&self, input: ReconcileInput) -> Result<()> {
        self.inputs
            .send(input)
            .map_err(|_| Error::Other("Reconciler is no longer running".to_string()))
    }

    pub fn open_repository(&self, repository: Arc<dyn Repository>) -> Result<()> {
        self.send(ReconcileInput::RepositoryOpened(repository))
    }

    pub fn reconcile(&self) -> Result<()> {
        self.send(ReconcileInput::Reconcile)
    }

    pub fn state_changed(&self) -> Result<()> {
        self.send(ReconcileInput::StateChanged)
    }

    pub fn manual_refresh(&self) -> Result<()> {
        self.send(ReconcileInput::ManualRefresh)
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.publisher.subscribe()
    }
}

/// First capture group of `pattern` in `branch_name`.
pub fn extract_identifier(pattern: &Regex, branch_name: &str) -> Option<String> {
    pattern
        .captures(branch_name)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

/// Keeps the branch list in step with the repository and the tracker.
pub struct BranchReconciler {
    cache: Arc<CacheManager>,
    pattern: Regex,
    max_branches: usize,
    list: BranchList,
    repository: Option<Arc<dyn Repository>>,
    subscription: Option<StateSubscription>,
    publisher: broadcast::Sender<Snapshot>,
}

impl BranchReconciler {
    pub fn new(cache: Arc<CacheManager>, settings: &Settings) -> Self {
        let (publisher, _) = broadcast::channel(SNAPSHOT_CAPACITY);
        Self {
            cache,
            pattern: settings.branch_pattern.clone(),
            max_branches: settings.max_branches,
            list: BranchList::new(),
            repository: None,
            subscription: None,
            publisher,
        }
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.publisher.subscribe()
    }

    /// Current records in display order.
    pub fn records(&self) -> &[BranchRecord] {
        self.list.records()
    }

    pub fn extract_identifier(&self, branch_name: &str) -> Option<String> {
        extract_identifier(&self.pattern, branch_name)
    }

    /// Whether a state-change subscription is currently held.
    pub fn is_watching(&self) -> bool {
        self.subscription.is_some()
    }

    /// Move the reconciler onto a task, returning the handle that drives it.
    pub fn spawn(self) -> (ReconcilerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ReconcilerHandle {
            inputs: tx,
            publisher: self.publisher.clone(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    /// Process inputs and state changes until every handle is dropped.
    pub async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<ReconcileInput>) {
        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(input) => self.handle(input).await,
                    None => break,
                },
                change = next_change(&mut self.subscription) => match change {
                    Some(StateChange) => self.on_repository_state_changed().await,
                    None => {
                        tracing::debug!("State-change subscription closed");
                        self.subscription = None;
                    }
                },
            }
        }
        tracing::debug!("Reconciler stopped");
    }

    /// Apply a single input.
    pub async fn handle(&mut self, input: ReconcileInput) {
        tracing::debug!("Reconciler input: {:?}", input);
        match input {
            ReconcileInput::RepositoryOpened(repository) => self.open_repository(repository).await,
            ReconcileInput::Reconcile => self.enumerate_and_reconcile().await,
            ReconcileInput::StateChanged => self.on_repository_state_changed().await,
            ReconcileInput::ManualRefresh => self.manual_refresh().await,
        }
    }

    pub async fn open_repository(&mut self, repository: Arc<dyn Repository>) {
        tracing::info!("Repository opened: {}", repository.root().display());
        self.set_repository(repository);
        self.enumerate_and_reconcile().await;
    }

    /// Switch repositories without enumerating. The old subscription is dropped.
    pub fn set_repository(&mut self, repository: Arc<dyn Repository>) {
        self.subscription = None;
        self.repository = Some(repository);
    }

    /// Re-enumerate branches, resolve them concurrently and merge the results.
    pub async fn enumerate_and_reconcile(&mut self) {
        let Some(repository) = self.repository.clone() else {
            tracing::debug!("No repository open, nothing to reconcile");
            return;
        };

        // Never stack subscriptions: the old one goes before the new one exists
        self.subscription = None;
        match repository.watch_state() {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(e) => tracing::warn!("Could not watch repository state: {}", e),
        }

        let head = match repository.head_branch().await {
            Ok(head) => head,
            Err(e) => {
                tracing::warn!("Could not read checked-out branch: {}", e);
                None
            }
        };

        let query = BranchQuery::new(self.pattern.clone(), self.max_branches);
        let branches = match repository.branches(&query).await {
            Ok(branches) => branches,
            Err(e) => {
                tracing::error!("Error enumerating branches: {}", e);
                self.publish();
                return;
            }
        };

        let candidates: Vec<(String, String)> = branches
            .into_iter()
            .filter_map(|branch| {
                let key = self.extract_identifier(&branch)?;
                Some((branch, key))
            })
            .collect();
        tracing::info!("Reconciling {} branches", candidates.len());

        let cache = self.cache.as_ref();
        let resolutions = candidates.into_iter().map(|(branch, key)| {
            let is_active = head.as_deref() == Some(branch.as_str());
            resolve_record(cache, branch, key, is_active)
        });
        let records = join_all(resolutions).await;

        for record in records.into_iter().flatten() {
            self.list.merge(record);
        }
        self.publish();
    }

    /// Recompute the active flag after HEAD moved.
    pub async fn on_repository_state_changed(&mut self) {
        self.list.deactivate_all();

        let head = match &self.repository {
            Some(repository) => repository.head_branch().await.unwrap_or_else(|e| {
                tracing::warn!("Could not read checked-out branch: {}", e);
                None
            }),
            None => None,
        };

        if let Some(branch) = head {
            match self.extract_identifier(&branch) {
                Some(key) => {
                    if let Some(record) = resolve_record(&self.cache, branch, key, true).await {
                        self.list.merge(record);
                    }
                }
                None => tracing::debug!("Checked-out branch {} has no issue key", branch),
            }
        }
        self.publish();
    }

    /// Drop all cached data, publish the empty list, then enumerate again.
    pub async fn manual_refresh(&mut self) {
        tracing::info!("Manual refresh");
        self.cache.invalidate_all().await;
        self.list.clear();
        self.publish();
        self.enumerate_and_reconcile().await;
    }

    fn publish(&self) {
        let snapshot: Snapshot = Arc::new(self.list.snapshot());
        // No receivers is fine: nobody is looking yet
        let _ = self.publisher.send(snapshot);
    }
}

async fn next_change(subscription: &mut Option<StateSubscription>) -> Option<StateChange> {
    match subscription {
        Some(subscription) => subscription.changed().await,
        None => std::future::pending().await,
    }
}

/// Resolve a branch's issue and children; `None` drops the branch.
async fn resolve_record(
    cache: &CacheManager,
    branch_name: String,
    issue_key: String,
    is_active: bool,
) -> Option<BranchRecord> {
    let Some(issue) = cache.resolve_issue(&issue_key).await else {
        tracing::debug!("Issue {} for branch {} did not resolve", issue_key, branch_name);
        return None;
    };
    let sub_issues = cache.resolve_child_issues(&issue_key).await;
    Some(BranchRecord::new(
        branch_name,
        issue_key,
        Some(issue),
        Some(sub_issues),
        is_active,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryStore};
    use crate::config::CacheSettings;
    use crate::test_utils::{FakeRepository, FakeSource, issue};
    use std::time::Duration;

    fn reconciler(source: FakeSource) -> (BranchReconciler, Arc<FakeSource>, Arc<MemoryStore>) {
        let source = Arc::new(source);
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheManager::new(
            source.clone(),
            store.clone(),
            &CacheSettings::default(),
        ));
        (
            BranchReconciler::new(cache, &Settings::default()),
            source,
            store,
        )
    }

    fn keys(records: &[BranchRecord]) -> Vec<(&str, bool)> {
        records
            .iter()
            .map(|r| (r.issue_key.as_str(), r.is_active))
            .collect()
    }

    #[test]
    fn test_extract_identifier() {
        let pattern = Regex::new(r"([A-Z]+-\d+)").unwrap();
        assert_eq!(
            extract_identifier(&pattern, "feature/ABC-123-login").as_deref(),
            Some("ABC-123")
        );
        assert_eq!(extract_identifier(&pattern, "main"), None);
        assert_eq!(extract_identifier(&pattern, "abc-123"), None);

        let custom = Regex::new(r"^(?:feat|fix)/(\d+)").unwrap();
        assert_eq!(extract_identifier(&custom, "fix/42-typo").as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_end_to_end_active_first_and_failed_children_kept() {
        let source = FakeSource::new()
            .with_issue(issue("ABC-1", "Foo"))
            .with_issue(issue("ABC-2", "Bar"))
            .with_children("ABC-1", vec![issue("ABC-10", "Child")])
            .with_failing_children("ABC-2");
        let (mut reconciler, _source, _store) = reconciler(source);
        let mut rx = reconciler.subscribe();
        let repo = Arc::new(FakeRepository::new(&["ABC-2-bar", "ABC-1-foo"], Some("ABC-1-foo")));

        reconciler.open_repository(repo).await;

        let published = rx.recv().await.unwrap();
        assert_eq!(keys(&published), vec![("ABC-1", true), ("ABC-2", false)]);
        assert_eq!(published[0].children().len(), 1);
        assert_eq!(published[1].sub_issues.as_deref(), Some(&[][..]));
        assert_eq!(published[1].issue.as_ref().unwrap().summary, "Bar");
    }

    #[tokio::test]
    async fn test_unresolved_and_unmatched_branches_are_dropped() {
        let source = FakeSource::new().with_issue(issue("ABC-1", "Foo"));
        let (mut reconciler, _source, _store) = reconciler(source);
        let repo = Arc::new(FakeRepository::new(
            &["main", "ABC-404-gone", "ABC-1-foo"],
            Some("main"),
        ));

        reconciler.open_repository(repo).await;
        assert_eq!(keys(reconciler.records()), vec![("ABC-1", false)]);
    }

    #[tokio::test]
    async fn test_max_branches_caps_enumeration() {
        let source = FakeSource::new()
            .with_issue(issue("ABC-1", "One"))
            .with_issue(issue("ABC-2", "Two"))
            .with_issue(issue("ABC-3", "Three"));
        let source = Arc::new(source);
        let cache = Arc::new(CacheManager::new(
            source.clone(),
            Arc::new(MemoryStore::new()),
            &CacheSettings::default(),
        ));
        let settings = Settings {
            max_branches: 2,
            ..Settings::default()
        };
        let mut reconciler = BranchReconciler::new(cache, &settings);
        let repo = Arc::new(FakeRepository::new(
            &["ABC-3-c", "main", "ABC-2-b", "ABC-1-a"],
            None,
        ));

        reconciler.open_repository(repo).await;
        assert_eq!(keys(reconciler.records()), vec![("ABC-3", false), ("ABC-2", false)]);
        assert_eq!(source.issue_calls(), 2);
    }

    #[tokio::test]
    async fn test_enumeration_failure_publishes_current_list() {
        let source = FakeSource::new().with_issue(issue("ABC-1", "Foo"));
        let (mut reconciler, _source, _store) = reconciler(source);
        let repo = Arc::new(FakeRepository::new(&["ABC-1-foo"], None));
        reconciler.open_repository(repo.clone()).await;

        *repo.fail_enumeration.lock().unwrap() = true;
        let mut rx = reconciler.subscribe();
        reconciler.enumerate_and_reconcile().await;

        let published = rx.recv().await.unwrap();
        assert_eq!(keys(&published), vec![("ABC-1", false)]);
    }

    #[tokio::test]
    async fn test_subscription_is_replaced_not_stacked() {
        let (mut reconciler, _source, _store) = reconciler(FakeSource::new());
        let repo = Arc::new(FakeRepository::new(&[], None));

        reconciler.open_repository(repo.clone()).await;
        let first_tx = repo.state_tx.lock().unwrap().clone().unwrap();
        assert!(!first_tx.is_closed());

        reconciler.enumerate_and_reconcile().await;
        assert_eq!(repo.watch_calls(), 2);
        assert!(first_tx.is_closed());
        assert!(reconciler.is_watching());
    }

    #[tokio::test]
    async fn test_state_change_moves_active_record_to_front() {
        let source = FakeSource::new()
            .with_issue(issue("ABC-1", "Foo"))
            .with_issue(issue("ABC-2", "Bar"));
        let (mut reconciler, _source, _store) = reconciler(source);
        let repo = Arc::new(FakeRepository::new(&["ABC-1-foo", "ABC-2-bar"], Some("ABC-1-foo")));
        reconciler.open_repository(repo.clone()).await;
        assert_eq!(keys(reconciler.records()), vec![("ABC-1", true), ("ABC-2", false)]);

        repo.checkout("ABC-2-bar");
        reconciler.on_repository_state_changed().await;
        assert_eq!(keys(reconciler.records()), vec![("ABC-2", true), ("ABC-1", false)]);

        // A branch without a key leaves everything inactive
        repo.checkout("main");
        let mut rx = reconciler.subscribe();
        reconciler.on_repository_state_changed().await;
        let published = rx.recv().await.unwrap();
        assert_eq!(keys(&published), vec![("ABC-2", false), ("ABC-1", false)]);
    }

    #[tokio::test]
    async fn test_state_change_to_unresolvable_branch_publishes_inactive_list() {
        let source = FakeSource::new().with_issue(issue("ABC-1", "Foo"));
        let (mut reconciler, _source, _store) = reconciler(source);
        let repo = Arc::new(FakeRepository::new(&["ABC-1-foo"], Some("ABC-1-foo")));
        reconciler.open_repository(repo.clone()).await;

        repo.checkout("ABC-9-missing");
        reconciler.on_repository_state_changed().await;
        assert_eq!(keys(reconciler.records()), vec![("ABC-1", false)]);
    }

    #[tokio::test]
    async fn test_manual_refresh_publishes_empty_list_first() {
        let source = FakeSource::new().with_issue(issue("ABC-1", "Foo"));
        let (mut reconciler, source, store) = reconciler(source);
        let repo = Arc::new(FakeRepository::new(&["ABC-1-foo"], None));
        reconciler.open_repository(repo).await;
        assert_eq!(source.issue_calls(), 1);

        let mut rx = reconciler.subscribe();
        reconciler.manual_refresh().await;

        let first = rx.recv().await.unwrap();
        assert!(first.is_empty());
        let second = rx.recv().await.unwrap();
        assert_eq!(keys(&second), vec![("ABC-1", false)]);

        // Both tiers were emptied, so the issue was fetched again
        assert_eq!(source.issue_calls(), 2);
        assert!(store.load().await.issues.contains_key("ABC-1"));
    }

    #[tokio::test]
    async fn test_no_repository_is_a_no_op() {
        let (mut reconciler, _source, _store) = reconciler(FakeSource::new());
        let mut rx = reconciler.subscribe();

        reconciler.enumerate_and_reconcile().await;
        assert!(rx.try_recv().is_err());

        reconciler.on_repository_state_changed().await;
        assert!(rx.recv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_loop_reacts_to_inputs_and_state_changes() {
        let source = FakeSource::new()
            .with_issue(issue("ABC-1", "Foo"))
            .with_issue(issue("ABC-2", "Bar"));
        let (reconciler, _source, _store) = reconciler(source);
        let repo = Arc::new(FakeRepository::new(&["ABC-1-foo", "ABC-2-bar"], None));

        let (handle, task) = reconciler.spawn();
        let mut rx = handle.subscribe();
        handle.open_repository(repo.clone()).unwrap();

        let opened = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(keys(&opened), vec![("ABC-1", false), ("ABC-2", false)]);

        repo.checkout("ABC-2-bar");
        assert!(repo.fire_state_change());
        let changed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(keys(&changed), vec![("ABC-2", true), ("ABC-1", false)]);

        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
