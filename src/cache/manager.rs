//! Two-tier issue resolution.
//!
//! Lookups go memory tier → persistent tier → issue source. Both tiers are
//! populated on a successful fetch. A key already being fetched is not
//! fetched again: the second caller gets `None` right away and is expected to
//! come back on a later event.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use super::memory::TtlCache;
use super::persistent::{CacheDocument, CacheStore, CachedIssue, CachedSubIssues, now_millis};
use crate::config::CacheSettings;
use crate::models::Issue;
use crate::tracker::IssueSource;

/// Entry counts of the cache tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_issues: usize,
    pub memory_sub_issues: usize,
    pub persistent_issues: usize,
    pub persistent_sub_issues: usize,
    pub in_flight: usize,
}

/// Resolves issues through the memory and persistent tiers before asking
/// the issue source.
pub struct CacheManager {
    source: Arc<dyn IssueSource>,
    store: Arc<dyn CacheStore>,
    issues: TtlCache<Issue>,
    sub_issues: TtlCache<Vec<Issue>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    /// Serializes read-modify-write of the persistent document
    document_lock: tokio::sync::Mutex<()>,
    persistent_enabled: bool,
    max_age: Duration,
}

/// Removes a key from the in-flight set when dropped.
struct InFlightGuard {
    key: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.in_flight.lock() {
            keys.remove(&self.key);
        }
    }
}

impl CacheManager {
    pub fn new(
        source: Arc<dyn IssueSource>,
        store: Arc<dyn CacheStore>,
        settings: &CacheSettings,
    ) -> Self {
        Self {
            source,
            store,
            issues: TtlCache::new(settings.memory_ttl),
            sub_issues: TtlCache::new(settings.memory_ttl),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            document_lock: tokio::sync::Mutex::new(()),
            persistent_enabled: settings.enabled,
            max_age: settings.duration,
        }
    }

    /// Resolve an issue by key.
    pub async fn resolve_issue(&self, key: &str) -> Option<Issue> {
        if let Some(issue) = self.issues.get(key) {
            return Some(issue);
        }

        if let Some(issue) = self.load_persistent_issue(key).await {
            self.issues.set(key, issue.clone());
            return Some(issue);
        }

        let _guard = match self.mark_in_flight(key) {
            Some(guard) => guard,
            None => {
                tracing::debug!("Request already in progress for: {}", key);
                return None;
            }
        };

        match self.source.fetch_issue(key).await {
            Ok(issue) => {
                self.issues.set(key, issue.clone());
                self.save_persistent_issue(key, &issue).await;
                Some(issue)
            }
            Err(e) => {
                tracing::debug!("Could not resolve {}: {}", key, e);
                None
            }
        }
    }

    /// Resolve the children of `parent_key`. Failures resolve to no children.
    pub async fn resolve_child_issues(&self, parent_key: &str) -> Vec<Issue> {
        if let Some(children) = self.sub_issues.get(parent_key) {
            return children;
        }

        if let Some(children) = self.load_persistent_sub_issues(parent_key).await {
            self.sub_issues.set(parent_key, children.clone());
            return children;
        }

        match self.source.fetch_child_issues(parent_key).await {
            Ok(children) => {
                self.sub_issues.set(parent_key, children.clone());
                self.save_persistent_sub_issues(parent_key, &children).await;
                children
            }
            Err(e) => {
                tracing::debug!("Treating {} as childless: {}", parent_key, e);
                Vec::new()
            }
        }
    }

    /// Forget everything: both memory tiers, in-flight markers and the
    /// persistent document.
    pub async fn invalidate_all(&self) {
        tracing::info!("Clearing all issue caches");
        self.issues.clear();
        self.sub_issues.clear();
        if let Ok(mut keys) = self.in_flight.lock() {
            keys.clear();
        }

        let _lock = self.document_lock.lock().await;
        if let Err(e) = self.store.save(&CacheDocument::new()).await {
            tracing::warn!("Error clearing persistent cache: {}", e);
        }
    }

    /// Current entry counts.
    pub async fn stats(&self) -> CacheStats {
        let document = self.store.load().await;
        CacheStats {
            memory_issues: self.issues.len(),
            memory_sub_issues: self.sub_issues.len(),
            persistent_issues: document.issues.len(),
            persistent_sub_issues: document.sub_issues.len(),
            in_flight: self.in_flight.lock().map(|keys| keys.len()).unwrap_or(0),
        }
    }

    /// Whether a fetch for `key` is outstanding.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight
            .lock()
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }

    fn mark_in_flight(&self, key: &str) -> Option<InFlightGuard> {
        let mut keys = self.in_flight.lock().ok()?;
        if !keys.insert(key.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            key: key.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    async fn load_persistent_issue(&self, key: &str) -> Option<Issue> {
        if !self.persistent_enabled || key.is_empty() {
            return None;
        }
        let document = self.store.load().await;
        let now = now_millis();
        let issue = document.fresh_issue(key, self.max_age, now)?.clone();
        tracing::debug!(
            "Loading {} from persistent cache (age: {}s)",
            key,
            age_secs(document.issues[key].timestamp, now)
        );
        Some(issue)
    }

    async fn load_persistent_sub_issues(&self, key: &str) -> Option<Vec<Issue>> {
        if !self.persistent_enabled || key.is_empty() {
            return None;
        }
        let document = self.store.load().await;
        let now = now_millis();
        let items = document.fresh_sub_issues(key, self.max_age, now)?.to_vec();
        tracing::debug!(
            "Loading sub-issues for {} from persistent cache (age: {}s)",
            key,
            age_secs(document.sub_issues[key].timestamp, now)
        );
        Some(items)
    }

    async fn save_persistent_issue(&self, key: &str, issue: &Issue) {
        if !self.persistent_enabled {
            return;
        }
        let _lock = self.document_lock.lock().await;
        let mut document = self.store.load().await;
        document.issues.insert(
            key.to_string(),
            CachedIssue {
                issue: issue.clone(),
                timestamp: now_millis(),
            },
        );
        if let Err(e) = self.store.save(&document).await {
            tracing::warn!("Error saving {} to persistent cache: {}", key, e);
        }
    }

    async fn save_persistent_sub_issues(&self, key: &str, items: &[Issue]) {
        if !self.persistent_enabled {
            return;
        }
        let _lock = self.document_lock.lock().await;
        let mut document = self.store.load().await;
        document.sub_issues.insert(
            key.to_string(),
            CachedSubIssues {
                items: items.to_vec(),
                timestamp: now_millis(),
            },
        );
        if let Err(e) = self.store.save(&document).await {
            tracing::warn!("Error saving sub-issues for {} to cache: {}", key, e);
        }
    }
}

fn age_secs(timestamp: i64, now_ms: i64) -> i64 {
    (now_ms - timestamp) / 1000
}
