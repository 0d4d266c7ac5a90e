//! Persistent cache tier.
//!
//! The whole cache lives in one JSON document:
//!
//! ```json
//! {
//!   "issues":    { "ABC-1": { "issue": { ... }, "timestamp": 1767225600000 } },
//!   "subIssues": { "ABC-1": { "items": [ ... ], "timestamp": 1767225600000 } }
//! }
//! ```
//!
//! Timestamps are Unix epoch milliseconds. Issue entries and sub-issue
//! entries age independently. The document is always read and written as a
//! unit. A missing document is an empty one, and anything that does not parse
//! (the whole file, a section, or a single entry) is dropped rather than
//! reported.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::models::Issue;

/// File name of the cache document inside the data directory.
pub const CACHE_FILE: &str = "cache.json";

/// A cached issue with the time it was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedIssue {
    pub issue: Issue,
    pub timestamp: i64,
}

/// Cached children of an issue with the time they were stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSubIssues {
    pub items: Vec<Issue>,
    pub timestamp: i64,
}

/// The persisted cache document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDocument {
    #[serde(default)]
    pub issues: BTreeMap<String, CachedIssue>,
    #[serde(default, rename = "subIssues")]
    pub sub_issues: BTreeMap<String, CachedSubIssues>,
}

impl CacheDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty() && self.sub_issues.is_empty()
    }

    /// Parse a stored document, keeping every entry that is well formed.
    pub fn from_json_lenient(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Ignoring unreadable cache document: {}", e);
                return Self::new();
            }
        };

        Self {
            issues: lenient_section(&value, "issues"),
            sub_issues: lenient_section(&value, "subIssues"),
        }
    }

    /// Fresh issue entry for `key`, if younger than `max_age` at `now_ms`.
    pub fn fresh_issue(&self, key: &str, max_age: Duration, now_ms: i64) -> Option<&Issue> {
        let cached = self.issues.get(key)?;
        is_fresh(cached.timestamp, max_age, now_ms).then_some(&cached.issue)
    }

    /// Fresh sub-issue entry for `key`, if younger than `max_age` at `now_ms`.
    pub fn fresh_sub_issues(&self, key: &str, max_age: Duration, now_ms: i64) -> Option<&[Issue]> {
        let cached = self.sub_issues.get(key)?;
        is_fresh(cached.timestamp, max_age, now_ms).then_some(cached.items.as_slice())
    }
}

fn lenient_section<T: serde::de::DeserializeOwned>(value: &Value, section: &str) -> BTreeMap<String, T> {
    let Some(entries) = value.get(section).and_then(Value::as_object) else {
        return BTreeMap::new();
    };

    entries
        .iter()
        .filter_map(|(key, entry)| match T::deserialize(entry) {
            Ok(parsed) => Some((key.clone(), parsed)),
            Err(e) => {
                tracing::debug!("Dropping malformed {} cache entry {}: {}", section, key, e);
                None
            }
        })
        .collect()
}

fn is_fresh(timestamp: i64, max_age: Duration, now_ms: i64) -> bool {
    let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(timestamp) < max_age_ms
}

/// Current time in epoch milliseconds, the unit used by the document.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Durable storage for the cache document.
pub trait CacheStore: Send + Sync {
    /// Load the document. Missing or unreadable storage yields an empty one.
    fn load(&self) -> BoxFuture<'_, CacheDocument>;

    /// Replace the stored document.
    fn save<'a>(&'a self, document: &'a CacheDocument) -> BoxFuture<'a, Result<()>>;
}

/// Cache document stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store the document at `<data_dir>/cache.json`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CACHE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStore for FileStore {
    fn load(&self) -> BoxFuture<'_, CacheDocument> {
        async move {
            match tokio::fs::read_to_string(&self.path).await {
                Ok(raw) => CacheDocument::from_json_lenient(&raw),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheDocument::new(),
                Err(e) => {
                    tracing::warn!("Error reading cache {}: {}", self.path.display(), e);
                    CacheDocument::new()
                }
            }
        }
        .boxed()
    }

    fn save<'a>(&'a self, document: &'a CacheDocument) -> BoxFuture<'a, Result<()>> {
        async move {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let json = serde_json::to_vec(document)?;

            // Write-then-rename so a crash never leaves a half-written document.
            // The temp name is per process so concurrent `tl` runs never share it.
            let tmp = temp_path(&self.path);
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, &self.path).await?;
            Ok(())
        }
        .boxed()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    path.with_extension(format!("json.{}.tmp", std::process::id()))
}

/// Cache document held in memory as raw JSON.
///
/// Used when no data directory is wanted (tests, one-off lookups).
#[derive(Debug, Default)]
pub struct MemoryStore {
    raw: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an arbitrary stored string, well formed or not.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
        }
    }

    /// The stored JSON, if anything was ever saved.
    pub fn raw(&self) -> Option<String> {
        self.raw.lock().ok().and_then(|raw| raw.clone())
    }
}

impl CacheStore for MemoryStore {
    fn load(&self) -> BoxFuture<'_, CacheDocument> {
        let raw = self.raw();
        async move {
            raw.map(|raw| CacheDocument::from_json_lenient(&raw))
                .unwrap_or_default()
        }
        .boxed()
    }

    fn save<'a>(&'a self, document: &'a CacheDocument) -> BoxFuture<'a, Result<()>> {
        async move {
            let json = serde_json::to_string(document)?;
            let mut raw = self
                .raw
                .lock()
                .map_err(|e| crate::Error::Other(format!("cache store lock poisoned: {}", e)))?;
            *raw = Some(json);
            Ok(())
        }
        .boxed()
    }
}
