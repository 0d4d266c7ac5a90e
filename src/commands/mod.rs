//! Command implementations for the Tiller CLI.
//!
//! This module contains the business logic for each CLI command:
//! - `branches` - Branch listing, watching and refreshing
//! - `issue` - Single-issue lookups and host actions (open, copy)
//! - `config` - Interactive setup and config.kdl management
//! - `cache` - Cache statistics and clearing

mod branches;
mod cache;
mod config;
mod issue;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::Result;
use crate::cache::{CacheManager, FileStore};
use crate::config::{ConfigPaths, ResolvedConfig, Settings, resolve_config};
use crate::git::GitCliRepository;
use crate::notices::Notices;
use crate::reconciler::BranchReconciler;
use crate::tracker::JiraClient;

pub use branches::{BranchesOutput, branches, refresh, watch};
pub use cache::{CacheClearOutput, CacheStatsOutput, cache_clear, cache_stats};
pub use config::{
    ConfigEntry, ConfigGetOutput, ConfigSetOutput, ConfigShowOutput, ConfigureOutput, config_get,
    config_set, config_show, configure,
};
pub use issue::{
    ClipboardOutput, IssueOutput, KeyOutput, OpenOutput, copy, extract_key, issue, open,
};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Serialize a command result, falling back to an error object.
pub(crate) fn to_json_string<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

/// Everything a tracker-backed command needs, built once from resolved settings.
pub struct App {
    pub paths: ConfigPaths,
    pub resolved: ResolvedConfig,
    pub settings: Settings,
    pub notices: Arc<Notices>,
    pub client: Arc<JiraClient>,
    pub cache: Arc<CacheManager>,
}

impl App {
    /// Resolve configuration and wire up the tracker client and cache.
    pub fn load(paths: ConfigPaths, notices: Arc<Notices>) -> Result<Self> {
        let resolved = resolve_config(&paths)?;
        for warning in &resolved.deprecation_warnings {
            notices.warn_once(warning, warning.clone());
        }
        let settings = resolved.settings()?;

        let client = Arc::new(JiraClient::new(&settings.tracker, notices.clone())?);
        let store = Arc::new(FileStore::in_dir(paths.data_dir()));
        let cache = Arc::new(CacheManager::new(client.clone(), store, &settings.cache));

        Ok(Self {
            paths,
            resolved,
            settings,
            notices,
            client,
            cache,
        })
    }

    /// A reconciler sharing this app's cache.
    pub fn reconciler(&self) -> BranchReconciler {
        BranchReconciler::new(self.cache.clone(), &self.settings)
    }

    /// Locate the repository containing `path`.
    pub async fn repository(&self, path: &Path) -> Result<Arc<GitCliRepository>> {
        Ok(Arc::new(GitCliRepository::discover(path).await?))
    }
}
