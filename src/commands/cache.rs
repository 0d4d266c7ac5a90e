//! Cache statistics and clearing.

use serde::Serialize;

use super::{App, Output, to_json_string};
use crate::Result;
use crate::cache::manager::CacheStats;

#[derive(Debug, Serialize)]
pub struct CacheStatsOutput {
    pub enabled: bool,
    pub duration_secs: u64,
    #[serde(flatten)]
    pub stats: CacheStats,
}

impl Output for CacheStatsOutput {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Persistent cache: {} ({}s)",
            if self.enabled { "enabled" } else { "disabled" },
            self.duration_secs
        )];
        lines.push(format!(
            "  issues: {} persistent, {} in memory",
            self.stats.persistent_issues, self.stats.memory_issues
        ));
        lines.push(format!(
            "  sub-issues: {} persistent, {} in memory",
            self.stats.persistent_sub_issues, self.stats.memory_sub_issues
        ));
        if self.stats.in_flight > 0 {
            lines.push(format!("  in flight: {}", self.stats.in_flight));
        }
        lines.join("\n")
    }
}

pub async fn cache_stats(app: &App) -> Result<CacheStatsOutput> {
    Ok(CacheStatsOutput {
        enabled: app.settings.cache.enabled,
        duration_secs: app.settings.cache.duration.as_secs(),
        stats: app.cache.stats().await,
    })
}

#[derive(Debug, Serialize)]
pub struct CacheClearOutput {
    pub cleared_issues: usize,
    pub cleared_sub_issues: usize,
}

impl Output for CacheClearOutput {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Cleared {} issues and {} sub-issue lists",
            self.cleared_issues, self.cleared_sub_issues
        )
    }
}

/// Empty both tiers.
pub async fn cache_clear(app: &App) -> Result<CacheClearOutput> {
    let before = app.cache.stats().await;
    app.cache.invalidate_all().await;
    Ok(CacheClearOutput {
        cleared_issues: before.persistent_issues.max(before.memory_issues),
        cleared_sub_issues: before.persistent_sub_issues.max(before.memory_sub_issues),
    })
}
