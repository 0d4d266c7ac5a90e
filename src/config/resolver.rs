//! Unified precedence resolution for configuration and state.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variables (`TL_URL`, `TL_USERNAME`, `TL_API_TOKEN`)
//! 2. config.kdl for preferences, state.kdl for the API token
//! 3. (Legacy fallback) `api-token` in config.kdl - DEPRECATED
//! 4. Built-in defaults

use std::time::Duration;

use regex::Regex;

use super::schema::{
    CACHE_DURATION_KEY, TillerConfig, TillerState, get_legacy_token_from_config, mask_secret,
    validate_branch_pattern,
};
use super::{
    CacheSettings, ConfigPaths, DEFAULT_BRANCH_PATTERN, DEFAULT_CACHE_DURATION_SECS,
    DEFAULT_MAX_BRANCHES, Settings, TrackerSettings,
};
use crate::{Error, Result};

/// Environment variable overriding the tracker URL.
pub const URL_ENV: &str = "TL_URL";

/// Environment variable overriding the tracker username.
pub const USERNAME_ENV: &str = "TL_USERNAME";

/// Environment variable overriding the API token.
pub const API_TOKEN_ENV: &str = "TL_API_TOKEN";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from environment variable
    EnvVar(String),
    /// Value from config.kdl
    Config,
    /// Value from state.kdl
    State,
    /// Built-in default value
    Default,
    /// Value from legacy location (config.kdl instead of state.kdl) - deprecated
    LegacyConfig(String),
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::Config => write!(f, "config"),
            ValueSource::State => write!(f, "state"),
            ValueSource::Default => write!(f, "default"),
            ValueSource::LegacyConfig(path) => write!(f, "legacy-config:{}", path),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub url: Option<Resolved<String>>,
    pub username: Option<Resolved<String>>,
    pub api_token: Option<Resolved<String>>,
    pub branch_pattern: Resolved<String>,
    pub max_branches: Resolved<usize>,
    pub cache_enabled: Resolved<bool>,
    pub cache_duration: Resolved<u64>,
    /// Deprecation warnings (e.g., token found in legacy location)
    pub deprecation_warnings: Vec<String>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            api_token: None,
            branch_pattern: Resolved::new(DEFAULT_BRANCH_PATTERN.to_string(), ValueSource::Default),
            max_branches: Resolved::new(DEFAULT_MAX_BRANCHES, ValueSource::Default),
            cache_enabled: Resolved::new(true, ValueSource::Default),
            cache_duration: Resolved::new(DEFAULT_CACHE_DURATION_SECS, ValueSource::Default),
            deprecation_warnings: Vec::new(),
        }
    }
}

impl ResolvedConfig {
    /// Get the masked token for display purposes.
    pub fn masked_token(&self) -> Option<String> {
        self.api_token.as_ref().map(|r| mask_secret(&r.value))
    }

    /// Check if the token is from a deprecated location.
    pub fn is_token_from_legacy_location(&self) -> bool {
        matches!(
            self.api_token.as_ref().map(|r| &r.source),
            Some(ValueSource::LegacyConfig(_))
        )
    }

    /// Validate and convert into the settings handed to constructors.
    pub fn settings(&self) -> Result<Settings> {
        validate_branch_pattern(&self.branch_pattern.value).map_err(Error::InvalidPattern)?;
        let branch_pattern = Regex::new(&self.branch_pattern.value)
            .map_err(|e| Error::InvalidPattern(e.to_string()))?;

        if self.cache_duration.value == 0 {
            return Err(Error::InvalidInput(format!(
                "{} must be greater than 0",
                CACHE_DURATION_KEY
            )));
        }

        Ok(Settings {
            tracker: TrackerSettings {
                base_url: self.url.as_ref().map(|r| r.value.clone()),
                username: self.username.as_ref().map(|r| r.value.clone()),
                api_token: self.api_token.as_ref().map(|r| r.value.clone()),
            },
            branch_pattern,
            max_branches: self.max_branches.value,
            cache: CacheSettings {
                enabled: self.cache_enabled.value,
                duration: Duration::from_secs(self.cache_duration.value),
                ..CacheSettings::default()
            },
        })
    }
}

/// Resolve configuration from the process environment and files.
pub fn resolve_config(paths: &ConfigPaths) -> Result<ResolvedConfig> {
    resolve_config_with_env(paths, |name| std::env::var(name).ok())
}

/// Resolve configuration with an explicit environment lookup.
///
/// Empty environment values are treated as unset.
pub fn resolve_config_with_env<F>(paths: &ConfigPaths, env: F) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let env = |name: &str| env(name).filter(|v| !v.is_empty());

    let mut result = ResolvedConfig::default();
    let config_doc = paths.read_config_doc()?;
    let config = TillerConfig::from_kdl(&config_doc);
    let state = paths.read_state()?;

    result.url = resolve_string(URL_ENV, &env, config.url.as_ref());
    result.username = resolve_string(USERNAME_ENV, &env, config.username.as_ref());

    if let Some(ref pattern) = config.branch_pattern {
        result.branch_pattern = Resolved::new(pattern.clone(), ValueSource::Config);
    }
    if let Some(max) = config.max_branches {
        result.max_branches = Resolved::new(max, ValueSource::Config);
    }
    if let Some(enabled) = config.cache_enabled {
        result.cache_enabled = Resolved::new(enabled, ValueSource::Config);
    }
    if let Some(duration) = config.cache_duration {
        result.cache_duration = Resolved::new(duration, ValueSource::Config);
    }

    result.api_token = resolve_token(paths, &env, &state, &config_doc, &mut result.deprecation_warnings);

    Ok(result)
}

fn resolve_string<F>(env_name: &str, env: &F, file: Option<&String>) -> Option<Resolved<String>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = env(env_name) {
        return Some(Resolved::new(value, ValueSource::EnvVar(env_name.to_string())));
    }
    file.map(|value| Resolved::new(value.clone(), ValueSource::Config))
}

fn resolve_token<F>(
    paths: &ConfigPaths,
    env: &F,
    state: &TillerState,
    config_doc: &kdl::KdlDocument,
    warnings: &mut Vec<String>,
) -> Option<Resolved<String>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = env(API_TOKEN_ENV) {
        return Some(Resolved::new(token, ValueSource::EnvVar(API_TOKEN_ENV.to_string())));
    }
    if let Some(ref token) = state.api_token {
        return Some(Resolved::new(token.clone(), ValueSource::State));
    }

    // Legacy fallback: token stored next to the preferences
    let token = get_legacy_token_from_config(config_doc)?;
    let config_path = paths.config_kdl_path();
    warnings.push(format!(
        "Token found in deprecated location: {}. Run 'tl configure' to move it to state.kdl.",
        config_path.display()
    ));
    Some(Resolved::new(
        token,
        ValueSource::LegacyConfig(config_path.display().to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TillerConfig;
    use tempfile::TempDir;

    fn test_paths() -> (TempDir, ConfigPaths) {
        let temp = TempDir::new().unwrap();
        let paths = ConfigPaths::new(temp.path().join("config"), temp.path().join("data"));
        (temp, paths)
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_value_source_display() {
        assert_eq!(
            format!("{}", ValueSource::EnvVar("FOO".to_string())),
            "env:FOO"
        );
        assert_eq!(format!("{}", ValueSource::Config), "config");
        assert_eq!(format!("{}", ValueSource::State), "state");
        assert_eq!(format!("{}", ValueSource::Default), "default");
        assert_eq!(
            format!("{}", ValueSource::LegacyConfig("/c.kdl".to_string())),
            "legacy-config:/c.kdl"
        );
    }

    #[test]
    fn test_resolve_defaults() {
        let (_temp, paths) = test_paths();
        let resolved = resolve_config_with_env(&paths, no_env).unwrap();

        assert!(resolved.url.is_none());
        assert!(resolved.api_token.is_none());
        assert_eq!(resolved.branch_pattern.value, DEFAULT_BRANCH_PATTERN);
        assert_eq!(resolved.branch_pattern.source, ValueSource::Default);
        assert_eq!(resolved.max_branches.value, 20);
        assert!(resolved.cache_enabled.value);
        assert_eq!(resolved.cache_duration.value, 86_400);

        let settings = resolved.settings().unwrap();
        assert_eq!(settings.max_branches, 20);
        assert!(settings.cache.enabled);
        assert_eq!(settings.cache.duration, Duration::from_secs(86_400));
        assert_eq!(settings.tracker.base_url, None);
    }

    #[test]
    fn test_resolve_from_files() {
        let (_temp, paths) = test_paths();
        paths
            .write_config(&TillerConfig {
                url: Some("https://x.atlassian.net".to_string()),
                username: Some("me".to_string()),
                max_branches: Some(0),
                cache_enabled: Some(false),
                ..Default::default()
            })
            .unwrap();
        paths
            .write_state(&TillerState {
                api_token: Some("tok".to_string()),
            })
            .unwrap();

        let resolved = resolve_config_with_env(&paths, no_env).unwrap();
        assert_eq!(resolved.url.as_ref().unwrap().source, ValueSource::Config);
        assert_eq!(resolved.api_token.as_ref().unwrap().source, ValueSource::State);
        assert_eq!(resolved.max_branches.value, 0);
        assert!(!resolved.cache_enabled.value);
        assert!(resolved.deprecation_warnings.is_empty());

        let settings = resolved.settings().unwrap();
        assert_eq!(settings.tracker.api_token.as_deref(), Some("tok"));
        assert_eq!(settings.max_branches, 0);
        assert!(!settings.cache.enabled);
    }

    #[test]
    fn test_env_overrides_files() {
        let (_temp, paths) = test_paths();
        paths
            .write_config(&TillerConfig {
                url: Some("https://file.example".to_string()),
                ..Default::default()
            })
            .unwrap();
        paths
            .write_state(&TillerState {
                api_token: Some("file-token".to_string()),
            })
            .unwrap();

        let resolved = resolve_config_with_env(&paths, |name| match name {
            URL_ENV => Some("https://env.example".to_string()),
            API_TOKEN_ENV => Some("env-token".to_string()),
            USERNAME_ENV => Some(String::new()),
            _ => None,
        })
        .unwrap();

        let url = resolved.url.unwrap();
        assert_eq!(url.value, "https://env.example");
        assert_eq!(url.source, ValueSource::EnvVar(URL_ENV.to_string()));
        assert_eq!(resolved.api_token.unwrap().value, "env-token");
        // Empty env values are ignored
        assert!(resolved.username.is_none());
    }

    #[test]
    fn test_legacy_token_in_config() {
        let (_temp, paths) = test_paths();
        std::fs::create_dir_all(paths.config_dir()).unwrap();
        std::fs::write(paths.config_kdl_path(), "api-token \"legacy-secret-token\"\n").unwrap();

        let resolved = resolve_config_with_env(&paths, no_env).unwrap();
        assert!(resolved.is_token_from_legacy_location());
        assert_eq!(resolved.api_token.as_ref().unwrap().value, "legacy-secret-token");
        assert_eq!(resolved.deprecation_warnings.len(), 1);
        assert!(resolved.deprecation_warnings[0].contains("tl configure"));
        assert_eq!(resolved.masked_token().unwrap(), "lega...oken");
    }

    #[test]
    fn test_state_token_wins_over_legacy() {
        let (_temp, paths) = test_paths();
        std::fs::create_dir_all(paths.config_dir()).unwrap();
        std::fs::write(paths.config_kdl_path(), "api-token \"legacy\"\n").unwrap();
        paths
            .write_state(&TillerState {
                api_token: Some("current".to_string()),
            })
            .unwrap();

        let resolved = resolve_config_with_env(&paths, no_env).unwrap();
        assert_eq!(resolved.api_token.unwrap().value, "current");
        assert!(resolved.deprecation_warnings.is_empty());
    }

    #[test]
    fn test_settings_rejects_pattern_without_group() {
        let (_temp, paths) = test_paths();
        std::fs::create_dir_all(paths.config_dir()).unwrap();
        std::fs::write(paths.config_kdl_path(), "branch-pattern \"[A-Z]+-\\\\d+\"\n").unwrap();

        let resolved = resolve_config_with_env(&paths, no_env).unwrap();
        assert!(matches!(resolved.settings(), Err(Error::InvalidPattern(_))));
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let (_temp, paths) = test_paths();
        std::fs::create_dir_all(paths.config_dir()).unwrap();
        std::fs::write(paths.config_kdl_path(), "url \"unterminated\n").unwrap();

        assert!(matches!(
            resolve_config_with_env(&paths, no_env),
            Err(Error::Kdl(_))
        ));
    }
}
