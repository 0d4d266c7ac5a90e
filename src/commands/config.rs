//! Interactive setup and config.kdl management.
//!
//! These commands work from [`ConfigPaths`] alone so that a broken
//! config.kdl can still be inspected and repaired.

use std::fmt::Display;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use serde::Serialize;

use super::{Output, to_json_string};
use crate::config::schema::{
    API_TOKEN_KEY, BRANCH_PATTERN_KEY, CACHE_DURATION_KEY, CACHE_ENABLED_KEY, MAX_BRANCHES_KEY,
    URL_KEY, USERNAME_KEY, mask_secret,
};
use crate::config::{
    CONFIG_KEYS, ConfigPaths, Resolved, ResolvedConfig, TillerConfig, resolve_config,
};
use crate::{Error, Result};

#[derive(Debug, Serialize)]
pub struct ConfigureOutput {
    pub config_path: PathBuf,
    pub state_path: PathBuf,
    pub url: Option<String>,
    pub username: Option<String>,
    /// Masked token
    pub api_token: Option<String>,
    pub migrated_legacy_token: bool,
}

impl Output for ConfigureOutput {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("Saved {}", self.config_path.display())];
        lines.push(format!("Saved {}", self.state_path.display()));
        if self.migrated_legacy_token {
            lines.push("Moved api-token out of config.kdl".to_string());
        }
        lines.push(format!("  url: {}", self.url.as_deref().unwrap_or("(not set)")));
        lines.push(format!(
            "  username: {}",
            self.username.as_deref().unwrap_or("(not set)")
        ));
        lines.push(format!(
            "  api-token: {}",
            self.api_token.as_deref().unwrap_or("(not set)")
        ));
        lines.join("\n")
    }
}

/// Prompt for the tracker URL, username and API token.
///
/// An empty answer keeps the current value. A token found in config.kdl is
/// moved to state.kdl first.
pub fn configure<R, W>(paths: &ConfigPaths, input: &mut R, prompt: &mut W) -> Result<ConfigureOutput>
where
    R: BufRead,
    W: Write,
{
    let migrated_legacy_token = paths.migrate_legacy_token()?;
    let mut config = paths.read_config()?;
    let mut state = paths.read_state()?;

    if let Some(url) = ask(
        input,
        prompt,
        "Tracker URL (e.g. https://your-domain.atlassian.net)",
        config.url.as_deref(),
    )? {
        config
            .set_value(URL_KEY, &url)
            .map_err(Error::InvalidInput)?;
    }

    if let Some(username) = ask(input, prompt, "Username (email)", config.username.as_deref())? {
        config
            .set_value(USERNAME_KEY, &username)
            .map_err(Error::InvalidInput)?;
    }

    let masked = state.masked_token();
    if let Some(token) = ask(input, prompt, "API token", masked.as_deref())? {
        state.api_token = Some(token);
    }

    paths.write_config(&config)?;
    paths.write_state(&state)?;
    tracing::info!("Saved tracker settings to {}", paths.config_kdl_path().display());

    Ok(ConfigureOutput {
        config_path: paths.config_kdl_path(),
        state_path: paths.state_kdl_path(),
        url: config.url,
        username: config.username,
        api_token: state.masked_token(),
        migrated_legacy_token,
    })
}

/// Ask one question; `None` when the answer is empty.
fn ask<R, W>(input: &mut R, prompt: &mut W, question: &str, current: Option<&str>) -> Result<Option<String>>
where
    R: BufRead,
    W: Write,
{
    match current {
        Some(current) => write!(prompt, "{} [{}]: ", question, current)?,
        None => write!(prompt, "{}: ", question)?,
    }
    prompt.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let answer = line.trim();
    Ok((!answer.is_empty()).then(|| answer.to_string()))
}

/// One resolved setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: Option<String>,
    pub source: Option<String>,
}

impl ConfigEntry {
    fn new<T: Display>(key: &str, resolved: Option<&Resolved<T>>) -> Self {
        Self {
            key: key.to_string(),
            value: resolved.map(|r| r.value.to_string()),
            source: resolved.map(|r| r.source.to_string()),
        }
    }
}

fn entries(resolved: &ResolvedConfig) -> Vec<ConfigEntry> {
    let masked_token = resolved
        .api_token
        .as_ref()
        .map(|r| Resolved::new(mask_secret(&r.value), r.source.clone()));

    vec![
        ConfigEntry::new(URL_KEY, resolved.url.as_ref()),
        ConfigEntry::new(USERNAME_KEY, resolved.username.as_ref()),
        ConfigEntry::new(API_TOKEN_KEY, masked_token.as_ref()),
        ConfigEntry::new(BRANCH_PATTERN_KEY, Some(&resolved.branch_pattern)),
        ConfigEntry::new(MAX_BRANCHES_KEY, Some(&resolved.max_branches)),
        ConfigEntry::new(CACHE_ENABLED_KEY, Some(&resolved.cache_enabled)),
        ConfigEntry::new(CACHE_DURATION_KEY, Some(&resolved.cache_duration)),
    ]
}

#[derive(Debug, Serialize)]
pub struct ConfigShowOutput {
    pub config_path: PathBuf,
    pub state_path: PathBuf,
    pub entries: Vec<ConfigEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Output for ConfigShowOutput {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let width = self.entries.iter().map(|e| e.key.len()).max().unwrap_or(0);
        let mut lines = vec![
            format!("config: {}", self.config_path.display()),
            format!("state:  {}", self.state_path.display()),
            String::new(),
        ];
        for entry in &self.entries {
            let line = match (&entry.value, &entry.source) {
                (Some(value), Some(source)) => {
                    format!("{:width$}  {}  ({})", entry.key, value, source, width = width)
                }
                _ => format!("{:width$}  (not set)", entry.key, width = width),
            };
            lines.push(line);
        }
        for warning in &self.warnings {
            lines.push(format!("⚠️ {}", warning));
        }
        lines.join("\n")
    }
}

/// Every setting with where it came from. The token is masked.
pub fn config_show(paths: &ConfigPaths) -> Result<ConfigShowOutput> {
    let resolved = resolve_config(paths)?;
    Ok(ConfigShowOutput {
        config_path: paths.config_kdl_path(),
        state_path: paths.state_kdl_path(),
        entries: entries(&resolved),
        warnings: resolved.deprecation_warnings,
    })
}

#[derive(Debug, Serialize)]
pub struct ConfigGetOutput {
    #[serde(flatten)]
    pub entry: ConfigEntry,
}

impl Output for ConfigGetOutput {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        match &self.entry.value {
            Some(value) => value.clone(),
            None => format!("{} is not set", self.entry.key),
        }
    }
}

/// Look up one resolved setting.
pub fn config_get(paths: &ConfigPaths, key: &str) -> Result<ConfigGetOutput> {
    let resolved = resolve_config(paths)?;
    entries(&resolved)
        .into_iter()
        .find(|entry| entry.key == key)
        .map(|entry| ConfigGetOutput { entry })
        .ok_or_else(|| unknown_key(key))
}

#[derive(Debug, Serialize)]
pub struct ConfigSetOutput {
    pub key: String,
    pub value: String,
    pub path: PathBuf,
}

impl Output for ConfigSetOutput {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        format!("Set {} = {} in {}", self.key, self.value, self.path.display())
    }
}

/// Store one setting in config.kdl.
pub fn config_set(paths: &ConfigPaths, key: &str, value: &str) -> Result<ConfigSetOutput> {
    paths.migrate_legacy_token()?;
    let mut config = paths.read_config()?;
    config.set_value(key, value).map_err(Error::InvalidInput)?;
    paths.write_config(&config)?;

    // Report the normalized value
    let stored = stored_value(&config, key).unwrap_or_else(|| value.to_string());
    Ok(ConfigSetOutput {
        key: key.to_string(),
        value: stored,
        path: paths.config_kdl_path(),
    })
}

fn stored_value(config: &TillerConfig, key: &str) -> Option<String> {
    match key {
        URL_KEY => config.url.clone(),
        USERNAME_KEY => config.username.clone(),
        BRANCH_PATTERN_KEY => config.branch_pattern.clone(),
        MAX_BRANCHES_KEY => config.max_branches.map(|v| v.to_string()),
        CACHE_ENABLED_KEY => config.cache_enabled.map(|v| v.to_string()),
        CACHE_DURATION_KEY => config.cache_duration.map(|v| v.to_string()),
        _ => None,
    }
}

fn unknown_key(key: &str) -> Error {
    Error::InvalidInput(format!(
        "Unknown config key: {}. Valid keys: {}, {}",
        key,
        CONFIG_KEYS.join(", "),
        API_TOKEN_KEY
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn paths(temp: &TempDir) -> ConfigPaths {
        ConfigPaths::new(temp.path().join("config"), temp.path().join("data"))
    }

    #[test]
    fn test_configure_writes_both_files() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);
        let mut input = Cursor::new("https://x.atlassian.net/\nme@example.com\nsecret-token-123456\n");
        let mut prompt = Vec::new();

        let output = configure(&paths, &mut input, &mut prompt).unwrap();
        assert_eq!(output.url.as_deref(), Some("https://x.atlassian.net"));
        assert_eq!(output.username.as_deref(), Some("me@example.com"));
        assert_eq!(output.api_token.as_deref(), Some("secr...3456"));
        assert!(!output.migrated_legacy_token);

        let prompt = String::from_utf8(prompt).unwrap();
        assert!(prompt.contains("Tracker URL"));
        assert!(prompt.contains("API token: "));

        assert_eq!(
            paths.read_state().unwrap().api_token.as_deref(),
            Some("secret-token-123456")
        );
        let config = std::fs::read_to_string(paths.config_kdl_path()).unwrap();
        assert!(!config.contains("secret-token"));
    }

    #[test]
    fn test_configure_empty_answers_keep_values() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);
        configure(
            &paths,
            &mut Cursor::new("https://x.atlassian.net\nme\ntoken-value-abcdef\n"),
            &mut Vec::new(),
        )
        .unwrap();

        let mut prompt = Vec::new();
        let output = configure(&paths, &mut Cursor::new("\n\n\n"), &mut prompt).unwrap();
        assert_eq!(output.url.as_deref(), Some("https://x.atlassian.net"));
        assert_eq!(output.username.as_deref(), Some("me"));
        assert_eq!(
            paths.read_state().unwrap().api_token.as_deref(),
            Some("token-value-abcdef")
        );

        // Current values are offered, the token only masked
        let prompt = String::from_utf8(prompt).unwrap();
        assert!(prompt.contains("[https://x.atlassian.net]"));
        assert!(!prompt.contains("token-value-abcdef"));
    }

    #[test]
    fn test_configure_migrates_legacy_token() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);
        std::fs::create_dir_all(paths.config_dir()).unwrap();
        std::fs::write(
            paths.config_kdl_path(),
            "url \"https://x.atlassian.net\"\napi-token \"legacy-token-value\"\n",
        )
        .unwrap();

        let output = configure(&paths, &mut Cursor::new(""), &mut Vec::new()).unwrap();
        assert!(output.migrated_legacy_token);
        assert_eq!(output.url.as_deref(), Some("https://x.atlassian.net"));
        assert_eq!(
            paths.read_state().unwrap().api_token.as_deref(),
            Some("legacy-token-value")
        );
        let config = std::fs::read_to_string(paths.config_kdl_path()).unwrap();
        assert!(!config.contains("api-token"));
    }

    #[test]
    fn test_configure_rejects_bad_url() {
        let temp = TempDir::new().unwrap();
        let result = configure(&paths(&temp), &mut Cursor::new("ftp://nope\n\n\n"), &mut Vec::new());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_config_show_masks_token() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);
        configure(
            &paths,
            &mut Cursor::new("https://x.atlassian.net\nme\nsuper-secret-token\n"),
            &mut Vec::new(),
        )
        .unwrap();

        let output = config_show(&paths).unwrap();
        let token = output
            .entries
            .iter()
            .find(|e| e.key == API_TOKEN_KEY)
            .unwrap();
        assert_eq!(token.value.as_deref(), Some("supe...oken"));
        assert_eq!(token.source.as_deref(), Some("state"));
        assert!(!output.to_json().contains("super-secret-token"));
        assert!(!output.to_human().contains("super-secret-token"));

        let pattern = output
            .entries
            .iter()
            .find(|e| e.key == BRANCH_PATTERN_KEY)
            .unwrap();
        assert_eq!(pattern.source.as_deref(), Some("default"));
    }

    #[test]
    fn test_config_set_then_get() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);

        let set = config_set(&paths, MAX_BRANCHES_KEY, "5").unwrap();
        assert_eq!(set.value, "5");

        let get = config_get(&paths, MAX_BRANCHES_KEY).unwrap();
        assert_eq!(get.entry.value.as_deref(), Some("5"));
        assert_eq!(get.entry.source.as_deref(), Some("config"));
        assert_eq!(get.to_human(), "5");

        let url = config_set(&paths, URL_KEY, " https://x.atlassian.net/ ").unwrap();
        assert_eq!(url.value, "https://x.atlassian.net");
    }

    #[test]
    fn test_config_set_rejects_invalid_values() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);

        assert!(config_set(&paths, BRANCH_PATTERN_KEY, "[A-Z]+-\\d+").is_err());
        assert!(config_set(&paths, CACHE_DURATION_KEY, "0").is_err());
        assert!(config_set(&paths, API_TOKEN_KEY, "x").is_err());
        assert!(config_set(&paths, "bogus", "x").is_err());
        assert!(!paths.config_kdl_path().exists());
    }

    #[test]
    fn test_config_get_unset_and_unknown() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);

        let get = config_get(&paths, USERNAME_KEY).unwrap();
        assert_eq!(get.entry.value, None);
        assert_eq!(get.to_human(), "username is not set");

        let err = config_get(&paths, "bogus").unwrap_err();
        assert!(err.to_string().contains("Unknown config key"));
    }
}
