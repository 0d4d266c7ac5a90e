//! KDL schema definitions for config.kdl and state.kdl.
//!
//! This module provides:
//! - Rust structs representing the KDL schema
//! - Serialization/deserialization to/from KDL format
//! - Validation functions
//! - Legacy token detection (for migration)

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

/// Node names used in config.kdl
pub const URL_KEY: &str = "url";
pub const USERNAME_KEY: &str = "username";
pub const BRANCH_PATTERN_KEY: &str = "branch-pattern";
pub const MAX_BRANCHES_KEY: &str = "max-branches";
pub const CACHE_ENABLED_KEY: &str = "cache-enabled";
pub const CACHE_DURATION_KEY: &str = "cache-duration";

/// Node name used in state.kdl (and, for legacy files, in config.kdl)
pub const API_TOKEN_KEY: &str = "api-token";

/// Every key accepted by `tl config set`.
pub const CONFIG_KEYS: &[&str] = &[
    URL_KEY,
    USERNAME_KEY,
    BRANCH_PATTERN_KEY,
    MAX_BRANCHES_KEY,
    CACHE_ENABLED_KEY,
    CACHE_DURATION_KEY,
];

/// User preferences stored in config.kdl.
///
/// Safe to sync across machines. File permissions: 0644 (rw-r--r--)
///
/// # KDL Schema
///
/// ```kdl
/// url "https://example.atlassian.net"
/// username "me@example.com"
/// branch-pattern "([A-Z]+-\\d+)"
/// max-branches 20
/// cache-enabled #true
/// cache-duration 86400
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TillerConfig {
    /// Tracker base URL
    pub url: Option<String>,

    /// Tracker account name
    pub username: Option<String>,

    /// Regex whose first capture group is the issue key
    pub branch_pattern: Option<String>,

    /// Maximum number of branches to track (0 = unlimited)
    pub max_branches: Option<usize>,

    /// Whether the persistent cache tier is used
    pub cache_enabled: Option<bool>,

    /// Persistent cache lifetime in seconds
    pub cache_duration: Option<u64>,
}

impl TillerConfig {
    /// Create an empty config with no values set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref pattern) = self.branch_pattern {
            validate_branch_pattern(pattern)?;
        }
        if self.cache_duration == Some(0) {
            return Err(format!("{} must be greater than 0", CACHE_DURATION_KEY));
        }
        if let Some(ref url) = self.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("{} must start with http:// or https://", URL_KEY));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        config.url = first_string(doc, URL_KEY);
        config.username = first_string(doc, USERNAME_KEY);
        config.branch_pattern = first_string(doc, BRANCH_PATTERN_KEY);

        if let Some(i) = first_value(doc, MAX_BRANCHES_KEY).and_then(KdlValue::as_integer) {
            config.max_branches = usize::try_from(i).ok();
        }
        config.cache_enabled = first_value(doc, CACHE_ENABLED_KEY).and_then(KdlValue::as_bool);
        if let Some(i) = first_value(doc, CACHE_DURATION_KEY).and_then(KdlValue::as_integer) {
            config.cache_duration = u64::try_from(i).ok();
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref url) = self.url {
            push_node(&mut doc, URL_KEY, KdlValue::String(url.clone()));
        }
        if let Some(ref username) = self.username {
            push_node(&mut doc, USERNAME_KEY, KdlValue::String(username.clone()));
        }
        if let Some(ref pattern) = self.branch_pattern {
            push_node(&mut doc, BRANCH_PATTERN_KEY, KdlValue::String(pattern.clone()));
        }
        if let Some(max) = self.max_branches {
            push_node(&mut doc, MAX_BRANCHES_KEY, KdlValue::Integer(max as i128));
        }
        if let Some(enabled) = self.cache_enabled {
            push_node(&mut doc, CACHE_ENABLED_KEY, KdlValue::Bool(enabled));
        }
        if let Some(duration) = self.cache_duration {
            push_node(&mut doc, CACHE_DURATION_KEY, KdlValue::Integer(duration as i128));
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &TillerConfig) {
        if other.url.is_some() {
            self.url = other.url.clone();
        }
        if other.username.is_some() {
            self.username = other.username.clone();
        }
        if other.branch_pattern.is_some() {
            self.branch_pattern = other.branch_pattern.clone();
        }
        if other.max_branches.is_some() {
            self.max_branches = other.max_branches;
        }
        if other.cache_enabled.is_some() {
            self.cache_enabled = other.cache_enabled;
        }
        if other.cache_duration.is_some() {
            self.cache_duration = other.cache_duration;
        }
    }

    /// Set a single value from its string form, as typed on the command line.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            URL_KEY => self.url = Some(value.trim().trim_end_matches('/').to_string()),
            USERNAME_KEY => self.username = Some(value.to_string()),
            BRANCH_PATTERN_KEY => {
                validate_branch_pattern(value)?;
                self.branch_pattern = Some(value.to_string());
            }
            MAX_BRANCHES_KEY => {
                let max = value.parse::<usize>().map_err(|_| {
                    format!("{} must be a non-negative integer, got {}", key, value)
                })?;
                self.max_branches = Some(max);
            }
            CACHE_ENABLED_KEY => {
                let enabled = parse_bool(value)
                    .ok_or_else(|| format!("{} must be true or false, got {}", key, value))?;
                self.cache_enabled = Some(enabled);
            }
            CACHE_DURATION_KEY => {
                let seconds = value
                    .parse::<u64>()
                    .map_err(|_| format!("{} must be a number of seconds, got {}", key, value))?;
                self.cache_duration = Some(seconds);
            }
            API_TOKEN_KEY => {
                return Err(format!(
                    "{} is stored in state.kdl; run `tl configure` to set it",
                    API_TOKEN_KEY
                ));
            }
            _ => {
                return Err(format!(
                    "Unknown config key: {} (valid keys: {})",
                    key,
                    CONFIG_KEYS.join(", ")
                ));
            }
        }
        self.validate()
    }
}

/// Runtime state stored in state.kdl.
///
/// Contains the tracker API token.
/// **MUST be created with 0600 permissions (owner read/write only)**.
///
/// # KDL Schema
///
/// ```kdl
/// api-token "xxxxxxxxxxxxxxxxxxxx"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TillerState {
    /// Tracker API token (sensitive!)
    pub api_token: Option<String>,
}

impl TillerState {
    /// Create an empty state with no values set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if this state contains any secrets.
    pub fn has_secrets(&self) -> bool {
        self.api_token.is_some()
    }

    /// Mask the API token for display purposes.
    pub fn masked_token(&self) -> Option<String> {
        self.api_token.as_deref().map(mask_secret)
    }

    /// Parse state from a KDL document.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        Self {
            api_token: first_string(doc, API_TOKEN_KEY),
        }
    }

    /// Convert state to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();
        if let Some(ref token) = self.api_token {
            push_node(&mut doc, API_TOKEN_KEY, KdlValue::String(token.clone()));
        }
        doc
    }

    /// Merge another state into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &TillerState) {
        if other.api_token.is_some() {
            self.api_token = other.api_token.clone();
        }
    }
}

/// Required permissions for state.kdl (Unix: 0600, owner read/write only).
#[cfg(unix)]
pub const STATE_FILE_MODE: u32 = 0o600;

/// Required permissions for config.kdl (Unix: 0644, readable by all).
#[cfg(unix)]
pub const CONFIG_FILE_MODE: u32 = 0o644;

/// Check that a branch pattern compiles and has a capture group.
pub fn validate_branch_pattern(pattern: &str) -> Result<(), String> {
    let regex = regex::Regex::new(pattern)
        .map_err(|e| format!("{} does not compile: {}", BRANCH_PATTERN_KEY, e))?;
    if regex.captures_len() < 2 {
        return Err(format!(
            "{} must contain a capture group for the issue key",
            BRANCH_PATTERN_KEY
        ));
    }
    Ok(())
}

/// Show the first and last 4 characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        // Too short to mask meaningfully, hide everything after the prefix
        let prefix: String = chars.iter().take(4).collect();
        format!("{}...", prefix)
    } else {
        let prefix: String = chars[..4].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    }
}

/// Check if a KDL document contains a legacy api-token entry.
///
/// Tokens should be stored in state.kdl, not config.kdl.
pub fn has_legacy_token_in_config(doc: &KdlDocument) -> bool {
    doc.get(API_TOKEN_KEY).is_some()
}

/// Extract a legacy api-token from a KDL document (config.kdl).
pub fn get_legacy_token_from_config(doc: &KdlDocument) -> Option<String> {
    first_string(doc, API_TOKEN_KEY)
}

/// Remove an api-token entry from a KDL document.
///
/// Returns true if a token was removed, false if none was found.
pub fn remove_token_from_kdl_doc(doc: &mut KdlDocument) -> bool {
    let nodes = doc.nodes_mut();
    let original_len = nodes.len();
    nodes.retain(|node| node.name().value() != API_TOKEN_KEY);
    nodes.len() < original_len
}

fn first_value<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlValue> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .map(KdlEntry::value)
}

fn first_string(doc: &KdlDocument, name: &str) -> Option<String> {
    first_value(doc, name)
        .and_then(KdlValue::as_string)
        .map(str::to_string)
}

fn push_node(doc: &mut KdlDocument, name: &str, value: KdlValue) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(value));
    doc.nodes_mut().push(node);
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
