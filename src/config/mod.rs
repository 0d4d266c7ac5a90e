//! Configuration and state management for Tiller.
//!
//! This module defines KDL schemas for two distinct files:
//!
//! ## config.kdl - User preferences (safe to sync across machines)
//!
//! Located at `$TL_CONFIG_DIR/config.kdl`, else `~/.config/tiller/config.kdl`.
//!
//! Contains:
//! - `url` - Tracker base URL
//! - `username` - Tracker account name
//! - `branch-pattern` - Regex whose first capture group is the issue key
//! - `max-branches` - Branch limit (0 = unlimited)
//! - `cache-enabled` - Whether the persistent cache is used
//! - `cache-duration` - Persistent cache lifetime in seconds
//!
//! ## state.kdl - Runtime state (machine-specific, contains secrets)
//!
//! Located at `$TL_DATA_DIR/state.kdl`, else `~/.local/share/tiller/state.kdl`.
//!
//! Contains:
//! - `api-token` - Tracker API token
//!
//! ## Security
//!
//! **CRITICAL**: `state.kdl` MUST be created with 0600 permissions (owner read/write only)
//! because it contains the API token.
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use kdl::KdlDocument;
use regex::Regex;

use crate::{Error, Result};

pub use resolver::{
    API_TOKEN_ENV, Resolved, ResolvedConfig, URL_ENV, USERNAME_ENV, ValueSource, resolve_config,
    resolve_config_with_env,
};
pub use schema::{CONFIG_KEYS, TillerConfig, TillerState};
#[cfg(unix)]
pub use schema::{CONFIG_FILE_MODE, STATE_FILE_MODE};

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "TL_CONFIG_DIR";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TL_DATA_DIR";

/// Default identifier pattern: the first capture group is the issue key.
pub const DEFAULT_BRANCH_PATTERN: &str = r"([A-Z]+-\d+)";

/// Default number of branches tracked.
pub const DEFAULT_MAX_BRANCHES: usize = 20;

/// Default persistent cache lifetime (one day).
pub const DEFAULT_CACHE_DURATION_SECS: u64 = 86_400;

/// Default memory cache lifetime (one hour).
pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(3_600);

const CONFIG_FILE: &str = "config.kdl";
const STATE_FILE: &str = "state.kdl";

/// Connection details for the issue tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerSettings {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub api_token: Option<String>,
}

/// Cache tier settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Whether the persistent tier is used
    pub enabled: bool,
    /// Maximum age of a persistent entry
    pub duration: Duration,
    /// Lifetime of a memory entry
    pub memory_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            duration: Duration::from_secs(DEFAULT_CACHE_DURATION_SECS),
            memory_ttl: DEFAULT_MEMORY_TTL,
        }
    }
}

/// Settings resolved once at startup and passed into each constructor.
#[derive(Debug, Clone)]
pub struct Settings {
    pub tracker: TrackerSettings,
    pub branch_pattern: Regex,
    /// 0 = unlimited
    pub max_branches: usize,
    pub cache: CacheSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tracker: TrackerSettings::default(),
            branch_pattern: default_branch_pattern(),
            max_branches: DEFAULT_MAX_BRANCHES,
            cache: CacheSettings::default(),
        }
    }
}

fn default_branch_pattern() -> Regex {
    Regex::new(DEFAULT_BRANCH_PATTERN).expect("Invalid regex")
}

/// Locations of the config and data directories.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl ConfigPaths {
    pub fn new(config_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Resolve directories from `TL_CONFIG_DIR`/`TL_DATA_DIR`, falling back
    /// to the platform config and data directories.
    pub fn from_env() -> Result<Self> {
        let config_dir = match std::env::var(CONFIG_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::config_dir()
                .ok_or_else(|| Error::Other("Could not determine config directory".to_string()))?
                .join("tiller"),
        };
        let data_dir = match std::env::var(DATA_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::data_dir()
                .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?
                .join("tiller"),
        };
        Ok(Self::new(config_dir, data_dir))
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_kdl_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn state_kdl_path(&self) -> PathBuf {
        self.data_dir.join(STATE_FILE)
    }

    /// Directory holding the rolling log files.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Read config.kdl as a raw document (empty if missing).
    pub fn read_config_doc(&self) -> Result<KdlDocument> {
        read_kdl(&self.config_kdl_path())
    }

    pub fn read_config(&self) -> Result<TillerConfig> {
        Ok(TillerConfig::from_kdl(&self.read_config_doc()?))
    }

    /// Write config.kdl. Any legacy token in the file is not carried over.
    pub fn write_config(&self, config: &TillerConfig) -> Result<()> {
        config.validate().map_err(Error::InvalidInput)?;
        write_kdl(&self.config_kdl_path(), config.to_kdl(), false)
    }

    pub fn read_state(&self) -> Result<TillerState> {
        Ok(TillerState::from_kdl(&read_kdl(&self.state_kdl_path())?))
    }

    /// Write state.kdl with owner-only permissions.
    pub fn write_state(&self, state: &TillerState) -> Result<()> {
        write_kdl(&self.state_kdl_path(), state.to_kdl(), true)
    }

    /// Move an `api-token` found in config.kdl into state.kdl.
    ///
    /// A token already in state.kdl is kept. Returns true if config.kdl had
    /// a token to remove.
    pub fn migrate_legacy_token(&self) -> Result<bool> {
        let mut doc = self.read_config_doc()?;
        let Some(token) = schema::get_legacy_token_from_config(&doc) else {
            return Ok(false);
        };

        let mut state = self.read_state()?;
        if state.api_token.is_none() {
            state.api_token = Some(token);
            self.write_state(&state)?;
        }

        schema::remove_token_from_kdl_doc(&mut doc);
        write_kdl(&self.config_kdl_path(), doc, false)?;
        tracing::info!(
            "Moved api-token from {} to {}",
            self.config_kdl_path().display(),
            self.state_kdl_path().display()
        );
        Ok(true)
    }
}

fn read_kdl(path: &Path) -> Result<KdlDocument> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content.parse::<KdlDocument>()?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(KdlDocument::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_kdl(path: &Path, mut doc: KdlDocument, secret: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    doc.autoformat();
    std::fs::write(path, doc.to_string())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if secret { STATE_FILE_MODE } else { CONFIG_FILE_MODE };
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = secret;

    Ok(())
}
