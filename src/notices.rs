//! User-visible notices.
//!
//! Components record warnings and errors meant for the person at the
//! terminal here instead of printing directly. The CLI drains pending
//! notices to stderr after each command; a bounded history is kept for
//! `watch` mode. Every notice is also emitted as a tracing event.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Maximum history entries to keep
const MAX_HISTORY_ENTRIES: usize = 100;

/// Notice level
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// Informational message
    Info,
    /// Something is misconfigured or degraded
    Warning,
    /// An operation the user asked for failed
    Error,
}

impl NoticeLevel {
    /// Get icon/prefix for this level
    pub fn icon(&self) -> &'static str {
        match self {
            NoticeLevel::Info => "ℹ",
            NoticeLevel::Warning => "⚠",
            NoticeLevel::Error => "✗",
        }
    }
}

/// A single notice
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.level.icon(), self.message)
    }
}

#[derive(Debug, Default)]
struct NoticeState {
    pending: Vec<Notice>,
    history: VecDeque<Notice>,
    shown_once: HashSet<String>,
}

/// Shared sink for user-visible notices.
#[derive(Debug, Default)]
pub struct Notices {
    state: Mutex<NoticeState>,
}

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.push(NoticeLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.push(NoticeLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.push(NoticeLevel::Error, message);
    }

    /// Record a warning only the first time `key` is seen.
    ///
    /// Returns true if the warning was recorded.
    pub fn warn_once(&self, key: &str, message: impl Into<String>) -> bool {
        let first = match self.state.lock() {
            Ok(mut state) => state.shown_once.insert(key.to_string()),
            Err(_) => return false,
        };
        if first {
            self.warn(message);
        }
        first
    }

    /// Take all notices recorded since the last drain.
    pub fn drain(&self) -> Vec<Notice> {
        match self.state.lock() {
            Ok(mut state) => std::mem::take(&mut state.pending),
            Err(_) => Vec::new(),
        }
    }

    /// Most recent notices, oldest first.
    pub fn history(&self) -> Vec<Notice> {
        match self.state.lock() {
            Ok(state) => state.history.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn push(&self, level: NoticeLevel, message: String) {
        let notice = Notice {
            level,
            message,
            timestamp: Utc::now(),
        };
        if let Ok(mut state) = self.state.lock() {
            state.history.push_back(notice.clone());
            while state.history.len() > MAX_HISTORY_ENTRIES {
                state.history.pop_front();
            }
            state.pending.push(notice);
        }
    }
}
