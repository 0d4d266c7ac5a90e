//! Tiller - keeps git branches in sync with their issue tracker records.
//!
//! This library provides the core functionality for the `tl` CLI tool:
//! extracting issue keys from branch names, resolving them through a
//! two-tier cache backed by the tracker's REST API, keeping an ordered list
//! of branch records up to date as the repository changes, and projecting
//! that list into a tree of view nodes.

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod git;
pub mod models;
pub mod notices;
pub mod reconciler;
pub mod telemetry;
pub mod tracker;
pub mod view;


/// Library-level error type for Tiller operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("KDL error: {0}")]
    Kdl(#[from] kdl::KdlError),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Not a git repository: {0}")]
    NotARepository(String),

    #[error("Invalid branch pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Tiller operations.
pub type Result<T> = std::result::Result<T, Error>;
