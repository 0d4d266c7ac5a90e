//! CLI argument definitions for Tiller.

use clap::{Parser, Subcommand};

/// Version string with the commit and build time baked in by build.rs.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("TL_GIT_COMMIT"),
    ", built ",
    env!("TL_BUILD_TIMESTAMP"),
    ")"
);

/// Tiller - keeps git branches in sync with their issue tracker records.
///
/// Branch names are matched against a pattern (default `([A-Z]+-\d+)`) and
/// the captured key is looked up in the issue tracker.
#[derive(Parser, Debug)]
#[command(name = "tl")]
#[command(author, version = LONG_VERSION, about = "Keep git branches in sync with their issue tracker records", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Run as if tl was started in <path> instead of the current directory.
    /// Can also be set via TL_REPO environment variable.
    #[arg(short = 'C', long = "repo", global = true, env = "TL_REPO")]
    pub repo_path: Option<std::path::PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List tracked branches with their issues
    Branches {
        /// Expand every node of the tree (human output)
        #[arg(long)]
        expand: bool,
    },

    /// Keep reconciling as the repository changes, until Ctrl-C
    Watch {
        /// Expand every node of the tree
        #[arg(long)]
        expand: bool,
    },

    /// Clear both cache tiers and reload every branch
    Refresh,

    /// Show a single issue and its sub-issues
    Issue {
        /// Issue key (e.g., ABC-123)
        key: String,
    },

    /// Print the issue key a branch name maps to
    Key {
        /// Branch name (e.g., feature/ABC-123-login)
        branch: String,
    },

    /// Open an issue in the browser
    ///
    /// Defaults to the issue of the checked-out branch.
    Open {
        /// Issue key
        key: Option<String>,
    },

    /// Copy an issue key to the clipboard
    ///
    /// Defaults to the issue of the checked-out branch.
    Copy {
        /// Issue key
        key: Option<String>,
    },

    /// Set the tracker URL, username and API token interactively
    Configure,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Cache management
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show every setting with where it came from
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Set a configuration value in config.kdl
    Set {
        /// Configuration key (url, username, branch-pattern, max-branches,
        /// cache-enabled, cache-duration)
        key: String,
        /// Configuration value
        value: String,
    },
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Empty the memory and persistent caches
    Clear,

    /// Show cache entry counts
    Stats,
}
