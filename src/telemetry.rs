//! Logging setup.
//!
//! Two sinks: a compact stderr layer whose level follows `-v` (or `TL_LOG`),
//! and a daily-rolling file under the data directory that records at info
//! level by default so that background activity can be inspected later.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::metadata::LevelFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Environment variable holding a filter directive, e.g. `tiller=debug`.
pub const LOG_ENV: &str = "TL_LOG";

const LOG_FILE_PREFIX: &str = "tiller.log";

/// Rolled log files kept on disk.
const MAX_LOG_FILES: usize = 7;

#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Number of `-v` flags
    pub verbosity: u8,
    /// Directory for the rolling log file; `None` disables file logging
    pub log_dir: Option<PathBuf>,
}

impl TelemetryConfig {
    pub fn new(verbosity: u8, log_dir: Option<PathBuf>) -> Self {
        Self { verbosity, log_dir }
    }
}

/// Flushes the file writer when dropped. Keep it alive for the whole run.
pub struct TelemetryGuard {
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(config: TelemetryConfig) -> TelemetryGuard {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    layers.push(
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(filter(level_from_verbosity(config.verbosity)))
            .boxed(),
    );

    let mut guard = None;
    let mut setup_error = None;
    if let Some(dir) = &config.log_dir {
        match fs::create_dir_all(dir) {
            Ok(()) => {
                if let Err(e) = prune_logs(dir, LOG_FILE_PREFIX, MAX_LOG_FILES) {
                    setup_error = Some(format!("log retention failed: {}", e));
                }
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                let (writer, file_guard) = tracing_appender::non_blocking(appender);
                layers.push(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true)
                        .with_filter(filter(LevelFilter::INFO))
                        .boxed(),
                );
                guard = Some(file_guard);
            }
            Err(e) => {
                setup_error = Some(format!("log dir init failed for {}: {}", dir.display(), e));
            }
        }
    }

    // A subscriber may already be installed (tests, embedding hosts)
    if Registry::default().with(layers).try_init().is_err() {
        tracing::debug!("Global subscriber already installed");
    }
    if let Some(error) = setup_error {
        tracing::warn!("{}", error);
    }

    TelemetryGuard { _guard: guard }
}

fn filter(default: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy()
}

fn level_from_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}

/// Delete all but the `keep` most recently modified log files.
fn prune_logs(dir: &Path, prefix: &str, keep: usize) -> std::io::Result<usize> {
    let mut entries: Vec<(PathBuf, SystemTime)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((path, modified));
    }

    entries.sort_by(|a, b| b.1.cmp(&a.1));
    let mut removed = 0;
    for (path, _) in entries.into_iter().skip(keep) {
        if fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_level_from_verbosity() {
        assert_eq!(level_from_verbosity(0), LevelFilter::ERROR);
        assert_eq!(level_from_verbosity(1), LevelFilter::INFO);
        assert_eq!(level_from_verbosity(5), LevelFilter::DEBUG);
    }

    #[test]
    fn test_prune_logs_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3_600);
        for i in 0..4u64 {
            let path = dir.path().join(format!("{}.2026-01-0{}", LOG_FILE_PREFIX, i + 1));
            fs::write(&path, "x").unwrap();
            let file = fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(base + Duration::from_secs(i * 60)).unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), "x").unwrap();

        let removed = prune_logs(dir.path(), LOG_FILE_PREFIX, 2).unwrap();
        assert_eq!(removed, 2);
        assert!(dir.path().join(format!("{}.2026-01-04", LOG_FILE_PREFIX)).exists());
        assert!(dir.path().join(format!("{}.2026-01-03", LOG_FILE_PREFIX)).exists());
        assert!(!dir.path().join(format!("{}.2026-01-01", LOG_FILE_PREFIX)).exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_prune_logs_missing_dir_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(prune_logs(&dir.path().join("nope"), LOG_FILE_PREFIX, 1).is_err());
    }
}
