//! File system watcher for HEAD and branch ref changes

use std::path::{Component, Path};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{StateChange, StateSubscription};
use crate::{Error, Result};

/// Debounce duration - wait this long after last event before signalling
const DEBOUNCE_MS: u64 = 200;

/// Keeps the watcher registered and the debounce task alive.
struct WatchGuard {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watch `git_dir` (HEAD) and `common_dir` (refs, packed-refs) for changes.
///
/// Must be called from within a tokio runtime.
pub(super) fn watch_refs(git_dir: &Path, common_dir: &Path) -> Result<StateSubscription> {
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| Error::Other(format!("Cannot watch repository outside a runtime: {}", e)))?;

    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                if is_ref_event(&event) {
                    let _ = raw_tx.send(());
                }
            }
            Err(e) => tracing::warn!("Repository watcher error: {}", e),
        },
        Config::default(),
    )
    .map_err(watch_error)?;

    watcher
        .watch(git_dir, RecursiveMode::NonRecursive)
        .map_err(watch_error)?;
    if common_dir != git_dir {
        watcher
            .watch(common_dir, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;
    }
    let heads = common_dir.join("refs").join("heads");
    if heads.is_dir() {
        watcher
            .watch(&heads, RecursiveMode::Recursive)
            .map_err(watch_error)?;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let task = runtime.spawn(debounce(raw_rx, tx));
    tracing::debug!("Watching {} for ref changes", git_dir.display());

    Ok(StateSubscription::with_guard(
        rx,
        WatchGuard {
            _watcher: watcher,
            task,
        },
    ))
}

/// Collapse bursts of raw events into one [`StateChange`].
async fn debounce(
    mut raw_rx: mpsc::UnboundedReceiver<()>,
    tx: mpsc::UnboundedSender<StateChange>,
) {
    let debounce = Duration::from_millis(DEBOUNCE_MS);
    let mut pending_update = false;
    let mut last_event_time = Instant::now();

    loop {
        let timeout = debounce.saturating_sub(last_event_time.elapsed());

        tokio::select! {
            event = raw_rx.recv() => {
                match event {
                    Some(()) => {
                        pending_update = true;
                        last_event_time = Instant::now();
                    }
                    None => break, // Watcher dropped
                }
            }
            _ = tokio::time::sleep(timeout), if pending_update => {
                pending_update = false;
                if tx.send(StateChange).is_err() {
                    break; // Subscriber gone
                }
            }
        }
    }
}

/// Whether an event touches HEAD, packed-refs or anything under refs/heads.
fn is_ref_event(event: &Event) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event.paths.iter().any(|path| is_ref_path(path))
}

fn is_ref_path(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.ends_with(".lock") {
        return false;
    }
    if name == "HEAD" || name == "packed-refs" {
        return true;
    }

    let components: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    components
        .windows(2)
        .any(|pair| pair[0] == "refs" && pair[1] == "heads")
}

fn watch_error(e: notify::Error) -> Error {
    Error::Other(format!("Failed to watch repository: {}", e))
}
