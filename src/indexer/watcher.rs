//! Per-project filesystem watcher.
//!
//! A recursive `notify` watcher feeds create/modify/delete events into a
//! debouncing loop: changes to the same path are coalesced over a ~500 ms
//! window, then the dirty set is handed to the re-index callback. Watcher
//! errors tear the watcher down and restart it with exponential backoff
//! (250 ms doubling to an 8 s cap); a successful restart resets the delay.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Debounce window per dirty set.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
/// First restart delay after a watcher error.
const BACKOFF_INITIAL: Duration = Duration::from_millis(250);
/// Restart delay cap.
const BACKOFF_CAP: Duration = Duration::from_secs(8);

/// Handle to one project's running watcher task.
pub struct ProjectWatcher {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl ProjectWatcher {
    /// Watch `root` recursively; `on_dirty` receives each debounced batch
    /// of changed paths. The task runs until [`ProjectWatcher::stop`].
    pub fn spawn<F>(project_id: String, root: PathBuf, on_dirty: F) -> Self
    where
        F: Fn(Vec<PathBuf>) + Send + Sync + 'static,
    {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            watch_loop(project_id, root, on_dirty, task_cancel).await;
        });
        Self { cancel, task }
    }

    /// Stop the watcher and wait for the task to wind down.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn watch_loop<F>(
    project_id: String,
    root: PathBuf,
    on_dirty: F,
    cancel: CancellationToken,
) where
    F: Fn(Vec<PathBuf>) + Send + Sync + 'static,
{
    let mut backoff = BACKOFF_INITIAL;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let watcher = RecommendedWatcher::new(
            move |result| {
                let _ = tx.send(result);
            },
            notify::Config::default(),
        );

        let mut watcher = match watcher {
            Ok(w) => w,
            Err(e) => {
                warn!(project = %project_id, error = %e, "failed to create watcher, backing off");
                if sleep_or_cancel(backoff, &cancel).await {
                    return;
                }
                backoff = (backoff * 2).min(BACKOFF_CAP);
                continue;
            }
        };

        if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
            warn!(project = %project_id, error = %e, "failed to watch root, backing off");
            if sleep_or_cancel(backoff, &cancel).await {
                return;
            }
            backoff = (backoff * 2).min(BACKOFF_CAP);
            continue;
        }

        info!(project = %project_id, root = %root.display(), "file watcher active");
        backoff = BACKOFF_INITIAL;

        // The watcher must stay alive while we drain its channel; an error
        // event breaks out so the outer loop can rebuild it.
        let restart = drain_events(&project_id, rx, &on_dirty, &cancel).await;
        drop(watcher);
        if !restart {
            return;
        }
        warn!(project = %project_id, "watcher errored, restarting");
        if sleep_or_cancel(backoff, &cancel).await {
            return;
        }
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

/// Debounce loop. Returns `true` when the watcher should be rebuilt,
/// `false` on cancellation.
async fn drain_events<F>(
    project_id: &str,
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    on_dirty: &F,
    cancel: &CancellationToken,
) -> bool
where
    F: Fn(Vec<PathBuf>) + Send + Sync,
{
    let mut dirty: HashSet<PathBuf> = HashSet::new();

    loop {
        let timeout = if dirty.is_empty() {
            // Nothing pending: wait indefinitely for the next event.
            None
        } else {
            Some(DEBOUNCE_WINDOW)
        };

        let received = tokio::select! {
            _ = cancel.cancelled() => return false,
            event = rx.recv() => Some(event),
            _ = async {
                match timeout {
                    Some(window) => tokio::time::sleep(window).await,
                    None => std::future::pending::<()>().await,
                }
            } => None,
        };

        match received {
            None => {
                // Debounce window elapsed: flush.
                let batch: Vec<PathBuf> = dirty.drain().collect();
                debug!(project = %project_id, files = batch.len(), "flushing dirty set");
                on_dirty(batch);
            }
            Some(None) => return true, // channel closed: watcher is gone
            Some(Some(Ok(event))) => {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    dirty.extend(event.paths);
                }
            }
            Some(Some(Err(e))) => {
                warn!(project = %project_id, error = %e, "watch event error");
                return true;
            }
        }
    }
}

/// Sleep unless cancelled first. Returns `true` on cancellation.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
