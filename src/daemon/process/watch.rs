//! Filesystem watching for `watch = true` directives.
//!
//! One watcher per directive observes its `cwd` recursively. Relevant events
//! are debounced and broadcast to every instance monitor, which answers with a
//! forced restart.

use std::path::PathBuf;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::Directive;
use crate::error::{Error, Result};

/// Keeps a directive's watcher alive. Dropping it stops watching.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    restarts: broadcast::Sender<()>,
}

impl WatchHandle {
    /// A receiver that yields once per debounced change burst.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.restarts.subscribe()
    }
}

/// Paths whose changes never trigger a restart: explicit `ignore_watch`
/// entries plus every log file the directive's instances write.
///
/// Only the log files themselves are ignored, never their directories, so a
/// log kept next to the sources does not hide source changes.
pub fn ignored_paths(directive: &Directive) -> Vec<PathBuf> {
    let mut ignored = directive.ignore_watch.clone();
    for instance in 0..directive.instances {
        let logs = directive.log_paths(instance);
        ignored.push(logs.out);
        ignored.push(logs.error);
    }
    ignored.sort();
    ignored.dedup();
    ignored
}

/// Whether `event` should restart the directive.
pub fn is_relevant(event: &Event, ignored: &[PathBuf]) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );

    kind_matches
        && event
            .paths
            .iter()
            .any(|path| !ignored.iter().any(|prefix| path.starts_with(prefix)))
}

/// Start watching `directive.cwd`.
///
/// Must be called inside a tokio runtime; the debounce loop runs as a task.
///
/// # Errors
///
/// Returns [`Error::Io`] if the watcher cannot be created or the directory
/// cannot be watched.
pub fn watch_directive(directive: &Directive, debounce: Duration) -> Result<WatchHandle> {
    let ignored = ignored_paths(directive);
    let (event_tx, event_rx) = mpsc::unbounded_channel::<PathBuf>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) if is_relevant(&event, &ignored) => {
                if let Some(path) = event.paths.first() {
                    let _ = event_tx.send(path.clone());
                }
            },
            Ok(_) => {},
            Err(e) => warn!(error = %e, "File watcher error"),
        },
        notify::Config::default(),
    )
    .map_err(|e| Error::io("creating file watcher", std::io::Error::other(e)))?;

    watcher
        .watch(&directive.cwd, RecursiveMode::Recursive)
        .map_err(|e| {
            Error::io(
                format!("watching {}", directive.cwd.display()),
                std::io::Error::other(e),
            )
        })?;

    let (restarts, _) = broadcast::channel(8);
    tokio::spawn(debounce_loop(
        directive.name.clone(),
        event_rx,
        restarts.clone(),
        debounce,
    ));

    info!(name = %directive.name, cwd = %directive.cwd.display(), "Watching for changes");

    Ok(WatchHandle {
        _watcher: watcher,
        restarts,
    })
}

/// Collapse a burst of events into one restart signal.
async fn debounce_loop(
    name: String,
    mut events: mpsc::UnboundedReceiver<PathBuf>,
    restarts: broadcast::Sender<()>,
    debounce: Duration,
) {
    while let Some(first) = events.recv().await {
        tokio::time::sleep(debounce).await;
        let mut burst = 1usize;
        while events.try_recv().is_ok() {
            burst += 1;
        }

        info!(name = %name, path = %first.display(), events = burst, "Change detected, restarting");
        if restarts.send(()).is_err() {
            debug!(name = %name, "No instance is listening for watch restarts");
        }
    }
}
