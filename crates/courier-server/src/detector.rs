//! Change detection on the host message store.
//!
//! The store is a SQLite database in WAL mode, so a committed write touches
//! either the database file or its `-wal` sibling. Neither can be watched
//! reliably on its own on every platform, so the watcher sits on the parent
//! directory and filters by file name.
//!
//! Raw events land in a capacity-1 channel; a burst of them collapses into
//! a single pending signal, and the debounce task fires the callback once
//! the store has been quiet for the configured window, or after
//! [`MAX_WAIT_WINDOWS`] windows of continuous writes.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// A burst of writes delays the callback by at most this many windows.
pub const MAX_WAIT_WINDOWS: u32 = 4;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("store watcher unavailable: {0}")]
    WatchUnavailable(#[from] notify::Error),

    #[error("store path has no file name: {0}")]
    InvalidPath(String),
}

pub struct ChangeDetector {
    watcher: Option<RecommendedWatcher>,
    debounce: JoinHandle<()>,
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector").finish_non_exhaustive()
    }
}

impl ChangeDetector {
    /// Watch `store_path` and call `on_change` after each quiet window.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(store_path: &Path, debounce: Duration, on_change: F) -> Result<Self, DetectorError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let parent = store_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let Some(db_name) = store_path.file_name().map(|n| n.to_os_string()) else {
            return Err(DetectorError::InvalidPath(store_path.display().to_string()));
        };
        let mut wal_name = db_name.clone();
        wal_name.push("-wal");

        let (tx, rx) = mpsc::channel::<()>(1);
        let targets: [OsString; 2] = [db_name, wal_name];

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if !matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
                        ) {
                            return;
                        }
                        let relevant = event.paths.iter().any(|p| {
                            p.file_name()
                                .is_some_and(|name| targets.iter().any(|t| t == name))
                        });
                        if relevant {
                            // Full means a signal is already pending.
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "store watcher error"),
                }
            })?;
        watcher.watch(parent, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %store_path.display(), ?debounce, "watching message store");

        let debounce = tokio::spawn(debounce_loop(rx, debounce, on_change));
        Ok(Self {
            watcher: Some(watcher),
            debounce,
        })
    }

    /// Stop watching. A callback already running is not interrupted.
    pub fn stop(mut self) {
        self.watcher.take();
        self.debounce.abort();
        tracing::info!("store watcher stopped");
    }
}

async fn debounce_loop<F: Fn()>(mut rx: mpsc::Receiver<()>, window: Duration, on_change: F) {
    let ceiling = window * MAX_WAIT_WINDOWS;
    while rx.recv().await.is_some() {
        let deadline = tokio::time::Instant::now() + ceiling;
        loop {
            let quiet_until = (tokio::time::Instant::now() + window).min(deadline);
            match tokio::time::timeout_at(quiet_until, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => {
                    on_change();
                    return;
                }
                Err(_) => break,
            }
        }
        on_change();
    }
}

/// Fallback when the store cannot be watched: fire on a fixed interval
/// until `shutdown` flips to true.
pub fn spawn_poller<F>(interval: Duration, on_tick: F, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    tracing::info!(?interval, "polling message store");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => on_tick(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
