//! Snapshot watching.
//!
//! Whatever drives the browser rewrites the DOM snapshot when the page
//! changes. Each burst of writes is treated as one navigation and forwarded
//! to the page context.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ErrorKind;
use crate::messaging::{ContextClient, ContextRequest};

/// Quiet period that ends a burst of snapshot writes
pub const DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotChanged {
    pub path: PathBuf,
}

/// Watches one snapshot file and broadcasts its changes.
pub struct SnapshotWatcher {
    tx: broadcast::Sender<SnapshotChanged>,
    _watcher: Option<RecommendedWatcher>,
}

impl SnapshotWatcher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx, _watcher: None }
    }

    /// Start watching `path`.
    ///
    /// The parent directory is watched so that snapshots replaced by rename
    /// keep being noticed.
    pub fn watch(&mut self, path: &Path) -> Result<(), notify::Error> {
        let file_name: OsString = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| notify::Error::generic("snapshot path has no file name"))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let tx = self.tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    for changed in &event.paths {
                        if changed.file_name() == Some(file_name.as_os_str()) {
                            let _ = tx.send(SnapshotChanged {
                                path: changed.clone(),
                            });
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Snapshot watcher error"),
            }
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = ?path, "Watching page snapshot");
        self._watcher = Some(watcher);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotChanged> {
        self.tx.subscribe()
    }

    /// Report a change without touching the file
    pub fn trigger(&self, path: PathBuf) {
        let _ = self.tx.send(SnapshotChanged { path });
    }
}

impl Default for SnapshotWatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward debounced snapshot changes to the page context as navigations
/// to `page_url`.
pub fn spawn_navigation_task(
    rx: broadcast::Receiver<SnapshotChanged>,
    client: ContextClient,
    page_url: Url,
    debounce: Duration,
) -> JoinHandle<()> {
    tokio::spawn(navigation_loop(rx, client, page_url, debounce))
}

async fn navigation_loop(
    mut rx: broadcast::Receiver<SnapshotChanged>,
    client: ContextClient,
    page_url: Url,
    debounce: Duration,
) {
    loop {
        match rx.recv().await {
            Ok(event) => debug!(path = ?event.path, "Snapshot changed"),
            Err(broadcast::error::RecvError::Closed) => return,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Snapshot watcher lagged");
            }
        }

        tokio::time::sleep(debounce).await;
        let mut coalesced = 0u64;
        loop {
            match rx.try_recv() {
                Ok(_) => coalesced += 1,
                Err(broadcast::error::TryRecvError::Empty) => break,
                Err(broadcast::error::TryRecvError::Closed) => return,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    coalesced += n;
                    break;
                }
            }
        }
        if coalesced > 0 {
            debug!(coalesced, "Coalesced snapshot changes");
        }

        let response = client
            .request(ContextRequest::Navigate(page_url.clone()))
            .await;
        if response.error_kind == Some(ErrorKind::ContextUnreachable) {
            info!("Page context closed, no longer forwarding snapshot changes");
            return;
        }
    }
}
