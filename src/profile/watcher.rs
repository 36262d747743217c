//! Profile directory watcher for hot-reload of externally edited profiles

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Quiet period after the last event before a change is reported
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Reports profile files in a directory that were created or modified
///
/// The directory is watched rather than the file, so editors that save by
/// replacing the file are still seen.
pub struct ProfileWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<String>,
}

impl ProfileWatcher {
    /// Start watching `dir`. Must be called inside a Tokio runtime.
    pub fn new(dir: &Path) -> Result<Self> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<PathBuf>();
        let (tx, rx) = mpsc::channel(16);

        // notify calls back on its own OS thread
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) => {
                    for path in event.paths {
                        let _ = raw_tx.send(path);
                    }
                }
                Ok(_) => {}
                Err(e) => error!("Profile watch error: {}", e),
            }
        })?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch profile directory: {}", dir.display()))?;

        tokio::spawn(async move {
            while let Some(first) = raw_rx.recv().await {
                // Collapse the burst of events a single save produces
                let mut changed = BTreeSet::new();
                changed.insert(first);
                loop {
                    match tokio::time::timeout(DEBOUNCE, raw_rx.recv()).await {
                        Ok(Some(path)) => {
                            changed.insert(path);
                        }
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }

                for path in changed {
                    if !is_profile_file(&path) {
                        continue;
                    }
                    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned())
                    else {
                        continue;
                    };
                    debug!("Profile file changed: {}", name);
                    if tx.send(name).await.is_err() {
                        return;
                    }
                }
            }
        });

        info!("Profile watcher started for: {}", dir.display());
        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next changed profile file name
    /// Returns None if the watcher has been closed
    pub async fn next_change(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Profile documents are `.yaml`/`.yml` files
pub fn is_profile_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
