use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::content::store::{ContentStore, EXCLUDED_SUFFIXES};
use crate::prelude::*;

/// watches the shared folder for file-creation events and ingests newly
/// appeared files through [`ContentStore::process_new_file`]. this is a
/// thin wrapper around the `notify` crate -- the algorithmic core of the
/// content engine lives entirely in [`ContentStore`].
pub struct FolderWatcher {
    _watcher: RecommendedWatcher,
}

impl FolderWatcher {
    pub fn start(folder: impl AsRef<Path>, store: Arc<ContentStore>) -> anyhow::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let Ok(event) = event else { return };
            if !matches!(event.kind, EventKind::Create(_)) {
                return;
            }
            for path in event.paths {
                let _ = tx.send(path);
            }
        })?;

        watcher.watch(folder.as_ref(), RecursiveMode::NonRecursive)?;

        tokio::spawn(async move {
            while let Some(path) = rx.recv().await {
                if should_ignore(&path) {
                    continue;
                }

                let store = store.clone();
                tokio::spawn(async move {
                    // let the writer finish before reading; an implementer may
                    // prefer a size-stable check instead of a fixed delay.
                    tokio::time::sleep(Config::WATCHER_DEBOUNCE).await;
                    match tokio::task::spawn_blocking(move || store.process_new_file(&path)).await
                    {
                        Ok(Ok(meta)) => info!(file = %meta.file_name, "ingested new file from watched folder"),
                        Ok(Err(err)) => debug!(%err, "skipped watched-folder event"),
                        Err(err) => warn!(%err, "watcher ingest task panicked"),
                    }
                });
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

fn should_ignore(path: &Path) -> bool {
    if path.is_dir() {
        return true;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    if name.starts_with('.') {
        return true;
    }
    EXCLUDED_SUFFIXES.iter().any(|suf| name.ends_with(suf))
}

#[allow(dead_code)]
fn size_stable(path: &Path, wait: Duration) -> std::io::Result<bool> {
    let first = std::fs::metadata(path)?.len();
    std::thread::sleep(wait);
    let second = std::fs::metadata(path)?.len();
    Ok(first == second)
}
