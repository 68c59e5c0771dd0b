//! Scratch directory watcher
//!
//! Announces frame files the transcoder creates in a scratch directory.
//! Announcements carry no ordering guarantee, and a file is announced when
//! it is created, possibly before its contents are written.

use crate::utils::error::{AppError, AppResult};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Capacity of the announcement channel
const ANNOUNCE_BUFFER: usize = 256;

/// Watches one directory for newly created files
pub struct FrameWatcher {
    // Dropping the watcher ends the announcements
    _watcher: RecommendedWatcher,
}

impl FrameWatcher {
    /// Start watching `dir`; created file paths are sent on the returned channel.
    ///
    /// Files already present when the watch begins are announced first, so
    /// frames written before the watcher was installed are not lost.
    pub async fn watch(dir: &Path) -> AppResult<(Self, mpsc::Receiver<PathBuf>)> {
        let (tx, rx) = mpsc::channel(ANNOUNCE_BUFFER);
        let existing_tx = tx.clone();

        // Runs on the notify backend thread, outside the runtime
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_)) {
                    return;
                }
                for path in event.paths {
                    if tx.blocking_send(path).is_err() {
                        return;
                    }
                }
            }
            Err(e) => tracing::error!("Watch error: {:?}", e),
        };

        let mut watcher = RecommendedWatcher::new(handler, Config::default())
            .map_err(|e| AppError::Storage(format!("failed to create watcher: {}", e)))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| AppError::Storage(format!("failed to watch {:?}: {}", dir, e)))?;

        // Duplicates of later create events are dropped by the sequencer
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if existing_tx.send(entry.path()).await.is_err() {
                break;
            }
        }

        tracing::debug!("Watching {:?} for frames", dir);
        Ok((Self { _watcher: watcher }, rx))
    }
}
