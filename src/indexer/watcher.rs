use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};

use crate::error::{Result, SymbolTreeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageEvent {
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl ImageEvent {
    pub fn path(&self) -> &Path {
        match self {
            ImageEvent::Modified(path) | ImageEvent::Deleted(path) => path,
        }
    }
}

/// Watches a directory tree for changes to metadata image files.
pub struct ImageWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    receiver: Receiver<std::result::Result<Vec<DebouncedEvent>, notify::Error>>,
    extension: String,
}

impl ImageWatcher {
    pub fn new(path: &Path, debounce: Duration, extension: &str) -> Result<Self> {
        let (tx, rx) = channel();

        let mut debouncer =
            new_debouncer(debounce, tx).map_err(|e| SymbolTreeError::Watcher(e.to_string()))?;

        debouncer
            .watcher()
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| SymbolTreeError::Watcher(e.to_string()))?;

        Ok(Self {
            _debouncer: debouncer,
            receiver: rx,
            extension: extension.to_string(),
        })
    }

    fn is_image(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|extension| extension == self.extension.as_str())
    }

    fn convert(&self, events: Vec<DebouncedEvent>) -> Vec<ImageEvent> {
        let mut converted: Vec<ImageEvent> = events
            .into_iter()
            .filter(|event| self.is_image(&event.path))
            .filter_map(|event| {
                let path = event.path;
                if path.is_file() {
                    Some(ImageEvent::Modified(path))
                } else if !path.exists() {
                    Some(ImageEvent::Deleted(path))
                } else {
                    None
                }
            })
            .collect();
        converted.dedup();
        converted
    }

    /// Blocks until the next batch of image changes. `None` once the watcher
    /// has shut down.
    pub fn recv(&self) -> Option<Vec<ImageEvent>> {
        loop {
            match self.receiver.recv() {
                Ok(Ok(events)) => {
                    let events = self.convert(events);
                    if !events.is_empty() {
                        return Some(events);
                    }
                }
                Ok(Err(e)) => tracing::warn!("Watch error: {}", e),
                Err(_) => return None,
            }
        }
    }
}
