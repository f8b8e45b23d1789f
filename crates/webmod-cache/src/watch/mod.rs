//! File watching for cache invalidation.
//!
//! Each backing file is watched individually (non-recursive). Raw notify
//! events are mapped to add/change/unlink [`FsEvent`]s and forwarded over
//! a tokio channel; [`spawn_invalidator`] feeds them to the cache.

use crate::cache::ResourceCache;
use notify::{
    event::{ModifyKind, RenameMode},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// A watch subscription could not be established.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("Cannot watch {}: {message}", .path.display())]
    Subscribe { path: PathBuf, message: String },

    #[error("Watcher failed: {0}")]
    WatcherFailed(String),
}

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Add,
    Change,
    Unlink,
}

/// One filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

impl FsEvent {
    #[must_use]
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Subscription side of a file watcher.
pub trait FileWatcher: Send + Sync {
    /// Start delivering change events for `path`.
    ///
    /// # Errors
    /// Returns [`WatchError`] if the subscription cannot be set up.
    fn watch(&self, path: &Path) -> Result<(), WatchError>;

    /// Stop delivering events for `path`.
    fn unwatch(&self, path: &Path);
}

/// Set of currently watched backing paths; at most one watch per path.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    watched: HashSet<PathBuf>,
}

impl WatchRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a watch. Returns `false` if `path` was already watched.
    pub fn insert(&mut self, path: &Path) -> bool {
        if self.watched.contains(path) {
            return false;
        }
        self.watched.insert(path.to_path_buf())
    }

    /// Forget a watch. Returns `false` if `path` was not watched.
    pub fn remove(&mut self, path: &Path) -> bool {
        self.watched.remove(path)
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.watched.contains(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.watched.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }

    /// Remove every watch, returning the paths that were watched.
    pub fn drain(&mut self) -> Vec<PathBuf> {
        self.watched.drain().collect()
    }
}

/// [`FileWatcher`] backed by the platform's notify watcher.
pub struct NotifyWatcher {
    watcher: Mutex<RecommendedWatcher>,
}

impl std::fmt::Debug for NotifyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWatcher").finish_non_exhaustive()
    }
}

impl NotifyWatcher {
    /// Create a watcher and the channel its events arrive on.
    ///
    /// # Errors
    /// Returns [`WatchError::WatcherFailed`] if the platform watcher cannot be created.
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<FsEvent>), WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let Some(kind) = map_event_kind(&event.kind) else {
                        return;
                    };
                    for path in event.paths {
                        if let Err(e) = tx.send(FsEvent::new(kind, path)) {
                            warn!(error = %e, "Failed to send watch event");
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Watch error");
                }
            },
            Config::default(),
        )
        .map_err(|e| WatchError::WatcherFailed(e.to_string()))?;

        Ok((
            Self {
                watcher: Mutex::new(watcher),
            },
            rx,
        ))
    }
}

impl FileWatcher for NotifyWatcher {
    fn watch(&self, path: &Path) -> Result<(), WatchError> {
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Subscribe {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        debug!(path = %path.display(), "Watching file");
        Ok(())
    }

    fn unwatch(&self, path: &Path) {
        let result = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwatch(path);
        if let Err(e) = result {
            // Already gone (file deleted, watch dropped by the OS).
            debug!(path = %path.display(), error = %e, "Unwatch failed");
        }
    }
}

/// Map a notify event kind to the change it represents.
fn map_event_kind(kind: &EventKind) -> Option<FsEventKind> {
    match kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            Some(FsEventKind::Add)
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            Some(FsEventKind::Unlink)
        }
        EventKind::Modify(_) => Some(FsEventKind::Change),
        _ => None,
    }
}

/// Consume change events and invalidate the cache for each path.
///
/// Events are applied one at a time, in arrival order, with no coalescing
/// delay. The task ends when the sending side is dropped.
pub fn spawn_invalidator(
    cache: Arc<ResourceCache>,
    mut rx: mpsc::UnboundedReceiver<FsEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let count = cache.invalidate(&event.path);
            debug!(
                path = %event.path.display(),
                kind = ?event.kind,
                count,
                "File event processed"
            );
        }
        debug!("Watch event channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    #[test]
    fn test_registry_one_watch_per_path() {
        let mut registry = WatchRegistry::new();
        let path = Path::new("/nm/a/index.js");
        assert!(registry.insert(path));
        assert!(!registry.insert(path));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(path));
        assert!(!registry.remove(path));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_drain() {
        let mut registry = WatchRegistry::new();
        registry.insert(Path::new("/a"));
        registry.insert(Path::new("/b"));
        let mut drained = registry.drain();
        drained.sort();
        assert_eq!(drained, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(
            map_event_kind(&EventKind::Create(CreateKind::File)),
            Some(FsEventKind::Add)
        );
        assert_eq!(
            map_event_kind(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(FsEventKind::Change)
        );
        assert_eq!(
            map_event_kind(&EventKind::Remove(RemoveKind::File)),
            Some(FsEventKind::Unlink)
        );
        assert_eq!(
            map_event_kind(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
            Some(FsEventKind::Unlink)
        );
        assert_eq!(map_event_kind(&EventKind::Any), None);
    }
}
