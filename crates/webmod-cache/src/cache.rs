//! Resource cache.
//!
//! Maps request URLs to built resources. Misses are built through a
//! [`ResourceBuilder`]; concurrent requests for the same URL share one
//! in-flight build. When an entry is stored, each file it was built from
//! gets a watch, and a change to any of them evicts every URL derived
//! from it.
//!
//! Invalidation is ordered against builds with an epoch counter. Every
//! `invalidate` bumps it and, while builds are running, records the epoch
//! per invalidated file. A finished build whose own files were
//! invalidated after it started is stale: it is never cached, callers that
//! joined before the invalidation still get it, and callers that joined
//! after it chain a fresh build. Invalidating unrelated files does not
//! affect a build.

use crate::store::{ArtifactStore, BuiltResource, CacheEntry};
use crate::watch::{FileWatcher, WatchRegistry};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};
use webmod_core::{Error as CoreError, RewriteError};

/// Error building a resource. Cloneable: every waiter of a shared
/// build receives the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("No resource route for '{0}'")]
    UnknownUrl(String),

    #[error("'{0}' is external and is not built")]
    External(String),

    #[error("'{0}' is not an entry module; it is served through its importer")]
    NotEntry(String),

    #[error("{0}")]
    Resolution(String),

    #[error("I/O error on {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("{0}")]
    Failed(String),
}

impl From<CoreError> for BuildError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Resolve(e) => Self::Resolution(e.to_string()),
            CoreError::Rewrite(e) => e.into(),
            CoreError::SourceRead { path, source } => Self::Io {
                path,
                message: source.to_string(),
            },
            other => Self::Failed(other.to_string()),
        }
    }
}

impl From<RewriteError> for BuildError {
    fn from(e: RewriteError) -> Self {
        match e {
            RewriteError::Resolve { .. } => Self::Resolution(e.to_string()),
            RewriteError::Read { path, source } | RewriteError::Write { path, source } => {
                Self::Io {
                    path,
                    message: source.to_string(),
                }
            }
        }
    }
}

/// Turns a URL into a built resource.
pub trait ResourceBuilder: Send + Sync {
    fn build(&self, url: &str) -> BoxFuture<'static, Result<BuiltResource, BuildError>>;
}

/// What every waiter of one build receives.
#[derive(Debug, Clone)]
struct Outcome {
    result: Result<Arc<BuiltResource>, BuildError>,
    /// Epoch of the latest invalidation of the resource's own files since
    /// the build started.
    stale_at: Option<u64>,
}

type SharedBuild = Shared<BoxFuture<'static, Outcome>>;

struct InFlight {
    id: u64,
    future: SharedBuild,
}

#[derive(Default)]
struct Inner {
    store: ArtifactStore,
    watches: WatchRegistry,
    in_flight: HashMap<String, InFlight>,
    epoch: u64,
    /// Source path -> epoch of its latest invalidation, kept while builds are in flight.
    invalidated_at: HashMap<PathBuf, u64>,
    next_build_id: u64,
}

impl Inner {
    /// Watch every path not yet watched. On failure the watches added
    /// here are dropped again and `false` is returned.
    fn watch_all(&mut self, watcher: &dyn FileWatcher, paths: &[PathBuf]) -> bool {
        let mut added: Vec<&Path> = Vec::new();
        for path in paths {
            if !self.watches.insert(path) {
                continue;
            }
            if let Err(e) = watcher.watch(path) {
                self.watches.remove(path);
                for done in added {
                    self.watches.remove(done);
                    watcher.unwatch(done);
                }
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Watch failed; resource will be rebuilt on every request"
                );
                return false;
            }
            added.push(path);
        }
        true
    }

    /// Drop the watch on each of `paths` no cached entry needs anymore.
    fn release_watches<'a>(
        &mut self,
        watcher: &dyn FileWatcher,
        paths: impl IntoIterator<Item = &'a PathBuf>,
    ) {
        for path in paths {
            if !self.store.has_path(path) && self.watches.remove(path) {
                watcher.unwatch(path);
            }
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub watched_paths: usize,
    pub in_flight: usize,
    /// Builds started since creation.
    pub builds: u64,
}

/// URL-keyed cache of built resources.
pub struct ResourceCache {
    inner: Arc<Mutex<Inner>>,
    builder: Arc<dyn ResourceBuilder>,
    watcher: Arc<dyn FileWatcher>,
    builds: AtomicU64,
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ResourceCache {
    pub fn new(builder: Arc<dyn ResourceBuilder>, watcher: Arc<dyn FileWatcher>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            builder,
            watcher,
            builds: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    /// Cached resource for `url`, without building.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<Arc<BuiltResource>> {
        self.lock().store.get(url).map(|e| Arc::clone(&e.resource))
    }

    /// Return the resource for `url`, building it on a miss.
    ///
    /// # Errors
    /// Returns the build's error. Failed builds are not cached; the next
    /// call retries.
    pub async fn ensure(&self, url: &str) -> Result<Arc<BuiltResource>, BuildError> {
        loop {
            let (joined_at, future) = {
                let mut inner = self.lock();
                if let Some(entry) = inner.store.get(url) {
                    return Ok(Arc::clone(&entry.resource));
                }
                let future = match inner.in_flight.get(url) {
                    Some(flight) => {
                        debug!(url = %url, build = flight.id, "Joining in-flight build");
                        flight.future.clone()
                    }
                    None => self.start_build(&mut inner, url),
                };
                (inner.epoch, future)
            };

            let outcome = future.await;
            match outcome.stale_at {
                Some(at) if at <= joined_at => {
                    debug!(url = %url, "Joined build went stale before this request, rebuilding");
                }
                _ => return outcome.result,
            }
        }
    }

    fn start_build(&self, inner: &mut Inner, url: &str) -> SharedBuild {
        inner.next_build_id += 1;
        let id = inner.next_build_id;
        let started = inner.epoch;
        let build = self.builder.build(url);
        let state = Arc::clone(&self.inner);
        let watcher = Arc::clone(&self.watcher);
        let owned_url = url.to_string();

        let future = async move {
            let result = build.await.map(Arc::new);
            let stale_at = materialize(&state, watcher.as_ref(), &owned_url, id, started, &result);
            Outcome { result, stale_at }
        }
        .boxed()
        .shared();

        inner.in_flight.insert(
            url.to_string(),
            InFlight {
                id,
                future: future.clone(),
            },
        );
        self.builds.fetch_add(1, Ordering::Relaxed);
        debug!(url = %url, build = id, "Build started");
        future
    }

    /// Evict every entry built from `path` and drop the watches no
    /// remaining entry needs.
    ///
    /// Returns the number of evicted URLs.
    pub fn invalidate(&self, path: &Path) -> usize {
        let path = canonical(path);
        let mut inner = self.lock();

        inner.epoch += 1;
        if !inner.in_flight.is_empty() {
            let epoch = inner.epoch;
            inner.invalidated_at.insert(path.clone(), epoch);
        }

        let removed = inner.store.remove_path(&path);
        let released: Vec<PathBuf> = std::iter::once(path.clone())
            .chain(removed.iter().flat_map(|(_, entry)| entry.paths.iter().cloned()))
            .collect();
        inner.release_watches(self.watcher.as_ref(), &released);

        if !removed.is_empty() {
            debug!(path = %path.display(), count = removed.len(), "Invalidated cache entries");
        }
        removed.len()
    }

    /// Attach a source map to a cached URL.
    ///
    /// Returns `false` if the URL is not cached.
    pub fn store_source_map(&self, url: &str, map: impl Into<Arc<str>>) -> bool {
        self.lock().store.set_source_map(url, map)
    }

    #[must_use]
    pub fn source_map(&self, url: &str) -> Option<Arc<str>> {
        self.lock().store.get(url).and_then(|e| e.source_map.clone())
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.store.len(),
            watched_paths: inner.watches.len(),
            in_flight: inner.in_flight.len(),
            builds: self.builds.load(Ordering::Relaxed),
        }
    }

    /// Drop every entry and watch. In-flight builds finish but are not cached.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.store.clear();
        inner.in_flight.clear();
        inner.invalidated_at.clear();
        for path in inner.watches.drain() {
            self.watcher.unwatch(&path);
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Settle a finished build. Runs once per build, inside the shared future.
///
/// Returns the build's stale epoch, if any.
fn materialize(
    state: &Mutex<Inner>,
    watcher: &dyn FileWatcher,
    url: &str,
    id: u64,
    started: u64,
    result: &Result<Arc<BuiltResource>, BuildError>,
) -> Option<u64> {
    let paths: Vec<PathBuf> = match result {
        Ok(resource) => resource.source_paths().map(canonical).collect(),
        Err(_) => Vec::new(),
    };

    let mut inner = lock(state);
    // A `clear` since the start already dropped this flight.
    let current = inner.in_flight.get(url).is_some_and(|f| f.id == id);
    if current {
        inner.in_flight.remove(url);
    }

    let stale_at = paths
        .iter()
        .filter_map(|p| inner.invalidated_at.get(p).copied())
        .filter(|&at| at > started)
        .max();

    if let (true, Ok(resource)) = (current, result) {
        if let Some(at) = stale_at {
            debug!(url = %url, epoch = at, "Discarding build invalidated mid-flight");
        } else if inner.watch_all(watcher, &paths) {
            inner
                .store
                .insert(url, CacheEntry::new(Arc::clone(resource), paths));
        }
    }

    if inner.in_flight.is_empty() {
        inner.invalidated_at.clear();
    }
    stale_at
}

fn canonical(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::WatchError;
    use std::sync::atomic::AtomicUsize;

    struct Fixed;

    impl ResourceBuilder for Fixed {
        fn build(&self, url: &str) -> BoxFuture<'static, Result<BuiltResource, BuildError>> {
            let url = url.to_string();
            async move {
                if url.contains("missing") {
                    return Err(BuildError::Resolution(format!("cannot resolve {url}")));
                }
                Ok(BuiltResource {
                    code: format!("// {url}"),
                    backing_path: PathBuf::from(format!("/virtual{url}.js")),
                    dependencies: Vec::new(),
                    url,
                    artifact_path: None,
                    imports: Vec::new(),
                })
            }
            .boxed()
        }
    }

    #[derive(Default)]
    struct Recording {
        watched: AtomicUsize,
        unwatched: AtomicUsize,
    }

    impl FileWatcher for Recording {
        fn watch(&self, _path: &Path) -> Result<(), WatchError> {
            self.watched.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unwatch(&self, _path: &Path) {
            self.unwatched.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_hit_after_miss() {
        let watcher = Arc::new(Recording::default());
        let cache = ResourceCache::new(Arc::new(Fixed), watcher.clone());

        let first = cache.ensure("/@modules/a").await.unwrap();
        let second = cache.ensure("/@modules/a").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().builds, 1);
        assert_eq!(watcher.watched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_build_not_cached() {
        let cache = ResourceCache::new(Arc::new(Fixed), Arc::new(Recording::default()));
        let err = cache.ensure("/@modules/missing").await.unwrap_err();
        assert!(matches!(err, BuildError::Resolution(_)));
        assert!(cache.ensure("/@modules/missing").await.is_err());
        assert_eq!(cache.stats().builds, 2);
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_invalidate_unwatches() {
        let watcher = Arc::new(Recording::default());
        let cache = ResourceCache::new(Arc::new(Fixed), watcher.clone());
        cache.ensure("/@modules/a").await.unwrap();

        assert_eq!(cache.invalidate(Path::new("/virtual/@modules/a.js")), 1);
        assert_eq!(watcher.unwatched.load(Ordering::SeqCst), 1);
        assert!(cache.get("/@modules/a").is_none());
        assert_eq!(cache.invalidate(Path::new("/virtual/@modules/a.js")), 0);
        assert_eq!(watcher.unwatched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let watcher = Arc::new(Recording::default());
        let cache = ResourceCache::new(Arc::new(Fixed), watcher.clone());
        cache.ensure("/@modules/a").await.unwrap();
        cache.ensure("/@modules/b").await.unwrap();

        cache.clear();
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().watched_paths, 0);
        assert_eq!(watcher.unwatched.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_build_error_from_core() {
        let e: BuildError = CoreError::Resolve(webmod_core::ResolveError::InvalidSpecifier(
            String::new(),
        ))
        .into();
        assert!(matches!(e, BuildError::Resolution(_)));
        let e: BuildError = CoreError::other("boom").into();
        assert_eq!(e, BuildError::Failed("boom".into()));
    }
}
