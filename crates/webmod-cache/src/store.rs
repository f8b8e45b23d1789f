//! Artifact store: URL -> built resource, with a reverse index by the
//! files each resource was built from.
//!
//! Pure data structure. Watching and build coordination live in
//! [`crate::cache::ResourceCache`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A built, servable resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltResource {
    /// Request URL this resource answers.
    pub url: String,
    /// Final JavaScript served to the browser.
    pub code: String,
    /// Source file whose change invalidates this resource.
    pub backing_path: PathBuf,
    /// Other files the code was derived from, such as reexported modules.
    pub dependencies: Vec<PathBuf>,
    /// Where the artifact was written, if it was written at all.
    pub artifact_path: Option<PathBuf>,
    /// Specifiers the resource imports.
    pub imports: Vec<String>,
}

impl BuiltResource {
    /// The backing path followed by the dependencies, without repeating it.
    pub fn source_paths(&self) -> impl Iterator<Item = &Path> {
        let backing = self.backing_path.as_path();
        std::iter::once(backing).chain(
            self.dependencies
                .iter()
                .map(PathBuf::as_path)
                .filter(move |p| *p != backing),
        )
    }
}

/// One cached URL.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub resource: Arc<BuiltResource>,
    pub source_map: Option<Arc<str>>,
    /// Files whose change evicts this entry, backing path first.
    pub paths: Vec<PathBuf>,
}

impl CacheEntry {
    #[must_use]
    pub fn new(resource: Arc<BuiltResource>, paths: Vec<PathBuf>) -> Self {
        Self {
            resource,
            source_map: None,
            paths,
        }
    }
}

#[derive(Debug, Default)]
pub struct ArtifactStore {
    entries: HashMap<String, CacheEntry>,
    /// Reverse index: source path -> URLs built from it
    by_path: HashMap<PathBuf, HashSet<String>>,
}

impl ArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Store an entry, replacing any previous one for the URL.
    pub fn insert(&mut self, url: impl Into<String>, entry: CacheEntry) {
        let url = url.into();
        let paths = entry.paths.clone();
        if let Some(old) = self.entries.insert(url.clone(), entry) {
            for path in &old.paths {
                self.unindex(path, &url);
            }
        }
        for path in paths {
            self.by_path.entry(path).or_default().insert(url.clone());
        }
    }

    /// Remove every entry built from `path`. Returns the removed entries
    /// with their URLs.
    pub fn remove_path(&mut self, path: &Path) -> Vec<(String, CacheEntry)> {
        let urls = self.by_path.remove(path).unwrap_or_default();
        let mut removed = Vec::with_capacity(urls.len());
        for url in urls {
            let Some(entry) = self.entries.remove(&url) else {
                continue;
            };
            for other in entry.paths.iter().filter(|p| p.as_path() != path) {
                self.unindex(other, &url);
            }
            removed.push((url, entry));
        }
        removed
    }

    /// Attach a source map. The resource itself is left as it is.
    ///
    /// Returns `false` when the URL has no entry.
    pub fn set_source_map(&mut self, url: &str, map: impl Into<Arc<str>>) -> bool {
        match self.entries.get_mut(url) {
            Some(entry) => {
                entry.source_map = Some(map.into());
                true
            }
            None => false,
        }
    }

    /// Whether any entry was built from `path`.
    #[must_use]
    pub fn has_path(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct source paths.
    #[must_use]
    pub fn path_count(&self) -> usize {
        self.by_path.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_path.clear();
    }

    fn unindex(&mut self, path: &Path, url: &str) {
        if let Some(urls) = self.by_path.get_mut(path) {
            urls.remove(url);
            if urls.is_empty() {
                self.by_path.remove(path);
            }
        }
    }
}
