//! Entry module collection.
//!
//! Walks `dependencies ∪ peerDependencies` from the root manifest and
//! decides which packages need their own browser artifact:
//! - every direct dependency of the root;
//! - every package reached through two different immediate ancestors
//!   (a diamond), since one shared build cannot serve both call sites.
//!
//! Everything else is inlined into the artifact of the package that
//! reached it. Squashed packages are never visited, so nothing beneath
//! them can become an entry either.

mod coloring;
mod squash;

pub use coloring::{Ancestor, AncestorColoring, Visit};
pub use squash::SquashSet;

use crate::manifest::{ManifestError, ManifestReader};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Names of the packages that get a standalone artifact.
pub type EntrySet = BTreeSet<String>;

/// Where the collector gets each package's dependency list from.
pub trait DependencySource {
    /// Position of a package, used to look up its own dependencies.
    type Location: Clone;

    /// Find dependency `name` as seen from `from`. Returns its location
    /// and the names it depends on.
    ///
    /// # Errors
    /// Returns the reason the package's manifest is unusable.
    fn lookup(
        &self,
        name: &str,
        from: &Self::Location,
    ) -> Result<(Self::Location, Vec<String>), ManifestError>;
}

/// Dependency source backed by `node_modules` on disk.
#[derive(Debug)]
pub struct ManifestSource<'a> {
    reader: &'a ManifestReader,
}

impl<'a> ManifestSource<'a> {
    #[must_use]
    pub fn new(reader: &'a ManifestReader) -> Self {
        Self { reader }
    }
}

impl DependencySource for ManifestSource<'_> {
    type Location = PathBuf;

    fn lookup(&self, name: &str, from: &PathBuf) -> Result<(PathBuf, Vec<String>), ManifestError> {
        let (path, manifest) = self.reader.read_dependency(name, from)?;
        let dir = path.parent().map_or_else(|| from.clone(), Path::to_path_buf);
        let deps = manifest.dependency_names().map(ToString::to_string).collect();
        Ok((dir, deps))
    }
}

/// Collect the entry modules of the project whose manifest is `root_manifest`.
///
/// Unreadable dependency manifests are logged and their subtree pruned.
///
/// # Errors
/// Only fails if the root manifest itself cannot be read.
pub fn collect_entry_modules(
    root_manifest: &Path,
    squash: &SquashSet,
    reader: &ManifestReader,
) -> Result<EntrySet, ManifestError> {
    let manifest = reader.read(root_manifest)?;
    let root_dir = root_manifest
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let root_deps = manifest.dependency_names().map(ToString::to_string);
    Ok(collect_from(&ManifestSource::new(reader), root_dir, root_deps, squash))
}

/// Collect entry modules over any dependency source.
pub fn collect_from<S, I>(source: &S, root: S::Location, root_deps: I, squash: &SquashSet) -> EntrySet
where
    S: DependencySource,
    I: IntoIterator<Item = String>,
{
    let mut coloring = AncestorColoring::new();
    let mut entries = EntrySet::new();
    let mut stack: Vec<(String, Ancestor, S::Location)> = Vec::new();

    let mut direct: Vec<String> = root_deps
        .into_iter()
        .filter(|name| !squash.matches(name))
        .collect();
    // Reversed so the first dependency is walked first.
    direct.reverse();
    for name in direct {
        entries.insert(name.clone());
        stack.push((name, Ancestor::Root, root.clone()));
    }

    while let Some((name, ancestor, from)) = stack.pop() {
        match coloring.visit(&name, &ancestor) {
            Visit::Repeat => continue,
            Visit::Diamond => {
                if entries.insert(name.clone()) {
                    debug!(
                        package = %name,
                        ancestor = %ancestor,
                        first = %coloring.ancestor_of(&name).map_or_else(String::new, ToString::to_string),
                        "Diamond dependency promoted to entry"
                    );
                }
                continue;
            }
            Visit::First => {}
        }

        let (location, deps) = match source.lookup(&name, &from) {
            Ok(found) => found,
            Err(e) => {
                warn!(package = %name, error = %e, "Skipping dependency subtree");
                continue;
            }
        };

        let parent = Ancestor::Package(name.clone());
        for dep in deps.into_iter().rev() {
            if dep == name || squash.matches(&dep) {
                continue;
            }
            stack.push((dep, parent.clone(), location.clone()));
        }
    }

    debug!(entries = entries.len(), visited = coloring.len(), "Collected entry modules");
    entries
}
