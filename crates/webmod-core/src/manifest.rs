//! Package manifest (`package.json`) reader.
//!
//! Manifests are read once per canonical path and shared as `Arc<Manifest>`
//! for the rest of the process. They are only re-read after an explicit
//! [`ManifestReader::clear`].

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

/// Parsed package manifest. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// `"module"` or `"commonjs"`.
    #[serde(default, rename = "type")]
    pub module_type: Option<String>,
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    /// Raw `exports` field, evaluated by the resolver.
    #[serde(default)]
    pub exports: Option<Value>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub peer_dependencies: BTreeMap<String, String>,
}

impl Manifest {
    /// Parse a manifest from JSON text.
    ///
    /// # Errors
    /// Returns an error if the text is not a JSON object of manifest shape.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Names in `dependencies ∪ peerDependencies`, sorted and deduplicated.
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        let mut names: Vec<&str> = self
            .dependencies
            .keys()
            .chain(self.peer_dependencies.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names.into_iter()
    }

    /// Whether the package declares `"type": "module"`.
    #[must_use]
    pub fn is_esm_package(&self) -> bool {
        self.module_type.as_deref() == Some("module")
    }

    /// Version string, `0.0.0` when absent.
    #[must_use]
    pub fn version_or_default(&self) -> &str {
        self.version.as_deref().unwrap_or("0.0.0")
    }
}

/// Manifest could not be loaded (`ManifestUnreadable`).
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("package.json not found for '{name}' from {}", .from.display())]
    NotFound { name: String, from: PathBuf },

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Caching manifest reader.
#[derive(Debug, Default)]
pub struct ManifestReader {
    /// Cache entries: canonical path -> parsed manifest
    entries: RwLock<HashMap<PathBuf, Arc<Manifest>>>,
}

impl ManifestReader {
    /// Create a new reader with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and parse a manifest, serving repeats from the cache.
    ///
    /// # Errors
    /// Returns [`ManifestError::Read`] or [`ManifestError::Parse`].
    pub fn read(&self, path: &Path) -> Result<Arc<Manifest>, ManifestError> {
        let canonical = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        if let Some(hit) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&canonical)
        {
            return Ok(Arc::clone(hit));
        }

        let content = std::fs::read_to_string(&canonical).map_err(|source| ManifestError::Read {
            path: canonical.clone(),
            source,
        })?;
        let manifest = Manifest::from_json_str(&content).map_err(|source| ManifestError::Parse {
            path: canonical.clone(),
            source,
        })?;

        debug!(path = %canonical.display(), "Loaded package manifest");

        let manifest = Arc::new(manifest);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(canonical, Arc::clone(&manifest));
        Ok(manifest)
    }

    /// Find the `package.json` of dependency `name` as seen from `from_dir`.
    ///
    /// Walks up through `node_modules` directories the way Node does.
    #[must_use]
    pub fn locate(&self, name: &str, from_dir: &Path) -> Option<PathBuf> {
        let mut current = Some(from_dir);
        while let Some(dir) = current {
            // Don't look for node_modules/node_modules/x
            if dir.file_name().is_some_and(|n| n != "node_modules") {
                let candidate = dir.join("node_modules").join(name).join("package.json");
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
            current = dir.parent();
        }
        None
    }

    /// Locate and read the manifest of dependency `name`.
    ///
    /// # Errors
    /// Returns [`ManifestError::NotFound`] when no `node_modules` entry exists,
    /// or the read/parse error of the located file.
    pub fn read_dependency(
        &self,
        name: &str,
        from_dir: &Path,
    ) -> Result<(PathBuf, Arc<Manifest>), ManifestError> {
        let path = self.locate(name, from_dir).ok_or_else(|| ManifestError::NotFound {
            name: name.to_string(),
            from: from_dir.to_path_buf(),
        })?;
        let manifest = self.read(&path)?;
        Ok((path, manifest))
    }

    /// Drop every cached manifest.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of cached manifests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_manifest_fields() {
        let manifest = Manifest::from_json_str(
            r#"{
                "name": "pkg",
                "version": "1.2.3",
                "type": "module",
                "main": "index.cjs",
                "module": "index.mjs",
                "exports": {".": "./index.mjs"},
                "dependencies": {"b": "^1.0.0"},
                "peerDependencies": {"a": "*", "b": "*"},
                "scripts": {"test": "ignored"}
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.name.as_deref(), Some("pkg"));
        assert!(manifest.is_esm_package());
        assert_eq!(manifest.version_or_default(), "1.2.3");
        assert!(manifest.exports.is_some());
        let deps: Vec<&str> = manifest.dependency_names().collect();
        assert_eq!(deps, vec!["a", "b"]);
    }

    #[test]
    fn test_read_is_cached_until_clear() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("package.json");
        fs::write(&path, r#"{"name": "first"}"#).unwrap();

        let reader = ManifestReader::new();
        assert_eq!(reader.read(&path).unwrap().name.as_deref(), Some("first"));

        fs::write(&path, r#"{"name": "second"}"#).unwrap();
        assert_eq!(reader.read(&path).unwrap().name.as_deref(), Some("first"));
        assert_eq!(reader.len(), 1);

        reader.clear();
        assert!(reader.is_empty());
        assert_eq!(reader.read(&path).unwrap().name.as_deref(), Some("second"));
    }

    #[test]
    fn test_read_errors() {
        let dir = tempdir().unwrap();
        let reader = ManifestReader::new();

        let missing = dir.path().join("package.json");
        assert!(matches!(reader.read(&missing), Err(ManifestError::Read { .. })));

        fs::write(&missing, "{ not json").unwrap();
        assert!(matches!(reader.read(&missing), Err(ManifestError::Parse { .. })));
    }

    #[test]
    fn test_locate_walks_up_node_modules() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let pkg = root.join("node_modules/lodash");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("package.json"), r#"{"name": "lodash"}"#).unwrap();
        let nested = root.join("node_modules/a");
        fs::create_dir_all(&nested).unwrap();

        let reader = ManifestReader::new();
        assert_eq!(
            reader.locate("lodash", &nested),
            Some(pkg.join("package.json"))
        );
        assert!(reader.locate("missing", &nested).is_none());
        assert!(matches!(
            reader.read_dependency("missing", root),
            Err(ManifestError::NotFound { .. })
        ));
    }
}
