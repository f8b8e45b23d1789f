//! Module resolver for browser-bound package code.
//!
//! Resolves relative, absolute and bare specifiers against a base
//! directory. Bare specifiers walk `node_modules`, then evaluate
//! `package.json` `exports`, falling back to `module`, `main` and `index.*`.

mod exports;

pub use exports::{resolve_export_target, resolve_exports, ExportTarget, ResolutionKind};

use crate::manifest::{Manifest, ManifestReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Extensions probed (in order) when a specifier has none.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".mjs", ".js", ".cjs", ".json"];

/// The specifier cannot be resolved (`ResolutionFailure`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Invalid specifier '{0}'")]
    InvalidSpecifier(String),

    #[error("Unsupported scheme in '{0}'")]
    UnsupportedScheme(String),

    #[error("Cannot find package '{name}' from {}", .from.display())]
    PackageNotFound { name: String, from: PathBuf },

    #[error("Package '{name}' has an unreadable package.json: {message}")]
    ManifestInvalid { name: String, message: String },

    #[error("Package '{name}' does not export '{subpath}'")]
    NotExported { name: String, subpath: String },

    #[error("Cannot resolve '{specifier}' from {}", .from.display())]
    NotFound { specifier: String, from: PathBuf },
}

/// Which package field selected the entry file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryField {
    Exports,
    /// `exports`, through an `import` or `module` condition.
    ExportsImport,
    Module,
    Main,
    Index,
    /// Not a package entry (relative/absolute/deep path).
    File,
}

/// Successful resolution.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Canonical path of the resolved file.
    pub path: PathBuf,
    /// Root directory of the owning package, for bare specifiers.
    pub package_root: Option<PathBuf>,
    /// Manifest of the owning package, for bare specifiers.
    pub manifest: Option<Arc<Manifest>>,
    /// Field that produced the entry.
    pub field: EntryField,
}

/// Filesystem resolver sharing the engine's manifest cache.
#[derive(Debug, Clone)]
pub struct Resolver {
    manifests: Arc<ManifestReader>,
    extensions: &'static [&'static str],
}

impl Resolver {
    /// Create a resolver over the given manifest cache.
    #[must_use]
    pub fn new(manifests: Arc<ManifestReader>) -> Self {
        Self {
            manifests,
            extensions: DEFAULT_EXTENSIONS,
        }
    }

    /// The manifest cache used for package lookups.
    #[must_use]
    pub fn manifests(&self) -> &Arc<ManifestReader> {
        &self.manifests
    }

    /// Resolve `spec` relative to `basedir`.
    ///
    /// # Errors
    /// Returns a [`ResolveError`] describing why nothing matched.
    pub fn resolve(
        &self,
        spec: &str,
        basedir: &Path,
        kind: ResolutionKind,
    ) -> Result<Resolved, ResolveError> {
        if spec.is_empty() || spec.starts_with('\0') {
            return Err(ResolveError::InvalidSpecifier(spec.to_string()));
        }
        if spec.contains("://") || spec.starts_with("node:") || spec.starts_with("data:") {
            return Err(ResolveError::UnsupportedScheme(spec.to_string()));
        }

        if spec.starts_with("./") || spec.starts_with("../") || spec == "." || spec == ".." {
            return self.resolve_file(&basedir.join(spec), spec, basedir);
        }
        if Path::new(spec).is_absolute() {
            return self.resolve_file(Path::new(spec), spec, basedir);
        }

        self.resolve_bare(spec, basedir, kind)
    }

    fn resolve_file(&self, base: &Path, spec: &str, basedir: &Path) -> Result<Resolved, ResolveError> {
        let path = self.probe(base).ok_or_else(|| ResolveError::NotFound {
            specifier: spec.to_string(),
            from: basedir.to_path_buf(),
        })?;
        Ok(Resolved {
            path,
            package_root: None,
            manifest: None,
            field: EntryField::File,
        })
    }

    fn resolve_bare(
        &self,
        spec: &str,
        basedir: &Path,
        kind: ResolutionKind,
    ) -> Result<Resolved, ResolveError> {
        let name = package_name_from_specifier(spec);
        let subpath = spec[name.len()..].trim_start_matches('/');

        let pkg_json = self
            .manifests
            .locate(&name, basedir)
            .ok_or_else(|| ResolveError::PackageNotFound {
                name: name.clone(),
                from: basedir.to_path_buf(),
            })?;
        let manifest = self
            .manifests
            .read(&pkg_json)
            .map_err(|e| ResolveError::ManifestInvalid {
                name: name.clone(),
                message: e.to_string(),
            })?;
        let root = pkg_json.parent().unwrap_or(basedir).to_path_buf();

        let export_key = if subpath.is_empty() {
            ".".to_string()
        } else {
            format!("./{subpath}")
        };

        let found = if let Some(exports) = &manifest.exports {
            let target = resolve_export_target(exports, &export_key, kind).ok_or_else(|| {
                ResolveError::NotExported {
                    name: name.clone(),
                    subpath: export_key.clone(),
                }
            })?;
            let field = if target.esm_condition {
                EntryField::ExportsImport
            } else {
                EntryField::Exports
            };
            self.probe(&root.join(target.path.trim_start_matches("./")))
                .map(|p| (p, field))
        } else if subpath.is_empty() {
            self.package_entry(&root, &manifest, kind)
        } else {
            self.probe(&root.join(subpath)).map(|p| (p, EntryField::File))
        };

        let (path, field) = found.ok_or_else(|| ResolveError::NotFound {
            specifier: spec.to_string(),
            from: basedir.to_path_buf(),
        })?;

        Ok(Resolved {
            path,
            package_root: Some(dunce::canonicalize(&root).unwrap_or(root)),
            manifest: Some(manifest),
            field,
        })
    }

    /// Package entry without `exports`: `module` (imports only), `main`, `index.*`.
    fn package_entry(
        &self,
        root: &Path,
        manifest: &Manifest,
        kind: ResolutionKind,
    ) -> Option<(PathBuf, EntryField)> {
        if kind == ResolutionKind::Import {
            if let Some(module) = &manifest.module {
                if let Some(p) = self.probe_file(&root.join(module)) {
                    return Some((p, EntryField::Module));
                }
            }
        }
        if let Some(main) = &manifest.main {
            let main_path = root.join(main);
            if let Some(p) = self
                .probe_file(&main_path)
                .or_else(|| self.probe_index(&main_path))
            {
                return Some((p, EntryField::Main));
            }
        }
        self.probe_index(root).map(|p| (p, EntryField::Index))
    }

    /// Exact file, extension probing, then directory resolution.
    fn probe(&self, base: &Path) -> Option<PathBuf> {
        if let Some(p) = self.probe_file(base) {
            return Some(p);
        }
        if base.is_dir() {
            let pkg_json = base.join("package.json");
            if pkg_json.is_file() {
                if let Some(main) = self.manifests.read(&pkg_json).ok().and_then(|m| m.main.clone()) {
                    if let Some(p) = self.probe_file(&base.join(main)) {
                        return Some(p);
                    }
                }
            }
            return self.probe_index(base);
        }
        None
    }

    fn probe_file(&self, base: &Path) -> Option<PathBuf> {
        if base.is_file() {
            return Some(canonical(base));
        }
        let raw = base.as_os_str().to_string_lossy();
        self.extensions
            .iter()
            .map(|ext| PathBuf::from(format!("{raw}{ext}")))
            .find(|candidate| candidate.is_file())
            .map(|p| canonical(&p))
    }

    fn probe_index(&self, dir: &Path) -> Option<PathBuf> {
        self.extensions
            .iter()
            .map(|ext| dir.join(format!("index{ext}")))
            .find(|candidate| candidate.is_file())
            .map(|p| canonical(&p))
    }
}

fn canonical(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Check if a specifier is a bare import (not relative, not absolute, not a URL).
#[must_use]
pub fn is_bare_specifier(specifier: &str) -> bool {
    !specifier.is_empty()
        && !specifier.starts_with('.')
        && !specifier.starts_with('/')
        && !specifier.starts_with('\0')
        && !specifier.starts_with('#')
        && !specifier.contains("://")
        && !specifier.starts_with("node:")
        && !specifier.starts_with("data:")
        && !Path::new(specifier).is_absolute()
}

/// Get the package name from a specifier (handles subpaths and scoped packages).
#[must_use]
pub fn package_name_from_specifier(specifier: &str) -> String {
    if specifier.starts_with('@') {
        let parts: Vec<&str> = specifier.splitn(3, '/').collect();
        if parts.len() >= 2 {
            format!("{}/{}", parts[0], parts[1])
        } else {
            specifier.to_string()
        }
    } else {
        specifier.split('/').next().unwrap_or(specifier).to_string()
    }
}
