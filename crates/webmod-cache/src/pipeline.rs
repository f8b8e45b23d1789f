//! Builds servable resources from request URLs.
//!
//! Two routes:
//! - `/@modules/<specifier>`: a proxy for an entry module's bare import,
//!   written under `<output>/<package>@<version>/`.
//! - `/@fs<absolute path>`: a source file. ES modules get their import
//!   specifiers rewritten; CommonJS is wrapped, mirrored under the output
//!   directory and has its `require()` calls rewritten to imports.
//!
//! Specifiers inside served code are routed the same way everywhere:
//! entry packages go through `/@modules/`, anything else (including bare
//! imports of packages that are not entries) is resolved from the
//! importing file and served by path.

use crate::cache::{BuildError, ResourceBuilder};
use crate::store::BuiltResource;
use futures::future::{BoxFuture, FutureExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webmod_core::proxy::ProxyKind;
use webmod_core::resolver::{is_bare_specifier, package_name_from_specifier, EntryField};
use webmod_core::version::artifact_key;
use webmod_core::{
    detect_format, rewrite_imports, rewrite_requires, wrap_commonjs, Engine, EntrySet, External,
    Manifest, ModuleFormat, ReadinessGates, ResolutionKind, ResolveError, Resolved, Resolver,
    MODULES_PREFIX,
};
use webmod_util::fs::{read_source, sanitize_segment, write_artifact};
use webmod_util::hash::short_hash;

/// URL prefix for source files addressed by absolute path.
pub const FS_PREFIX: &str = "/@fs";

/// Directory under the output dir for files outside any package.
const LOOSE_FILES_DIR: &str = "__fs";

/// URL serving the file at `path`.
#[must_use]
pub fn fs_url(path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/");
    if path.starts_with('/') {
        format!("{FS_PREFIX}{path}")
    } else {
        format!("{FS_PREFIX}/{path}")
    }
}

/// Inverse of [`fs_url`].
#[must_use]
pub fn path_from_fs_url(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix(FS_PREFIX)?;
    if !rest.starts_with('/') || rest.len() == 1 {
        return None;
    }
    // `/@fs/C:/x` on Windows
    let rest = match rest.as_bytes().get(2) {
        Some(b':') => &rest[1..],
        _ => rest,
    };
    Some(PathBuf::from(rest))
}

/// [`ResourceBuilder`] over an [`Engine`].
#[derive(Debug, Clone)]
pub struct ProxyPipeline {
    engine: Arc<Engine>,
}

impl ProxyPipeline {
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

impl ResourceBuilder for ProxyPipeline {
    fn build(&self, url: &str) -> BoxFuture<'static, Result<BuiltResource, BuildError>> {
        let engine = Arc::clone(&self.engine);
        let url = url.to_string();
        async move {
            if let Some(spec) = url.strip_prefix(MODULES_PREFIX) {
                build_module(&engine, &url, spec).await
            } else if let Some(path) = path_from_fs_url(&url) {
                build_file(&engine, &url, &path).await
            } else {
                Err(BuildError::UnknownUrl(url))
            }
        }
        .boxed()
    }
}

/// Build the proxy for an entry module's bare import.
async fn build_module(engine: &Engine, url: &str, spec: &str) -> Result<BuiltResource, BuildError> {
    let plugin = engine.plugin();
    let resolved = plugin
        .resolve_id(spec, None)
        .await?
        .ok_or_else(|| BuildError::UnknownUrl(url.to_string()))?;
    if resolved.external {
        return Err(BuildError::External(spec.to_string()));
    }
    let name = package_name_from_specifier(spec);
    let entries = engine.entries()?;
    if !entries.contains(&name) {
        return Err(BuildError::NotEntry(spec.to_string()));
    }

    let loaded = plugin
        .load(&resolved.id)
        .await?
        .ok_or_else(|| BuildError::Failed(format!("no proxy for '{}'", resolved.id)))?;
    let Some((_, entry)) = ProxyKind::strip(&resolved.id) else {
        return Err(BuildError::Failed(format!("unmarked proxy id '{}'", resolved.id)));
    };
    let entry = PathBuf::from(entry);

    let (_, manifest) = engine
        .manifests()
        .read_dependency(&name, &engine.config().root_dir)
        .map_err(webmod_core::Error::from)?;

    let artifact = engine
        .config()
        .output_dir()
        .join(package_dir_name(&name, &manifest))
        .join(format!(
            "__proxy_{}.js",
            short_hash(&format!("{spec}\0{}", artifact_key()), 8)
        ));

    let from = entry.parent().unwrap_or(Path::new("/")).to_path_buf();
    let router = Router::new(engine, entries, &from);
    // The proxy imports its entry by absolute path; the browser needs a URL.
    let entry_literal = quote(&entry.to_string_lossy());
    let entry_literal = &entry_literal[1..entry_literal.len() - 1];
    let gates = ReadinessGates::global();
    let rewritten = rewrite_imports(&loaded.code, gates.esm().await, |site| {
        if site.specifier == entry_literal {
            Some(fs_url(&entry))
        } else {
            router.import_url(&site.specifier)
        }
    });
    write_file(&artifact, rewritten.code).await?;
    let (code, _) = rewrite_artifact(&router, &artifact).await?;

    let mut imports: Vec<String> = Vec::new();
    for import in &loaded.meta.imports {
        let url = router
            .import_url(import)
            .unwrap_or_else(|| import.clone());
        if !imports.contains(&url) {
            imports.push(url);
        }
    }

    info!(
        specifier = %spec,
        kind = ?loaded.meta.kind,
        artifact = %artifact.display(),
        "Built module proxy"
    );
    Ok(BuiltResource {
        url: url.to_string(),
        code,
        dependencies: loaded.meta.sources,
        backing_path: entry,
        artifact_path: Some(artifact),
        imports,
    })
}

/// Build a source file addressed by path.
async fn build_file(engine: &Engine, url: &str, path: &Path) -> Result<BuiltResource, BuildError> {
    let path = dunce::canonicalize(path).map_err(|e| BuildError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let package = owning_package(engine, &path);

    let resolved = Resolved {
        path: path.clone(),
        package_root: package.as_ref().map(|(root, _)| root.clone()),
        manifest: package.as_ref().map(|(_, m)| Arc::clone(m)),
        field: EntryField::File,
    };
    let gates = ReadinessGates::global();
    let format = detect_format(&resolved, gates.esm().await).await?;

    let source = read_file(&path).await?;
    let from = path.parent().unwrap_or(Path::new("/")).to_path_buf();
    let router = Router::new(engine, engine.entries()?, &from);

    if format == ModuleFormat::Esm {
        let rewritten = rewrite_imports(&source, gates.esm().await, |site| {
            router.import_url(&site.specifier)
        });
        debug!(
            path = %path.display(),
            imports = rewritten.imports.len(),
            "Serving ES module with rewritten imports"
        );
        return Ok(BuiltResource {
            url: url.to_string(),
            code: rewritten.code,
            backing_path: path,
            dependencies: Vec::new(),
            artifact_path: None,
            imports: rewritten.imports,
        });
    }

    let analysis = gates
        .cjs()
        .await
        .map_err(webmod_core::Error::from)?
        .analyze(&source);
    let named = if analysis.opaque {
        Vec::new()
    } else {
        analysis.exports
    };
    let artifact = mirror_path(&engine.config().output_dir(), &path, package.as_ref());
    write_file(
        &artifact,
        wrap_commonjs(&source, &engine.config().environment, &named),
    )
    .await?;

    let (code, imports) = rewrite_artifact(&router, &artifact).await?;

    debug!(path = %path.display(), artifact = %artifact.display(), "Wrapped CommonJS file");
    Ok(BuiltResource {
        url: url.to_string(),
        code,
        backing_path: path,
        dependencies: Vec::new(),
        artifact_path: Some(artifact),
        imports,
    })
}

/// Rewrite the requires of a written artifact. Returns its final code and
/// the URLs it now imports.
///
/// Relative requires resolve from the router's directory, the one of the
/// original source, not from the artifact's location.
async fn rewrite_artifact(
    router: &Router<'_>,
    artifact: &Path,
) -> Result<(String, Vec<String>), BuildError> {
    let outcome =
        rewrite_requires(artifact, |spec, _| std::future::ready(router.require_url(&spec))).await?;
    if outcome.rewritten {
        debug!(
            artifact = %artifact.display(),
            imports = outcome.imports.len(),
            "Rewrote require() calls"
        );
    }
    Ok((read_file(artifact).await?, outcome.imports))
}

/// Maps specifiers found in code served from one directory to URLs.
struct Router<'a> {
    resolver: &'a Resolver,
    external: &'a External,
    entries: Arc<EntrySet>,
    from: &'a Path,
}

impl<'a> Router<'a> {
    fn new(engine: &'a Engine, entries: Arc<EntrySet>, from: &'a Path) -> Self {
        Self {
            resolver: engine.resolver(),
            external: &engine.config().external,
            entries,
            from,
        }
    }

    /// URL for an import. `None` leaves the specifier as written; the
    /// browser surfaces it when it fetches.
    fn import_url(&self, spec: &str) -> Option<String> {
        match self.url(spec, ResolutionKind::Import) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(
                    specifier = %spec,
                    from = %self.from.display(),
                    error = %e,
                    "Import left unrewritten"
                );
                None
            }
        }
    }

    /// URL a `require(spec)` call is served at.
    fn require_url(&self, spec: &str) -> Result<String, ResolveError> {
        self.url(spec, ResolutionKind::Require)
    }

    fn url(&self, spec: &str, kind: ResolutionKind) -> Result<String, ResolveError> {
        if is_bare_specifier(spec) {
            if self.external.contains(spec) {
                return Ok(spec.to_string());
            }
            if self.entries.contains(&package_name_from_specifier(spec)) {
                return Ok(format!("{MODULES_PREFIX}{spec}"));
            }
            return match self.resolver.resolve(spec, self.from, kind) {
                Ok(resolved) => Ok(fs_url(&resolved.path)),
                // Unknown packages fail when the browser fetches them.
                Err(ResolveError::PackageNotFound { .. }) => Ok(format!("{MODULES_PREFIX}{spec}")),
                Err(e) => Err(e),
            };
        }
        let resolved = self.resolver.resolve(spec, self.from, kind)?;
        Ok(fs_url(&resolved.path))
    }
}

/// Nearest `package.json` above `path`, as (package root, manifest).
fn owning_package(engine: &Engine, path: &Path) -> Option<(PathBuf, Arc<Manifest>)> {
    path.ancestors().skip(1).find_map(|dir| {
        let candidate = dir.join("package.json");
        if !candidate.is_file() {
            return None;
        }
        engine
            .manifests()
            .read(&candidate)
            .ok()
            .map(|m| (dir.to_path_buf(), m))
    })
}

fn package_dir_name(name: &str, manifest: &Manifest) -> String {
    format!("{}@{}", sanitize_segment(name), manifest.version_or_default())
}

/// Where the wrapped copy of `path` is written.
fn mirror_path(
    output_dir: &Path,
    path: &Path,
    package: Option<&(PathBuf, Arc<Manifest>)>,
) -> PathBuf {
    if let Some((root, manifest)) = package {
        if let Ok(rel) = path.strip_prefix(root) {
            let name = manifest.name.clone().unwrap_or_else(|| {
                root.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            return output_dir.join(package_dir_name(&name, manifest)).join(rel);
        }
    }
    let file_name = path
        .file_name()
        .map_or_else(|| "index.js".to_string(), |n| n.to_string_lossy().into_owned());
    output_dir
        .join(LOOSE_FILES_DIR)
        .join(short_hash(&path.to_string_lossy(), 8))
        .join(file_name)
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

async fn read_file(path: &Path) -> Result<String, BuildError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_source(&owned))
        .await
        .map_err(|e| BuildError::Failed(e.to_string()))?
        .map_err(|e| BuildError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

async fn write_file(path: &Path, code: String) -> Result<(), BuildError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_artifact(&owned, code.as_bytes()))
        .await
        .map_err(|e| BuildError::Failed(e.to_string()))?
        .map_err(|e| BuildError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_url_round_trip() {
        let url = fs_url(Path::new("/proj/node_modules/a/index.js"));
        assert_eq!(url, "/@fs/proj/node_modules/a/index.js");
        assert_eq!(
            path_from_fs_url(&url),
            Some(PathBuf::from("/proj/node_modules/a/index.js"))
        );
    }

    #[test]
    fn test_path_from_fs_url_rejects_other_urls() {
        assert_eq!(path_from_fs_url("/@modules/a"), None);
        assert_eq!(path_from_fs_url("/@fs"), None);
        assert_eq!(path_from_fs_url("/@fs/"), None);
        assert_eq!(path_from_fs_url("/@fsx/a"), None);
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_router_urls() {
        let dir = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        write(&root, "package.json", r#"{"dependencies":{"react":"18","ext":"1"}}"#);
        write(&root, "node_modules/react/package.json", r#"{"name":"react"}"#);
        write(&root, "node_modules/react/index.js", "module.exports = {};");
        write(&root, "node_modules/ext/package.json", r#"{"name":"ext"}"#);
        write(&root, "node_modules/nested/package.json", r#"{"name":"nested","main":"main.js"}"#);
        write(&root, "node_modules/nested/main.js", "exports.n = 1;");
        write(&root, "util.js", "exports.a = 1;");

        let config =
            webmod_core::EngineConfig::new(&root).with_external(External::One("ext".into()));
        let engine = Engine::new(config);
        let router = Router::new(&engine, engine.entries().unwrap(), &root);

        assert_eq!(router.import_url("react").as_deref(), Some("/@modules/react"));
        assert_eq!(
            router.import_url("react/jsx-runtime").as_deref(),
            Some("/@modules/react/jsx-runtime")
        );
        assert_eq!(router.import_url("ext").as_deref(), Some("ext"));
        assert_eq!(
            router.import_url("nested"),
            Some(fs_url(&root.join("node_modules/nested/main.js")))
        );
        assert_eq!(router.import_url("./util"), Some(fs_url(&root.join("util.js"))));
        assert_eq!(router.import_url("./gone.css"), None);
        assert_eq!(
            router.import_url("not-installed").as_deref(),
            Some("/@modules/not-installed")
        );
        assert!(router.require_url("./gone").is_err());
    }

    #[test]
    fn test_mirror_path_without_package() {
        let out = mirror_path(Path::new("/out"), Path::new("/loose/file.js"), None);
        assert!(out.starts_with("/out/__fs"));
        assert!(out.ends_with("file.js"));
    }
}
