//! Build-tool plugin hook.
//!
//! Rollup-style `resolve_id`/`load` pair that redirects root-level bare
//! imports to proxy modules. Resolution appends a proxy marker to the
//! resolved id; loading strips it and runs the matching generator.
//!
//! Markers are only added when there is no importer, so ids reached from
//! inside a proxy (its own imports) resolve normally and are never proxied
//! a second time.

use crate::config::External;
use crate::error::Result;
use crate::lexer::ReadinessGates;
use crate::proxy::{
    detect_format, generate_cjs_proxy, generate_esm_proxy, ProxyKind, ProxyRecord,
};
use crate::resolver::{is_bare_specifier, ResolutionKind, Resolver};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name the hook reports to its host.
pub const PLUGIN_NAME: &str = "webmod:proxy";

/// Result of the resolve hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveIdResult {
    /// Resolved module id (a file path, possibly with a proxy marker).
    pub id: String,
    /// Whether the host should leave this module alone.
    pub external: bool,
}

impl ResolveIdResult {
    /// Create a resolved module result.
    pub fn resolved(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external: false,
        }
    }

    /// Create an external module result.
    pub fn external(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external: true,
        }
    }
}

/// Side-channel metadata attached to a loaded proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyMeta {
    pub kind: ProxyKind,
    /// Specifiers the proxy imports, to be resolved as ordinary imports.
    pub imports: Vec<String>,
    /// Files the proxy was derived from. Editing any of them changes it.
    pub sources: Vec<PathBuf>,
}

/// Result of the load hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    /// Module source code.
    pub code: String,
    /// Optional source map.
    pub map: Option<String>,
    pub meta: ProxyMeta,
}

impl LoadResult {
    fn from_record(kind: ProxyKind, record: ProxyRecord) -> Self {
        Self {
            code: record.code,
            map: None,
            meta: ProxyMeta {
                kind,
                imports: record.imports,
                sources: record.sources,
            },
        }
    }
}

/// The proxy plugin.
#[derive(Debug, Clone)]
pub struct ProxyPlugin {
    root_dir: PathBuf,
    external: External,
    resolver: Resolver,
    gates: &'static ReadinessGates,
}

impl ProxyPlugin {
    /// Create a plugin resolving root-level imports from `root_dir`.
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>, external: External, resolver: Resolver) -> Self {
        Self {
            root_dir: root_dir.into(),
            external,
            resolver,
            gates: ReadinessGates::global(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Resolve hook.
    ///
    /// Returns `Ok(None)` for anything this plugin does not own: imports
    /// with an importer, already-marked or synthetic ids, absolute and
    /// relative paths.
    ///
    /// # Errors
    /// Returns the resolution failure when a root-level bare specifier
    /// cannot be resolved or its entry cannot be read.
    pub async fn resolve_id(
        &self,
        specifier: &str,
        importer: Option<&str>,
    ) -> Result<Option<ResolveIdResult>> {
        if importer.is_some()
            || ProxyKind::is_marked(specifier)
            || !is_bare_specifier(specifier)
        {
            return Ok(None);
        }
        if self.external.contains(specifier) {
            return Ok(Some(ResolveIdResult::external(specifier)));
        }

        let resolved = self
            .resolver
            .resolve(specifier, &self.root_dir, ResolutionKind::Import)?;
        let format = detect_format(&resolved, self.gates.esm().await).await?;
        let kind = ProxyKind::from(format);
        let id = kind.mark(&resolved.path.to_string_lossy());

        debug!(specifier = %specifier, id = %id, "Resolved root import to proxy");
        Ok(Some(ResolveIdResult::resolved(id)))
    }

    /// Load hook. Only ids carrying a proxy marker are handled.
    ///
    /// # Errors
    /// Fails if the proxied entry cannot be read or a lexer cannot be prepared.
    pub async fn load(&self, id: &str) -> Result<Option<LoadResult>> {
        let Some((kind, entry)) = ProxyKind::strip(id) else {
            return Ok(None);
        };
        let entry = Path::new(entry);
        let record = match kind {
            ProxyKind::Cjs => generate_cjs_proxy(entry, &self.resolver, self.gates).await?,
            ProxyKind::Esm => generate_esm_proxy(entry, self.gates).await?,
        };
        Ok(Some(LoadResult::from_record(kind, record)))
    }
}
