//! Proxy modules.
//!
//! A proxy is a small generated ES module standing in for a package entry:
//! CommonJS entries get their statically known exports re-exported by name,
//! ES module entries get a plain pass-through. Either way the browser sees
//! one uniform ESM entry point per package.

mod cjs;
mod esm;

pub use cjs::{generate_cjs_proxy, wrap_commonjs};
pub use esm::generate_esm_proxy;

use crate::error::{Error, Result};
use crate::lexer::EsmLexer;
use crate::resolver::{EntryField, Resolved};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Suffix marking an id whose load must produce a CommonJS proxy.
pub const CJS_PROXY_MARKER: &str = "?cjs-proxy";
/// Suffix marking an id whose load must produce an ES module proxy.
pub const ESM_PROXY_MARKER: &str = "?esm-proxy";

/// Which generator serves a proxied id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Cjs,
    Esm,
}

impl ProxyKind {
    #[must_use]
    pub fn marker(self) -> &'static str {
        match self {
            Self::Cjs => CJS_PROXY_MARKER,
            Self::Esm => ESM_PROXY_MARKER,
        }
    }

    /// Append this kind's marker to a resolved id.
    #[must_use]
    pub fn mark(self, id: &str) -> String {
        format!("{id}{}", self.marker())
    }

    /// Split a marked id into its kind and the bare id.
    #[must_use]
    pub fn strip(id: &str) -> Option<(Self, &str)> {
        if let Some(bare) = id.strip_suffix(CJS_PROXY_MARKER) {
            Some((Self::Cjs, bare))
        } else {
            id.strip_suffix(ESM_PROXY_MARKER).map(|bare| (Self::Esm, bare))
        }
    }

    /// Whether `id` already carries a proxy marker.
    #[must_use]
    pub fn is_marked(id: &str) -> bool {
        Self::strip(id).is_some()
    }
}

impl From<ModuleFormat> for ProxyKind {
    fn from(format: ModuleFormat) -> Self {
        match format {
            ModuleFormat::CommonJs => Self::Cjs,
            ModuleFormat::Esm => Self::Esm,
        }
    }
}

/// Generated proxy source plus the specifiers it imports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRecord {
    pub code: String,
    pub imports: Vec<String>,
    /// Files whose contents the code was derived from, entry first.
    pub sources: Vec<PathBuf>,
}

/// Module system of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFormat {
    Esm,
    CommonJs,
}

/// Decide whether a resolved file is an ES module or CommonJS.
///
/// Extension and manifest hints win, as does reaching the file through an
/// `import` export condition. Only when they are silent is the source read
/// and checked for module syntax.
///
/// # Errors
/// Returns [`Error::SourceRead`] if the file has to be sniffed and cannot be read.
pub async fn detect_format(resolved: &Resolved, esm: &EsmLexer) -> Result<ModuleFormat> {
    match resolved.path.extension().and_then(|e| e.to_str()) {
        Some("mjs") => return Ok(ModuleFormat::Esm),
        Some("cjs") => return Ok(ModuleFormat::CommonJs),
        _ => {}
    }
    if resolved.manifest.as_ref().is_some_and(|m| m.is_esm_package())
        || matches!(resolved.field, EntryField::Module | EntryField::ExportsImport)
    {
        return Ok(ModuleFormat::Esm);
    }

    let source = read_module(&resolved.path).await?;
    Ok(if esm.analyze(&source).has_module_syntax {
        ModuleFormat::Esm
    } else {
        ModuleFormat::CommonJs
    })
}

/// Read a module's source, tolerating invalid UTF-8.
pub(crate) async fn read_module(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await.map_err(|source| Error::SourceRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Quote `s` as a JavaScript string literal.
pub(crate) fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// The id a proxy uses to import its entry file.
pub(crate) fn entry_id(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::ReadinessGates;
    use std::fs;
    use tempfile::tempdir;

    fn resolved(path: PathBuf, field: EntryField) -> Resolved {
        Resolved {
            path,
            package_root: None,
            manifest: None,
            field,
        }
    }

    #[test]
    fn test_markers() {
        assert_eq!(ProxyKind::Cjs.mark("/a/index.js"), "/a/index.js?cjs-proxy");
        assert_eq!(
            ProxyKind::strip("/a/index.js?esm-proxy"),
            Some((ProxyKind::Esm, "/a/index.js"))
        );
        assert_eq!(ProxyKind::strip("/a/index.js"), None);
        assert!(ProxyKind::is_marked("/x.js?cjs-proxy"));
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string(r"C:\pkg\index.js"), r#""C:\\pkg\\index.js""#);
        assert_eq!(js_string("a\"b"), r#""a\"b""#);
    }

    #[tokio::test]
    async fn test_detect_format() {
        let dir = tempdir().unwrap();
        let esm = ReadinessGates::global().esm().await;

        let mjs = dir.path().join("a.mjs");
        let cjs = dir.path().join("a.cjs");
        let sniff_esm = dir.path().join("esm.js");
        let sniff_cjs = dir.path().join("cjs.js");
        fs::write(&sniff_esm, "export const x = 1;").unwrap();
        fs::write(&sniff_cjs, "exports.x = 1;").unwrap();

        // Extension hints never touch the disk.
        assert_eq!(
            detect_format(&resolved(mjs, EntryField::File), esm).await.unwrap(),
            ModuleFormat::Esm
        );
        assert_eq!(
            detect_format(&resolved(cjs, EntryField::File), esm).await.unwrap(),
            ModuleFormat::CommonJs
        );
        assert_eq!(
            detect_format(&resolved(sniff_cjs.clone(), EntryField::Module), esm)
                .await
                .unwrap(),
            ModuleFormat::Esm
        );
        assert_eq!(
            detect_format(&resolved(sniff_esm, EntryField::Main), esm).await.unwrap(),
            ModuleFormat::Esm
        );
        assert_eq!(
            detect_format(&resolved(sniff_cjs.clone(), EntryField::Main), esm)
                .await
                .unwrap(),
            ModuleFormat::CommonJs
        );
        // No module syntax and no `type`, but picked by the `import` condition.
        assert_eq!(
            detect_format(&resolved(sniff_cjs.clone(), EntryField::ExportsImport), esm)
                .await
                .unwrap(),
            ModuleFormat::Esm
        );
        assert_eq!(
            detect_format(&resolved(sniff_cjs, EntryField::Exports), esm).await.unwrap(),
            ModuleFormat::CommonJs
        );
    }
}
