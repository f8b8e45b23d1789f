//! CommonJS proxy generation and CommonJS artifact wrapping.

use super::{entry_id, js_string, read_module, ProxyRecord};
use crate::error::Result;
use crate::lexer::{is_exportable_identifier, CjsLexer, ReadinessGates};
use crate::resolver::{is_bare_specifier, ResolutionKind, Resolver};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Binding the proxy imports the CommonJS module under.
const DEFAULT_BINDING: &str = "__cjs_default";

/// Prefix of every top-level binding [`wrap_commonjs`] and the require
/// rewriter declare.
const WRAPPER_PREFIX: &str = "__webmod_";

/// Exports gathered across an entry and its relative reexports.
#[derive(Debug, Default)]
struct CollectedExports {
    names: Vec<String>,
    bare_reexports: Vec<String>,
    opaque: bool,
    /// Files read, entry first.
    files: Vec<PathBuf>,
}

/// Generate the ESM proxy for a CommonJS entry file.
///
/// Waits for the CJS readiness gate, then statically collects the names
/// the entry assigns onto its exports, following relative
/// `module.exports = require(...)` chains. When anything is indeterminate
/// the proxy only has a default export.
///
/// # Errors
/// Fails if the gate cannot be prepared or the entry file cannot be read.
pub async fn generate_cjs_proxy(
    entry: &Path,
    resolver: &Resolver,
    gates: &ReadinessGates,
) -> Result<ProxyRecord> {
    let lexer = gates.cjs().await?;
    let collected = collect_exports(entry, lexer, resolver).await?;
    let id = entry_id(entry);
    let quoted = js_string(&id);

    let mut code = format!("import {DEFAULT_BINDING} from {quoted};\n");
    let mut imports = vec![id];

    if collected.opaque {
        debug!(
            entry = %entry.display(),
            "Exports not statically determinable, proxy is default-only"
        );
    } else {
        for name in named_exports(&collected.names, &[DEFAULT_BINDING]) {
            code.push_str(&format!("export const {name} = {DEFAULT_BINDING}.{name};\n"));
        }
        for spec in &collected.bare_reexports {
            code.push_str(&format!("export * from {};\n", js_string(spec)));
            imports.push(spec.clone());
        }
    }

    code.push_str(&format!("export default {DEFAULT_BINDING};\n"));
    Ok(ProxyRecord {
        code,
        imports,
        sources: collected.files,
    })
}

/// Names that can be emitted as `export const <name>` next to the
/// module-level bindings in `taken`.
fn named_exports<'a>(names: &'a [String], taken: &'a [&'a str]) -> impl Iterator<Item = &'a str> {
    names.iter().map(String::as_str).filter(move |name| {
        if !is_exportable_identifier(name) || taken.contains(name) {
            debug!(name = %name, "Export only reachable through default");
            return false;
        }
        true
    })
}

async fn collect_exports(
    entry: &Path,
    lexer: &CjsLexer,
    resolver: &Resolver,
) -> Result<CollectedExports> {
    let mut collected = CollectedExports::default();
    let mut seen_names = HashSet::new();
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut queue = vec![entry.to_path_buf()];

    while let Some(file) = queue.pop() {
        if !visited.insert(file.clone()) {
            continue;
        }
        // The entry must be readable; a missing reexport target only degrades.
        let source = match read_module(&file).await {
            Ok(source) => source,
            Err(e) if file != entry => {
                debug!(file = %file.display(), error = %e, "Reexported file unreadable");
                collected.opaque = true;
                continue;
            }
            Err(e) => return Err(e),
        };

        collected.files.push(file.clone());
        let analysis = lexer.analyze(&source);
        collected.opaque |= analysis.opaque;
        for name in analysis.exports {
            if seen_names.insert(name.clone()) {
                collected.names.push(name);
            }
        }

        let basedir = file.parent().unwrap_or(Path::new("/"));
        for spec in analysis.reexports {
            if is_bare_specifier(&spec) {
                if !collected.bare_reexports.contains(&spec) {
                    collected.bare_reexports.push(spec);
                }
                continue;
            }
            match resolver.resolve(&spec, basedir, ResolutionKind::Require) {
                Ok(resolved) => queue.push(resolved.path),
                Err(e) => {
                    debug!(specifier = %spec, error = %e, "Reexport unresolvable");
                    collected.opaque = true;
                }
            }
        }
    }

    Ok(collected)
}

/// Wrap a CommonJS file body into an ES module whose default export is
/// `module.exports`.
///
/// `process.env.NODE_ENV` is provided for the given environment when the
/// page has no `process` global. Each of `exports` that is a usable
/// identifier also becomes a named export.
#[must_use]
pub fn wrap_commonjs(source: &str, environment: &str, exports: &[String]) -> String {
    let mut code = format!(
        "const __webmod_module = {{ exports: {{}} }};\n\
         const __webmod_process = typeof process !== \"undefined\" ? process : {{ env: {{ NODE_ENV: {env} }} }};\n\
         (function (module, exports, process) {{\n\
         {source}\n\
         }}).call(__webmod_module.exports, __webmod_module, __webmod_module.exports, __webmod_process);\n",
        env = js_string(environment),
    );
    for name in named_exports(exports, &[]).filter(|n| !n.starts_with(WRAPPER_PREFIX)) {
        code.push_str(&format!("export const {name} = __webmod_module.exports.{name};\n"));
    }
    code.push_str("export default __webmod_module.exports;\n");
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestReader;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn resolver() -> Resolver {
        Resolver::new(Arc::new(ManifestReader::new()))
    }

    fn export_names(code: &str) -> Vec<&str> {
        code.lines()
            .filter_map(|l| l.strip_prefix("export const "))
            .filter_map(|l| l.split(' ').next())
            .collect()
    }

    #[tokio::test]
    async fn test_named_exports_plus_default() {
        let dir = tempdir().unwrap();
        let entry = dir.path().join("index.js");
        fs::write(&entry, "exports.a = 1;\nexports.b = 2;\n").unwrap();

        let record = generate_cjs_proxy(&entry, &resolver(), ReadinessGates::global())
            .await
            .unwrap();

        assert_eq!(export_names(&record.code), vec!["a", "b"]);
        assert!(record.code.contains("export default __cjs_default;"));
        assert!(record
            .code
            .starts_with(&format!("import __cjs_default from {};", js_string(&entry_id(&entry)))));
        assert_eq!(record.imports, vec![entry_id(&entry)]);
        assert_eq!(record.sources, vec![entry.clone()]);
    }

    #[tokio::test]
    async fn test_export_named_like_binding_is_default_only() {
        let dir = tempdir().unwrap();
        let entry = dir.path().join("index.js");
        fs::write(&entry, "exports.__cjs_default = 1;\nexports.a = 2;\n").unwrap();

        let record = generate_cjs_proxy(&entry, &resolver(), ReadinessGates::global())
            .await
            .unwrap();

        assert_eq!(export_names(&record.code), vec!["a"]);
        assert_eq!(record.code.matches("__cjs_default =").count(), 0);
    }

    #[tokio::test]
    async fn test_computed_exports_degrade_to_default_only() {
        let dir = tempdir().unwrap();
        let entry = dir.path().join("index.js");
        fs::write(&entry, "exports.a = 1;\nfor (const k of keys) exports[k] = k;\n").unwrap();

        let record = generate_cjs_proxy(&entry, &resolver(), ReadinessGates::global())
            .await
            .unwrap();

        assert!(export_names(&record.code).is_empty());
        assert!(record.code.contains("export default __cjs_default;"));
    }

    #[tokio::test]
    async fn test_relative_reexports_are_followed() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let entry = root.join("index.js");
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(&entry, "module.exports = require('./lib/impl');\n").unwrap();
        fs::write(
            root.join("lib/impl.js"),
            "exports.run = run;\nmodule.exports.stop = stop;\n__exportStar(require('./types'), exports);\n",
        )
        .unwrap();
        fs::write(root.join("lib/types.js"), "exports.Kind = {};\n").unwrap();

        let record = generate_cjs_proxy(&entry, &resolver(), ReadinessGates::global())
            .await
            .unwrap();

        let mut names = export_names(&record.code);
        names.sort_unstable();
        assert_eq!(names, vec!["Kind", "run", "stop"]);

        let mut sources = record.sources.clone();
        sources.sort();
        assert_eq!(
            sources,
            vec![entry, root.join("lib/impl.js"), root.join("lib/types.js")]
        );
    }

    #[tokio::test]
    async fn test_reexport_cycle_terminates() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "module.exports = require('./b');\nexports.a = 1;").unwrap();
        fs::write(dir.path().join("b.js"), "module.exports = require('./a');\nexports.b = 1;").unwrap();

        let record = generate_cjs_proxy(&dir.path().join("a.js"), &resolver(), ReadinessGates::global())
            .await
            .unwrap();

        let mut names = export_names(&record.code);
        names.sort_unstable();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_bare_reexport_is_imported() {
        let dir = tempdir().unwrap();
        let entry = dir.path().join("index.js");
        fs::write(&entry, "module.exports = require('react-dom/client');\n").unwrap();

        let record = generate_cjs_proxy(&entry, &resolver(), ReadinessGates::global())
            .await
            .unwrap();

        assert!(record.code.contains("export * from \"react-dom/client\";"));
        assert_eq!(record.imports[1], "react-dom/client");
    }

    #[tokio::test]
    async fn test_non_identifier_names_only_via_default() {
        let dir = tempdir().unwrap();
        let entry = dir.path().join("index.js");
        fs::write(&entry, "exports['kebab-case'] = 1;\nexports.default = 2;\nexports.ok = 3;\n").unwrap();

        let record = generate_cjs_proxy(&entry, &resolver(), ReadinessGates::global())
            .await
            .unwrap();

        assert_eq!(export_names(&record.code), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_missing_entry_is_an_error() {
        let dir = tempdir().unwrap();
        let result =
            generate_cjs_proxy(&dir.path().join("nope.js"), &resolver(), ReadinessGates::global()).await;
        assert!(matches!(result, Err(crate::Error::SourceRead { .. })));
    }

    #[test]
    fn test_wrap_commonjs() {
        let wrapped = wrap_commonjs("module.exports = 42;", "production", &[]);
        assert!(wrapped.contains("module.exports = 42;"));
        assert!(wrapped.contains("NODE_ENV: \"production\""));
        assert!(wrapped.trim_end().ends_with("export default __webmod_module.exports;"));
    }

    #[test]
    fn test_wrap_commonjs_named_exports() {
        let names = ["run", "__webmod_module", "class", "stop"].map(String::from);
        let wrapped = wrap_commonjs("exports.run = 1;", "development", &names);
        assert_eq!(export_names(&wrapped), vec!["run", "stop"]);
        assert!(wrapped.contains("export const run = __webmod_module.exports.run;"));
        assert_eq!(wrapped.matches("const __webmod_module").count(), 1);
    }
}
