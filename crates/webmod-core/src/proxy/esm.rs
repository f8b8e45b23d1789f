//! ES module proxy generation.

use super::{entry_id, js_string, read_module, ProxyRecord};
use crate::error::Result;
use crate::lexer::ReadinessGates;
use std::path::Path;

/// Generate the pass-through proxy for an ES module entry file.
///
/// Re-exports everything, plus `default` when the entry has one. The
/// imports are the entry's own static import specifiers. The output only
/// depends on the entry's contents, so proxying twice gives the same code.
///
/// # Errors
/// Fails if the entry file cannot be read.
pub async fn generate_esm_proxy(entry: &Path, gates: &ReadinessGates) -> Result<ProxyRecord> {
    let lexer = gates.esm().await;
    let source = read_module(entry).await?;
    let analysis = lexer.analyze(&source);

    let quoted = js_string(&entry_id(entry));
    let mut code = format!("export * from {quoted};\n");
    if analysis.has_default_export {
        code.push_str(&format!("export {{ default }} from {quoted};\n"));
    }

    Ok(ProxyRecord {
        code,
        imports: analysis.imports,
        sources: vec![entry.to_path_buf()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_proxy_is_idempotent() {
        let dir = tempdir().unwrap();
        let entry = dir.path().join("index.mjs");
        fs::write(
            &entry,
            "import { h } from 'preact';\nimport './style.css';\nexport const x = h;\nexport default x;\n",
        )
        .unwrap();

        let gates = ReadinessGates::global();
        let first = generate_esm_proxy(&entry, gates).await.unwrap();
        let second = generate_esm_proxy(&entry, gates).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.imports, vec!["preact", "./style.css"]);
        assert!(first.code.contains("export * from"));
        assert!(first.code.contains("export { default } from"));
    }

    #[tokio::test]
    async fn test_no_default_reexport_without_default() {
        let dir = tempdir().unwrap();
        let entry = dir.path().join("index.mjs");
        fs::write(&entry, "export function a() {}\n").unwrap();

        let record = generate_esm_proxy(&entry, ReadinessGates::global()).await.unwrap();

        assert_eq!(record.code.lines().count(), 1);
        assert!(record.imports.is_empty());
    }
}
