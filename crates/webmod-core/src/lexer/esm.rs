//! ES module lexer.
//!
//! Scans for `import`/`export` statements without full parsing. Enough to
//! list a module's static import specifiers, detect module syntax, and
//! tell whether the module provides a default export.

use super::{is_ident_char, matches_keyword, skip_string, skip_ws, string_at, strip_comments};
use std::collections::HashSet;

/// What the ESM lexer found in one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EsmAnalysis {
    /// Static `import ... from` / `import "x"` / `export ... from` specifiers,
    /// in first-appearance order, deduplicated.
    pub imports: Vec<String>,
    /// Literal `import("x")` specifiers.
    pub dynamic_imports: Vec<String>,
    /// Any static `import`/`export` statement or `import.meta`.
    pub has_module_syntax: bool,
    /// `export default`, or `default` named in an export clause.
    pub has_default_export: bool,
    /// Every literal specifier occurrence, static and dynamic, in source order.
    pub sites: Vec<ImportSite>,
}

/// Where a literal import specifier sits in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSite {
    pub specifier: String,
    /// Char range of the text between the quotes.
    pub start: usize,
    pub end: usize,
    pub dynamic: bool,
}

impl ImportSite {
    /// Site for a string literal that `string_at` returned as `(spec, end)`.
    fn from_literal(specifier: String, end: usize, dynamic: bool) -> Self {
        let close = end - 1;
        Self {
            start: close - specifier.chars().count(),
            end: close,
            specifier,
            dynamic,
        }
    }
}

/// ESM lexer. Stateless; obtained through the ESM readiness gate.
#[derive(Debug)]
pub struct EsmLexer {
    _private: (),
}

impl EsmLexer {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }

    /// Analyze one module's source.
    #[must_use]
    pub fn analyze(&self, source: &str) -> EsmAnalysis {
        let code = strip_comments(source);
        let chars: Vec<char> = code.chars().collect();
        let len = chars.len();
        let mut analysis = EsmAnalysis::default();
        let mut seen = HashSet::new();
        let mut seen_dynamic = HashSet::new();
        let mut i = 0;

        while i < len {
            let c = chars[i];

            if c == '"' || c == '\'' || c == '`' {
                i = skip_string(&chars, i);
                continue;
            }

            if matches_keyword(&chars, i, "import") {
                let after = skip_ws(&chars, i + 6);
                match chars.get(after) {
                    Some('(') => {
                        if let Some((spec, end)) = string_at(&chars, skip_ws(&chars, after + 1)) {
                            analysis
                                .sites
                                .push(ImportSite::from_literal(spec.clone(), end, true));
                            if seen_dynamic.insert(spec.clone()) {
                                analysis.dynamic_imports.push(spec);
                            }
                            i = end;
                            continue;
                        }
                    }
                    Some('.') => analysis.has_module_syntax = true,
                    _ => {
                        analysis.has_module_syntax = true;
                        if let Some((spec, end)) = scan_import_statement(&chars, after) {
                            analysis
                                .sites
                                .push(ImportSite::from_literal(spec.clone(), end, false));
                            if seen.insert(spec.clone()) {
                                analysis.imports.push(spec);
                            }
                            i = end;
                            continue;
                        }
                    }
                }
                i += 6;
                continue;
            }

            if matches_keyword(&chars, i, "export") {
                analysis.has_module_syntax = true;
                let after = skip_ws(&chars, i + 6);
                if matches_keyword(&chars, after, "default") {
                    analysis.has_default_export = true;
                    i = after + 7;
                    continue;
                }
                if let Some((names, spec, end)) = scan_export_clause(&chars, after) {
                    if names.iter().any(|n| n == "default") {
                        analysis.has_default_export = true;
                    }
                    if let Some(spec) = spec {
                        analysis
                            .sites
                            .push(ImportSite::from_literal(spec.clone(), end, false));
                        if seen.insert(spec.clone()) {
                            analysis.imports.push(spec);
                        }
                    }
                    i = end;
                    continue;
                }
                i += 6;
                continue;
            }

            i += 1;
        }

        analysis
    }
}

/// After `import`: either `"x"` directly, or bindings followed by `from "x"`.
fn scan_import_statement(chars: &[char], start: usize) -> Option<(String, usize)> {
    if let Some(found) = string_at(chars, start) {
        return Some(found);
    }

    let mut i = start;
    let limit = (start + 1000).min(chars.len());
    while i < limit {
        match chars[i] {
            ';' => return None,
            '"' | '\'' | '`' => return None,
            _ if matches_keyword(chars, i, "from") => {
                return string_at(chars, skip_ws(chars, i + 4));
            }
            _ => i += 1,
        }
    }
    None
}

/// After `export`: `{ a, b as c } [from "x"]` or `* [as ns] from "x"`.
///
/// Returns the exported names, the source specifier if any, and the end.
fn scan_export_clause(
    chars: &[char],
    start: usize,
) -> Option<(Vec<String>, Option<String>, usize)> {
    let mut names = Vec::new();
    let mut i = start;

    match chars.get(i) {
        Some('{') => {
            let close = (i + 1..chars.len()).find(|&j| chars[j] == '}')?;
            let body: String = chars[i + 1..close].iter().collect();
            for item in body.split(',') {
                let item = item.trim();
                if item.is_empty() {
                    continue;
                }
                let exported = match item.split_once(" as ") {
                    Some((_, alias)) => alias.trim(),
                    None => item,
                };
                names.push(exported.trim_matches(|c| c == '"' || c == '\'').to_string());
            }
            i = close + 1;
        }
        Some('*') => {
            i = skip_ws(chars, i + 1);
            if matches_keyword(chars, i, "as") {
                i = skip_ws(chars, i + 2);
                let name_start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                names.push(chars[name_start..i].iter().collect());
            }
        }
        _ => return None,
    }

    let after = skip_ws(chars, i);
    if matches_keyword(chars, after, "from") {
        if let Some((spec, end)) = string_at(chars, skip_ws(chars, after + 4)) {
            return Some((names, Some(spec), end));
        }
    }
    Some((names, None, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(source: &str) -> EsmAnalysis {
        EsmLexer::new().analyze(source)
    }

    #[test]
    fn test_static_imports_in_order() {
        let a = analyze(
            r#"
import React from 'react';
import { useState } from "react";
import * as utils from './utils.js';
import './side-effect.css';
export { helper } from '@scope/helpers';
export * from "./all.js";
"#,
        );
        assert_eq!(
            a.imports,
            vec!["react", "./utils.js", "./side-effect.css", "@scope/helpers", "./all.js"]
        );
        assert!(a.has_module_syntax);
        assert!(!a.has_default_export);
    }

    #[test]
    fn test_multiline_import() {
        let a = analyze("import {\n  a,\n  b,\n} from 'multi';\n");
        assert_eq!(a.imports, vec!["multi"]);
    }

    #[test]
    fn test_dynamic_import_is_separate() {
        let a = analyze("const m = await import('lazy'); const n = import(name);");
        assert!(a.imports.is_empty());
        assert_eq!(a.dynamic_imports, vec!["lazy"]);
        assert!(!a.has_module_syntax);
    }

    #[test]
    fn test_default_export_forms() {
        assert!(analyze("export default function () {}").has_default_export);
        assert!(analyze("const x = 1; export { x as default };").has_default_export);
        assert!(analyze("export { default } from './impl.js';").has_default_export);
        assert!(!analyze("export { default as impl } from './impl.js';").has_default_export);
        assert!(!analyze("export const value = 1;").has_default_export);
        assert!(!analyze("export * from './impl.js';").has_default_export);
    }

    #[test]
    fn test_commonjs_has_no_module_syntax() {
        let a = analyze("const x = require('x');\nmodule.exports = { imported: x };");
        assert!(!a.has_module_syntax);
        assert!(a.imports.is_empty());
    }

    #[test]
    fn test_keywords_in_strings_and_comments_ignored() {
        let a = analyze("// import x from 'nope'\nconst s = \"import y from 'no'\";\n/* export default 1 */");
        assert!(!a.has_module_syntax);
        assert!(a.imports.is_empty());
        assert!(!a.has_default_export);
    }

    #[test]
    fn test_sites_cover_every_literal_occurrence() {
        let source = "import a from 'a';\n/* 'x' */ import { b } from \"a\";\nexport * from './c.js';\nimport('d');\n";
        let a = analyze(source);
        let chars: Vec<char> = source.chars().collect();

        let found: Vec<(&str, bool)> =
            a.sites.iter().map(|s| (s.specifier.as_str(), s.dynamic)).collect();
        assert_eq!(found, vec![("a", false), ("a", false), ("./c.js", false), ("d", true)]);
        for site in &a.sites {
            let text: String = chars[site.start..site.end].iter().collect();
            assert_eq!(text, site.specifier);
        }
        assert_eq!(a.imports, vec!["a", "./c.js"]);
    }

    #[test]
    fn test_import_meta_is_module_syntax() {
        assert!(analyze("console.log(import.meta.url);").has_module_syntax);
    }
}
