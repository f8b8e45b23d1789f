//! Specifier rewriting for served modules.
//!
//! [`rewrite_imports`] maps the literal specifiers of ESM `import`/`export
//! from` statements to served URLs. [`rewrite_requires`] handles CommonJS:
//!
//! Replaces runtime `require("x")` calls in an artifact with static ESM
//! imports plus a generated dispatch function, so CommonJS-derived output
//! loads in the browser without a module runtime:
//!
//! ```js
//! import * as __webmod_require_0 from "/@fs/app/node_modules/a/index.js";
//! function __webmod_require(specifier) {
//!   switch (specifier) {
//!     case "./a": return __webmod_require_0.default !== undefined ? __webmod_require_0.default : __webmod_require_0;
//!     default: throw new Error("Cannot find module '" + specifier + "'");
//!   }
//! }
//! const x = __webmod_require("./a");
//! ```

use crate::lexer::{
    matches_keyword, skip_string, skip_ws, string_at, strip_comments, EsmLexer, ImportSite,
};
use crate::proxy::js_string;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const DISPATCH_FN: &str = "__webmod_require";

/// Errors while rewriting an artifact.
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("Failed to read artifact {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write artifact {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot resolve require('{specifier}') in {}: {message}", .path.display())]
    Resolve {
        specifier: String,
        path: PathBuf,
        message: String,
    },
}

/// What a rewrite did to an artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// The file was changed on disk.
    pub rewritten: bool,
    /// Distinct resolved URLs now imported, in binding order.
    pub imports: Vec<String>,
    /// `require(...)` calls with non-literal arguments, left as they were.
    pub unresolved: Vec<String>,
}

/// Result of [`rewrite_imports`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRewrite {
    pub code: String,
    /// Distinct static import targets after rewriting, in source order.
    pub imports: Vec<String>,
}

/// Rewrite the literal import specifiers of an ES module.
///
/// `route` maps each specifier to the URL it is served under, or `None`
/// to leave it as written. Specifiers already under a served prefix
/// (`/@...`) are never passed to `route`.
pub fn rewrite_imports<F>(code: &str, lexer: &EsmLexer, mut route: F) -> ImportRewrite
where
    F: FnMut(&ImportSite) -> Option<String>,
{
    let analysis = lexer.analyze(code);
    let mut routed: HashMap<&str, Option<String>> = HashMap::new();
    let mut result = ImportRewrite::default();
    let mut replacements: Vec<(usize, usize, String)> = Vec::new();

    for site in &analysis.sites {
        let target = if site.specifier.starts_with("/@") {
            None
        } else {
            routed
                .entry(site.specifier.as_str())
                .or_insert_with(|| route(site))
                .clone()
        };
        let url = target.clone().unwrap_or_else(|| site.specifier.clone());
        if !site.dynamic && !result.imports.contains(&url) {
            result.imports.push(url);
        }
        if let Some(target) = target {
            if target != site.specifier {
                replacements.push((site.start, site.end, target));
            }
        }
    }

    if replacements.is_empty() {
        result.code = code.to_string();
        return result;
    }

    let mut out = String::with_capacity(code.len() + replacements.len() * 32);
    let mut next = replacements.iter().peekable();
    let mut skip_until = 0;
    for (i, c) in code.chars().enumerate() {
        if let Some((start, end, target)) = next.peek() {
            if *start == i {
                out.push_str(&escape_for_quote(target));
                skip_until = *end;
                next.next();
            }
        }
        if i < skip_until {
            continue;
        }
        out.push(c);
    }
    result.code = out;
    result
}

/// Text that can sit between either kind of quote.
fn escape_for_quote(s: &str) -> String {
    let quoted = js_string(s);
    quoted[1..quoted.len() - 1].replace('\'', "\\'")
}

/// A literal `require("x")` call site.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RequireCall {
    /// Char offset of the `require` identifier.
    start: usize,
    specifier: String,
}

#[derive(Debug, Default)]
struct RequireScan {
    calls: Vec<RequireCall>,
    non_literal: Vec<String>,
}

/// Rewrite the `require()` calls of the artifact at `file` in place.
///
/// Each distinct literal specifier is resolved once through `resolve`
/// against the artifact's own directory. Specifiers resolving to the same
/// URL share one import. A file without literal requires is left untouched.
///
/// # Errors
/// Fails when the file cannot be read or written, or when `resolve`
/// rejects a specifier.
pub async fn rewrite_requires<F, Fut, E>(
    file: &Path,
    resolve: F,
) -> Result<RewriteOutcome, RewriteError>
where
    F: Fn(String, PathBuf) -> Fut,
    Fut: Future<Output = Result<String, E>>,
    E: std::fmt::Display,
{
    let bytes = tokio::fs::read(file).await.map_err(|source| RewriteError::Read {
        path: file.to_path_buf(),
        source,
    })?;
    let code = String::from_utf8_lossy(&bytes).into_owned();
    let scan = scan_requires(&code);

    for snippet in &scan.non_literal {
        warn!(
            file = %file.display(),
            call = %snippet,
            "require() with a non-literal argument left unrewritten"
        );
    }

    let mut outcome = RewriteOutcome {
        unresolved: scan.non_literal,
        ..RewriteOutcome::default()
    };
    if scan.calls.is_empty() {
        return Ok(outcome);
    }

    let basedir = file.parent().unwrap_or(Path::new("/")).to_path_buf();
    let mut binding_for_url: HashMap<String, usize> = HashMap::new();
    let mut cases: Vec<(String, usize)> = Vec::new();

    for call in &scan.calls {
        if cases.iter().any(|(spec, _)| *spec == call.specifier) {
            continue;
        }
        let url = resolve(call.specifier.clone(), basedir.clone())
            .await
            .map_err(|e| RewriteError::Resolve {
                specifier: call.specifier.clone(),
                path: file.to_path_buf(),
                message: e.to_string(),
            })?;
        let next = outcome.imports.len();
        let binding = *binding_for_url.entry(url.clone()).or_insert_with(|| {
            outcome.imports.push(url);
            next
        });
        cases.push((call.specifier.clone(), binding));
    }

    let rewritten = splice(&code, &scan.calls, &outcome.imports, &cases);
    let path = file.to_path_buf();
    tokio::task::spawn_blocking(move || webmod_util::fs::write_artifact(&path, rewritten.as_bytes()))
        .await
        .map_err(io::Error::other)
        .and_then(|r| r)
        .map_err(|source| RewriteError::Write {
            path: file.to_path_buf(),
            source,
        })?;

    debug!(
        file = %file.display(),
        calls = scan.calls.len(),
        imports = outcome.imports.len(),
        "Rewrote require() calls"
    );
    outcome.rewritten = true;
    Ok(outcome)
}

/// Find `require(...)` calls outside strings and comments.
fn scan_requires(code: &str) -> RequireScan {
    // Comment stripping keeps char offsets, so positions map back to `code`.
    let stripped: Vec<char> = strip_comments(code).chars().collect();
    let len = stripped.len();
    let mut scan = RequireScan::default();
    let mut i = 0;

    while i < len {
        let c = stripped[i];
        if c == '"' || c == '\'' || c == '`' {
            i = skip_string(&stripped, i);
            continue;
        }
        if !matches_keyword(&stripped, i, "require") {
            i += 1;
            continue;
        }

        let open = skip_ws(&stripped, i + 7);
        if stripped.get(open) != Some(&'(') {
            i += 7;
            continue;
        }
        let arg = skip_ws(&stripped, open + 1);
        match string_at(&stripped, arg) {
            Some((specifier, end)) if stripped.get(skip_ws(&stripped, end)) == Some(&')') => {
                scan.calls.push(RequireCall { start: i, specifier });
                i = end;
            }
            _ => {
                let close = (open..len).find(|&j| stripped[j] == ')').unwrap_or(len - 1);
                scan.non_literal
                    .push(stripped[i..=close.min(i + 60)].iter().collect());
                i = open + 1;
            }
        }
    }

    scan
}

/// Build the rewritten artifact text.
fn splice(code: &str, calls: &[RequireCall], urls: &[String], cases: &[(String, usize)]) -> String {
    let mut out = String::with_capacity(code.len() + 256);

    for (index, url) in urls.iter().enumerate() {
        out.push_str(&format!(
            "import * as {DISPATCH_FN}_{index} from {};\n",
            js_string(url)
        ));
    }
    out.push_str(&format!("function {DISPATCH_FN}(specifier) {{\n"));
    out.push_str("  switch (specifier) {\n");
    for (specifier, index) in cases {
        let ns = format!("{DISPATCH_FN}_{index}");
        out.push_str(&format!(
            "    case {}: return {ns}.default !== undefined ? {ns}.default : {ns};\n",
            js_string(specifier)
        ));
    }
    out.push_str("    default: throw new Error(\"Cannot find module '\" + specifier + \"'\");\n");
    out.push_str("  }\n}\n");

    let mut starts = calls.iter().map(|c| c.start).peekable();
    for (i, c) in code.chars().enumerate() {
        if starts.peek() == Some(&i) {
            starts.next();
            out.push_str("__webmod_");
        }
        out.push(c);
    }
    out
}
