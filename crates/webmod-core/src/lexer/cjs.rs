//! CommonJS export lexer.
//!
//! Determines which names a CommonJS module assigns onto `module.exports`
//! without executing it. Anything it cannot pin down (computed keys,
//! `Object.assign(exports, ...)`, spreads) marks the analysis opaque, and
//! the proxy then degrades to a default-only export.

use super::{is_ident_char, skip_string, strip_comments};
use regex_lite::Regex;
use std::collections::HashSet;

/// What the CJS lexer found in one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CjsAnalysis {
    /// Names assigned onto the exports object, in source order, deduplicated.
    pub exports: Vec<String>,
    /// Specifiers whose exports are forwarded wholesale
    /// (`module.exports = require("x")`, `__exportStar(require("x"), exports)`).
    pub reexports: Vec<String>,
    /// Some property could not be determined statically.
    pub opaque: bool,
}

/// CommonJS lexer. Holds its compiled patterns; obtained through the CJS
/// readiness gate so the patterns are built once per process.
#[derive(Debug)]
pub struct CjsLexer {
    named: Regex,
    bracket: Regex,
    define: Regex,
    assign: Regex,
    reexport: Regex,
    export_star: Regex,
    object: Regex,
}

impl CjsLexer {
    pub(crate) fn new() -> Result<Self, regex_lite::Error> {
        const EXPORTS: &str = r"(?:module\s*\.\s*)?exports";
        Ok(Self {
            named: Regex::new(&format!(r"{EXPORTS}\s*\.\s*([A-Za-z_$][\w$]*)\s*="))?,
            bracket: Regex::new(&format!(r"{EXPORTS}\s*\[([^\]\n]*)\]\s*="))?,
            define: Regex::new(&format!(
                r#"Object\s*\.\s*defineProperty\(\s*{EXPORTS}\s*,\s*["']([^"'\n]+)["']"#
            ))?,
            assign: Regex::new(&format!(r"Object\s*\.\s*assign\(\s*{EXPORTS}\s*[,)]"))?,
            reexport: Regex::new(
                r#"module\s*\.\s*exports\s*=\s*require\(\s*["']([^"'\n]+)["']\s*\)"#,
            )?,
            export_star: Regex::new(
                r#"__export(?:Star)?\(\s*require\(\s*["']([^"'\n]+)["']\s*\)"#,
            )?,
            object: Regex::new(r"module\s*\.\s*exports\s*=\s*\{")?,
        })
    }

    /// Analyze one CommonJS file's source.
    #[must_use]
    pub fn analyze(&self, source: &str) -> CjsAnalysis {
        let code = strip_comments(source);
        let mut found: Vec<(usize, String)> = Vec::new();
        let mut reexports: Vec<(usize, String)> = Vec::new();
        let mut opaque = false;

        for caps in self.named.captures_iter(&code) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if is_member_of_other(&code, whole.start()) || is_comparison(&code, whole.end()) {
                continue;
            }
            found.push((whole.start(), name.as_str().to_string()));
        }

        for caps in self.bracket.captures_iter(&code) {
            let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if is_member_of_other(&code, whole.start()) || is_comparison(&code, whole.end()) {
                continue;
            }
            match string_literal(key.as_str().trim()) {
                Some(name) => found.push((whole.start(), name)),
                None => opaque = true,
            }
        }

        for caps in self.define.captures_iter(&code) {
            if let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) {
                found.push((whole.start(), name.as_str().to_string()));
            }
        }

        if self.assign.is_match(&code) {
            opaque = true;
        }

        for re in [&self.reexport, &self.export_star] {
            for caps in re.captures_iter(&code) {
                if let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) {
                    reexports.push((whole.start(), spec.as_str().to_string()));
                }
            }
        }

        for m in self.object.find_iter(&code) {
            if is_member_of_other(&code, m.start()) {
                continue;
            }
            match object_literal_keys(&code, m.end() - 1) {
                Some(keys) => found.extend(keys.into_iter().map(|k| (m.start(), k))),
                None => opaque = true,
            }
        }

        CjsAnalysis {
            exports: ordered_unique(found)
                .into_iter()
                .filter(|n| n != "__esModule")
                .collect(),
            reexports: ordered_unique(reexports),
            opaque,
        }
    }
}

fn ordered_unique(mut items: Vec<(usize, String)>) -> Vec<String> {
    items.sort_by_key(|(pos, _)| *pos);
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter_map(|(_, name)| seen.insert(name.clone()).then_some(name))
        .collect()
}

/// `foo.exports.x` or `myexports.x` are not the module's exports.
fn is_member_of_other(code: &str, start: usize) -> bool {
    code[..start]
        .chars()
        .next_back()
        .is_some_and(|c| is_ident_char(c) || c == '.')
}

/// `exports.x == y` is a comparison, not an assignment.
fn is_comparison(code: &str, end: usize) -> bool {
    code[end..].starts_with('=')
}

fn string_literal(s: &str) -> Option<String> {
    let quote = s.chars().next()?;
    if (quote == '"' || quote == '\'') && s.len() >= 2 && s.ends_with(quote) {
        Some(s[1..s.len() - 1].to_string())
    } else {
        None
    }
}

/// Keys of the object literal whose `{` is at byte `open`.
///
/// Returns `None` when a key is computed or the literal contains a spread.
fn object_literal_keys(code: &str, open: usize) -> Option<Vec<String>> {
    let chars: Vec<char> = code[open..].chars().collect();
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' | '`' => {
                let end = skip_string(&chars, i);
                if depth == 1 {
                    current.extend(&chars[i..end]);
                }
                i = end;
                continue;
            }
            '{' | '(' | '[' => {
                depth += 1;
                if depth == 2 && c == '[' && current.trim().is_empty() {
                    return None;
                }
                if depth > 1 {
                    current.push(c);
                }
            }
            '}' | ')' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    entries.push(std::mem::take(&mut current));
                    break;
                }
                current.push(c);
            }
            ',' if depth == 1 => entries.push(std::mem::take(&mut current)),
            _ if depth >= 1 => current.push(c),
            _ => {}
        }
        i += 1;
    }

    let mut keys = Vec::new();
    for entry in entries {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if entry.starts_with("...") {
            return None;
        }
        keys.push(entry_key(entry)?);
    }
    Some(keys)
}

/// Key of one object literal entry: `a`, `a: x`, `"a": x`, `a() {}`, `get a() {}`.
fn entry_key(entry: &str) -> Option<String> {
    if let Some(name) = string_literal_prefix(entry) {
        return Some(name);
    }

    let mut rest = entry;
    for prefix in ["async ", "get ", "set ", "*"] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            let stripped = stripped.trim_start();
            if stripped.starts_with(|c: char| is_ident_char(c) || c == '"' || c == '\'') {
                rest = stripped;
            }
        }
    }
    if let Some(name) = string_literal_prefix(rest) {
        return Some(name);
    }

    let end = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    Some(rest[..end].to_string())
}

fn string_literal_prefix(entry: &str) -> Option<String> {
    let quote = entry.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let close = entry[1..].find(quote)? + 1;
    Some(entry[1..close].to_string())
}
