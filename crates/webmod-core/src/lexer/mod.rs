//! Static analysis of package sources without a full parser.
//!
//! Two lexers, each behind a process-wide readiness gate:
//! - [`CjsLexer`] enumerates what a CommonJS file assigns onto `module.exports`.
//! - [`EsmLexer`] lists an ES module's static imports and whether it has
//!   module syntax / a default export.

mod cjs;
mod esm;
mod gate;

pub use cjs::{CjsAnalysis, CjsLexer};
pub use esm::{EsmAnalysis, EsmLexer, ImportSite};
pub use gate::{GateError, ReadinessGates};

/// Replace `//` and `/* */` comments with spaces, leaving string and
/// template literals untouched. Newlines are kept so offsets stay close.
#[must_use]
pub fn strip_comments(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;

    while i < len {
        let c = chars[i];

        if c == '"' || c == '\'' || c == '`' {
            let end = skip_string(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }

        if c == '/' && i + 1 < len && chars[i + 1] == '/' {
            while i < len && chars[i] != '\n' {
                out.push(' ');
                i += 1;
            }
            continue;
        }

        if c == '/' && i + 1 < len && chars[i + 1] == '*' {
            out.push_str("  ");
            i += 2;
            while i < len && !(chars[i] == '*' && i + 1 < len && chars[i + 1] == '/') {
                out.push(if chars[i] == '\n' { '\n' } else { ' ' });
                i += 1;
            }
            if i < len {
                out.push_str("  ");
                i += 2;
            }
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Index just past the string literal starting at `start` (which holds the quote).
pub(crate) fn skip_string(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let len = chars.len();
    let mut i = start + 1;
    while i < len && chars[i] != quote {
        if chars[i] == '\\' {
            i += 1;
        } else if chars[i] == '\n' && quote != '`' {
            // Unterminated literal; stop at the line end.
            return i;
        }
        i += 1;
    }
    (i + 1).min(len)
}

pub(crate) fn skip_ws(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

/// Read a `'...'` or `"..."` literal at `i`. Returns (contents, end).
pub(crate) fn string_at(chars: &[char], i: usize) -> Option<(String, usize)> {
    let quote = *chars.get(i)?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let end = skip_string(chars, i);
    if end < i + 2 || chars[end - 1] != quote {
        return None;
    }
    Some((chars[i + 1..end - 1].iter().collect(), end))
}

/// Check if chars at position match a keyword (with word boundaries on both sides).
pub(crate) fn matches_keyword(chars: &[char], pos: usize, keyword: &str) -> bool {
    let kw: Vec<char> = keyword.chars().collect();
    let len = kw.len();

    if pos + len > chars.len() {
        return false;
    }
    if pos > 0 && (is_ident_char(chars[pos - 1]) || chars[pos - 1] == '.') {
        return false;
    }
    if chars[pos..pos + len] != kw[..] {
        return false;
    }
    !(pos + len < chars.len() && is_ident_char(chars[pos + len]))
}

pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Whether `name` can be used as `export const <name>`.
#[must_use]
pub fn is_exportable_identifier(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
        "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for",
        "function", "if", "implements", "import", "in", "instanceof", "interface", "let", "new",
        "null", "package", "private", "protected", "public", "return", "static", "super",
        "switch", "this", "throw", "true", "try", "typeof", "var", "void", "while", "with",
        "yield", "arguments", "eval", "undefined",
    ];

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_alphabetic() || first == '_' || first == '$') {
        return false;
    }
    chars.all(is_ident_char) && !RESERVED.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments_keeps_strings() {
        let source = "a = '// not a comment'; // gone\n/* gone\ntoo */ b = \"/*x*/\";";
        let stripped = strip_comments(source);
        assert!(stripped.contains("'// not a comment'"));
        assert!(stripped.contains("\"/*x*/\""));
        assert!(!stripped.contains("gone"));
        assert_eq!(stripped.lines().count(), source.lines().count());
    }

    #[test]
    fn test_matches_keyword_boundaries() {
        let chars: Vec<char> = "x.require(a); require(b); requireX".chars().collect();
        assert!(!matches_keyword(&chars, 2, "require"));
        assert!(matches_keyword(&chars, 14, "require"));
        assert!(!matches_keyword(&chars, 26, "require"));
    }

    #[test]
    fn test_is_exportable_identifier() {
        assert!(is_exportable_identifier("foo"));
        assert!(is_exportable_identifier("$el"));
        assert!(is_exportable_identifier("_private1"));
        assert!(!is_exportable_identifier("default"));
        assert!(!is_exportable_identifier("class"));
        assert!(!is_exportable_identifier("1abc"));
        assert!(!is_exportable_identifier("has-dash"));
        assert!(!is_exportable_identifier(""));
    }
}
