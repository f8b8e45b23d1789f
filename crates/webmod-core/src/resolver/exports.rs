//! `package.json` exports field evaluation.
//!
//! Browser-oriented: the `browser` condition is always preferred, then the
//! condition matching the resolution kind, then `default`. Handles the
//! string shorthand, root condition objects, exact subpaths, single-`*`
//! patterns, nested conditions and fallback arrays.

use serde_json::{Map, Value};

/// Which conditional export to prefer after `browser`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionKind {
    /// Static/dynamic ESM import (`import`, then `module`).
    #[default]
    Import,
    /// `require()` call (`require`).
    Require,
}

impl ResolutionKind {
    fn conditions(self) -> &'static [&'static str] {
        match self {
            Self::Import => &["browser", "import", "module", "default"],
            Self::Require => &["browser", "require", "default"],
        }
    }
}

impl std::fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Import => write!(f, "import"),
            Self::Require => write!(f, "require"),
        }
    }
}

/// A matched `exports` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget {
    /// Package-relative path, starting with `./`.
    pub path: String,
    /// An `import` or `module` condition was taken on the way to `path`.
    pub esm_condition: bool,
}

impl ExportTarget {
    fn plain(path: String) -> Self {
        Self {
            path,
            esm_condition: false,
        }
    }
}

/// Evaluate an `exports` field for `subpath` (`"."` or `"./feature"`).
///
/// Returns the package-relative target (starting with `./`) or `None` when
/// the field has no matching entry.
#[must_use]
pub fn resolve_exports(exports: &Value, subpath: &str, kind: ResolutionKind) -> Option<String> {
    resolve_export_target(exports, subpath, kind).map(|t| t.path)
}

/// Like [`resolve_exports`], also reporting which kind of condition matched.
#[must_use]
pub fn resolve_export_target(
    exports: &Value,
    subpath: &str,
    kind: ResolutionKind,
) -> Option<ExportTarget> {
    match exports {
        Value::String(_) | Value::Array(_) => {
            if subpath == "." {
                resolve_target(exports, kind)
            } else {
                None
            }
        }
        Value::Object(obj) => {
            if !has_subpath_keys(obj) {
                // Root conditions object: { "import": ..., "default": ... }
                return if subpath == "." {
                    resolve_target(exports, kind)
                } else {
                    None
                };
            }
            if let Some(target) = obj.get(subpath) {
                return resolve_target(target, kind);
            }
            resolve_pattern(obj, subpath, kind)
        }
        _ => None,
    }
}

/// Check if exports object has subpath keys (keys starting with ".").
fn has_subpath_keys(obj: &Map<String, Value>) -> bool {
    obj.keys().any(|k| k.starts_with('.'))
}

/// Most specific `*` pattern wins (longest key, then lexicographic).
fn resolve_pattern(
    obj: &Map<String, Value>,
    subpath: &str,
    kind: ResolutionKind,
) -> Option<ExportTarget> {
    let mut best: Option<(&str, &Value, &str)> = None;

    for (key, value) in obj {
        if key.matches('*').count() != 1 || !key.starts_with("./") {
            continue;
        }
        let Some(star) = match_pattern(key, subpath) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((k, _, _)) => key.len() > k.len() || (key.len() == k.len() && key.as_str() < k),
        };
        if better {
            best = Some((key.as_str(), value, star));
        }
    }

    let (_, target, star) = best?;
    let target = resolve_target(target, kind)?;
    if target.path.matches('*').count() != 1 {
        return None;
    }
    let substituted = target.path.replace('*', star);
    if substituted.split('/').any(|segment| segment == "..") {
        return None;
    }
    Some(ExportTarget {
        path: substituted,
        ..target
    })
}

/// Match `./features/*` against `./features/foo`, returning `foo`.
fn match_pattern<'a>(pattern: &str, subpath: &'a str) -> Option<&'a str> {
    let (prefix, suffix) = pattern.split_once('*')?;
    let rest = subpath.strip_prefix(prefix)?;
    let star = rest.strip_suffix(suffix)?;
    if star.is_empty() {
        None
    } else {
        Some(star)
    }
}

/// Resolve a target: string, fallback array, or (nested) conditions object.
fn resolve_target(target: &Value, kind: ResolutionKind) -> Option<ExportTarget> {
    match target {
        Value::String(s) => s.starts_with("./").then(|| ExportTarget::plain(s.clone())),
        Value::Array(items) => items.iter().find_map(|item| resolve_target(item, kind)),
        Value::Object(conditions) => kind
            .conditions()
            .iter()
            .filter_map(|c| conditions.get(*c).map(|t| (*c, t)))
            .find_map(|(condition, t)| {
                let mut found = resolve_target(t, kind)?;
                found.esm_condition |= matches!(condition, "import" | "module");
                Some(found)
            }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_shorthand() {
        let exports = json!("./dist/index.js");
        assert_eq!(
            resolve_exports(&exports, ".", ResolutionKind::Import),
            Some("./dist/index.js".to_string())
        );
        assert_eq!(resolve_exports(&exports, "./sub", ResolutionKind::Import), None);
    }

    #[test]
    fn test_browser_condition_wins() {
        let exports = json!({
            ".": {
                "node": "./node.js",
                "browser": "./browser.js",
                "import": "./esm.js",
                "default": "./cjs.js"
            }
        });
        assert_eq!(
            resolve_exports(&exports, ".", ResolutionKind::Import),
            Some("./browser.js".to_string())
        );
    }

    #[test]
    fn test_import_vs_require_conditions() {
        let exports = json!({
            "import": "./esm.mjs",
            "require": "./cjs.cjs"
        });
        assert_eq!(
            resolve_exports(&exports, ".", ResolutionKind::Import),
            Some("./esm.mjs".to_string())
        );
        assert_eq!(
            resolve_exports(&exports, ".", ResolutionKind::Require),
            Some("./cjs.cjs".to_string())
        );
    }

    #[test]
    fn test_nested_conditions_and_arrays() {
        let exports = json!({
            ".": {
                "import": { "types": "./index.d.ts", "default": "./index.mjs" }
            },
            "./fallback": ["invalid", "./fallback.js"]
        });
        assert_eq!(
            resolve_exports(&exports, ".", ResolutionKind::Import),
            Some("./index.mjs".to_string())
        );
        assert_eq!(
            resolve_exports(&exports, "./fallback", ResolutionKind::Import),
            Some("./fallback.js".to_string())
        );
    }

    #[test]
    fn test_pattern_specificity() {
        let exports = json!({
            "./*": "./dist/*.js",
            "./features/*": "./dist/features/*.js",
            "./bad/*": "./dist/*/../x.js"
        });
        assert_eq!(
            resolve_exports(&exports, "./features/a", ResolutionKind::Import),
            Some("./dist/features/a.js".to_string())
        );
        assert_eq!(
            resolve_exports(&exports, "./utils", ResolutionKind::Import),
            Some("./dist/utils.js".to_string())
        );
        assert_eq!(resolve_exports(&exports, "./bad/q", ResolutionKind::Import), None);
    }

    #[test]
    fn test_subpath_missing() {
        let exports = json!({ ".": "./index.js" });
        assert_eq!(resolve_exports(&exports, "./missing", ResolutionKind::Import), None);
    }

    #[test]
    fn test_import_condition_is_reported() {
        let exports = json!({
            ".": {
                "browser": { "import": "./esm/index.js", "default": "./cjs/index.js" },
                "require": "./cjs/index.js"
            },
            "./plain": "./plain.js"
        });
        let import = resolve_export_target(&exports, ".", ResolutionKind::Import).unwrap();
        assert_eq!(import.path, "./esm/index.js");
        assert!(import.esm_condition);

        let require = resolve_export_target(&exports, ".", ResolutionKind::Require).unwrap();
        assert_eq!(require.path, "./cjs/index.js");
        assert!(!require.esm_condition);

        let plain = resolve_export_target(&exports, "./plain", ResolutionKind::Import).unwrap();
        assert!(!plain.esm_condition);
    }
}
