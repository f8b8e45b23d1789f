//! Browser import map for the entry modules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// URL prefix under which proxy artifacts are served.
pub const MODULES_PREFIX: &str = "/@modules/";

/// `{"imports": {...}}` import map document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMap {
    pub imports: BTreeMap<String, String>,
}

impl ImportMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map every entry package, and its subpaths, under `base`.
    ///
    /// `base` defaults to [`MODULES_PREFIX`] when empty.
    pub fn from_entries<I, S>(entries: I, base: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let base = if base.is_empty() { MODULES_PREFIX } else { base };
        let base = base.trim_end_matches('/');
        let mut map = Self::new();
        for entry in entries {
            let name = entry.as_ref();
            map.insert(name, format!("{base}/{name}"));
            map.insert(format!("{name}/"), format!("{base}/{name}/"));
        }
        map
    }

    pub fn insert(&mut self, specifier: impl Into<String>, url: impl Into<String>) {
        self.imports.insert(specifier.into(), url.into());
    }

    #[must_use]
    pub fn get(&self, specifier: &str) -> Option<&str> {
        self.imports.get(specifier).map(String::as_str)
    }

    /// Serialized form for a `<script type="importmap">` tag.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"imports":{}}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_entries() {
        let map = ImportMap::from_entries(["react", "@scope/pkg"], "");
        assert_eq!(map.get("react"), Some("/@modules/react"));
        assert_eq!(map.get("react/"), Some("/@modules/react/"));
        assert_eq!(map.get("@scope/pkg/"), Some("/@modules/@scope/pkg/"));
        assert_eq!(map.imports.len(), 4);
    }

    #[test]
    fn test_custom_base_and_json() {
        let map = ImportMap::from_entries(["a"], "/deps/");
        assert_eq!(
            map.to_json(),
            r#"{"imports":{"a":"/deps/a","a/":"/deps/a/"}}"#
        );
        let parsed: ImportMap = serde_json::from_str(&map.to_json()).unwrap();
        assert_eq!(parsed, map);
    }
}
