//! Ancestor coloring of the dependency graph.

use std::collections::HashMap;
use std::fmt;

/// The package through which a node was reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ancestor {
    /// Reached directly from the root manifest.
    Root,
    Package(String),
}

impl fmt::Display for Ancestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "<root>"),
            Self::Package(name) => write!(f, "{name}"),
        }
    }
}

/// Outcome of coloring one visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Never seen before; the node is now colored with the ancestor.
    First,
    /// Seen before through the same ancestor.
    Repeat,
    /// Seen before through a different ancestor.
    Diamond,
}

/// Map from package name to the ancestor that first reached it.
///
/// Only the immediate ancestor is compared: a package reached twice
/// through the same parent is a repeat even if that parent was itself
/// reached through different grandparents.
#[derive(Debug, Clone, Default)]
pub struct AncestorColoring {
    colors: HashMap<String, Ancestor>,
}

impl AncestorColoring {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `name` was reached through `ancestor`.
    pub fn visit(&mut self, name: &str, ancestor: &Ancestor) -> Visit {
        match self.colors.get(name) {
            None => {
                self.colors.insert(name.to_string(), ancestor.clone());
                Visit::First
            }
            Some(existing) if existing == ancestor => Visit::Repeat,
            Some(_) => Visit::Diamond,
        }
    }

    /// Ancestor that first reached `name`.
    #[must_use]
    pub fn ancestor_of(&self, name: &str) -> Option<&Ancestor> {
        self.colors.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visit_outcomes() {
        let mut coloring = AncestorColoring::new();
        let a = Ancestor::Package("a".into());
        let c = Ancestor::Package("c".into());

        assert_eq!(coloring.visit("b", &a), Visit::First);
        assert_eq!(coloring.visit("b", &a), Visit::Repeat);
        assert_eq!(coloring.visit("b", &c), Visit::Diamond);
        // The first color sticks.
        assert_eq!(coloring.ancestor_of("b"), Some(&a));
        assert_eq!(coloring.len(), 1);
    }

    #[test]
    fn test_root_is_distinct_from_packages() {
        let mut coloring = AncestorColoring::new();
        assert_eq!(coloring.visit("a", &Ancestor::Root), Visit::First);
        assert_eq!(
            coloring.visit("a", &Ancestor::Package("root".into())),
            Visit::Diamond
        );
        assert_eq!(Ancestor::Root.to_string(), "<root>");
    }
}
