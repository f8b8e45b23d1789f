//! Squash patterns: package subtrees that never become their own entries.

use glob::Pattern;
use tracing::warn;

/// Compiled squash patterns.
///
/// Patterns are globs over package names. A trailing `/**` also matches
/// the base name itself, so `@babel/runtime/**` squashes `@babel/runtime`.
#[derive(Debug, Clone, Default)]
pub struct SquashSet {
    patterns: Vec<SquashPattern>,
}

#[derive(Debug, Clone)]
enum SquashPattern {
    Glob { glob: Pattern, base: Option<String> },
    /// Not a valid glob; matched literally.
    Literal(String),
}

impl SquashSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                let base = p.strip_suffix("/**").map(ToString::to_string);
                match Pattern::new(p) {
                    Ok(glob) => SquashPattern::Glob { glob, base },
                    Err(e) => {
                        warn!(pattern = %p, error = %e, "Invalid squash pattern, matching literally");
                        SquashPattern::Literal(base.unwrap_or_else(|| p.to_string()))
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    /// Whether package `name` is squashed.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| match p {
            SquashPattern::Glob { glob, base } => {
                glob.matches(name) || base.as_deref() == Some(name)
            }
            SquashPattern::Literal(literal) => literal == name,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
