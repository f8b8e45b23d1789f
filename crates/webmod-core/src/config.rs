use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Default artifact directory, relative to the root.
pub const DEFAULT_OUTPUT_DIR: &str = ".webmod/deps";

/// Engine configuration handed over by the host's config loader.
///
/// The engine never reads config files itself; hosts deserialize this from
/// whatever they load (JSON shown below).
///
/// ```json
/// {
///   "rootDir": "/work/app",
///   "squash": ["@babel/runtime/**"],
///   "external": ["fsevents"],
///   "environment": "development"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Project root containing the root `package.json`.
    pub root_dir: PathBuf,

    /// Glob patterns naming subtrees that are never split into their own entries.
    #[serde(default)]
    pub squash: Vec<String>,

    /// Specifiers left untouched by the proxy hook.
    #[serde(default)]
    pub external: External,

    /// Build environment name (`development`, `test`, ...).
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Where built artifacts go. Relative paths are taken from `root_dir`.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Opaque esbuild sub-options, carried for host transforms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub esbuild: Option<Value>,

    /// Opaque babel sub-options, carried for host transforms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub babel: Option<Value>,
}

fn default_environment() -> String {
    "development".to_string()
}

/// `external` accepts a single specifier or a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum External {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl External {
    /// Check whether a specifier (or its package) is external.
    #[must_use]
    pub fn contains(&self, specifier: &str) -> bool {
        let pkg = crate::resolver::package_name_from_specifier(specifier);
        let hit = |e: &String| e == specifier || *e == pkg;
        match self {
            Self::None => false,
            Self::One(e) => hit(e),
            Self::Many(list) => list.iter().any(hit),
        }
    }
}

impl EngineConfig {
    /// Create a config rooted at `root_dir` with defaults everywhere else.
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            squash: Vec::new(),
            external: External::None,
            environment: default_environment(),
            output_dir: None,
            esbuild: None,
            babel: None,
        }
    }

    /// Parse a config from JSON text.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or `rootDir` is missing.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Parse a config from an already-decoded JSON value.
    ///
    /// # Errors
    /// Returns an error if the value does not have the config shape.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Set squash patterns.
    #[must_use]
    pub fn with_squash<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.squash = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Set externals.
    #[must_use]
    pub fn with_external(mut self, external: External) -> Self {
        self.external = external;
        self
    }

    /// Set the artifact directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Absolute artifact directory.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.root_dir.join(dir),
            None => self.root_dir.join(DEFAULT_OUTPUT_DIR),
        }
    }

    /// Path of the root `package.json`.
    #[must_use]
    pub fn root_manifest_path(&self) -> PathBuf {
        self.root_dir.join("package.json")
    }
}
