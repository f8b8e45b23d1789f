#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Development-time module resolution for browser code.
//!
//! Lets pages `import "lodash"` against a plain `node_modules` tree: the
//! entry collector decides which packages get their own artifact, the
//! proxy generators turn CommonJS and ES module entries into uniform ESM
//! proxies, the require rewriter strips runtime `require()` from built
//! output, and [`ProxyPlugin`] exposes it all through `resolve_id`/`load`.

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod import_map;
pub mod lexer;
pub mod manifest;
pub mod plugin;
pub mod proxy;
pub mod resolver;
pub mod rewrite;
pub mod version;

pub use config::{EngineConfig, External};
pub use engine::Engine;
pub use error::{Error, Result};
pub use graph::{collect_entry_modules, EntrySet, SquashSet};
pub use import_map::{ImportMap, MODULES_PREFIX};
pub use lexer::ReadinessGates;
pub use manifest::{Manifest, ManifestError, ManifestReader};
pub use plugin::{LoadResult, ProxyMeta, ProxyPlugin, ResolveIdResult};
pub use proxy::{
    detect_format, generate_cjs_proxy, generate_esm_proxy, wrap_commonjs, ModuleFormat,
    ProxyKind, ProxyRecord,
};
pub use resolver::{EntryField, ResolutionKind, ResolveError, Resolved, Resolver};
pub use rewrite::{rewrite_imports, rewrite_requires, ImportRewrite, RewriteError, RewriteOutcome};
pub use version::VERSION;
