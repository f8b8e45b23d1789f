#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! Resource cache for webmod.
//!
//! Serves built modules by URL:
//! - one build per URL at a time, shared by every concurrent request
//! - a watch on each backing file, so edits evict what was built from it
//! - on-disk artifacts written under the engine's output directory
//!
//! [`ProxyPipeline`] plugs the engine into the cache as its builder.

pub mod cache;
pub mod pipeline;
pub mod store;
pub mod watch;

pub use cache::{BuildError, CacheStats, ResourceBuilder, ResourceCache};
pub use pipeline::{fs_url, path_from_fs_url, ProxyPipeline, FS_PREFIX};
pub use store::{ArtifactStore, BuiltResource, CacheEntry};
pub use watch::{
    spawn_invalidator, FileWatcher, FsEvent, FsEventKind, NotifyWatcher, WatchError,
    WatchRegistry,
};
