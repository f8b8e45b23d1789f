//! Engine facade wiring configuration, manifests, resolver and plugin.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::{collect_entry_modules, EntrySet, SquashSet};
use crate::import_map::{ImportMap, MODULES_PREFIX};
use crate::manifest::ManifestReader;
use crate::plugin::ProxyPlugin;
use crate::resolver::Resolver;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// One configured resolution engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    manifests: Arc<ManifestReader>,
    resolver: Resolver,
    plugin: ProxyPlugin,
    squash: SquashSet,
    entries: Mutex<Option<Arc<EntrySet>>>,
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let manifests = Arc::new(ManifestReader::new());
        let resolver = Resolver::new(Arc::clone(&manifests));
        let plugin = ProxyPlugin::new(
            config.root_dir.clone(),
            config.external.clone(),
            resolver.clone(),
        );
        let squash = SquashSet::new(&config.squash);
        Self {
            config,
            manifests,
            resolver,
            plugin,
            squash,
            entries: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn manifests(&self) -> &Arc<ManifestReader> {
        &self.manifests
    }

    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    #[must_use]
    pub fn plugin(&self) -> &ProxyPlugin {
        &self.plugin
    }

    /// The entry module set, computed on first call and reused afterwards.
    ///
    /// # Errors
    /// Fails if the root manifest cannot be read.
    pub fn entries(&self) -> Result<Arc<EntrySet>> {
        let mut slot = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = slot.as_ref() {
            return Ok(Arc::clone(entries));
        }

        let entries = Arc::new(collect_entry_modules(
            &self.config.root_manifest_path(),
            &self.squash,
            &self.manifests,
        )?);
        info!(
            root = %self.config.root_dir.display(),
            entries = entries.len(),
            "Entry modules collected"
        );
        *slot = Some(Arc::clone(&entries));
        Ok(entries)
    }

    /// Import map pointing every entry at its proxy URL.
    ///
    /// # Errors
    /// Fails if the entry set cannot be computed.
    pub fn import_map(&self) -> Result<ImportMap> {
        Ok(ImportMap::from_entries(self.entries()?.iter(), MODULES_PREFIX))
    }

    /// Forget cached manifests and the entry set.
    pub fn clear(&self) {
        self.manifests.clear();
        *self.entries.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
