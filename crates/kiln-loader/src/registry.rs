//! Insertion-ordered registry of loaded units
//!
//! Insertion order is recency order: re-registering a name moves it to
//! the end, and resolution scans from the end, so the most recently
//! (re)loaded unit wins.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::error::{FatalLoadingError, UnitError};
use crate::platform::{PlatformLoader, Symbol, UnitLoader, UnitSpec};
use crate::reaper::TempArtifact;
use crate::staging::CacheLayout;
use crate::unit::{LoadedUnit, LoaderHandle};

/// Name → loaded unit, in recency order
pub struct LoaderRegistry {
    layout: CacheLayout,
    platform: Arc<dyn PlatformLoader>,
    parent: Option<Arc<dyn UnitLoader>>,
    units: RwLock<IndexMap<String, LoaderHandle>>,
}

impl LoaderRegistry {
    pub fn new(
        layout: CacheLayout,
        platform: Arc<dyn PlatformLoader>,
        parent: Option<Arc<dyn UnitLoader>>,
    ) -> Self {
        Self {
            layout,
            platform,
            parent,
            units: RwLock::new(IndexMap::new()),
        }
    }

    /// Bind `artifact` and register it as the most recent unit under `name`.
    ///
    /// The platform load happens outside the registry lock; the swap of the
    /// entry is atomic, so readers never observe a half-registered unit.
    pub fn register(
        &self,
        name: &str,
        artifact: &Path,
        temp: Option<Arc<TempArtifact>>,
    ) -> Result<LoaderHandle, FatalLoadingError> {
        let unit_error = |source: UnitError| FatalLoadingError::Unit {
            name: name.to_string(),
            source,
        };

        let size = match std::fs::metadata(artifact) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(unit_error(UnitError::NotFound(artifact.to_path_buf())))
            }
            Err(e) => return Err(unit_error(e.into())),
        };
        tracing::debug!(unit = name, artifact = %artifact.display(), size, "loading unit");

        let loader = self
            .platform
            .load(&UnitSpec {
                name,
                artifact,
                scratch_dir: self.layout.root(),
                libs_dir: self.layout.libs(),
                parent: self.parent.clone(),
            })
            .map_err(unit_error)?;

        let handle = Arc::new(LoadedUnit::new(name, artifact, loader, temp));

        let mut units = self.units.write();
        if units.shift_remove(name).is_some() {
            tracing::debug!(unit = name, "replacing previously registered unit");
        }
        units.insert(name.to_string(), handle.clone());

        Ok(handle)
    }

    /// Handle registered under `name`
    pub fn lookup(&self, name: &str) -> Option<LoaderHandle> {
        self.units.read().get(name).cloned()
    }

    /// Consistent snapshot, most recently registered first
    pub fn recent_first(&self) -> Vec<LoaderHandle> {
        self.units.read().values().rev().cloned().collect()
    }

    /// Resolve `symbol` against registered units, most recent first.
    ///
    /// A unit that fails to answer is skipped.
    pub fn resolve(&self, symbol: &str) -> Option<Arc<Symbol>> {
        for unit in self.recent_first() {
            match unit.find_symbol(symbol) {
                Ok(Some(found)) => return Some(found),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(unit = unit.name(), symbol, error = %e, "unit failed lookup, skipping");
                }
            }
        }
        None
    }

    /// Registered names, oldest first
    pub fn names(&self) -> Vec<String> {
        self.units.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }

    /// Purge the cache directory and forget every unit.
    ///
    /// Does not check for threads still running loaded code; callers wait
    /// on the concurrency guard first.
    pub fn unload_all(&self) -> io::Result<()> {
        let mut units = self.units.write();
        let purged = self.layout.purge();
        let dropped = units.len();
        units.clear();
        tracing::debug!(dropped, "registry cleared");
        purged
    }
}
