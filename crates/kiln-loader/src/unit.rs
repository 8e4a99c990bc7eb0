//! Loaded units and their handles

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::UnitError;
use crate::platform::{Symbol, UnitLoader};
use crate::reaper::TempArtifact;

/// Shared handle to a loaded unit
pub type LoaderHandle = Arc<LoadedUnit>;

/// One compiled artifact bound to a platform loader
pub struct LoadedUnit {
    name: String,
    artifact: PathBuf,
    // Dropped before `temp`, so the artifact is unmapped before deletion
    loader: Arc<dyn UnitLoader>,
    temp: Option<Arc<TempArtifact>>,
}

impl LoadedUnit {
    pub fn new(
        name: impl Into<String>,
        artifact: impl Into<PathBuf>,
        loader: Arc<dyn UnitLoader>,
        temp: Option<Arc<TempArtifact>>,
    ) -> Self {
        Self {
            name: name.into(),
            artifact: artifact.into(),
            loader,
            temp,
        }
    }

    /// Registry name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compiled artifact backing this unit
    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// Whether the artifact is deleted once this unit is unreachable
    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// Temporary artifact guard, for callers that want to release early
    pub fn temp_artifact(&self) -> Option<&Arc<TempArtifact>> {
        self.temp.as_ref()
    }

    pub fn loader(&self) -> &Arc<dyn UnitLoader> {
        &self.loader
    }
}

impl UnitLoader for LoadedUnit {
    fn find_symbol(&self, name: &str) -> Result<Option<Arc<Symbol>>, UnitError> {
        self.loader.find_symbol(name)
    }

    fn symbol_names(&self) -> Vec<String> {
        self.loader.symbol_names()
    }

    fn find_library(&self, name: &str) -> Option<PathBuf> {
        self.loader.find_library(name)
    }
}

impl fmt::Debug for LoadedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedUnit")
            .field("name", &self.name)
            .field("artifact", &self.artifact)
            .field("temporary", &self.is_temporary())
            .finish()
    }
}
