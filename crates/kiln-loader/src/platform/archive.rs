//! Zip-packaged bytecode units
//!
//! The entry index is built when the unit is bound; entry bodies are read
//! from the artifact on first lookup. The artifact therefore has to stay
//! on disk for as long as the unit is reachable.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use zip::ZipArchive;

use super::{library_file_name, PlatformLoader, Symbol, SymbolBody, UnitLoader, UnitSpec};
use crate::archive::symbol_name_for;
use crate::error::UnitError;

/// Binds packaged zip artifacts
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveLoader;

impl PlatformLoader for ArchiveLoader {
    fn load(&self, spec: &UnitSpec<'_>) -> Result<Arc<dyn UnitLoader>, UnitError> {
        Ok(Arc::new(ArchiveUnit::open(spec)?))
    }
}

/// A bound archive artifact
pub struct ArchiveUnit {
    name: String,
    artifact: PathBuf,
    libs_dir: PathBuf,
    parent: Option<Arc<dyn UnitLoader>>,
    /// Symbol name → entry path
    entries: FxHashMap<String, String>,
    /// Symbols already materialized, so repeated lookups share one `Arc`
    resolved: Mutex<FxHashMap<String, Arc<Symbol>>>,
}

impl ArchiveUnit {
    /// Index the artifact's entries
    pub fn open(spec: &UnitSpec<'_>) -> Result<Self, UnitError> {
        let metadata = match fs::metadata(spec.artifact) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(UnitError::NotFound(spec.artifact.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.len() == 0 {
            return Err(UnitError::Malformed {
                path: spec.artifact.to_path_buf(),
                reason: "artifact is empty".to_string(),
            });
        }

        let mut zip = ZipArchive::new(File::open(spec.artifact)?).map_err(|e| {
            UnitError::Malformed {
                path: spec.artifact.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let mut entries = FxHashMap::default();
        for i in 0..zip.len() {
            let entry = zip.by_index_raw(i).map_err(|e| UnitError::Malformed {
                path: spec.artifact.to_path_buf(),
                reason: e.to_string(),
            })?;
            if entry.is_dir() {
                continue;
            }
            if let Some(symbol) = symbol_name_for(entry.name()) {
                entries.insert(symbol, entry.name().to_owned());
            }
        }

        Ok(Self {
            name: spec.name.to_string(),
            artifact: spec.artifact.to_path_buf(),
            libs_dir: spec.libs_dir.to_path_buf(),
            parent: spec.parent.clone(),
            entries,
            resolved: Mutex::new(FxHashMap::default()),
        })
    }

    /// Number of symbols defined by this unit
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn read_entry(&self, entry: &str) -> Result<Vec<u8>, UnitError> {
        let malformed = |e: zip::result::ZipError| UnitError::Malformed {
            path: self.artifact.clone(),
            reason: e.to_string(),
        };

        let mut zip = ZipArchive::new(File::open(&self.artifact)?).map_err(malformed)?;
        let mut file = zip.by_name(entry).map_err(malformed)?;
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl UnitLoader for ArchiveUnit {
    fn find_symbol(&self, name: &str) -> Result<Option<Arc<Symbol>>, UnitError> {
        if let Some(symbol) = self.resolved.lock().get(name) {
            return Ok(Some(symbol.clone()));
        }

        if let Some(entry) = self.entries.get(name) {
            let data = self.read_entry(entry)?;
            let symbol = Arc::new(Symbol::new(
                name,
                self.name.as_str(),
                SymbolBody::Bytecode(Arc::from(data)),
            ));
            let mut resolved = self.resolved.lock();
            return Ok(Some(resolved.entry(name.to_string()).or_insert(symbol).clone()));
        }

        match &self.parent {
            Some(parent) => parent.find_symbol(name),
            None => Ok(None),
        }
    }

    fn symbol_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    fn find_library(&self, name: &str) -> Option<PathBuf> {
        let path = self.libs_dir.join(library_file_name(name));
        path.is_file().then_some(path)
    }
}
