//! Platform loader construct
//!
//! This module provides:
//! - Resolved symbols (`Symbol`, `SymbolBody`)
//! - The polymorphic resolution step (`UnitLoader`)
//! - Binding of compiled artifacts to loaders (`PlatformLoader`)
//! - Zip-packaged bytecode units (`ArchiveLoader`)
//! - Shared-library units (`DylibLoader`)
//! - Host-provided fallback symbols (`SystemLoader`)

pub mod archive;
pub mod dylib;

pub use archive::ArchiveLoader;
pub use dylib::{DylibLoader, Library};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::UnitError;

/// A resolved definition
pub struct Symbol {
    name: String,
    unit: String,
    body: SymbolBody,
}

/// What a symbol resolves to
#[derive(Clone)]
pub enum SymbolBody {
    /// Bytecode executed by the host
    Bytecode(Arc<[u8]>),
    /// Exported address inside a shared library
    Native {
        /// Symbol address
        address: usize,
        /// Keeps the library mapped while the symbol is alive
        library: Arc<Library>,
    },
}

impl Symbol {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, body: SymbolBody) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            body,
        }
    }

    /// Fully qualified symbol name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the unit that defined this symbol
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn body(&self) -> &SymbolBody {
        &self.body
    }

    /// Bytecode body, if this is a bytecode symbol
    pub fn bytecode(&self) -> Option<&[u8]> {
        match &self.body {
            SymbolBody::Bytecode(bytes) => Some(bytes),
            SymbolBody::Native { .. } => None,
        }
    }

    /// Native address, if this is a native symbol
    pub fn address(&self) -> Option<usize> {
        match &self.body {
            SymbolBody::Native { address, .. } => Some(*address),
            SymbolBody::Bytecode(_) => None,
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Symbol");
        s.field("name", &self.name).field("unit", &self.unit);
        match &self.body {
            SymbolBody::Bytecode(bytes) => s.field("bytecode_len", &bytes.len()),
            SymbolBody::Native { address, .. } => s.field("address", &format!("{:#x}", address)),
        };
        s.finish()
    }
}

/// One step of symbol resolution.
///
/// `Ok(None)` means "not here"; callers chaining loaders move on to the
/// next one. `Err` is a real failure of this loader.
pub trait UnitLoader: Send + Sync {
    /// Look up a symbol by fully qualified name
    fn find_symbol(&self, name: &str) -> Result<Option<Arc<Symbol>>, UnitError>;

    /// Names of the symbols this loader defines itself
    fn symbol_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Path of a native library available to this loader
    fn find_library(&self, _name: &str) -> Option<PathBuf> {
        None
    }
}

/// Everything a platform loader needs to bind one artifact
#[derive(Clone)]
pub struct UnitSpec<'a> {
    /// Registry name of the unit
    pub name: &'a str,
    /// Compiled artifact
    pub artifact: &'a Path,
    /// Writable scratch directory
    pub scratch_dir: &'a Path,
    /// Native library directory
    pub libs_dir: &'a Path,
    /// Fallback loader
    pub parent: Option<Arc<dyn UnitLoader>>,
}

/// Produces a loader for a compiled artifact
pub trait PlatformLoader: Send + Sync {
    fn load(&self, spec: &UnitSpec<'_>) -> Result<Arc<dyn UnitLoader>, UnitError>;
}

/// Host-provided symbols, used as the fallback system loader
#[derive(Default)]
pub struct SystemLoader {
    symbols: RwLock<FxHashMap<String, Arc<Symbol>>>,
}

impl SystemLoader {
    /// Unit name reported by system symbols
    pub const UNIT_NAME: &'static str = "<system>";

    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host symbol, replacing any previous definition
    pub fn define(&self, name: &str, bytecode: &[u8]) -> Arc<Symbol> {
        let symbol = Arc::new(Symbol::new(
            name,
            Self::UNIT_NAME,
            SymbolBody::Bytecode(Arc::from(bytecode)),
        ));
        self.symbols.write().insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }
}

impl UnitLoader for SystemLoader {
    fn find_symbol(&self, name: &str) -> Result<Option<Arc<Symbol>>, UnitError> {
        Ok(self.symbols.read().get(name).cloned())
    }

    fn symbol_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.symbols.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Platform file name of a native library (`libfoo.so`, `foo.dll`, ...)
pub fn library_file_name(name: &str) -> String {
    format!(
        "{}{}{}",
        std::env::consts::DLL_PREFIX,
        name,
        std::env::consts::DLL_SUFFIX
    )
}
