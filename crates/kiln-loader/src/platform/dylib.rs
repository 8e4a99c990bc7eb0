//! Shared-library units
//!
//! Cross-platform loading of compiled artifacts that are native shared
//! libraries (.so, .dylib, .dll). Each symbol lookup is a `dlsym` /
//! `GetProcAddress` on the unit's library.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{library_file_name, PlatformLoader, Symbol, SymbolBody, UnitLoader, UnitSpec};
use crate::error::UnitError;

/// Binds shared-library artifacts
#[derive(Debug, Clone, Copy, Default)]
pub struct DylibLoader;

impl PlatformLoader for DylibLoader {
    fn load(&self, spec: &UnitSpec<'_>) -> Result<Arc<dyn UnitLoader>, UnitError> {
        let library = Library::open(spec.artifact)?;
        Ok(Arc::new(DylibUnit {
            name: spec.name.to_string(),
            library: Arc::new(library),
            libs_dir: spec.libs_dir.to_path_buf(),
            parent: spec.parent.clone(),
            resolved: Mutex::new(FxHashMap::default()),
        }))
    }
}

struct DylibUnit {
    name: String,
    library: Arc<Library>,
    libs_dir: PathBuf,
    parent: Option<Arc<dyn UnitLoader>>,
    resolved: Mutex<FxHashMap<String, Arc<Symbol>>>,
}

impl UnitLoader for DylibUnit {
    fn find_symbol(&self, name: &str) -> Result<Option<Arc<Symbol>>, UnitError> {
        let mut resolved = self.resolved.lock();
        if let Some(symbol) = resolved.get(name) {
            return Ok(Some(symbol.clone()));
        }

        if let Some(address) = self.library.address_of(name)? {
            let symbol = Arc::new(Symbol::new(
                name,
                self.name.as_str(),
                SymbolBody::Native {
                    address,
                    library: self.library.clone(),
                },
            ));
            resolved.insert(name.to_string(), symbol.clone());
            return Ok(Some(symbol));
        }
        drop(resolved);

        match &self.parent {
            Some(parent) => parent.find_symbol(name),
            None => Ok(None),
        }
    }

    fn find_library(&self, name: &str) -> Option<PathBuf> {
        let path = self.libs_dir.join(library_file_name(name));
        path.is_file().then_some(path)
    }
}

/// Cross-platform dynamic library handle
pub struct Library {
    handle: LibraryHandle,
    path: PathBuf,
}

impl Library {
    /// Load a dynamic library from the given path.
    ///
    /// # Platform-specific behavior
    ///
    /// - **Unix**: `dlopen(RTLD_NOW | RTLD_LOCAL)`
    /// - **Windows**: `LoadLibraryW`
    pub fn open(path: &Path) -> Result<Self, UnitError> {
        if !path.exists() {
            return Err(UnitError::NotFound(path.to_path_buf()));
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| UnitError::Platform(format!("Invalid UTF-8 in path: {:?}", path)))?;

        let handle = LibraryHandle::load(path_str)?;
        Ok(Library {
            handle,
            path: path.to_path_buf(),
        })
    }

    /// Address of an exported symbol, `None` if the library does not export it
    pub fn address_of(&self, symbol: &str) -> Result<Option<usize>, UnitError> {
        let c_name = CString::new(symbol)
            .map_err(|e| UnitError::Platform(format!("Invalid symbol name: {}", e)))?;
        Ok(self.handle.symbol(&c_name))
    }

    /// Path this library was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// Platform-specific implementations

#[cfg(unix)]
type LibraryHandle = UnixLibrary;

#[cfg(windows)]
type LibraryHandle = WindowsLibrary;

// ============================================================================
// Unix Implementation (Linux, macOS, BSD)
// ============================================================================

#[cfg(unix)]
struct UnixLibrary {
    handle: *mut std::ffi::c_void,
}

#[cfg(unix)]
impl UnixLibrary {
    fn load(path: &str) -> Result<Self, UnitError> {
        let c_path = CString::new(path)
            .map_err(|e| UnitError::Platform(format!("Invalid path: {}", e)))?;

        // RTLD_LOCAL keeps one unit's symbols out of the next unit's namespace
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };

        if handle.is_null() {
            return Err(UnitError::Platform(format!("{}: {}", path, last_dl_error())));
        }

        Ok(UnixLibrary { handle })
    }

    fn symbol(&self, name: &CString) -> Option<usize> {
        unsafe {
            // Clear any previous errors
            libc::dlerror();
            let symbol = libc::dlsym(self.handle, name.as_ptr());
            if !libc::dlerror().is_null() || symbol.is_null() {
                return None;
            }
            Some(symbol as usize)
        }
    }
}

#[cfg(unix)]
fn last_dl_error() -> String {
    unsafe {
        let err_ptr = libc::dlerror();
        if err_ptr.is_null() {
            "Unknown error".to_string()
        } else {
            std::ffi::CStr::from_ptr(err_ptr).to_string_lossy().into_owned()
        }
    }
}

#[cfg(unix)]
impl Drop for UnixLibrary {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

#[cfg(unix)]
unsafe impl Send for UnixLibrary {}
#[cfg(unix)]
unsafe impl Sync for UnixLibrary {}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
struct WindowsLibrary {
    handle: *mut std::ffi::c_void,
}

#[cfg(windows)]
impl WindowsLibrary {
    fn load(path: &str) -> Result<Self, UnitError> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;

        let wide: Vec<u16> = OsStr::new(path)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let handle = unsafe { LoadLibraryW(wide.as_ptr()) };

        if handle.is_null() {
            let error = unsafe { GetLastError() };
            return Err(UnitError::Platform(format!("{} (error code: {})", path, error)));
        }

        Ok(WindowsLibrary { handle })
    }

    fn symbol(&self, name: &CString) -> Option<usize> {
        let symbol = unsafe { GetProcAddress(self.handle, name.as_ptr()) };
        (!symbol.is_null()).then_some(symbol as usize)
    }
}

#[cfg(windows)]
impl Drop for WindowsLibrary {
    fn drop(&mut self) {
        unsafe {
            FreeLibrary(self.handle);
        }
    }
}

#[cfg(windows)]
unsafe impl Send for WindowsLibrary {}
#[cfg(windows)]
unsafe impl Sync for WindowsLibrary {}

// Windows FFI declarations
#[cfg(windows)]
extern "system" {
    fn LoadLibraryW(filename: *const u16) -> *mut std::ffi::c_void;
    fn GetProcAddress(
        module: *mut std::ffi::c_void,
        procname: *const std::ffi::c_char,
    ) -> *mut std::ffi::c_void;
    fn FreeLibrary(module: *mut std::ffi::c_void) -> i32;
    fn GetLastError() -> u32;
}
