//! Resolver: the caller-facing loader
//!
//! Lookup order for `load_class`:
//! 1. symbols this resolver already defined locally
//! 2. the parent loader
//! 3. registered units, most recently registered first
//! 4. the local unit
//!
//! Failures in steps 2 and 3 mean "not here" and are only logged; only
//! exhausting all four is reported.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::ThreadId;

use crate::compiler::{ExternalCompiler, NativeCompiler, PassthroughCompiler};
use crate::config::LoaderConfig;
use crate::error::{FatalLoadingError, OpenError, ResolveError, UnitError};
use crate::guard::{ConcurrencyGuard, Quiescence};
use crate::pipeline::CompilationPipeline;
use crate::platform::{library_file_name, ArchiveLoader, PlatformLoader, Symbol, UnitLoader};
use crate::reaper::TempArtifactReaper;
use crate::registry::LoaderRegistry;
use crate::staging::{ArtifactStaging, CacheLayout};
use crate::unit::LoaderHandle;

/// Where lookups go before the registry
#[derive(Clone, Default)]
pub enum ParentLoader {
    /// No parent
    #[default]
    None,
    /// Any loader, e.g. the host's system loader
    Loader(Arc<dyn UnitLoader>),
    /// Another resolver; its cache tree is never purged by this one
    Resolver(Arc<Resolver>),
}

impl ParentLoader {
    fn as_loader(&self) -> Option<Arc<dyn UnitLoader>> {
        match self {
            ParentLoader::None => None,
            ParentLoader::Loader(loader) => Some(loader.clone()),
            ParentLoader::Resolver(resolver) => Some(resolver.clone() as Arc<dyn UnitLoader>),
        }
    }
}

/// Compiler and platform loader pair used by a resolver
#[derive(Clone)]
pub struct Backend {
    pub compiler: Arc<dyn NativeCompiler>,
    pub platform: Arc<dyn PlatformLoader>,
}

impl Backend {
    pub fn new(compiler: Arc<dyn NativeCompiler>, platform: Arc<dyn PlatformLoader>) -> Self {
        Self { compiler, platform }
    }

    /// External compiler from the config if present, else passthrough;
    /// zip archive units.
    pub fn from_config(config: &LoaderConfig) -> Self {
        let compiler: Arc<dyn NativeCompiler> = match &config.compiler {
            Some(compiler) => Arc::new(ExternalCompiler::new(compiler)),
            None => Arc::new(PassthroughCompiler),
        };
        Self::new(compiler, Arc::new(ArchiveLoader))
    }
}

/// What `unload_all_after` does when the wait times out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadPolicy {
    /// Unload anyway
    BestEffort,
    /// Leave everything in place
    Strict,
}

/// Dynamic loader over one cache directory
pub struct Resolver {
    layout: CacheLayout,
    parent: Option<Arc<dyn UnitLoader>>,
    registry: Arc<LoaderRegistry>,
    guard: Arc<ConcurrencyGuard>,
    reaper: Arc<TempArtifactReaper>,
    pipeline: CompilationPipeline,
    local: RwLock<Option<Arc<dyn UnitLoader>>>,
    /// Symbols found through the local unit
    defined: RwLock<FxHashMap<String, Arc<Symbol>>>,
}

impl Resolver {
    /// Open a resolver over `config.cache_dir`.
    ///
    /// An existing cache tree is purged unless the parent is a resolver.
    pub fn open(
        config: LoaderConfig,
        backend: Backend,
        parent: ParentLoader,
    ) -> Result<Self, OpenError> {
        config.validate()?;

        let layout = CacheLayout::new(&config);
        let prepared = if layout.root().exists() && !matches!(parent, ParentLoader::Resolver(_)) {
            tracing::debug!(cache_dir = %layout.root().display(), "purging stale cache directory");
            layout.purge()
        } else {
            layout.create()
        };
        prepared.map_err(|source| OpenError::CacheDir {
            path: layout.root().to_path_buf(),
            source,
        })?;

        let parent = parent.as_loader();
        let guard = Arc::new(ConcurrencyGuard::new(config.quiescence));
        let reaper = Arc::new(TempArtifactReaper::new());
        let registry = Arc::new(LoaderRegistry::new(
            layout.clone(),
            backend.platform,
            parent.clone(),
        ));
        let pipeline = CompilationPipeline::new(
            ArtifactStaging::new(layout.clone(), &config),
            guard.clone(),
            registry.clone(),
            reaper.clone(),
            backend.compiler,
            config.dump_failed_input,
        );

        Ok(Self {
            layout,
            parent,
            registry,
            guard,
            reaper,
            pipeline,
            local: RwLock::new(None),
            defined: RwLock::new(FxHashMap::default()),
        })
    }

    /// Compile raw bytecode for one symbol and return that symbol
    pub fn define_class(&self, name: &str, bytes: &[u8]) -> Result<Arc<Symbol>, FatalLoadingError> {
        let handle = self.pipeline.define_from_bytes(name, bytes)?;
        match handle.find_symbol(name) {
            Ok(Some(symbol)) => Ok(symbol),
            Ok(None) => Err(FatalLoadingError::SymbolMissing(name.to_string())),
            Err(source) => Err(FatalLoadingError::Unit {
                name: handle.name().to_string(),
                source,
            }),
        }
    }

    /// Compile and register a container. An unmodified container that was
    /// compiled before is registered again without recompiling.
    pub fn load_jar(&self, container: &Path) -> Result<(), FatalLoadingError> {
        tracing::debug!(container = %container.display(), "load_jar");
        self.pipeline.define_from_container(container).map(|_| ())
    }

    /// Register an already compiled artifact under its file name
    pub fn load_dex(&self, artifact: &Path) -> Result<LoaderHandle, FatalLoadingError> {
        tracing::debug!(artifact = %artifact.display(), "load_dex");
        if !artifact.is_file() {
            return Err(FatalLoadingError::SourceUnavailable(artifact.to_path_buf()));
        }
        let name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| artifact.display().to_string());
        self.registry.register(&name, artifact, None)
    }

    /// Forget every registered unit and reset the cache directory.
    ///
    /// Call [`Resolver::wait_if_on_dex`] first for any thread that may be
    /// running loaded code, or use [`Resolver::unload_all_after`].
    pub fn unload_all_dex(&self) -> io::Result<()> {
        self.registry.unload_all()
    }

    /// Bounded wait for `thread` to leave loaded code
    pub fn wait_if_on_dex(&self, thread: Option<ThreadId>) -> Quiescence {
        match thread {
            Some(thread) => self.guard.await_quiescent(thread),
            None => Quiescence::Idle,
        }
    }

    /// Wait for `thread`, then unload unless the wait timed out under
    /// [`UnloadPolicy::Strict`].
    pub fn unload_all_after(
        &self,
        thread: Option<ThreadId>,
        policy: UnloadPolicy,
    ) -> io::Result<Quiescence> {
        let outcome = self.wait_if_on_dex(thread);
        if !outcome.is_quiescent() && policy == UnloadPolicy::Strict {
            tracing::warn!(?outcome, "unload skipped, thread still busy");
            return Ok(outcome);
        }
        self.unload_all_dex()?;
        Ok(outcome)
    }

    /// Sticky: true once any compile produced an empty artifact
    pub fn is_failed(&self) -> bool {
        self.pipeline.is_failed()
    }

    /// Resolve a symbol through the full lookup chain
    pub fn load_class(&self, name: &str) -> Result<Arc<Symbol>, ResolveError> {
        if let Some(symbol) = self.defined.read().get(name) {
            return Ok(symbol.clone());
        }

        if let Some(parent) = &self.parent {
            match parent.find_symbol(name) {
                Ok(Some(symbol)) => return Ok(symbol),
                Ok(None) => {}
                Err(e) => tracing::warn!(symbol = name, error = %e, "parent lookup failed"),
            }
        }

        if let Some(symbol) = self.registry.resolve(name) {
            return Ok(symbol);
        }

        if let Some(symbol) = self.find_local(name) {
            return Ok(symbol);
        }

        Err(ResolveError::NotFound(name.to_string()))
    }

    fn find_local(&self, name: &str) -> Option<Arc<Symbol>> {
        // Held until the symbol is cached; `set_local_unit` clears under the write lock
        let local = self.local.read();
        match local.as_ref()?.find_symbol(name) {
            Ok(Some(symbol)) => {
                let mut defined = self.defined.write();
                Some(defined.entry(name.to_string()).or_insert(symbol).clone())
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(symbol = name, error = %e, "local lookup failed");
                None
            }
        }
    }

    /// Replace the unit this resolver defines symbols from directly.
    ///
    /// Clears symbols previously defined through the old unit.
    pub fn set_local_unit(&self, unit: Option<Arc<dyn UnitLoader>>) {
        let mut local = self.local.write();
        *local = unit;
        self.defined.write().clear();
    }

    /// Registered unit by name
    pub fn unit(&self, name: &str) -> Option<LoaderHandle> {
        self.registry.lookup(name)
    }

    /// Registered unit names, oldest first
    pub fn unit_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn registry(&self) -> &LoaderRegistry {
        &self.registry
    }

    pub fn reaper(&self) -> &TempArtifactReaper {
        &self.reaper
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    pub fn cache_dir(&self) -> &Path {
        self.layout.root()
    }

    pub fn libs_dir(&self) -> &Path {
        self.layout.libs()
    }
}

impl UnitLoader for Resolver {
    fn find_symbol(&self, name: &str) -> Result<Option<Arc<Symbol>>, UnitError> {
        match self.load_class(name) {
            Ok(symbol) => Ok(Some(symbol)),
            Err(ResolveError::NotFound(_)) => Ok(None),
        }
    }

    fn symbol_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .recent_first()
            .iter()
            .flat_map(|unit| unit.symbol_names())
            .collect();
        if let Some(local) = self.local.read().as_ref() {
            names.extend(local.symbol_names());
        }
        names.sort();
        names.dedup();
        names
    }

    fn find_library(&self, name: &str) -> Option<PathBuf> {
        let path = self.layout.libs().join(library_file_name(name));
        path.is_file().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SystemLoader;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Local unit whose lookups block until released
    struct GatedUnit {
        inner: SystemLoader,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl UnitLoader for GatedUnit {
        fn find_symbol(&self, name: &str) -> Result<Option<Arc<Symbol>>, UnitError> {
            self.entered.lock().send(()).unwrap();
            self.release.lock().recv().unwrap();
            self.inner.find_symbol(name)
        }
    }

    fn open(dir: &TempDir, parent: ParentLoader) -> Resolver {
        let config = LoaderConfig::with_cache_dir(dir.path().join("cache"));
        let backend = Backend::from_config(&config);
        Resolver::open(config, backend, parent).unwrap()
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = TempDir::new().unwrap();
        let resolver = open(&dir, ParentLoader::None);
        assert!(resolver.cache_dir().is_dir());
        assert!(resolver.libs_dir().is_dir());
        assert!(resolver.cache_dir().join("staging").is_dir());
    }

    #[test]
    fn test_open_purges_stale_cache() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("cache").join("stale");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"x").unwrap();

        let _resolver = open(&dir, ParentLoader::None);
        assert!(!stale.exists());
    }

    #[test]
    fn test_child_of_resolver_keeps_cache() {
        let dir = TempDir::new().unwrap();
        let parent = Arc::new(open(&dir, ParentLoader::None));
        let kept = parent.cache_dir().join("kept");
        std::fs::write(&kept, b"x").unwrap();

        let _child = open(&dir, ParentLoader::Resolver(parent.clone()));
        assert!(kept.exists());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = LoaderConfig::with_cache_dir(dir.path());
        config.quiescence.poll_interval_ms = 0;
        let backend = Backend::from_config(&config);
        assert!(matches!(
            Resolver::open(config, backend, ParentLoader::None),
            Err(OpenError::Config(_))
        ));
    }

    #[test]
    fn test_define_class_and_load() {
        let dir = TempDir::new().unwrap();
        let resolver = open(&dir, ParentLoader::None);

        let symbol = resolver.define_class("script.Gen1", b"gen1").unwrap();
        assert_eq!(symbol.name(), "script.Gen1");

        let loaded = resolver.load_class("script.Gen1").unwrap();
        assert!(Arc::ptr_eq(&symbol, &loaded));
    }

    #[test]
    fn test_parent_before_registry() {
        let dir = TempDir::new().unwrap();
        let system = Arc::new(SystemLoader::new());
        system.define("lang.String", b"system");
        let resolver = open(&dir, ParentLoader::Loader(system));

        resolver.define_class("lang.String", b"shadow").unwrap();
        let symbol = resolver.load_class("lang.String").unwrap();
        assert_eq!(symbol.bytecode(), Some(&b"system"[..]));
    }

    #[test]
    fn test_local_unit_is_last_resort() {
        let dir = TempDir::new().unwrap();
        let resolver = open(&dir, ParentLoader::None);
        let local = Arc::new(SystemLoader::new());
        local.define("only.Local", b"local");
        local.define("both.Places", b"local");
        resolver.set_local_unit(Some(local));

        resolver.define_class("both.Places", b"registry").unwrap();

        assert_eq!(
            resolver.load_class("both.Places").unwrap().bytecode(),
            Some(&b"registry"[..])
        );
        let first = resolver.load_class("only.Local").unwrap();
        let second = resolver.load_class("only.Local").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        resolver.set_local_unit(None);
        assert!(resolver.load_class("only.Local").is_err());
    }

    #[test]
    fn test_replacing_local_unit_during_lookup() {
        let dir = TempDir::new().unwrap();
        let resolver = open(&dir, ParentLoader::None);
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let inner = SystemLoader::new();
        inner.define("app.Gated", b"gated");
        resolver.set_local_unit(Some(Arc::new(GatedUnit {
            inner,
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        })));

        thread::scope(|s| {
            let lookup = s.spawn(|| resolver.load_class("app.Gated").is_ok());
            entered_rx.recv().unwrap();
            let replace = s.spawn(|| resolver.set_local_unit(None));
            thread::sleep(Duration::from_millis(20));
            release_tx.send(()).unwrap();

            assert!(lookup.join().unwrap());
            replace.join().unwrap();
        });

        // The replaced unit's symbol must not survive in the local cache
        assert!(resolver.load_class("app.Gated").is_err());
    }

    #[test]
    fn test_not_found() {
        let dir = TempDir::new().unwrap();
        let resolver = open(&dir, ParentLoader::None);
        let err = resolver.load_class("no.Such").unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(name) if name == "no.Such"));
        assert!(resolver.find_symbol("no.Such").unwrap().is_none());
    }

    #[test]
    fn test_wait_without_thread_is_idle() {
        let dir = TempDir::new().unwrap();
        let resolver = open(&dir, ParentLoader::None);
        assert_eq!(resolver.wait_if_on_dex(None), Quiescence::Idle);
    }

    #[test]
    fn test_load_dex_missing() {
        let dir = TempDir::new().unwrap();
        let resolver = open(&dir, ParentLoader::None);
        let err = resolver.load_dex(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, FatalLoadingError::SourceUnavailable(_)));
    }

    #[test]
    fn test_find_library_in_libs_dir() {
        let dir = TempDir::new().unwrap();
        let resolver = open(&dir, ParentLoader::None);
        std::fs::write(resolver.libs_dir().join(library_file_name("jni")), b"").unwrap();
        assert!(resolver.find_library("jni").is_some());
        assert!(resolver.find_library("other").is_none());
    }
}
