//! Subcommand implementations

pub mod define;
pub mod load;
pub mod purge;

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;

use kiln_loader::{Backend, DylibLoader, LoaderConfig, ParentLoader, Resolver};

/// Options shared by every subcommand
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub dylib: bool,
}

impl GlobalArgs {
    pub fn loader_config(&self) -> anyhow::Result<LoaderConfig> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => LoaderConfig::default(),
        };
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        Ok(config)
    }

    /// Open a resolver with no parent. Purges any existing cache.
    pub fn open_resolver(&self) -> anyhow::Result<Resolver> {
        let config = self.loader_config()?;
        let mut backend = Backend::from_config(&config);
        if self.dylib {
            backend.platform = Arc::new(DylibLoader);
        }
        let cache_dir = config.cache_dir.clone();
        Resolver::open(config, backend, ParentLoader::None)
            .with_context(|| format!("Failed to open cache {}", cache_dir.display()))
    }
}

/// Fail the run if any compile produced an empty artifact
pub fn check_failure_flag(resolver: &Resolver) -> anyhow::Result<()> {
    if resolver.is_failed() {
        anyhow::bail!("Compiler produced an empty artifact during this run");
    }
    Ok(())
}
