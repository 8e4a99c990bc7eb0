//! Cache directory layout and staging of temporary artifacts
//!
//! Directory structure:
//! ```text
//! <cache_dir>/
//! ├── <sha256>[.ext]      durable compiled artifacts (one per container + mtime)
//! ├── staging/
//! │   ├── <digest>_<uuid>.zip      intermediate archives
//! │   └── <digest>_<uuid>[.ext]    temporary compiled artifacts
//! └── libs/                native library directory handed to every unit
//! ```

use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use uuid::Uuid;

use crate::config::LoaderConfig;
use crate::error::FatalLoadingError;

/// Paths making up one resolver's cache directory
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
    staging: PathBuf,
    libs: PathBuf,
}

impl CacheLayout {
    /// Derive the layout from a config without touching the filesystem
    pub fn new(config: &LoaderConfig) -> Self {
        let root = config.cache_dir.clone();
        Self {
            staging: root.join(&config.staging_dir),
            libs: root.join(&config.libs_dir),
            root,
        }
    }

    /// Cache root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Staging subdirectory
    pub fn staging(&self) -> &Path {
        &self.staging
    }

    /// Native library subdirectory
    pub fn libs(&self) -> &Path {
        &self.libs
    }

    /// Create the root and both subdirectories if absent
    pub fn create(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(&self.staging)?;
        fs::create_dir_all(&self.libs)?;
        Ok(())
    }

    /// Delete everything under the root, then recreate the subdirectories.
    ///
    /// Entries that fail to delete are skipped; the subdirectories are
    /// recreated regardless and the first error is returned.
    pub fn purge(&self) -> io::Result<()> {
        self.purge_with(remove_entry)
    }

    fn purge_with(&self, mut remove: impl FnMut(&Path) -> io::Result<()>) -> io::Result<()> {
        let mut first_error = None;
        match fs::read_dir(&self.root) {
            Ok(entries) => {
                for entry in entries {
                    let result = entry.and_then(|entry| {
                        let path = entry.path();
                        remove(&path).map_err(|e| {
                            tracing::warn!(path = %path.display(), error = %e, "failed to purge cache entry");
                            e
                        })
                    });
                    if let Err(e) = result {
                        first_error.get_or_insert(e);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => first_error = Some(e),
        }

        let created = self.create();
        match first_error {
            Some(e) => Err(e),
            None => created,
        }
    }
}

fn remove_entry(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        remove_if_exists(path).map(|_| ())
    }
}

/// Creates and clears uniquely named temporary files under `staging/`
#[derive(Debug, Clone)]
pub struct ArtifactStaging {
    layout: CacheLayout,
    archive_extension: String,
    artifact_extension: Option<String>,
}

impl ArtifactStaging {
    pub fn new(layout: CacheLayout, config: &LoaderConfig) -> Self {
        Self {
            layout,
            archive_extension: config.archive_extension.clone(),
            artifact_extension: config.artifact_extension.clone(),
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Stage a fresh intermediate archive path.
    ///
    /// Whatever exists at the path is removed first; the file itself is
    /// not created (the archive writer creates it).
    pub fn stage_archive(&self, key: &str) -> Result<PathBuf, FatalLoadingError> {
        self.stage(key, Some(self.archive_extension.as_str()), false)
    }

    /// Stage an empty, freshly created file for a temporary compiled artifact
    pub fn stage_output(&self, key: &str) -> Result<PathBuf, FatalLoadingError> {
        self.stage(key, self.artifact_extension.as_deref(), true)
    }

    /// Derive `<digest(key)>_<uuid>[.ext]` inside the staging directory.
    ///
    /// With `create` the file is created atomically (`create_new`);
    /// otherwise any existing file at the path is deleted.
    pub fn stage(
        &self,
        key: &str,
        extension: Option<&str>,
        create: bool,
    ) -> Result<PathBuf, FatalLoadingError> {
        let mut name = format!("{}_{}", short_digest(key), Uuid::new_v4());
        if let Some(ext) = extension {
            name.push('.');
            name.push_str(ext);
        }
        let path = self.layout.staging.join(name);

        let result = if create {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
                Err(e) => Err(e),
            }
        } else {
            remove_if_exists(&path).map(|_| ())
        };

        result.map_err(|source| FatalLoadingError::Staging {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Durable artifact path for a container: SHA-256 of path and mtime.
    ///
    /// A modified container maps to a new name, so stale artifacts are
    /// never reused.
    pub fn durable_path(&self, container: &Path) -> io::Result<PathBuf> {
        let modified = fs::metadata(container)?.modified()?;
        let millis = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);

        let message = format!("{}_{}", container.display(), millis);
        let mut name = hex::encode(Sha256::digest(message.as_bytes()));
        if let Some(ext) = &self.artifact_extension {
            name.push('.');
            name.push_str(ext);
        }
        Ok(self.layout.root.join(name))
    }
}

/// Remove a file, treating "already gone" as success.
///
/// Returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn short_digest(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..8])
}
