//! Compilation pipeline: stage → package → compile → register
//!
//! Compiles into a durable, named artifact hold the resolver's compile
//! lock, because they may race with an earlier load of the same name.
//! Ad hoc compiles from raw bytes write to unique staging names and run
//! without it. Every compile marks the calling thread busy for its
//! duration.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use data_encoding::BASE64;
use uuid::Uuid;

use crate::archive::{entry_path_for, package_bytes, package_container};
use crate::compiler::{CompileRequest, NativeCompiler};
use crate::error::FatalLoadingError;
use crate::guard::{CompileLock, ConcurrencyGuard};
use crate::reaper::{TempArtifact, TempArtifactReaper};
use crate::registry::LoaderRegistry;
use crate::staging::{remove_if_exists, ArtifactStaging};
use crate::unit::LoaderHandle;

/// Base64 characters per diagnostic log line
const DUMP_CHUNK: usize = 4096;

/// Turns bytecode into registered units
pub struct CompilationPipeline {
    staging: ArtifactStaging,
    guard: Arc<ConcurrencyGuard>,
    registry: Arc<LoaderRegistry>,
    reaper: Arc<TempArtifactReaper>,
    compiler: Arc<dyn NativeCompiler>,
    /// Sticky: set by the first empty compiler output, never cleared
    failed: AtomicBool,
    dump_failed_input: bool,
}

impl CompilationPipeline {
    pub fn new(
        staging: ArtifactStaging,
        guard: Arc<ConcurrencyGuard>,
        registry: Arc<LoaderRegistry>,
        reaper: Arc<TempArtifactReaper>,
        compiler: Arc<dyn NativeCompiler>,
        dump_failed_input: bool,
    ) -> Self {
        Self {
            staging,
            guard,
            registry,
            reaper,
            compiler,
            failed: AtomicBool::new(false),
            dump_failed_input,
        }
    }

    /// Whether any compile has produced an empty artifact
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Package a single symbol's bytecode and compile it to a temporary unit
    pub fn define_from_bytes(
        &self,
        name: &str,
        bytes: &[u8],
    ) -> Result<LoaderHandle, FatalLoadingError> {
        tracing::debug!(name, len = bytes.len(), "defining symbol from bytes");
        let archive = self.staging.stage_archive(name)?;

        let result = package_bytes(&archive, &entry_path_for(name), bytes)
            .map_err(|source| FatalLoadingError::Packaging {
                path: archive.clone(),
                source,
            })
            .and_then(|()| self.compile_temporary(&archive));

        discard_archive(&archive);
        result
    }

    /// Compile a container to its durable artifact, reusing it if present.
    ///
    /// The existence check runs under the compile lock, so concurrent
    /// loads of one unmodified container compile it once.
    pub fn define_from_container(
        &self,
        container: &Path,
    ) -> Result<LoaderHandle, FatalLoadingError> {
        let readable = fs::File::open(container)
            .and_then(|f| f.metadata())
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !readable {
            return Err(FatalLoadingError::SourceUnavailable(container.to_path_buf()));
        }

        let output = self
            .staging
            .durable_path(container)
            .map_err(|_| FatalLoadingError::SourceUnavailable(container.to_path_buf()))?;
        let name = file_name(&output);

        let id = Uuid::new_v4();
        tracing::debug!(%id, container = %container.display(), "waiting for compile lock");
        let lock = self.guard.lock_compilation();
        tracing::debug!(%id, "compile lock acquired");

        let cached = fs::metadata(&output).map(|m| m.len() > 0).unwrap_or(false);
        let result = if cached {
            tracing::debug!(%id, unit = %name, "reusing compiled artifact");
            self.registry.register(&name, &output, None)
        } else {
            self.compile_container(container, &output, &name, &lock)
        };

        drop(lock);
        tracing::debug!(%id, "compile lock released");
        result
    }

    fn compile_container(
        &self,
        container: &Path,
        output: &Path,
        name: &str,
        _lock: &CompileLock<'_>,
    ) -> Result<LoaderHandle, FatalLoadingError> {
        let archive = self.staging.stage_archive(&container.display().to_string())?;

        let result = package_container(&archive, container)
            .map_err(|source| FatalLoadingError::Packaging {
                path: container.to_path_buf(),
                source,
            })
            .and_then(|entries| {
                tracing::debug!(entries, archive = %archive.display(), "container packaged");
                let compiled = self.compile(&archive, output, name, None);
                if compiled.is_err() {
                    // Never leave a partial artifact where the next load would reuse it
                    discard_archive(output);
                }
                compiled
            });

        discard_archive(&archive);
        result
    }

    fn compile_temporary(&self, archive: &Path) -> Result<LoaderHandle, FatalLoadingError> {
        let output = self
            .staging
            .stage_output(&format!("unit-{}", archive.display()))?;
        let name = file_name(&output);
        // From here on the file is deleted when the last reference drops
        let temp = self.reaper.track(output.clone());
        self.compile(archive, &output, &name, Some(temp))
    }

    fn compile(
        &self,
        archive: &Path,
        output: &Path,
        name: &str,
        temp: Option<Arc<TempArtifact>>,
    ) -> Result<LoaderHandle, FatalLoadingError> {
        let id = Uuid::new_v4();
        let _busy = self.guard.mark_busy();

        tracing::debug!(%id, input = %archive.display(), output = %output.display(), "invoking compiler");
        let outcome = self.compiler.compile(&CompileRequest {
            input: archive,
            output,
            packaged: true,
        })?;

        let size = fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        tracing::debug!(%id, exit_code = ?outcome.exit_code, size, "compiler finished");
        if !outcome.log.is_empty() {
            tracing::trace!(%id, log = %outcome.log, "compiler output");
        }

        if size == 0 {
            self.failed.store(true, Ordering::Release);
            let input_size = fs::metadata(archive).map(|m| m.len()).unwrap_or(0);
            tracing::error!(
                %id,
                input = %archive.display(),
                input_size,
                "compiler produced an empty artifact"
            );
            if self.dump_failed_input {
                dump_input(archive);
            }
            match temp {
                Some(temp) => {
                    temp.release();
                }
                None => discard_archive(output),
            }
            return Err(FatalLoadingError::EmptyOutput {
                input: archive.to_path_buf(),
            });
        }

        let handle = self.registry.register(name, output, temp)?;
        tracing::debug!(%id, unit = name, "unit registered");
        Ok(handle)
    }
}

/// Log the input archive as base64. Never fails the caller.
fn dump_input(archive: &Path) {
    match fs::read(archive) {
        Ok(bytes) => {
            let encoded = BASE64.encode(&bytes);
            let chunks = encoded.len().div_ceil(DUMP_CHUNK);
            for (index, chunk) in encoded.as_bytes().chunks(DUMP_CHUNK).enumerate() {
                tracing::error!(
                    input = %archive.display(),
                    part = index + 1,
                    of = chunks,
                    base64 = %String::from_utf8_lossy(chunk),
                    "failed compiler input"
                );
            }
        }
        Err(e) => {
            tracing::error!(input = %archive.display(), error = %e, "failed to dump compiler input");
        }
    }
}

fn discard_archive(path: &Path) {
    if let Err(e) = remove_if_exists(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to delete staged file");
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
