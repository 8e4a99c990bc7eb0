//! Shared helpers for kiln-loader integration tests

#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kiln_loader::{
    ArchiveLoader, Backend, CompileOutcome, CompileRequest, CompilerError, LoaderConfig,
    NativeCompiler, ParentLoader, Resolver,
};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Copies input to output while counting invocations and overlap
#[derive(Default)]
pub struct CountingCompiler {
    invocations: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
    empty: AtomicBool,
}

impl CountingCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous compiles seen
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Leave the output empty on subsequent compiles
    pub fn set_empty(&self, empty: bool) {
        self.empty.store(empty, Ordering::SeqCst);
    }
}

impl NativeCompiler for CountingCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutcome, CompilerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let result = if self.empty.load(Ordering::SeqCst) {
            File::create(request.output).map(|_| ())
        } else {
            fs::copy(request.input, request.output).map(|_| ())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result?;
        Ok(CompileOutcome {
            exit_code: Some(0),
            log: String::new(),
        })
    }
}

/// Resolver over `dir/cache` using `compiler` and zip archive units
pub fn open_resolver(dir: &TempDir, compiler: Arc<dyn NativeCompiler>) -> Resolver {
    open_with_parent(dir, compiler, ParentLoader::None)
}

pub fn open_with_parent(
    dir: &TempDir,
    compiler: Arc<dyn NativeCompiler>,
    parent: ParentLoader,
) -> Resolver {
    let mut config = test_config(dir);
    config.dump_failed_input = false;
    Resolver::open(config, Backend::new(compiler, Arc::new(ArchiveLoader)), parent).unwrap()
}

/// Config with a short quiescence budget
pub fn test_config(dir: &TempDir) -> LoaderConfig {
    let mut config = LoaderConfig::with_cache_dir(dir.path().join("cache"));
    config.quiescence.poll_interval_ms = 10;
    config.quiescence.max_attempts = 5;
    config
}

/// Write a container holding `entries` (entry path, contents)
pub fn write_container(path: &Path, entries: &[(&str, &[u8])]) -> PathBuf {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
    path.to_path_buf()
}

/// Names of the files and directories directly under `dir`, sorted
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
