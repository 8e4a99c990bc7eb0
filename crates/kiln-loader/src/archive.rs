//! Packaging bytecode into intermediate zip archives
//!
//! Entry paths follow the container convention: symbol `a.b.C` lives at
//! `a/b/C.class`. Archives are written in streaming mode (sizes go into
//! data descriptors, the writer never seeks), one entry at a time.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::PackagingError;

/// Extension of a bytecode entry inside a container
pub const ENTRY_EXTENSION: &str = "class";

/// Archive entry path for a symbol name
pub fn entry_path_for(name: &str) -> String {
    format!("{}.{}", name.replace('.', "/"), ENTRY_EXTENSION)
}

/// Symbol name defined by an archive entry, if it is a bytecode entry
pub fn symbol_name_for(entry: &str) -> Option<String> {
    let stem = entry.strip_suffix(ENTRY_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || stem.ends_with('/') {
        return None;
    }
    Some(stem.replace('/', "."))
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Write a single-entry archive holding `bytes` under `entry`
pub fn package_bytes(archive: &Path, entry: &str, bytes: &[u8]) -> Result<(), PackagingError> {
    let mut zip = ZipWriter::new_stream(File::create(archive)?);
    zip.start_file(entry, entry_options())?;
    zip.write_all(bytes)?;
    zip.finish()?;
    Ok(())
}

/// Copy every non-directory entry of `container` into a new archive.
///
/// Entry paths are preserved. Returns the number of entries copied.
pub fn package_container(archive: &Path, container: &Path) -> Result<usize, PackagingError> {
    let mut source = ZipArchive::new(File::open(container)?)?;
    let mut zip = ZipWriter::new_stream(File::create(archive)?);
    let mut copied = 0;

    for i in 0..source.len() {
        let mut entry = source.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_owned();
        zip.start_file(name, entry_options())?;
        io::copy(&mut entry, &mut zip)?;
        copied += 1;
    }

    zip.finish()?;
    Ok(copied)
}

/// Names of all non-directory entries in an archive
pub fn list_entries(archive: &Path) -> Result<Vec<String>, PackagingError> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    let mut names = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip.by_index_raw(i)?;
        if !entry.is_dir() {
            names.push(entry.name().to_owned());
        }
    }
    Ok(names)
}
