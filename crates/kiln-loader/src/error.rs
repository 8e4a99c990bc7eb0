//! Error types for staging, packaging, compilation, and resolution.

use std::path::PathBuf;

use thiserror::Error;

/// Failure while writing or reading an intermediate archive
#[derive(Debug, Error)]
pub enum PackagingError {
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unreadable container
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Failure reported by a native compiler backend
#[derive(Debug, Error)]
pub enum CompilerError {
    /// The compiler process could not be started
    #[error("Failed to spawn compiler {program}: {source}")]
    Spawn {
        /// Program that was attempted
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure while the compiler was running
    #[error("Compiler I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Compiler output could not be decoded
    #[error("Compiler produced undecodable output on {stream}")]
    Undecodable {
        /// "stdout" or "stderr"
        stream: &'static str,
    },
}

/// Errors raised by a platform loader while binding or reading a unit
#[derive(Debug, Error)]
pub enum UnitError {
    /// Artifact file does not exist
    #[error("Artifact not found: {0}")]
    NotFound(PathBuf),

    /// Artifact exists but cannot be interpreted
    #[error("Malformed artifact {path}: {reason}")]
    Malformed {
        /// Offending artifact
        path: PathBuf,
        /// Human readable cause
        reason: String,
    },

    /// Platform-specific loader error (dlopen, LoadLibrary)
    #[error("Platform error: {0}")]
    Platform(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The single fatal error surfaced at the pipeline boundary.
///
/// None of these are retried internally.
#[derive(Debug, Error)]
pub enum FatalLoadingError {
    /// A staging path could not be created or cleared
    #[error("Failed to stage {path}: {source}")]
    Staging {
        /// Staged path
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Packaging the input into an intermediate archive failed
    #[error("Failed to package {path}: {source}")]
    Packaging {
        /// Source container or archive
        path: PathBuf,
        #[source]
        source: PackagingError,
    },

    /// The external compiler could not be invoked or failed while running
    #[error("Compiler invocation failed: {0}")]
    CompilerInvocation(#[from] CompilerError),

    /// The compiler ran but produced a zero-length artifact
    #[error("Compiler produced an empty artifact for {input}")]
    EmptyOutput {
        /// Intermediate archive that was compiled
        input: PathBuf,
    },

    /// Source container does not exist or is not readable
    #[error("File does not exist or is not readable: {0}")]
    SourceUnavailable(PathBuf),

    /// The compiled artifact could not be bound by the platform loader
    #[error("Failed to load unit {name}: {source}")]
    Unit {
        /// Registry name of the unit
        name: String,
        #[source]
        source: UnitError,
    },

    /// A freshly defined unit does not contain the symbol it was built for
    #[error("Symbol {0} not found in freshly defined unit")]
    SymbolMissing(String),
}

/// Terminal resolution failure
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Parent, registry and local definition were all exhausted
    #[error("Symbol not found: {0}")]
    NotFound(String),
}

/// Errors that can occur while reading loader configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors that can occur while opening a resolver
#[derive(Debug, Error)]
pub enum OpenError {
    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Cache directory could not be prepared
    #[error("Failed to prepare cache directory {path}: {source}")]
    CacheDir {
        /// Cache root
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
