//! Kiln dynamic loader
//!
//! This crate loads runtime-generated bytecode through a native compiler
//! and keeps the results in an on-disk cache, including:
//! - Staging of intermediate archives and compiled artifacts
//! - Packaging of bytecode into zip archives
//! - Invocation of an external native compiler
//! - A recency-ordered registry of loaded units
//! - Compile serialization and bounded waits for busy threads
//! - Deletion of temporary artifacts once their unit is unreachable

pub mod archive;
pub mod compiler;
pub mod config;
pub mod error;
pub mod guard;
pub mod pipeline;
pub mod platform;
pub mod reaper;
pub mod registry;
pub mod resolver;
pub mod staging;
pub mod unit;

pub use compiler::{
    CompileOutcome, CompileRequest, ExternalCompiler, NativeCompiler, PassthroughCompiler,
};
pub use config::{CompilerConfig, LoaderConfig, QuiescenceConfig};
pub use error::{
    CompilerError, ConfigError, FatalLoadingError, OpenError, PackagingError, ResolveError,
    UnitError,
};
pub use guard::{ConcurrencyGuard, Quiescence};
pub use platform::{
    ArchiveLoader, DylibLoader, PlatformLoader, Symbol, SymbolBody, SystemLoader, UnitLoader,
    UnitSpec,
};
pub use reaper::{TempArtifact, TempArtifactReaper};
pub use registry::LoaderRegistry;
pub use resolver::{Backend, ParentLoader, Resolver, UnloadPolicy};
pub use staging::{ArtifactStaging, CacheLayout};
pub use unit::{LoadedUnit, LoaderHandle};
