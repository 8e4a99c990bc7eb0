//! Kiln command-line tool
//!
//! Loads containers and raw bytecode through a resolver, resolves symbols
//! against the result, and manages the on-disk cache.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::GlobalArgs;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Dynamic bytecode loader and compilation cache", long_about = None)]
#[command(version)]
struct Cli {
    /// Loader config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory, overrides the config file
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Bind compiled artifacts as native libraries instead of archives
    #[arg(long, global = true)]
    dylib: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and load containers, then resolve symbols
    Load {
        /// Containers to load, in order
        #[arg(required = true)]
        containers: Vec<PathBuf>,
        /// Symbols to resolve after loading
        #[arg(short, long = "resolve")]
        resolve: Vec<String>,
    },

    /// Define a single symbol from a raw bytecode file
    Define {
        /// Symbol name, e.g. gen.Script1
        name: String,
        /// File holding the bytecode
        bytecode: PathBuf,
    },

    /// Unload everything and reset the cache directory
    Purge,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let globals = GlobalArgs {
        config: cli.config,
        cache_dir: cli.cache_dir,
        dylib: cli.dylib,
    };

    match cli.command {
        Commands::Load {
            containers,
            resolve,
        } => commands::load::execute(&globals, &containers, &resolve),
        Commands::Define { name, bytecode } => commands::define::execute(&globals, &name, &bytecode),
        Commands::Purge => commands::purge::execute(&globals),
    }
}
