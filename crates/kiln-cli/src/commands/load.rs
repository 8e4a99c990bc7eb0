//! `kiln load`: Compile and load containers, then resolve symbols.

use anyhow::Context;
use std::path::PathBuf;

use super::{check_failure_flag, GlobalArgs};

pub fn execute(globals: &GlobalArgs, containers: &[PathBuf], resolve: &[String]) -> anyhow::Result<()> {
    let resolver = globals.open_resolver()?;

    for container in containers {
        resolver
            .load_jar(container)
            .with_context(|| format!("Failed to load {}", container.display()))?;
        println!("Loaded {}", container.display());
    }

    let mut missing = Vec::new();
    for name in resolve {
        match resolver.load_class(name) {
            Ok(symbol) => println!("{} -> {}", symbol.name(), symbol.unit()),
            Err(e) => {
                eprintln!("{}", e);
                missing.push(name.as_str());
            }
        }
    }

    check_failure_flag(&resolver)?;
    if !missing.is_empty() {
        anyhow::bail!("Unresolved symbols: {}", missing.join(", "));
    }
    Ok(())
}
