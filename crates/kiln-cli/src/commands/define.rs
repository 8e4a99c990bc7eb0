//! `kiln define`: Define one symbol from a raw bytecode file.

use anyhow::Context;
use std::path::Path;

use super::{check_failure_flag, GlobalArgs};

pub fn execute(globals: &GlobalArgs, name: &str, bytecode: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(bytecode)
        .with_context(|| format!("Failed to read {}", bytecode.display()))?;

    let resolver = globals.open_resolver()?;
    let symbol = resolver
        .define_class(name, &bytes)
        .with_context(|| format!("Failed to define {}", name))?;

    println!("Defined {} ({} bytes) in {}", symbol.name(), bytes.len(), symbol.unit());
    check_failure_flag(&resolver)
}
