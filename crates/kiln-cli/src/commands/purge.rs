//! `kiln purge`: Unload everything and reset the cache directory.

use super::GlobalArgs;

pub fn execute(globals: &GlobalArgs) -> anyhow::Result<()> {
    let resolver = globals.open_resolver()?;
    resolver.unload_all_dex()?;
    println!("Reset {}", resolver.cache_dir().display());
    Ok(())
}
