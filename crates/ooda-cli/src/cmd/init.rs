use anyhow::Context;
use ooda_core::{config::Config, io, paths, store::Store};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing ooda in: {}", root.display());

    let dir = paths::ooda_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::default()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    let existed = paths::db_path(root).exists();
    Store::open_project(root).context("failed to create store")?;
    if existed {
        println!("  exists:  {}", paths::DB_FILE);
    } else {
        println!("  created: {}", paths::DB_FILE);
    }

    Ok(())
}
