//! Write a default parent configuration.

use anyhow::{Context, Result};
use cue_host::Config;
use std::path::{Path, PathBuf};

use crate::config::host_config_path;

/// Run the init command. Returns the path that was written.
pub async fn run(data_dir: &Path, force: bool) -> Result<PathBuf> {
    let path = host_config_path(data_dir);
    if path.exists() && !force {
        anyhow::bail!(
            "Configuration already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    tokio::fs::create_dir_all(data_dir)
        .await
        .context("Failed to create data directory")?;
    let contents = Config::default().to_toml()?;
    tokio::fs::write(&path, contents)
        .await
        .context("Failed to write configuration")?;

    println!("Configuration written to {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Start the parent:        cuesync host");
    println!("  2. Show the pairing target: cuesync pair");
    println!("  3. On each child:           cuesync follow <address:port>");

    Ok(path)
}
