//! Where the CLI keeps its files.

use anyhow::{Context, Result};
use cue_host::Config;
use std::path::{Path, PathBuf};

/// File name of the parent configuration inside the data directory.
pub const HOST_CONFIG_FILE: &str = "host.toml";

/// Platform data directory for cuesync.
pub fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "cuesync", "cuesync")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Path of the parent configuration inside `data_dir`.
pub fn host_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(HOST_CONFIG_FILE)
}

/// Load the parent configuration.
///
/// An explicit path must exist. Otherwise `host.toml` in the data directory
/// is used when present, and built-in defaults when not.
pub fn load_host_config(data_dir: &Path, explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = host_config_path(data_dir);
            if !path.exists() {
                tracing::debug!("No {} found, using defaults", path.display());
                return Ok(Config::default());
            }
            path
        }
    };

    Config::from_file(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_default_file_means_defaults() {
        let dir = tempdir().unwrap();
        let config = load_host_config(dir.path(), None).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn data_dir_file_is_used_when_present() {
        let dir = tempdir().unwrap();
        std::fs::write(host_config_path(dir.path()), "[timer]\ntick_hz = 25\n").unwrap();

        let config = load_host_config(dir.path(), None).unwrap();
        assert_eq!(config.timer.tick_hz, 25);
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("elsewhere.toml");
        assert!(load_host_config(dir.path(), Some(&missing)).is_err());
    }
}
