use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::KilnConfig;

/// Project configuration file name
pub const CONFIG_FILE: &str = "kiln.toml";

/// Discovers Kiln configuration by traversing up the directory tree
pub fn discover_config(start_dir: &Path) -> Result<Option<PathBuf>> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.exists() {
            return Ok(Some(config_path));
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    // Fallback to global config
    if let Some(home) = dirs::home_dir() {
        let global_config = home.join(".config/kiln/config.toml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// A configuration together with where it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: KilnConfig,
    /// File the configuration was read from, if any
    pub path: Option<PathBuf>,
    /// Directory relative paths in the configuration resolve against
    pub base_dir: PathBuf,
}

/// Loads configuration with auto-discovery support
///
/// If `explicit_path` is provided, loads config from that path.
/// Otherwise, auto-discovers config by traversing up from `start_dir`.
/// Falls back to defaults rooted at `start_dir` when nothing is found.
pub fn load_config_with_discovery(
    explicit_path: Option<&Path>,
    start_dir: &Path,
) -> Result<LoadedConfig> {
    let path = match explicit_path {
        Some(path) => Some(path.to_path_buf()),
        None => discover_config(start_dir)
            .context("Failed to discover configuration")?,
    };

    match path {
        Some(path) => {
            let config = KilnConfig::from_file(&path)?;
            let base_dir = path
                .parent()
                .filter(|p| *p != Path::new(""))
                .map(Path::to_path_buf)
                .unwrap_or_else(|| start_dir.to_path_buf());

            tracing::debug!(config = %path.display(), "using configuration");

            Ok(LoadedConfig {
                config,
                path: Some(path),
                base_dir,
            })
        }
        None => {
            tracing::debug!("no configuration file found, using defaults");
            Ok(LoadedConfig {
                config: KilnConfig::default(),
                path: None,
                base_dir: start_dir.to_path_buf(),
            })
        }
    }
}
