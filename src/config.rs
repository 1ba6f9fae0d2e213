use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::job::CorruptCachePolicy;

/// Complete Kiln configuration (loaded from `kiln.toml`)
///
/// Job definitions live in the same file under `[[job]]`; they are parsed
/// separately by [`crate::plan`] so that shape errors can be reported per job.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KilnConfig {
    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Build output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Output folder; job work folders and `.buildstate/` live here
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Workers for parallel groups and for running jobs side by side (0 = CPU count)
    #[serde(default)]
    pub max_workers: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_workers: 0,
        }
    }
}

/// Job cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// What to do with a cache file that cannot be decoded: cold, fail
    #[serde(default)]
    pub on_corrupt: CorruptCachePolicy,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_output_dir() -> String {
    "build".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl KilnConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: KilnConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Output folder, resolved against `base` when relative
    pub fn output_dir(&self, base: &Path) -> PathBuf {
        let dir = Path::new(&self.build.output_dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            base.join(dir)
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.build.output_dir.trim().is_empty() {
            anyhow::bail!("build.output_dir must be set");
        }

        if !["trace", "debug", "info", "warn", "error"]
            .contains(&self.observability.log_level.as_str())
        {
            anyhow::bail!("observability.log_level must be one of: trace, debug, info, warn, error");
        }

        Ok(())
    }
}
