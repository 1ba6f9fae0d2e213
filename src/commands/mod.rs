pub mod cache;
pub mod run;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::cli::CommonConfigArgs;
use kiln::config_discovery::{load_config_with_discovery, LoadedConfig};
use kiln::logging;

/// Configuration and paths shared by every command handler
pub(crate) struct Session {
    pub loaded: LoadedConfig,
    pub output_dir: PathBuf,
}

impl Session {
    /// Load configuration, resolve the output directory and start logging
    pub fn start(args: &CommonConfigArgs) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let loaded = load_config_with_discovery(args.config.as_deref(), &cwd)?;

        logging::init(&loaded.config.observability.log_level);

        let output_dir = match &args.output_dir {
            Some(dir) => absolutize(&cwd, dir),
            None => absolutize(&cwd, &loaded.config.output_dir(&loaded.base_dir)),
        };

        tracing::debug!(output_dir = %output_dir.display(), "session started");

        Ok(Self { loaded, output_dir })
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
