use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Kiln - incremental build job runner
///
/// Runs the jobs declared in `kiln.toml`, persisting per-job state under
/// `<output_dir>/.buildstate/` so interrupted or failed builds can resume.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Incremental build job runner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Configuration arguments shared across commands
#[derive(Parser, Debug, Clone)]
pub struct CommonConfigArgs {
    /// Config file path (default: discover kiln.toml upwards from the current directory)
    #[arg(short = 'c', long, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output directory (overrides build.output_dir)
    #[arg(long, env = "KILN_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run build jobs
    Run(RunArgs),

    /// Inspect or delete persisted job state
    Cache(CacheArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonConfigArgs,

    /// Plan file to read jobs from (default: the configuration file)
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Only run these jobs (repeatable)
    #[arg(long = "job")]
    pub jobs: Vec<String>,

    /// Worker count for parallel groups and jobs (0 = CPU count)
    #[arg(short = 'j', long, env = "KILN_MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Fail instead of starting cold when a cache file is unreadable
    #[arg(long)]
    pub strict_cache: bool,
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(flatten)]
    pub common: CommonConfigArgs,

    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Print a job's persisted variables as JSON
    Show {
        /// Job name
        job: String,
    },

    /// List jobs with persisted state
    List,

    /// Delete persisted state
    Clean {
        /// Job name
        job: Option<String>,

        /// Delete state for every job
        #[arg(long, conflicts_with = "job")]
        all: bool,
    },
}
