// Library interface for Kiln
// This allows integration tests and embedding programs to define jobs in Rust

pub mod cli_utils;
pub mod config;
pub mod config_discovery;
pub mod job;
pub mod logging;
pub mod plan;

// Re-export commonly used types
pub use config::KilnConfig;
pub use config_discovery::{discover_config, load_config_with_discovery};
pub use job::{
    BuildContext, Command, CommandFailure, CorruptCachePolicy, Job, JobError, PersistentCache,
    Runner, TaskGroup,
};
pub use plan::{CommandSpec, Plan, ShellCommand};
