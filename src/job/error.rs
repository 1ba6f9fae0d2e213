use std::path::PathBuf;
use thiserror::Error;

use super::cache::CacheError;
use super::execution::CommandFailure;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("invalid job name '{0}': must be non-empty and contain no path separators")]
    InvalidName(String),

    #[error("job '{0}' already exists in this output folder; use a shared job to reuse its cache")]
    DuplicateName(String),

    #[error("failed to prepare build state directory {}", .path.display())]
    StateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load cache for job '{job}'")]
    CacheLoad {
        job: String,
        #[source]
        source: CacheError,
    },

    #[error("failed to save cache for job '{job}'")]
    CacheSave {
        job: String,
        #[source]
        source: CacheError,
    },

    #[error("job '{job}' failed: {failure}")]
    CommandFailed {
        job: String,
        #[source]
        failure: CommandFailure,
    },

    #[error("job '{job}' failed: {failure} (cache could not be saved: {source})")]
    CommandFailedUnsaved {
        job: String,
        failure: CommandFailure,
        #[source]
        source: CacheError,
    },
}

impl JobError {
    /// The command failure behind this error, if a command caused it
    pub fn command_failure(&self) -> Option<&CommandFailure> {
        match self {
            JobError::CommandFailed { failure, .. }
            | JobError::CommandFailedUnsaved { failure, .. } => Some(failure),
            _ => None,
        }
    }
}
