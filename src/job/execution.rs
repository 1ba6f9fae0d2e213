/// Single command attempt
///
/// Runs a command, makes sure its output is surfaced exactly once, and wraps
/// any error together with the command name and the stage it failed in.
use std::fmt;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use super::command::Command;
use super::context::BuildContext;
use super::Job;
use crate::logging::{operations, status};

/// Where a command attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// `run` returned an error
    Run,
    /// `run` succeeded but emitting its output failed
    Emit,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Run => f.write_str("run"),
            FailureStage::Emit => f.write_str("emit"),
        }
    }
}

/// A failed command attempt. The original error stays reachable through
/// [`downcast_ref`](Self::downcast_ref) and `Error::source`.
#[derive(Error, Debug)]
#[error("command '{command}' failed during {stage}: {source:#}")]
pub struct CommandFailure {
    pub command: String,
    pub stage: FailureStage,
    #[source]
    source: anyhow::Error,
}

impl CommandFailure {
    pub fn new(command: impl Into<String>, stage: FailureStage, source: anyhow::Error) -> Self {
        Self {
            command: command.into(),
            stage,
            source,
        }
    }

    /// Downcast the original error to a concrete type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.source.downcast_ref::<E>()
    }

    /// Full diagnostic rendering: message, cause chain and captured backtrace
    pub fn trace(&self) -> String {
        format!("{:?}", self.source)
    }
}

/// Binds one command to its job and context for a single attempt
pub struct CommandExecution<'a> {
    ctx: &'a BuildContext,
    job: &'a Job,
    command: &'a dyn Command,
}

impl<'a> CommandExecution<'a> {
    pub fn new(ctx: &'a BuildContext, job: &'a Job, command: &'a dyn Command) -> Self {
        Self { ctx, job, command }
    }

    /// Run the command, then emit its output.
    ///
    /// Output is emitted after a failed run as well; an emission error in that
    /// case is logged and the run error is returned.
    pub fn execute(self) -> Result<(), CommandFailure> {
        let name = self.command.name();
        let start = Instant::now();

        debug!(
            job = self.job.name(),
            command = name,
            operation = operations::RUN,
            "command started"
        );

        match self.command.run(self.ctx, self.job) {
            Ok(()) => {
                self.command
                    .emit_output(self.ctx)
                    .map_err(|e| CommandFailure::new(name, FailureStage::Emit, e))?;

                debug!(
                    job = self.job.name(),
                    command = name,
                    operation = operations::RUN,
                    status = status::SUCCESS,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "command finished"
                );
                Ok(())
            }
            Err(run_err) => {
                if let Err(emit_err) = self.command.emit_output(self.ctx) {
                    warn!(
                        job = self.job.name(),
                        command = name,
                        operation = operations::EMIT,
                        status = status::ERROR,
                        "discarding output emission failure: {:#}",
                        emit_err
                    );
                }

                debug!(
                    job = self.job.name(),
                    command = name,
                    operation = operations::RUN,
                    status = status::ERROR,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "command failed"
                );
                Err(CommandFailure::new(name, FailureStage::Run, run_err))
            }
        }
    }
}
