/// Command capability contract
///
/// A command is an opaque build action. The engine only runs it and asks it
/// to surface whatever output it captured.
use anyhow::Result;

use super::context::BuildContext;
use super::Job;

pub trait Command: Send + Sync {
    /// Name used in logs, reports and failure messages
    fn name(&self) -> &str {
        "command"
    }

    /// Perform the build action. May read and write the job's cache.
    fn run(&self, ctx: &BuildContext, job: &Job) -> Result<()>;

    /// Forward captured output to `ctx.reporter()`.
    ///
    /// Called once per attempt, also after a failed [`run`](Self::run).
    fn emit_output(&self, ctx: &BuildContext) -> Result<()>;
}
