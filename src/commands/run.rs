/// `kiln run` command implementation
///
/// Builds the jobs declared in the plan and runs them side by side.
use anyhow::{Context, Result};

use super::Session;
use crate::cli::RunArgs;
use kiln::cli_utils::kiln_prefix;
use kiln::job::{BuildContext, CorruptCachePolicy, Runner};
use kiln::plan::Plan;

pub fn run(args: &RunArgs) -> Result<()> {
    let session = Session::start(&args.common)?;
    let config = &session.loaded.config;

    let plan_path = args
        .plan
        .clone()
        .or_else(|| session.loaded.path.clone())
        .context("No kiln.toml found; pass --plan or --config")?;

    let plan = Plan::from_file(&plan_path)
        .with_context(|| format!("Failed to load plan: {}", plan_path.display()))?;

    if plan.jobs.is_empty() {
        anyhow::bail!("Plan {} declares no [[job]] entries", plan_path.display());
    }

    let policy = if args.strict_cache {
        CorruptCachePolicy::Fail
    } else {
        config.cache.on_corrupt
    };

    let runner = Runner::new(&session.output_dir)?.with_corrupt_policy(policy);
    let ctx = BuildContext::new(
        &session.output_dir,
        args.max_workers.unwrap_or(config.build.max_workers),
    );

    let jobs = plan.build(&runner, &args.jobs)?;
    let results = runner.run_all(&jobs, &ctx);

    let mut failed = 0;
    for (job, result) in jobs.iter().zip(&results) {
        match result {
            Ok(report) => eprintln!(
                "{} {} | OK | {} commands | {:.2}s",
                kiln_prefix(),
                report.name,
                report.commands,
                report.elapsed.as_secs_f64()
            ),
            Err(err) => {
                failed += 1;
                eprintln!("{} {} | FAILED | {}", kiln_prefix(), job.name(), err);
                if let Some(failure) = err.command_failure() {
                    tracing::debug!(job = job.name(), "{}", failure.trace());
                }
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} jobs failed", failed, jobs.len());
    }

    Ok(())
}
