/// `kiln cache` command implementation
///
/// Inspects and deletes persisted job state.
use anyhow::Result;

use super::Session;
use crate::cli::{CacheArgs, CacheCommands};
use kiln::cli_utils::kiln_prefix;
use kiln::job::{LoadOutcome, PersistentCache, Runner};

pub fn cache(args: &CacheArgs) -> Result<()> {
    let session = Session::start(&args.common)?;
    let runner = Runner::new(&session.output_dir)?;

    match &args.command {
        CacheCommands::Show { job } => show(&runner, job),
        CacheCommands::List => list(&runner),
        CacheCommands::Clean { job, all } => clean(&runner, job.as_deref(), *all),
    }
}

/// Print a job's persisted variables
fn show(runner: &Runner, job: &str) -> Result<()> {
    let mut cache = PersistentCache::new(runner.job_cache_path(job)?);

    match cache.load()? {
        LoadOutcome::Absent => anyhow::bail!("No cached state for job: {}", job),
        LoadOutcome::Loaded { .. } => {
            println!("{}", serde_json::to_string_pretty(cache.entries())?);
            Ok(())
        }
    }
}

fn list(runner: &Runner) -> Result<()> {
    let jobs = runner.cached_jobs()?;

    if jobs.is_empty() {
        eprintln!(
            "{} No cached job state in {}",
            kiln_prefix(),
            runner.state_dir().display()
        );
        return Ok(());
    }

    for job in jobs {
        println!("{}", job);
    }
    Ok(())
}

fn clean(runner: &Runner, job: Option<&str>, all: bool) -> Result<()> {
    match (job, all) {
        (Some(job), _) => {
            if runner.clean(job)? {
                eprintln!("{} Removed cached state for {}", kiln_prefix(), job);
            } else {
                eprintln!("{} No cached state for {}", kiln_prefix(), job);
            }
        }
        (None, true) => {
            let removed = runner.clean_all()?;
            eprintln!("{} Removed cached state for {} jobs", kiln_prefix(), removed);
        }
        (None, false) => anyhow::bail!("Specify a job name or --all"),
    }
    Ok(())
}
