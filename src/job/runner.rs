/// Job orchestration
///
/// The runner owns the output folder, is the only place jobs are created, and
/// can drive several independent jobs across a worker pool.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, info};

use super::context::BuildContext;
use super::error::JobError;
use super::{Job, JobReport};

/// Directory under the output folder holding one cache file per job
pub const STATE_DIR: &str = ".buildstate";

/// Extension of per-job cache files
pub const CACHE_EXTENSION: &str = "cache";

/// What to do when a job's cache file exists but cannot be read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptCachePolicy {
    /// Log a warning and start the job with an empty cache
    #[default]
    Cold,
    /// Refuse to create the job
    Fail,
}

pub struct Runner {
    output_folder: PathBuf,
    state_dir: PathBuf,
    corrupt_policy: CorruptCachePolicy,
    names: Mutex<HashSet<String>>,
}

impl Runner {
    /// Create a runner rooted at `output_folder`, creating the state directory
    pub fn new(output_folder: impl Into<PathBuf>) -> Result<Self, JobError> {
        let output_folder = output_folder.into();
        let state_dir = output_folder.join(STATE_DIR);

        fs::create_dir_all(&state_dir).map_err(|source| JobError::StateDir {
            path: state_dir.clone(),
            source,
        })?;

        Ok(Self {
            output_folder,
            state_dir,
            corrupt_policy: CorruptCachePolicy::default(),
            names: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_corrupt_policy(mut self, policy: CorruptCachePolicy) -> Self {
        self.corrupt_policy = policy;
        self
    }

    pub fn output_folder(&self) -> &Path {
        &self.output_folder
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn cache_path(&self, name: &str) -> PathBuf {
        self.state_dir.join(format!("{}.{}", name, CACHE_EXTENSION))
    }

    /// Cache file of an existing or future job, rejecting names that would
    /// resolve outside the state directory
    pub fn job_cache_path(&self, name: &str) -> Result<PathBuf, JobError> {
        validate_name(name)?;
        Ok(self.cache_path(name))
    }

    /// Create a job whose work folder is its name
    pub fn job(&self, name: &str) -> Result<Job, JobError> {
        self.job_in(name, name)
    }

    /// Create a job with an explicit work folder
    pub fn job_in(&self, name: &str, work_folder: impl Into<PathBuf>) -> Result<Job, JobError> {
        validate_name(name)?;

        // Held across open so a failed open never reserves the name
        let mut names = self.names.lock().unwrap_or_else(|e| e.into_inner());
        if names.contains(name) {
            return Err(JobError::DuplicateName(name.to_string()));
        }

        let job = self.open(name, work_folder.into())?;
        names.insert(name.to_string());
        Ok(job)
    }

    /// Create a job that deliberately shares its cache file with any other
    /// job of the same name
    pub fn shared_job(&self, name: &str) -> Result<Job, JobError> {
        validate_name(name)?;

        let mut names = self.names.lock().unwrap_or_else(|e| e.into_inner());
        let job = self.open(name, PathBuf::from(name))?;
        names.insert(name.to_string());
        Ok(job)
    }

    fn open(&self, name: &str, work_folder: PathBuf) -> Result<Job, JobError> {
        let job = Job::open(
            name,
            work_folder,
            self.cache_path(name),
            self.corrupt_policy,
        )?;
        debug!(job = name, cache_origin = ?job.cache_origin(), "job created");
        Ok(job)
    }

    /// Run independent jobs across at most `ctx.max_workers()` threads.
    ///
    /// A failing job does not stop the others. Results come back in the same
    /// order as `jobs`.
    pub fn run_all(&self, jobs: &[Job], ctx: &BuildContext) -> Vec<Result<JobReport, JobError>> {
        let workers = ctx.max_workers().min(jobs.len());
        if workers <= 1 {
            return jobs.iter().map(|job| job.run(ctx)).collect();
        }

        info!(jobs = jobs.len(), workers, "running jobs in parallel");

        let (task_tx, task_rx) = crossbeam_channel::bounded::<usize>(jobs.len());
        for index in 0..jobs.len() {
            if task_tx.send(index).is_err() {
                break;
            }
        }
        drop(task_tx);

        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        thread::scope(|s| {
            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                s.spawn(move || {
                    for index in task_rx.iter() {
                        if result_tx.send((index, jobs[index].run(ctx))).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut results: Vec<(usize, Result<JobReport, JobError>)> = result_rx.iter().collect();
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Names of jobs with a cache file in this output folder
    pub fn cached_jobs(&self) -> Result<Vec<String>, JobError> {
        let read_err = |source: std::io::Error| JobError::StateDir {
            path: self.state_dir.clone(),
            source,
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.state_dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CACHE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    /// Delete one job's cache file. Returns whether a file was removed.
    pub fn clean(&self, name: &str) -> Result<bool, JobError> {
        let path = self.job_cache_path(name)?;

        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(JobError::StateDir { path, source }),
        }
    }

    /// Delete every cache file. Returns how many were removed.
    pub fn clean_all(&self) -> Result<usize, JobError> {
        let mut removed = 0;
        for name in self.cached_jobs()? {
            if self.clean(&name)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn validate_name(name: &str) -> Result<(), JobError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');

    if invalid {
        return Err(JobError::InvalidName(name.to_string()));
    }
    Ok(())
}
