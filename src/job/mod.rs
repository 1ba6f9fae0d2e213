//! Job execution and incremental-state engine
//!
//! A [`Job`] owns one [`PersistentCache`] and an ordered list of
//! [`TaskGroup`]s. Running a job executes every command in order and writes
//! the cache after each attempt, so the file on disk always reflects exactly
//! the work that completed, including the attempt that failed.

pub mod cache;
pub mod command;
pub mod context;
pub mod error;
pub mod execution;
pub mod group;
pub mod runner;

pub use cache::{CacheError, LoadOutcome, PersistentCache};
pub use command::Command;
pub use context::{BuildContext, MemoryReporter, OutputStream, Reporter, TerminalReporter};
pub use error::JobError;
pub use execution::{CommandExecution, CommandFailure, FailureStage};
pub use group::TaskGroup;
pub use runner::{CorruptCachePolicy, Runner};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::logging::{operations, status};

/// How a job's cache was initialised at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOrigin {
    /// Entries from a previous run were loaded
    Warm { entries: usize },
    /// No cache file existed
    Cold,
    /// A cache file existed but could not be read and was ignored
    Discarded,
}

/// Summary of a successful [`Job::run`]
#[derive(Debug, Clone)]
pub struct JobReport {
    pub name: String,
    pub commands: usize,
    pub elapsed: Duration,
}

/// Named unit of build work with its own persistent cache
pub struct Job {
    name: String,
    work_folder: PathBuf,
    cache: Mutex<PersistentCache>,
    cache_origin: CacheOrigin,
    groups: Vec<TaskGroup>,
}

impl Job {
    /// Build a job and load its cache. Only [`Runner`] constructs jobs.
    pub(crate) fn open(
        name: &str,
        work_folder: PathBuf,
        cache_path: PathBuf,
        policy: CorruptCachePolicy,
    ) -> Result<Self, JobError> {
        let mut cache = PersistentCache::new(cache_path);

        let cache_origin = match cache.load() {
            Ok(LoadOutcome::Loaded { entries }) => CacheOrigin::Warm { entries },
            Ok(LoadOutcome::Absent) => CacheOrigin::Cold,
            Err(source) => match policy {
                CorruptCachePolicy::Cold => {
                    warn!(
                        job = name,
                        operation = operations::LOAD,
                        status = status::ERROR,
                        error = %source,
                        "ignoring unreadable cache, starting cold"
                    );
                    cache.clear();
                    CacheOrigin::Discarded
                }
                CorruptCachePolicy::Fail => {
                    return Err(JobError::CacheLoad {
                        job: name.to_string(),
                        source,
                    })
                }
            },
        };

        Ok(Self {
            name: name.to_string(),
            work_folder,
            cache: Mutex::new(cache),
            cache_origin,
            groups: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn work_folder(&self) -> &Path {
        &self.work_folder
    }

    pub fn cache_origin(&self) -> CacheOrigin {
        self.cache_origin
    }

    pub fn cache_path(&self) -> PathBuf {
        self.lock_cache().path().to_path_buf()
    }

    pub fn groups(&self) -> &[TaskGroup] {
        &self.groups
    }

    pub fn cache_variable<T: Serialize>(&self, key: &str, value: T) -> Result<(), CacheError> {
        self.lock_cache().set_variable(key, value)
    }

    pub fn has_variable(&self, key: &str) -> bool {
        self.lock_cache().has_variable(key)
    }

    pub fn get_variable<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        self.lock_cache().get_variable(key)
    }

    /// Run `f` with exclusive access to the cache, for read-modify-write updates
    pub fn with_cache<R>(&self, f: impl FnOnce(&mut PersistentCache) -> R) -> R {
        f(&mut self.lock_cache())
    }

    /// Append a group holding one command
    pub fn add_command<C: Command + 'static>(&mut self, command: C) {
        self.groups.push(TaskGroup::single(Box::new(command)));
    }

    /// Append a group of commands. `serial = false` lets them run concurrently.
    pub fn add_command_group(&mut self, commands: Vec<Box<dyn Command>>, serial: bool) {
        self.groups.push(TaskGroup::new(commands, serial));
    }

    pub fn add_group(&mut self, group: TaskGroup) {
        self.groups.push(group);
    }

    /// Execute every group in order.
    ///
    /// The cache is saved after each command attempt and once more at the end.
    /// The first failure stops the job; later groups never start.
    pub fn run(&self, ctx: &BuildContext) -> Result<JobReport, JobError> {
        let start = Instant::now();
        let mut commands = 0;

        info!(
            job = %self.name,
            operation = operations::RUN,
            groups = self.groups.len(),
            "job started"
        );

        for group in &self.groups {
            let outcome = if group.runs_in_parallel(ctx.max_workers()) {
                self.run_parallel(ctx, group)
            } else {
                self.run_serial(ctx, group)
            };

            match outcome {
                Ok(count) => commands += count,
                Err(err) => {
                    warn!(
                        job = %self.name,
                        operation = operations::RUN,
                        status = status::ERROR,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "job failed"
                    );
                    return Err(err);
                }
            }
        }

        self.save_cache().map_err(|source| JobError::CacheSave {
            job: self.name.clone(),
            source,
        })?;

        let elapsed = start.elapsed();
        info!(
            job = %self.name,
            operation = operations::RUN,
            status = status::SUCCESS,
            commands,
            elapsed_ms = elapsed.as_millis() as u64,
            "job finished"
        );

        Ok(JobReport {
            name: self.name.clone(),
            commands,
            elapsed,
        })
    }

    fn run_serial(&self, ctx: &BuildContext, group: &TaskGroup) -> Result<usize, JobError> {
        for command in group.commands() {
            self.attempt(ctx, command.as_ref())?;
        }
        Ok(group.len())
    }

    /// Fan a group out to a bounded set of scoped workers.
    ///
    /// After the first failure no queued command is started; commands already
    /// running finish and have their cache saved. The earliest failure wins.
    fn run_parallel(&self, ctx: &BuildContext, group: &TaskGroup) -> Result<usize, JobError> {
        let workers = ctx.max_workers().min(group.len());
        let (task_tx, task_rx) = crossbeam_channel::bounded::<&dyn Command>(group.len());
        for command in group.commands() {
            // Capacity equals the group size and the receiver is alive, so this cannot block or fail
            if task_tx.send(command.as_ref()).is_err() {
                break;
            }
        }
        drop(task_tx);

        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let abort = AtomicBool::new(false);

        thread::scope(|s| {
            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let abort = &abort;
                s.spawn(move || {
                    for command in task_rx.iter() {
                        if abort.load(Ordering::SeqCst) {
                            break;
                        }
                        let outcome = self.attempt(ctx, command);
                        if outcome.is_err() {
                            abort.store(true, Ordering::SeqCst);
                        }
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut completed = 0;
        let mut first_error = None;
        for outcome in result_rx.iter() {
            match outcome {
                Ok(()) => completed += 1,
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(completed),
        }
    }

    /// One command attempt followed by a cache checkpoint
    fn attempt(&self, ctx: &BuildContext, command: &dyn Command) -> Result<(), JobError> {
        let outcome = CommandExecution::new(ctx, self, command).execute();
        let saved = self.save_cache();

        match (outcome, saved) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(source)) => Err(JobError::CacheSave {
                job: self.name.clone(),
                source,
            }),
            (Err(failure), Ok(())) => Err(JobError::CommandFailed {
                job: self.name.clone(),
                failure,
            }),
            (Err(failure), Err(source)) => Err(JobError::CommandFailedUnsaved {
                job: self.name.clone(),
                failure,
                source,
            }),
        }
    }

    fn save_cache(&self) -> Result<(), CacheError> {
        self.lock_cache().save()
    }

    fn lock_cache(&self) -> MutexGuard<'_, PersistentCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("work_folder", &self.work_folder)
            .field("cache_origin", &self.cache_origin)
            .field("groups", &self.groups)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, bail, Result};
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    #[derive(Debug, thiserror::Error)]
    #[error("link error: {0}")]
    struct LinkError(String);

    /// Records start/finish order into a shared log and optionally sets a cache key
    struct Step {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        set: Option<(&'static str, &'static str)>,
        fail: bool,
        ran: Arc<AtomicBool>,
    }

    impl Step {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                log: Arc::clone(log),
                set: None,
                fail: false,
                ran: Arc::new(AtomicBool::new(false)),
            }
        }

        fn setting(mut self, key: &'static str, value: &'static str) -> Self {
            self.set = Some((key, value));
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    impl Command for Step {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(&self, _ctx: &BuildContext, job: &Job) -> Result<()> {
            self.ran.store(true, Ordering::SeqCst);
            self.log.lock().unwrap().push(format!("start:{}", self.name));
            if let Some((key, value)) = self.set {
                job.cache_variable(key, value)?;
            }
            if self.fail {
                bail!("{} failed", self.name);
            }
            self.log.lock().unwrap().push(format!("finish:{}", self.name));
            Ok(())
        }

        fn emit_output(&self, _ctx: &BuildContext) -> Result<()> {
            Ok(())
        }
    }

    struct Compile;

    impl Command for Compile {
        fn name(&self) -> &str {
            "compile"
        }

        fn run(&self, _ctx: &BuildContext, job: &Job) -> Result<()> {
            job.cache_variable("objhash", "abc123")?;
            Ok(())
        }

        fn emit_output(&self, ctx: &BuildContext) -> Result<()> {
            ctx.reporter()
                .emit("compile", OutputStream::Stdout, b"compiling...")?;
            Ok(())
        }
    }

    struct Link;

    impl Command for Link {
        fn name(&self) -> &str {
            "link"
        }

        fn run(&self, _ctx: &BuildContext, job: &Job) -> Result<()> {
            let hash: String = job.get_variable("objhash")?;
            if hash == "abc123" {
                return Err(LinkError("missing symbol".to_string()).into());
            }
            Ok(())
        }

        fn emit_output(&self, ctx: &BuildContext) -> Result<()> {
            ctx.reporter()
                .emit("link", OutputStream::Stderr, b"undefined reference")?;
            Ok(())
        }
    }

    fn context(temp: &TempDir, workers: usize) -> (BuildContext, Arc<MemoryReporter>) {
        let reporter = Arc::new(MemoryReporter::new());
        let ctx = BuildContext::new(temp.path(), workers).with_reporter(reporter.clone());
        (ctx, reporter)
    }

    fn reload(path: &Path) -> PersistentCache {
        let mut cache = PersistentCache::new(path);
        cache.load().unwrap();
        cache
    }

    #[test]
    fn test_cold_start() {
        let temp = TempDir::new().unwrap();
        let runner = Runner::new(temp.path()).unwrap();
        let job = runner.job("fresh").unwrap();

        assert_eq!(job.cache_origin(), CacheOrigin::Cold);
        assert!(!job.has_variable("anything"));
        assert_eq!(job.work_folder(), Path::new("fresh"));
        assert_eq!(
            job.cache_path(),
            temp.path().join(".buildstate").join("fresh.cache")
        );
    }

    #[test]
    fn test_warm_start_sees_previous_run() {
        let temp = TempDir::new().unwrap();
        let (ctx, _) = context(&temp, 1);

        {
            let runner = Runner::new(temp.path()).unwrap();
            let mut job = runner.job("core").unwrap();
            job.add_command(Compile);
            job.run(&ctx).unwrap();
        }

        let runner = Runner::new(temp.path()).unwrap();
        let job = runner.job("core").unwrap();
        assert_eq!(job.cache_origin(), CacheOrigin::Warm { entries: 1 });
        assert_eq!(job.get_variable::<String>("objhash").unwrap(), "abc123");
    }

    #[test]
    fn test_corrupt_cache_policies() {
        let temp = TempDir::new().unwrap();
        let runner = Runner::new(temp.path()).unwrap();
        fs::write(runner.cache_path("broken"), "{ not json").unwrap();

        let job = runner.job("broken").unwrap();
        assert_eq!(job.cache_origin(), CacheOrigin::Discarded);
        assert!(!job.has_variable("objhash"));

        let strict = Runner::new(temp.path())
            .unwrap()
            .with_corrupt_policy(CorruptCachePolicy::Fail);
        let err = strict.job("broken").unwrap_err();
        assert!(matches!(err, JobError::CacheLoad { .. }));
    }

    #[test]
    fn test_partial_progress_is_persisted() {
        let temp = TempDir::new().unwrap();
        let (ctx, _) = context(&temp, 1);
        let runner = Runner::new(temp.path()).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = Step::new("a", &log).setting("a", "done");
        let b = Step::new("b", &log).setting("b", "partial").failing();
        let c = Step::new("c", &log).setting("c", "done");
        let c_ran = Arc::clone(&c.ran);

        let mut job = runner.job("partial").unwrap();
        job.add_command(a);
        job.add_command(b);
        job.add_command(c);

        let err = job.run(&ctx).unwrap_err();
        assert!(matches!(err, JobError::CommandFailed { .. }));
        assert_eq!(err.command_failure().unwrap().command, "b");
        assert!(!c_ran.load(Ordering::SeqCst));

        let cache = reload(&job.cache_path());
        assert_eq!(cache.get_variable::<String>("a").unwrap(), "done");
        assert_eq!(cache.get_variable::<String>("b").unwrap(), "partial");
        assert!(!cache.has_variable("c"));
    }

    #[test]
    fn test_serial_group_preserves_order() {
        let temp = TempDir::new().unwrap();
        let (ctx, _) = context(&temp, 4);
        let runner = Runner::new(temp.path()).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut job = runner.job("ordered").unwrap();
        job.add_command_group(
            vec![
                Box::new(Step::new("a", &log)),
                Box::new(Step::new("b", &log)),
                Box::new(Step::new("c", &log)),
            ],
            true,
        );

        let report = job.run(&ctx).unwrap();
        assert_eq!(report.commands, 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start:a", "finish:a", "start:b", "finish:b", "start:c", "finish:c"]
        );
    }

    #[test]
    fn test_end_to_end_compile_then_link() {
        let temp = TempDir::new().unwrap();
        let (ctx, reporter) = context(&temp, 1);
        let runner = Runner::new(temp.path()).unwrap();

        let mut job = runner.job("link").unwrap();
        job.add_command(Compile);
        job.add_command(Link);

        let err = job.run(&ctx).unwrap_err();
        assert!(err.to_string().contains("missing symbol"));
        let failure = err.command_failure().unwrap();
        assert_eq!(failure.command, "link");
        assert!(failure.downcast_ref::<LinkError>().is_some());

        let cache = reload(&job.cache_path());
        assert_eq!(cache.get_variable::<String>("objhash").unwrap(), "abc123");

        assert_eq!(reporter.text_for("compile"), "compiling...");
        assert_eq!(reporter.text_for("link"), "undefined reference");
    }

    /// Every command blocks on a shared barrier, so the group only completes if
    /// all of them are running at the same time.
    struct Rendezvous {
        name: String,
        barrier: Arc<Barrier>,
    }

    impl Command for Rendezvous {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(&self, _ctx: &BuildContext, job: &Job) -> Result<()> {
            self.barrier.wait();
            job.cache_variable(&self.name, true)?;
            Ok(())
        }

        fn emit_output(&self, _ctx: &BuildContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parallel_group_runs_concurrently() {
        let temp = TempDir::new().unwrap();
        let (ctx, _) = context(&temp, 3);
        let runner = Runner::new(temp.path()).unwrap();
        let barrier = Arc::new(Barrier::new(3));

        let mut job = runner.job("fanout").unwrap();
        job.add_command_group(
            (0..3)
                .map(|i| {
                    Box::new(Rendezvous {
                        name: format!("obj{}", i),
                        barrier: Arc::clone(&barrier),
                    }) as Box<dyn Command>
                })
                .collect(),
            false,
        );

        let report = job.run(&ctx).unwrap();
        assert_eq!(report.commands, 3);

        let cache = reload(&job.cache_path());
        for i in 0..3 {
            assert!(cache.get_variable::<bool>(&format!("obj{}", i)).unwrap());
        }
    }

    struct Counted {
        fail: bool,
        runs: Arc<AtomicUsize>,
    }

    impl Command for Counted {
        fn name(&self) -> &str {
            "counted"
        }

        fn run(&self, _ctx: &BuildContext, _job: &Job) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("boom"));
            }
            Ok(())
        }

        fn emit_output(&self, _ctx: &BuildContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parallel_failure_stops_later_groups() {
        let temp = TempDir::new().unwrap();
        let (ctx, _) = context(&temp, 2);
        let runner = Runner::new(temp.path()).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let later = Arc::new(AtomicUsize::new(0));

        let mut job = runner.job("fanout-fail").unwrap();
        job.add_command_group(
            vec![
                Box::new(Counted {
                    fail: true,
                    runs: Arc::clone(&runs),
                }),
                Box::new(Counted {
                    fail: false,
                    runs: Arc::clone(&runs),
                }),
            ],
            false,
        );
        job.add_command(Counted {
            fail: false,
            runs: Arc::clone(&later),
        });

        let err = job.run(&ctx).unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(runs.load(Ordering::SeqCst) >= 1);
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    /// Sleeps, then records `k<index>`; `gate` holds the first pair until both
    /// have started so the failure lands while a sibling is in flight.
    struct Object {
        index: usize,
        gate: Option<Arc<Barrier>>,
        fail: bool,
        started: Arc<AtomicUsize>,
    }

    impl Command for Object {
        fn name(&self) -> &str {
            "object"
        }

        fn run(&self, _ctx: &BuildContext, job: &Job) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.wait();
            }
            if self.fail {
                bail!("object {} failed", self.index);
            }
            thread::sleep(Duration::from_millis(100));
            job.cache_variable(&format!("k{}", self.index), self.index)?;
            Ok(())
        }

        fn emit_output(&self, _ctx: &BuildContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parallel_failure_drains_in_flight_and_skips_queued() {
        let temp = TempDir::new().unwrap();
        let (ctx, _) = context(&temp, 2);
        let runner = Runner::new(temp.path()).unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Barrier::new(2));

        let mut job = runner.job("objects").unwrap();
        job.add_command_group(
            (0..6)
                .map(|index| {
                    Box::new(Object {
                        index,
                        gate: (index < 2).then(|| Arc::clone(&gate)),
                        fail: index == 0,
                        started: Arc::clone(&started),
                    }) as Box<dyn Command>
                })
                .collect(),
            false,
        );

        let err = job.run(&ctx).unwrap_err();
        assert!(err.to_string().contains("object 0 failed"));

        // Only the two commands dispatched before the failure ever started
        assert_eq!(started.load(Ordering::SeqCst), 2);

        // The in-flight sibling finished and its result was checkpointed
        assert_eq!(
            job.with_cache(|cache| cache.get_raw("k1").cloned()),
            Some(serde_json::json!(1))
        );
        let cache = reload(&job.cache_path());
        assert_eq!(cache.get_variable::<usize>("k1").unwrap(), 1);
        for index in 2..6 {
            assert!(!cache.has_variable(&format!("k{}", index)));
        }
    }

    #[test]
    fn test_save_failure_aborts_job() {
        let temp = TempDir::new().unwrap();
        let (ctx, _) = context(&temp, 1);
        let runner = Runner::new(temp.path()).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));

        let mut job = runner.job("unsaved").unwrap();
        job.add_command(Compile);
        job.add_command(Counted {
            fail: false,
            runs: Arc::clone(&runs),
        });

        fs::remove_dir_all(runner.state_dir()).unwrap();

        let err = job.run(&ctx).unwrap_err();
        assert!(matches!(err, JobError::CacheSave { .. }));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_with_failed_save_keeps_both_errors() {
        let temp = TempDir::new().unwrap();
        let (ctx, _) = context(&temp, 1);
        let runner = Runner::new(temp.path()).unwrap();

        let mut job = runner.job("doubly-broken").unwrap();
        job.add_command(Counted {
            fail: true,
            runs: Arc::new(AtomicUsize::new(0)),
        });

        fs::remove_dir_all(runner.state_dir()).unwrap();

        let err = job.run(&ctx).unwrap_err();
        assert!(matches!(err, JobError::CommandFailedUnsaved { .. }));
        assert!(err.to_string().contains("boom"));
        assert!(err.command_failure().is_some());
    }
}
