/// Shell command executor
///
/// Runs a plan command through `sh -c` inside the job's work folder, captures
/// its output, enforces an optional timeout and, when marked incremental,
/// skips itself if the job cache shows the same command already succeeded.
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::{self, Stdio};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use crate::job::{BuildContext, Command, Job, OutputStream};
use crate::logging::{operations, status};

/// How often a running child is polled while a timeout is armed
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("exited with status {}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    ExitStatus { code: Option<i32> },

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// One command of a build plan, as written in `kiln.toml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub run: String,
    pub env: BTreeMap<String, String>,
    pub timeout_secs: Option<u64>,
    pub incremental: bool,
}

impl CommandSpec {
    pub fn new(run: impl Into<String>) -> Self {
        let run = run.into();
        Self {
            name: run.clone(),
            run,
            env: BTreeMap::new(),
            timeout_secs: None,
            incremental: false,
        }
    }

    /// Stable digest of everything that determines what the command does
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.run.as_bytes());
        for (key, value) in &self.env {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Job cache key holding the fingerprint of the last successful run
    pub fn fingerprint_key(&self) -> String {
        format!("fingerprint:{}", self.name)
    }
}

#[derive(Debug, Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

#[derive(Debug)]
pub struct ShellCommand {
    spec: CommandSpec,
    captured: Mutex<Captured>,
}

impl ShellCommand {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            captured: Mutex::new(Captured::default()),
        }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, cwd: PathBuf) -> Result<()> {
        let shell = which::which("sh").unwrap_or_else(|_| PathBuf::from("sh"));

        let mut stdout = tempfile::tempfile().context("Failed to create stdout capture file")?;
        let mut stderr = tempfile::tempfile().context("Failed to create stderr capture file")?;

        let mut child = process::Command::new(&shell)
            .arg("-c")
            .arg(&self.spec.run)
            .current_dir(&cwd)
            .envs(&self.spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.try_clone()?))
            .stderr(Stdio::from(stderr.try_clone()?))
            .spawn()
            .with_context(|| format!("Failed to spawn {}: {}", shell.display(), self.spec.run))?;

        let (exit, timed_out) = match self.spec.timeout_secs {
            Some(secs) => wait_with_timeout(&mut child, Duration::from_secs(secs))?,
            None => (
                child.wait().context("Failed to wait for child process")?,
                false,
            ),
        };

        {
            let mut captured = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
            captured.stdout = read_capture(&mut stdout)?;
            captured.stderr = read_capture(&mut stderr)?;
        }

        if timed_out {
            return Err(ShellError::Timeout {
                secs: self.spec.timeout_secs.unwrap_or_default(),
            }
            .into());
        }

        if !exit.success() {
            return Err(ShellError::ExitStatus { code: exit.code() }.into());
        }

        Ok(())
    }
}

impl Command for ShellCommand {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn run(&self, ctx: &BuildContext, job: &Job) -> Result<()> {
        let key = self.spec.fingerprint_key();
        let fingerprint = self.spec.fingerprint();

        if self.spec.incremental && job.get_variable::<String>(&key).ok() == Some(fingerprint.clone())
        {
            info!(
                job = job.name(),
                command = %self.spec.name,
                operation = operations::RUN,
                status = status::SKIPPED,
                "up to date"
            );
            return Ok(());
        }

        let cwd = ctx.work_dir(job.work_folder());
        fs::create_dir_all(&cwd)
            .with_context(|| format!("Failed to create work folder: {}", cwd.display()))?;

        debug!(
            job = job.name(),
            command = %self.spec.name,
            cwd = %cwd.display(),
            "spawning shell command"
        );

        self.execute(cwd)?;

        if self.spec.incremental {
            job.cache_variable(&key, fingerprint)?;
        }

        Ok(())
    }

    fn emit_output(&self, ctx: &BuildContext) -> Result<()> {
        let captured = std::mem::take(
            &mut *self.captured.lock().unwrap_or_else(PoisonError::into_inner),
        );

        let reporter = ctx.reporter();
        reporter.emit(&self.spec.name, OutputStream::Stdout, &captured.stdout)?;
        reporter.emit(&self.spec.name, OutputStream::Stderr, &captured.stderr)?;
        Ok(())
    }
}

fn read_capture(file: &mut File) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut data)
        .context("Failed to read captured output")?;
    Ok(data)
}

/// Wait for the child, killing it once `timeout` has elapsed
fn wait_with_timeout(
    child: &mut process::Child,
    timeout: Duration,
) -> Result<(process::ExitStatus, bool)> {
    let start = Instant::now();

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }

        if start.elapsed() >= timeout {
            child.kill()?;
            let status = child.wait()?;
            return Ok((status, true));
        }

        thread::sleep(POLL_INTERVAL);
    }
}
