//! Ambient execution context handed to every job and command.
//!
//! Holds the settings that would otherwise be global: where build state
//! lives, how many workers a parallel group may use, and where command
//! output is reported.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cli_utils::kiln_prefix;

/// Which stream a chunk of captured output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Sink for captured command output
pub trait Reporter: Send + Sync {
    fn emit(&self, command: &str, stream: OutputStream, data: &[u8]) -> io::Result<()>;
}

/// Writes captured output to the terminal, stderr chunks prefixed with the command name
#[derive(Debug, Default)]
pub struct TerminalReporter {
    lock: Mutex<()>,
}

impl Reporter for TerminalReporter {
    fn emit(&self, command: &str, stream: OutputStream, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        // Keep chunks from parallel commands from interleaving
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        match stream {
            OutputStream::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(data)?;
                out.flush()
            }
            OutputStream::Stderr => {
                let mut err = io::stderr().lock();
                writeln!(err, "{} {}:", kiln_prefix(), command)?;
                err.write_all(data)?;
                err.flush()
            }
        }
    }
}

/// A single captured chunk, as recorded by [`MemoryReporter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emission {
    pub command: String,
    pub stream: OutputStream,
    pub data: Vec<u8>,
}

/// Records emitted output in memory
#[derive(Debug, Default)]
pub struct MemoryReporter {
    emissions: Mutex<Vec<Emission>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emissions(&self) -> Vec<Emission> {
        self.emissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// All captured text for one command, streams concatenated in emission order
    pub fn text_for(&self, command: &str) -> String {
        self.emissions()
            .iter()
            .filter(|e| e.command == command)
            .map(|e| String::from_utf8_lossy(&e.data).into_owned())
            .collect()
    }
}

impl Reporter for MemoryReporter {
    fn emit(&self, command: &str, stream: OutputStream, data: &[u8]) -> io::Result<()> {
        self.emissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Emission {
                command: command.to_string(),
                stream,
                data: data.to_vec(),
            });
        Ok(())
    }
}

/// Explicit replacement for a global "master" object
#[derive(Clone)]
pub struct BuildContext {
    output_folder: PathBuf,
    max_workers: usize,
    reporter: Arc<dyn Reporter>,
}

impl BuildContext {
    /// `max_workers == 0` means one worker per CPU.
    pub fn new(output_folder: impl Into<PathBuf>, max_workers: usize) -> Self {
        Self {
            output_folder: output_folder.into(),
            max_workers: resolve_workers(max_workers),
            reporter: Arc::new(TerminalReporter::default()),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn output_folder(&self) -> &Path {
        &self.output_folder
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn reporter(&self) -> &dyn Reporter {
        self.reporter.as_ref()
    }

    /// Absolute location of a job's work folder
    pub fn work_dir(&self, work_folder: &Path) -> PathBuf {
        self.output_folder.join(work_folder)
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("output_folder", &self.output_folder)
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

pub(crate) fn resolve_workers(requested: usize) -> usize {
    match requested {
        0 => num_cpus::get().max(1),
        n => n,
    }
}
