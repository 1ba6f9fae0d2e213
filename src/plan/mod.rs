//! Build plans
//!
//! A plan is the `[[job]]` section of `kiln.toml`. Each job lists its task
//! groups; each group lists shell commands:
//!
//! ```toml
//! [[job]]
//! name = "core"
//! groups = [
//!   { serial = true,  commands = [{ name = "configure", run = "./configure" }] },
//!   { serial = false, commands = [{ run = "cc -c a.c" }, { run = "cc -c b.c" }] },
//! ]
//! ```
//!
//! `commands = [...]` directly on a job is shorthand for one single-command
//! group per entry. Plans are read from `toml::Value` so that a wrongly shaped
//! entry is reported as a [`PlanError::TypeMismatch`] before anything runs.

pub mod shell;

pub use shell::{CommandSpec, ShellCommand, ShellError};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toml::Value;

use crate::job::{Command, Job, JobError, Runner, TaskGroup};

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("failed to read plan {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse plan")]
    Parse(#[from] toml::de::Error),

    #[error("{context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{context}: missing required field '{field}'")]
    MissingField {
        context: String,
        field: &'static str,
    },

    #[error("no job named '{0}' in plan")]
    UnknownJob(String),

    #[error(transparent)]
    Job(#[from] JobError),
}

/// One task group of a plan job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub serial: bool,
    pub commands: Vec<CommandSpec>,
}

impl GroupSpec {
    fn into_group(self) -> TaskGroup {
        let commands = self
            .commands
            .into_iter()
            .map(|spec| Box::new(ShellCommand::new(spec)) as Box<dyn Command>)
            .collect();
        TaskGroup::new(commands, self.serial)
    }
}

/// One job of a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub work_folder: Option<String>,
    pub groups: Vec<GroupSpec>,
}

impl JobSpec {
    /// Create the job through `runner` and fill in its groups
    pub fn build(&self, runner: &Runner) -> Result<Job, PlanError> {
        let mut job = match &self.work_folder {
            Some(folder) => runner.job_in(&self.name, folder)?,
            None => runner.job(&self.name)?,
        };

        for group in &self.groups {
            job.add_group(group.clone().into_group());
        }

        Ok(job)
    }
}

/// All jobs declared in a plan, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub jobs: Vec<JobSpec>,
}

impl Plan {
    pub fn from_file(path: &Path) -> Result<Self, PlanError> {
        let content = fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, PlanError> {
        let root: Value = toml::from_str(content)?;
        Self::from_value(&root)
    }

    pub fn from_value(root: &Value) -> Result<Self, PlanError> {
        let jobs = match root.get("job") {
            None => Vec::new(),
            Some(value) => expect_array(value, "job")?
                .iter()
                .enumerate()
                .map(|(index, job)| parse_job(job, index))
                .collect::<Result<_, _>>()?,
        };
        Ok(Self { jobs })
    }

    /// Build jobs through `runner`; an empty `only` selects every job
    pub fn build(&self, runner: &Runner, only: &[String]) -> Result<Vec<Job>, PlanError> {
        for name in only {
            if !self.jobs.iter().any(|job| &job.name == name) {
                return Err(PlanError::UnknownJob(name.clone()));
            }
        }

        self.jobs
            .iter()
            .filter(|spec| only.is_empty() || only.contains(&spec.name))
            .map(|spec| spec.build(runner))
            .collect()
    }
}

/// Register one command given as a plan value.
///
/// Fails with [`PlanError::TypeMismatch`] if `value` is not a command table;
/// the job is left unchanged.
pub fn add_command_value(job: &mut Job, value: &Value) -> Result<(), PlanError> {
    let context = format!("job '{}' command", job.name());
    let spec = parse_command(value, &context)?;
    job.add_command(ShellCommand::new(spec));
    Ok(())
}

/// Register a group of commands given as a plan value.
///
/// Fails with [`PlanError::TypeMismatch`] if `commands` is not an array or any
/// entry is not a command table; the job is left unchanged.
pub fn add_command_group_value(
    job: &mut Job,
    commands: &Value,
    serial: bool,
) -> Result<(), PlanError> {
    let context = format!("job '{}' group", job.name());
    let commands = parse_commands(commands, &context)?;
    job.add_group(GroupSpec { serial, commands }.into_group());
    Ok(())
}

fn parse_job(value: &Value, index: usize) -> Result<JobSpec, PlanError> {
    let context = format!("job[{}]", index);
    let table = expect_table(value, &context)?;

    let name = required_str(table, "name", &context)?.to_string();
    let context = format!("job '{}'", name);

    let work_folder = optional_str(table, "work_folder", &context)?.map(str::to_string);

    let mut groups = Vec::new();

    if let Some(commands) = table.get("commands") {
        for spec in parse_commands(commands, &format!("{} commands", context))? {
            groups.push(GroupSpec {
                serial: true,
                commands: vec![spec],
            });
        }
    }

    if let Some(value) = table.get("groups") {
        for (index, group) in expect_array(value, &format!("{} groups", context))?
            .iter()
            .enumerate()
        {
            groups.push(parse_group(group, &format!("{} group[{}]", context, index))?);
        }
    }

    Ok(JobSpec {
        name,
        work_folder,
        groups,
    })
}

fn parse_group(value: &Value, context: &str) -> Result<GroupSpec, PlanError> {
    let table = expect_table(value, context)?;

    let serial = match table.get("serial") {
        None => true,
        Some(Value::Boolean(serial)) => *serial,
        Some(other) => return Err(mismatch(context, "a boolean 'serial'", other)),
    };

    let commands = match table.get("commands") {
        Some(commands) => parse_commands(commands, context)?,
        None => {
            return Err(PlanError::MissingField {
                context: context.to_string(),
                field: "commands",
            })
        }
    };

    Ok(GroupSpec { serial, commands })
}

fn parse_commands(value: &Value, context: &str) -> Result<Vec<CommandSpec>, PlanError> {
    expect_array(value, context)?
        .iter()
        .enumerate()
        .map(|(index, command)| parse_command(command, &format!("{} command[{}]", context, index)))
        .collect()
}

fn parse_command(value: &Value, context: &str) -> Result<CommandSpec, PlanError> {
    let table = expect_table(value, context)?;

    let mut spec = CommandSpec::new(required_str(table, "run", context)?);

    if let Some(name) = optional_str(table, "name", context)? {
        spec.name = name.to_string();
    }

    spec.incremental = match table.get("incremental") {
        None => false,
        Some(Value::Boolean(flag)) => *flag,
        Some(other) => return Err(mismatch(context, "a boolean 'incremental'", other)),
    };

    spec.timeout_secs = match table.get("timeout_secs") {
        None => None,
        Some(Value::Integer(secs)) if *secs > 0 => Some(*secs as u64),
        Some(other) => return Err(mismatch(context, "a positive integer 'timeout_secs'", other)),
    };

    if let Some(env) = table.get("env") {
        let env = expect_table(env, &format!("{} env", context))?;
        let mut vars = BTreeMap::new();
        for (key, value) in env {
            match value {
                Value::String(s) => {
                    vars.insert(key.clone(), s.clone());
                }
                other => return Err(mismatch(context, "string environment values", other)),
            }
        }
        spec.env = vars;
    }

    Ok(spec)
}

fn expect_array<'v>(value: &'v Value, context: &str) -> Result<&'v Vec<Value>, PlanError> {
    value
        .as_array()
        .ok_or_else(|| mismatch(context, "an array", value))
}

fn expect_table<'v>(value: &'v Value, context: &str) -> Result<&'v toml::Table, PlanError> {
    value
        .as_table()
        .ok_or_else(|| mismatch(context, "a table", value))
}

fn required_str<'v>(
    table: &'v toml::Table,
    field: &'static str,
    context: &str,
) -> Result<&'v str, PlanError> {
    optional_str(table, field, context)?.ok_or_else(|| PlanError::MissingField {
        context: context.to_string(),
        field,
    })
}

fn optional_str<'v>(
    table: &'v toml::Table,
    field: &'static str,
    context: &str,
) -> Result<Option<&'v str>, PlanError> {
    match table.get(field) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(mismatch(context, "a string", other)),
    }
}

fn mismatch(context: &str, expected: &'static str, found: &Value) -> PlanError {
    PlanError::TypeMismatch {
        context: context.to_string(),
        expected,
        found: found.type_str(),
    }
}
