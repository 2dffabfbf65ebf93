// zodbbackup/src/repozo/mod.rs
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error, info};

use crate::errors::AppError;
use crate::planner::{Job, Operation};
use crate::utils::date::RestoreDate;
use crate::utils::logger::Verbosity;

/// Captured result of one tool run.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "no exit status (terminated by signal)".to_string(),
        }
    }
}

/// Runs the external backup tool with the given arguments and waits for it.
pub trait ToolRunner {
    fn program(&self) -> String;
    fn run(&self, args: &[OsString]) -> Result<ToolOutput>;
}

pub struct ProcessRunner {
    program: PathBuf,
}

impl ProcessRunner {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl ToolRunner for ProcessRunner {
    fn program(&self) -> String {
        self.program.display().to_string()
    }

    fn run(&self, args: &[OsString]) -> Result<ToolOutput> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute {}", self.program.display()))?;

        Ok(ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Arguments for `repozo --backup`.
pub fn backup_arguments(datafs: &Path, repository: &Path, full: bool, verbose: bool, gzip: bool) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--backup".into(),
        "-f".into(),
        datafs.into(),
        "-r".into(),
        repository.into(),
    ];
    if full {
        args.push("-F".into());
    } else {
        debug!("Not making a full backup: if nothing changed since the last backup, no new file is written.");
    }
    if verbose {
        args.push("--verbose".into());
    }
    if gzip {
        args.push("--gzip".into());
    }
    args
}

/// Arguments for `repozo --recover`.
pub fn restore_arguments(datafs: &Path, repository: &Path, date: Option<&RestoreDate>, verbose: bool) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--recover".into(),
        "-o".into(),
        datafs.into(),
        "-r".into(),
        repository.into(),
    ];
    if let Some(date) = date {
        args.push("-D".into());
        args.push(date.raw.as_str().into());
    }
    if verbose {
        args.push("--verbose".into());
    }
    args
}

fn display_args(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drives repozo for one job at a time.
pub struct RepozoInvoker {
    runner: Box<dyn ToolRunner>,
    gzip: bool,
    verbosity: Verbosity,
}

impl RepozoInvoker {
    pub fn new(runner: Box<dyn ToolRunner>, gzip: bool, verbosity: Verbosity) -> Self {
        Self {
            runner,
            gzip,
            verbosity,
        }
    }

    /// Runs the filestorage step of `job` for `op`. Jobs without a
    /// filestorage are a caller error.
    ///
    /// Spawn failures are errors; a non-zero exit is returned as output so the
    /// caller decides what it halts.
    pub fn invoke(&self, job: &Job, op: Operation, full: bool, date: Option<&RestoreDate>) -> Result<ToolOutput> {
        let datafs = job
            .datafs
            .as_deref()
            .with_context(|| format!("Job '{}' has no filestorage to process", job.name()))?;
        let repository = job.directory(op);
        let verbose = self.verbosity.debug;

        let args = if op.is_restore() {
            info!("Please wait while restoring database file: {} to {}", repository.display(), datafs.display());
            restore_arguments(datafs, repository, date, verbose)
        } else {
            info!("Please wait while backing up database file: {} to {}", datafs.display(), repository.display());
            backup_arguments(datafs, repository, full, verbose, self.gzip)
        };
        debug!("{} arguments used: {}", self.runner.program(), display_args(&args));

        let output = self.runner.run(&args)?;
        debug!("repozo command executed.");

        if verbose && !output.stdout.trim().is_empty() {
            debug!("{}", output.stdout.trim_end());
        }
        if !output.success() {
            error!(
                "ERROR: repozo failed for '{}' ({}): {}",
                job.name(),
                output.status_text(),
                output.stderr.trim_end()
            );
        }
        Ok(output)
    }

    /// Turns a failed run into the error the caller reports.
    pub fn failure(&self, output: &ToolOutput) -> AppError {
        AppError::Tool {
            tool: self.runner.program(),
            status: output.status_text(),
            stderr: output.stderr.trim().to_string(),
        }
    }
}
