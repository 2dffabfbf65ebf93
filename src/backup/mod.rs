mod logic;
pub(crate) mod retention;

use anyhow::Result;
use std::fmt;

use crate::blobs::BlobSync;
use crate::planner::{Job, Operation};
use crate::repozo::RepozoInvoker;

pub const HALT_BACKUP: &str = "Halting execution due to error; not backing up blobs.";
pub const HALT_RESTORE: &str = "Halting execution due to error; not restoring blobs.";

/// What happened to one half (filestorage or blobs) of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The job has nothing of this kind.
    NotConfigured,
    Done,
    Failed(String),
    Skipped(String),
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::NotConfigured => f.write_str("-"),
            StepOutcome::Done => f.write_str("ok"),
            StepOutcome::Failed(reason) => write!(f, "failed: {}", reason),
            StepOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub name: String,
    pub filestorage: StepOutcome,
    pub blobs: StepOutcome,
    /// Removal of old backups once the job's own steps are done.
    pub retention: StepOutcome,
    pub pruned: usize,
}

impl JobReport {
    pub fn new(job: &Job) -> Self {
        Self {
            name: job.name().to_string(),
            filestorage: StepOutcome::NotConfigured,
            blobs: StepOutcome::NotConfigured,
            retention: StepOutcome::NotConfigured,
            pruned: 0,
        }
    }

    pub fn failed(&self) -> bool {
        [&self.filestorage, &self.blobs, &self.retention]
            .iter()
            .any(|step| matches!(step, StepOutcome::Failed(_)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub jobs: Vec<JobReport>,
    /// Set when a restore stopped before running every job.
    pub halted: Option<String>,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        self.halted.is_some() || self.jobs.iter().any(JobReport::failed)
    }
}

/// Public entry point for the backup and snapshot commands.
pub fn run_backup_flow(
    jobs: &[Job],
    op: Operation,
    full: bool,
    invoker: &RepozoInvoker,
    blob_sync: &BlobSync,
) -> Result<BatchReport> {
    if op.is_restore() {
        anyhow::bail!("Backup flow started for a restore operation.");
    }
    // Snapshots are always full backups.
    let full = full || op == Operation::Snapshot;
    logic::perform_backup_orchestration(jobs, op, full, invoker, blob_sync)
}
