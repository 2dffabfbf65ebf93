use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{error, info};

use super::{BatchReport, HALT_BACKUP, JobReport, StepOutcome, retention};
use crate::blobs::BlobSync;
use crate::planner::{BlobPair, Job, Operation};
use crate::repozo::RepozoInvoker;

/// Runs every job in order. A failing tool run only blocks its own job's blob
/// step; retention runs last and its failures are reported on their own.
pub(super) fn perform_backup_orchestration(
    jobs: &[Job],
    op: Operation,
    full: bool,
    invoker: &RepozoInvoker,
    blob_sync: &BlobSync,
) -> Result<BatchReport> {
    let mut report = BatchReport::default();

    for job in jobs {
        let mut job_report = JobReport::new(job);

        if job.datafs.is_some() {
            job_report.filestorage = outcome(backup_filestorage(job, op, full, invoker));
        }

        if let Some(blobs) = &job.blobs {
            if matches!(job_report.filestorage, StepOutcome::Failed(_)) {
                error!("{}", HALT_BACKUP);
                job_report.blobs = StepOutcome::Skipped(HALT_BACKUP.to_string());
            } else {
                job_report.blobs = outcome(backup_blobs(blobs, op, blob_sync));
            }
        }

        if job_report.filestorage == StepOutcome::Done {
            apply_retention(&mut job_report, job.directory(op), job.keep);
        }
        if let Some(blobs) = job.blobs.as_ref().filter(|_| job_report.blobs == StepOutcome::Done) {
            apply_retention(&mut job_report, blobs.directory(op), job.keep);
        }

        report.jobs.push(job_report);
    }

    let failed = report.jobs.iter().filter(|j| j.failed()).count();
    if failed == 0 {
        info!("Backup of {} job(s) completed.", report.jobs.len());
    } else {
        error!("{} of {} backup job(s) failed.", failed, report.jobs.len());
    }
    Ok(report)
}

fn outcome(result: Result<()>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Done,
        Err(e) => {
            error!("ERROR: {:#}", e);
            StepOutcome::Failed(format!("{:#}", e))
        }
    }
}

fn apply_retention(job_report: &mut JobReport, dir: &Path, keep: u32) {
    match retention::prune(dir, keep) {
        Ok(pruned) => {
            job_report.pruned += pruned;
            if !matches!(job_report.retention, StepOutcome::Failed(_)) {
                job_report.retention = StepOutcome::Done;
            }
        }
        Err(e) => {
            error!("ERROR: removing old backups from {} failed: {:#}", dir.display(), e);
            job_report.retention = StepOutcome::Failed(format!("{:#}", e));
        }
    }
}

fn backup_filestorage(job: &Job, op: Operation, full: bool, invoker: &RepozoInvoker) -> Result<()> {
    let dir = job.directory(op);
    fs::create_dir_all(dir).with_context(|| format!("Failed to create backup directory: {}", dir.display()))?;

    let output = invoker.invoke(job, op, full, None)?;
    if !output.success() {
        return Err(invoker.failure(&output).into());
    }
    Ok(())
}

fn backup_blobs(blobs: &BlobPair, op: Operation, blob_sync: &BlobSync) -> Result<()> {
    blob_sync.backup(&blobs.source, blobs.directory(op))?;
    Ok(())
}
