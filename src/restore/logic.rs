use anyhow::{Context, Result};
use std::fs;
use tracing::{error, info};

use super::RestoreOutcome;
use crate::backup::{BatchReport, HALT_RESTORE, JobReport, StepOutcome};
use crate::blobs::BlobSync;
use crate::planner::{BlobPair, Job, Operation};
use crate::repozo::RepozoInvoker;
use crate::utils::date::RestoreDate;
use crate::utils::prompt::Confirm;

/// Lists everything a restore of `jobs` overwrites.
fn confirmation_question(jobs: &[Job], date: Option<&RestoreDate>) -> String {
    let mut lines = vec!["This will replace the filestorage:".to_string()];
    for job in jobs {
        if let Some(datafs) = &job.datafs {
            lines.push(format!("    {}", datafs.display()));
        }
    }
    if lines.len() == 1 {
        lines.clear();
    }
    for job in jobs {
        if let Some(blobs) = &job.blobs {
            lines.push(format!("This will replace the blobstorage:\n    {}", blobs.source.display()));
        }
    }
    match date {
        Some(date) => lines.push(format!("The state as of {} will be restored.", date)),
        None => lines.push("The latest backup will be restored.".to_string()),
    }
    lines.push("Are you sure?".to_string());
    lines.join("\n")
}

/// Restores every job in order and stops at the first failure.
pub(super) fn perform_restore_orchestration(
    jobs: &[Job],
    op: Operation,
    date: Option<&RestoreDate>,
    invoker: &RepozoInvoker,
    blob_sync: &BlobSync,
    confirm: &dyn Confirm,
) -> Result<RestoreOutcome> {
    if !confirm.confirm(&confirmation_question(jobs, date))? {
        info!("Not restoring.");
        return Ok(RestoreOutcome::Declined);
    }

    let mut report = BatchReport::default();
    for job in jobs {
        let mut job_report = JobReport::new(job);

        if job.datafs.is_some() {
            if let Err(e) = restore_filestorage(job, op, date, invoker) {
                error!("ERROR: {:#}", e);
                job_report.filestorage = StepOutcome::Failed(format!("{:#}", e));
                if job.blobs.is_some() {
                    job_report.blobs = StepOutcome::Skipped(HALT_RESTORE.to_string());
                }
                error!("{}", HALT_RESTORE);
                report.halted = Some(HALT_RESTORE.to_string());
                report.jobs.push(job_report);
                break;
            }
            job_report.filestorage = StepOutcome::Done;
        }

        if let Some(blobs) = &job.blobs {
            if let Err(e) = restore_blobs(blobs, op, date, blob_sync) {
                error!("ERROR: {:#}", e);
                job_report.blobs = StepOutcome::Failed(format!("{:#}", e));
                report.halted = Some(format!("Blob restore of {} failed.", blobs.source.display()));
                report.jobs.push(job_report);
                break;
            }
            job_report.blobs = StepOutcome::Done;
        }

        report.jobs.push(job_report);
    }

    if report.halted.is_none() {
        info!("Restore of {} job(s) completed.", report.jobs.len());
    }
    Ok(RestoreOutcome::Completed(report))
}

fn restore_filestorage(job: &Job, op: Operation, date: Option<&RestoreDate>, invoker: &RepozoInvoker) -> Result<()> {
    if let Some(parent) = job.datafs.as_deref().and_then(|d| d.parent()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create filestorage directory: {}", parent.display()))?;
    }
    let output = invoker.invoke(job, op, false, date)?;
    if !output.success() {
        return Err(invoker.failure(&output).into());
    }
    Ok(())
}

fn restore_blobs(blobs: &BlobPair, op: Operation, date: Option<&RestoreDate>, blob_sync: &BlobSync) -> Result<()> {
    blob_sync.restore(blobs.directory(op), &blobs.source, date)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::run_restore_flow;
    use super::*;
    use crate::repozo::testing::{FakeRunner, arg_after};
    use crate::utils::logger::Verbosity;
    use crate::utils::prompt::Canned;
    use chrono::NaiveDateTime;
    use std::path::PathBuf;

    struct Site {
        root: tempfile::TempDir,
    }

    impl Site {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            fs::create_dir_all(root.path().join("var/blobstorage")).unwrap();
            fs::write(root.path().join("var/blobstorage/current.blob"), b"now").unwrap();
            Self { root }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.root.path().join(rel)
        }

        fn jobs(&self) -> Vec<Job> {
            vec![
                Job {
                    label: Some("catalog".to_string()),
                    datafs: Some(self.path("var/filestorage/catalog.fs")),
                    backup_dir: self.path("var/backups_catalog"),
                    snapshot_dir: self.path("var/snapshotbackups_catalog"),
                    blobs: None,
                    keep: 2,
                },
                Job {
                    label: None,
                    datafs: Some(self.path("var/filestorage/Data.fs")),
                    backup_dir: self.path("var/backups"),
                    snapshot_dir: self.path("var/snapshotbackups"),
                    blobs: Some(BlobPair {
                        source: self.path("var/blobstorage"),
                        backup_dir: self.path("var/backups/blobstorage"),
                        snapshot_dir: self.path("var/snapshotbackups/blobstorage"),
                    }),
                    keep: 2,
                },
            ]
        }

        /// Stores a blob snapshot holding a single `old.blob`.
        fn blob_snapshot(&self, dir: &str, stamp: &str) {
            let source = tempfile::tempdir().unwrap();
            fs::write(source.path().join("old.blob"), stamp.as_bytes()).unwrap();
            let taken_at = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d-%H-%M-%S").unwrap();
            BlobSync::new(false, Verbosity::default())
                .backup_at(source.path(), &self.path(dir), taken_at)
                .unwrap();
        }
    }

    fn invoker(runner: &FakeRunner) -> RepozoInvoker {
        RepozoInvoker::new(Box::new(runner.clone()), false, Verbosity::default())
    }

    #[test]
    fn test_declined_restore_touches_nothing() -> anyhow::Result<()> {
        let site = Site::new();
        site.blob_snapshot("var/backups/blobstorage", "2024-03-01-00-00-00");
        let runner = FakeRunner::default();
        let blob_sync = BlobSync::new(false, Verbosity::default());

        let outcome = run_restore_flow(
            &site.jobs(),
            Operation::Restore,
            None,
            &invoker(&runner),
            &blob_sync,
            &Canned(false),
        )?;

        assert_eq!(outcome, RestoreOutcome::Declined);
        assert!(runner.calls().is_empty());
        assert!(site.path("var/blobstorage/current.blob").exists());
        Ok(())
    }

    #[test]
    fn test_restore_runs_every_job_then_blobs() -> anyhow::Result<()> {
        let site = Site::new();
        site.blob_snapshot("var/backups/blobstorage", "2024-03-01-00-00-00");
        let runner = FakeRunner::default();
        let blob_sync = BlobSync::new(false, Verbosity::default());

        let outcome = run_restore_flow(
            &site.jobs(),
            Operation::Restore,
            None,
            &invoker(&runner),
            &blob_sync,
            &Canned(true),
        )?;

        let RestoreOutcome::Completed(report) = outcome else {
            panic!("restore was not confirmed");
        };
        assert!(!report.has_failures());
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(arg_after(&calls[0], "-r"), Some(site.path("var/backups_catalog").display().to_string()));
        assert_eq!(arg_after(&calls[1], "-o"), Some(site.path("var/filestorage/Data.fs").display().to_string()));
        assert!(site.path("var/blobstorage/old.blob").exists());
        assert!(!site.path("var/blobstorage/current.blob").exists());
        Ok(())
    }

    #[test]
    fn test_failure_halts_before_blobs_and_later_jobs() -> anyhow::Result<()> {
        let site = Site::new();
        site.blob_snapshot("var/snapshotbackups/blobstorage", "2024-03-01-00-00-00");
        let runner = FakeRunner::with_exit_codes(&[1]);
        let blob_sync = BlobSync::new(false, Verbosity::default());
        let date = RestoreDate::parse("2024-02-28")?;

        let outcome = run_restore_flow(
            &site.jobs(),
            Operation::SnapshotRestore,
            Some(&date),
            &invoker(&runner),
            &blob_sync,
            &Canned(true),
        )?;

        let RestoreOutcome::Completed(report) = outcome else {
            panic!("restore was not confirmed");
        };
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(arg_after(&runner.calls()[0], "-D"), Some("2024-02-28".to_string()));
        assert_eq!(report.halted.as_deref(), Some(HALT_RESTORE));
        assert_eq!(report.jobs.len(), 1);
        assert!(report.has_failures());
        assert!(site.path("var/blobstorage/current.blob").exists());
        Ok(())
    }

    #[test]
    fn test_dated_restore_picks_matching_blob_snapshot() -> anyhow::Result<()> {
        let site = Site::new();
        site.blob_snapshot("var/snapshotbackups/blobstorage", "2024-03-01-00-00-00");
        site.blob_snapshot("var/snapshotbackups/blobstorage", "2024-03-05-00-00-00");
        let runner = FakeRunner::default();
        let blob_sync = BlobSync::new(false, Verbosity::default());
        let date = RestoreDate::parse("2024-02-28")?;

        run_restore_flow(
            &site.jobs(),
            Operation::SnapshotRestore,
            Some(&date),
            &invoker(&runner),
            &blob_sync,
            &Canned(true),
        )?;

        assert_eq!(fs::read(site.path("var/blobstorage/old.blob"))?, b"2024-03-01-00-00-00");
        Ok(())
    }

    #[test]
    fn test_missing_blob_backups_halt_the_restore() -> anyhow::Result<()> {
        let site = Site::new();
        let runner = FakeRunner::default();
        let blob_sync = BlobSync::new(false, Verbosity::default());

        let outcome = run_restore_flow(
            &site.jobs(),
            Operation::Restore,
            None,
            &invoker(&runner),
            &blob_sync,
            &Canned(true),
        )?;

        let RestoreOutcome::Completed(report) = outcome else {
            panic!("restore was not confirmed");
        };
        assert!(report.halted.is_some());
        assert!(matches!(report.jobs[1].blobs, StepOutcome::Failed(_)));
        assert!(site.path("var/blobstorage/current.blob").exists());
        Ok(())
    }

    #[test]
    fn test_backup_then_restore_round_trip() -> anyhow::Result<()> {
        let site = Site::new();
        fs::create_dir_all(site.path("var/blobstorage/0x01"))?;
        fs::write(site.path("var/blobstorage/0x01/kept.blob"), b"kept")?;
        let jobs = site.jobs();
        let runner = FakeRunner::default();
        let invoker = invoker(&runner);
        let blob_sync = BlobSync::new(true, Verbosity::default());

        crate::backup::run_backup_flow(&jobs, Operation::Backup, false, &invoker, &blob_sync)?;
        fs::remove_file(site.path("var/blobstorage/current.blob"))?;
        fs::write(site.path("var/blobstorage/0x01/kept.blob"), b"overwritten")?;
        fs::write(site.path("var/blobstorage/new.blob"), b"new")?;

        run_restore_flow(&jobs, Operation::Restore, None, &invoker, &blob_sync, &Canned(true))?;

        assert_eq!(fs::read(site.path("var/blobstorage/current.blob"))?, b"now");
        assert_eq!(fs::read(site.path("var/blobstorage/0x01/kept.blob"))?, b"kept");
        assert!(!site.path("var/blobstorage/new.blob").exists());
        let calls = runner.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[3][0], "--recover");
        Ok(())
    }

    #[test]
    fn test_question_names_everything_replaced() {
        let site = Site::new();
        let question = confirmation_question(&site.jobs(), None);
        assert!(question.contains(&site.path("var/filestorage/catalog.fs").display().to_string()));
        assert!(question.contains(&site.path("var/filestorage/Data.fs").display().to_string()));
        assert!(question.contains("This will replace the blobstorage:"));
        assert!(question.ends_with("Are you sure?"));
    }
}
