mod logic;

use anyhow::Result;

use crate::backup::BatchReport;
use crate::blobs::BlobSync;
use crate::planner::{Job, Operation};
use crate::repozo::RepozoInvoker;
use crate::utils::date::RestoreDate;
use crate::utils::prompt::Confirm;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The user did not answer `yes`; nothing was touched.
    Declined,
    Completed(BatchReport),
}

/// Public entry point for the restore and snapshotrestore commands.
pub fn run_restore_flow(
    jobs: &[Job],
    op: Operation,
    date: Option<&RestoreDate>,
    invoker: &RepozoInvoker,
    blob_sync: &BlobSync,
    confirm: &dyn Confirm,
) -> Result<RestoreOutcome> {
    if !op.is_restore() {
        anyhow::bail!("Restore flow started for a backup operation.");
    }
    logic::perform_restore_orchestration(jobs, op, date, invoker, blob_sync, confirm)
}
