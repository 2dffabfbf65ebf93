//! ZODB Backup Tool
//!
//! Provides CLI interface for filestorage and blob backup, snapshot and restore

// zodbbackup/src/main.rs
mod backup;
mod blobs;
mod config;
mod errors;
mod planner;
mod repozo;
mod restore;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

use backup::BatchReport;
use blobs::BlobSync;
use config::AppConfig;
use errors::AppError;
use planner::{Job, Operation};
use repozo::{ProcessRunner, RepozoInvoker};
use restore::RestoreOutcome;
use utils::date::RestoreDate;
use utils::logger::{self, Verbosity};
use utils::paths::PathResolver;
use utils::prompt::StdinConfirm;

#[derive(Parser)]
#[command(name = "zodbbackup", version, about = "Backup and restore ZODB filestorages and blob storage")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Back up every filestorage (and the blobs) into the backup location
    Backup,
    /// Make a full backup into the snapshot location
    Snapshot,
    /// Restore from the backup location
    Restore {
        /// Restore the state as of yyyy-mm-dd[-hh[-mm[-ss]]]
        date: Option<String>,
    },
    /// Restore from the snapshot location
    #[command(name = "snapshotrestore")]
    SnapshotRestore {
        /// Restore the state as of yyyy-mm-dd[-hh[-mm[-ss]]]
        date: Option<String>,
    },
    /// List the entry points this configuration provides
    Scripts,
}

/// Main entry point for the backup/restore tool
fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match run_app(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the run succeeded.
fn run_app(cli: Cli) -> Result<bool> {
    let app_config = AppConfig::load_from_json(&cli.config).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })?;

    let verbosity = Verbosity::new(cli.quiet, app_config.debug());
    logger::init(verbosity).context("Failed to initialize logging")?;

    let resolver = PathResolver::new(verbosity);
    let settings = app_config.settings(&resolver)?;

    let (op, date) = match &cli.command {
        Command::Scripts => {
            for op in planner::entry_points(&settings) {
                println!("{:<32} {}", op.script_name(&settings.label), op.description());
            }
            return Ok(true);
        }
        Command::Backup => (Operation::Backup, None),
        Command::Snapshot => (Operation::Snapshot, None),
        Command::Restore { date } => (Operation::Restore, date.as_deref()),
        Command::SnapshotRestore { date } => {
            if !settings.enable_snapshotrestore {
                return Err(AppError::Config("snapshotrestore is disabled by enable_snapshotrestore".to_string()).into());
            }
            (Operation::SnapshotRestore, date.as_deref())
        }
    };
    // Bad dates are rejected before anything is touched.
    let date = date.map(RestoreDate::parse).transpose()?;

    let jobs = planner::plan(&settings)?;
    let invoker = RepozoInvoker::new(
        Box::new(ProcessRunner::new(repozo_program(&jobs, &settings)?)),
        settings.gzip,
        verbosity,
    );
    let blob_sync = BlobSync::new(settings.gzip, verbosity);

    if op.is_restore() {
        let outcome = restore::run_restore_flow(&jobs, op, date.as_ref(), &invoker, &blob_sync, &StdinConfirm)
            .context("Restore process failed")?;
        match outcome {
            RestoreOutcome::Declined => Ok(true),
            RestoreOutcome::Completed(report) => Ok(summarize(&report)),
        }
    } else {
        let report = backup::run_backup_flow(&jobs, op, settings.full, &invoker, &blob_sync)
            .context("Backup process failed")?;
        Ok(summarize(&report))
    }
}

/// The repozo executable is only looked up when some job needs it.
fn repozo_program(jobs: &[Job], settings: &config::BackupSettings) -> Result<PathBuf> {
    if jobs.iter().any(|job| job.datafs.is_some()) {
        utils::find_repozo_executable(settings.repozo.as_deref(), &settings.buildout_dir)
    } else {
        Ok(PathBuf::from("repozo"))
    }
}

fn summarize(report: &BatchReport) -> bool {
    for job in &report.jobs {
        info!(
            "{}: filestorage {}, blobs {}, retention {}",
            job.name, job.filestorage, job.blobs, job.retention
        );
    }
    if let Some(reason) = &report.halted {
        warn!("Stopped early: {}", reason);
    }
    !report.has_failures()
}
