//! Turns resolved settings into the ordered list of jobs a command runs.

use std::path::{Path, PathBuf};

use crate::config::BackupSettings;
use crate::errors::{AppError, Result};

/// What the user asked for. Decides which of a job's directories is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Backup,
    Snapshot,
    Restore,
    SnapshotRestore,
}

impl Operation {
    pub fn is_restore(&self) -> bool {
        matches!(self, Operation::Restore | Operation::SnapshotRestore)
    }

    fn uses_snapshots(&self) -> bool {
        matches!(self, Operation::Snapshot | Operation::SnapshotRestore)
    }

    /// Name of the command this operation is exposed as.
    pub fn script_name(&self, label: &str) -> String {
        match self {
            Operation::Backup => label.to_string(),
            Operation::Snapshot => format!("{}-snapshot", label),
            Operation::Restore => format!("{}-restore", label),
            Operation::SnapshotRestore => format!("{}-snapshotrestore", label),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Operation::Backup => "incremental (or full, if configured) backup of all filestorages and blobs",
            Operation::Snapshot => "full backup into the snapshot location",
            Operation::Restore => "restore the latest (or dated) backup",
            Operation::SnapshotRestore => "restore the latest (or dated) snapshot",
        }
    }
}

/// Entry points enabled by the settings, in the order they are documented.
pub fn entry_points(settings: &BackupSettings) -> Vec<Operation> {
    let mut ops = vec![Operation::Backup, Operation::Snapshot, Operation::Restore];
    if settings.enable_snapshotrestore {
        ops.push(Operation::SnapshotRestore);
    }
    ops
}

/// Blob storage paired with a filestorage job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobPair {
    pub source: PathBuf,
    pub backup_dir: PathBuf,
    pub snapshot_dir: PathBuf,
}

impl BlobPair {
    pub fn directory(&self, op: Operation) -> &Path {
        if op.uses_snapshots() {
            &self.snapshot_dir
        } else {
            &self.backup_dir
        }
    }
}

/// One filestorage (and maybe its blobs) to back up or restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// `None` for the primary filestorage.
    pub label: Option<String>,
    /// `None` when only blobs are handled.
    pub datafs: Option<PathBuf>,
    pub backup_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub blobs: Option<BlobPair>,
    pub keep: u32,
}

impl Job {
    pub fn name(&self) -> &str {
        self.label.as_deref().unwrap_or("main")
    }

    pub fn directory(&self, op: Operation) -> &Path {
        if op.uses_snapshots() {
            &self.snapshot_dir
        } else {
            &self.backup_dir
        }
    }
}

/// Plans the jobs for `settings`.
///
/// Additional filestorages come first, in configured order, and the primary
/// one last: a catalog that is older than the data it indexes is a nuisance,
/// one that is newer points at records that do not exist.
pub fn plan(settings: &BackupSettings) -> Result<Vec<Job>> {
    let backup_blobs = settings.backup_blobs.unwrap_or(settings.blob_storage.is_some());

    if settings.only_blobs && !backup_blobs {
        return Err(AppError::Config(
            "only_blobs is set but backup_blobs is false: there would be nothing to back up".to_string(),
        ));
    }

    let blobs = if backup_blobs {
        let source = settings.blob_storage.clone().ok_or_else(|| {
            AppError::Config(
                "backup_blobs is set but no blob storage location could be found; set blob_storage".to_string(),
            )
        })?;
        Some(BlobPair {
            source,
            backup_dir: settings.blob_backup_location.clone(),
            snapshot_dir: settings.blob_snapshot_location.clone(),
        })
    } else {
        None
    };

    let mut jobs = Vec::with_capacity(settings.additional_filestorages.len() + 1);

    if !settings.only_blobs {
        let storage_dir = settings.datafs.parent().unwrap_or_else(|| Path::new("/"));
        for name in &settings.additional_filestorages {
            jobs.push(Job {
                label: Some(name.clone()),
                datafs: Some(storage_dir.join(format!("{}.fs", name))),
                backup_dir: suffixed(&settings.location, name),
                snapshot_dir: suffixed(&settings.snapshot_location, name),
                blobs: None,
                keep: settings.keep,
            });
        }
    }

    jobs.push(Job {
        label: None,
        datafs: (!settings.only_blobs).then(|| settings.datafs.clone()),
        backup_dir: settings.location.clone(),
        snapshot_dir: settings.snapshot_location.clone(),
        blobs,
        keep: settings.keep,
    });

    Ok(jobs)
}

fn suffixed(dir: &Path, name: &str) -> PathBuf {
    let mut os = dir.as_os_str().to_os_string();
    os.push("_");
    os.push(name);
    PathBuf::from(os)
}
