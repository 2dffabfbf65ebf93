//! Blob storage backup and restore.
//!
//! Every backup is a complete snapshot named after its UTC creation time,
//! either a plain directory (`<ts>.blobs`) or a gzipped tarball
//! (`<ts>.blobs.tar.gz`).

pub(crate) mod archive;
pub(crate) mod copy;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::utils::date::RestoreDate;
use crate::utils::logger::Verbosity;
use copy::SyncStats;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

fn snapshot_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4}(?:-\d{2}){5})\.blobs(\.tar\.gz)?$").expect("static snapshot pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSnapshot {
    pub path: PathBuf,
    pub taken_at: NaiveDateTime,
    pub archived: bool,
}

impl BlobSnapshot {
    fn from_name(dir: &Path, name: &str) -> Option<Self> {
        let caps = snapshot_pattern().captures(name)?;
        let taken_at = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            path: dir.join(name),
            taken_at,
            archived: caps.get(2).is_some(),
        })
    }
}

/// Snapshots in `dir`, oldest first. A missing directory has none.
pub fn list_snapshots(dir: &Path) -> Result<Vec<BlobSnapshot>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut snapshots = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read blob backup directory: {}", dir.display()))? {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
        if let Some(snapshot) = BlobSnapshot::from_name(dir, &entry.file_name().to_string_lossy()) {
            snapshots.push(snapshot);
        }
    }
    snapshots.sort_by(|a, b| a.taken_at.cmp(&b.taken_at).then(a.archived.cmp(&b.archived)));
    Ok(snapshots)
}

/// Picks the snapshot to restore.
///
/// Without a cutoff: the latest. With one: the first snapshot taken at or
/// after the cutoff, falling back to the latest when all are older. This only
/// approximates the date-bounded recovery of the filestorage; the snapshot
/// picked may be a little newer than the recovered database.
pub fn select_snapshot(snapshots: &[BlobSnapshot], cutoff: Option<NaiveDateTime>) -> Option<&BlobSnapshot> {
    match cutoff {
        None => snapshots.last(),
        Some(cutoff) => snapshots
            .iter()
            .find(|s| s.taken_at >= cutoff)
            .or_else(|| {
                let latest = snapshots.last();
                if let Some(latest) = latest {
                    warn!(
                        "No blob backup taken after {}; using the latest one from {}.",
                        cutoff, latest.taken_at
                    );
                }
                latest
            }),
    }
}

fn discard_partial(partial: &Path) {
    let removed = match fs::symlink_metadata(partial) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(partial),
        Ok(_) => fs::remove_file(partial),
        Err(_) => return,
    };
    if let Err(e) = removed {
        warn!("Could not remove incomplete blob backup {}: {}", partial.display(), e);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRestoreReport {
    pub snapshot: PathBuf,
    pub stats: SyncStats,
}

pub struct BlobSync {
    gzip: bool,
    verbosity: Verbosity,
}

impl BlobSync {
    pub fn new(gzip: bool, verbosity: Verbosity) -> Self {
        Self { gzip, verbosity }
    }

    /// Writes a new snapshot of `source` into `dest_dir`, stamped now.
    pub fn backup(&self, source: &Path, dest_dir: &Path) -> Result<PathBuf> {
        self.backup_at(source, dest_dir, Utc::now().naive_utc())
    }

    pub fn backup_at(&self, source: &Path, dest_dir: &Path, taken_at: NaiveDateTime) -> Result<PathBuf> {
        if !source.is_dir() {
            anyhow::bail!("Blob storage directory does not exist: {}", source.display());
        }
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("Failed to create blob backup directory: {}", dest_dir.display()))?;

        let stamp = taken_at.format(TIMESTAMP_FORMAT).to_string();
        let plain = dest_dir.join(format!("{}.blobs", stamp));
        let archived = dest_dir.join(format!("{}.blobs.tar.gz", stamp));
        for existing in [&plain, &archived] {
            if existing.exists() {
                return Err(AppError::WouldOverwrite(existing.clone()).into());
            }
        }

        info!("Please wait while backing up blobs from {} to {}", source.display(), dest_dir.display());
        let (partial, target) = if self.gzip {
            (dest_dir.join(format!("{}.blobs.tar.gz.partial", stamp)), archived)
        } else {
            (dest_dir.join(format!("{}.blobs.partial", stamp)), plain)
        };
        let written = if self.gzip {
            archive::create_tar_gz_archive(source, &partial)
        } else {
            copy::copy_tree(source, &partial, self.verbosity)
        };
        let files = match written {
            Ok(files) => files,
            Err(e) => {
                discard_partial(&partial);
                return Err(e);
            }
        };
        fs::rename(&partial, &target).with_context(|| format!("Failed to move {} into place", target.display()))?;
        debug!("Blob backup {} holds {} file(s).", target.display(), files);
        Ok(target)
    }

    /// Restores `dest` from the snapshot in `backup_dir` matching `cutoff`.
    pub fn restore(&self, backup_dir: &Path, dest: &Path, cutoff: Option<&RestoreDate>) -> Result<BlobRestoreReport> {
        let snapshots = list_snapshots(backup_dir)?;
        let snapshot = select_snapshot(&snapshots, cutoff.map(|d| d.at))
            .ok_or_else(|| AppError::NoBackups(backup_dir.to_path_buf()))?;

        info!("Please wait while restoring blobs from {} to {}", snapshot.path.display(), dest.display());
        let stats = if snapshot.archived {
            let unpacked = tempfile::Builder::new()
                .prefix("blobrestore")
                .tempdir()
                .context("Failed to create temporary directory for blob restore")?;
            archive::extract_tar_gz_archive(&snapshot.path, unpacked.path())?;
            copy::sync_tree(unpacked.path(), dest, self.verbosity)?
        } else {
            copy::sync_tree(&snapshot.path, dest, self.verbosity)?
        };
        info!(
            "Restored {} blob file(s), removed {} stale entries.",
            stats.copied, stats.removed
        );

        Ok(BlobRestoreReport {
            snapshot: snapshot.path.clone(),
            stats,
        })
    }
}
