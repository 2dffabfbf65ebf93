use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

use crate::utils::logger::Verbosity;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub copied: usize,
    pub removed: usize,
}

fn relative_entries(root: &Path) -> Result<Vec<(PathBuf, bool)>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk directory: {}", root.display()))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("Failed to strip prefix {} from {}", root.display(), entry.path().display()))?
            .to_path_buf();
        entries.push((relative, entry.file_type().is_dir()));
    }
    Ok(entries)
}

/// Recursively copies `src` into `dst` (created if needed). Returns the
/// number of files copied.
pub fn copy_tree(src: &Path, dst: &Path, verbosity: Verbosity) -> Result<usize> {
    fs::create_dir_all(dst).with_context(|| format!("Failed to create directory: {}", dst.display()))?;

    let mut copied = 0;
    for (relative, is_dir) in relative_entries(src)? {
        let from = src.join(&relative);
        let to = dst.join(&relative);
        if is_dir {
            let blocked = fs::symlink_metadata(&to).map(|m| !m.is_dir()).unwrap_or(false);
            if blocked {
                fs::remove_file(&to).with_context(|| format!("Failed to replace file: {}", to.display()))?;
            }
            fs::create_dir_all(&to).with_context(|| format!("Failed to create directory: {}", to.display()))?;
            continue;
        }
        if to.is_dir() {
            fs::remove_dir_all(&to).with_context(|| format!("Failed to replace directory: {}", to.display()))?;
        }
        fs::copy(&from, &to)
            .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
        if verbosity.debug {
            trace!("Copied {}", relative.display());
        }
        copied += 1;
    }
    Ok(copied)
}

/// Makes `dst` hold exactly what `snapshot` holds: copies every file over and
/// removes whatever the snapshot does not contain.
pub fn sync_tree(snapshot: &Path, dst: &Path, verbosity: Verbosity) -> Result<SyncStats> {
    let copied = copy_tree(snapshot, dst, verbosity)?;

    let wanted: HashSet<PathBuf> = relative_entries(snapshot)?
        .into_iter()
        .map(|(relative, _)| relative)
        .collect();

    let mut stale: Vec<(PathBuf, bool)> = relative_entries(dst)?
        .into_iter()
        .filter(|(relative, _)| !wanted.contains(relative))
        .collect();
    // Deepest first, so a directory is emptied before it goes.
    stale.sort_by_key(|(relative, _)| std::cmp::Reverse(relative.components().count()));

    let mut removed = 0;
    for (relative, is_dir) in stale {
        let path = dst.join(&relative);
        if !path.exists() && !path.is_symlink() {
            continue;
        }
        if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        }
        .with_context(|| format!("Failed to remove stale blob {}", path.display()))?;
        if verbosity.debug {
            trace!("Removed {}", relative.display());
        }
        removed += 1;
    }

    Ok(SyncStats { copied, removed })
}
