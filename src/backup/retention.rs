// zodbbackup/src/backup/retention.rs
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

// Declaration order is the tie-break order: a full backup goes before the
// files written next to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileKind {
    /// Starts a generation.
    Full,
    /// Only valid on top of the preceding full backup.
    Incremental,
    /// Index and checksum files written next to a backup.
    Auxiliary,
}

// Longer suffixes first: "x.deltafs.gz" must not be read as "x.fs.gz".
const SUFFIXES: &[(&str, FileKind)] = &[
    (".deltafs.gz", FileKind::Incremental),
    (".deltafsz", FileKind::Incremental),
    (".deltafs", FileKind::Incremental),
    (".blobs.tar.gz", FileKind::Full),
    (".blobs", FileKind::Full),
    (".fs.gz", FileKind::Full),
    (".fsz", FileKind::Full),
    (".fs", FileKind::Full),
    (".dat", FileKind::Auxiliary),
    (".index", FileKind::Auxiliary),
];

/// Kind and stem (name without the backup suffix) of a backup directory
/// entry; `None` for anything that is not ours.
pub fn classify(name: &str) -> Option<(FileKind, &str)> {
    SUFFIXES.iter().find_map(|(suffix, kind)| {
        name.strip_suffix(suffix)
            .filter(|stem| !stem.is_empty())
            .map(|stem| (*kind, stem))
    })
}

#[derive(Debug, Clone)]
pub struct BackupFile {
    pub path: PathBuf,
    pub name: String,
    pub stem: String,
    pub kind: FileKind,
    pub modified: SystemTime,
}

/// One full backup and everything depending on it.
pub type Generation = Vec<BackupFile>;

/// Lists recognised backup entries, oldest first. Equal mtimes are common
/// for a full backup and its `.dat`, so ties go by stem, then kind.
pub fn scan_backup_dir(dir: &Path) -> Result<Vec<BackupFile>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read backup directory: {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((kind, stem)) = classify(&name) else {
            continue;
        };
        let stem = stem.to_string();
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to read modification time of {}", entry.path().display()))?;
        files.push(BackupFile {
            path: entry.path(),
            name,
            stem,
            kind,
            modified,
        });
    }
    files.sort_by(|a, b| {
        a.modified
            .cmp(&b.modified)
            .then_with(|| a.stem.cmp(&b.stem))
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(files)
}

/// Splits chronologically ordered files into generations. Every full backup
/// opens a new one; files before the first full backup form a generation of
/// their own.
pub fn group_generations(files: Vec<BackupFile>) -> Vec<Generation> {
    let mut generations: Vec<Generation> = Vec::new();
    for file in files {
        match generations.last_mut() {
            Some(current) if file.kind != FileKind::Full => current.push(file),
            _ => generations.push(vec![file]),
        }
    }
    generations
}

/// Removes every generation older than the `keep` newest ones and returns how
/// many entries were deleted. `keep == 0` keeps everything.
pub fn prune(dir: &Path, keep: u32) -> Result<usize> {
    if keep == 0 {
        debug!("Value of 'keep' is 0, we don't want to remove anything.");
        return Ok(0);
    }
    if !dir.is_dir() {
        debug!("Backup directory {} does not exist, nothing to clean up.", dir.display());
        return Ok(0);
    }

    let files = scan_backup_dir(dir)?;
    debug!("Found {} backup file(s) in {}.", files.len(), dir.display());
    let generations = group_generations(files);

    let keep = keep as usize;
    if generations.len() <= keep {
        debug!(
            "Not removing backups: {} full backup(s) <= maximum of {}.",
            generations.len(),
            keep
        );
        return Ok(0);
    }

    let expired = generations.len() - keep;
    let mut deleted = 0;
    for generation in &generations[..expired] {
        for file in generation {
            remove_entry(&file.path)?;
            debug!("Deleted {}.", file.path.display());
            deleted += 1;
        }
    }

    info!(
        "Removed {} file(s) belonging to old backups, the latest {} full backups have been kept.",
        deleted, keep
    );
    Ok(deleted)
}

fn remove_entry(path: &Path) -> Result<()> {
    let is_dir = fs::symlink_metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .is_dir();
    if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
    .with_context(|| format!("Failed to remove old backup {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    /// Writes backup entries whose mtimes follow the given order, 10s apart.
    struct Fixture {
        dir: tempfile::TempDir,
        next: SystemTime,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                next: SystemTime::now() - Duration::from_secs(100_000),
            }
        }

        fn add(&mut self, name: &str) {
            let path = self.dir.path().join(name);
            if name.ends_with(".blobs") {
                fs::create_dir_all(path.join("0x00")).unwrap();
                fs::write(path.join("0x00").join("blob"), b"data").unwrap();
            } else {
                fs::write(&path, b"dummycontents").unwrap();
            }
            File::open(&path).unwrap().set_modified(self.next).unwrap();
            self.next += Duration::from_secs(10);
        }

        /// Adds several entries sharing one mtime.
        fn add_together(&mut self, names: &[&str]) {
            for name in names {
                let path = self.dir.path().join(name);
                fs::write(&path, b"dummycontents").unwrap();
                File::open(&path).unwrap().set_modified(self.next).unwrap();
            }
            self.next += Duration::from_secs(10);
        }

        fn names(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }

        fn prune(&self, keep: u32) -> usize {
            prune(self.dir.path(), keep).unwrap()
        }
    }

    #[test]
    fn test_classify_suffixes() {
        assert_eq!(classify("2024-01-01-00-00-00.fs"), Some((FileKind::Full, "2024-01-01-00-00-00")));
        assert_eq!(classify("2024-01-01-00-00-00.fsz"), Some((FileKind::Full, "2024-01-01-00-00-00")));
        assert_eq!(classify("3.fs.gz"), Some((FileKind::Full, "3")));
        assert_eq!(classify("3.deltafs"), Some((FileKind::Incremental, "3")));
        assert_eq!(classify("3.deltafsz"), Some((FileKind::Incremental, "3")));
        assert_eq!(classify("3.deltafs.gz"), Some((FileKind::Incremental, "3")));
        assert_eq!(classify("3.dat"), Some((FileKind::Auxiliary, "3")));
        assert_eq!(classify("3.blobs"), Some((FileKind::Full, "3")));
        assert_eq!(classify("3.blobs.tar.gz"), Some((FileKind::Full, "3")));
        assert_eq!(classify("blobstorage"), None);
        assert_eq!(classify("3.blobs.partial"), None);
        assert_eq!(classify(".fs"), None);
    }

    #[test]
    fn test_keep_zero_is_a_no_op() {
        let mut fx = Fixture::new();
        for name in ["1.fs", "2.fs", "3.fs", "4.fs"] {
            fx.add(name);
        }
        assert_eq!(fx.prune(0), 0);
        assert_eq!(fx.names().len(), 4);
    }

    #[test]
    fn test_empty_and_missing_directories() {
        let fx = Fixture::new();
        assert_eq!(fx.prune(1), 0);
        assert_eq!(prune(&fx.dir.path().join("missing"), 1).unwrap(), 0);
    }

    #[test]
    fn test_single_backup_is_kept() {
        let mut fx = Fixture::new();
        fx.add("1.fs");
        assert_eq!(fx.prune(1), 0);
        assert_eq!(fx.names(), vec!["1.fs"]);
    }

    #[test]
    fn test_only_newest_full_backups_survive() {
        let mut fx = Fixture::new();
        fx.add("1.fs");
        fx.add("2.fs");
        assert_eq!(fx.prune(1), 1);
        assert_eq!(fx.names(), vec!["2.fs"]);

        fx.add("3.fs");
        fx.add("4.fs");
        fx.add("5.fs");
        assert_eq!(fx.prune(1), 3);
        assert_eq!(fx.names(), vec!["5.fs"]);
    }

    #[test]
    fn test_incrementals_go_with_their_full_backup() {
        let mut fx = Fixture::new();
        fx.add("5.fs");
        fx.add("5-something.deltafs");
        fx.add("5.dat");
        fx.add("6.fs");
        fx.add("6-something.deltafs");
        assert_eq!(fx.prune(1), 3);
        assert_eq!(fx.names(), vec!["6-something.deltafs", "6.fs"]);
    }

    #[test]
    fn test_keep_two_generations() {
        let mut fx = Fixture::new();
        for n in 7..=9 {
            fx.add(&format!("{}.fsz", n));
            fx.add(&format!("{}-something.deltafsz", n));
            fx.add(&format!("{}.dat", n));
        }
        assert_eq!(fx.prune(2), 3);
        assert_eq!(
            fx.names(),
            vec!["8-something.deltafsz", "8.dat", "8.fsz", "9-something.deltafsz", "9.dat", "9.fsz"]
        );

        // A compressed full backup opens a generation like any other.
        fx.add("10.fs.gz");
        assert_eq!(fx.prune(2), 3);
        assert_eq!(
            fx.names(),
            vec!["10.fs.gz", "9-something.deltafsz", "9.dat", "9.fsz"]
        );
    }

    #[test]
    fn test_three_fulls_keep_two_removes_oldest() {
        // Chronology comes from mtimes, not names: 2.fs is the oldest here.
        let mut fx = Fixture::new();
        fx.add("2.fs");
        fx.add("1.fs");
        fx.add("0.fs");
        assert_eq!(fx.prune(2), 1);
        assert_eq!(fx.names(), vec!["0.fs", "1.fs"]);
    }

    #[test]
    fn test_dat_with_same_mtime_stays_with_its_full_backup() {
        let mut fx = Fixture::new();
        fx.add_together(&["2024-01-01-00-00-00.fs", "2024-01-01-00-00-00.dat"]);
        fx.add_together(&["2024-01-02-00-00-00.fs", "2024-01-02-00-00-00.dat"]);
        assert_eq!(fx.prune(1), 2);
        assert_eq!(fx.names(), vec!["2024-01-02-00-00-00.dat", "2024-01-02-00-00-00.fs"]);
    }

    #[test]
    fn test_same_mtime_generations_follow_their_stems() {
        let mut fx = Fixture::new();
        fx.add_together(&["2024-01-01-00-00-00.dat", "2024-01-02-00-00-00.fs", "2024-01-01-00-00-00.fs"]);
        let generations = group_generations(scan_backup_dir(fx.dir.path()).unwrap());
        let names: Vec<Vec<&str>> = generations
            .iter()
            .map(|g| g.iter().map(|f| f.name.as_str()).collect())
            .collect();
        assert_eq!(
            names,
            vec![
                vec!["2024-01-01-00-00-00.fs", "2024-01-01-00-00-00.dat"],
                vec!["2024-01-02-00-00-00.fs"],
            ]
        );
    }

    #[test]
    fn test_leading_incrementals_form_their_own_generation() {
        let mut fx = Fixture::new();
        fx.add("1.deltafs");
        fx.add("2.deltafs");
        fx.add("3.fs");
        assert_eq!(fx.prune(1), 2);
        assert_eq!(fx.names(), vec!["3.fs"]);
    }

    #[test]
    fn test_only_incrementals_count_as_one_generation() {
        let mut fx = Fixture::new();
        fx.add("1.deltafs");
        fx.add("2.deltafs");
        fx.add("3.deltafs");
        assert_eq!(fx.prune(1), 0);
        assert_eq!(fx.names().len(), 3);
    }

    #[test]
    fn test_foreign_entries_and_blob_snapshots() {
        let mut fx = Fixture::new();
        fs::create_dir(fx.dir.path().join("blobstorage")).unwrap();
        fs::write(fx.dir.path().join("README"), b"keep me").unwrap();
        fx.add("2024-01-01-00-00-00.blobs");
        fx.add("2024-01-02-00-00-00.blobs.tar.gz");
        fx.add("2024-01-03-00-00-00.blobs");
        assert_eq!(fx.prune(1), 2);
        assert_eq!(fx.names(), vec!["2024-01-03-00-00-00.blobs", "README", "blobstorage"]);
    }

    #[test]
    fn test_generations_property_for_every_keep() {
        for keep in 1..=5u32 {
            let mut fx = Fixture::new();
            for n in 0..4 {
                fx.add(&format!("{}.fs", n));
                fx.add(&format!("{}-a.deltafs", n));
            }
            fx.prune(keep);
            let remaining = group_generations(scan_backup_dir(fx.dir.path()).unwrap());
            let expected = (keep as usize).min(4);
            assert_eq!(remaining.len(), expected, "keep={keep}");
            let first_kept = 4 - expected;
            assert_eq!(remaining[0][0].name, format!("{}.fs", first_kept));
        }
    }
}
