pub mod date;
pub mod logger;
pub mod paths;
pub mod prompt;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use which::which;

/// Finds the repozo executable: an explicit path wins, then the buildout's
/// own `bin/repozo`, then whatever is on the system PATH.
pub fn find_repozo_executable(explicit: Option<&Path>, buildout_dir: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let local = buildout_dir.join("bin").join("repozo");
    if local.is_file() {
        return Ok(local);
    }
    which("repozo").context("repozo executable not found in bin/ or PATH. Please install ZODB's repozo script or set 'repozo' in the configuration.")
}
