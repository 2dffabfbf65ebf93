// zodbbackup/src/utils/paths.rs
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::env;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use super::logger::Verbosity;

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("static env var pattern is valid")
    })
}

/// Turns configured path strings into absolute, normalized paths.
///
/// Expansion order: `$VAR`/`${VAR}`, then a leading `~`, then joining onto
/// the buildout root when still relative, then lexical removal of `.` and
/// `..`. Paths do not need to exist.
#[derive(Debug, Clone)]
pub struct PathResolver {
    home: Option<PathBuf>,
    overrides: HashMap<String, String>,
    verbosity: Verbosity,
}

impl PathResolver {
    pub fn new(verbosity: Verbosity) -> Self {
        Self::with_env(dirs::home_dir(), HashMap::new(), verbosity)
    }

    /// Resolver with a fixed home directory and variables that shadow the
    /// process environment.
    pub fn with_env(home: Option<PathBuf>, vars: HashMap<String, String>, verbosity: Verbosity) -> Self {
        Self {
            home,
            overrides: vars,
            verbosity,
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        self.overrides
            .get(name)
            .cloned()
            .or_else(|| env::var(name).ok())
    }

    /// Replaces known variables; unknown ones are left untouched.
    pub fn expand_vars(&self, raw: &str) -> String {
        env_var_pattern()
            .replace_all(raw, |caps: &Captures| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                self.lookup(name).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    pub fn expand_home(&self, raw: &str) -> PathBuf {
        match (&self.home, raw) {
            (Some(home), "~") => home.clone(),
            (Some(home), _) if raw.starts_with("~/") => home.join(&raw[2..]),
            _ => PathBuf::from(raw),
        }
    }

    pub fn resolve(&self, raw: &str, buildout_root: &Path) -> PathBuf {
        let expanded = self.expand_home(&self.expand_vars(raw.trim()));
        let joined = if expanded.is_absolute() {
            expanded
        } else {
            absolute_root(buildout_root).join(expanded)
        };
        let resolved = normalize(&joined);
        if self.verbosity.debug {
            debug!("Resolved path {:?} to {}", raw, resolved.display());
        }
        resolved
    }
}

fn absolute_root(root: &Path) -> PathBuf {
    if root.is_absolute() {
        return root.to_path_buf();
    }
    env::current_dir()
        .map(|cwd| cwd.join(root))
        .unwrap_or_else(|_| root.to_path_buf())
}

/// Lexical normalization: drops `.`, folds `..` into its parent, never
/// climbs above the root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let last_is_normal = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if last_is_normal {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
