//! Logging configuration using tracing.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// How chatty a run is. Passed explicitly to the components that change
/// behaviour with it instead of being read from global state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verbosity {
    pub quiet: bool,
    pub debug: bool,
}

impl Verbosity {
    pub fn new(quiet: bool, debug: bool) -> Self {
        Self { quiet, debug }
    }

    /// Filter directive for the subscriber. Quiet beats debug.
    pub fn level(&self) -> &'static str {
        if self.quiet {
            "warn"
        } else if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

/// Initialize logging for the given verbosity. `RUST_LOG` still overrides.
pub fn init(verbosity: Verbosity) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(verbosity.level()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).without_time())
        .try_init()?;

    Ok(())
}
