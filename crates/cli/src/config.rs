//! Runtime configuration resolved from flags and environment.

use std::path::{Path, PathBuf};

use orchestrator::FixtureStore;
use tracing_subscriber::EnvFilter;

/// Fixture root used when neither `--fixture-dir` nor `TSS_FIXTURE_DIR` is set.
pub const DEFAULT_FIXTURE_DIR: &str = "./tss_data";

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the `t{T}_n{N}` fixture directories
    pub fixture_dir: PathBuf,

    /// Raise the default log level to debug
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fixture_dir: PathBuf::from(DEFAULT_FIXTURE_DIR),
            verbose: false,
        }
    }
}

impl Config {
    pub fn new(fixture_dir: impl Into<PathBuf>, verbose: bool) -> Self {
        Self {
            fixture_dir: fixture_dir.into(),
            verbose,
        }
    }

    pub fn fixture_dir(&self) -> &Path {
        &self.fixture_dir
    }

    pub fn store(&self) -> FixtureStore {
        FixtureStore::new(&self.fixture_dir)
    }

    /// Default directive when `RUST_LOG` is unset.
    pub fn default_directive(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// `RUST_LOG` wins over `--verbose`.
    pub fn log_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }
}
