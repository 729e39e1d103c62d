#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Process-wide defaults read from the environment (and `.env`, loaded by
//! the binary before first use). Command-line flags take precedence over
//! everything here.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::Duration,
};

use crate::constants::{DEFAULT_OUTPUT_FOLDER, DEFAULT_RESULTS_FILE};

/// Environment-derived defaults.
#[derive(Debug, Clone)]
pub struct NbgConfig {
    /// Where synthesized programs append their result records.
    results_path:   PathBuf,
    /// Template used for plain code export, if any.
    template:       Option<PathBuf>,
    /// Directory receiving synthesized programs.
    output_folder:  PathBuf,
    /// Wall-clock limit for running one synthesized program.
    python_timeout: Duration,
}

impl NbgConfig {
    /// Reads every setting from the environment, falling back to defaults.
    fn from_env() -> Self {
        let results_path = read_path("NBG_RESULTS_PATH")
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_FILE));
        let template = read_path("NBG_TEMPLATE");
        let output_folder = read_path("NBG_OUTPUT_FOLDER")
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FOLDER));

        Self {
            results_path,
            template,
            output_folder,
            python_timeout: read_timeout_secs("NBG_PYTHON_TIMEOUT_SECS", 60),
        }
    }

    /// Returns the default results file.
    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    /// Returns the default template, if one is configured.
    pub fn template(&self) -> Option<&Path> {
        self.template.as_deref()
    }

    /// Returns the default output folder for synthesized programs.
    pub fn output_folder(&self) -> &Path {
        &self.output_folder
    }

    /// Returns the time limit for running a synthesized program.
    pub fn python_timeout(&self) -> Duration {
        self.python_timeout
    }
}

/// Shared configuration handle used throughout the crate.
#[derive(Debug, Clone)]
pub struct ConfigHandle(Arc<NbgConfig>);

impl std::ops::Deref for ConfigHandle {
    type Target = NbgConfig;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Global storage for the lazily constructed configuration state.
static CONFIG_SLOT: OnceLock<Mutex<Option<Arc<NbgConfig>>>> = OnceLock::new();

/// Returns the mutex guarding the global configuration slot.
fn slot() -> &'static Mutex<Option<Arc<NbgConfig>>> {
    CONFIG_SLOT.get_or_init(|| Mutex::new(None))
}

/// Returns the active configuration, reading the environment on first use.
pub fn get() -> ConfigHandle {
    let mut guard = slot().lock().unwrap_or_else(PoisonError::into_inner);
    let state = guard.get_or_insert_with(|| Arc::new(NbgConfig::from_env()));
    ConfigHandle(Arc::clone(state))
}

/// Drops the cached configuration so the next [`get`] reads the environment
/// again.
pub fn reset() {
    *slot().lock().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Reads a non-empty, trimmed path from `env`.
fn read_path(env: &str) -> Option<PathBuf> {
    std::env::var(env)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Parses an environment variable into a `Duration`, falling back to
/// `default_secs` when parsing fails or the variable is missing.
fn read_timeout_secs(env: &str, default_secs: u64) -> Duration {
    std::env::var(env)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}
