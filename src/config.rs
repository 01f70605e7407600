//! Settings and validated run configuration.
//!
//! [`Settings`] are layered with figment: built-in defaults, then a TOML
//! file (`--config`, or `config.toml` in the platform config directory),
//! then `DUPETRIAGE_*` environment variables. CLI flags are applied last by
//! [`RunConfig::from_cli`], which also validates everything before the run
//! touches the filesystem.
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 5173
//! poll_interval_ms = 750
//! delete_retries = 12
//! retry_delay_ms = 150
//! io_threads = 4
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::actions::RetryPolicy;
use crate::cli::Cli;
use crate::duplicates::{DetectionMode, DEFAULT_THRESHOLD, MAX_THRESHOLD};
use crate::staging::DEFAULT_DECISION_FOLDER;

/// Prefix of the environment variables read into [`Settings`].
pub const ENV_PREFIX: &str = "DUPETRIAGE_";

/// Errors in settings or command-line values.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Threshold above the 64 fingerprint bits.
    #[error("Threshold {0} is out of range (0-64)")]
    ThresholdOutOfRange(u32),

    /// The scan root does not exist.
    #[error("Root not found: {0}")]
    RootNotFound(PathBuf),

    /// The scan root is not a directory.
    #[error("Root is not a directory: {0}")]
    RootNotADirectory(PathBuf),

    /// The decision folder would be the scan root itself.
    #[error("Decision folder must differ from the root: {0}")]
    DecisionFolderIsRoot(PathBuf),

    /// A path could not be made absolute.
    #[error("Cannot resolve {path}: {source}")]
    Resolve {
        /// Offending path
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// An explicitly requested settings file is missing.
    #[error("Settings file not found: {0}")]
    SettingsFileNotFound(PathBuf),

    /// Zero worker threads.
    #[error("io_threads must be at least 1")]
    NoThreads,

    /// Settings could not be parsed.
    #[error("Invalid settings: {0}")]
    Settings(#[source] Box<figment::Error>),
}

/// Persistent settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Review server host
    pub host: String,
    /// Review server port
    pub port: u16,
    /// Interval between store polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Delete attempts after the first one
    pub delete_retries: u32,
    /// Base backoff delay, in milliseconds
    pub retry_delay_ms: u64,
    /// Hashing and fingerprinting threads
    pub io_threads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5173,
            poll_interval_ms: 750,
            delete_retries: 12,
            retry_delay_ms: 150,
            io_threads: 4,
        }
    }
}

impl Settings {
    /// `config.toml` in the platform config directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "dupetriage", "dupetriage")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Layered figment: defaults < TOML file < environment.
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load settings from `file`, or from the default path when it exists.
    ///
    /// # Errors
    ///
    /// [`ConfigError::SettingsFileNotFound`] when `file` is given but
    /// missing; [`ConfigError::Settings`] when a layer fails to parse.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match file {
            Some(path) if !path.is_file() => {
                return Err(ConfigError::SettingsFileNotFound(path.to_path_buf()))
            }
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|p| p.is_file()),
        };
        if let Some(path) = &path {
            log::debug!("Loading settings from {}", path.display());
        }
        Self::figment(path.as_deref())
            .extract()
            .map_err(|e| ConfigError::Settings(Box::new(e)))
    }

    /// Poll interval as a duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retry policy for deletions and folder removal.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.delete_retries, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Validated parameters of one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Canonical scan root
    pub root: PathBuf,
    /// Absolute decision folder
    pub decision_root: PathBuf,
    /// Requested mode; `None` means exact for a new run or the resumed mode
    pub mode: Option<DetectionMode>,
    /// Hamming threshold for perceptual modes
    pub threshold: u8,
    /// Consider every regular file
    pub include_all: bool,
    /// Skip hidden entries
    pub skip_hidden: bool,
    /// Plan only
    pub dry_run: bool,
    /// Trash instead of permanent delete
    pub use_trash: bool,
    /// Review server host
    pub host: String,
    /// Review server port
    pub port: u16,
    /// Worker threads
    pub io_threads: usize,
    /// Store poll interval
    pub poll_interval: Duration,
    /// Deletion retry policy
    pub retry: RetryPolicy,
}

impl RunConfig {
    /// Apply CLI flags on top of `settings` and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an out-of-range threshold, a missing or
    /// non-directory root, a decision folder equal to the root, or zero
    /// threads.
    pub fn from_cli(cli: &Cli, settings: &Settings) -> Result<Self, ConfigError> {
        let threshold = match cli.threshold {
            Some(t) if t > u32::from(MAX_THRESHOLD) => {
                return Err(ConfigError::ThresholdOutOfRange(t))
            }
            Some(t) => {
                if cli.mode == Some(DetectionMode::Exact) {
                    log::warn!("--threshold has no effect in exact mode");
                }
                u8::try_from(t).map_err(|_| ConfigError::ThresholdOutOfRange(t))?
            }
            None => DEFAULT_THRESHOLD,
        };

        let root = resolve_root(&cli.root)?;
        let decision_root = match &cli.decision_folder {
            Some(folder) => std::path::absolute(folder).map_err(|source| ConfigError::Resolve {
                path: folder.clone(),
                source,
            })?,
            None => root.join(DEFAULT_DECISION_FOLDER),
        };
        if decision_root == root {
            return Err(ConfigError::DecisionFolderIsRoot(decision_root));
        }

        let io_threads = cli.io_threads.unwrap_or(settings.io_threads);
        if io_threads == 0 {
            return Err(ConfigError::NoThreads);
        }

        Ok(Self {
            root,
            decision_root,
            mode: cli.mode,
            threshold,
            include_all: cli.include_all,
            skip_hidden: cli.skip_hidden,
            dry_run: cli.dry_run,
            use_trash: cli.trash,
            host: cli.host.clone().unwrap_or_else(|| settings.host.clone()),
            port: cli.port.unwrap_or(settings.port),
            io_threads,
            poll_interval: settings.poll_interval(),
            retry: settings.retry_policy(),
        })
    }
}

fn resolve_root(root: &Path) -> Result<PathBuf, ConfigError> {
    let canonical = root.canonicalize().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::RootNotFound(root.to_path_buf()),
        _ => ConfigError::Resolve {
            path: root.to_path_buf(),
            source: e,
        },
    })?;
    if !canonical.is_dir() {
        return Err(ConfigError::RootNotADirectory(root.to_path_buf()));
    }
    Ok(canonical)
}
