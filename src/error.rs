//! Exit codes and structured error reports.

use serde::Serialize;

use crate::config::ConfigError;
use crate::duplicates::FinderError;
use crate::staging::ResumeError;

/// Process exit codes.
///
/// - 0: every staged group was reviewed and restored
/// - 1: unexpected failure
/// - 2: nothing to review (no duplicates found)
/// - 3: groups failed to stage or files were left behind
/// - 4: invalid configuration, detected before anything was moved
/// - 130: interrupted (Ctrl+C); the decision area can be resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Run completed.
    Success = 0,
    /// Unexpected error.
    GeneralError = 1,
    /// No duplicate groups.
    NoDuplicates = 2,
    /// Completed with leftovers.
    PartialSuccess = 3,
    /// Rejected configuration.
    InvalidConfig = 4,
    /// Stopped by the user.
    Interrupted = 130,
}

impl ExitCode {
    /// Numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Machine-readable code used in error output.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "DT000",
            Self::GeneralError => "DT001",
            Self::NoDuplicates => "DT002",
            Self::PartialSuccess => "DT003",
            Self::InvalidConfig => "DT004",
            Self::Interrupted => "DT130",
        }
    }

    /// Pick the exit code for an error that reached `main`.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        if let Some(FinderError::Interrupted) = err.downcast_ref::<FinderError>() {
            return Self::Interrupted;
        }
        if err.downcast_ref::<ConfigError>().is_some() {
            return Self::InvalidConfig;
        }
        if let Some(FinderError::PathNotFound(_) | FinderError::NotADirectory(_)) =
            err.downcast_ref::<FinderError>()
        {
            return Self::InvalidConfig;
        }
        if err
            .downcast_ref::<ResumeError>()
            .is_some_and(ResumeError::is_config_error)
        {
            return Self::InvalidConfig;
        }
        Self::GeneralError
    }
}

/// Error report printed with `--json-errors`.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// Code such as "DT004"
    pub code: String,
    /// Numeric exit code
    pub exit_code: i32,
    /// Human-readable message including its causes
    pub message: String,
    /// Whether the run was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Build a report from an error and the exit code chosen for it.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
