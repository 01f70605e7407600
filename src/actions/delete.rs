//! File deletion with retry, backoff and quarantine.
//!
//! # Overview
//!
//! Files rejected during review are removed permanently (default) or moved
//! to the system trash. Files held open by another process (viewers,
//! antivirus, sync clients) are retried with a linear backoff. A file that
//! still resists is renamed to `*.pending_delete` and retried once more
//! under that name; if that also fails it is left in place and reported.
//!
//! # Example
//!
//! ```no_run
//! use dupetriage::actions::delete::{delete_with_retry, RetryPolicy};
//! use std::path::Path;
//!
//! let outcome = delete_with_retry(Path::new("/tmp/dup.jpg"), false, &RetryPolicy::default());
//! println!("{:?}", outcome);
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Suffix given to files that resisted deletion.
pub const PENDING_DELETE_SUFFIX: &str = ".pending_delete";

/// Error type for deletion operations.
#[derive(Debug, Error)]
pub enum DeleteError {
    /// File was not found (may have been deleted or moved).
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// Permission denied when attempting to delete.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Trash operation failed.
    #[error("trash operation failed for {path}: {message}")]
    TrashFailed {
        /// File path
        path: PathBuf,
        /// Error message from the trash backend
        message: String,
    },

    /// Permanent delete operation failed.
    #[error("permanent delete failed for {path}: {source}")]
    PermanentDeleteFailed {
        /// File path
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl DeleteError {
    /// Get the path associated with this error.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound(p)
            | Self::PermissionDenied(p)
            | Self::TrashFailed { path: p, .. }
            | Self::PermanentDeleteFailed { path: p, .. } => p,
        }
    }
}

/// Bounded retry with linear backoff: attempt `n` waits `n × delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub retries: u32,
    /// Base delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 12,
            delay: Duration::from_millis(150),
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Run `op` until it succeeds, `give_up` accepts its error, or the
    /// retries are exhausted. Returns the last result.
    pub fn run<T, E, F, G>(&self, mut op: F, give_up: G) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        G: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if give_up(&e) || attempt >= self.retries => return Err(e),
                Err(_) => {
                    attempt += 1;
                    std::thread::sleep(self.delay * attempt);
                }
            }
        }
    }
}

/// What happened to a file handed to [`delete_with_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Removed (or trashed)
    Deleted,
    /// Nothing to delete
    AlreadyGone,
    /// Could not be removed; left at this path
    Stuck(PathBuf),
}

/// Move a single file to the system trash.
///
/// # Errors
///
/// - `NotFound` if the file doesn't exist
/// - `TrashFailed` if the trash backend fails
pub fn delete_to_trash(path: &Path) -> Result<(), DeleteError> {
    if fs::symlink_metadata(path).is_err() {
        return Err(DeleteError::NotFound(path.to_path_buf()));
    }
    trash::delete(path).map_err(|e| DeleteError::TrashFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    log::debug!("Moved to trash: {}", path.display());
    Ok(())
}

/// Permanently delete a single file.
///
/// # Errors
///
/// - `NotFound` if the file doesn't exist
/// - `PermissionDenied` if deletion is not allowed
/// - `PermanentDeleteFailed` for any other failure
pub fn permanent_delete(path: &Path) -> Result<(), DeleteError> {
    fs::remove_file(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => DeleteError::NotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => DeleteError::PermissionDenied(path.to_path_buf()),
        _ => DeleteError::PermanentDeleteFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    log::debug!("Permanently deleted: {}", path.display());
    Ok(())
}

fn delete_once(path: &Path, use_trash: bool) -> Result<(), DeleteError> {
    if use_trash {
        delete_to_trash(path)
    } else {
        permanent_delete(path)
    }
}

/// Delete `path`, retrying, then quarantining as `*.pending_delete`.
pub fn delete_with_retry(path: &Path, use_trash: bool, policy: &RetryPolicy) -> DeleteOutcome {
    let is_gone = |e: &DeleteError| matches!(e, DeleteError::NotFound(_));

    let first = match policy.run(|| delete_once(path, use_trash), is_gone) {
        Ok(()) => return DeleteOutcome::Deleted,
        Err(DeleteError::NotFound(_)) => return DeleteOutcome::AlreadyGone,
        Err(e) => e,
    };
    log::warn!("{}; quarantining", first);

    let quarantined = pending_delete_path(path);
    if let Err(e) = fs::rename(path, &quarantined) {
        log::error!(
            "Could not delete or quarantine {}: {}",
            path.display(),
            e
        );
        return DeleteOutcome::Stuck(path.to_path_buf());
    }

    match policy.run(|| delete_once(&quarantined, use_trash), is_gone) {
        Ok(()) | Err(DeleteError::NotFound(_)) => DeleteOutcome::Deleted,
        Err(e) => {
            log::error!("Leaving {} in place: {}", quarantined.display(), e);
            DeleteOutcome::Stuck(quarantined)
        }
    }
}

/// `photo.jpg` → `photo.jpg.pending_delete`.
#[must_use]
pub fn pending_delete_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PENDING_DELETE_SUFFIX);
    PathBuf::from(name)
}

/// Remove an empty directory, retrying transient failures.
///
/// # Errors
///
/// Returns the last I/O error once retries are exhausted. A missing
/// directory counts as removed.
pub fn remove_dir_with_retry(dir: &Path, policy: &RetryPolicy) -> io::Result<()> {
    match policy.run(
        || fs::remove_dir(dir),
        |e| e.kind() == io::ErrorKind::NotFound,
    ) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
