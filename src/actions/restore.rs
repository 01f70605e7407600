//! Applying a finished review decision to the filesystem.
//!
//! Kept files go back to their original location; if that path is occupied
//! by a different file the restored copy gets a `stem__N.ext` name next to
//! it. Everything else in the group is deleted through
//! [`delete_with_retry`]. A group folder is only removed once nothing is left
//! behind in it. Until then it carries a `_restoring` marker so a later
//! resume never mistakes a restored file for an interrupted move.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

use super::delete::{delete_with_retry, remove_dir_with_retry, DeleteOutcome, RetryPolicy};
use crate::review::{ReviewStateStore, StoreError};
use crate::scanner::Hasher;
use crate::staging::{
    collision_free_name, list_group_dirs, StagedGroup, StagingError, CONTROL_FILES,
    RESTORE_MARKER,
};

/// Errors raised while restoring.
#[derive(Debug, Error)]
pub enum RestoreError {
    /// The original path has no parent directory or file name.
    #[error("Cannot restore to {0}: not a file path")]
    InvalidTarget(PathBuf),

    /// Copying a kept file back failed.
    #[error("Failed to restore {from} to {to}: {source}")]
    Copy {
        /// Staged file
        from: PathBuf,
        /// Restore target
        to: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Listing the decision area failed.
    #[error(transparent)]
    Staging(#[from] StagingError),

    /// Removing the state file failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What restoring one group did.
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Final locations of kept files
    pub restored: Vec<PathBuf>,
    /// Number of rejected files removed
    pub deleted: usize,
    /// Files left behind in the decision area
    pub stuck: Vec<PathBuf>,
    /// Per-file failures
    pub errors: Vec<RestoreError>,
    /// Whether the group folder was removed
    pub folder_removed: bool,
}

impl RestoreReport {
    /// True when the group left nothing behind.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stuck.is_empty() && self.folder_removed
    }
}

/// Restores kept files and deletes the rest of a finished group.
#[derive(Debug, Clone, Default)]
pub struct RestoreEngine {
    policy: RetryPolicy,
    use_trash: bool,
    hasher: Hasher,
}

impl RestoreEngine {
    /// Create an engine with the given retry policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            use_trash: false,
            hasher: Hasher::new(),
        }
    }

    /// Send rejected files to the system trash instead of deleting them.
    #[must_use]
    pub fn with_trash(mut self, use_trash: bool) -> Self {
        self.use_trash = use_trash;
        self
    }

    /// Restore `keep` and delete every other member of `group`.
    ///
    /// Entries whose staged file is already gone are treated as handled by an
    /// earlier, interrupted restore.
    pub fn restore_group(&self, group: &StagedGroup, keep: &BTreeSet<String>) -> RestoreReport {
        let mut report = RestoreReport::default();

        if group.dir.is_dir() {
            let marker = group.dir.join(RESTORE_MARKER);
            if let Err(e) = fs::write(&marker, b"") {
                log::warn!("Failed to write {}: {}", marker.display(), e);
            }
        }

        for entry in &group.entries {
            let staged = group.dir.join(&entry.staged_name);

            if keep.contains(&entry.staged_name) {
                match self.restore_file(&staged, &entry.original) {
                    Ok(Some(target)) => {
                        if let DeleteOutcome::Stuck(left) =
                            delete_with_retry(&staged, false, &self.policy)
                        {
                            report.stuck.push(left);
                        }
                        report.restored.push(target);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        log::error!("{}", e);
                        report.stuck.push(staged);
                        report.errors.push(e);
                    }
                }
                continue;
            }

            match delete_with_retry(&staged, self.use_trash, &self.policy) {
                DeleteOutcome::Deleted => report.deleted += 1,
                DeleteOutcome::AlreadyGone => {}
                DeleteOutcome::Stuck(left) => report.stuck.push(left),
            }
        }

        if report.stuck.is_empty() {
            report.folder_removed = self.remove_group_dir(&group.dir);
        } else {
            log::warn!(
                "{}: {} file(s) left behind; keeping the folder",
                group.dir_name,
                report.stuck.len()
            );
        }

        log::info!(
            "Group {}: restored {}, deleted {}",
            group.id,
            report.restored.len(),
            report.deleted
        );
        report
    }

    /// Copy `staged` back to `original` or a free sibling name.
    ///
    /// Returns the target, or `None` when there is nothing left to copy.
    /// An occupied candidate with identical content counts as the target.
    fn restore_file(
        &self,
        staged: &Path,
        original: &Path,
    ) -> Result<Option<PathBuf>, RestoreError> {
        if !staged.exists() {
            if original.exists() {
                log::debug!("{} already restored", original.display());
            } else {
                log::warn!("{} is gone from the group folder", staged.display());
            }
            return Ok(None);
        }

        let (Some(parent), Some(name)) = (original.parent(), original.file_name()) else {
            return Err(RestoreError::InvalidTarget(original.to_path_buf()));
        };
        let copy_err = |to: &Path, source| RestoreError::Copy {
            from: staged.to_path_buf(),
            to: to.to_path_buf(),
            source,
        };
        fs::create_dir_all(parent).map_err(|e| copy_err(parent, e))?;

        let mut matched = None;
        let name = collision_free_name(&name.to_string_lossy(), |candidate| {
            let path = parent.join(candidate);
            if !path.exists() {
                return false;
            }
            if matched.is_none() && self.same_content(staged, &path) {
                matched = Some(path);
                return false;
            }
            true
        });
        if let Some(existing) = matched {
            log::debug!("{} already holds this content", existing.display());
            return Ok(Some(existing));
        }

        let target = parent.join(name);
        copy_new(staged, &target).map_err(|e| copy_err(&target, e))?;
        if target != original {
            log::info!(
                "{} was occupied; restored as {}",
                original.display(),
                target.display()
            );
        }
        Ok(Some(target))
    }

    fn same_content(&self, a: &Path, b: &Path) -> bool {
        let size = |p: &Path| fs::metadata(p).map(|m| m.len()).ok();
        if size(a).is_none() || size(a) != size(b) {
            return false;
        }
        match (self.hasher.full_hash(a), self.hasher.full_hash(b)) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        }
    }

    fn remove_group_dir(&self, dir: &Path) -> bool {
        for control in CONTROL_FILES {
            match fs::remove_file(dir.join(control)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to remove {}: {}", control, e),
            }
        }
        match remove_dir_with_retry(dir, &self.policy) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to remove {}: {}", dir.display(), e);
                false
            }
        }
    }

    /// Remove the decision area once it holds no group folders.
    ///
    /// Returns `true` when the area is gone. Unrelated files in the area keep
    /// the directory alive; only the state file is removed then.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError`] when the area cannot be listed or the state
    /// file cannot be removed.
    pub fn cleanup_decision_root(
        &self,
        decision_root: &Path,
        store: &ReviewStateStore,
    ) -> Result<bool, RestoreError> {
        if !decision_root.exists() {
            return Ok(true);
        }
        let remaining = list_group_dirs(decision_root)?;
        if !remaining.is_empty() {
            log::info!(
                "{} group(s) remain in {}",
                remaining.len(),
                decision_root.display()
            );
            return Ok(false);
        }

        store.remove()?;
        match remove_dir_with_retry(decision_root, &self.policy) {
            Ok(()) => {
                log::info!("Removed {}", decision_root.display());
                Ok(true)
            }
            Err(e) => {
                log::warn!("Leaving {}: {}", decision_root.display(), e);
                Ok(false)
            }
        }
    }
}

/// Copy into a fresh file at `to`, never replacing an existing one.
fn copy_new(from: &Path, to: &Path) -> io::Result<()> {
    let dir = to.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    io::copy(&mut File::open(from)?, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(to).map_err(|e| e.error)?;
    Ok(())
}
