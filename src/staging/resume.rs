//! Resuming a run from an existing decision area.
//!
//! Validation runs before anything is touched: every group folder must agree
//! on one detection mode (folder name and metadata alike), and a mode given
//! on the command line must match it. Only then are interrupted moves
//! completed and stale entries dropped.
//!
//! A group is left untouched and reported as skipped when its review state
//! is malformed, when it carries the restore marker without a finished
//! state, or when repairing it fails.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::{
    list_group_dirs, move_file, parse_group_dir_name, read_manifest, read_meta, write_manifest,
    write_meta, GroupDirInfo, GroupMeta, ManifestEntry, StagedGroup, StagingError, CONTROL_FILES,
    MANIFEST_FILE, RESTORE_MARKER,
};
use crate::duplicates::DetectionMode;
use crate::review::{ReviewPhase, ReviewStateStore, StoreError};

/// Errors raised while resuming.
#[derive(thiserror::Error, Debug)]
pub enum ResumeError {
    /// Group folders were staged with different modes.
    #[error("Decision area mixes detection modes ({first} and {second})")]
    MixedModes {
        /// Mode of the first group
        first: DetectionMode,
        /// Conflicting mode
        second: DetectionMode,
    },

    /// A folder name disagrees with its metadata.
    #[error("{dir}: folder name says {name_mode} but metadata says {meta_mode}")]
    NameMetaMismatch {
        /// Folder name
        dir: String,
        /// Mode from the folder name
        name_mode: DetectionMode,
        /// Mode from the metadata
        meta_mode: DetectionMode,
    },

    /// The requested mode differs from the staged one.
    #[error("Requested mode {requested} but the decision area holds {resumed} groups")]
    ModeMismatch {
        /// Mode from the command line
        requested: DetectionMode,
        /// Mode found on disk
        resumed: DetectionMode,
    },

    /// Reading or repairing a group failed.
    #[error(transparent)]
    Staging(#[from] StagingError),

    /// The review state could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResumeError {
    /// Whether the error is a configuration problem detected before mutation.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::MixedModes { .. } | Self::NameMetaMismatch { .. } | Self::ModeMismatch { .. }
        )
    }
}

/// What a resume found and repaired.
#[derive(Debug, Default)]
pub struct ResumeReport {
    /// Mode shared by all groups (None when nothing was resumed)
    pub mode: Option<DetectionMode>,
    /// Groups ready for review, sorted by folder name
    pub groups: Vec<StagedGroup>,
    /// Groups not yet finished in the review state
    pub pending: usize,
    /// Interrupted moves completed
    pub completed_moves: usize,
    /// Manifest entries dropped because both copies were gone
    pub dropped_entries: usize,
    /// Folders removed because no member was left
    pub removed_dirs: usize,
    /// Folders left untouched (no manifest, malformed state, failed repair)
    pub skipped_dirs: Vec<String>,
}

/// A folder that passed validation, with what it needs for reconciliation.
struct Candidate {
    dir_name: String,
    info: GroupDirInfo,
    meta: Option<GroupMeta>,
}

/// Inspects and repairs an existing decision area.
pub struct RunResumer {
    decision_root: PathBuf,
    requested_mode: Option<DetectionMode>,
}

impl RunResumer {
    /// Create a resumer for `decision_root`; `requested_mode` is the mode
    /// explicitly given on the command line, if any.
    #[must_use]
    pub fn new(decision_root: impl Into<PathBuf>, requested_mode: Option<DetectionMode>) -> Self {
        Self {
            decision_root: decision_root.into(),
            requested_mode,
        }
    }

    /// Whether the decision area holds any group folder.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Io`] when the area cannot be listed.
    pub fn has_groups(&self) -> Result<bool, StagingError> {
        Ok(!list_group_dirs(&self.decision_root)?.is_empty())
    }

    /// Validate, then reconcile every group folder.
    ///
    /// # Errors
    ///
    /// Configuration errors ([`ResumeError::is_config_error`]) are raised
    /// before any file is touched.
    pub fn resume(&self, store: &ReviewStateStore) -> Result<ResumeReport, ResumeError> {
        let mut report = ResumeReport::default();
        let candidates = self.validate(&mut report)?;
        let doc = store.load()?;

        for candidate in candidates {
            let dir_name = candidate.dir_name.clone();
            let finished = match doc.phase_for(candidate.info.id, &dir_name) {
                Ok(phase) => phase == ReviewPhase::Finished,
                Err(e) => {
                    log::error!("Skipping {}: malformed review state ({})", dir_name, e);
                    report.skipped_dirs.push(dir_name);
                    continue;
                }
            };
            let restoring = self.decision_root.join(&dir_name).join(RESTORE_MARKER);
            if !finished && restoring.exists() {
                log::error!(
                    "Skipping {}: partly restored but its review state is gone",
                    dir_name
                );
                report.skipped_dirs.push(dir_name);
                continue;
            }

            match self.reconcile(candidate, finished, &mut report) {
                Ok(Some(group)) => report.groups.push(group),
                Ok(None) => {}
                Err(e) => {
                    log::error!("Skipping {}: {}", dir_name, e);
                    report.skipped_dirs.push(dir_name);
                }
            }
        }

        report.pending = report
            .groups
            .iter()
            .filter(|g| !matches!(doc.phase_for(g.id, &g.dir_name), Ok(ReviewPhase::Finished)))
            .count();

        log::info!(
            "Resumed {} group(s) ({} pending) from {}",
            report.groups.len(),
            report.pending,
            self.decision_root.display()
        );
        Ok(report)
    }

    fn validate(&self, report: &mut ResumeReport) -> Result<Vec<Candidate>, ResumeError> {
        let mut candidates = Vec::new();

        for dir_name in list_group_dirs(&self.decision_root)? {
            let Some(info) = parse_group_dir_name(&dir_name) else {
                log::warn!("Skipping unrecognised folder {}", dir_name);
                report.skipped_dirs.push(dir_name);
                continue;
            };

            let dir = self.decision_root.join(&dir_name);
            let meta = match read_meta(&dir) {
                Ok(meta) => meta,
                Err(StagingError::Meta { path, source }) => {
                    log::warn!(
                        "Unparsable {} ({}); inferring from folder name",
                        path.display(),
                        source
                    );
                    None
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(ref meta) = meta {
                if meta.mode != info.mode {
                    return Err(ResumeError::NameMetaMismatch {
                        dir: dir_name,
                        name_mode: info.mode,
                        meta_mode: meta.mode,
                    });
                }
            }

            match report.mode {
                None => report.mode = Some(info.mode),
                Some(first) if first != info.mode => {
                    return Err(ResumeError::MixedModes {
                        first,
                        second: info.mode,
                    })
                }
                Some(_) => {}
            }

            candidates.push(Candidate {
                dir_name,
                info,
                meta,
            });
        }

        if let (Some(requested), Some(resumed)) = (self.requested_mode, report.mode) {
            if requested != resumed {
                return Err(ResumeError::ModeMismatch { requested, resumed });
            }
        }

        Ok(candidates)
    }

    /// Bring a group folder in line with its manifest.
    ///
    /// Finished groups may be half restored, so their entries are kept as
    /// they are: a missing staged file there means it was already handled.
    fn reconcile(
        &self,
        candidate: Candidate,
        finished: bool,
        report: &mut ResumeReport,
    ) -> Result<Option<StagedGroup>, StagingError> {
        let Candidate {
            dir_name,
            info,
            meta,
        } = candidate;
        let dir = self.decision_root.join(&dir_name);

        let entries = match read_manifest(&dir) {
            Ok(entries) => entries,
            Err(StagingError::MissingControlFile { .. }) => {
                log::warn!("Skipping {}: no {}", dir_name, MANIFEST_FILE);
                report.skipped_dirs.push(dir_name);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let total = entries.len();
        let mut members = Vec::with_capacity(total);
        if finished {
            members = entries;
        } else {
            self.reconcile_entries(&dir, &dir_name, entries, &mut members, report)?;
        }

        if members.is_empty() {
            remove_empty_group(&dir);
            report.removed_dirs += 1;
            return Ok(None);
        }

        if members.len() != total {
            write_manifest(&dir, &members)?;
        }

        let meta = match meta {
            Some(meta) => meta,
            None => {
                let inferred = infer_meta(&info, &members);
                write_meta(&dir, &inferred)?;
                log::info!("Rewrote missing metadata for {}", dir_name);
                inferred
            }
        };

        Ok(Some(StagedGroup {
            id: info.id,
            dir_name,
            dir,
            meta,
            entries: members,
        }))
    }

    fn reconcile_entries(
        &self,
        dir: &Path,
        dir_name: &str,
        entries: Vec<ManifestEntry>,
        members: &mut Vec<ManifestEntry>,
        report: &mut ResumeReport,
    ) -> Result<(), StagingError> {
        for entry in entries {
            let staged = dir.join(&entry.staged_name);
            if staged.exists() {
                members.push(entry);
            } else if entry.original.exists() {
                move_file(&entry.original, &staged)
                    .map_err(|e| StagingError::io(&entry.original, e))?;
                log::info!(
                    "Completed interrupted move of {} into {}",
                    entry.original.display(),
                    dir_name
                );
                report.completed_moves += 1;
                members.push(entry);
            } else {
                log::warn!(
                    "{}: {} and its original {} are both gone; dropping",
                    dir_name,
                    entry.staged_name,
                    entry.original.display()
                );
                report.dropped_entries += 1;
            }
        }
        Ok(())
    }
}

fn infer_meta(info: &GroupDirInfo, members: &[ManifestEntry]) -> GroupMeta {
    GroupMeta {
        mode: info.mode,
        threshold: info.threshold,
        digest: info.digest_prefix.clone(),
        count: members.len(),
        staged_at: Utc::now(),
    }
}

fn remove_empty_group(dir: &Path) {
    for control in CONTROL_FILES {
        let _ = fs::remove_file(dir.join(control));
    }
    match fs::remove_dir(dir) {
        Ok(()) => log::info!("Removed empty group folder {}", dir.display()),
        Err(e) => log::warn!("Could not remove {}: {}", dir.display(), e),
    }
}
