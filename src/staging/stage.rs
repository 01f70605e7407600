//! Moving detected groups into the decision area.
//!
//! Staging a group is all-or-nothing: the folder, metadata and manifest
//! (the plan) are written first, then members are moved one by one. If any
//! move fails, the members already moved are put back and the folder is
//! removed, so the group is left exactly as it was found. A group with a
//! member whose path cannot be written to the manifest is refused up front.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use super::{
    collision_free_name, group_dir_name, manifest_field, move_file, write_manifest, write_meta,
    GroupId, GroupMeta, ManifestEntry, StagedGroup, StagingError, CONTROL_FILES,
};
use crate::duplicates::CandidateGroup;
use crate::progress::ProgressCallback;

/// Outcome of staging a batch of groups.
#[derive(Debug, Default)]
pub struct StagingReport {
    /// Groups now in the decision area (or planned, for dry runs)
    pub staged: Vec<StagedGroup>,
    /// Groups that were rolled back, with the reason
    pub failed: Vec<(GroupId, String)>,
}

impl StagingReport {
    /// Number of files staged across all groups.
    #[must_use]
    pub fn staged_files(&self) -> usize {
        self.staged.iter().map(|g| g.entries.len()).sum()
    }
}

/// Moves candidate groups into numbered folders under the decision root.
pub struct StagingManager {
    decision_root: PathBuf,
    dry_run: bool,
    progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl StagingManager {
    /// Create a manager staging into `decision_root`.
    #[must_use]
    pub fn new(decision_root: impl Into<PathBuf>) -> Self {
        Self {
            decision_root: decision_root.into(),
            dry_run: false,
            progress_callback: None,
        }
    }

    /// Log the plan without touching the filesystem.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// The decision root this manager stages into.
    #[must_use]
    pub fn decision_root(&self) -> &Path {
        &self.decision_root
    }

    /// Stage every group, numbering them from 1 in the given order.
    ///
    /// A failed group is rolled back and reported; the rest continue.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Io`] only when the decision root itself cannot
    /// be created.
    pub fn stage_all(&self, groups: Vec<CandidateGroup>) -> Result<StagingReport, StagingError> {
        let mut report = StagingReport::default();

        if !self.dry_run {
            fs::create_dir_all(&self.decision_root)
                .map_err(|e| StagingError::io(&self.decision_root, e))?;
        }

        if let Some(ref callback) = self.progress_callback {
            callback.on_phase_start("staging", groups.len());
        }

        for (index, group) in groups.into_iter().enumerate() {
            let id = GroupId(index as u32 + 1);
            match self.stage_group(id, group) {
                Ok(staged) => {
                    if let Some(ref callback) = self.progress_callback {
                        callback.on_progress(index + 1, &staged.dir_name);
                    }
                    report.staged.push(staged);
                }
                Err(e) => {
                    log::error!("Group {} could not be staged: {}", id, e);
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        if let Some(ref callback) = self.progress_callback {
            callback.on_phase_end("staging");
        }

        Ok(report)
    }

    /// Stage one group as group `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError`] after rolling back any partial work.
    pub fn stage_group(
        &self,
        id: GroupId,
        group: CandidateGroup,
    ) -> Result<StagedGroup, StagingError> {
        if let Some(file) = group.files.iter().find(|f| manifest_field(&f.path).is_none()) {
            return Err(StagingError::UnsupportedName(file.path.clone()));
        }

        let dir_name = group_dir_name(id, group.mode, group.threshold, &group.digest);
        let dir = self.decision_root.join(&dir_name);
        let entries = plan_entries(&group);
        let meta = GroupMeta {
            mode: group.mode,
            threshold: group.threshold,
            digest: group.digest.clone(),
            count: entries.len(),
            staged_at: Utc::now(),
        };

        if self.dry_run {
            log::info!("[dry-run] {} ({} files)", dir_name, entries.len());
            for entry in &entries {
                log::info!(
                    "[dry-run]   {} <- {}",
                    entry.staged_name,
                    entry.original.display()
                );
            }
        } else {
            fs::create_dir(&dir).map_err(|e| StagingError::io(&dir, e))?;
            if let Err(e) = self.write_plan_and_move(&dir, &meta, &entries) {
                rollback(&dir, &entries);
                return Err(e);
            }
            log::info!("Staged {} ({} files)", dir_name, entries.len());
        }

        Ok(StagedGroup {
            id,
            dir_name,
            dir,
            meta,
            entries,
        })
    }

    fn write_plan_and_move(
        &self,
        dir: &Path,
        meta: &GroupMeta,
        entries: &[ManifestEntry],
    ) -> Result<(), StagingError> {
        write_meta(dir, meta)?;
        write_manifest(dir, entries)?;

        for entry in entries {
            let target = dir.join(&entry.staged_name);
            move_file(&entry.original, &target)
                .map_err(|e| StagingError::io(&entry.original, e))?;
            log::debug!(
                "Moved {} -> {}",
                entry.original.display(),
                target.display()
            );
        }
        Ok(())
    }
}

/// Assign collision-free staged names in member order.
fn plan_entries(group: &CandidateGroup) -> Vec<ManifestEntry> {
    let mut taken: HashSet<String> = CONTROL_FILES.into_iter().map(str::to_string).collect();

    group
        .files
        .iter()
        .map(|file| {
            let base = file
                .path
                .file_name()
                .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().into_owned());
            let name = collision_free_name(&base, |n| taken.contains(n));
            taken.insert(name.clone());
            ManifestEntry::new(name, file.path.clone())
        })
        .collect()
}

/// Put moved members back and remove the group folder.
fn rollback(dir: &Path, entries: &[ManifestEntry]) {
    for entry in entries {
        let staged = dir.join(&entry.staged_name);
        if staged.exists() && !entry.original.exists() {
            if let Err(e) = move_file(&staged, &entry.original) {
                log::error!(
                    "Rollback failed for {} (left at {}): {}",
                    entry.original.display(),
                    staged.display(),
                    e
                );
            }
        }
    }

    for control in CONTROL_FILES {
        let _ = fs::remove_file(dir.join(control));
    }
    if let Err(e) = fs::remove_dir(dir) {
        log::warn!("Could not remove {} after rollback: {}", dir.display(), e);
    }
}
