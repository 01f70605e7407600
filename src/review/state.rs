//! Per-group review state and the persisted state document.
//!
//! A group moves through `staged → reviewing → finished`; the phase is never
//! stored, it is derived from whether a [`ReviewState`] exists and how many
//! finish confirmations it holds.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::duplicates::DetectionMode;
use crate::staging::GroupId;

/// Current version of the state document.
pub const STATE_VERSION: u32 = 1;

/// Confirmations needed to finish a group.
pub const FINISH_CLICKS: u8 = 2;

/// Derived lifecycle phase of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewPhase {
    /// No review state yet
    Staged,
    /// Under review, fewer than two confirmations
    Reviewing,
    /// Two confirmations; ready to restore
    Finished,
}

/// Rejections raised by review operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReviewError {
    /// The name is not a member of the group.
    #[error("Unknown file: {0}")]
    UnknownFile(String),

    /// The group is finished and no longer accepts changes.
    #[error("Group is already finished")]
    Finished,

    /// Auto-finish only applies to exact-mode groups.
    #[error("Auto-finish is only available for exact duplicates")]
    AutoFinishUnavailable,
}

fn default_armed() -> bool {
    true
}

/// Review state of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewState {
    /// Staged names to restore; everything else is deleted
    #[serde(default)]
    pub keep: BTreeSet<String>,
    /// Finish confirmations (0, 1 or 2)
    #[serde(default)]
    pub finished_clicks: u8,
    /// Finish automatically once exactly one file is kept (exact mode)
    #[serde(default)]
    pub auto_finish: bool,
    /// Whether auto-finish may still fire
    #[serde(default = "default_armed")]
    pub auto_finish_armed: bool,
    /// Original folder preferred for this group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_folder: Option<PathBuf>,
    /// Folder name the state was created for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_dir: Option<String>,
}

impl Default for ReviewState {
    fn default() -> Self {
        Self::new(Vec::new(), false)
    }
}

impl ReviewState {
    /// Fresh state seeded with an initial keep set.
    #[must_use]
    pub fn new(keep: impl IntoIterator<Item = String>, auto_finish: bool) -> Self {
        Self {
            keep: keep.into_iter().collect(),
            finished_clicks: 0,
            auto_finish,
            auto_finish_armed: true,
            preferred_folder: None,
            group_dir: None,
        }
    }

    /// Tie the state to a group folder; see [`StateDocument::group_for`].
    #[must_use]
    pub fn bound_to(mut self, group_dir: impl Into<String>) -> Self {
        self.group_dir = Some(group_dir.into());
        self
    }

    /// Whether both confirmations have been given.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished_clicks >= FINISH_CLICKS
    }

    /// Flip membership of `name` in the keep set.
    ///
    /// A pending single confirmation is withdrawn.
    ///
    /// # Errors
    ///
    /// [`ReviewError::Finished`] once finished, [`ReviewError::UnknownFile`]
    /// when `name` is not in `members`.
    pub fn toggle_keep(&mut self, name: &str, members: &[String]) -> Result<(), ReviewError> {
        if self.is_finished() {
            return Err(ReviewError::Finished);
        }
        if !members.iter().any(|m| m == name) {
            return Err(ReviewError::UnknownFile(name.to_string()));
        }
        if !self.keep.remove(name) {
            self.keep.insert(name.to_string());
        }
        self.finished_clicks = 0;
        Ok(())
    }

    /// Replace the keep set.
    ///
    /// # Errors
    ///
    /// [`ReviewError::Finished`] once finished.
    pub fn set_keep(&mut self, keep: impl IntoIterator<Item = String>) -> Result<(), ReviewError> {
        if self.is_finished() {
            return Err(ReviewError::Finished);
        }
        let keep: BTreeSet<String> = keep.into_iter().collect();
        if keep != self.keep {
            self.keep = keep;
            self.finished_clicks = 0;
        }
        Ok(())
    }

    /// Register one finish confirmation. Idempotent once finished.
    pub fn confirm_finished(&mut self) {
        if !self.is_finished() {
            self.finished_clicks += 1;
        }
    }

    /// Withdraw a pending confirmation.
    ///
    /// # Errors
    ///
    /// [`ReviewError::Finished`] once finished.
    pub fn reset_finished(&mut self) -> Result<(), ReviewError> {
        if self.is_finished() {
            return Err(ReviewError::Finished);
        }
        self.finished_clicks = 0;
        Ok(())
    }

    /// Flip the auto-finish flag; returns the new value.
    ///
    /// # Errors
    ///
    /// [`ReviewError::AutoFinishUnavailable`] outside exact mode.
    pub fn toggle_auto_finish(&mut self, mode: DetectionMode) -> Result<bool, ReviewError> {
        if mode != DetectionMode::Exact {
            return Err(ReviewError::AutoFinishUnavailable);
        }
        self.auto_finish = !self.auto_finish;
        Ok(self.auto_finish)
    }

    /// Finish the group if auto-finish applies; returns true when it fired.
    ///
    /// Fires for exact groups with the flag enabled and armed, not yet
    /// finished, and exactly one kept file. Firing disarms the flag; a keep
    /// set of any other size re-arms it.
    pub fn evaluate_auto_finish(&mut self, mode: DetectionMode) -> bool {
        if self.keep.len() != 1 {
            self.auto_finish_armed = true;
            return false;
        }
        if mode != DetectionMode::Exact
            || !self.auto_finish
            || !self.auto_finish_armed
            || self.is_finished()
        {
            return false;
        }
        self.finished_clicks = FINISH_CLICKS;
        self.auto_finish_armed = false;
        true
    }
}

/// Pointer to the group currently under review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveGroup {
    /// Group id
    pub id: GroupId,
    /// Folder name inside the decision root
    pub dir_name: String,
}

/// The whole `_review_state.json` document.
///
/// Group entries are kept as raw JSON and decoded one at a time, so a single
/// malformed entry cannot poison the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    /// Format version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Group under review
    #[serde(default)]
    pub active: Option<ActiveGroup>,
    /// Preferred original folders, most recent first
    #[serde(default)]
    pub preferred_folders: Vec<PathBuf>,
    /// Remembered auto-finish default for new exact groups
    #[serde(default)]
    pub auto_finish: bool,
    /// Per-group review state keyed by group id
    #[serde(default)]
    pub groups: BTreeMap<String, serde_json::Value>,
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            active: None,
            preferred_folders: Vec::new(),
            auto_finish: false,
            groups: BTreeMap::new(),
        }
    }
}

impl StateDocument {
    /// Decode the review state of a group.
    ///
    /// # Errors
    ///
    /// Returns the decode error when the entry is malformed.
    pub fn group(&self, id: GroupId) -> Result<Option<ReviewState>, serde_json::Error> {
        self.groups
            .get(&id.to_string())
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
    }

    /// Decode the review state of a group staged as `group_dir`.
    ///
    /// Group ids are reused by every new staging run, so an entry written
    /// for another folder (or for no folder at all) is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns the decode error when the entry is malformed.
    pub fn group_for(
        &self,
        id: GroupId,
        group_dir: &str,
    ) -> Result<Option<ReviewState>, serde_json::Error> {
        Ok(self
            .group(id)?
            .filter(|state| state.group_dir.as_deref() == Some(group_dir)))
    }

    /// Derived phase of the group staged as `group_dir`.
    ///
    /// # Errors
    ///
    /// Returns the decode error when the entry is malformed.
    pub fn phase_for(
        &self,
        id: GroupId,
        group_dir: &str,
    ) -> Result<ReviewPhase, serde_json::Error> {
        Ok(phase_of(self.group_for(id, group_dir)?.as_ref()))
    }

    /// Move `folder` to the front of the preferred folders.
    pub fn remember_preferred(&mut self, folder: &Path) {
        self.preferred_folders.retain(|f| f != folder);
        self.preferred_folders.insert(0, folder.to_path_buf());
    }

    /// Store the review state of a group.
    pub fn set_group(&mut self, id: GroupId, state: &ReviewState) {
        // Serializing a struct of sets, integers and bools cannot fail.
        if let Ok(value) = serde_json::to_value(state) {
            self.groups.insert(id.to_string(), value);
        }
    }

    /// Drop the review state of a group; clears the active pointer if it
    /// named that group.
    pub fn remove_group(&mut self, id: GroupId) {
        self.groups.remove(&id.to_string());
        if self.active.as_ref().is_some_and(|a| a.id == id) {
            self.active = None;
        }
    }

    /// Derived phase of a group.
    ///
    /// # Errors
    ///
    /// Returns the decode error when the entry is malformed.
    pub fn phase(&self, id: GroupId) -> Result<ReviewPhase, serde_json::Error> {
        Ok(phase_of(self.group(id)?.as_ref()))
    }
}

fn phase_of(state: Option<&ReviewState>) -> ReviewPhase {
    match state {
        None => ReviewPhase::Staged,
        Some(state) if state.is_finished() => ReviewPhase::Finished,
        Some(_) => ReviewPhase::Reviewing,
    }
}
