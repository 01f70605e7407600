//! Typed contracts of the review API and the operations behind them.
//!
//! [`ReviewApi`] is transport-free: every operation takes a typed request
//! and returns a typed response or an [`ApiError`] that knows its HTTP
//! status. The axum adapter in [`super::server`] only does (de)serialization.
//!
//! All mutations are read-modify-write cycles on the [`ReviewStateStore`],
//! and auto-finish is evaluated after each of them and on every poll.

use std::path::{Component, Path, PathBuf};

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use super::state::{ActiveGroup, ReviewError, ReviewPhase, ReviewState, StateDocument};
use super::store::{ReviewStateStore, StoreError};
use crate::duplicates::DetectionMode;
use crate::staging::{GroupId, StagedGroup, StagingError};

/// Errors returned by review operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No group is under review.
    #[error("No active group")]
    NoActiveGroup,

    /// The file is not a member of the active group.
    #[error("Unknown file: {0}")]
    UnknownFile(String),

    /// The active group is finished.
    #[error("Group is already finished")]
    GroupFinished,

    /// Auto-finish requested for a perceptual group.
    #[error("Auto-finish is only available for exact duplicates")]
    AutoFinishUnavailable,

    /// A file name that could escape the group folder.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The request body could not be decoded.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The requested file does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The state document or group folder could not be read or written.
    #[error("Review state error: {0}")]
    Store(String),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoActiveGroup
            | Self::AutoFinishUnavailable
            | Self::InvalidPath(_)
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownFile(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::GroupFinished => StatusCode::CONFLICT,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON error body.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            ok: false,
            error: self.to_string(),
        }
    }
}

impl From<ReviewError> for ApiError {
    fn from(err: ReviewError) -> Self {
        match err {
            ReviewError::UnknownFile(name) => Self::UnknownFile(name),
            ReviewError::Finished => Self::GroupFinished,
            ReviewError::AutoFinishUnavailable => Self::AutoFinishUnavailable,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<StagingError> for ApiError {
    fn from(err: StagingError) -> Self {
        Self::Store(err.to_string())
    }
}

/// `{ok: false, error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Always false
    pub ok: bool,
    /// Error message
    pub error: String,
}

/// One member of the active group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupItem {
    /// Staged file name
    pub name: String,
    /// Name of the original parent folder
    pub folder_name: String,
    /// Full original parent folder
    pub folder_path: String,
}

/// Details of the active group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveGroupView {
    /// Group id
    pub group_id: u32,
    /// Group folder name
    pub group_dir: String,
    /// Detection mode
    pub mode: DetectionMode,
    /// Threshold (perceptual only)
    pub threshold: Option<u8>,
    /// Members in manifest order
    pub items: Vec<GroupItem>,
    /// Kept names, sorted
    pub keep: Vec<String>,
    /// Finish confirmations so far
    pub finished_clicks: u8,
    /// Auto-finish flag of the group
    pub auto_finish: bool,
    /// Preferred original folder
    pub preferred_folder: Option<String>,
}

/// `GET /api/group` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupView {
    /// Whether a group is under review
    pub active: bool,
    /// Group details when active
    #[serde(flatten)]
    pub group: Option<ActiveGroupView>,
}

/// `POST /api/toggle_keep` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleKeepRequest {
    /// Staged name to flip
    pub name: String,
}

/// `POST /api/toggle_keep` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepResponse {
    /// Always true
    pub ok: bool,
    /// Kept names after the change
    pub keep: Vec<String>,
}

/// `POST /api/prefer_folder` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferFolderRequest {
    /// Original parent folder to prefer
    pub folder_path: String,
}

/// `POST /api/prefer_folder` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferFolderResponse {
    /// Always true
    pub ok: bool,
    /// Kept names after the change
    pub keep: Vec<String>,
    /// Preference after the change (None when cleared)
    pub preferred_folder: Option<String>,
}

/// `POST /api/finished` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedResponse {
    /// Always true
    pub ok: bool,
    /// Whether the group is now finished
    pub confirmed: bool,
    /// Confirmations so far
    pub finished_clicks: u8,
}

/// `POST /api/reset_finished` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    /// Always true
    pub ok: bool,
    /// Confirmations after the reset
    pub finished_clicks: u8,
}

/// `POST /api/toggle_auto_finish` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoFinishResponse {
    /// Always true
    pub ok: bool,
    /// New auto-finish flag
    pub auto_finish: bool,
}

/// A member file served to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedFile {
    /// File content
    pub bytes: Vec<u8>,
    /// MIME type
    pub content_type: &'static str,
}

/// Review operations over a decision area.
#[derive(Debug, Clone)]
pub struct ReviewApi {
    decision_root: PathBuf,
    store: ReviewStateStore,
}

impl ReviewApi {
    /// Create the API for a decision area and its store.
    #[must_use]
    pub fn new(decision_root: impl Into<PathBuf>, store: ReviewStateStore) -> Self {
        Self {
            decision_root: decision_root.into(),
            store,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &ReviewStateStore {
        &self.store
    }

    /// Make `group` the active group, creating its review state if needed.
    ///
    /// A new state is seeded with the members under the most recently
    /// preferred folder that occurs in the group and, for exact groups, the
    /// remembered auto-finish default. A state left over from another
    /// staging run under the same id is replaced. Activation always re-arms
    /// auto-finish.
    ///
    /// # Errors
    ///
    /// [`ApiError::Store`] when the store fails or the group's state is
    /// malformed.
    pub fn activate(&self, group: &StagedGroup) -> Result<ReviewState, ApiError> {
        self.store.update(|doc| {
            let mut state = match decode(doc, group.id, &group.dir_name)? {
                Some(state) => state,
                None => seed_state(doc, group),
            };
            state.auto_finish_armed = true;
            if state.evaluate_auto_finish(group.mode()) {
                log::info!("Group {} auto-finished on activation", group.id);
            }
            doc.active = Some(ActiveGroup {
                id: group.id,
                dir_name: group.dir_name.clone(),
            });
            doc.set_group(group.id, &state);
            Ok(state)
        })
    }

    /// Evaluate auto-finish for `group` and report its phase.
    ///
    /// # Errors
    ///
    /// [`ApiError::Store`] when the store fails or the state is malformed.
    pub fn poll(&self, group: &StagedGroup) -> Result<ReviewPhase, ApiError> {
        self.store.update(|doc| {
            if let Some(mut state) = decode(doc, group.id, &group.dir_name)? {
                if state.evaluate_auto_finish(group.mode()) {
                    log::info!("Group {} auto-finished", group.id);
                }
                doc.set_group(group.id, &state);
            }
            doc.phase_for(group.id, &group.dir_name)
                .map_err(|e| ApiError::Store(e.to_string()))
        })
    }

    /// `GET /api/group`.
    ///
    /// # Errors
    ///
    /// [`ApiError::Store`] when the store or the group folder is unreadable.
    pub fn group_view(&self) -> Result<GroupView, ApiError> {
        let result = self.with_active(|_, group, state| {
            Ok(ActiveGroupView {
                group_id: group.id.0,
                group_dir: group.dir_name.clone(),
                mode: group.mode(),
                threshold: group.meta.threshold,
                items: group
                    .entries
                    .iter()
                    .map(|e| item_for(&e.staged_name, &e.original))
                    .collect(),
                keep: state.keep.iter().cloned().collect(),
                finished_clicks: state.finished_clicks,
                auto_finish: state.auto_finish,
                preferred_folder: preferred(state),
            })
        });

        match result {
            Ok(view) => Ok(GroupView {
                active: true,
                group: Some(view),
            }),
            Err(ApiError::NoActiveGroup) => Ok(GroupView {
                active: false,
                group: None,
            }),
            Err(e) => Err(e),
        }
    }

    /// `POST /api/toggle_keep`.
    ///
    /// # Errors
    ///
    /// [`ApiError::UnknownFile`], [`ApiError::GroupFinished`],
    /// [`ApiError::NoActiveGroup`] or [`ApiError::Store`].
    pub fn toggle_keep(&self, request: &ToggleKeepRequest) -> Result<KeepResponse, ApiError> {
        self.with_active(|_, group, state| {
            state.toggle_keep(&request.name, &group.member_names())?;
            Ok(KeepResponse {
                ok: true,
                keep: state.keep.iter().cloned().collect(),
            })
        })
    }

    /// `POST /api/prefer_folder`.
    ///
    /// Preferring the group's current preference clears it for this group
    /// and leaves the keep set alone. Any other folder becomes the group's
    /// preference, moves to the front of the remembered folders, and the
    /// keep set is replaced by the members whose original parent is that
    /// folder.
    ///
    /// # Errors
    ///
    /// [`ApiError::GroupFinished`], [`ApiError::NoActiveGroup`] or
    /// [`ApiError::Store`].
    pub fn prefer_folder(
        &self,
        request: &PreferFolderRequest,
    ) -> Result<PreferFolderResponse, ApiError> {
        let folder = PathBuf::from(&request.folder_path);
        self.with_active(|doc, group, state| {
            if state.is_finished() {
                return Err(ApiError::GroupFinished);
            }
            if state.preferred_folder.as_deref() == Some(folder.as_path()) {
                state.preferred_folder = None;
                log::info!("Cleared preferred folder of group {}", group.id);
            } else {
                state.set_keep(group.members_under(&folder))?;
                log::info!("Preferred folder set to {}", folder.display());
                if !folder.as_os_str().is_empty() {
                    doc.remember_preferred(&folder);
                }
                state.preferred_folder = Some(folder.clone());
            }
            Ok(PreferFolderResponse {
                ok: true,
                keep: state.keep.iter().cloned().collect(),
                preferred_folder: preferred(state),
            })
        })
    }

    /// `POST /api/finished`.
    ///
    /// # Errors
    ///
    /// [`ApiError::NoActiveGroup`] or [`ApiError::Store`].
    pub fn finished(&self) -> Result<FinishedResponse, ApiError> {
        self.with_active(|_, group, state| {
            state.confirm_finished();
            if state.is_finished() {
                log::info!("Group {} confirmed finished", group.id);
            }
            Ok(FinishedResponse {
                ok: true,
                confirmed: state.is_finished(),
                finished_clicks: state.finished_clicks,
            })
        })
    }

    /// `POST /api/reset_finished`.
    ///
    /// # Errors
    ///
    /// [`ApiError::GroupFinished`], [`ApiError::NoActiveGroup`] or
    /// [`ApiError::Store`].
    pub fn reset_finished(&self) -> Result<ResetResponse, ApiError> {
        self.with_active(|_, _, state| {
            state.reset_finished()?;
            Ok(ResetResponse {
                ok: true,
                finished_clicks: state.finished_clicks,
            })
        })
    }

    /// `POST /api/toggle_auto_finish`.
    ///
    /// Flips the group flag and remembers it as the default for groups
    /// activated later.
    ///
    /// # Errors
    ///
    /// [`ApiError::AutoFinishUnavailable`] outside exact mode,
    /// [`ApiError::NoActiveGroup`] or [`ApiError::Store`].
    pub fn toggle_auto_finish(&self) -> Result<AutoFinishResponse, ApiError> {
        self.with_active(|doc, group, state| {
            let enabled = state.toggle_auto_finish(group.mode())?;
            doc.auto_finish = enabled;
            Ok(AutoFinishResponse {
                ok: true,
                auto_finish: enabled,
            })
        })
    }

    /// `GET /files/{name}`: a member file of the active group.
    ///
    /// # Errors
    ///
    /// [`ApiError::InvalidPath`] for names that are not a single plain file
    /// name or that resolve outside the group folder,
    /// [`ApiError::NotFound`] for unknown names, [`ApiError::NoActiveGroup`]
    /// or [`ApiError::Store`].
    pub fn file(&self, name: &str) -> Result<ServedFile, ApiError> {
        validate_file_name(name)?;

        let doc = self.store.load()?;
        let active = doc.active.ok_or(ApiError::NoActiveGroup)?;
        let group = StagedGroup::open(&self.decision_root, &active.dir_name)?;
        if group.entry(name).is_none() {
            return Err(ApiError::NotFound(name.to_string()));
        }

        let not_found = |_| ApiError::NotFound(name.to_string());
        let dir = group.dir.canonicalize().map_err(not_found)?;
        let path = dir.join(name).canonicalize().map_err(not_found)?;
        if !path.starts_with(&dir) {
            log::warn!("Rejected file request escaping the group folder: {}", name);
            return Err(ApiError::InvalidPath(name.to_string()));
        }

        let bytes = std::fs::read(&path).map_err(not_found)?;
        let content_type = image::ImageFormat::from_path(&path)
            .map(|f| f.to_mime_type())
            .unwrap_or("application/octet-stream");
        Ok(ServedFile {
            bytes,
            content_type,
        })
    }

    /// Run `f` on the active group's state inside one store update, then
    /// evaluate auto-finish and persist the state.
    fn with_active<R, F>(&self, f: F) -> Result<R, ApiError>
    where
        F: FnOnce(&mut StateDocument, &StagedGroup, &mut ReviewState) -> Result<R, ApiError>,
    {
        self.store.update(|doc| {
            let active = doc.active.clone().ok_or(ApiError::NoActiveGroup)?;
            let group = StagedGroup::open(&self.decision_root, &active.dir_name)?;
            let mut state =
                decode(doc, active.id, &active.dir_name)?.ok_or(ApiError::NoActiveGroup)?;

            let result = f(doc, &group, &mut state)?;
            if state.evaluate_auto_finish(group.mode()) {
                log::info!("Group {} auto-finished", group.id);
            }
            doc.set_group(active.id, &state);
            Ok(result)
        })
    }
}

fn decode(
    doc: &StateDocument,
    id: GroupId,
    group_dir: &str,
) -> Result<Option<ReviewState>, ApiError> {
    doc.group_for(id, group_dir)
        .map_err(|source| ApiError::from(StoreError::MalformedGroup { id, source }))
}

/// Fresh state for `group`, seeded from the remembered preferences.
fn seed_state(doc: &StateDocument, group: &StagedGroup) -> ReviewState {
    let auto_finish = group.mode() == DetectionMode::Exact && doc.auto_finish;
    let mut state = ReviewState::new(Vec::new(), auto_finish).bound_to(group.dir_name.clone());

    let seeded = doc.preferred_folders.iter().find_map(|folder| {
        let keep = group.members_under(folder);
        (!keep.is_empty()).then(|| (folder.clone(), keep))
    });
    if let Some((folder, keep)) = seeded {
        log::debug!("Group {} seeded from {}", group.id, folder.display());
        state.keep = keep.into_iter().collect();
        state.preferred_folder = Some(folder);
    }
    state
}

fn preferred(state: &ReviewState) -> Option<String> {
    state
        .preferred_folder
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
}

fn item_for(name: &str, original: &Path) -> GroupItem {
    let parent = original.parent().unwrap_or_else(|| Path::new(""));
    GroupItem {
        name: name.to_string(),
        folder_name: parent
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        folder_path: parent.to_string_lossy().into_owned(),
    }
}

/// Accept only a single plain file name.
fn validate_file_name(name: &str) -> Result<(), ApiError> {
    let invalid = || ApiError::InvalidPath(name.to_string());
    if name.is_empty() || name.contains(['/', '\\', '\0']) || name == ".." || name == "." {
        return Err(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}
