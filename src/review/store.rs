//! Persisted review state shared by the orchestrator and the review server.
//!
//! The store is a single JSON document read and rewritten whole on every
//! mutation. Each read-modify-write holds one lock shared by every clone of
//! the store, and writes go through a temp file plus rename, so readers see
//! either the old or the new document and concurrent updates are never lost.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use super::state::{ReviewPhase, ReviewState, StateDocument};
use crate::staging::{write_atomic, GroupId};

/// State file name inside the decision root.
pub const STATE_FILE: &str = "_review_state.json";

/// Errors from the review state store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The state of one group could not be decoded.
    #[error("Malformed review state for group {id}: {source}")]
    MalformedGroup {
        /// Group id
        id: GroupId,
        /// Decode error
        #[source]
        source: serde_json::Error,
    },

    /// The document could not be serialized.
    #[error("Failed to serialize review state: {0}")]
    Serialize(#[source] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Handle to `_review_state.json`; clones share the same lock.
#[derive(Debug, Clone)]
pub struct ReviewStateStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ReviewStateStore {
    /// Store for the decision area rooted at `decision_root`.
    #[must_use]
    pub fn new(decision_root: &Path) -> Self {
        Self {
            path: decision_root.join(STATE_FILE),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the current document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the file exists but cannot be read, or
    /// when a corrupt file cannot be moved aside.
    pub fn load(&self) -> Result<StateDocument, StoreError> {
        let _guard = self.guard();
        self.read_document()
    }

    /// Run `f` on the document and persist the result, under the store lock.
    ///
    /// The document is written back even when `f` returns an error, so
    /// `f` must leave it consistent. Use this for every mutation.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, or a [`StoreError`] converted into `E`.
    pub fn update<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut StateDocument) -> Result<R, E>,
        E: From<StoreError>,
    {
        let _guard = self.guard();
        let mut doc = self.read_document()?;
        let before = doc.clone();
        let result = f(&mut doc);
        if doc != before {
            self.write_document(&doc)?;
        }
        result
    }

    /// Derived phase of a group.
    ///
    /// # Errors
    ///
    /// [`StoreError::MalformedGroup`] when the entry cannot be decoded.
    pub fn phase(&self, id: GroupId) -> Result<ReviewPhase, StoreError> {
        self.load()?
            .phase(id)
            .map_err(|source| StoreError::MalformedGroup { id, source })
    }

    /// Decoded state of a group, if any.
    ///
    /// # Errors
    ///
    /// [`StoreError::MalformedGroup`] when the entry cannot be decoded.
    pub fn group(&self, id: GroupId) -> Result<Option<ReviewState>, StoreError> {
        self.load()?
            .group(id)
            .map_err(|source| StoreError::MalformedGroup { id, source })
    }

    /// Derived phase of the group staged as `group_dir`.
    ///
    /// # Errors
    ///
    /// [`StoreError::MalformedGroup`] when the entry cannot be decoded.
    pub fn phase_for(&self, id: GroupId, group_dir: &str) -> Result<ReviewPhase, StoreError> {
        self.load()?
            .phase_for(id, group_dir)
            .map_err(|source| StoreError::MalformedGroup { id, source })
    }

    /// Decoded state of the group staged as `group_dir`, if any.
    ///
    /// # Errors
    ///
    /// [`StoreError::MalformedGroup`] when the entry cannot be decoded.
    pub fn group_for(
        &self,
        id: GroupId,
        group_dir: &str,
    ) -> Result<Option<ReviewState>, StoreError> {
        self.load()?
            .group_for(id, group_dir)
            .map_err(|source| StoreError::MalformedGroup { id, source })
    }

    /// Forget a group (after it has been restored).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the document cannot be persisted.
    pub fn remove_group(&self, id: GroupId) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.remove_group(id);
            Ok::<_, StoreError>(())
        })
    }

    /// Delete the state file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] for failures other than a missing file.
    pub fn remove(&self) -> Result<(), StoreError> {
        let _guard = self.guard();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io(e)),
        }
    }

    fn io(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read_document(&self) -> Result<StateDocument, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StateDocument::default())
            }
            Err(e) => return Err(self.io(e)),
        };

        match serde_json::from_slice(&bytes) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                let aside = self.corrupt_path();
                log::warn!(
                    "Review state {} is unreadable ({}); moving it to {} and starting fresh",
                    self.path.display(),
                    e,
                    aside.display()
                );
                fs::rename(&self.path, &aside).map_err(|e| self.io(e))?;
                Ok(StateDocument::default())
            }
        }
    }

    fn write_document(&self, doc: &StateDocument) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(doc).map_err(StoreError::Serialize)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io(e))?;
        }
        write_atomic(&self.path, &json).map_err(|e| self.io(e))
    }

    fn corrupt_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".corrupt-{stamp}"));
        PathBuf::from(name)
    }
}
