//! Staging of duplicate groups into the decision area.
//!
//! Every group gets its own numbered folder under the decision root holding
//! the moved files, a `_manifest.tsv` (staged name to original path) and a
//! `_group_meta.json`. Those two control files are all a later run needs to
//! resume review and restore files to where they came from. A `_restoring`
//! marker is added once the group's decision starts being applied.
//!
//! # Layout
//!
//! ```text
//! _DECISION_DUPES/
//! ├── _review_state.json
//! ├── group_0001_sha_3f2a9c01be/
//! │   ├── _manifest.tsv
//! │   ├── _group_meta.json
//! │   ├── IMG_0001.jpg
//! │   └── IMG_0001__1.jpg
//! └── group_0002_phash_t08_00ff13a2c4d9/
//! ```

pub mod manifest;
pub mod resume;
pub mod stage;

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::duplicates::DetectionMode;

pub use manifest::{
    manifest_field, read_manifest, read_meta, write_manifest, write_meta, GroupMeta, ManifestEntry,
};
pub use resume::{ResumeError, ResumeReport, RunResumer};
pub use stage::{StagingManager, StagingReport};

/// Default name of the decision area, created under the scanned root.
pub const DEFAULT_DECISION_FOLDER: &str = "_DECISION_DUPES";
/// Manifest file inside each group folder.
pub const MANIFEST_FILE: &str = "_manifest.tsv";
/// Metadata file inside each group folder.
pub const META_FILE: &str = "_group_meta.json";
/// Marker written into a group folder before its decision is applied.
pub const RESTORE_MARKER: &str = "_restoring";
/// Files in a group folder that are not members.
pub const CONTROL_FILES: [&str; 3] = [MANIFEST_FILE, META_FILE, RESTORE_MARKER];
/// Prefix of every group folder.
pub const GROUP_DIR_PREFIX: &str = "group_";

static GROUP_DIR_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^group_(\d{4,})_(?:sha_([0-9a-f]+)|(ahash|phash)_t(\d{2})_([0-9a-f]+))$").ok()
});

/// 1-based sequence number of a group within a decision area.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a group folder name says about its group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDirInfo {
    /// Sequence number
    pub id: GroupId,
    /// Detection mode
    pub mode: DetectionMode,
    /// Threshold (perceptual folders only)
    pub threshold: Option<u8>,
    /// Digest prefix embedded in the name
    pub digest_prefix: String,
}

/// Folder name for a group.
///
/// Exact groups embed 10 hex digits of the content hash; perceptual groups
/// embed the mode, the threshold and 12 hex digits of the seed fingerprint.
#[must_use]
pub fn group_dir_name(
    id: GroupId,
    mode: DetectionMode,
    threshold: Option<u8>,
    digest: &str,
) -> String {
    match mode {
        DetectionMode::Exact => format!("group_{:04}_sha_{}", id.0, prefix(digest, 10)),
        _ => format!(
            "group_{:04}_{}_t{:02}_{}",
            id.0,
            mode.as_str(),
            threshold.unwrap_or(0),
            prefix(digest, 12)
        ),
    }
}

fn prefix(s: &str, len: usize) -> &str {
    s.get(..len).unwrap_or(s)
}

/// Parse a group folder name produced by [`group_dir_name`].
#[must_use]
pub fn parse_group_dir_name(name: &str) -> Option<GroupDirInfo> {
    let caps = GROUP_DIR_RE.as_ref()?.captures(name)?;
    let id = GroupId(caps.get(1)?.as_str().parse().ok()?);

    if let Some(digest) = caps.get(2) {
        return Some(GroupDirInfo {
            id,
            mode: DetectionMode::Exact,
            threshold: None,
            digest_prefix: digest.as_str().to_string(),
        });
    }

    Some(GroupDirInfo {
        id,
        mode: caps.get(3)?.as_str().parse().ok()?,
        threshold: Some(caps.get(4)?.as_str().parse().ok()?),
        digest_prefix: caps.get(5)?.as_str().to_string(),
    })
}

/// Pick a name not rejected by `is_taken`, appending `__N` before the
/// extension when needed (`photo.jpg`, `photo__1.jpg`, `photo__2.jpg`).
pub fn collision_free_name(name: &str, mut is_taken: impl FnMut(&str) -> bool) -> String {
    if !is_taken(name) {
        return name.to_string();
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map_or_else(|| name.to_string(), |s| s.to_string_lossy().into_owned());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1u32;
    loop {
        let candidate = format!("{stem}__{n}{ext}");
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// A group as it sits in the decision area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedGroup {
    /// Sequence id
    pub id: GroupId,
    /// Folder name inside the decision root
    pub dir_name: String,
    /// Absolute folder path
    pub dir: PathBuf,
    /// Persisted metadata
    pub meta: GroupMeta,
    /// Members, in manifest order
    pub entries: Vec<ManifestEntry>,
}

impl StagedGroup {
    /// Load a staged group from its folder.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError`] when the folder name is not a group name, or
    /// the manifest or metadata are missing or unreadable.
    pub fn open(decision_root: &Path, dir_name: &str) -> Result<Self, StagingError> {
        let info = parse_group_dir_name(dir_name)
            .ok_or_else(|| StagingError::InvalidGroupDir(dir_name.to_string()))?;
        let dir = decision_root.join(dir_name);
        let meta = read_meta(&dir)?.ok_or_else(|| StagingError::MissingControlFile {
            dir: dir.clone(),
            file: META_FILE,
        })?;
        let entries = read_manifest(&dir)?;
        Ok(Self {
            id: info.id,
            dir_name: dir_name.to_string(),
            dir,
            meta,
            entries,
        })
    }

    /// Detection mode of the group.
    #[must_use]
    pub fn mode(&self) -> DetectionMode {
        self.meta.mode
    }

    /// Staged names of all members.
    #[must_use]
    pub fn member_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.staged_name.clone()).collect()
    }

    /// Look up a member by staged name.
    #[must_use]
    pub fn entry(&self, staged_name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.staged_name == staged_name)
    }

    /// Staged names of members whose original parent is `folder`.
    #[must_use]
    pub fn members_under(&self, folder: &Path) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.original.parent() == Some(folder))
            .map(|e| e.staged_name.clone())
            .collect()
    }
}

/// Errors raised while staging or reading staged groups.
#[derive(thiserror::Error, Debug)]
pub enum StagingError {
    /// Folder name does not follow the group naming scheme.
    #[error("Not a group folder: {0}")]
    InvalidGroupDir(String),

    /// A control file is missing from a group folder.
    #[error("Missing {file} in {dir}")]
    MissingControlFile {
        /// Group folder
        dir: PathBuf,
        /// Missing file name
        file: &'static str,
    },

    /// A path cannot be recorded in a manifest line.
    #[error("Cannot stage {0:?}: name is not UTF-8 or contains a tab or line break")]
    UnsupportedName(PathBuf),

    /// Group metadata could not be parsed.
    #[error("Malformed group metadata {path}: {source}")]
    Meta {
        /// Metadata path
        path: PathBuf,
        /// Parse error
        #[source]
        source: serde_json::Error,
    },

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

impl StagingError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Replace `path` with `bytes` atomically (temp file in the same directory,
/// then rename).
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Move a file, falling back to copy + remove across filesystems.
///
/// # Errors
///
/// Returns the underlying I/O error. On copy failure the partial
/// destination is removed.
pub fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            log::debug!(
                "Cross-device move {} -> {}, copying",
                from.display(),
                to.display()
            );
            if let Err(copy_err) = fs::copy(from, to) {
                let _ = fs::remove_file(to);
                return Err(copy_err);
            }
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

/// Sorted names of the group folders under `decision_root`.
///
/// # Errors
///
/// Returns [`StagingError::Io`] when the directory cannot be listed.
pub fn list_group_dirs(decision_root: &Path) -> Result<Vec<String>, StagingError> {
    if !decision_root.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(decision_root).map_err(|e| StagingError::io(decision_root, e))? {
        let entry = entry.map_err(|e| StagingError::io(decision_root, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(GROUP_DIR_PREFIX) && entry.path().is_dir() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
