//! Group control files: `_manifest.tsv` and `_group_meta.json`.
//!
//! The manifest holds one `staged_name<TAB>original_path` line per member.
//! Both fields must be UTF-8 without tabs or line breaks; the stager refuses
//! files that break this, so the first tab on a line is the separator.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{write_atomic, StagingError, MANIFEST_FILE, META_FILE};
use crate::duplicates::DetectionMode;

/// One staged file and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// File name inside the group folder
    pub staged_name: String,
    /// Absolute original path
    pub original: PathBuf,
}

impl ManifestEntry {
    /// Create a new entry.
    #[must_use]
    pub fn new(staged_name: impl Into<String>, original: impl Into<PathBuf>) -> Self {
        Self {
            staged_name: staged_name.into(),
            original: original.into(),
        }
    }
}

/// Persisted description of a staged group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMeta {
    /// Detection mode
    pub mode: DetectionMode,
    /// Threshold (perceptual only)
    #[serde(default)]
    pub threshold: Option<u8>,
    /// Content hash hex (exact) or seed fingerprint hex (perceptual)
    #[serde(default)]
    pub digest: String,
    /// Member count at staging time
    #[serde(default)]
    pub count: usize,
    /// When the group was staged
    pub staged_at: DateTime<Utc>,
}

/// The manifest form of `path`, if it survives a write and read unchanged.
#[must_use]
pub fn manifest_field(path: &Path) -> Option<&str> {
    path.to_str().filter(|s| !s.contains(['\t', '\n', '\r']))
}

/// Write the manifest of a group folder.
///
/// # Errors
///
/// Returns [`StagingError::UnsupportedName`] for an entry that cannot be
/// written as one line, or [`StagingError::Io`] when the file cannot be
/// written.
pub fn write_manifest(dir: &Path, entries: &[ManifestEntry]) -> Result<(), StagingError> {
    let mut content = String::new();
    for entry in entries {
        let staged = manifest_field(Path::new(&entry.staged_name));
        let (Some(staged), Some(original)) = (staged, manifest_field(&entry.original)) else {
            return Err(StagingError::UnsupportedName(entry.original.clone()));
        };
        content.push_str(staged);
        content.push('\t');
        content.push_str(original);
        content.push('\n');
    }
    let path = dir.join(MANIFEST_FILE);
    write_atomic(&path, content.as_bytes()).map_err(|e| StagingError::io(&path, e))
}

/// Read the manifest of a group folder.
///
/// Blank and malformed lines are skipped with a warning.
///
/// # Errors
///
/// Returns [`StagingError::MissingControlFile`] when there is no manifest,
/// or [`StagingError::Io`] when it cannot be read.
pub fn read_manifest(dir: &Path) -> Result<Vec<ManifestEntry>, StagingError> {
    let path = dir.join(MANIFEST_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StagingError::MissingControlFile {
                dir: dir.to_path_buf(),
                file: MANIFEST_FILE,
            })
        }
        Err(e) => return Err(StagingError::io(&path, e)),
    };

    let mut entries = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((name, original)) if !name.is_empty() && !original.is_empty() => {
                entries.push(ManifestEntry::new(name, original));
            }
            _ => log::warn!(
                "Ignoring malformed manifest line {} in {}",
                lineno + 1,
                path.display()
            ),
        }
    }
    Ok(entries)
}

/// Write the metadata of a group folder.
///
/// # Errors
///
/// Returns [`StagingError::Io`] when the file cannot be written.
pub fn write_meta(dir: &Path, meta: &GroupMeta) -> Result<(), StagingError> {
    let path = dir.join(META_FILE);
    let json = serde_json::to_vec_pretty(meta).map_err(|e| StagingError::Meta {
        path: path.clone(),
        source: e,
    })?;
    write_atomic(&path, &json).map_err(|e| StagingError::io(&path, e))
}

/// Read the metadata of a group folder, `None` when absent.
///
/// # Errors
///
/// Returns [`StagingError::Meta`] for unparsable metadata and
/// [`StagingError::Io`] for read failures.
pub fn read_meta(dir: &Path) -> Result<Option<GroupMeta>, StagingError> {
    let path = dir.join(META_FILE);
    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StagingError::io(&path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StagingError::Meta { path, source: e })
}
