//! Directory walker implementation using jwalk for parallel traversal.
//!
//! # Overview
//!
//! The [`Walker`] yields one [`FileRecord`] per regular file that passes the
//! inclusion policy. Children are sorted by name inside every directory, so
//! the yielded order is stable across runs.
//!
//! - Symbolic links are never followed
//! - Empty files are skipped (they cannot be meaningful image duplicates)
//! - The decision area is pruned when it lives inside the scanned root
//! - Errors are yielded as [`ScanError`] values rather than stopping iteration

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jwalk::WalkDir;

use super::{has_image_extension, FileRecord, ScanError, WalkerConfig};

/// Directory walker for file discovery.
#[derive(Debug)]
pub struct Walker {
    /// Root path to walk
    root: PathBuf,
    /// Walker configuration
    config: WalkerConfig,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a new walker for the given path.
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        Self {
            root: path.to_path_buf(),
            config,
            shutdown_flag: None,
        }
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Check the inclusion policy for a file path.
    fn is_included(&self, path: &Path) -> bool {
        self.config.include_all || has_image_extension(path)
    }

    /// Walk the directory tree, yielding file records.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileRecord, ScanError>> + '_ {
        let excluded = self.config.exclude_dir.clone();

        let walk_dir = WalkDir::new(&self.root)
            .follow_links(false)
            .skip_hidden(self.config.skip_hidden)
            .process_read_dir(move |_depth, _path, _read_dir_state, children| {
                if let Some(ref excluded) = excluded {
                    children.retain(|child| match child {
                        Ok(entry) => entry.path() != *excluded,
                        Err(_) => true,
                    });
                }
                children.sort_by(|a, b| match (a, b) {
                    (Ok(a), Ok(b)) => a.file_name().cmp(b.file_name()),
                    (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                    (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                    (Err(_), Err(_)) => std::cmp::Ordering::Equal,
                });
            });

        walk_dir.into_iter().filter_map(move |entry_result| {
            if self.is_shutdown_requested() {
                log::debug!("Walker: Shutdown requested, stopping iteration");
                return None;
            }

            match entry_result {
                Ok(entry) => {
                    let path = entry.path();
                    if path == self.root {
                        return None;
                    }

                    let file_type = entry.file_type();
                    if file_type.is_dir() || file_type.is_symlink() {
                        return None;
                    }

                    if !self.is_included(&path) {
                        log::trace!("Skipping file outside inclusion policy: {}", path.display());
                        return None;
                    }

                    let metadata = match std::fs::symlink_metadata(&path) {
                        Ok(m) => m,
                        Err(e) => return Some(Err(io_error(path, e))),
                    };
                    if !metadata.is_file() {
                        return None;
                    }

                    let size = metadata.len();
                    if size == 0 {
                        log::debug!("Skipping empty file: {}", path.display());
                        return None;
                    }

                    Some(Ok(FileRecord::new(path, size)))
                }
                Err(e) => {
                    let path = e
                        .path()
                        .map_or_else(|| self.root.clone(), std::borrow::ToOwned::to_owned);
                    let error = match e.into_io_error() {
                        Some(io) => io_error(path, io),
                        None => ScanError::Io {
                            path,
                            source: std::io::Error::other("filesystem loop or walk error"),
                        },
                    };
                    log::warn!("{}", error);
                    Some(Err(error))
                }
            }
        })
    }
}

fn io_error(path: PathBuf, error: std::io::Error) -> ScanError {
    match error.kind() {
        std::io::ErrorKind::PermissionDenied => ScanError::PermissionDenied(path),
        std::io::ErrorKind::NotFound => ScanError::NotFound(path),
        _ => ScanError::Io {
            path,
            source: error,
        },
    }
}
