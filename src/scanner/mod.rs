//! Scanner module for directory traversal and file fingerprinting.
//!
//! This module provides functionality for:
//! - Deterministic directory walking using jwalk
//! - Exact content hashing with BLAKE3
//! - Perceptual fingerprints (aHash / pHash) for near-duplicate images
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Directory traversal and file discovery
//! - [`hasher`]: BLAKE3 file hashing (streaming)
//! - [`perceptual`]: 64-bit perceptual fingerprints and Hamming distance
//!
//! # Example
//!
//! ```no_run
//! use dupetriage::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let walker = Walker::new(Path::new("."), WalkerConfig::default());
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.path.display(), file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

pub mod hasher;
pub mod perceptual;
pub mod walker;

use std::path::{Path, PathBuf};

pub use hasher::{hash_to_hex, Hash, Hasher};
pub use perceptual::{Fingerprint, PerceptualAlgorithm, PerceptualError, PerceptualHasher};
pub use walker::Walker;

/// File extensions treated as images by the default inclusion policy.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp", "heic", "heif",
];

/// Returns true if the path carries a known image extension (case-insensitive).
#[must_use]
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// A candidate file discovered by the scanner.
///
/// Fingerprints are filled in by the duplicate finder; a record is never
/// mutated after both are computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// BLAKE3 content hash (exact mode)
    pub exact_hash: Option<Hash>,
    /// Perceptual fingerprint (aHash / pHash modes)
    pub fingerprint: Option<Fingerprint>,
}

impl FileRecord {
    /// Create a record with no fingerprints computed yet.
    #[must_use]
    pub fn new(path: PathBuf, size: u64) -> Self {
        Self {
            path,
            size,
            exact_hash: None,
            fingerprint: None,
        }
    }

    /// Attach an exact content hash.
    #[must_use]
    pub fn with_exact_hash(mut self, hash: Hash) -> Self {
        self.exact_hash = Some(hash);
        self
    }

    /// Attach a perceptual fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }
}

/// Configuration for directory walking.
#[derive(Debug, Clone, Default)]
pub struct WalkerConfig {
    /// Include every regular file instead of only known image extensions.
    pub include_all: bool,

    /// Skip hidden files and directories (names starting with `.`).
    pub skip_hidden: bool,

    /// Directory pruned from the walk (the decision area when it lives
    /// under the scanned root).
    pub exclude_dir: Option<PathBuf>,
}

impl WalkerConfig {
    /// Create a new configuration from CLI arguments.
    #[must_use]
    pub fn new(include_all: bool, skip_hidden: bool, exclude_dir: Option<PathBuf>) -> Self {
        Self {
            include_all,
            skip_hidden,
            exclude_dir,
        }
    }
}

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// The specified path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur during exact file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("Read error for {path}: {source}")]
    Read {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl HashError {
    pub(crate) fn from_io(path: &Path, error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Read {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }
}
