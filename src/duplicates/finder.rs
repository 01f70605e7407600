//! Duplicate finder: walk, fingerprint and group.
//!
//! # Overview
//!
//! The pipeline depends on the detection mode:
//! 1. **Walk** - Collect candidate files from the root (sorted, filtered)
//! 2. **Exact** - Group by size, then BLAKE3-hash members of shared-size buckets
//! 3. **Perceptual** - Fingerprint every file, then cluster greedily by distance
//!
//! Hashing and decoding run on a rayon pool bounded by `io_threads`.
//! Unreadable files are counted in the [`ScanSummary`] and left out.
//!
//! # Example
//!
//! ```no_run
//! use dupetriage::duplicates::{DetectionMode, DuplicateFinder, FinderConfig};
//! use std::path::Path;
//!
//! let config = FinderConfig::default()
//!     .with_mode(DetectionMode::Phash)
//!     .with_threshold(8);
//! let finder = DuplicateFinder::new(config);
//!
//! let (groups, summary) = finder.find_duplicates(Path::new("/photos")).unwrap();
//! println!("{} groups, {} reclaimable", groups.len(), summary.reclaimable_display());
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use super::groups::{exact_groups, group_by_size, perceptual_groups, sort_groups};
use super::{CandidateGroup, DetectionMode};
use crate::progress::ProgressCallback;
use crate::scanner::{FileRecord, Hasher, PerceptualHasher, ScanError, Walker, WalkerConfig};

/// Default perceptual distance threshold.
pub const DEFAULT_THRESHOLD: u8 = 5;

/// Configuration for the duplicate finder.
#[derive(Clone)]
pub struct FinderConfig {
    /// Detection mode.
    pub mode: DetectionMode,
    /// Maximum Hamming distance for perceptual modes.
    pub threshold: u8,
    /// Number of I/O threads for parallel hashing.
    /// Default is 4 to prevent disk thrashing.
    pub io_threads: usize,
    /// Walker configuration.
    pub walker_config: WalkerConfig,
    /// Optional shutdown flag for graceful termination.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for FinderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinderConfig")
            .field("mode", &self.mode)
            .field("threshold", &self.threshold)
            .field("io_threads", &self.io_threads)
            .field("walker_config", &self.walker_config)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Exact,
            threshold: DEFAULT_THRESHOLD,
            io_threads: 4,
            walker_config: WalkerConfig::default(),
            shutdown_flag: None,
            progress_callback: None,
        }
    }
}

impl FinderConfig {
    /// Set the detection mode.
    #[must_use]
    pub fn with_mode(mut self, mode: DetectionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the perceptual distance threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the I/O thread count (minimum 1).
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Set the walker configuration.
    #[must_use]
    pub fn with_walker_config(mut self, config: WalkerConfig) -> Self {
        self.walker_config = config;
        self
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// A file left out because it could not be hashed or decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    /// Path of the file
    pub path: PathBuf,
    /// Human-readable reason
    pub reason: String,
}

/// Summary statistics from a duplicate scan.
#[derive(Debug, Default)]
pub struct ScanSummary {
    /// Total number of files that passed the inclusion policy
    pub total_files: usize,
    /// Total size of those files in bytes
    pub total_size: u64,
    /// Files eliminated by size grouping (exact mode)
    pub eliminated_by_size: usize,
    /// Files that received a fingerprint
    pub fingerprinted: usize,
    /// Number of duplicate groups
    pub duplicate_groups: usize,
    /// Number of files inside duplicate groups
    pub duplicate_files: usize,
    /// Size of all group members beyond the first of each group
    pub reclaimable_space: u64,
    /// Duration of the scan
    pub scan_duration: std::time::Duration,
    /// Walk errors
    pub scan_errors: Vec<ScanError>,
    /// Files that could not be hashed or decoded
    pub skipped: Vec<SkippedFile>,
}

impl ScanSummary {
    /// Format reclaimable space as human-readable string.
    #[must_use]
    pub fn reclaimable_display(&self) -> String {
        bytesize::ByteSize(self.reclaimable_space).to_string()
    }

    /// Format total size as human-readable string.
    #[must_use]
    pub fn total_size_display(&self) -> String {
        bytesize::ByteSize(self.total_size).to_string()
    }

    fn record_groups(&mut self, groups: &[CandidateGroup]) {
        self.duplicate_groups = groups.len();
        self.duplicate_files = groups.iter().map(CandidateGroup::len).sum();
        self.reclaimable_space = groups
            .iter()
            .map(|g| g.files.iter().skip(1).map(|f| f.size).sum::<u64>())
            .sum();
    }
}

/// Errors that can occur during duplicate finding.
#[derive(thiserror::Error, Debug)]
pub enum FinderError {
    /// The scan was interrupted by user (Ctrl+C or shutdown signal).
    #[error("Scan interrupted by user")]
    Interrupted,

    /// The provided path does not exist.
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// The provided path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The worker pool could not be created.
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),
}

/// Duplicate finder that runs the detection pipeline for one mode.
pub struct DuplicateFinder {
    config: FinderConfig,
    hasher: Hasher,
}

impl DuplicateFinder {
    /// Create a new duplicate finder with the given configuration.
    #[must_use]
    pub fn new(config: FinderConfig) -> Self {
        let mut hasher = Hasher::new();
        if let Some(ref flag) = config.shutdown_flag {
            hasher = hasher.with_shutdown_flag(flag.clone());
        }
        Self { config, hasher }
    }

    /// Create a new duplicate finder with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(FinderConfig::default())
    }

    /// Find duplicate groups under `path`.
    ///
    /// Groups are returned in their final order: descending size, then
    /// digest, with members sorted by path.
    ///
    /// # Errors
    ///
    /// Returns `FinderError` if the path is missing or not a directory, the
    /// worker pool cannot be created, or a shutdown is requested.
    pub fn find_duplicates(
        &self,
        path: &Path,
    ) -> Result<(Vec<CandidateGroup>, ScanSummary), FinderError> {
        let start_time = std::time::Instant::now();
        let mut summary = ScanSummary::default();

        if !path.exists() {
            return Err(FinderError::PathNotFound(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(FinderError::NotADirectory(path.to_path_buf()));
        }

        log::info!(
            "Starting {} scan of {}",
            self.config.mode,
            path.display()
        );

        let files = self.walk(path, &mut summary)?;

        log::info!(
            "Found {} candidate files ({} total)",
            summary.total_files,
            summary.total_size_display()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.io_threads)
            .build()
            .map_err(|e| FinderError::ThreadPool(e.to_string()))?;

        let mut groups = match self.config.mode.perceptual() {
            None => pool.install(|| self.exact_pipeline(files, &mut summary)),
            Some(_) => pool.install(|| self.perceptual_pipeline(files, &mut summary)),
        };

        if self.config.is_shutdown_requested() {
            return Err(FinderError::Interrupted);
        }

        sort_groups(&mut groups);
        summary.record_groups(&groups);
        summary.scan_duration = start_time.elapsed();

        if !summary.skipped.is_empty() {
            log::warn!(
                "{} file(s) could not be read and were left out",
                summary.skipped.len()
            );
        }
        log::info!(
            "Scan complete: {} group(s), {} file(s), {} reclaimable in {:.2?}",
            summary.duplicate_groups,
            summary.duplicate_files,
            summary.reclaimable_display(),
            summary.scan_duration
        );

        Ok((groups, summary))
    }

    fn walk(&self, path: &Path, summary: &mut ScanSummary) -> Result<Vec<FileRecord>, FinderError> {
        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_start("walking", 0);
            callback.on_message(&format!("Walking {}", path.display()));
        }

        let mut walker = Walker::new(path, self.config.walker_config.clone());
        if let Some(ref flag) = self.config.shutdown_flag {
            walker = walker.with_shutdown_flag(flag.clone());
        }

        let mut files = Vec::new();
        for result in walker.walk() {
            match result {
                Ok(file) => {
                    if let Some(ref callback) = self.config.progress_callback {
                        callback.on_progress(files.len() + 1, &file.path.to_string_lossy());
                    }
                    files.push(file);
                }
                Err(e) => summary.scan_errors.push(e),
            }
        }

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_end("walking");
        }

        if self.config.is_shutdown_requested() {
            return Err(FinderError::Interrupted);
        }

        summary.total_files = files.len();
        summary.total_size = files.iter().map(|f| f.size).sum();
        Ok(files)
    }

    fn exact_pipeline(
        &self,
        files: Vec<FileRecord>,
        summary: &mut ScanSummary,
    ) -> Vec<CandidateGroup> {
        let (buckets, stats) = group_by_size(files);
        summary.eliminated_by_size = stats.unique_sizes;

        log::info!(
            "Size grouping: {} -> {} files in {} bucket(s)",
            stats.total_files,
            stats.potential_duplicates,
            buckets.len()
        );

        let candidates: Vec<(u64, FileRecord)> = buckets
            .into_iter()
            .flat_map(|(size, bucket)| bucket.into_iter().map(move |f| (size, f)))
            .collect();

        let hashed = self.run_phase("hashing", candidates, |(size, file)| {
            if self.config.is_shutdown_requested() {
                return None;
            }
            match self.hasher.full_hash(&file.path) {
                Ok(hash) => Some(Ok((size, file.with_exact_hash(hash)))),
                Err(e) => {
                    log::warn!("Skipping unreadable file: {}", e);
                    Some(Err(SkippedFile {
                        path: file.path,
                        reason: e.to_string(),
                    }))
                }
            }
        });

        let mut rebucketed: std::collections::BTreeMap<u64, Vec<FileRecord>> =
            std::collections::BTreeMap::new();
        for result in hashed {
            match result {
                Ok((size, file)) => {
                    summary.fingerprinted += 1;
                    rebucketed.entry(size).or_default().push(file);
                }
                Err(skipped) => summary.skipped.push(skipped),
            }
        }

        rebucketed.into_values().flat_map(exact_groups).collect()
    }

    fn perceptual_pipeline(
        &self,
        files: Vec<FileRecord>,
        summary: &mut ScanSummary,
    ) -> Vec<CandidateGroup> {
        let Some(algorithm) = self.config.mode.perceptual() else {
            return Vec::new();
        };

        let fingerprinted = self.run_phase_with(
            "fingerprinting",
            files,
            || PerceptualHasher::new(algorithm),
            |hasher, file| {
                if self.config.is_shutdown_requested() {
                    return None;
                }
                match hasher.compute(&file.path) {
                    Ok(fp) => Some(Ok(file.with_fingerprint(fp))),
                    Err(e) => {
                        log::warn!("Skipping undecodable file: {}", e);
                        Some(Err(SkippedFile {
                            path: file.path,
                            reason: e.to_string(),
                        }))
                    }
                }
            },
        );

        let mut records = Vec::with_capacity(fingerprinted.len());
        for result in fingerprinted {
            match result {
                Ok(file) => records.push(file),
                Err(skipped) => summary.skipped.push(skipped),
            }
        }
        summary.fingerprinted = records.len();

        log::info!(
            "Clustering {} fingerprint(s) with threshold {}",
            records.len(),
            self.config.threshold
        );
        perceptual_groups(records, self.config.mode, self.config.threshold)
    }

    /// Map `items` in parallel with progress reporting; `None` results are
    /// dropped (shutdown).
    fn run_phase<T, R, F>(&self, phase: &str, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Option<R> + Sync + Send,
    {
        self.run_phase_with(phase, items, || (), |_, item| f(item))
    }

    fn run_phase_with<T, R, S, I, F>(&self, phase: &str, items: Vec<T>, init: I, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        I: Fn() -> S + Sync + Send,
        F: Fn(&mut S, T) -> Option<R> + Sync + Send,
    {
        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_start(phase, items.len());
        }

        let done = AtomicUsize::new(0);
        let results: Vec<R> = items
            .into_par_iter()
            .map_init(init, |state, item| {
                let result = f(state, item);
                let current = done.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(ref callback) = self.config.progress_callback {
                    callback.on_progress(current, phase);
                }
                result
            })
            .flatten()
            .collect();

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_end(phase);
        }
        results
    }
}
