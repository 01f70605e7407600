//! Duplicate detection module.
//!
//! This module provides functionality for:
//! - Size-based file grouping (exact mode pre-filter)
//! - Exact content-hash groups
//! - Greedy perceptual clustering (aHash / pHash)
//! - The [`DuplicateFinder`] pipeline tying them together

pub mod finder;
pub mod groups;

pub use finder::{
    DuplicateFinder, FinderConfig, FinderError, ScanSummary, SkippedFile, DEFAULT_THRESHOLD,
};
pub use groups::{
    exact_groups, group_by_size, perceptual_groups, sort_groups, CandidateGroup, DetectionMode,
    GroupingStats, MAX_THRESHOLD,
};
