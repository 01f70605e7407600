//! Duplicate grouping: size buckets, exact-hash groups and greedy
//! perceptual clusters.
//!
//! # Overview
//!
//! Size grouping is the cheap first pass of exact detection: files with
//! different sizes cannot be byte-identical. Perceptual modes skip it, since
//! size says nothing about visual similarity.
//!
//! # Example
//!
//! ```
//! use dupetriage::scanner::FileRecord;
//! use dupetriage::duplicates::group_by_size;
//! use std::path::PathBuf;
//!
//! let files = vec![
//!     FileRecord::new(PathBuf::from("/a.jpg"), 1024),
//!     FileRecord::new(PathBuf::from("/b.jpg"), 1024),
//!     FileRecord::new(PathBuf::from("/c.jpg"), 2048),
//! ];
//!
//! let (groups, stats) = group_by_size(files);
//!
//! assert_eq!(stats.total_files, 3);
//! assert_eq!(stats.potential_duplicates, 2);
//! assert_eq!(groups.len(), 1);
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::scanner::{hash_to_hex, FileRecord, Hash, PerceptualAlgorithm};

/// Largest meaningful Hamming distance between two 64-bit fingerprints.
pub const MAX_THRESHOLD: u8 = 64;

/// How a group was detected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Byte-identical content (BLAKE3)
    #[default]
    Exact,
    /// Mean-threshold perceptual fingerprint
    Ahash,
    /// DCT perceptual fingerprint
    Phash,
}

impl DetectionMode {
    /// The perceptual algorithm behind this mode, if any.
    #[must_use]
    pub fn perceptual(self) -> Option<PerceptualAlgorithm> {
        match self {
            Self::Exact => None,
            Self::Ahash => Some(PerceptualAlgorithm::Ahash),
            Self::Phash => Some(PerceptualAlgorithm::Phash),
        }
    }

    /// Whether the mode compares fingerprints with a distance threshold.
    #[must_use]
    pub fn is_perceptual(self) -> bool {
        self.perceptual().is_some()
    }

    /// Lowercase name used in folder names and persisted metadata.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Ahash => "ahash",
            Self::Phash => "phash",
        }
    }
}

impl std::fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exact" | "sha" => Ok(Self::Exact),
            "ahash" => Ok(Self::Ahash),
            "phash" => Ok(Self::Phash),
            other => Err(format!("unknown detection mode '{other}'")),
        }
    }
}

/// Statistics from size grouping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupingStats {
    /// Files considered
    pub total_files: usize,
    /// Files sharing their size with at least one other file
    pub potential_duplicates: usize,
    /// Files with a unique size (eliminated)
    pub unique_sizes: usize,
}

/// Group files by exact size, dropping buckets with a single file.
///
/// Bucket keys are ordered, and files inside a bucket keep their input order.
#[must_use]
pub fn group_by_size(files: Vec<FileRecord>) -> (BTreeMap<u64, Vec<FileRecord>>, GroupingStats) {
    let mut stats = GroupingStats {
        total_files: files.len(),
        ..Default::default()
    };

    let mut buckets: BTreeMap<u64, Vec<FileRecord>> = BTreeMap::new();
    for file in files {
        buckets.entry(file.size).or_default().push(file);
    }

    buckets.retain(|_, bucket| {
        if bucket.len() > 1 {
            stats.potential_duplicates += bucket.len();
            true
        } else {
            stats.unique_sizes += 1;
            false
        }
    });

    (buckets, stats)
}

/// A detected duplicate set before it is staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateGroup {
    /// Detection mode that produced the group
    pub mode: DetectionMode,
    /// Distance threshold (perceptual modes only)
    pub threshold: Option<u8>,
    /// Content hash hex (exact) or seed fingerprint hex (perceptual)
    pub digest: String,
    /// Members sorted by path
    pub files: Vec<FileRecord>,
}

impl CandidateGroup {
    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if this group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Member paths in group order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Sum of member sizes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Order groups by descending size, then digest; members by path.
pub fn sort_groups(groups: &mut [CandidateGroup]) {
    for group in groups.iter_mut() {
        group.files.sort_by(|a, b| a.path.cmp(&b.path));
    }
    groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.digest.cmp(&b.digest)));
}

/// Form exact groups from hashed records of one size bucket.
///
/// Records without an exact hash are ignored. Hashes shared by a single file
/// produce no group.
#[must_use]
pub fn exact_groups(bucket: Vec<FileRecord>) -> Vec<CandidateGroup> {
    let mut by_hash: BTreeMap<Hash, Vec<FileRecord>> = BTreeMap::new();
    for file in bucket {
        if let Some(hash) = file.exact_hash {
            by_hash.entry(hash).or_default().push(file);
        }
    }

    by_hash
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|(hash, files)| CandidateGroup {
            mode: DetectionMode::Exact,
            threshold: None,
            digest: hash_to_hex(&hash),
            files,
        })
        .collect()
}

/// Greedy single-pass clustering of fingerprinted records.
///
/// Records are processed in path order. Each unassigned record seeds a new
/// cluster that takes every later unassigned record within `threshold` of the
/// seed. Assigned records are never reconsidered, and single-member clusters
/// are dropped. Records without a fingerprint are ignored.
#[must_use]
pub fn perceptual_groups(
    mut records: Vec<FileRecord>,
    mode: DetectionMode,
    threshold: u8,
) -> Vec<CandidateGroup> {
    records.retain(|r| r.fingerprint.is_some());
    records.sort_by(|a, b| a.path.cmp(&b.path));

    let mut assigned = vec![false; records.len()];
    let mut clusters: Vec<(usize, Vec<usize>)> = Vec::new();

    for seed in 0..records.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let Some(seed_fp) = records[seed].fingerprint else {
            continue;
        };

        let mut members = vec![seed];
        for candidate in (seed + 1)..records.len() {
            if assigned[candidate] {
                continue;
            }
            let within = records[candidate]
                .fingerprint
                .is_some_and(|fp| seed_fp.distance(fp) <= u32::from(threshold));
            if within {
                assigned[candidate] = true;
                members.push(candidate);
            }
        }

        if members.len() > 1 {
            clusters.push((seed, members));
        }
    }

    let mut slots: Vec<Option<FileRecord>> = records.into_iter().map(Some).collect();
    clusters
        .into_iter()
        .map(|(seed, members)| {
            let digest = slots[seed]
                .as_ref()
                .and_then(|r| r.fingerprint)
                .map(|fp| fp.to_hex())
                .unwrap_or_default();
            let files = members
                .into_iter()
                .filter_map(|idx| slots[idx].take())
                .collect();
            CandidateGroup {
                mode,
                threshold: Some(threshold),
                digest,
                files,
            }
        })
        .collect()
}
