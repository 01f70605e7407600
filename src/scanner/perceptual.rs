//! Perceptual image fingerprints for near-duplicate detection.
//!
//! Both algorithms reduce an image to a 64-bit [`Fingerprint`]; similarity
//! between two fingerprints is their Hamming distance (0..=64).
//!
//! - **aHash**: 8×8 grayscale thumbnail, bit set when a cell is brighter
//!   than the thumbnail mean. Computed with `image_hasher`.
//! - **pHash**: 32×32 grayscale thumbnail, 2-D DCT-II, the 8×8 block of
//!   lowest frequencies after the DC term, bit set when a coefficient is
//!   above the block median.

use std::f64::consts::PI;
use std::path::Path;

use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use image_hasher::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side of the fingerprint grid (8×8 = 64 bits).
const HASH_SIDE: usize = 8;

/// Side of the pHash thumbnail fed into the DCT.
const DCT_SIDE: usize = HASH_SIDE * 4;

/// Supported perceptual hashing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PerceptualAlgorithm {
    /// aHash (Average Hash) - mean-based, fast but less resilient.
    #[default]
    Ahash,
    /// pHash (Perceptual Hash) - DCT-based, stable under resizing and recompression.
    Phash,
}

impl std::fmt::Display for PerceptualAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ahash => write!(f, "aHash"),
            Self::Phash => write!(f, "pHash"),
        }
    }
}

/// A 64-bit perceptual fingerprint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Hamming distance between two fingerprints (0..=64).
    #[must_use]
    pub fn distance(self, other: Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Build a fingerprint from big-endian bytes; extra bytes are ignored.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(
            bytes
                .iter()
                .take(8)
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        )
    }

    /// Fixed-width lowercase hex (16 characters).
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }
}

/// Errors that can occur during perceptual hashing.
#[derive(Debug, Error)]
pub enum PerceptualError {
    /// Failed to open or decode the image.
    #[error("Failed to decode image {0}: {1}")]
    Decode(String, #[source] image::ImageError),
}

/// Computes perceptual fingerprints for images.
pub struct PerceptualHasher {
    algorithm: PerceptualAlgorithm,
    average: image_hasher::Hasher,
    basis: Vec<[f64; DCT_SIDE]>,
}

impl PerceptualHasher {
    /// Create a new `PerceptualHasher` with the given algorithm.
    #[must_use]
    pub fn new(algorithm: PerceptualAlgorithm) -> Self {
        let average = HasherConfig::new()
            .hash_size(HASH_SIDE as u32, HASH_SIDE as u32)
            .hash_alg(HashAlg::Mean)
            .resize_filter(FilterType::Lanczos3)
            .to_hasher();

        Self {
            algorithm,
            average,
            basis: dct_basis(),
        }
    }

    /// Get the algorithm used by this hasher.
    #[must_use]
    pub fn algorithm(&self) -> PerceptualAlgorithm {
        self.algorithm
    }

    /// Compute the fingerprint for an image file.
    ///
    /// # Errors
    ///
    /// Returns [`PerceptualError::Decode`] for unreadable, non-image or
    /// corrupt files.
    pub fn compute<P: AsRef<Path>>(&self, path: P) -> Result<Fingerprint, PerceptualError> {
        let path = path.as_ref();
        let img = load_oriented(path)
            .map_err(|e| PerceptualError::Decode(path.display().to_string(), e))?;
        Ok(self.fingerprint_image(&img))
    }

    /// Compute the fingerprint for an already decoded image.
    #[must_use]
    pub fn fingerprint_image(&self, img: &DynamicImage) -> Fingerprint {
        match self.algorithm {
            PerceptualAlgorithm::Ahash => {
                let gray = DynamicImage::ImageLuma8(img.to_luma8());
                Fingerprint::from_bytes(self.average.hash_image(&gray).as_bytes())
            }
            PerceptualAlgorithm::Phash => self.phash(img),
        }
    }

    fn phash(&self, img: &DynamicImage) -> Fingerprint {
        let thumb = img
            .grayscale()
            .resize_exact(DCT_SIDE as u32, DCT_SIDE as u32, FilterType::Lanczos3)
            .to_luma8();

        let pixels: Vec<f64> = thumb.pixels().map(|p| f64::from(p.0[0])).collect();

        // Row pass restricted to the frequencies we keep: rows 1..=8.
        let mut rows = [[0.0f64; DCT_SIDE]; HASH_SIDE];
        for (u, row) in rows.iter_mut().enumerate() {
            let basis_u = &self.basis[u + 1];
            for (y, cell) in row.iter_mut().enumerate() {
                *cell = (0..DCT_SIDE)
                    .map(|x| basis_u[x] * pixels[x * DCT_SIDE + y])
                    .sum();
            }
        }

        let mut coefficients = Vec::with_capacity(HASH_SIDE * HASH_SIDE);
        for row in &rows {
            for v in 1..=HASH_SIDE {
                let basis_v = &self.basis[v];
                coefficients.push((0..DCT_SIDE).map(|y| row[y] * basis_v[y]).sum::<f64>());
            }
        }

        let median = median(&coefficients);
        Fingerprint(
            coefficients
                .iter()
                .fold(0u64, |bits, c| (bits << 1) | u64::from(*c > median)),
        )
    }
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new(PerceptualAlgorithm::default())
    }
}

/// Decode an image and apply its EXIF orientation.
fn load_oriented(path: &Path) -> Result<DynamicImage, image::ImageError> {
    let mut decoder = ImageReader::open(path)
        .map_err(image::ImageError::IoError)?
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Orthonormal DCT-II basis, `basis[k][x]`.
fn dct_basis() -> Vec<[f64; DCT_SIDE]> {
    let n = DCT_SIDE as f64;
    (0..DCT_SIDE)
        .map(|k| {
            let scale = if k == 0 {
                (1.0 / n).sqrt()
            } else {
                (2.0 / n).sqrt()
            };
            let mut row = [0.0; DCT_SIDE];
            for (x, cell) in row.iter_mut().enumerate() {
                *cell = scale * ((PI / n) * (x as f64 + 0.5) * k as f64).cos();
            }
            row
        })
        .collect()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
