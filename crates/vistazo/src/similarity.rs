//! Similarity scoring between two screenshots.
//!
//! The primary metric is windowed SSIM over luminance, which tolerates
//! anti-aliasing jitter and sub-pixel rendering noise. The pixel-match
//! fallback is stricter: any channel difference marks the pixel as changed.
//! Every score records which metric produced it.

use crate::raster::RasterImage;
use crate::result::{VistazoError, VistazoResult};
use image_compare::Algorithm;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Side length of the SSIM window; smaller images are scored by pixel match
pub const SSIM_WINDOW: u32 = 8;

/// Algorithm used to compute a similarity score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Structural similarity over luminance
    #[default]
    Ssim,
    /// `1 - differing_pixels / total_pixels`
    PixelMatch,
}

impl std::fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ssim => f.write_str("ssim"),
            Self::PixelMatch => f.write_str("pixel_match"),
        }
    }
}

/// A similarity value in `[0, 1]` and the metric that produced it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    /// Score, 1.0 = identical under the metric
    pub value: f64,
    /// Metric that produced the score
    pub metric: SimilarityMetric,
}

impl SimilarityScore {
    /// Whether the score meets a threshold (inclusive)
    #[must_use]
    pub fn passes(&self, threshold: f64) -> bool {
        self.value >= threshold
    }

    /// Score as a percentage
    #[must_use]
    pub fn percent(&self) -> f64 {
        self.value * 100.0
    }
}

/// Compute the similarity of `current` to `reference`
///
/// When dimensions differ, `current` is resized to `reference`'s dimensions
/// first. Images too small for an SSIM window fall back to pixel match.
pub fn similarity(
    reference: &RasterImage,
    current: &RasterImage,
    metric: SimilarityMetric,
) -> VistazoResult<SimilarityScore> {
    let current = current.aligned_to(reference);
    let metric = effective_metric(reference, metric);

    if reference.as_rgb() == current.as_rgb() {
        return Ok(SimilarityScore { value: 1.0, metric });
    }

    let value = match metric {
        SimilarityMetric::Ssim => ssim(reference, &current)?,
        SimilarityMetric::PixelMatch => pixel_match(reference, &current),
    };

    Ok(SimilarityScore {
        value: value.clamp(0.0, 1.0),
        metric,
    })
}

/// Decode two files and compute their similarity
pub fn similarity_of_files(
    reference: &Path,
    current: &Path,
    metric: SimilarityMetric,
) -> VistazoResult<SimilarityScore> {
    let reference = RasterImage::open(reference)?;
    let current = RasterImage::open(current)?;
    similarity(&reference, &current, metric)
}

fn effective_metric(image: &RasterImage, requested: SimilarityMetric) -> SimilarityMetric {
    if requested == SimilarityMetric::Ssim
        && (image.width() < SSIM_WINDOW || image.height() < SSIM_WINDOW)
    {
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            "image smaller than SSIM window, using pixel match"
        );
        SimilarityMetric::PixelMatch
    } else {
        requested
    }
}

fn ssim(reference: &RasterImage, current: &RasterImage) -> VistazoResult<f64> {
    let result = image_compare::gray_similarity_structure(
        &Algorithm::MSSIMSimple,
        &reference.to_luma(),
        &current.to_luma(),
    )
    .map_err(|e| VistazoError::ImageProcessing {
        message: format!("SSIM calculation failed: {e:?}"),
    })?;

    if result.score.is_finite() {
        Ok(result.score)
    } else {
        Err(VistazoError::ImageProcessing {
            message: format!("SSIM produced a non-finite score ({})", result.score),
        })
    }
}

fn pixel_match(reference: &RasterImage, current: &RasterImage) -> f64 {
    let differing = reference
        .as_rgb()
        .pixels()
        .zip(current.as_rgb().pixels())
        .filter(|(a, b)| a != b)
        .count();
    1.0 - differing as f64 / reference.pixel_count() as f64
}
