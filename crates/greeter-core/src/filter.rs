//! Detection validity filter: region of interest, minimum size, confidence.

use crate::types::{Detection, Surface};
use serde::{Deserialize, Serialize};

/// Lower bound of the region of interest, as a fraction of each surface axis.
const ROI_MIN_FRAC: f32 = 0.15;
/// Upper bound of the region of interest, as a fraction of each surface axis.
const ROI_MAX_FRAC: f32 = 0.85;

/// Thresholds a detection must meet to count as an engageable face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Minimum detector confidence (inclusive).
    pub min_probability: f32,
    /// Minimum face width as a fraction of surface width (inclusive).
    pub min_face_frac: f32,
    /// Require the face center to fall inside the central region.
    pub use_roi: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_probability: 0.65,
            min_face_frac: 0.07,
            use_roi: true,
        }
    }
}

/// Returns true if `det` is centered in the ROI (when enabled), wide enough,
/// and confident enough. All bounds are inclusive.
pub fn is_valid(det: &Detection, surface: Surface, config: &FilterConfig) -> bool {
    let width = surface.width as f32;
    let height = surface.height as f32;

    let inside_roi = if config.use_roi {
        let (cx, cy) = det.center();
        cx >= width * ROI_MIN_FRAC
            && cx <= width * ROI_MAX_FRAC
            && cy >= height * ROI_MIN_FRAC
            && cy <= height * ROI_MAX_FRAC
    } else {
        true
    };

    let big_enough = det.width() >= width * config.min_face_frac;
    let confident = det.probability.unwrap_or(0.0) >= config.min_probability;

    inside_roi && big_enough && confident
}

/// Number of detections in `detections` that pass [`is_valid`].
pub fn count_valid(detections: &[Detection], surface: Surface, config: &FilterConfig) -> usize {
    detections
        .iter()
        .filter(|det| is_valid(det, surface, config))
        .count()
}
