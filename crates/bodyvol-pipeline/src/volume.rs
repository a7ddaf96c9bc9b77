//! Volume by stacking elliptical frusta between consecutive cross-sections.
//!
//! Each cross-section is modelled as an ellipse whose in-plane axis is the
//! observed section width and whose out-of-plane axis is the mean body
//! width `h_mean`, since depth is not observable from a single view.
//! Consecutive ellipses are joined by a frustum:
//!
//! ```text
//! A = π · (w·k / 2) · (h_mean·k / 2)
//! V = d / 3 · (A₁ + A₂ + √(A₁·A₂))
//! ```
//!
//! where `d` is the calibrated arc distance between the two anchors.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use crate::slice::CrossSection;
use crate::types::{Calibration, SegmentId, round_to};

/// Area of an ellipse with full axis lengths `width` and `height`.
#[must_use]
pub fn ellipse_area(width: f64, height: f64) -> f64 {
    PI * (width / 2.0) * (height / 2.0)
}

/// Volume of a frustum with end areas `a1`, `a2` and height `d`.
#[must_use]
pub fn frustum_volume(a1: f64, a2: f64, d: f64) -> f64 {
    d / 3.0 * (a1 + a2 + (a1 * a2).sqrt())
}

/// Unrounded volume (mm³) over an ordered list of sections.
///
/// A pair in which either section has zero width contributes nothing, so
/// a segment's volume never extends past its own mask.
#[must_use]
pub fn sections_volume(sections: &[CrossSection], h_mean: f64, calibration: Calibration) -> f64 {
    let depth = calibration.to_mm(h_mean);
    sections
        .windows(2)
        .filter(|w| !w[0].is_empty() && !w[1].is_empty())
        .map(|w| {
            let a1 = ellipse_area(calibration.to_mm(w[0].width()), depth);
            let a2 = ellipse_area(calibration.to_mm(w[1].width()), depth);
            let d = calibration.to_mm((w[1].position - w[0].position).abs());
            frustum_volume(a1, a2, d)
        })
        .sum()
}

/// Total plus per-segment volumes.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeEstimate {
    /// Sum of the segment volumes (mm³).
    pub total: f64,
    /// Volume of each segment (mm³).
    pub segments: BTreeMap<SegmentId, f64>,
}

/// Estimate per-segment volumes and their total, rounded to `precision`.
///
/// The total is the rounded sum of the unrounded segment volumes.
#[must_use]
pub fn estimate(
    segments: &BTreeMap<SegmentId, Vec<CrossSection>>,
    h_mean: f64,
    calibration: Calibration,
    precision: u8,
) -> VolumeEstimate {
    let raw: BTreeMap<SegmentId, f64> = segments
        .iter()
        .map(|(&id, sections)| (id, sections_volume(sections, h_mean, calibration)))
        .collect();
    let total = round_to(raw.values().sum(), precision);
    VolumeEstimate {
        total,
        segments: raw
            .into_iter()
            .map(|(id, v)| (id, round_to(v, precision)))
            .collect(),
    }
}
