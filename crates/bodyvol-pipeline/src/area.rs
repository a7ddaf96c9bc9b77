//! Projected area and outline measurements per segment.
//!
//! Areas are pixel counts scaled by `k²`. The perimeter is the length of
//! the outer borders found by Suzuki-Abe border following
//! (`imageproc::contours::find_contours`), scaled by `k`.

use std::collections::BTreeMap;

use imageproc::contours::{BorderType, Contour, find_contours};
use serde::{Deserialize, Serialize};

use crate::mask::Mask;
use crate::types::{Calibration, SegmentId, round_to};

/// Area and outline of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentArea {
    /// Foreground pixel count.
    pub pixels: u64,
    /// Projected area (mm²).
    pub area: f64,
    /// Length of the outer outline (mm).
    pub perimeter: f64,
    /// Share of the whole-body area, in `[0, 1]` unless masks overlap.
    pub body_fraction: f64,
}

/// Length of a closed border, in pixels.
fn border_length(contour: &Contour<u32>) -> f64 {
    let pts = &contour.points;
    if pts.len() < 2 {
        return 0.0;
    }
    let step = |a: &imageproc::point::Point<u32>, b: &imageproc::point::Point<u32>| {
        let dx = f64::from(a.x) - f64::from(b.x);
        let dy = f64::from(a.y) - f64::from(b.y);
        dx.hypot(dy)
    };
    let open: f64 = pts.windows(2).map(|w| step(&w[0], &w[1])).sum();
    open + step(&pts[pts.len() - 1], &pts[0])
}

/// Total outer-border length of a mask, in pixels.
#[must_use]
pub fn perimeter(mask: &Mask) -> f64 {
    let contours: Vec<Contour<u32>> = find_contours(mask.as_gray());
    contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .map(border_length)
        .sum()
}

/// Measure `mask` against the whole-body pixel count `body_pixels`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn measure(mask: &Mask, body_pixels: u64, calibration: Calibration, precision: u8) -> SegmentArea {
    let pixels = mask.count();
    let k = calibration.factor();
    let body_fraction = if body_pixels == 0 {
        0.0
    } else {
        pixels as f64 / body_pixels as f64
    };
    SegmentArea {
        pixels,
        area: round_to(pixels as f64 * k * k, precision),
        perimeter: round_to(calibration.to_mm(perimeter(mask)), precision),
        body_fraction: round_to(body_fraction, precision),
    }
}

/// Measure every segment against the whole body.
#[must_use]
pub fn segment_areas(
    segments: &BTreeMap<SegmentId, Mask>,
    body: &Mask,
    calibration: Calibration,
    precision: u8,
) -> BTreeMap<SegmentId, SegmentArea> {
    let body_pixels = body.count();
    segments
        .iter()
        .map(|(&id, mask)| (id, measure(mask, body_pixels, calibration, precision)))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Dimensions;

    const DIMS: Dimensions = Dimensions {
        width: 20,
        height: 20,
    };

    fn square(x0: u32, y0: u32, side: u32) -> Mask {
        Mask::from_fn(DIMS, |x, y| {
            (x0..x0 + side).contains(&x) && (y0..y0 + side).contains(&y)
        })
    }

    #[test]
    fn square_perimeter_traces_pixel_centers() {
        // A 5×5 block's outer border runs through the centers of its edge
        // pixels: four sides of length 4.
        assert!((perimeter(&square(3, 3, 5)) - 16.0).abs() < 1e-9);
    }

    #[test]
    fn empty_mask_has_no_perimeter() {
        assert!(perimeter(&Mask::empty(DIMS)).abs() < f64::EPSILON);
    }

    #[test]
    fn single_pixel_has_zero_perimeter() {
        assert!(perimeter(&square(4, 4, 1)).abs() < f64::EPSILON);
    }

    #[test]
    fn two_blobs_add_up() {
        let a = square(1, 1, 3);
        let b = square(10, 10, 3);
        let both = a.union(&b).unwrap();
        assert!((perimeter(&both) - 16.0).abs() < 1e-9);
    }

    #[test]
    fn area_is_calibrated_squared() {
        let k = Calibration::mm_per_pixel(0.5).unwrap();
        let m = measure(&square(0, 0, 4), 32, k, 3);
        assert_eq!(m.pixels, 16);
        assert!((m.area - 4.0).abs() < 1e-12);
        assert!((m.perimeter - 6.0).abs() < 1e-12);
        assert!((m.body_fraction - 0.5).abs() < 1e-12);
    }

    #[test]
    fn fractions_of_a_partitioned_body_sum_to_one() {
        let left = Mask::from_fn(DIMS, |x, _| x < 5);
        let right = Mask::from_fn(DIMS, |x, _| x >= 5);
        let body = left.union(&right).unwrap();
        let mut segments = BTreeMap::new();
        segments.insert(SegmentId(0), left);
        segments.insert(SegmentId(1), right);
        let areas = segment_areas(&segments, &body, Calibration::PIXELS_AS_MILLIMETERS, 3);
        let total: f64 = areas.values().map(|a| a.body_fraction).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((areas[&SegmentId(0)].body_fraction - 0.25).abs() < 1e-12);
    }

    #[test]
    fn empty_body_gives_zero_fraction() {
        let m = measure(&Mask::empty(DIMS), 0, Calibration::PIXELS_AS_MILLIMETERS, 3);
        assert!(m.body_fraction.abs() < f64::EPSILON);
        assert_eq!(m.pixels, 0);
    }
}
