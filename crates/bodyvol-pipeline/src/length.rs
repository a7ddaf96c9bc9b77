//! Centerline length, overall and per mask.

use std::collections::BTreeMap;

use crate::mask::Mask;
use crate::types::{Calibration, Polyline, SegmentId, round_to};

/// Length of the centerline in pixels.
#[must_use]
pub fn pixel_length(centerline: &Polyline) -> f64 {
    centerline.arc_length()
}

/// Length of the centerline inside `mask`, in pixels.
///
/// Only consecutive point pairs with **both** points inside the mask
/// count. A pair straddling the mask boundary contributes nothing, so a
/// mask's length is slightly underestimated at each boundary crossing.
#[must_use]
pub fn masked_pixel_length(centerline: &Polyline, mask: &Mask) -> f64 {
    centerline
        .points()
        .windows(2)
        .filter(|w| mask.contains(w[0]) && mask.contains(w[1]))
        .map(|w| w[0].distance(w[1]))
        .sum()
}

/// Calibrated total length, rounded to `precision` decimals.
#[must_use]
pub fn total_length(centerline: &Polyline, calibration: Calibration, precision: u8) -> f64 {
    round_to(calibration.to_mm(pixel_length(centerline)), precision)
}

/// Calibrated length inside each mask, rounded to `precision` decimals.
#[must_use]
pub fn segment_lengths(
    centerline: &Polyline,
    masks: &BTreeMap<SegmentId, Mask>,
    calibration: Calibration,
    precision: u8,
) -> BTreeMap<SegmentId, f64> {
    masks
        .iter()
        .map(|(&id, mask)| {
            let mm = calibration.to_mm(masked_pixel_length(centerline, mask));
            (id, round_to(mm, precision))
        })
        .collect()
}

/// Total plus per-segment lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct LengthEstimate {
    /// Whole-centerline length (mm).
    pub total: f64,
    /// Length inside each segment mask (mm).
    pub segments: BTreeMap<SegmentId, f64>,
}

/// Estimate total and per-segment lengths.
#[must_use]
pub fn estimate(
    centerline: &Polyline,
    segments: &BTreeMap<SegmentId, Mask>,
    calibration: Calibration,
    precision: u8,
) -> LengthEstimate {
    LengthEstimate {
        total: total_length(centerline, calibration, precision),
        segments: segment_lengths(centerline, segments, calibration, precision),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Dimensions, Point};

    fn vertical(ys: &[f64]) -> Polyline {
        Polyline::new(ys.iter().map(|&y| Point::new(0.0, y)).collect())
    }

    #[test]
    fn total_length_is_calibrated() {
        let line = vertical(&[0.0, 10.0, 20.0]);
        let k = Calibration::mm_per_pixel(0.5).unwrap();
        assert!((total_length(&line, k, 3) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn total_length_is_rounded() {
        let line = Polyline::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]);
        let len = total_length(&line, Calibration::PIXELS_AS_MILLIMETERS, 2);
        assert!((len - 1.41).abs() < 1e-12);
    }

    #[test]
    fn straddling_pairs_are_dropped() {
        // Ten points along row 0; the mask covers columns 0..=8 only.
        let line = Polyline::new((0..10).map(|x| Point::new(f64::from(x), 0.0)).collect());
        let mask = Mask::from_fn(
            Dimensions {
                width: 12,
                height: 1,
            },
            |x, _| x <= 8,
        );
        assert!((masked_pixel_length(&line, &mask) - 8.0).abs() < 1e-12);

        let full = Mask::from_fn(
            Dimensions {
                width: 12,
                height: 1,
            },
            |_, _| true,
        );
        assert!((masked_pixel_length(&line, &full) - 9.0).abs() < 1e-12);
    }

    #[test]
    fn segments_split_the_line() {
        let dims = Dimensions {
            width: 30,
            height: 1,
        };
        let line = Polyline::new((0..30).map(|x| Point::new(f64::from(x), 0.0)).collect());
        let mut masks = BTreeMap::new();
        masks.insert(SegmentId(0), Mask::from_fn(dims, |x, _| x < 10));
        masks.insert(SegmentId(1), Mask::from_fn(dims, |x, _| x >= 10));
        let est = estimate(&line, &masks, Calibration::PIXELS_AS_MILLIMETERS, 3);
        assert!((est.total - 29.0).abs() < 1e-12);
        assert!((est.segments[&SegmentId(0)] - 9.0).abs() < 1e-12);
        assert!((est.segments[&SegmentId(1)] - 19.0).abs() < 1e-12);
        let sum: f64 = est.segments.values().sum();
        assert!(sum <= est.total);
    }

    #[test]
    fn mask_missing_the_line_has_zero_length() {
        let line = vertical(&[0.0, 1.0, 2.0]);
        let mask = Mask::empty(Dimensions {
            width: 3,
            height: 3,
        });
        assert!(masked_pixel_length(&line, &mask).abs() < f64::EPSILON);
    }
}
