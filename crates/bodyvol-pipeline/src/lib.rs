//! bodyvol-pipeline: Morphometry from instance segmentation (sans-IO).
//!
//! Turns the polygon detections of a multi-part body (head, thorax,
//! abdomen, ...) into a calibrated length and volume through:
//! rasterize -> combine masks -> segment centroids -> centerline fit ->
//! trim and resample -> orthogonal cross-sections -> length and volume.
//!
//! This crate has **no I/O dependencies**: it operates on an in-memory
//! [`DetectionBatch`] and returns a structured [`Measurement`]. Reading
//! detector output and printing reports lives in `bodyvol-bench`.

pub mod area;
pub mod centroid;
pub mod combine;
pub mod diagnostics;
pub mod fit;
pub mod length;
pub mod mask;
pub mod pipeline;
pub mod raster;
pub mod refine;
pub mod slice;
pub mod types;
pub mod volume;

pub use combine::CombinedMasks;
pub use fit::FitMethod;
pub use mask::Mask;
pub use pipeline::Pipeline;
pub use slice::{CrossSection, CrossSections, OverflowPolicy};
pub use types::{
    Calibration, Detection, DetectionBatch, Dimensions, Junction, MeasureConfig, Measurement,
    NormalizedPolygon, PipelineError, Point, Polyline, Segment, SegmentId, SegmentOrder,
    SkipReason, SkippedInstance,
};

/// Run the full measurement pipeline.
///
/// Takes the detector output for one image and a configuration, then
/// produces a [`Measurement`] with total and per-segment lengths and
/// volumes, junction measurements, areas, and every intermediate the
/// numbers were derived from.
///
/// # Pipeline steps
///
/// 1. Filter detections and rasterize their polygons
/// 2. Union instances into whole-body, segment and junction masks
/// 3. Centroid of every segment mask
/// 4. Centerline through the centroids (orthogonal regression fallback)
/// 5. Trim to the body and resample uniformly
/// 6. Orthogonal cross-sections
/// 7. Length and frustum volume estimation
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` is invalid.
/// Returns [`PipelineError::NoDetections`] if no detection is usable.
/// Returns [`PipelineError::InsufficientPoints`] or
/// [`PipelineError::DegenerateCurve`] if no centerline can be fitted.
pub fn process(
    batch: &DetectionBatch,
    config: &MeasureConfig,
) -> Result<Measurement, PipelineError> {
    let measured = Pipeline::new(batch.clone(), config.clone())
        .rasterize()?
        .combine()?
        .locate_centroids()
        .fit_centerline()?
        .refine()?
        .slice()?
        .estimate();
    Ok(measured.into_result())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DIMS: Dimensions = Dimensions {
        width: 120,
        height: 60,
    };

    /// Axis-aligned box in pixel units, normalized to `DIMS`.
    fn boxed(class: u32, x0: f64, y0: f64, x1: f64, y1: f64) -> Detection {
        let (w, h) = (f64::from(DIMS.width), f64::from(DIMS.height));
        Detection {
            polygon: NormalizedPolygon::new(vec![
                Point::new(x0 / w, y0 / h),
                Point::new(x1 / w, y0 / h),
                Point::new(x1 / w, y1 / h),
                Point::new(x0 / w, y1 / h),
            ]),
            class_id: SegmentId(class),
            confidence: 0.95,
        }
    }

    fn config(k: f64) -> MeasureConfig {
        let order = SegmentOrder::new(vec![
            Segment::new(0, "head"),
            Segment::new(1, "thorax"),
            Segment::new(2, "abdomen"),
        ])
        .unwrap();
        MeasureConfig::new(order, Calibration::mm_per_pixel(k).unwrap())
    }

    fn body() -> DetectionBatch {
        DetectionBatch {
            dimensions: DIMS,
            detections: vec![
                boxed(0, 10.0, 25.0, 30.0, 35.0),
                boxed(1, 30.0, 20.0, 70.0, 40.0),
                boxed(2, 70.0, 22.0, 110.0, 38.0),
            ],
        }
    }

    #[test]
    fn process_measures_a_straight_body() {
        let m = process(&body(), &config(1.0)).unwrap();
        assert_eq!(m.fit_method, FitMethod::Spline);
        assert!((m.total_length - 100.0).abs() < 1.5, "{}", m.total_length);
        assert_eq!(m.segment_lengths.len(), 3);
        let seg_sum: f64 = m.segment_lengths.values().sum();
        assert!(seg_sum <= m.total_length);
        assert!(m.total_volume > 0.0);
        assert!(!m.is_degraded());
    }

    #[test]
    fn total_volume_matches_segment_sum() {
        let m = process(&body(), &config(1.0)).unwrap();
        let sum: f64 = m.segment_volumes.values().sum();
        assert!((m.total_volume - sum).abs() < 0.01);
    }

    #[test]
    fn calibration_scales_length_and_volume() {
        let px = process(&body(), &config(1.0)).unwrap();
        let mm = process(&body(), &config(0.1)).unwrap();
        assert!((mm.total_length - px.total_length * 0.1).abs() < 0.01);
        assert!((mm.total_volume - px.total_volume * 0.001).abs() < 0.01);
    }

    #[test]
    fn process_with_no_detections() {
        let batch = DetectionBatch {
            dimensions: DIMS,
            detections: Vec::new(),
        };
        assert!(matches!(
            process(&batch, &config(1.0)),
            Err(PipelineError::NoDetections)
        ));
    }

    #[test]
    fn process_is_deterministic() {
        let a = process(&body(), &config(0.05)).unwrap();
        let b = process(&body(), &config(0.05)).unwrap();
        assert_eq!(a, b);
    }
}
