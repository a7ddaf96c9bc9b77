//! Shared types for the bodyvol measurement pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::area::SegmentArea;
use crate::combine::CombinedMasks;
use crate::fit::FitMethod;
use crate::slice::{CrossSections, OverflowPolicy};

/// Re-export `GrayImage` so downstream crates can reference raster mask
/// data without depending on `image` directly.
pub use image::GrayImage;

/// A 2D point in pixel-index coordinates.
///
/// Pixel `(col, row)` has its center at `(col as f64, row as f64)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Linear interpolation towards `other` (`t = 0` is `self`, `t = 1` is `other`).
    #[must_use]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        Self::new(
            t.mul_add(other.x - self.x, self.x),
            t.mul_add(other.y - self.y, self.y),
        )
    }

    /// `self + direction * distance`.
    #[must_use]
    pub fn offset(self, direction: (f64, f64), distance: f64) -> Self {
        Self::new(
            direction.0.mul_add(distance, self.x),
            direction.1.mul_add(distance, self.y),
        )
    }

    /// Returns `true` if both coordinates are finite.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// A sequence of connected points forming a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline(Vec<Point>);

impl Polyline {
    /// Create a new polyline from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the polyline has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the polyline.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the first point, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Point> {
        self.0.first()
    }

    /// Returns the last point, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.0.last()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Total length of the path in pixels.
    #[must_use]
    pub fn arc_length(&self) -> f64 {
        self.0.windows(2).map(|w| w[0].distance(w[1])).sum()
    }

    /// Cumulative arc length at every point, starting at `0.0`.
    #[must_use]
    pub fn cumulative_lengths(&self) -> Vec<f64> {
        let mut acc = 0.0;
        let mut out = Vec::with_capacity(self.0.len());
        for (i, p) in self.0.iter().enumerate() {
            if i > 0 {
                acc += self.0[i - 1].distance(*p);
            }
            out.push(acc);
        }
        out
    }

    /// A copy of the polyline with its point order reversed.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self(self.0.iter().rev().copied().collect())
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total pixel count (`width * height`).
    #[must_use]
    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Length of the image diagonal in pixels.
    #[must_use]
    pub fn diagonal(self) -> f64 {
        f64::from(self.width).hypot(f64::from(self.height))
    }
}

// ───────────────────────── Segment identity ──────────────────────────

/// Integer class id of an anatomical segment, as emitted by the detector.
///
/// This is the only key type used for per-segment maps. Label names are
/// resolved through [`SegmentOrder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub u32);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A segment class id paired with its human-readable label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Detector class id.
    pub id: SegmentId,
    /// Label name (e.g. `"head"`).
    pub name: String,
}

impl Segment {
    /// Create a new segment.
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: SegmentId(id),
            name: name.into(),
        }
    }
}

/// Two segments adjacent in the configured [`SegmentOrder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Junction {
    /// The segment closer to the head.
    pub anterior: SegmentId,
    /// The segment closer to the tail.
    pub posterior: SegmentId,
}

impl fmt::Display for Junction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.anterior, self.posterior)
    }
}

/// Head-to-tail ordering of the body's segments.
///
/// The order is taken on trust from configuration: nothing checks that it
/// matches the real body topology in the image. Junctions are derived from
/// adjacency in this list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Segment>", into = "Vec<Segment>")]
pub struct SegmentOrder(Vec<Segment>);

impl SegmentOrder {
    /// Create a segment order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the list is empty or a
    /// class id or name appears twice.
    pub fn new(segments: Vec<Segment>) -> Result<Self, PipelineError> {
        if segments.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "segment order must name at least one segment".to_string(),
            ));
        }
        for (i, seg) in segments.iter().enumerate() {
            if segments[..i].iter().any(|s| s.id == seg.id) {
                return Err(PipelineError::InvalidConfig(format!(
                    "segment class id {} is listed more than once",
                    seg.id
                )));
            }
            if segments[..i].iter().any(|s| s.name == seg.name) {
                return Err(PipelineError::InvalidConfig(format!(
                    "segment name {:?} is listed more than once",
                    seg.name
                )));
            }
        }
        Ok(Self(segments))
    }

    /// The segments, head first.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Class ids, head first.
    pub fn ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.0.iter().map(|s| s.id)
    }

    /// Position of `id` in the head-to-tail order.
    #[must_use]
    pub fn position(&self, id: SegmentId) -> Option<usize> {
        self.0.iter().position(|s| s.id == id)
    }

    /// Returns `true` if `id` is part of the order.
    #[must_use]
    pub fn contains(&self, id: SegmentId) -> bool {
        self.position(id).is_some()
    }

    /// Label name for `id`.
    #[must_use]
    pub fn name(&self, id: SegmentId) -> Option<&str> {
        self.0.iter().find(|s| s.id == id).map(|s| s.name.as_str())
    }

    /// Adjacent segment pairs, head first.
    pub fn junctions(&self) -> impl Iterator<Item = Junction> + '_ {
        self.0.windows(2).map(|w| Junction {
            anterior: w[0].id,
            posterior: w[1].id,
        })
    }
}

impl TryFrom<Vec<Segment>> for SegmentOrder {
    type Error = PipelineError;

    fn try_from(segments: Vec<Segment>) -> Result<Self, Self::Error> {
        Self::new(segments)
    }
}

impl From<SegmentOrder> for Vec<Segment> {
    fn from(order: SegmentOrder) -> Self {
        order.0
    }
}

// ───────────────────────── Detector contract ─────────────────────────

/// Polygon outline of one detected instance, in normalized `[0, 1]²`
/// image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedPolygon(Vec<Point>);

impl NormalizedPolygon {
    /// Create a polygon from normalized vertices.
    #[must_use]
    pub const fn new(vertices: Vec<Point>) -> Self {
        Self(vertices)
    }

    /// The normalized vertices.
    #[must_use]
    pub fn vertices(&self) -> &[Point] {
        &self.0
    }

    /// Number of vertices.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the polygon has no vertices.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Scale the vertices to pixel units for an image of `dimensions`.
    ///
    /// The result is in continuous image space: the image spans
    /// `[0, width] × [0, height]` and pixel `(col, row)` covers
    /// `[col, col + 1) × [row, row + 1)`.
    #[must_use]
    pub fn to_image_space(&self, dimensions: Dimensions) -> Vec<Point> {
        let w = f64::from(dimensions.width);
        let h = f64::from(dimensions.height);
        self.0.iter().map(|p| Point::new(p.x * w, p.y * h)).collect()
    }
}

/// One detected part instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Outline in normalized coordinates.
    pub polygon: NormalizedPolygon,
    /// Detector class id.
    pub class_id: SegmentId,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Everything the detector produced for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    /// Source image dimensions, used for denormalization.
    pub dimensions: Dimensions,
    /// Detected instances, in detector order.
    pub detections: Vec<Detection>,
}

// ───────────────────────── Calibration ───────────────────────────────

/// Millimeters per pixel.
///
/// Always supplied by the caller. Use
/// [`PIXELS_AS_MILLIMETERS`](Self::PIXELS_AS_MILLIMETERS) to report raw
/// pixel measurements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Calibration(f64);

impl Calibration {
    /// `k = 1`: pixels are treated as millimeters.
    pub const PIXELS_AS_MILLIMETERS: Self = Self(1.0);

    /// Create a calibration from a millimeter-per-pixel factor.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] unless `k` is finite and
    /// strictly positive.
    pub fn mm_per_pixel(k: f64) -> Result<Self, PipelineError> {
        if k.is_finite() && k > 0.0 {
            Ok(Self(k))
        } else {
            Err(PipelineError::InvalidConfig(format!(
                "calibration factor must be finite and positive, got {k}"
            )))
        }
    }

    /// The scale factor `k` in mm / pixel.
    #[must_use]
    pub const fn factor(self) -> f64 {
        self.0
    }

    /// Convert a pixel-space linear measurement to millimeters.
    #[must_use]
    pub fn to_mm(self, pixels: f64) -> f64 {
        pixels * self.0
    }
}

impl TryFrom<f64> for Calibration {
    type Error = PipelineError;

    fn try_from(k: f64) -> Result<Self, Self::Error> {
        Self::mm_per_pixel(k)
    }
}

impl From<Calibration> for f64 {
    fn from(c: Calibration) -> Self {
        c.0
    }
}

/// Round `value` to `decimals` decimal places (half away from zero).
#[must_use]
pub fn round_to(value: f64, decimals: u8) -> f64 {
    let scale = 10_f64.powi(i32::from(decimals));
    (value * scale).round() / scale
}

// ───────────────────────── Configuration ─────────────────────────────

/// Configuration for the measurement pipeline.
///
/// Has no `Default`: the segment order and the calibration must always be
/// stated by the caller. Every other field has a `DEFAULT_*` constant that
/// [`MeasureConfig::new`] applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureConfig {
    /// Head-to-tail segment order. Also maps class ids to names.
    pub segments: SegmentOrder,

    /// Pixel-to-millimeter scale factor.
    pub calibration: Calibration,

    /// Number of orthogonal cross-sections `M` cast along the centerline.
    pub cross_sections: usize,

    /// What to do when `cross_sections` exceeds `resample_count`.
    pub overflow: OverflowPolicy,

    /// Number of arc-length-uniform centerline points `N`.
    pub resample_count: usize,

    /// Polynomial degree of the orthogonal-regression fallback.
    pub fallback_degree: u32,

    /// Number of points sampled along the fitted curve before trimming.
    pub fit_samples: usize,

    /// How far the spline is continued past the first and last centroid,
    /// as a fraction of the centroid chord length.
    pub extrapolation: f64,

    /// Marching step (pixels) used when clipping cross-sections to a mask.
    pub ray_step: f64,

    /// Detections below this confidence are skipped.
    pub min_confidence: f32,

    /// Upper bound on the pixels fed to the orthogonal regression.
    pub odr_max_points: usize,

    /// Iteration cap of the orthogonal regression.
    pub odr_iterations: usize,

    /// Decimal places for reported lengths.
    pub length_precision: u8,

    /// Decimal places for reported volumes.
    pub volume_precision: u8,

    /// Decimal places for reported areas and perimeters.
    pub area_precision: u8,
}

impl MeasureConfig {
    /// Default number of cross-sections.
    pub const DEFAULT_CROSS_SECTIONS: usize = 150;
    /// Default centerline resample count.
    pub const DEFAULT_RESAMPLE_COUNT: usize = 110;
    /// Default fallback polynomial degree.
    pub const DEFAULT_FALLBACK_DEGREE: u32 = 3;
    /// Default dense sample count of the fitted curve.
    pub const DEFAULT_FIT_SAMPLES: usize = 1000;
    /// Default spline continuation past the end centroids.
    pub const DEFAULT_EXTRAPOLATION: f64 = 0.5;
    /// Default cross-section marching step in pixels.
    pub const DEFAULT_RAY_STEP: f64 = 0.5;
    /// Default minimum detection confidence (keep everything).
    pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.0;
    /// Default cap on regression input pixels.
    pub const DEFAULT_ODR_MAX_POINTS: usize = 20_000;
    /// Default regression iteration cap.
    pub const DEFAULT_ODR_ITERATIONS: usize = 50;
    /// Default decimal places for every reported metric.
    pub const DEFAULT_PRECISION: u8 = 3;

    /// Create a config with the given segment order and calibration and
    /// defaults everywhere else.
    #[must_use]
    pub const fn new(segments: SegmentOrder, calibration: Calibration) -> Self {
        Self {
            segments,
            calibration,
            cross_sections: Self::DEFAULT_CROSS_SECTIONS,
            overflow: OverflowPolicy::Clamp,
            resample_count: Self::DEFAULT_RESAMPLE_COUNT,
            fallback_degree: Self::DEFAULT_FALLBACK_DEGREE,
            fit_samples: Self::DEFAULT_FIT_SAMPLES,
            extrapolation: Self::DEFAULT_EXTRAPOLATION,
            ray_step: Self::DEFAULT_RAY_STEP,
            min_confidence: Self::DEFAULT_MIN_CONFIDENCE,
            odr_max_points: Self::DEFAULT_ODR_MAX_POINTS,
            odr_iterations: Self::DEFAULT_ODR_ITERATIONS,
            length_precision: Self::DEFAULT_PRECISION,
            volume_precision: Self::DEFAULT_PRECISION,
            area_precision: Self::DEFAULT_PRECISION,
        }
    }

    /// Check the numeric invariants of the config.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the first
    /// violated invariant.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));
        if self.cross_sections == 0 {
            return invalid("cross_sections must be at least 1".to_string());
        }
        if self.resample_count < 2 {
            return invalid(format!(
                "resample_count must be at least 2, got {}",
                self.resample_count
            ));
        }
        if self.fallback_degree == 0 {
            return invalid("fallback_degree must be at least 1".to_string());
        }
        if self.fit_samples < 2 {
            return invalid(format!(
                "fit_samples must be at least 2, got {}",
                self.fit_samples
            ));
        }
        if !(self.extrapolation.is_finite() && self.extrapolation >= 0.0) {
            return invalid(format!(
                "extrapolation must be finite and non-negative, got {}",
                self.extrapolation
            ));
        }
        if !(self.ray_step.is_finite() && self.ray_step > 0.0) {
            return invalid(format!(
                "ray_step must be finite and positive, got {}",
                self.ray_step
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return invalid(format!(
                "min_confidence must lie in [0, 1], got {}",
                self.min_confidence
            ));
        }
        if self.odr_max_points < 2 {
            return invalid("odr_max_points must be at least 2".to_string());
        }
        Ok(())
    }
}

// ───────────────────────── Results ───────────────────────────────────

/// Why a detection (or a segment) did not contribute to the measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Detector confidence below `min_confidence`.
    LowConfidence {
        /// The rejected confidence.
        confidence: f32,
    },
    /// Class id not present in the configured segment order.
    UnknownSegment,
    /// A recoverable pipeline error local to this instance or segment.
    Failed(PipelineError),
}

/// A detection or segment left out of the measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedInstance {
    /// Index into [`DetectionBatch::detections`], or `None` when the
    /// whole segment was skipped after combining.
    pub index: Option<usize>,
    /// Class id of the skipped detection or segment.
    pub class_id: SegmentId,
    /// Why it was skipped.
    pub reason: SkipReason,
}

/// Length and volume measured over a junction mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionMeasurement {
    /// The adjacent segment pair.
    pub junction: Junction,
    /// Centerline length inside the junction mask (mm).
    pub length: f64,
    /// Volume integrated over the junction's cross-sections (mm³).
    pub volume: f64,
}

/// Result of running the full measurement pipeline on one image.
///
/// Segments absent from `segment_lengths` / `segment_volumes` could not
/// be measured (not detected, or skipped); a present `0.0` is a measured
/// zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Source image dimensions in pixels.
    pub dimensions: Dimensions,
    /// Length of the whole centerline (mm).
    pub total_length: f64,
    /// Centerline length inside each segment mask (mm).
    pub segment_lengths: BTreeMap<SegmentId, f64>,
    /// Sum of the per-segment volumes (mm³).
    pub total_volume: f64,
    /// Volume of each segment (mm³).
    pub segment_volumes: BTreeMap<SegmentId, f64>,
    /// Length and volume over each junction; not part of the totals.
    pub junctions: Vec<JunctionMeasurement>,
    /// Area and outline measurements per segment.
    pub areas: BTreeMap<SegmentId, SegmentArea>,
    /// Mean body width in pixels, the stand-in for the unobserved depth.
    pub h_mean: f64,
    /// Which curve fit produced the centerline.
    pub fit_method: FitMethod,
    /// Centroid of each segment mask that had foreground.
    pub centroids: BTreeMap<SegmentId, Point>,
    /// Trimmed, arc-length-resampled centerline (pixels).
    pub centerline: Polyline,
    /// Cross-sections cast along the centerline (pixels).
    pub cross_sections: CrossSections,
    /// Whole-body, per-segment and junction masks.
    pub masks: CombinedMasks,
    /// Detections or segments left out, with reasons.
    pub skipped: Vec<SkippedInstance>,
}

impl Measurement {
    /// Returns `true` if the centerline came from the regression fallback.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self.fit_method, FitMethod::OrthogonalRegression)
    }
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// A polygon cannot be rasterized.
    #[error("invalid polygon geometry: {0}")]
    InvalidGeometry(String),

    /// A mask is not binary, or its dimensions do not match.
    #[error("invalid mask: {0}")]
    InvalidMask(String),

    /// A mask has no foreground pixels.
    #[error("mask has no foreground pixels")]
    EmptyMask,

    /// Too few points to fit a curve.
    #[error("need at least {required} distinct points to fit a curve, got {available}")]
    InsufficientPoints {
        /// Usable points supplied.
        available: usize,
        /// Minimum the fit needs.
        required: usize,
    },

    /// Fewer than two usable centerline points survived trimming.
    #[error("centerline is degenerate: {remaining} usable point(s) remain after trimming")]
    DegenerateCurve {
        /// Usable points left.
        remaining: usize,
    },

    /// More cross-sections requested than centerline points exist.
    #[error("requested {requested} cross-sections but the centerline has {available} points")]
    CrossSectionOverflow {
        /// Requested cross-section count.
        requested: usize,
        /// Centerline point count.
        available: usize,
    },

    /// A class id was paired with more than one mask.
    #[error("segment {0} was given more than one mask")]
    DuplicateSegment(SegmentId),

    /// Nothing left to measure after filtering and rasterization.
    #[error("no usable detections in the batch")]
    NoDetections,

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}
