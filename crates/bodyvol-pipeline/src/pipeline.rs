//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process`] which runs the entire pipeline in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use bodyvol_pipeline::{DetectionBatch, MeasureConfig, Pipeline, PipelineError};
//! # fn run(batch: DetectionBatch, config: MeasureConfig) -> Result<(), PipelineError> {
//! let measured = Pipeline::new(batch, config)
//!     .rasterize()?
//!     .combine()?
//!     .locate_centroids()
//!     .fit_centerline()?
//!     .refine()?
//!     .slice()?
//!     .estimate();
//!
//! let measurement = measured.into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state
//! (or `Result` for fallible stages), carrying all previously computed
//! intermediates. Detections that cannot be used are recorded as
//! [`SkippedInstance`]s and travel with the pipeline to the final
//! [`Measurement`].

use std::collections::BTreeMap;

use crate::area;
use crate::centroid;
use crate::combine::{self, CombinedMasks};
use crate::diagnostics::StageMetrics;
use crate::fit::{self, FitMethod};
use crate::length;
use crate::mask::Mask;
use crate::raster;
use crate::refine;
use crate::slice::{self, CrossSections, SliceOptions};
use crate::types::{
    Dimensions, DetectionBatch, JunctionMeasurement, MeasureConfig, Measurement, PipelineError,
    Point, Polyline, SegmentId, SkipReason, SkippedInstance, round_to,
};
use crate::volume;

/// Entry point of the staged pipeline. See the [module docs](self).
pub type Pipeline = Pending;

/// State shared by every stage after the input has been read.
#[derive(Debug, Clone)]
struct Context {
    config: MeasureConfig,
    dimensions: Dimensions,
    skipped: Vec<SkippedInstance>,
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`rasterize`](Self::rasterize) to advance.
#[must_use = "pipeline stages are consumed by advancing: call .rasterize() to continue"]
#[derive(Debug, Clone)]
pub struct Pending {
    config: MeasureConfig,
    batch: DetectionBatch,
}

impl Pending {
    /// Start a pipeline run over `batch`.
    pub const fn new(batch: DetectionBatch, config: MeasureConfig) -> Self {
        Self { config, batch }
    }

    /// The detector output being measured.
    #[must_use]
    pub const fn batch(&self) -> &DetectionBatch {
        &self.batch
    }

    /// Validate the config, filter detections and rasterize the rest.
    ///
    /// Detections below `min_confidence`, with a class id missing from the
    /// segment order, with invalid geometry, or whose mask comes out empty
    /// are skipped, not fatal.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the config fails
    /// validation or the image has zero area.
    pub fn rasterize(self) -> Result<Rasterized, PipelineError> {
        self.config.validate()?;
        let dimensions = self.batch.dimensions;
        if dimensions.pixel_count() == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "image dimensions must be non-zero, got {}x{}",
                dimensions.width, dimensions.height
            )));
        }

        let mut instances: BTreeMap<SegmentId, Vec<Mask>> = BTreeMap::new();
        let mut skipped = Vec::new();
        for (index, det) in self.batch.detections.iter().enumerate() {
            let skip = |reason| SkippedInstance {
                index: Some(index),
                class_id: det.class_id,
                reason,
            };
            if det.confidence.is_nan() || det.confidence < self.config.min_confidence {
                skipped.push(skip(SkipReason::LowConfidence {
                    confidence: det.confidence,
                }));
                continue;
            }
            if !self.config.segments.contains(det.class_id) {
                tracing::warn!(index, class_id = %det.class_id, "skipping detection of unknown segment");
                skipped.push(skip(SkipReason::UnknownSegment));
                continue;
            }
            match raster::rasterize(&det.polygon, dimensions) {
                Ok(mask) if mask.is_empty() => {
                    tracing::warn!(index, class_id = %det.class_id, "detection rasterized to an empty mask");
                    skipped.push(skip(SkipReason::Failed(PipelineError::EmptyMask)));
                }
                Ok(mask) => instances.entry(det.class_id).or_default().push(mask),
                Err(e) => {
                    tracing::warn!(index, class_id = %det.class_id, error = %e, "skipping detection");
                    skipped.push(skip(SkipReason::Failed(e)));
                }
            }
        }

        let detections = self.batch.detections.len();
        tracing::debug!(
            detections,
            rasterized = detections - skipped.len(),
            skipped = skipped.len(),
            "rasterized detections"
        );
        Ok(Rasterized {
            ctx: Context {
                config: self.config,
                dimensions,
                skipped,
            },
            instances,
            detections,
        })
    }
}

// ───────────────────────── Stage 1: Rasterized ───────────────────────

/// Pipeline state after rasterizing the usable detections.
///
/// Call [`combine`](Self::combine) to advance.
#[must_use = "pipeline stages are consumed by advancing: call .combine() to continue"]
#[derive(Debug, Clone)]
pub struct Rasterized {
    ctx: Context,
    instances: BTreeMap<SegmentId, Vec<Mask>>,
    detections: usize,
}

impl Rasterized {
    /// Non-empty instance masks grouped by segment.
    #[must_use]
    pub const fn instances(&self) -> &BTreeMap<SegmentId, Vec<Mask>> {
        &self.instances
    }

    /// Detections skipped so far.
    #[must_use]
    pub fn skipped(&self) -> &[SkippedInstance] {
        &self.ctx.skipped
    }

    /// Stage metrics.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Rasterize {
            detections: self.detections,
            rasterized: self.instances.values().map(Vec::len).sum(),
            skipped: self.ctx.skipped.len(),
        }
    }

    /// Build the whole-body, per-segment and junction masks.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoDetections`] if no detection survived
    /// rasterization.
    pub fn combine(self) -> Result<Combined, PipelineError> {
        let masks = combine::combine(
            &self.instances,
            &self.ctx.config.segments,
            self.ctx.dimensions,
        )?;
        Ok(Combined {
            ctx: self.ctx,
            masks,
        })
    }
}

// ───────────────────────── Stage 2: Combined ─────────────────────────

/// Pipeline state after mask combination.
///
/// Call [`locate_centroids`](Self::locate_centroids) to advance.
#[must_use = "pipeline stages are consumed by advancing: call .locate_centroids() to continue"]
#[derive(Debug, Clone)]
pub struct Combined {
    ctx: Context,
    masks: CombinedMasks,
}

impl Combined {
    /// The combined masks.
    #[must_use]
    pub const fn masks(&self) -> &CombinedMasks {
        &self.masks
    }

    /// Stage metrics.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Combine {
            segments: self.masks.segments.len(),
            junctions: self.masks.junctions.len(),
            body_pixels: self.masks.whole_body.count(),
        }
    }

    /// Compute the centroid of every segment mask.
    pub fn locate_centroids(mut self) -> Located {
        let batch = centroid::centroids_of(&self.masks.segments);
        for &id in &batch.empty {
            self.ctx.skipped.push(SkippedInstance {
                index: None,
                class_id: id,
                reason: SkipReason::Failed(PipelineError::EmptyMask),
            });
        }
        let ordered: Vec<Point> = batch.ordered(self.ctx.config.segments.ids()).collect();
        tracing::debug!(located = ordered.len(), "located segment centroids");
        Located {
            ctx: self.ctx,
            masks: self.masks,
            centroids: batch.centroids,
            ordered,
        }
    }
}

// ───────────────────────── Stage 3: Located ──────────────────────────

/// Pipeline state after centroid extraction.
///
/// Call [`fit_centerline`](Self::fit_centerline) to advance.
#[must_use = "pipeline stages are consumed by advancing: call .fit_centerline() to continue"]
#[derive(Debug, Clone)]
pub struct Located {
    ctx: Context,
    masks: CombinedMasks,
    centroids: BTreeMap<SegmentId, Point>,
    ordered: Vec<Point>,
}

impl Located {
    /// Centroid per segment.
    #[must_use]
    pub const fn centroids(&self) -> &BTreeMap<SegmentId, Point> {
        &self.centroids
    }

    /// Centroids in head-to-tail order.
    #[must_use]
    pub fn ordered(&self) -> &[Point] {
        &self.ordered
    }

    /// Stage metrics.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Centroids {
            located: self.ordered.len(),
            segments: self.ctx.config.segments.segments().len(),
        }
    }

    /// Fit the dense centerline, falling back to orthogonal regression
    /// when fewer than two distinct centroids exist.
    ///
    /// # Errors
    ///
    /// Propagates fallback failures ([`PipelineError::InsufficientPoints`]
    /// or [`PipelineError::DegenerateCurve`]).
    pub fn fit_centerline(self) -> Result<Fitted, PipelineError> {
        let (dense, method) =
            fit::fit_centerline(&self.ordered, &self.masks.whole_body, &self.ctx.config)?;
        tracing::debug!(%method, points = dense.len(), "fitted centerline");
        Ok(Fitted {
            ctx: self.ctx,
            masks: self.masks,
            centroids: self.centroids,
            dense,
            method,
        })
    }
}

// ───────────────────────── Stage 4: Fitted ───────────────────────────

/// Pipeline state after curve fitting.
///
/// Call [`refine`](Self::refine) to advance.
#[must_use = "pipeline stages are consumed by advancing: call .refine() to continue"]
#[derive(Debug, Clone)]
pub struct Fitted {
    ctx: Context,
    masks: CombinedMasks,
    centroids: BTreeMap<SegmentId, Point>,
    dense: Polyline,
    method: FitMethod,
}

impl Fitted {
    /// The densely sampled, untrimmed curve.
    #[must_use]
    pub const fn dense(&self) -> &Polyline {
        &self.dense
    }

    /// Which fitter produced the curve.
    #[must_use]
    pub const fn method(&self) -> FitMethod {
        self.method
    }

    /// Stage metrics.
    #[must_use]
    pub const fn metrics(&self) -> StageMetrics {
        StageMetrics::Fit {
            method: self.method,
            points: self.dense.len(),
        }
    }

    /// Trim the curve to the whole body and resample it uniformly.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DegenerateCurve`] if fewer than two usable
    /// points remain after trimming.
    pub fn refine(self) -> Result<Refined, PipelineError> {
        let trimmed = refine::trim(&self.dense, &self.masks.whole_body);
        let trimmed_points = trimmed.len();
        let centerline = refine::resample(&trimmed, self.ctx.config.resample_count)?;
        tracing::debug!(
            dense = self.dense.len(),
            trimmed = trimmed_points,
            resampled = centerline.len(),
            "refined centerline"
        );
        Ok(Refined {
            ctx: self.ctx,
            masks: self.masks,
            centroids: self.centroids,
            method: self.method,
            trimmed_points,
            centerline,
        })
    }
}

// ───────────────────────── Stage 5: Refined ──────────────────────────

/// Pipeline state after trimming and resampling.
///
/// Call [`slice`](Self::slice) to advance.
#[must_use = "pipeline stages are consumed by advancing: call .slice() to continue"]
#[derive(Debug, Clone)]
pub struct Refined {
    ctx: Context,
    masks: CombinedMasks,
    centroids: BTreeMap<SegmentId, Point>,
    method: FitMethod,
    trimmed_points: usize,
    centerline: Polyline,
}

impl Refined {
    /// The trimmed, uniformly resampled centerline.
    #[must_use]
    pub const fn centerline(&self) -> &Polyline {
        &self.centerline
    }

    /// Stage metrics.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Refine {
            trimmed_points: self.trimmed_points,
            resampled_points: self.centerline.len(),
            arc_length: self.centerline.arc_length(),
        }
    }

    /// Cast orthogonal cross-sections along the centerline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CrossSectionOverflow`] when more sections
    /// are requested than centerline points exist and the overflow policy
    /// is [`OverflowPolicy::Error`](crate::slice::OverflowPolicy::Error).
    pub fn slice(self) -> Result<Sliced, PipelineError> {
        let options = SliceOptions {
            count: self.ctx.config.cross_sections,
            overflow: self.ctx.config.overflow,
            ray_step: self.ctx.config.ray_step,
        };
        let sections = slice::slice(
            &self.centerline,
            &self.masks.whole_body,
            &self.masks.segments,
            &self.masks.junctions,
            &options,
        )?;
        Ok(Sliced {
            ctx: self.ctx,
            masks: self.masks,
            centroids: self.centroids,
            method: self.method,
            centerline: self.centerline,
            sections,
        })
    }
}

// ───────────────────────── Stage 6: Sliced ───────────────────────────

/// Pipeline state after casting cross-sections.
///
/// Call [`estimate`](Self::estimate) to advance.
#[must_use = "pipeline stages are consumed by advancing: call .estimate() to continue"]
#[derive(Debug, Clone)]
pub struct Sliced {
    ctx: Context,
    masks: CombinedMasks,
    centroids: BTreeMap<SegmentId, Point>,
    method: FitMethod,
    centerline: Polyline,
    sections: CrossSections,
}

impl Sliced {
    /// The computed cross-sections.
    #[must_use]
    pub const fn sections(&self) -> &CrossSections {
        &self.sections
    }

    /// Stage metrics.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Slice {
            sections: self.sections.body.len(),
            h_mean: self.sections.h_mean,
        }
    }

    /// Compute lengths, volumes and areas: the final pipeline step.
    pub fn estimate(self) -> Measured {
        let config = &self.ctx.config;
        let k = config.calibration;

        let lengths = length::estimate(
            &self.centerline,
            &self.masks.segments,
            k,
            config.length_precision,
        );
        let volumes = volume::estimate(
            &self.sections.segments,
            self.sections.h_mean,
            k,
            config.volume_precision,
        );
        let junctions = self
            .masks
            .junctions
            .iter()
            .zip(&self.sections.junctions)
            .map(|(jm, js)| JunctionMeasurement {
                junction: jm.junction,
                length: round_to(
                    k.to_mm(length::masked_pixel_length(&self.centerline, &jm.mask)),
                    config.length_precision,
                ),
                volume: round_to(
                    volume::sections_volume(&js.sections, self.sections.h_mean, k),
                    config.volume_precision,
                ),
            })
            .collect();
        let areas = area::segment_areas(
            &self.masks.segments,
            &self.masks.whole_body,
            k,
            config.area_precision,
        );

        tracing::info!(
            total_length = lengths.total,
            total_volume = volumes.total,
            method = %self.method,
            "measurement complete"
        );

        Measured {
            measurement: Measurement {
                dimensions: self.ctx.dimensions,
                total_length: lengths.total,
                segment_lengths: lengths.segments,
                total_volume: volumes.total,
                segment_volumes: volumes.segments,
                junctions,
                areas,
                h_mean: self.sections.h_mean,
                fit_method: self.method,
                centroids: self.centroids,
                centerline: self.centerline,
                cross_sections: self.sections,
                masks: self.masks,
                skipped: self.ctx.skipped,
            },
        }
    }
}

// ───────────────────────── Stage 7: Measured ─────────────────────────

/// Pipeline state after estimation: the final stage.
///
/// Call [`into_result`](Self::into_result) to extract the [`Measurement`].
#[must_use = "call .into_result() to extract the Measurement"]
#[derive(Debug, Clone)]
pub struct Measured {
    measurement: Measurement,
}

impl Measured {
    /// The finished measurement.
    #[must_use]
    pub const fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    /// Stage metrics.
    #[must_use]
    pub const fn metrics(&self) -> StageMetrics {
        StageMetrics::Estimate {
            total_length: self.measurement.total_length,
            total_volume: self.measurement.total_volume,
        }
    }

    /// Consume the pipeline and return the [`Measurement`].
    #[must_use]
    pub fn into_result(self) -> Measurement {
        self.measurement
    }
}
