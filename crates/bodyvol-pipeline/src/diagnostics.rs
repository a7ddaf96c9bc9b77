//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for
//! parameter tuning (cross-section count, resample count, fallback
//! degree) on real detector output. [`process_with_diagnostics`] runs
//! the staged [`Pipeline`] and records one [`StageDiagnostics`] per step.
//!
//! The crate performs no I/O, so time is read through the [`Clock`]
//! trait supplied by the caller.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fit::FitMethod;
use crate::pipeline::Pipeline;
use crate::types::{DetectionBatch, MeasureConfig, Measurement, PipelineError};

/// Source of monotonic time for stage timing.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: detection filtering and polygon rasterization.
    pub rasterize: StageDiagnostics,
    /// Stage 2: whole-body, segment and junction mask combination.
    pub combine: StageDiagnostics,
    /// Stage 3: segment centroid extraction.
    pub centroids: StageDiagnostics,
    /// Stage 4: centerline fitting.
    pub fit: StageDiagnostics,
    /// Stage 5: trimming and resampling.
    pub refine: StageDiagnostics,
    /// Stage 6: orthogonal cross-sections.
    pub slice: StageDiagnostics,
    /// Stage 7: length, volume and area estimation.
    pub estimate: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics (counts, sizes, etc.).
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Rasterization metrics.
    Rasterize {
        /// Detections in the input batch.
        detections: usize,
        /// Detections rasterized to a non-empty mask.
        rasterized: usize,
        /// Detections skipped (low confidence, unknown class, bad geometry).
        skipped: usize,
    },
    /// Mask combination metrics.
    Combine {
        /// Segments with at least one instance.
        segments: usize,
        /// Junction masks built between adjacent present segments.
        junctions: usize,
        /// Foreground pixels in the whole-body mask.
        body_pixels: u64,
    },
    /// Centroid extraction metrics.
    Centroids {
        /// Centroids found.
        located: usize,
        /// Segments in the configured order.
        segments: usize,
    },
    /// Centerline fitting metrics.
    Fit {
        /// Which fitter produced the curve.
        method: FitMethod,
        /// Points in the dense curve.
        points: usize,
    },
    /// Refinement metrics.
    Refine {
        /// Points left after trimming to the body.
        trimmed_points: usize,
        /// Points after uniform resampling.
        resampled_points: usize,
        /// Arc length of the refined centerline in pixels.
        arc_length: f64,
    },
    /// Cross-section metrics.
    Slice {
        /// Whole-body sections cast.
        sections: usize,
        /// Mean whole-body section width in pixels.
        h_mean: f64,
    },
    /// Estimation metrics.
    Estimate {
        /// Total length (mm).
        total_length: f64,
        /// Total volume (mm³).
        total_volume: f64,
    },
}

/// High-level summary for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Image width in pixels.
    pub image_width: u32,
    /// Image height in pixels.
    pub image_height: u32,
    /// Detections in the input batch.
    pub detections: usize,
    /// Detections and segments left out of the measurement.
    pub skipped: usize,
    /// Which fitter produced the centerline.
    pub fit_method: FitMethod,
    /// Points in the final centerline.
    pub centerline_points: usize,
    /// Total length (mm).
    pub total_length: f64,
    /// Total volume (mm³).
    pub total_volume: f64,
}

impl PipelineDiagnostics {
    /// Stage names paired with their diagnostics, in execution order.
    #[must_use]
    pub fn stages(&self) -> [(&'static str, &StageDiagnostics); 7] {
        [
            ("Rasterize", &self.rasterize),
            ("Combine", &self.combine),
            ("Centroids", &self.centroids),
            ("Fit", &self.fit),
            ("Refine", &self.refine),
            ("Slice", &self.slice),
            ("Estimate", &self.estimate),
        ]
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} detections, {} skipped)",
            self.summary.image_width,
            self.summary.image_height,
            self.summary.detections,
            self.summary.skipped,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Fit: {}  |  Centerline points: {}  |  Length: {} mm  |  Volume: {} mm³",
            self.summary.fit_method,
            self.summary.centerline_points,
            self.summary.total_length,
            self.summary.total_volume,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Rasterize {
            detections,
            rasterized,
            skipped,
        } => format!("{detections} detections -> {rasterized} masks ({skipped} skipped)"),
        StageMetrics::Combine {
            segments,
            junctions,
            body_pixels,
        } => format!("{segments} segments, {junctions} junctions, body={body_pixels} px"),
        StageMetrics::Centroids { located, segments } => {
            format!("{located}/{segments} centroids")
        }
        StageMetrics::Fit { method, points } => format!("{method}, {points} pts"),
        StageMetrics::Refine {
            trimmed_points,
            resampled_points,
            arc_length,
        } => format!("{trimmed_points}->{resampled_points} pts, length={arc_length:.1}px"),
        StageMetrics::Slice { sections, h_mean } => {
            format!("{sections} sections, h_mean={h_mean:.2}px")
        }
        StageMetrics::Estimate {
            total_length,
            total_volume,
        } => format!("length={total_length} volume={total_volume}"),
    }
}

/// Run the full pipeline, timing every stage with `clock`.
///
/// # Errors
///
/// Propagates the first fatal [`PipelineError`] from any stage.
pub fn process_with_diagnostics<C: Clock>(
    batch: &DetectionBatch,
    config: &MeasureConfig,
    clock: &C,
) -> Result<(Measurement, PipelineDiagnostics), PipelineError> {
    let detections = batch.detections.len();
    let start = clock.now();

    let t = clock.now();
    let rasterized = Pipeline::new(batch.clone(), config.clone()).rasterize()?;
    let rasterize = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: rasterized.metrics(),
    };

    let t = clock.now();
    let combined = rasterized.combine()?;
    let combine = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: combined.metrics(),
    };

    let t = clock.now();
    let located = combined.locate_centroids();
    let centroids = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: located.metrics(),
    };

    let t = clock.now();
    let fitted = located.fit_centerline()?;
    let fit = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: fitted.metrics(),
    };

    let t = clock.now();
    let refined = fitted.refine()?;
    let refine = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: refined.metrics(),
    };

    let t = clock.now();
    let sliced = refined.slice()?;
    let slice = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: sliced.metrics(),
    };

    let t = clock.now();
    let measured = sliced.estimate();
    let estimate = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: measured.metrics(),
    };

    let total_duration = clock.elapsed(&start);
    let measurement = measured.into_result();
    let summary = PipelineSummary {
        image_width: measurement.dimensions.width,
        image_height: measurement.dimensions.height,
        detections,
        skipped: measurement.skipped.len(),
        fit_method: measurement.fit_method,
        centerline_points: measurement.centerline.len(),
        total_length: measurement.total_length,
        total_volume: measurement.total_volume,
    };

    Ok((
        measurement,
        PipelineDiagnostics {
            rasterize,
            combine,
            centroids,
            fit,
            refine,
            slice,
            estimate,
            total_duration,
            summary,
        },
    ))
}
