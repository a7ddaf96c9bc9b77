//! Centerline fitting.
//!
//! The primary fitter threads an interpolating curve through the ordered
//! segment centroids ([`spline`]). When fewer than two distinct centroids
//! exist, the body outline itself is used instead: a polynomial is fitted
//! to the whole-body pixels by orthogonal-distance regression ([`odr`]).
//! The result records which path produced the centerline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mask::Mask;
use crate::types::{MeasureConfig, PipelineError, Point, Polyline};

pub mod odr;
mod poly;
pub mod spline;

pub use odr::{OdrOptions, fit_orthogonal};
pub use spline::{SplineOptions, fit_spline};

/// Which fitter produced a centerline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FitMethod {
    /// Interpolating curve through the segment centroids.
    Spline,
    /// Polynomial regression over the whole-body pixels (degraded mode).
    OrthogonalRegression,
}

impl fmt::Display for FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spline => write!(f, "spline"),
            Self::OrthogonalRegression => write!(f, "orthogonal regression"),
        }
    }
}

/// Result of the spline fitter.
#[derive(Debug, Clone, PartialEq)]
pub enum FitOutcome {
    /// Densely sampled curve.
    Fitted(Polyline),
    /// Too few distinct centroids; the caller should fall back.
    InsufficientPoints {
        /// Distinct centroids supplied.
        available: usize,
    },
}

/// Fit a dense centerline, falling back to orthogonal regression over
/// `body` when the centroids cannot support a spline.
///
/// `centroids` must be in head-to-tail order. The spline is continued at
/// both ends until it has left `body`. The first centroid, if any,
/// orients the fallback curve.
///
/// # Errors
///
/// Propagates [`fit_orthogonal`] errors when the fallback is taken.
pub fn fit_centerline(
    centroids: &[Point],
    body: &Mask,
    config: &MeasureConfig,
) -> Result<(Polyline, FitMethod), PipelineError> {
    let options = SplineOptions {
        samples: config.fit_samples,
        extrapolation: config.extrapolation,
    };
    match fit_spline(centroids, Some(body), &options) {
        FitOutcome::Fitted(line) => Ok((line, FitMethod::Spline)),
        FitOutcome::InsufficientPoints { available } => {
            tracing::warn!(
                available,
                degree = config.fallback_degree,
                "too few centroids for a spline, falling back to orthogonal regression"
            );
            let options = OdrOptions {
                max_points: config.odr_max_points,
                max_iterations: config.odr_iterations,
                samples: config.fit_samples,
            };
            let line = fit_orthogonal(
                body,
                config.fallback_degree,
                centroids.first().copied(),
                &options,
            )?;
            Ok((line, FitMethod::OrthogonalRegression))
        }
    }
}
