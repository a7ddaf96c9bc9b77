//! Orthogonal-distance polynomial regression over mask pixels.
//!
//! Used when there are too few centroids for the spline. The foreground
//! pixels are rotated into the frame of their principal axis, isotropically
//! scaled to `u ∈ [-1, 1]`, and a polynomial `v = p(u)` is fitted that
//! minimizes the summed squared *perpendicular* distance of the pixels to
//! the curve.
//!
//! The fit alternates two least-squares steps until the mean squared
//! distance stops improving:
//!
//! 1. project every pixel onto the current curve (Newton iteration on
//!    the foot-point parameter `t_i`);
//! 2. refit the polynomial coefficients to the pairs `(t_i, v_i)`.
//!
//! Both steps decrease the same objective, so the iteration is monotone.
//! An ordinary least-squares fit in the rotated frame is the seed.

use nalgebra::Matrix2;

use crate::mask::Mask;
use crate::types::{PipelineError, Point, Polyline};

use super::poly::{Polynomial, least_squares};

/// Fewest pixels the regression accepts.
pub const MIN_PIXELS: usize = 2;

/// Newton steps per foot-point projection.
const PROJECTION_STEPS: usize = 8;

/// Relative improvement below which the alternation stops.
const CONVERGENCE: f64 = 1e-9;

/// Options for [`fit_orthogonal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OdrOptions {
    /// Pixels are subsampled with a uniform stride down to this count.
    pub max_points: usize,
    /// Maximum number of project/refit alternations.
    pub max_iterations: usize,
    /// Number of points sampled along the fitted curve.
    pub samples: usize,
}

/// Principal-axis frame of a point cloud.
#[derive(Debug, Clone, Copy)]
struct Frame {
    origin: Point,
    cos: f64,
    sin: f64,
    scale: f64,
}

impl Frame {
    fn to_local(self, p: Point) -> (f64, f64) {
        let dx = p.x - self.origin.x;
        let dy = p.y - self.origin.y;
        (
            dx.mul_add(self.cos, dy * self.sin) / self.scale,
            dy.mul_add(self.cos, -dx * self.sin) / self.scale,
        )
    }

    fn to_image(self, u: f64, v: f64) -> Point {
        Point::new(
            self.scale.mul_add(u.mul_add(self.cos, -v * self.sin), self.origin.x),
            self.scale.mul_add(u.mul_add(self.sin, v * self.cos), self.origin.y),
        )
    }
}

/// Fit a polynomial centerline of `degree` to the foreground of `mask`.
///
/// The degree is lowered automatically when the pixels cannot support it
/// (too few distinct positions along the principal axis). If `anchor` is
/// given, the result is oriented so that its first point is the end
/// nearer to `anchor`.
///
/// # Errors
///
/// Returns [`PipelineError::InsufficientPoints`] if the mask has fewer
/// than [`MIN_PIXELS`] foreground pixels and
/// [`PipelineError::DegenerateCurve`] if no polynomial can be fitted.
#[allow(clippy::cast_precision_loss)]
pub fn fit_orthogonal(
    mask: &Mask,
    degree: u32,
    anchor: Option<Point>,
    options: &OdrOptions,
) -> Result<Polyline, PipelineError> {
    let pixels = subsample(mask, options.max_points);
    if pixels.len() < MIN_PIXELS {
        return Err(PipelineError::InsufficientPoints {
            available: pixels.len(),
            required: MIN_PIXELS,
        });
    }

    let frame = principal_frame(&pixels).ok_or(PipelineError::DegenerateCurve { remaining: 1 })?;
    let (us, vs): (Vec<f64>, Vec<f64>) = pixels.iter().map(|&p| frame.to_local(p)).unzip();

    let max_degree = usize::try_from(degree)
        .unwrap_or(usize::MAX)
        .min(pixels.len() - 1)
        .max(1);
    let mut poly = (1..=max_degree)
        .rev()
        .find_map(|d| least_squares(&us, &vs, d))
        .ok_or(PipelineError::DegenerateCurve {
            remaining: pixels.len(),
        })?;
    let fitted_degree = poly.degree();

    let mut ts = us.clone();
    let mut cost = mean_squared_distance(&poly, &ts, &us, &vs);
    let mut iterations = 0;
    while iterations < options.max_iterations {
        iterations += 1;
        for ((t, &u), &v) in ts.iter_mut().zip(&us).zip(&vs) {
            *t = project(&poly, u, v, *t);
        }
        let Some(next) = least_squares(&ts, &vs, fitted_degree) else {
            break;
        };
        let next_cost = mean_squared_distance(&next, &ts, &us, &vs);
        if next_cost > cost {
            break;
        }
        let improvement = cost - next_cost;
        poly = next;
        cost = next_cost;
        if improvement <= CONVERGENCE * cost.max(f64::EPSILON) {
            break;
        }
    }

    let (lo, hi) = ts
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| {
            (lo.min(t), hi.max(t))
        });
    let samples = options.samples.max(2);
    let step = (hi - lo) / (samples - 1) as f64;
    let mut line = Polyline::new(
        (0..samples)
            .map(|i| {
                let u = (i as f64).mul_add(step, lo);
                frame.to_image(u, poly.eval(u))
            })
            .collect(),
    );

    if let (Some(anchor), Some(&first), Some(&last)) = (anchor, line.first(), line.last())
        && last.distance_squared(anchor) < first.distance_squared(anchor)
    {
        line = line.reversed();
    }

    tracing::debug!(
        pixels = pixels.len(),
        degree = fitted_degree,
        iterations,
        rms = (cost.sqrt() * frame.scale),
        "orthogonal regression converged"
    );
    Ok(line)
}

/// Foreground pixels as points, strided down to at most `max_points`.
fn subsample(mask: &Mask, max_points: usize) -> Vec<Point> {
    let count = usize::try_from(mask.count()).unwrap_or(usize::MAX);
    let stride = count.div_ceil(max_points.max(1)).max(1);
    mask.foreground()
        .step_by(stride)
        .map(|(x, y)| Point::new(f64::from(x), f64::from(y)))
        .collect()
}

/// Principal-axis frame from the eigen decomposition of the 2×2
/// covariance. The major axis is oriented towards `+x` (or `+y` when
/// vertical).
#[allow(clippy::cast_precision_loss)]
fn principal_frame(points: &[Point]) -> Option<Frame> {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let origin = Point::new(sx / n, sy / n);

    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in points {
        let dx = p.x - origin.x;
        let dy = p.y - origin.y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    let eigen = Matrix2::new(sxx, sxy, sxy, syy).symmetric_eigen();
    let major = eigen.eigenvectors.column(eigen.eigenvalues.imax());
    let (mut cos, mut sin) = (major[0], major[1]);
    if cos < -f64::EPSILON || (cos.abs() <= f64::EPSILON && sin < 0.0) {
        cos = -cos;
        sin = -sin;
    }

    let scale = points
        .iter()
        .map(|p| (p.x - origin.x).mul_add(cos, (p.y - origin.y) * sin).abs())
        .fold(0.0_f64, f64::max);
    (scale > 1e-9).then_some(Frame {
        origin,
        cos,
        sin,
        scale,
    })
}

/// Foot-point parameter of `(u, v)` on `v = p(t)`, starting from `t`.
fn project(poly: &Polynomial, u: f64, v: f64, mut t: f64) -> f64 {
    let dist = |t: f64| {
        let r = poly.eval(t) - v;
        (t - u).mul_add(t - u, r * r)
    };
    let mut current = dist(t);
    for _ in 0..PROJECTION_STEPS {
        let r = poly.eval(t) - v;
        let dp = poly.derivative(t);
        let grad = r.mul_add(dp, t - u);
        let curvature = r.mul_add(poly.second_derivative(t), dp.mul_add(dp, 1.0));
        if curvature <= f64::EPSILON {
            break;
        }
        let next = t - grad / curvature;
        let next_dist = dist(next);
        if next_dist >= current {
            break;
        }
        t = next;
        current = next_dist;
    }
    t
}

#[allow(clippy::cast_precision_loss)]
fn mean_squared_distance(poly: &Polynomial, ts: &[f64], us: &[f64], vs: &[f64]) -> f64 {
    let total: f64 = ts
        .iter()
        .zip(us)
        .zip(vs)
        .map(|((&t, &u), &v)| {
            let r = poly.eval(t) - v;
            (t - u).mul_add(t - u, r * r)
        })
        .sum();
    total / ts.len().max(1) as f64
}
