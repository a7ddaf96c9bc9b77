//! Parametric interpolating curve through ordered centroids.
//!
//! The centroids are parametrized by cumulative chord length `t` and each
//! coordinate is interpolated independently as a function of `t`:
//!
//! | distinct points | interpolant             |
//! |-----------------|-------------------------|
//! | 2               | straight line           |
//! | 3               | parabola (Newton form)  |
//! | 4+              | natural cubic spline    |
//!
//! Past the first and last centroid the curve continues along its end
//! tangent, so the sampled curve reaches the tips of the body. Given the
//! body mask, each continuation runs until it has left the mask; trimming
//! to the body happens later.

use nalgebra::{DMatrix, DVector};

use crate::mask::Mask;
use crate::types::{Point, Polyline};

use super::FitOutcome;

/// Minimum number of distinct centroids the spline accepts.
pub const MIN_POINTS: usize = 2;

/// Consecutive centroids closer than this (pixels) are merged.
const COINCIDENT: f64 = 1e-9;

/// Marching step (pixels) when extending the ends to the mask edge.
const REACH_STEP: f64 = 0.5;

/// Distance (pixels) the continuation runs past the mask edge.
const REACH_OVERSHOOT: f64 = 1.0;

/// Sampling options for [`fit_spline`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplineOptions {
    /// Number of points sampled along the curve (at least 2).
    pub samples: usize,
    /// Minimum continuation past each end, as a fraction of the chord
    /// length.
    pub extrapolation: f64,
}

/// Fit an interpolating curve through `points` in order and sample it.
///
/// Each end is continued for at least `extrapolation` times the chord
/// length. With `bounds`, an end is continued further when needed so the
/// samples run past the point where its tangent leaves the mask.
///
/// Returns [`FitOutcome::InsufficientPoints`] when fewer than
/// [`MIN_POINTS`] distinct points are given.
#[must_use = "returns the fit outcome"]
#[allow(clippy::cast_precision_loss)]
pub fn fit_spline(
    points: &[Point],
    bounds: Option<&Mask>,
    options: &SplineOptions,
) -> FitOutcome {
    let mut knots: Vec<Point> = Vec::with_capacity(points.len());
    for &p in points {
        if knots.last().is_none_or(|&q| q.distance(p) > COINCIDENT) {
            knots.push(p);
        }
    }
    if knots.len() < MIN_POINTS {
        return FitOutcome::InsufficientPoints {
            available: knots.len(),
        };
    }

    let t = Polyline::new(knots.clone()).cumulative_lengths();
    let total = t[t.len() - 1];
    let xs: Vec<f64> = knots.iter().map(|p| p.x).collect();
    let ys: Vec<f64> = knots.iter().map(|p| p.y).collect();
    let cx = Curve::new(&t, &xs);
    let cy = Curve::new(&t, &ys);

    let minimum = total * options.extrapolation;
    let (before, after) = bounds.map_or((minimum, minimum), |mask| {
        (
            reach(&cx, &cy, mask, 0.0, -1.0).max(minimum),
            reach(&cx, &cy, mask, total, 1.0).max(minimum),
        )
    });
    let (start, end) = (-before, total + after);
    let samples = options.samples.max(2);
    let step = (end - start) / (samples - 1) as f64;

    let sampled = (0..samples)
        .map(|i| {
            let u = (i as f64).mul_add(step, start);
            Point::new(cx.eval(u), cy.eval(u))
        })
        .collect();
    FitOutcome::Fitted(Polyline::new(sampled))
}

/// Parameter distance past the knot at `u` after which the end tangent,
/// followed in direction `sign`, has left `mask`. Zero when the knot lies
/// outside the mask or the curve is stationary there.
fn reach(cx: &Curve, cy: &Curve, mask: &Mask, u: f64, sign: f64) -> f64 {
    let (vx, vy) = (sign * cx.slope(u), sign * cy.slope(u));
    let speed = vx.hypot(vy);
    if speed <= f64::EPSILON {
        return 0.0;
    }
    let origin = Point::new(cx.eval(u), cy.eval(u));
    let inside = mask.exit_distance(origin, (vx / speed, vy / speed), REACH_STEP);
    if inside <= 0.0 {
        return 0.0;
    }
    (inside + REACH_OVERSHOOT) / speed
}

/// One coordinate as a function of the chord parameter.
#[derive(Debug, Clone)]
struct Curve {
    knots: Vec<f64>,
    values: Vec<f64>,
    shape: Shape,
}

#[derive(Debug, Clone)]
enum Shape {
    Line { slope: f64 },
    /// Newton divided differences `f[t0,t1]` and `f[t0,t1,t2]`.
    Parabola { d1: f64, d2: f64 },
    /// Per-interval `(b, c, d)` of `y_i + b s + c s² + d s³`.
    Cubic(Vec<[f64; 3]>),
}

impl Curve {
    /// `knots` must be strictly increasing and at least two long.
    fn new(knots: &[f64], values: &[f64]) -> Self {
        let shape = match knots.len() {
            2 => Shape::Line {
                slope: (values[1] - values[0]) / (knots[1] - knots[0]),
            },
            3 => {
                let d01 = (values[1] - values[0]) / (knots[1] - knots[0]);
                let d12 = (values[2] - values[1]) / (knots[2] - knots[1]);
                Shape::Parabola {
                    d1: d01,
                    d2: (d12 - d01) / (knots[2] - knots[0]),
                }
            }
            _ => Shape::Cubic(natural_cubic(knots, values)),
        };
        Self {
            knots: knots.to_vec(),
            values: values.to_vec(),
            shape,
        }
    }

    fn first_knot(&self) -> f64 {
        self.knots[0]
    }

    fn last_knot(&self) -> f64 {
        self.knots[self.knots.len() - 1]
    }

    /// Value at `u`, continued linearly outside the knot range.
    fn eval(&self, u: f64) -> f64 {
        let (lo, hi) = (self.first_knot(), self.last_knot());
        if u < lo {
            self.slope(lo).mul_add(u - lo, self.interior(lo))
        } else if u > hi {
            self.slope(hi).mul_add(u - hi, self.interior(hi))
        } else {
            self.interior(u)
        }
    }

    fn interior(&self, u: f64) -> f64 {
        match &self.shape {
            Shape::Line { slope } => slope.mul_add(u - self.knots[0], self.values[0]),
            Shape::Parabola { d1, d2 } => {
                let (t0, t1) = (self.knots[0], self.knots[1]);
                (d2 * (u - t1)).mul_add(u - t0, d1.mul_add(u - t0, self.values[0]))
            }
            Shape::Cubic(coeffs) => {
                let i = self.interval(u);
                let [b, c, d] = coeffs[i];
                let s = u - self.knots[i];
                s.mul_add(s.mul_add(s.mul_add(d, c), b), self.values[i])
            }
        }
    }

    fn slope(&self, u: f64) -> f64 {
        match &self.shape {
            Shape::Line { slope } => *slope,
            Shape::Parabola { d1, d2 } => {
                let (t0, t1) = (self.knots[0], self.knots[1]);
                d2.mul_add(2.0f64.mul_add(u, -t0) - t1, *d1)
            }
            Shape::Cubic(coeffs) => {
                let i = self.interval(u);
                let [b, c, d] = coeffs[i];
                let s = u - self.knots[i];
                s.mul_add((3.0 * d).mul_add(s, 2.0 * c), b)
            }
        }
    }

    /// Index of the knot interval containing `u` (clamped to the ends).
    fn interval(&self, u: f64) -> usize {
        let last = self.knots.len() - 2;
        self.knots.partition_point(|&k| k <= u).saturating_sub(1).min(last)
    }
}

/// Natural cubic spline coefficients (zero curvature at both ends).
///
/// Solves for the quadratic coefficients `c_i`; `b_i` and `d_i` follow
/// from `c`.
fn natural_cubic(t: &[f64], y: &[f64]) -> Vec<[f64; 3]> {
    let n = t.len();
    let h: Vec<f64> = t.windows(2).map(|w| w[1] - w[0]).collect();
    let slope: Vec<f64> = (0..n - 1).map(|i| (y[i + 1] - y[i]) / h[i]).collect();

    // End rows pin c_0 = c_{n-1} = 0; interior rows match first derivatives.
    let mut system = DMatrix::<f64>::zeros(n, n);
    let mut rhs = DVector::<f64>::zeros(n);
    system[(0, 0)] = 1.0;
    system[(n - 1, n - 1)] = 1.0;
    for i in 1..n - 1 {
        system[(i, i - 1)] = h[i - 1];
        system[(i, i)] = 2.0 * (h[i - 1] + h[i]);
        system[(i, i + 1)] = h[i];
        rhs[i] = 3.0 * (slope[i] - slope[i - 1]);
    }
    // Strictly diagonally dominant, so LU only fails on non-finite knots;
    // c = 0 then degrades to piecewise-linear interpolation.
    let c = system
        .lu()
        .solve(&rhs)
        .unwrap_or_else(|| DVector::zeros(n));

    (0..n - 1)
        .map(|i| {
            let b = slope[i] - h[i] * 2.0f64.mul_add(c[i], c[i + 1]) / 3.0;
            let d = (c[i + 1] - c[i]) / (3.0 * h[i]);
            [b, c[i], d]
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const OPTIONS: SplineOptions = SplineOptions {
        samples: 101,
        extrapolation: 0.5,
    };

    fn fitted(outcome: FitOutcome) -> Polyline {
        match outcome {
            FitOutcome::Fitted(line) => line,
            FitOutcome::InsufficientPoints { available } => {
                unreachable!("expected a fit, got {available} points")
            }
        }
    }

    #[test]
    fn single_point_is_insufficient() {
        let out = fit_spline(&[Point::new(3.0, 4.0)], None, &OPTIONS);
        assert_eq!(out, FitOutcome::InsufficientPoints { available: 1 });
    }

    #[test]
    fn coincident_points_count_once() {
        let p = Point::new(3.0, 4.0);
        let out = fit_spline(&[p, p, p], None, &OPTIONS);
        assert_eq!(out, FitOutcome::InsufficientPoints { available: 1 });
        assert_eq!(
            fit_spline(&[], None, &OPTIONS),
            FitOutcome::InsufficientPoints { available: 0 }
        );
    }

    #[test]
    fn two_points_give_extended_line() {
        let line = fitted(fit_spline(
            &[Point::new(10.0, 5.0), Point::new(30.0, 5.0)],
            None,
            &OPTIONS,
        ));
        assert_eq!(line.len(), 101);
        let first = line.first().unwrap();
        let last = line.last().unwrap();
        assert!((first.x - 0.0).abs() < 1e-9);
        assert!((last.x - 40.0).abs() < 1e-9);
        assert!(line.points().iter().all(|p| (p.y - 5.0).abs() < 1e-12));
    }

    #[test]
    fn zero_extrapolation_starts_and_ends_on_centroids() {
        let pts = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 3.0),
            Point::new(20.0, 1.0),
            Point::new(30.0, 6.0),
        ];
        let options = SplineOptions {
            samples: 50,
            extrapolation: 0.0,
        };
        let line = fitted(fit_spline(&pts, None, &options));
        assert!(line.first().unwrap().distance(pts[0]) < 1e-9);
        assert!(line.last().unwrap().distance(pts[3]) < 1e-9);
    }

    #[test]
    fn collinear_centroids_stay_on_the_line() {
        let pts: Vec<Point> = (0..5)
            .map(|i| Point::new(f64::from(i) * 7.0, f64::from(i) * 7.0 + 2.0))
            .collect();
        let line = fitted(fit_spline(&pts, None, &OPTIONS));
        for p in line.points() {
            assert!((p.y - p.x - 2.0).abs() < 1e-9, "{p:?}");
        }
    }

    #[test]
    fn ends_reach_past_a_long_end_segment() {
        // Short head and thorax, abdomen from column 30 to 129.
        let body = Mask::from_fn(
            crate::types::Dimensions {
                width: 160,
                height: 20,
            },
            |x, y| (10..130).contains(&x) && (5..15).contains(&y),
        );
        let pts = [
            Point::new(14.5, 9.5),
            Point::new(24.5, 9.5),
            Point::new(79.5, 9.5),
        ];
        let line = fitted(fit_spline(&pts, Some(&body), &OPTIONS));
        let (first, last) = (line.first().unwrap(), line.last().unwrap());
        // Column 129 ends at x = 129.5; column 10 starts at 9.5.
        assert!(last.x > 129.5, "{last:?}");
        assert!(first.x < 9.5, "{first:?}");
        assert!((last.x - 130.5).abs() < 1e-3, "{last:?}");
    }

    #[test]
    fn bounds_never_shorten_the_minimum_margin() {
        let body = Mask::from_fn(
            crate::types::Dimensions {
                width: 60,
                height: 10,
            },
            |x, _| (18..33).contains(&x),
        );
        let pts = [Point::new(20.0, 5.0), Point::new(30.0, 5.0)];
        let bounded = fitted(fit_spline(&pts, Some(&body), &OPTIONS));
        let free = fitted(fit_spline(&pts, None, &OPTIONS));
        assert_eq!(bounded, free);
    }

    #[test]
    fn parabola_through_three_points() {
        let t = [0.0, 1.0, 3.0];
        let v = [2.0, 5.0, -1.0];
        let c = Curve::new(&t, &v);
        for (ti, vi) in t.iter().zip(v) {
            assert!((c.eval(*ti) - vi).abs() < 1e-12);
        }
    }

    #[test]
    fn cubic_interpolates_knots_with_continuous_slope() {
        let t = [0.0, 1.0, 2.5, 4.0, 5.0];
        let v = [0.0, 2.0, 1.0, 3.0, -1.0];
        let c = Curve::new(&t, &v);
        for (ti, vi) in t.iter().zip(v) {
            assert!((c.eval(*ti) - vi).abs() < 1e-9);
        }
        for &knot in &t[1..4] {
            let left = c.slope(knot - 1e-7);
            let right = c.slope(knot + 1e-7);
            assert!((left - right).abs() < 1e-5, "slope jump at {knot}");
        }
    }

    #[test]
    fn cubic_reproduces_linear_data() {
        let t = [0.0, 1.0, 2.0, 3.5, 5.0];
        let v: Vec<f64> = t.iter().map(|x| 3.0f64.mul_add(*x, -1.0)).collect();
        let c = Curve::new(&t, &v);
        for u in [-2.0, 0.3, 1.7, 4.2, 6.0] {
            assert!((c.eval(u) - 3.0f64.mul_add(u, -1.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn extrapolation_continues_the_end_tangent() {
        let t = [0.0, 1.0, 2.0, 3.0];
        let v = [0.0, 1.0, 0.0, 1.0];
        let c = Curve::new(&t, &v);
        let s = c.slope(3.0);
        assert!((c.eval(4.0) - (1.0 + s)).abs() < 1e-12);
    }
}
