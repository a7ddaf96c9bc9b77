//! Centerline refinement: trim to the body, then resample uniformly.

use crate::mask::Mask;
use crate::types::{PipelineError, Polyline};

/// Keep the span from the first to the last point that lies inside `mask`.
///
/// Points in between are kept even when they leave the mask (a concave
/// outline can dip the curve outside briefly). Returns an empty polyline
/// if no point is inside.
#[must_use = "returns the trimmed polyline"]
pub fn trim(line: &Polyline, mask: &Mask) -> Polyline {
    let points = line.points();
    let first = points.iter().position(|&p| mask.contains(p));
    let last = points.iter().rposition(|&p| mask.contains(p));
    match (first, last) {
        (Some(a), Some(b)) => Polyline::new(points[a..=b].to_vec()),
        _ => Polyline::new(Vec::new()),
    }
}

/// Resample `line` to `count` points spaced uniformly by arc length.
///
/// Endpoints are preserved. Input that is already uniformly spaced with
/// `count` points comes back unchanged up to floating-point error.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `count < 2` and
/// [`PipelineError::DegenerateCurve`] if the line has fewer than two
/// points or zero length.
#[allow(clippy::cast_precision_loss)]
pub fn resample(line: &Polyline, count: usize) -> Result<Polyline, PipelineError> {
    if count < 2 {
        return Err(PipelineError::InvalidConfig(format!(
            "resample count must be at least 2, got {count}"
        )));
    }
    let points = line.points();
    if points.len() < 2 {
        return Err(PipelineError::DegenerateCurve {
            remaining: points.len(),
        });
    }
    let cumulative = line.cumulative_lengths();
    let total = cumulative[cumulative.len() - 1];
    if total <= f64::EPSILON {
        return Err(PipelineError::DegenerateCurve { remaining: 1 });
    }

    let mut out = Vec::with_capacity(count);
    let mut seg = 0;
    for j in 0..count {
        let target = total * j as f64 / (count - 1) as f64;
        while seg + 2 < cumulative.len() && cumulative[seg + 1] < target {
            seg += 1;
        }
        let span = cumulative[seg + 1] - cumulative[seg];
        let t = if span > 0.0 {
            ((target - cumulative[seg]) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(points[seg].lerp(points[seg + 1], t));
    }
    if let (Some(end), Some(&last)) = (out.last_mut(), points.last()) {
        *end = last;
    }
    Ok(Polyline::new(out))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Dimensions, Point};

    fn horizontal(xs: impl IntoIterator<Item = f64>) -> Polyline {
        Polyline::new(xs.into_iter().map(|x| Point::new(x, 2.0)).collect())
    }

    fn band() -> Mask {
        Mask::from_fn(
            Dimensions {
                width: 20,
                height: 5,
            },
            |x, _| (5..15).contains(&x),
        )
    }

    #[test]
    fn trim_keeps_first_to_last_inside() {
        let line = horizontal((0..20).map(f64::from));
        let trimmed = trim(&line, &band());
        assert!((trimmed.first().unwrap().x - 5.0).abs() < f64::EPSILON);
        assert!((trimmed.last().unwrap().x - 14.0).abs() < f64::EPSILON);
        assert_eq!(trimmed.len(), 10);
    }

    #[test]
    fn trim_keeps_interior_excursions() {
        let mut pts: Vec<Point> = (5..15).map(|x| Point::new(f64::from(x), 2.0)).collect();
        pts[4].y = 10.0;
        let trimmed = trim(&Polyline::new(pts), &band());
        assert_eq!(trimmed.len(), 10);
    }

    #[test]
    fn trim_with_nothing_inside_is_empty() {
        let line = horizontal([0.0, 1.0, 2.0]);
        assert!(trim(&line, &band()).is_empty());
    }

    #[test]
    fn resample_is_uniform_and_keeps_endpoints() {
        let line = horizontal([0.0, 1.0, 1.5, 7.0, 10.0]);
        let out = resample(&line, 11).unwrap();
        assert_eq!(out.len(), 11);
        for (i, p) in out.points().iter().enumerate() {
            assert!((p.x - f64::from(u32::try_from(i).unwrap())).abs() < 1e-9);
        }
        assert_eq!(out.last(), line.last());
    }

    #[test]
    fn resample_follows_corners() {
        let line = Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 4.0),
        ]);
        let out = resample(&line, 5).unwrap();
        assert!(out.points()[2].distance(Point::new(4.0, 0.0)) < 1e-9);
        assert!(out.points()[3].distance(Point::new(4.0, 2.0)) < 1e-9);
        let spacing: Vec<f64> = out.points().windows(2).map(|w| w[0].distance(w[1])).collect();
        assert!(spacing.iter().all(|d| (d - 2.0).abs() < 1e-9));
    }

    #[test]
    fn resample_is_idempotent() {
        let line = Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(3.0, 1.0),
            Point::new(5.0, 5.0),
        ]);
        let once = resample(&line, 9).unwrap();
        let twice = resample(&once, 9).unwrap();
        for (a, b) in once.points().iter().zip(twice.points()) {
            assert!(a.distance(*b) < 1e-9);
        }
    }

    #[test]
    fn resample_skips_repeated_points() {
        let line = horizontal([0.0, 2.0, 2.0, 4.0]);
        let out = resample(&line, 3).unwrap();
        assert!((out.points()[1].x - 2.0).abs() < 1e-9);
    }

    #[test]
    fn resample_rejects_degenerate_input() {
        assert_eq!(
            resample(&horizontal([3.0]), 5),
            Err(PipelineError::DegenerateCurve { remaining: 1 })
        );
        assert_eq!(
            resample(&horizontal([3.0, 3.0]), 5),
            Err(PipelineError::DegenerateCurve { remaining: 1 })
        );
        assert!(matches!(
            resample(&horizontal([0.0, 1.0]), 1),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn trimming_away_everything_is_degenerate() {
        let line = horizontal([0.0, 1.0, 2.0]);
        assert_eq!(
            resample(&trim(&line, &band()), 10),
            Err(PipelineError::DegenerateCurve { remaining: 0 })
        );
    }
}
