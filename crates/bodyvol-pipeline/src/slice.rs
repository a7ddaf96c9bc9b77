//! Orthogonal cross-sections along the centerline.
//!
//! At selected centerline points a line is cast perpendicular to the local
//! tangent and clipped to a mask by marching outwards in both directions
//! until the mask is left, then refining each end to the pixel edge. The
//! clipped segment's length is the local body width. Cross-sections are computed against the whole body and, when
//! given, against each segment and junction mask separately.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::combine::JunctionMask;
use crate::mask::Mask;
use crate::types::{Junction, PipelineError, Point, Polyline, SegmentId};

/// What to do when more cross-sections are requested than centerline
/// points exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Use every centerline point once.
    #[default]
    Clamp,
    /// Fail with [`PipelineError::CrossSectionOverflow`].
    Error,
}

/// Options for [`slice`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceOptions {
    /// Requested number of cross-sections `M`.
    pub count: usize,
    /// Behavior when `M` exceeds the centerline length.
    pub overflow: OverflowPolicy,
    /// Marching step in pixels.
    pub ray_step: f64,
}

/// One orthogonal cross-section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossSection {
    /// Index of the anchoring centerline point.
    pub index: usize,
    /// Arc length from the start of the centerline to the anchor (pixels).
    pub position: f64,
    /// Centerline point the section is cast from.
    pub anchor: Point,
    /// Clipped endpoint on the `-normal` side.
    pub start: Point,
    /// Clipped endpoint on the `+normal` side.
    pub end: Point,
}

impl CrossSection {
    /// Length of the clipped section (pixels).
    #[must_use]
    pub fn width(&self) -> f64 {
        self.start.distance(self.end)
    }

    /// Returns `true` if the anchor lies outside the mask.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0
    }
}

/// Cross-sections clipped to one junction mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionSections {
    /// The adjacent segment pair.
    pub junction: Junction,
    /// Sections clipped to the junction mask.
    pub sections: Vec<CrossSection>,
}

/// All cross-sections for one centerline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSections {
    /// Sections clipped to the whole body.
    pub body: Vec<CrossSection>,
    /// Sections clipped to each segment mask.
    pub segments: BTreeMap<SegmentId, Vec<CrossSection>>,
    /// Sections clipped to each junction mask.
    pub junctions: Vec<JunctionSections>,
    /// Mean width of the non-empty whole-body sections (pixels).
    pub h_mean: f64,
}

/// Pick `count` indices spread evenly over `0..len`, endpoints included.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `count` is zero,
/// [`PipelineError::DegenerateCurve`] if `len` is zero, and
/// [`PipelineError::CrossSectionOverflow`] if `count > len` under
/// [`OverflowPolicy::Error`].
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn select_indices(
    len: usize,
    count: usize,
    overflow: OverflowPolicy,
) -> Result<Vec<usize>, PipelineError> {
    if count == 0 {
        return Err(PipelineError::InvalidConfig(
            "at least one cross-section is required".to_string(),
        ));
    }
    if len == 0 {
        return Err(PipelineError::DegenerateCurve { remaining: 0 });
    }
    let count = if count > len {
        match overflow {
            OverflowPolicy::Clamp => len,
            OverflowPolicy::Error => {
                return Err(PipelineError::CrossSectionOverflow {
                    requested: count,
                    available: len,
                });
            }
        }
    } else {
        count
    };
    if count == 1 {
        return Ok(vec![(len - 1) / 2]);
    }
    let last = (len - 1) as f64;
    let steps = (count - 1) as f64;
    Ok((0..count)
        .map(|j| ((j as f64) * last / steps).round() as usize)
        .collect())
}

/// Unit tangent at `index`, from its neighbours.
fn tangent(points: &[Point], index: usize) -> (f64, f64) {
    let prev = points[index.saturating_sub(1)];
    let next = points[(index + 1).min(points.len() - 1)];
    let (dx, dy) = (next.x - prev.x, next.y - prev.y);
    let norm = dx.hypot(dy);
    if norm > 0.0 {
        (dx / norm, dy / norm)
    } else {
        (1.0, 0.0)
    }
}

/// Cast one section at `index`, clipped to `mask`.
fn cast(
    points: &[Point],
    positions: &[f64],
    index: usize,
    mask: &Mask,
    step: f64,
) -> CrossSection {
    let anchor = points[index];
    let (tx, ty) = tangent(points, index);
    let normal = (-ty, tx);
    let (start, end) = if mask.contains(anchor) {
        let back = (-normal.0, -normal.1);
        (
            anchor.offset(back, mask.exit_distance(anchor, back, step)),
            anchor.offset(normal, mask.exit_distance(anchor, normal, step)),
        )
    } else {
        (anchor, anchor)
    };
    CrossSection {
        index,
        position: positions[index],
        anchor,
        start,
        end,
    }
}

/// Cast every selected section against `mask`.
fn cast_all(
    points: &[Point],
    positions: &[f64],
    indices: &[usize],
    mask: &Mask,
    step: f64,
) -> Vec<CrossSection> {
    indices
        .iter()
        .map(|&i| cast(points, positions, i, mask, step))
        .collect()
}

/// Cast cross-sections along `centerline`.
///
/// The same anchors are used for the body and every separate mask, so the
/// `k`-th section of each list refers to the same centerline point.
///
/// `h_mean` averages only the body sections with non-zero width. An
/// anchor where the centerline dips outside the body says nothing about
/// its thickness; such sections are still returned. With no non-empty
/// section `h_mean` is `0.0`.
///
/// # Errors
///
/// See [`select_indices`]. Also returns
/// [`PipelineError::InvalidConfig`] for a non-positive `ray_step`.
#[allow(clippy::cast_precision_loss)]
pub fn slice(
    centerline: &Polyline,
    body: &Mask,
    segments: &BTreeMap<SegmentId, Mask>,
    junctions: &[JunctionMask],
    options: &SliceOptions,
) -> Result<CrossSections, PipelineError> {
    if !(options.ray_step.is_finite() && options.ray_step > 0.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "ray step must be positive, got {}",
            options.ray_step
        )));
    }
    let indices = select_indices(centerline.len(), options.count, options.overflow)?;
    if indices.len() < options.count {
        tracing::warn!(
            requested = options.count,
            available = centerline.len(),
            "more cross-sections requested than centerline points, clamping"
        );
    }

    let points = centerline.points();
    let positions = centerline.cumulative_lengths();
    let step = options.ray_step;

    let body_sections = cast_all(points, &positions, &indices, body, step);
    let widths: Vec<f64> = body_sections
        .iter()
        .map(CrossSection::width)
        .filter(|&w| w > 0.0)
        .collect();
    let h_mean = if widths.is_empty() {
        0.0
    } else {
        widths.iter().sum::<f64>() / widths.len() as f64
    };

    let segments = segments
        .iter()
        .map(|(&id, mask)| (id, cast_all(points, &positions, &indices, mask, step)))
        .collect();
    let junctions = junctions
        .iter()
        .map(|j| JunctionSections {
            junction: j.junction,
            sections: cast_all(points, &positions, &indices, &j.mask, step),
        })
        .collect();

    tracing::debug!(sections = indices.len(), h_mean, "cast cross-sections");
    Ok(CrossSections {
        body: body_sections,
        segments,
        junctions,
        h_mean,
    })
}
