//! Polygon rasterization: turn a detector outline into a binary mask.
//!
//! Vertices arrive normalized to `[0, 1]²` and are scaled to the image
//! size. A pixel is foreground iff its center lies inside the polygon
//! under the even-odd rule, so an axis-aligned rectangle with integer
//! corners `[x0, x1) × [y0, y1)` fills exactly the pixels with
//! `x0 <= col < x1` and `y0 <= row < y1`.
//!
//! Self-intersecting outlines are filled with the even-odd rule rather
//! than rejected; detector polygons occasionally fold over themselves at
//! thin appendages.

use geo::{BoundingRect, Coord, LineString, Polygon};

use crate::mask::Mask;
use crate::types::{Dimensions, NormalizedPolygon, PipelineError};

/// Fewest vertices a polygon may have.
pub const MIN_VERTICES: usize = 3;

/// Rasterize one normalized polygon into a mask of `dimensions`.
///
/// Degenerate (zero-area) polygons produce an empty mask rather than an
/// error; the empty mask is rejected later, per segment.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidGeometry`] if the polygon has fewer
/// than [`MIN_VERTICES`] vertices or any coordinate is not finite.
pub fn rasterize(
    polygon: &NormalizedPolygon,
    dimensions: Dimensions,
) -> Result<Mask, PipelineError> {
    if polygon.len() < MIN_VERTICES {
        return Err(PipelineError::InvalidGeometry(format!(
            "polygon has {} vertices, at least {MIN_VERTICES} are required",
            polygon.len()
        )));
    }
    if let Some(p) = polygon.vertices().iter().find(|p| !p.is_finite()) {
        return Err(PipelineError::InvalidGeometry(format!(
            "non-finite vertex ({}, {})",
            p.x, p.y
        )));
    }

    let ring: LineString<f64> = polygon
        .to_image_space(dimensions)
        .into_iter()
        .map(|p| Coord { x: p.x, y: p.y })
        .collect();
    let shape = Polygon::new(ring, vec![]);

    let Some(bounds) = shape.bounding_rect() else {
        return Ok(Mask::empty(dimensions));
    };

    let (Some(row_start), Some(row_end)) = (
        first_center_at_or_after(bounds.min().y, dimensions.height),
        last_center_at_or_before(bounds.max().y, dimensions.height),
    ) else {
        return Ok(Mask::empty(dimensions));
    };

    let width = to_usize(u64::from(dimensions.width));
    let mut mask = vec![0_u8; to_usize(dimensions.pixel_count())];
    let mut crossings: Vec<f64> = Vec::new();
    for row in row_start..=row_end {
        let yc = f64::from(row) + 0.5;
        crossings.clear();
        for edge in shape.exterior().lines() {
            let (a, b) = (edge.start, edge.end);
            // Half-open rule: each vertex belongs to exactly one of its edges.
            if (a.y <= yc) != (b.y <= yc) {
                let t = (yc - a.y) / (b.y - a.y);
                crossings.push(t.mul_add(b.x - a.x, a.x));
            }
        }
        crossings.sort_by(f64::total_cmp);

        let row_offset = to_usize(u64::from(row)) * width;
        for span in crossings.chunks_exact(2) {
            let (Some(c0), Some(c1)) = (
                first_center_at_or_after(span[0], dimensions.width),
                last_center_before(span[1], dimensions.width),
            ) else {
                continue;
            };
            for col in c0..=c1 {
                mask[row_offset + to_usize(u64::from(col))] = 1;
            }
        }
    }

    image::GrayImage::from_raw(dimensions.width, dimensions.height, mask)
        .ok_or_else(|| PipelineError::InvalidMask("raster buffer size mismatch".to_string()))
        .and_then(Mask::from_gray)
}

/// Rasterize every polygon independently.
///
/// Failures are reported per polygon so one malformed instance does not
/// abort the batch.
#[must_use = "returns one result per input polygon"]
pub fn rasterize_all<'a>(
    polygons: impl IntoIterator<Item = &'a NormalizedPolygon>,
    dimensions: Dimensions,
) -> Vec<Result<Mask, PipelineError>> {
    polygons
        .into_iter()
        .map(|p| rasterize(p, dimensions))
        .collect()
}

/// First pixel index `i` in `0..extent` with center `i + 0.5 >= v`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn first_center_at_or_after(v: f64, extent: u32) -> Option<u32> {
    let i = (v - 0.5).ceil().max(0.0);
    (i < f64::from(extent)).then_some(i as u32)
}

/// Last pixel index `i` in `0..extent` with center `i + 0.5 <= v`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn last_center_at_or_before(v: f64, extent: u32) -> Option<u32> {
    let i = (v - 0.5).floor().min(f64::from(extent) - 1.0);
    (i >= 0.0).then_some(i as u32)
}

/// Last pixel index `i` in `0..extent` with center `i + 0.5 < v`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn last_center_before(v: f64, extent: u32) -> Option<u32> {
    let i = ((v - 0.5).ceil() - 1.0).min(f64::from(extent) - 1.0);
    (i >= 0.0).then_some(i as u32)
}

#[allow(clippy::cast_possible_truncation)]
const fn to_usize(v: u64) -> usize {
    v as usize
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Point;

    const DIMS: Dimensions = Dimensions {
        width: 10,
        height: 8,
    };

    /// Axis-aligned rectangle given in pixel units.
    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> NormalizedPolygon {
        let w = f64::from(DIMS.width);
        let h = f64::from(DIMS.height);
        NormalizedPolygon::new(vec![
            Point::new(x0 / w, y0 / h),
            Point::new(x1 / w, y0 / h),
            Point::new(x1 / w, y1 / h),
            Point::new(x0 / w, y1 / h),
        ])
    }

    #[test]
    fn rectangle_fills_exact_pixels() {
        let mask = rasterize(&rect(2.0, 1.0, 6.0, 4.0), DIMS).unwrap();
        assert_eq!(mask.count(), 12);
        for row in 0..DIMS.height {
            for col in 0..DIMS.width {
                let expected = (2..6).contains(&col) && (1..4).contains(&row);
                assert_eq!(mask.get(col, row), expected, "pixel ({col}, {row})");
            }
        }
    }

    #[test]
    fn vertex_order_does_not_matter() {
        let cw = rect(1.0, 1.0, 5.0, 5.0);
        let ccw = NormalizedPolygon::new(cw.vertices().iter().rev().copied().collect());
        assert_eq!(rasterize(&cw, DIMS).unwrap(), rasterize(&ccw, DIMS).unwrap());
    }

    #[test]
    fn full_image_rectangle_fills_everything() {
        let mask = rasterize(&rect(0.0, 0.0, 10.0, 8.0), DIMS).unwrap();
        assert_eq!(mask.count(), DIMS.pixel_count());
    }

    #[test]
    fn out_of_range_vertices_are_clipped() {
        let mask = rasterize(&rect(-5.0, -5.0, 3.0, 2.0), DIMS).unwrap();
        assert_eq!(mask.count(), 6);
        assert!(mask.get(0, 0));
        assert!(mask.get(2, 1));
        assert!(!mask.get(3, 1));
    }

    #[test]
    fn triangle_covers_half_plane_centers() {
        // Right triangle (0,0)-(8,0)-(0,8): center (c+0.5, r+0.5) inside iff c + r < 7.
        let w = f64::from(DIMS.width);
        let h = f64::from(DIMS.height);
        let tri = NormalizedPolygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(8.0 / w, 0.0),
            Point::new(0.0, 8.0 / h),
        ]);
        let mask = rasterize(&tri, DIMS).unwrap();
        for row in 0..8 {
            for col in 0..8 {
                assert_eq!(mask.get(col, row), col + row < 7, "pixel ({col}, {row})");
            }
        }
    }

    #[test]
    fn self_intersecting_polygon_uses_even_odd() {
        // Bow-tie: two triangles meeting at (4, 4).
        let w = f64::from(DIMS.width);
        let h = f64::from(DIMS.height);
        let bow = NormalizedPolygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(8.0 / w, 8.0 / h),
            Point::new(8.0 / w, 0.0),
            Point::new(0.0, 8.0 / h),
        ]);
        let mask = rasterize(&bow, DIMS).unwrap();
        assert!(mask.get(0, 4));
        assert!(mask.get(7, 4));
        assert!(!mask.get(4, 0));
        assert!(!mask.get(4, 7));
    }

    #[test]
    fn degenerate_polygon_gives_empty_mask() {
        let line = NormalizedPolygon::new(vec![
            Point::new(0.1, 0.1),
            Point::new(0.5, 0.5),
            Point::new(0.9, 0.9),
        ]);
        let mask = rasterize(&line, DIMS).unwrap();
        assert!(mask.is_empty());
    }

    #[test]
    fn too_few_vertices_is_invalid_geometry() {
        let seg = NormalizedPolygon::new(vec![Point::new(0.1, 0.1), Point::new(0.5, 0.5)]);
        assert!(matches!(
            rasterize(&seg, DIMS),
            Err(PipelineError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn non_finite_vertex_is_invalid_geometry() {
        let bad = NormalizedPolygon::new(vec![
            Point::new(0.1, 0.1),
            Point::new(f64::NAN, 0.5),
            Point::new(0.9, 0.1),
        ]);
        assert!(matches!(
            rasterize(&bad, DIMS),
            Err(PipelineError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn rasterize_all_reports_per_polygon() {
        let good = rect(1.0, 1.0, 3.0, 3.0);
        let bad = NormalizedPolygon::new(vec![]);
        let results = rasterize_all([&good, &bad], DIMS);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().count(), 4);
        assert!(results[1].is_err());
    }
}
