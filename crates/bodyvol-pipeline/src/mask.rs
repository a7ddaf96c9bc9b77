//! Binary raster masks.
//!
//! A [`Mask`] is a single-channel image whose pixels are exactly `0`
//! (background) or `1` (foreground). Every stage after rasterization
//! reads masks through [`Mask::contains`], which maps a continuous
//! pixel-index coordinate to the pixel whose center is nearest.
//!
//! Masks are immutable once built; combining two masks produces a new
//! one. Under the rounding in [`Mask::contains`] a foreground pixel
//! `(col, row)` covers `[col - 0.5, col + 0.5) × [row - 0.5, row + 0.5)`,
//! so ray casts against a mask end on pixel edges.

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, GrayImage, PipelineError, Point};

/// Foreground pixel value.
pub const FOREGROUND: u8 = 1;

/// Halvings of the last marching step when locating a mask edge.
const EDGE_BISECTIONS: u32 = 24;

/// A binary mask over an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask(GrayImage);

/// Axis-aligned pixel bounds of a mask's foreground (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBounds {
    /// Leftmost foreground column.
    pub min_x: u32,
    /// Topmost foreground row.
    pub min_y: u32,
    /// Rightmost foreground column.
    pub max_x: u32,
    /// Bottommost foreground row.
    pub max_y: u32,
}

impl Mask {
    /// An all-background mask.
    #[must_use]
    pub fn empty(dimensions: Dimensions) -> Self {
        Self(GrayImage::new(dimensions.width, dimensions.height))
    }

    /// Build a mask by evaluating `f(col, row)` for every pixel.
    #[must_use]
    pub fn from_fn(dimensions: Dimensions, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        Self(GrayImage::from_fn(dimensions.width, dimensions.height, |x, y| {
            image::Luma([u8::from(f(x, y))])
        }))
    }

    /// Wrap an existing single-channel image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidMask`] if any pixel is neither `0`
    /// nor `1`.
    pub fn from_gray(image: GrayImage) -> Result<Self, PipelineError> {
        if let Some((x, y, p)) = image.enumerate_pixels().find(|(_, _, p)| p.0[0] > FOREGROUND) {
            return Err(PipelineError::InvalidMask(format!(
                "pixel ({x}, {y}) has value {}; masks must be binary 0/1",
                p.0[0]
            )));
        }
        Ok(Self(image))
    }

    /// Mask dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.0.width(),
            height: self.0.height(),
        }
    }

    /// Whether pixel `(col, row)` is foreground. Out-of-range is background.
    #[must_use]
    pub fn get(&self, col: u32, row: u32) -> bool {
        self.0
            .get_pixel_checked(col, row)
            .is_some_and(|p| p.0[0] == FOREGROUND)
    }

    /// Whether `point` falls on a foreground pixel.
    ///
    /// The point is rounded to the nearest pixel center (half away from
    /// zero). Points outside the image are never contained.
    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        match (
            pixel_index(point.x, self.0.width()),
            pixel_index(point.y, self.0.height()),
        ) {
            (Some(col), Some(row)) => self.get(col, row),
            _ => false,
        }
    }

    /// Iterate over foreground pixel coordinates in row-major order.
    pub fn foreground(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.0
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] == FOREGROUND)
            .map(|(x, y, _)| (x, y))
    }

    /// Number of foreground pixels.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.0.as_raw().iter().map(|&v| u64::from(v)).sum()
    }

    /// Returns `true` if the mask has no foreground pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.as_raw().iter().all(|&v| v == 0)
    }

    /// Foreground bounding box, or `None` for an empty mask.
    #[must_use]
    pub fn bounding_box(&self) -> Option<PixelBounds> {
        self.foreground().fold(None, |acc, (x, y)| {
            Some(acc.map_or(
                PixelBounds {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                },
                |b: PixelBounds| PixelBounds {
                    min_x: b.min_x.min(x),
                    min_y: b.min_y.min(y),
                    max_x: b.max_x.max(x),
                    max_y: b.max_y.max(y),
                },
            ))
        })
    }

    /// Pixel-wise OR of two masks.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidMask`] if the dimensions differ.
    pub fn union(&self, other: &Self) -> Result<Self, PipelineError> {
        if self.dimensions() != other.dimensions() {
            let (a, b) = (self.dimensions(), other.dimensions());
            return Err(PipelineError::InvalidMask(format!(
                "cannot combine a {}x{} mask with a {}x{} mask",
                a.width, a.height, b.width, b.height
            )));
        }
        let raw: Vec<u8> = self
            .0
            .as_raw()
            .iter()
            .zip(other.0.as_raw())
            .map(|(&a, &b)| a | b)
            .collect();
        GrayImage::from_raw(self.0.width(), self.0.height(), raw)
            .map(Self)
            .ok_or_else(|| PipelineError::InvalidMask("buffer size mismatch".to_string()))
    }

    /// The underlying `0/1` image.
    #[must_use]
    pub const fn as_gray(&self) -> &GrayImage {
        &self.0
    }

    /// Distance from `origin` along the unit `direction` to the edge where
    /// the ray first leaves the foreground.
    ///
    /// Marches in `step` increments, then bisects the last step down to
    /// the pixel edge. Returns `0.0` if `origin` is outside the mask and
    /// stops at the image diagonal.
    #[must_use]
    pub fn exit_distance(&self, origin: Point, direction: (f64, f64), step: f64) -> f64 {
        if !self.contains(origin) || !(step.is_finite() && step > 0.0) {
            return 0.0;
        }
        let limit = self.dimensions().diagonal();
        let inside = |d: f64| self.contains(origin.offset(direction, d));

        let mut lo = 0.0;
        let mut k = 1_u32;
        let mut hi = loop {
            let d = f64::from(k) * step;
            if d > limit {
                return lo;
            }
            if !inside(d) {
                break d;
            }
            lo = d;
            k += 1;
        };
        for _ in 0..EDGE_BISECTIONS {
            let mid = 0.5 * (lo + hi);
            if inside(mid) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

/// Round a continuous coordinate to a pixel index in `0..extent`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn pixel_index(v: f64, extent: u32) -> Option<u32> {
    let r = v.round();
    if r.is_finite() && r >= 0.0 && r < f64::from(extent) {
        Some(r as u32)
    } else {
        None
    }
}

/// Serde proxy: `(width, height, raw 0/1 bytes)`, since `ImageBuffer`
/// has no serde support.
#[derive(Serialize, Deserialize)]
struct MaskProxy(u32, u32, Vec<u8>);

impl Serialize for Mask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MaskProxy(self.0.width(), self.0.height(), self.0.as_raw().clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Mask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let MaskProxy(w, h, raw) = MaskProxy::deserialize(deserializer)?;
        let image = GrayImage::from_raw(w, h, raw)
            .ok_or_else(|| serde::de::Error::custom("invalid mask dimensions"))?;
        Self::from_gray(image).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DIMS: Dimensions = Dimensions {
        width: 8,
        height: 6,
    };

    fn block(x0: u32, y0: u32, x1: u32, y1: u32) -> Mask {
        Mask::from_fn(DIMS, |x, y| (x0..x1).contains(&x) && (y0..y1).contains(&y))
    }

    #[test]
    fn empty_mask_has_no_foreground() {
        let m = Mask::empty(DIMS);
        assert!(m.is_empty());
        assert_eq!(m.count(), 0);
        assert_eq!(m.bounding_box(), None);
    }

    #[test]
    fn from_gray_rejects_non_binary() {
        let mut img = GrayImage::new(2, 2);
        img.put_pixel(1, 1, image::Luma([255]));
        assert!(matches!(
            Mask::from_gray(img),
            Err(PipelineError::InvalidMask(_))
        ));
    }

    #[test]
    fn from_gray_accepts_binary() {
        let mut img = GrayImage::new(2, 2);
        img.put_pixel(1, 0, image::Luma([1]));
        let m = Mask::from_gray(img).unwrap();
        assert_eq!(m.count(), 1);
        assert!(m.get(1, 0));
    }

    #[test]
    fn contains_rounds_to_nearest_pixel() {
        let m = block(2, 2, 3, 3);
        assert!(m.contains(Point::new(2.0, 2.0)));
        assert!(m.contains(Point::new(2.4, 1.6)));
        assert!(!m.contains(Point::new(2.6, 2.0)));
        assert!(!m.contains(Point::new(1.4, 2.0)));
    }

    #[test]
    fn contains_outside_image_is_false() {
        let m = Mask::from_fn(DIMS, |_, _| true);
        assert!(!m.contains(Point::new(-0.6, 0.0)));
        assert!(!m.contains(Point::new(0.0, 5.6)));
        assert!(!m.contains(Point::new(f64::NAN, 1.0)));
        assert!(m.contains(Point::new(-0.4, 0.0)));
    }

    #[test]
    fn count_and_bounding_box() {
        let m = block(1, 2, 4, 5);
        assert_eq!(m.count(), 9);
        assert_eq!(
            m.bounding_box(),
            Some(PixelBounds {
                min_x: 1,
                min_y: 2,
                max_x: 3,
                max_y: 4
            })
        );
    }

    #[test]
    fn union_is_pixelwise_or_and_pure() {
        let a = block(0, 0, 2, 2);
        let b = block(1, 1, 3, 3);
        let u = a.union(&b).unwrap();
        assert_eq!(u.count(), 7);
        assert_eq!(a.count(), 4);
        assert_eq!(b.count(), 4);
        assert!(u.as_gray().pixels().all(|p| p.0[0] <= 1));
    }

    #[test]
    fn union_rejects_dimension_mismatch() {
        let a = Mask::empty(DIMS);
        let b = Mask::empty(Dimensions {
            width: 3,
            height: 3,
        });
        assert!(matches!(a.union(&b), Err(PipelineError::InvalidMask(_))));
    }

    #[test]
    fn exit_distance_ends_on_pixel_edges() {
        // Columns 2..6 cover x in [1.5, 5.5).
        let m = block(2, 1, 6, 4);
        let right = m.exit_distance(Point::new(3.0, 2.0), (1.0, 0.0), 0.5);
        let left = m.exit_distance(Point::new(3.0, 2.0), (-1.0, 0.0), 0.5);
        assert!((right - 2.5).abs() < 1e-6, "{right}");
        assert!((left - 1.5).abs() < 1e-6, "{left}");
        assert!((right + left - 4.0).abs() < 1e-6);
    }

    #[test]
    fn exit_distance_from_outside_is_zero() {
        let m = block(2, 1, 6, 4);
        assert!(m.exit_distance(Point::new(0.0, 0.0), (1.0, 0.0), 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn exit_distance_stops_at_the_image_border() {
        let full = Mask::from_fn(DIMS, |_, _| true);
        let d = full.exit_distance(Point::new(0.0, 0.0), (1.0, 0.0), 0.5);
        assert!((d - 7.5).abs() < 1e-6, "{d}");
    }

    #[test]
    fn serde_round_trip() {
        let m = block(2, 1, 5, 4);
        let json = serde_json::to_string(&m).unwrap();
        let back: Mask = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn serde_rejects_non_binary_payload() {
        let json = "[2,1,[0,7]]";
        assert!(serde_json::from_str::<Mask>(json).is_err());
    }
}
