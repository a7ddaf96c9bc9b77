//! Segment centroids: the mean foreground pixel position of each mask.

use std::collections::BTreeMap;

use crate::mask::Mask;
use crate::types::{GrayImage, PipelineError, Point, SegmentId};

/// Centroid of a mask's foreground, in pixel-index coordinates.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyMask`] if the mask has no foreground.
#[allow(clippy::cast_precision_loss)]
pub fn centroid(mask: &Mask) -> Result<Point, PipelineError> {
    let (mut sx, mut sy, mut n) = (0_u64, 0_u64, 0_u64);
    for (x, y) in mask.foreground() {
        sx += u64::from(x);
        sy += u64::from(y);
        n += 1;
    }
    if n == 0 {
        return Err(PipelineError::EmptyMask);
    }
    Ok(Point::new(sx as f64 / n as f64, sy as f64 / n as f64))
}

/// Centroid of a raw single-channel image that should hold a `0/1` mask.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidMask`] if the image is not binary, and
/// [`PipelineError::EmptyMask`] if it has no foreground.
pub fn centroid_of_gray(image: GrayImage) -> Result<Point, PipelineError> {
    centroid(&Mask::from_gray(image)?)
}

/// Centroids of several class-labelled masks.
#[derive(Debug, Clone, PartialEq)]
pub struct CentroidBatch {
    /// Centroid per segment, for masks with foreground.
    pub centroids: BTreeMap<SegmentId, Point>,
    /// Segments whose mask had no foreground.
    pub empty: Vec<SegmentId>,
}

impl CentroidBatch {
    /// Centroids in the order given by `ids`, skipping missing ones.
    pub fn ordered<'a>(
        &'a self,
        ids: impl IntoIterator<Item = SegmentId> + 'a,
    ) -> impl Iterator<Item = Point> + 'a {
        ids.into_iter()
            .filter_map(move |id| self.centroids.get(&id).copied())
    }
}

/// Compute one centroid per `(mask, class)` pair.
///
/// Empty masks are recorded in [`CentroidBatch::empty`] instead of failing
/// the batch.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidMask`] if `masks` and `classes` differ
/// in length, and [`PipelineError::DuplicateSegment`] if a class appears
/// twice.
pub fn centroids(masks: &[Mask], classes: &[SegmentId]) -> Result<CentroidBatch, PipelineError> {
    if masks.len() != classes.len() {
        return Err(PipelineError::InvalidMask(format!(
            "{} masks but {} class ids",
            masks.len(),
            classes.len()
        )));
    }
    let mut batch = CentroidBatch {
        centroids: BTreeMap::new(),
        empty: Vec::new(),
    };
    for (i, (mask, &class)) in masks.iter().zip(classes).enumerate() {
        if classes[..i].contains(&class) {
            return Err(PipelineError::DuplicateSegment(class));
        }
        match centroid(mask) {
            Ok(p) => {
                batch.centroids.insert(class, p);
            }
            Err(PipelineError::EmptyMask) => batch.empty.push(class),
            Err(e) => return Err(e),
        }
    }
    Ok(batch)
}

/// Same as [`centroids`] over an already-keyed map of segment masks.
#[must_use]
pub fn centroids_of(segments: &BTreeMap<SegmentId, Mask>) -> CentroidBatch {
    let mut batch = CentroidBatch {
        centroids: BTreeMap::new(),
        empty: Vec::new(),
    };
    for (&id, mask) in segments {
        match centroid(mask) {
            Ok(p) => {
                batch.centroids.insert(id, p);
            }
            Err(_) => batch.empty.push(id),
        }
    }
    batch
}
