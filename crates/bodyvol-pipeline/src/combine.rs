//! Mask combination: whole-body, per-segment and junction unions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::mask::Mask;
use crate::types::{Dimensions, Junction, PipelineError, SegmentId, SegmentOrder};

/// Union of two adjacent segment masks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JunctionMask {
    /// The adjacent segment pair.
    pub junction: Junction,
    /// Union of both segment masks.
    pub mask: Mask,
}

/// All combined masks for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedMasks {
    /// Union of every instance mask.
    pub whole_body: Mask,
    /// Union of the instance masks of each segment.
    pub segments: BTreeMap<SegmentId, Mask>,
    /// Union of each adjacent segment pair where both are present.
    pub junctions: Vec<JunctionMask>,
}

impl CombinedMasks {
    /// Mask of one segment, if detected.
    #[must_use]
    pub fn segment(&self, id: SegmentId) -> Option<&Mask> {
        self.segments.get(&id)
    }

    /// Mask of one junction, if both of its segments were detected.
    #[must_use]
    pub fn junction(&self, junction: Junction) -> Option<&Mask> {
        self.junctions
            .iter()
            .find(|j| j.junction == junction)
            .map(|j| &j.mask)
    }
}

/// Union of all `masks`, or an empty mask of `dimensions` if there are none.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidMask`] if the masks disagree on size.
pub fn union_all<'a>(
    masks: impl IntoIterator<Item = &'a Mask>,
    dimensions: Dimensions,
) -> Result<Mask, PipelineError> {
    masks
        .into_iter()
        .try_fold(Mask::empty(dimensions), |acc, m| acc.union(m))
}

/// Combine instance masks grouped by segment.
///
/// Segments that have no instances in `instances` are absent from the
/// result, and junctions are only built when both of their segments are
/// present. Segments not named in `order` still take part in the whole
/// body and get a per-segment mask, but never form junctions.
///
/// # Errors
///
/// Returns [`PipelineError::NoDetections`] if no segment has an instance,
/// and [`PipelineError::InvalidMask`] if any mask has dimensions other
/// than `dimensions`.
pub fn combine(
    instances: &BTreeMap<SegmentId, Vec<Mask>>,
    order: &SegmentOrder,
    dimensions: Dimensions,
) -> Result<CombinedMasks, PipelineError> {
    let mut segments = BTreeMap::new();
    for (&id, masks) in instances {
        if masks.is_empty() {
            continue;
        }
        segments.insert(id, union_all(masks, dimensions)?);
    }
    if segments.is_empty() {
        return Err(PipelineError::NoDetections);
    }

    let whole_body = union_all(segments.values(), dimensions)?;

    let mut junctions = Vec::new();
    for junction in order.junctions() {
        if let (Some(a), Some(b)) = (
            segments.get(&junction.anterior),
            segments.get(&junction.posterior),
        ) {
            junctions.push(JunctionMask {
                junction,
                mask: a.union(b)?,
            });
        }
    }

    tracing::debug!(
        segments = segments.len(),
        junctions = junctions.len(),
        body_pixels = whole_body.count(),
        bounds = ?whole_body.bounding_box(),
        "combined masks"
    );

    Ok(CombinedMasks {
        whole_body,
        segments,
        junctions,
    })
}
