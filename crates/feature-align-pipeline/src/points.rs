use feature_align_core::{Keypoint, PointPairs};
use feature_align_matching::Match;

use crate::error::AlignError;

/// Turn good matches into index-aligned source/destination points.
///
/// Entry `i` of the result comes from `matches[i]`. A match that points past
/// either keypoint list is a wiring bug and fails the whole extraction.
pub fn extract_point_pairs(
    matches: &[Match],
    src: &[Keypoint],
    dst: &[Keypoint],
) -> Result<PointPairs, AlignError> {
    let mut pairs = PointPairs::with_capacity(matches.len());
    for m in matches {
        let s = src.get(m.query_idx).ok_or_else(|| {
            AlignError::ContractViolation(format!(
                "query index {} out of range for {} source keypoints",
                m.query_idx,
                src.len()
            ))
        })?;
        let d = dst.get(m.train_idx).ok_or_else(|| {
            AlignError::ContractViolation(format!(
                "train index {} out of range for {} destination keypoints",
                m.train_idx,
                dst.len()
            ))
        })?;
        pairs.push(s.position, d.position);
    }
    Ok(pairs)
}
