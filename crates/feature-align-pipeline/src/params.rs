use feature_align_core::{RansacParams, WarpParams};
use feature_align_matching::{MatchFilter, MatcherParams};
use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Configuration for one alignment run.
///
/// Every field has a default, so partial JSON configs deserialize.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignParams {
    /// Strongest keypoints kept per image.
    pub max_features: usize,
    /// Fewer good matches than this end the run as `InsufficientMatches`.
    pub min_match_count: usize,
    pub matcher: MatcherParams,
    pub filter: MatchFilter,
    pub ransac: RansacParams,
    pub warp: WarpParams,
}

impl Default for AlignParams {
    fn default() -> Self {
        Self::object_finding()
    }
}

impl AlignParams {
    /// Re-aligning the three plates of a stacked color-separation scan.
    pub fn channel_alignment() -> Self {
        Self {
            max_features: 1000,
            min_match_count: 10,
            matcher: MatcherParams::kd_forest(5, 5),
            filter: MatchFilter::Ratio { ratio: 0.95 },
            ransac: RansacParams {
                threshold: 5.0,
                min_inliers: 10,
                ..RansacParams::default()
            },
            warp: WarpParams::default(),
        }
    }

    /// Locating a known object inside a scene.
    pub fn object_finding() -> Self {
        Self {
            filter: MatchFilter::Ratio { ratio: 0.9 },
            ..Self::channel_alignment()
        }
    }

    /// Registering two photographs of the same scene with binary descriptors.
    pub fn registration() -> Self {
        Self {
            max_features: 500,
            min_match_count: 4,
            matcher: MatcherParams::default(),
            filter: MatchFilter::Percentile { keep: 0.15 },
            ransac: RansacParams {
                threshold: 3.0,
                ..RansacParams::default()
            },
            warp: WarpParams::default(),
        }
    }

    /// Reject parameter sets no run could succeed with.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.max_features == 0 {
            return Err(InputError::NoFeatureBudget);
        }
        self.filter.validate()?;
        self.matcher.validate()?;
        self.ransac.validate()?;
        Ok(())
    }
}
