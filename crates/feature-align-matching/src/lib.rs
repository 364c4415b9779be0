//! Descriptor matching for the alignment pipeline.
//!
//! - [`DescriptorMatcher`] finds the one or two nearest train descriptors of
//!   every query descriptor, either exactly or with a randomized kd-forest.
//! - [`MatchFilter`] reduces neighbor groups to good matches with the ratio
//!   test or a percentile cut.

mod brute_force;
pub mod distance;
mod filter;
mod kdforest;
mod matcher;

pub use filter::{percentile_test, ratio_test, FilterError, MatchFilter};
pub use kdforest::KdForest;
pub use matcher::{
    CandidateGroup, DescriptorMatcher, Match, MatchError, MatcherParams, MatcherStrategy,
    TrainedMatcher, DEFAULT_FOREST_SEED,
};
