//! Feature-based image alignment.
//!
//! A run detects keypoints in a source and a destination image, matches
//! their descriptors, filters the matches, estimates a homography with
//! RANSAC and warps the source into the destination frame:
//!
//! - [`Aligner`] drives whole runs,
//! - [`PipelineRun`] exposes the same run one stage at a time,
//! - [`align_channels`] registers the three plates of a stacked
//!   color-separation scan and merges them.
//!
//! Detection is pluggable through [`feature_align_core::FeatureDetector`].

mod aligner;
mod channels;
mod error;
mod io;
mod params;
mod points;
mod result;
mod state;
#[cfg(test)]
mod testing;

pub use aligner::Aligner;
pub use channels::{
    align_channels, merge_bgr_planes, split_stacked_plates, ChannelAlignment, StackedPlates,
};
pub use error::{AlignError, ImageRole, InputError};
pub use io::{AlignReport, AlignmentSummary, IoError};
pub use params::AlignParams;
pub use points::extract_point_pairs;
pub use result::{Alignment, MatchOverlay, Registration};
pub use state::{PipelineRun, PipelineState};

pub use feature_align_matching::{MatchFilter, MatcherParams, MatcherStrategy};
