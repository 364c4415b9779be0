use std::fmt;

use feature_align_core::{DetectorError, EstimationError, ImageError};
use feature_align_matching::{FilterError, MatchError};

/// Which input of a pairwise alignment an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageRole {
    Source,
    Destination,
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRole::Source => f.write_str("source"),
            ImageRole::Destination => f.write_str("destination"),
        }
    }
}

/// Problems with the caller's inputs, reported before or during detection.
#[derive(thiserror::Error, Debug)]
pub enum InputError {
    #[error("{role} image: {source}")]
    Image {
        role: ImageRole,
        #[source]
        source: ImageError,
    },
    #[error("detector failed on {role} image: {source}")]
    Detector {
        role: ImageRole,
        #[source]
        source: DetectorError,
    },
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Matcher(#[from] MatchError),
    #[error(transparent)]
    Ransac(#[from] EstimationError),
    #[error("max_features must be positive")]
    NoFeatureBudget,
    #[error("stacked plate image needs at least 3 rows, got {height}")]
    PlatesTooSmall { height: usize },
}

/// Errors returned by the alignment pipeline.
///
/// `InsufficientMatches` and `EstimationFailure` are ordinary outcomes for
/// unrelated or low-texture images; callers are expected to handle them.
#[derive(thiserror::Error, Debug)]
pub enum AlignError {
    #[error("not enough good matches ({found} < {required})")]
    InsufficientMatches { found: usize, required: usize },
    #[error("homography estimation failed: {0}")]
    EstimationFailure(#[source] EstimationError),
    #[error("pipeline contract violated: {0}")]
    ContractViolation(String),
    #[error(transparent)]
    InputError(#[from] InputError),
}

impl AlignError {
    /// True for failures caused by image content rather than misuse.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AlignError::InsufficientMatches { .. } | AlignError::EstimationFailure(_)
        )
    }
}
