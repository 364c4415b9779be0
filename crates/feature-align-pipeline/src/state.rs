//! Explicit stage-by-stage state machine for one alignment run.
//!
//! ```text
//! Initialized -> Detected -> Matched -> Filtered -+-> InsufficientMatches
//!                                                 +-> PointsExtracted -+-> EstimationFailed
//!                                                                      +-> HomographyEstimated -> Warped
//! ```
//!
//! Each state owns the data produced so far. [`PipelineRun::advance`]
//! consumes the run, so a finished stage cannot be entered again.

use feature_align_core::{
    estimate_homography_ransac, warp_perspective_gray, warp_perspective_rgb, AnyImage,
    DetectorError, EstimationError, FeatureDetector, Features, HomographyEstimate, ImageRef,
    PointPairs,
};
use feature_align_matching::{CandidateGroup, DescriptorMatcher, Match};
use log::{debug, warn};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::{AlignError, ImageRole, InputError};
use crate::params::AlignParams;
use crate::points::extract_point_pairs;
use crate::result::{Alignment, Registration};

#[derive(Clone, Debug)]
pub enum PipelineState {
    Initialized,
    Detected {
        src: Features,
        dst: Features,
    },
    Matched {
        src: Features,
        dst: Features,
        groups: Vec<CandidateGroup>,
    },
    Filtered {
        src: Features,
        dst: Features,
        matches: Vec<Match>,
    },
    /// Terminal: the filter left fewer matches than required.
    InsufficientMatches {
        found: usize,
        required: usize,
    },
    PointsExtracted {
        src: Features,
        dst: Features,
        matches: Vec<Match>,
        pairs: PointPairs,
    },
    /// Terminal: no acceptable homography.
    EstimationFailed(EstimationError),
    HomographyEstimated(Alignment),
    /// Terminal: success.
    Warped(Registration),
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Initialized => "initialized",
            PipelineState::Detected { .. } => "detected",
            PipelineState::Matched { .. } => "matched",
            PipelineState::Filtered { .. } => "filtered",
            PipelineState::InsufficientMatches { .. } => "insufficient_matches",
            PipelineState::PointsExtracted { .. } => "points_extracted",
            PipelineState::EstimationFailed(_) => "estimation_failed",
            PipelineState::HomographyEstimated(_) => "homography_estimated",
            PipelineState::Warped(_) => "warped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::InsufficientMatches { .. }
                | PipelineState::EstimationFailed(_)
                | PipelineState::Warped(_)
        )
    }
}

fn detector_error(role: ImageRole, err: DetectorError) -> AlignError {
    match err {
        DetectorError::Features(e) => {
            let msg = format!("detector returned malformed {role} features: {e}");
            AlignError::ContractViolation(msg)
        }
        other => InputError::Detector {
            role,
            source: other,
        }
        .into(),
    }
}

/// One pass of the pipeline over a source/destination image pair.
pub struct PipelineRun<'a> {
    detector: &'a dyn FeatureDetector,
    matcher: &'a DescriptorMatcher,
    params: &'a AlignParams,
    src: ImageRef<'a>,
    dst: ImageRef<'a>,
    state: PipelineState,
}

impl<'a> PipelineRun<'a> {
    /// Validate inputs and start in [`PipelineState::Initialized`].
    pub fn new(
        detector: &'a dyn FeatureDetector,
        matcher: &'a DescriptorMatcher,
        params: &'a AlignParams,
        src: ImageRef<'a>,
        dst: ImageRef<'a>,
    ) -> Result<Self, AlignError> {
        params.validate()?;
        src.validate().map_err(|source| InputError::Image {
            role: ImageRole::Source,
            source,
        })?;
        dst.validate().map_err(|source| InputError::Image {
            role: ImageRole::Destination,
            source,
        })?;
        Ok(Self {
            detector,
            matcher,
            params,
            src,
            dst,
            state: PipelineState::Initialized,
        })
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn into_state(self) -> PipelineState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Run the next stage.
    ///
    /// Content-driven failures become terminal states; input problems and
    /// contract violations are returned as errors. Advancing a terminal run
    /// is a contract violation.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(state = self.state.name()))
    )]
    pub fn advance(mut self) -> Result<Self, AlignError> {
        let state = std::mem::replace(&mut self.state, PipelineState::Initialized);
        self.state = match state {
            PipelineState::Initialized => self.detect()?,
            PipelineState::Detected { src, dst } => self.match_features(src, dst)?,
            PipelineState::Matched { src, dst, groups } => {
                let matches = self.params.filter.apply(&groups);
                debug!(
                    "filter {:?}: {} of {} groups kept",
                    self.params.filter,
                    matches.len(),
                    groups.len()
                );
                PipelineState::Filtered { src, dst, matches }
            }
            PipelineState::Filtered { src, dst, matches } => {
                let required = self.params.min_match_count;
                if matches.len() < required {
                    warn!("only {} good matches, need {required}", matches.len());
                    PipelineState::InsufficientMatches {
                        found: matches.len(),
                        required,
                    }
                } else {
                    let pairs = extract_point_pairs(&matches, src.keypoints(), dst.keypoints())?;
                    PipelineState::PointsExtracted {
                        src,
                        dst,
                        matches,
                        pairs,
                    }
                }
            }
            PipelineState::PointsExtracted {
                src,
                dst,
                matches,
                pairs,
            } => {
                let ransac = &self.params.ransac;
                match estimate_homography_ransac(pairs.src(), pairs.dst(), ransac) {
                    Ok(estimate) => {
                        PipelineState::HomographyEstimated(self.alignment(src, dst, matches, estimate))
                    }
                    Err(e) => {
                        warn!("homography estimation failed on {} pairs: {e}", pairs.len());
                        PipelineState::EstimationFailed(e)
                    }
                }
            }
            PipelineState::HomographyEstimated(alignment) => {
                let warped = self.warp(&alignment)?;
                PipelineState::Warped(Registration { alignment, warped })
            }
            terminal => {
                return Err(AlignError::ContractViolation(format!(
                    "cannot advance a run in terminal state {}",
                    terminal.name()
                )))
            }
        };
        debug!("pipeline -> {}", self.state.name());
        Ok(self)
    }

    fn detect(&self) -> Result<PipelineState, AlignError> {
        let detect_one = |image: ImageRef<'_>, role: ImageRole| -> Result<Features, AlignError> {
            let gray = image.to_gray();
            let features = self
                .detector
                .detect(&gray.view())
                .map_err(|e| detector_error(role, e))?;
            Ok(features.retain_strongest(self.params.max_features))
        };
        let (src, dst) = rayon::join(
            || detect_one(self.src, ImageRole::Source),
            || detect_one(self.dst, ImageRole::Destination),
        );
        let (src, dst) = (src?, dst?);
        debug!(
            "detected {} source / {} destination keypoints",
            src.len(),
            dst.len()
        );
        Ok(PipelineState::Detected { src, dst })
    }

    fn match_features(&self, src: Features, dst: Features) -> Result<PipelineState, AlignError> {
        let k = self.params.filter.neighbors();
        let groups = self
            .matcher
            .knn_match(src.descriptors(), dst.descriptors(), k)
            .map_err(|e| AlignError::ContractViolation(format!("matching failed: {e}")))?;
        Ok(PipelineState::Matched { src, dst, groups })
    }

    fn alignment(
        &self,
        src: Features,
        dst: Features,
        matches: Vec<Match>,
        estimate: HomographyEstimate,
    ) -> Alignment {
        Alignment {
            src_keypoints: src.keypoints().to_vec(),
            dst_keypoints: dst.keypoints().to_vec(),
            matches,
            estimate,
            src_size: (self.src.width(), self.src.height()),
            dst_size: (self.dst.width(), self.dst.height()),
        }
    }

    fn warp(&self, alignment: &Alignment) -> Result<AnyImage, AlignError> {
        let (w, h) = alignment.dst_size;
        let h_mat = alignment.homography();
        let warped = match self.src {
            ImageRef::Gray(v) => {
                warp_perspective_gray(&v, h_mat, w, h, &self.params.warp).map(AnyImage::Gray)
            }
            ImageRef::Rgb(v) => {
                warp_perspective_rgb(&v, h_mat, w, h, &self.params.warp).map(AnyImage::Rgb)
            }
        };
        warped.map_err(|e| {
            AlignError::ContractViolation(format!("warp of estimated homography failed: {e}"))
        })
    }
}
