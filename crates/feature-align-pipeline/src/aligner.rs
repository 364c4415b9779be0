use feature_align_core::{FeatureDetector, ImageRef};
use feature_align_matching::DescriptorMatcher;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::{AlignError, InputError};
use crate::params::AlignParams;
use crate::result::{Alignment, Registration};
use crate::state::{PipelineRun, PipelineState};

/// Feature-based aligner: registers a source image onto a destination image.
///
/// Holds no per-run state; every call starts a fresh [`PipelineRun`], so one
/// aligner can serve concurrent calls.
pub struct Aligner<D> {
    detector: D,
    params: AlignParams,
    matcher: DescriptorMatcher,
}

impl<D: FeatureDetector> Aligner<D> {
    pub fn new(detector: D, params: AlignParams) -> Result<Self, AlignError> {
        params.validate()?;
        let matcher = DescriptorMatcher::new(params.matcher).map_err(InputError::from)?;
        Ok(Self {
            detector,
            params,
            matcher,
        })
    }

    #[inline]
    pub fn params(&self) -> &AlignParams {
        &self.params
    }

    #[inline]
    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Start a run that the caller steps through with [`PipelineRun::advance`].
    pub fn start<'a>(
        &'a self,
        src: ImageRef<'a>,
        dst: ImageRef<'a>,
    ) -> Result<PipelineRun<'a>, AlignError> {
        PipelineRun::new(&self.detector, &self.matcher, &self.params, src, dst)
    }

    /// Estimate the source-to-destination homography and warp the source into
    /// the destination frame.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(w = dst.width(), h = dst.height()))
    )]
    pub fn align(&self, src: ImageRef<'_>, dst: ImageRef<'_>) -> Result<Registration, AlignError> {
        match drive(self.start(src, dst)?, |_| false)? {
            PipelineState::Warped(registration) => Ok(registration),
            other => Err(failure(other)),
        }
    }

    /// Like [`Aligner::align`] but stops once the homography is known.
    pub fn estimate(&self, src: ImageRef<'_>, dst: ImageRef<'_>) -> Result<Alignment, AlignError> {
        let done = |s: &PipelineState| matches!(s, PipelineState::HomographyEstimated(_));
        match drive(self.start(src, dst)?, done)? {
            PipelineState::HomographyEstimated(alignment) => Ok(alignment),
            other => Err(failure(other)),
        }
    }
}

fn drive(
    mut run: PipelineRun<'_>,
    stop: impl Fn(&PipelineState) -> bool,
) -> Result<PipelineState, AlignError> {
    while !run.is_terminal() && !stop(run.state()) {
        run = run.advance()?;
    }
    Ok(run.into_state())
}

fn failure(state: PipelineState) -> AlignError {
    match state {
        PipelineState::InsufficientMatches { found, required } => {
            AlignError::InsufficientMatches { found, required }
        }
        PipelineState::EstimationFailed(e) => AlignError::EstimationFailure(e),
        other => AlignError::ContractViolation(format!(
            "pipeline stopped in unexpected state {}",
            other.name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scene, shifted, PatchDetector};
    use approx::assert_abs_diff_eq;
    use feature_align_core::{AnyImage, GrayImage, RgbImage};
    use feature_align_matching::MatchFilter;

    fn assert_translation(alignment: &Alignment, dx: f64, dy: f64) {
        let h = alignment.homography().h;
        assert_abs_diff_eq!(h[(0, 2)], dx, epsilon = 0.5);
        assert_abs_diff_eq!(h[(1, 2)], dy, epsilon = 0.5);
        for (r, c, v) in [(0, 0, 1.0), (1, 1, 1.0), (0, 1, 0.0), (1, 0, 0.0)] {
            assert_abs_diff_eq!(h[(r, c)], v, epsilon = 0.01);
        }
        assert_abs_diff_eq!(h[(2, 0)], 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(h[(2, 1)], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn identical_images_align_to_identity() {
        let img = scene(160, 120, 60, 1);
        let aligner = Aligner::new(PatchDetector::default(), AlignParams::object_finding()).unwrap();
        let reg = aligner.align(img.view().into(), img.view().into()).unwrap();

        assert_translation(&reg.alignment, 0.0, 0.0);
        assert_eq!(reg.inlier_count(), reg.alignment.matches.len());
        assert!(reg.overlay().inlier_mask.iter().all(|&m| m));
        let AnyImage::Gray(warped) = &reg.warped else {
            panic!("gray source must warp to a gray image");
        };
        for y in 1..img.height - 1 {
            for x in 1..img.width - 1 {
                assert_eq!(warped.get(x, y), img.get(x, y), "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn recovers_translation_with_each_preset() {
        let src = scene(200, 150, 80, 2);
        let dst = shifted(&src, 10, 5, 3);
        for params in [
            AlignParams::channel_alignment(),
            AlignParams::object_finding(),
            AlignParams::registration(),
        ] {
            let aligner = Aligner::new(PatchDetector::default(), params).unwrap();
            let alignment = aligner.estimate(src.view().into(), dst.view().into()).unwrap();
            assert_translation(&alignment, 10.0, 5.0);
        }
    }

    #[test]
    fn rgb_source_is_warped_in_color() {
        let gray = scene(120, 90, 50, 4);
        let rgb_data: Vec<u8> = gray.data.iter().flat_map(|&v| [v, v, v]).collect();
        let rgb = RgbImage::new(120, 90, rgb_data).unwrap();
        let aligner = Aligner::new(PatchDetector::default(), AlignParams::object_finding()).unwrap();
        let reg = aligner.align(rgb.view().into(), gray.view().into()).unwrap();
        assert!(matches!(reg.warped, AnyImage::Rgb(ref img) if img.width == 120 && img.height == 90));
    }

    #[test]
    fn unrelated_images_fail_recoverably() {
        let a = scene(160, 120, 60, 10);
        let b = scene(160, 120, 60, 11);
        let params = AlignParams {
            filter: MatchFilter::Ratio { ratio: 0.7 },
            ..AlignParams::object_finding()
        };
        let aligner = Aligner::new(PatchDetector::default(), params).unwrap();
        let err = aligner.align(a.view().into(), b.view().into()).unwrap_err();
        assert!(err.is_recoverable(), "unexpected error {err}");
        assert!(matches!(
            err,
            AlignError::InsufficientMatches { .. } | AlignError::EstimationFailure(_)
        ));
    }

    #[test]
    fn invalid_parameters_are_rejected_before_detection() {
        let params = AlignParams {
            filter: MatchFilter::Ratio { ratio: 1.5 },
            ..AlignParams::default()
        };
        assert!(matches!(
            Aligner::new(PatchDetector::default(), params),
            Err(AlignError::InputError(InputError::Filter(_)))
        ));
    }

    #[test]
    fn empty_image_is_an_input_error() {
        let detector = PatchDetector::default();
        let aligner = Aligner::new(&detector, AlignParams::default()).unwrap();
        let img = scene(64, 64, 10, 5);
        let empty = feature_align_core::GrayImageView {
            width: 0,
            height: 0,
            data: &[],
        };
        let err = aligner.align(empty.into(), img.view().into()).unwrap_err();
        assert!(matches!(err, AlignError::InputError(InputError::Image { .. })));
        assert_eq!(detector.calls(), 0);
    }

    #[test]
    fn high_match_gate_stops_before_estimation() {
        let img = scene(120, 90, 30, 6);
        let params = AlignParams {
            min_match_count: 500,
            ..AlignParams::default()
        };
        let aligner = Aligner::new(PatchDetector::default(), params).unwrap();
        let err = aligner.align(img.view().into(), img.view().into()).unwrap_err();
        assert!(matches!(
            err,
            AlignError::InsufficientMatches { required: 500, .. }
        ));
    }

    #[test]
    fn stepping_visits_every_stage_in_order() {
        let img = scene(120, 90, 40, 7);
        let aligner = Aligner::new(PatchDetector::default(), AlignParams::default()).unwrap();
        let mut run = aligner.start(img.view().into(), img.view().into()).unwrap();
        let mut names = vec![run.state().name()];
        while !run.is_terminal() {
            run = run.advance().unwrap();
            names.push(run.state().name());
        }
        assert_eq!(
            names,
            [
                "initialized",
                "detected",
                "matched",
                "filtered",
                "points_extracted",
                "homography_estimated",
                "warped"
            ]
        );
        assert!(matches!(
            run.advance(),
            Err(AlignError::ContractViolation(_))
        ));
    }

    #[test]
    fn featureless_images_do_not_panic() {
        let flat = GrayImage::filled(64, 64, 90);
        let aligner = Aligner::new(PatchDetector::default(), AlignParams::registration()).unwrap();
        let err = aligner.align(flat.view().into(), flat.view().into()).unwrap_err();
        assert!(matches!(
            err,
            AlignError::InsufficientMatches { found: 0, .. }
        ));
    }
}
