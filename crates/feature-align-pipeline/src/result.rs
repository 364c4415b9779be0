use feature_align_core::{AnyImage, Homography, HomographyEstimate, Keypoint};
use feature_align_matching::Match;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Everything needed to draw matches between two images.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchOverlay {
    pub src_keypoints: Vec<Keypoint>,
    pub dst_keypoints: Vec<Keypoint>,
    /// Good matches, in the order used for estimation.
    pub matches: Vec<Match>,
    /// One entry per match; true for RANSAC inliers.
    pub inlier_mask: Vec<bool>,
}

impl MatchOverlay {
    pub fn inlier_matches(&self) -> impl Iterator<Item = &Match> + '_ {
        self.matches
            .iter()
            .zip(&self.inlier_mask)
            .filter_map(|(m, &inlier)| inlier.then_some(m))
    }
}

/// Estimated transform between two images and the evidence behind it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    pub src_keypoints: Vec<Keypoint>,
    pub dst_keypoints: Vec<Keypoint>,
    pub matches: Vec<Match>,
    pub estimate: HomographyEstimate,
    /// `(width, height)` of the source image.
    pub src_size: (usize, usize),
    /// `(width, height)` of the destination image.
    pub dst_size: (usize, usize),
}

impl Alignment {
    /// Maps source pixel coordinates into the destination frame.
    pub fn homography(&self) -> &Homography {
        &self.estimate.homography
    }

    pub fn inlier_count(&self) -> usize {
        self.estimate.inlier_count
    }

    pub fn overlay(&self) -> MatchOverlay {
        MatchOverlay {
            src_keypoints: self.src_keypoints.clone(),
            dst_keypoints: self.dst_keypoints.clone(),
            matches: self.matches.clone(),
            inlier_mask: self.estimate.inlier_mask.clone(),
        }
    }

    /// Source image corners (TL, TR, BR, BL) in destination coordinates.
    pub fn object_outline(&self) -> [Point2<f32>; 4] {
        let (w, h) = self.src_size;
        self.homography().project_rect_corners(w as f32, h as f32)
    }
}

/// Output of a full run: the alignment plus the source warped into the
/// destination frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Registration {
    pub alignment: Alignment,
    /// Same layout as the source image, same size as the destination.
    pub warped: AnyImage,
}

impl Registration {
    pub fn homography(&self) -> &Homography {
        self.alignment.homography()
    }

    pub fn inlier_count(&self) -> usize {
        self.alignment.inlier_count()
    }

    pub fn overlay(&self) -> MatchOverlay {
        self.alignment.overlay()
    }

    pub fn object_outline(&self) -> [Point2<f32>; 4] {
        self.alignment.object_outline()
    }
}
