//! Core types and geometry for feature-based image alignment.
//!
//! This crate holds the pieces every pipeline stage shares: 8-bit image
//! buffers, the keypoint/descriptor data model with the [`FeatureDetector`]
//! capability, homography fitting (exact 4-point, normalized DLT and RANSAC)
//! and perspective warping. It does not depend on any concrete detector or
//! image codec.

mod features;
mod homography;
mod image;
mod logger;
mod quad;
mod ransac;
mod warp;

pub use features::{
    DescriptorKind, Descriptors, DetectorError, FeatureDetector, Features, FeaturesError,
    Keypoint, PointPairs,
};
pub use homography::{
    estimate_homography_dlt, has_collinear_triple, homography_from_4pt, Homography,
    SINGULAR_DET_EPS,
};
pub use image::{
    sample_bilinear, AnyImage, GrayImage, GrayImageView, ImageError,
    ImageRef, RgbImage, RgbImageView,
};
pub use quad::{
    composite_quad_gray, composite_quad_rgb, image_quad, order_quad, quad_contains,
    rectified_quad, Quad, QuadError, QuadTarget, QuadWarp,
};
pub use ransac::{
    estimate_homography_ransac, EstimationError, HomographyEstimate, RansacParams,
    DEFAULT_MIN_INLIERS, MIN_SAMPLE,
};
pub use warp::{warp_perspective_gray, warp_perspective_rgb, Interpolation, WarpError, WarpParams};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};
