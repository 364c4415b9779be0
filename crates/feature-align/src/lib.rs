//! High-level facade crate for the `feature-align-*` workspace.
//!
//! This crate provides:
//! - re-exports of the core, matching and pipeline crates,
//! - (feature `image`) a FAST + BRIEF reference detector and conversions
//!   from `image` buffers,
//! - (feature `cli`) the `feature-align` command-line tool.
//!
//! ## Quickstart
//!
//! ```no_run
//! use feature_align::detect::FastBriefDetector;
//! use feature_align::imageio::load_image;
//! use feature_align::{AlignParams, Aligner};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let src = load_image("object.png")?;
//! let dst = load_image("scene.png")?;
//! let aligner = Aligner::new(FastBriefDetector::default(), AlignParams::object_finding())?;
//!
//! let reg = aligner.align(src.as_image_ref(), dst.as_image_ref())?;
//! println!("H = {:?}", reg.homography().to_array());
//! println!("object outline: {:?}", reg.object_outline());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `feature_align::core`: images, features, homographies, RANSAC, warping, quads.
//! - `feature_align::matching`: k-NN matchers and match filters.
//! - `feature_align::pipeline`: the staged alignment pipeline and channel alignment.
//! - `feature_align::detect` (feature `image`): FAST + BRIEF detector.
//! - `feature_align::imageio` (feature `image`): load, save, convert.

pub use feature_align_core as core;
pub use feature_align_matching as matching;
pub use feature_align_pipeline as pipeline;

pub use feature_align_core::{
    AnyImage, FeatureDetector, Features, GrayImage, Homography, ImageRef, RgbImage,
};
pub use feature_align_pipeline::{
    align_channels, AlignError, AlignParams, Aligner, Alignment, ChannelAlignment, Registration,
};

#[cfg(feature = "image")]
pub mod detect;
#[cfg(feature = "image")]
pub mod imageio;
