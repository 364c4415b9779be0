//! Synthetic scenes and a patch-copying detector for pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use feature_align_core::{
    Descriptors, DetectorError, FeatureDetector, Features, GrayImage,
    GrayImageView, Keypoint,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MARKER: u8 = 255;
const PATCH: usize = 4;

/// Noise in `0..=200` with `markers` saturated pixels at random places.
pub(crate) fn scene(width: usize, height: usize, markers: usize, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = GrayImage::from_fn(width, height, |_, _| rng.random_range(0..=200));
    for _ in 0..markers {
        let x = rng.random_range(2..width - PATCH - 2);
        let y = rng.random_range(2..height - PATCH - 2);
        img.data[y * width + x] = MARKER;
    }
    img
}

/// `src` moved by `(dx, dy)`; uncovered pixels get fresh noise.
pub(crate) fn shifted(src: &GrayImage, dx: usize, dy: usize, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    GrayImage::from_fn(src.width, src.height, |x, y| {
        if x >= dx && y >= dy {
            src.get(x - dx, y - dy)
        } else {
            rng.random_range(0..=200)
        }
    })
}

/// Keypoints at saturated pixels, described by the raw 4x4 patch below-right
/// of them as a 16-byte binary descriptor.
#[derive(Debug, Default)]
pub(crate) struct PatchDetector {
    calls: AtomicUsize,
}

impl PatchDetector {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl FeatureDetector for PatchDetector {
    fn detect(&self, image: &GrayImageView<'_>) -> Result<Features, DetectorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut keypoints = Vec::new();
        let mut data = Vec::new();
        for y in 0..image.height.saturating_sub(PATCH) {
            for x in 0..image.width.saturating_sub(PATCH) {
                if image.get(x, y) != MARKER {
                    continue;
                }
                let mut response = 0.0;
                for py in 1..=PATCH {
                    for px in 1..=PATCH {
                        let v = image.get(x + px, y + py);
                        response += v as f32;
                        data.push(v);
                    }
                }
                keypoints.push(Keypoint::new(x as f32, y as f32, response));
            }
        }
        let descriptors = Descriptors::Binary {
            bytes: PATCH * PATCH,
            data,
        };
        Ok(Features::new(keypoints, descriptors)?)
    }
}
