//! Reference [`FeatureDetector`]: FAST-9 corners described by a BRIEF test
//! pattern on a blurred copy of the image.
//!
//! Descriptors are 256-bit binary strings, so matching uses Hamming distance.
//! The pattern is fixed by a seed and is not steered by keypoint orientation;
//! it suits translations and mild perspective, not large rotations.

use feature_align_core::{
    sample_bilinear, DetectorError, Descriptors, FeatureDetector, Features, GrayImageView,
    Keypoint,
};
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::imageio::{gray_view, to_image_gray};

/// Descriptor width in bytes.
pub const BRIEF_BYTES: usize = 32;
const BRIEF_BITS: usize = BRIEF_BYTES * 8;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastBriefParams {
    /// Intensity difference for the FAST segment test.
    pub fast_threshold: u8,
    /// Keep only corners that beat their 8 neighbours.
    pub non_max_suppression: bool,
    /// Gaussian sigma applied before the binary tests; `0` disables blurring.
    pub blur_sigma: f32,
    /// Half-size of the square test patch. Corners closer than this to the
    /// border are dropped.
    pub patch_radius: u32,
    /// Upper bound on corners described per image.
    pub max_keypoints: usize,
    pub pattern_seed: u64,
}

impl Default for FastBriefParams {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            non_max_suppression: true,
            blur_sigma: 2.0,
            patch_radius: 12,
            max_keypoints: 5000,
            pattern_seed: 0x0b51_ef00,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FastBriefDetector {
    params: FastBriefParams,
    /// `(dx1, dy1, dx2, dy2)` per bit.
    pattern: Vec<[f32; 4]>,
}

impl Default for FastBriefDetector {
    fn default() -> Self {
        Self::new(FastBriefParams::default())
    }
}

impl FastBriefDetector {
    pub fn new(params: FastBriefParams) -> Self {
        let r = params.patch_radius as i32;
        let mut rng = StdRng::seed_from_u64(params.pattern_seed);
        let pattern = (0..BRIEF_BITS)
            .map(|_| {
                let mut pick = || rng.random_range(-r..=r) as f32;
                [pick(), pick(), pick(), pick()]
            })
            .collect();
        Self { params, pattern }
    }

    pub fn params(&self) -> &FastBriefParams {
        &self.params
    }

    fn describe(&self, blurred: &GrayImageView<'_>, x: f32, y: f32) -> [u8; BRIEF_BYTES] {
        let mut d = [0u8; BRIEF_BYTES];
        for (i, &[dx1, dy1, dx2, dy2]) in self.pattern.iter().enumerate() {
            let a = sample_bilinear(blurred, x + dx1, y + dy1);
            let b = sample_bilinear(blurred, x + dx2, y + dy2);
            if a < b {
                d[i / 8] |= 1 << (i % 8);
            }
        }
        d
    }
}

/// FAST-9 corners of `img` and of its mirror image, merged per pixel.
///
/// The imageproc pretest pairs opposite compass points, so corners opening
/// towards the upper right or lower left are skipped; mirroring turns them
/// into corners it does find.
fn fast9_corners(img: &::image::GrayImage, threshold: u8) -> Vec<Corner> {
    let last = img.width().saturating_sub(1);
    let mirrored = ::image::imageops::flip_horizontal(img);
    let mut corners = corners_fast9(img, threshold);
    corners.extend(
        corners_fast9(&mirrored, threshold)
            .into_iter()
            .map(|c| Corner::new(last - c.x, c.y, c.score)),
    );
    corners.sort_by(|a, b| (a.y, a.x).cmp(&(b.y, b.x)).then(b.score.total_cmp(&a.score)));
    corners.dedup_by_key(|c| (c.x, c.y));
    corners
}

fn suppress_non_maxima(corners: &[Corner], width: usize, height: usize) -> Vec<Corner> {
    let mut score = vec![f32::NEG_INFINITY; width * height];
    for c in corners {
        score[c.y as usize * width + c.x as usize] = c.score;
    }
    corners
        .iter()
        .filter(|c| {
            let (x, y) = (c.x as i64, c.y as i64);
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if (dx, dy) == (0, 0)
                        || nx < 0
                        || ny < 0
                        || nx >= width as i64
                        || ny >= height as i64
                    {
                        continue;
                    }
                    let s = score[ny as usize * width + nx as usize];
                    // equal scores: the earlier pixel in raster order wins
                    let earlier = (dy, dx) < (0, 0);
                    if s > c.score || (s == c.score && earlier) {
                        return false;
                    }
                }
            }
            true
        })
        .cloned()
        .collect()
}

impl FeatureDetector for FastBriefDetector {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(w = image.width, h = image.height))
    )]
    fn detect(&self, image: &GrayImageView<'_>) -> Result<Features, DetectorError> {
        let r = self.params.patch_radius as usize;
        let min = 2 * r + 1;
        if image.width < min || image.height < min {
            return Err(DetectorError::ImageTooSmall {
                width: image.width,
                height: image.height,
                min,
            });
        }
        let img = to_image_gray(image).map_err(|e| DetectorError::Other(e.to_string()))?;
        let (w, h) = (image.width, image.height);

        let mut corners = fast9_corners(&img, self.params.fast_threshold);
        let raw = corners.len();
        corners.retain(|c| {
            let (x, y) = (c.x as usize, c.y as usize);
            x >= r && y >= r && x + r < w && y + r < h
        });
        if self.params.non_max_suppression {
            corners = suppress_non_maxima(&corners, w, h);
        }
        corners.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then((a.y, a.x).cmp(&(b.y, b.x)))
        });
        corners.truncate(self.params.max_keypoints);
        debug!("fast9: {raw} raw corners, {} kept", corners.len());

        let blurred = if self.params.blur_sigma > 0.0 {
            gaussian_blur_f32(&img, self.params.blur_sigma)
        } else {
            img
        };
        let view = gray_view(&blurred);
        let rows: Vec<[u8; BRIEF_BYTES]> = corners
            .par_iter()
            .map(|c| self.describe(&view, c.x as f32, c.y as f32))
            .collect();

        let keypoints = corners
            .iter()
            .map(|c| Keypoint::new(c.x as f32, c.y as f32, c.score))
            .collect();
        let descriptors = Descriptors::Binary {
            bytes: BRIEF_BYTES,
            data: rows.concat(),
        };
        Ok(Features::new(keypoints, descriptors)?)
    }
}
