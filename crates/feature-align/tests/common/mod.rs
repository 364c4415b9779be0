#![allow(dead_code)]

use std::path::Path;

use feature_align::core::{AnyImage, GrayImage};
use feature_align::imageio::save_image;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const BACKGROUND: u8 = 90;

/// Random axis-aligned rectangles on a flat background, with the whole
/// drawing moved by `(dx, dy)`.
pub fn rectangles(width: usize, height: usize, dx: i32, dy: i32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let rects: Vec<(i32, i32, i32, i32, u8)> = (0..45)
        .map(|_| {
            let x = rng.random_range(0..width as i32);
            let y = rng.random_range(0..height as i32);
            let w = rng.random_range(8..40);
            let h = rng.random_range(8..40);
            let v = if rng.random::<bool>() {
                rng.random_range(150..=255)
            } else {
                rng.random_range(0..=40)
            };
            (x, y, w, h, v)
        })
        .collect();
    GrayImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as i32 - dx, y as i32 - dy);
        let mut v = BACKGROUND;
        for &(rx, ry, rw, rh, rv) in &rects {
            if x >= rx && x < rx + rw && y >= ry && y < ry + rh {
                v = rv;
            }
        }
        v
    })
}

pub fn noise(width: usize, height: usize, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    GrayImage::from_fn(width, height, |_, _| rng.random())
}

pub fn write_png(img: &GrayImage, path: &Path) {
    save_image(&AnyImage::Gray(img.clone()), path).expect("write png");
}

/// Three renderings of one scene stacked top to bottom.
pub fn stacked(bands: [&GrayImage; 3]) -> GrayImage {
    let width = bands[0].width;
    let data: Vec<u8> = bands.iter().flat_map(|b| b.data.iter().copied()).collect();
    GrayImage::new(width, data.len() / width, data).expect("stacked plates")
}
