//! Warping between two user-supplied quadrilaterals.
//!
//! Corner order is always top-left, top-right, bottom-right, bottom-left.

use crate::homography::{has_collinear_triple, homography_from_4pt, Homography};
use crate::image::{GrayImage, RgbImage};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

pub type Quad = [Point2<f32>; 4];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QuadError {
    #[error("quad has three collinear corners")]
    Degenerate,
    #[error("target size must be positive (got {width}x{height})")]
    EmptyTarget { width: usize, height: usize },
    #[error("image size {got:?} does not match target size {expected:?}")]
    SizeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
}

fn pick(points: &[Point2<f32>; 4], key: impl Fn(&Point2<f32>) -> f32, largest: bool) -> Point2<f32> {
    let mut best = points[0];
    for p in &points[1..] {
        let better = if largest {
            key(p) > key(&best)
        } else {
            key(p) < key(&best)
        };
        if better {
            best = *p;
        }
    }
    best
}

/// Order four arbitrary corners as TL, TR, BR, BL.
///
/// TL has the smallest `x + y`, BR the largest; TR has the largest `x - y`,
/// BL the smallest.
pub fn order_quad(points: &[Point2<f32>; 4]) -> Quad {
    let sum = |p: &Point2<f32>| p.x + p.y;
    let diff = |p: &Point2<f32>| p.x - p.y;
    [
        pick(points, sum, false),
        pick(points, diff, true),
        pick(points, sum, true),
        pick(points, diff, false),
    ]
}

/// Corners of a full `width x height` image.
pub fn image_quad(width: usize, height: usize) -> Quad {
    let (w, h) = ((width.max(1) - 1) as f32, (height.max(1) - 1) as f32);
    [
        Point2::new(0.0, 0.0),
        Point2::new(w, 0.0),
        Point2::new(w, h),
        Point2::new(0.0, h),
    ]
}

/// Axis-aligned target for rectifying `quad`: its bounding box moved to the
/// origin. Returns the target quad and the canvas size.
pub fn rectified_quad(quad: &Quad) -> (Quad, usize, usize) {
    let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
    let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for p in quad {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let width = (max_x - min_x).round().max(0.0) as usize + 1;
    let height = (max_y - min_y).round().max(0.0) as usize + 1;
    (image_quad(width, height), width, height)
}

/// Where the source quad should land.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum QuadTarget {
    /// Unwarp into an upright canvas sized by the source quad's bounding box.
    Rectify,
    /// Map onto `quad` inside a `width x height` canvas.
    Onto {
        quad: Quad,
        width: usize,
        height: usize,
    },
}

/// Exact homography between two quads plus the output canvas size.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuadWarp {
    pub homography: Homography,
    /// Ordered destination corners in the output canvas.
    pub dst_quad: Quad,
    pub width: usize,
    pub height: usize,
}

impl QuadWarp {
    /// Both quads are reordered with [`order_quad`] first, so click order does
    /// not matter.
    pub fn solve(src: &Quad, target: &QuadTarget) -> Result<Self, QuadError> {
        let src = order_quad(src);
        let (dst_quad, width, height) = match target {
            QuadTarget::Rectify => rectified_quad(&src),
            QuadTarget::Onto {
                quad,
                width,
                height,
            } => (order_quad(quad), *width, *height),
        };
        if width == 0 || height == 0 {
            return Err(QuadError::EmptyTarget { width, height });
        }
        if has_collinear_triple(&src) || has_collinear_triple(&dst_quad) {
            return Err(QuadError::Degenerate);
        }
        let homography = homography_from_4pt(&src, &dst_quad).ok_or(QuadError::Degenerate)?;
        Ok(Self {
            homography,
            dst_quad,
            width,
            height,
        })
    }
}

#[inline]
fn cross(a: Point2<f32>, b: Point2<f32>, p: Point2<f32>) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Inside or on the boundary of a convex quad.
pub fn quad_contains(quad: &Quad, p: Point2<f32>) -> bool {
    let mut pos = false;
    let mut neg = false;
    for i in 0..4 {
        let c = cross(quad[i], quad[(i + 1) % 4], p);
        pos |= c > 1e-4;
        neg |= c < -1e-4;
    }
    !(pos && neg)
}

fn composite<const C: usize>(
    dst: &mut [u8],
    warped: &[u8],
    width: usize,
    quad: &Quad,
) {
    for (i, (d, w)) in dst
        .chunks_exact_mut(C)
        .zip(warped.chunks_exact(C))
        .enumerate()
    {
        let p = Point2::new((i % width) as f32, (i / width) as f32);
        if quad_contains(quad, p) {
            d.fill(0);
        }
        for (dc, wc) in d.iter_mut().zip(w) {
            *dc = dc.saturating_add(*wc);
        }
    }
}

fn check_size(expected: (usize, usize), got: (usize, usize)) -> Result<(), QuadError> {
    if expected != got {
        return Err(QuadError::SizeMismatch { expected, got });
    }
    Ok(())
}

/// Paste `warped` into `dst`: pixels inside `quad` are cleared first, then the
/// warped image is added with saturation.
pub fn composite_quad_rgb(dst: &mut RgbImage, warped: &RgbImage, quad: &Quad) -> Result<(), QuadError> {
    check_size((dst.width, dst.height), (warped.width, warped.height))?;
    let width = dst.width;
    composite::<3>(&mut dst.data, &warped.data, width, quad);
    Ok(())
}

/// Grayscale counterpart of [`composite_quad_rgb`].
pub fn composite_quad_gray(dst: &mut GrayImage, warped: &GrayImage, quad: &Quad) -> Result<(), QuadError> {
    check_size((dst.width, dst.height), (warped.width, warped.height))?;
    let width = dst.width;
    composite::<1>(&mut dst.data, &warped.data, width, quad);
    Ok(())
}
