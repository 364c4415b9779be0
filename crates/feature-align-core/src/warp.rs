//! Perspective resampling of 8-bit images.
//!
//! Every output pixel `(x, y)` takes the source value at `H^-1 * (x, y)`.
//! Samples that fall outside `[0, w-1] x [0, h-1]` take the border value.

use crate::homography::Homography;
use crate::image::{GrayImage, GrayImageView, ImageError, RgbImage, RgbImageView};
use nalgebra::Matrix3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpParams {
    pub interpolation: Interpolation,
    /// Value written where the inverse mapping leaves the source image.
    pub border_value: u8,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WarpError {
    #[error("homography is not invertible")]
    SingularTransform,
    #[error("output size must be positive (got {width}x{height})")]
    EmptyOutput { width: usize, height: usize },
    #[error(transparent)]
    Image(#[from] ImageError),
}

struct Plane<'a, const C: usize> {
    width: usize,
    height: usize,
    data: &'a [u8],
}

impl<const C: usize> Plane<'_, C> {
    #[inline]
    fn px(&self, x: usize, y: usize) -> &[u8] {
        let i = (y * self.width + x) * C;
        &self.data[i..i + C]
    }

    fn sample(&self, x: f64, y: f64, params: &WarpParams, out: &mut [u8]) {
        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        if !(x.is_finite() && y.is_finite()) || x < 0.0 || y < 0.0 || x > max_x || y > max_y {
            out.fill(params.border_value);
            return;
        }

        match params.interpolation {
            Interpolation::Nearest => {
                let xi = (x.round() as usize).min(self.width - 1);
                let yi = (y.round() as usize).min(self.height - 1);
                out.copy_from_slice(self.px(xi, yi));
            }
            Interpolation::Bilinear => {
                let x0 = (x.floor() as usize).min(self.width - 1);
                let y0 = (y.floor() as usize).min(self.height - 1);
                let x1 = (x0 + 1).min(self.width - 1);
                let y1 = (y0 + 1).min(self.height - 1);
                let fx = x - x0 as f64;
                let fy = y - y0 as f64;

                let (p00, p10) = (self.px(x0, y0), self.px(x1, y0));
                let (p01, p11) = (self.px(x0, y1), self.px(x1, y1));
                for c in 0..C {
                    let top = p00[c] as f64 + fx * (p10[c] as f64 - p00[c] as f64);
                    let bottom = p01[c] as f64 + fx * (p11[c] as f64 - p01[c] as f64);
                    let v = top + fy * (bottom - top);
                    out[c] = v.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
}

fn warp_plane<const C: usize>(
    src: Plane<'_, C>,
    h: &Homography,
    out_w: usize,
    out_h: usize,
    params: &WarpParams,
) -> Result<Vec<u8>, WarpError> {
    if out_w == 0 || out_h == 0 {
        return Err(WarpError::EmptyOutput {
            width: out_w,
            height: out_h,
        });
    }
    let inv: Matrix3<f64> = h.inverse().ok_or(WarpError::SingularTransform)?.h;

    let mut out = vec![params.border_value; out_w * out_h * C];
    out.par_chunks_mut(out_w * C)
        .enumerate()
        .for_each(|(y, row)| {
            let yf = y as f64;
            for (x, px) in row.chunks_exact_mut(C).enumerate() {
                let xf = x as f64;
                let w = inv[(2, 0)] * xf + inv[(2, 1)] * yf + inv[(2, 2)];
                if w.abs() < f64::EPSILON {
                    px.fill(params.border_value);
                    continue;
                }
                let sx = (inv[(0, 0)] * xf + inv[(0, 1)] * yf + inv[(0, 2)]) / w;
                let sy = (inv[(1, 0)] * xf + inv[(1, 1)] * yf + inv[(1, 2)]) / w;
                src.sample(sx, sy, params, px);
            }
        });
    Ok(out)
}

/// Warp a grayscale image into an `out_w x out_h` canvas.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(src, h, params), fields(w = out_w, h = out_h))
)]
pub fn warp_perspective_gray(
    src: &GrayImageView<'_>,
    h: &Homography,
    out_w: usize,
    out_h: usize,
    params: &WarpParams,
) -> Result<GrayImage, WarpError> {
    src.validate()?;
    let plane = Plane::<1> {
        width: src.width,
        height: src.height,
        data: src.data,
    };
    let data = warp_plane(plane, h, out_w, out_h, params)?;
    Ok(GrayImage {
        width: out_w,
        height: out_h,
        data,
    })
}

/// Warp an interleaved RGB image into an `out_w x out_h` canvas.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(src, h, params), fields(w = out_w, h = out_h))
)]
pub fn warp_perspective_rgb(
    src: &RgbImageView<'_>,
    h: &Homography,
    out_w: usize,
    out_h: usize,
    params: &WarpParams,
) -> Result<RgbImage, WarpError> {
    src.validate()?;
    let plane = Plane::<3> {
        width: src.width,
        height: src.height,
        data: src.data,
    };
    let data = warp_plane(plane, h, out_w, out_h, params)?;
    Ok(RgbImage {
        width: out_w,
        height: out_h,
        data,
    })
}
