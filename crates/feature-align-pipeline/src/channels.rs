//! Color reconstruction from three vertically stacked monochrome plates.
//!
//! The plates are, top to bottom, the blue, green and red exposures of one
//! scene. Blue and red are registered onto green and the three are merged.

use feature_align_core::{AnyImage, FeatureDetector, GrayImage, GrayImageView, RgbImage};
use log::debug;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::aligner::Aligner;
use crate::error::{AlignError, InputError};
use crate::result::Registration;

/// Borrowed views of the three plates.
#[derive(Clone, Copy, Debug)]
pub struct StackedPlates<'a> {
    pub blue: GrayImageView<'a>,
    pub green: GrayImageView<'a>,
    pub red: GrayImageView<'a>,
}

/// Cut a plate scan into three bands of `height / 3` rows; the last band
/// also takes the remainder rows.
pub fn split_stacked_plates<'a>(
    image: &GrayImageView<'a>,
) -> Result<StackedPlates<'a>, InputError> {
    if image.height < 3 || image.width == 0 || image.data.len() != image.width * image.height {
        return Err(InputError::PlatesTooSmall {
            height: image.height,
        });
    }
    let band = image.height / 3;
    let w = image.width;
    let view = |y0: usize, rows: usize| GrayImageView {
        width: w,
        height: rows,
        data: &image.data[y0 * w..(y0 + rows) * w],
    };
    Ok(StackedPlates {
        blue: view(0, band),
        green: view(band, band),
        red: view(2 * band, image.height - 2 * band),
    })
}

/// Interleave blue, green and red planes into an RGB image.
pub fn merge_bgr_planes(
    blue: &GrayImage,
    green: &GrayImage,
    red: &GrayImage,
) -> Result<RgbImage, AlignError> {
    RgbImage::from_planes(red, green, blue)
        .map_err(|e| AlignError::ContractViolation(format!("plane sizes differ: {e}")))
}

/// Result of [`align_channels`].
#[derive(Clone, Debug)]
pub struct ChannelAlignment {
    pub blue_to_green: Registration,
    pub red_to_green: Registration,
    /// Merged color image in the green plate's frame.
    pub color: RgbImage,
}

fn warped_gray(reg: &Registration) -> Result<&GrayImage, AlignError> {
    match &reg.warped {
        AnyImage::Gray(img) => Ok(img),
        AnyImage::Rgb(_) => Err(AlignError::ContractViolation(
            "gray plate warped to a color image".to_string(),
        )),
    }
}

/// Register the blue and red plates onto the green one and merge the result.
///
/// The two registrations are independent runs and execute concurrently.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn align_channels<D: FeatureDetector>(
    aligner: &Aligner<D>,
    stacked: &GrayImageView<'_>,
) -> Result<ChannelAlignment, AlignError> {
    let plates = split_stacked_plates(stacked)?;
    debug!(
        "plates: {}x{} (blue/green), {}x{} (red)",
        plates.green.width, plates.green.height, plates.red.width, plates.red.height
    );

    let (blue, red) = rayon::join(
        || aligner.align(plates.blue.into(), plates.green.into()),
        || aligner.align(plates.red.into(), plates.green.into()),
    );
    let (blue_to_green, red_to_green) = (blue?, red?);

    let green = plates.green.to_owned_image();
    let color = merge_bgr_planes(
        warped_gray(&blue_to_green)?,
        &green,
        warped_gray(&red_to_green)?,
    )?;
    Ok(ChannelAlignment {
        blue_to_green,
        red_to_green,
        color,
    })
}
