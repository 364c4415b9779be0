//! Conversions between `image` buffers and the workspace's image types.

use std::path::{Path, PathBuf};

use ::image::{DynamicImage, ImageReader};
use feature_align_core::{
    AnyImage, GrayImage, GrayImageView, ImageError, RgbImage, RgbImageView,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum ImageIoError {
    #[error("failed to read image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ::image::ImageError,
    },
    #[error("failed to open image {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write image {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: ::image::ImageError,
    },
    #[error(transparent)]
    Buffer(#[from] ImageError),
    #[error("image dimensions {width}x{height} do not fit the encoder")]
    TooLarge { width: usize, height: usize },
}

/// Borrow an `image::GrayImage` as a core view.
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Borrow an `image::RgbImage` as a core view.
pub fn rgb_view(img: &::image::RgbImage) -> RgbImageView<'_> {
    RgbImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Copy a core gray view into an `image::GrayImage`.
pub fn to_image_gray(view: &GrayImageView<'_>) -> Result<::image::GrayImage, ImageIoError> {
    view.validate()?;
    let (w, h) = dims(view.width, view.height)?;
    ::image::GrayImage::from_raw(w, h, view.data.to_vec()).ok_or(ImageIoError::TooLarge {
        width: view.width,
        height: view.height,
    })
}

/// Copy a core RGB view into an `image::RgbImage`.
pub fn to_image_rgb(view: &RgbImageView<'_>) -> Result<::image::RgbImage, ImageIoError> {
    view.validate()?;
    let (w, h) = dims(view.width, view.height)?;
    ::image::RgbImage::from_raw(w, h, view.data.to_vec()).ok_or(ImageIoError::TooLarge {
        width: view.width,
        height: view.height,
    })
}

fn dims(width: usize, height: usize) -> Result<(u32, u32), ImageIoError> {
    let w = u32::try_from(width).ok();
    let h = u32::try_from(height).ok();
    w.zip(h).ok_or(ImageIoError::TooLarge { width, height })
}

/// Single-channel decodes stay gray; everything else becomes RGB.
pub fn from_dynamic(img: DynamicImage) -> Result<AnyImage, ImageIoError> {
    Ok(match img {
        DynamicImage::ImageLuma8(g) => {
            let (w, h) = (g.width() as usize, g.height() as usize);
            AnyImage::Gray(GrayImage::new(w, h, g.into_raw())?)
        }
        luma @ (DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLumaA16(_)) => {
            let g = luma.to_luma8();
            let (w, h) = (g.width() as usize, g.height() as usize);
            AnyImage::Gray(GrayImage::new(w, h, g.into_raw())?)
        }
        other => {
            let rgb = other.to_rgb8();
            let (w, h) = (rgb.width() as usize, rgb.height() as usize);
            AnyImage::Rgb(RgbImage::new(w, h, rgb.into_raw())?)
        }
    })
}

/// Decode a file, keeping color if it has any.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn load_image(path: impl AsRef<Path>) -> Result<AnyImage, ImageIoError> {
    let path = path.as_ref();
    let reader = ImageReader::open(path).map_err(|source| ImageIoError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let img = reader.decode().map_err(|source| ImageIoError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    from_dynamic(img)
}

/// Decode a file as grayscale; color files are converted with BT.601 weights.
pub fn load_gray(path: impl AsRef<Path>) -> Result<GrayImage, ImageIoError> {
    Ok(match load_image(path)? {
        AnyImage::Gray(g) => g,
        AnyImage::Rgb(rgb) => rgb.view().to_gray(),
    })
}

/// Encode an image; the format follows the file extension.
pub fn save_image(img: &AnyImage, path: impl AsRef<Path>) -> Result<(), ImageIoError> {
    let path = path.as_ref();
    let result = match img {
        AnyImage::Gray(g) => to_image_gray(&g.view())?.save(path),
        AnyImage::Rgb(c) => to_image_rgb(&c.view())?.save(path),
    };
    result.map_err(|source| ImageIoError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_png_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.png");
        let img = GrayImage::from_fn(7, 5, |x, y| (x * 30 + y) as u8);
        save_image(&AnyImage::Gray(img.clone()), &path).unwrap();
        assert_eq!(load_gray(&path).unwrap(), img);
        assert!(matches!(load_image(&path).unwrap(), AnyImage::Gray(_)));
    }

    #[test]
    fn color_png_loads_as_rgb_and_converts_to_gray() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.png");
        let rgb = RgbImage::new(2, 1, vec![255, 0, 0, 0, 0, 255]).unwrap();
        save_image(&AnyImage::Rgb(rgb.clone()), &path).unwrap();
        assert_eq!(load_image(&path).unwrap(), AnyImage::Rgb(rgb.clone()));
        assert_eq!(load_gray(&path).unwrap(), rgb.view().to_gray());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_image("/definitely/not/here.png").unwrap_err();
        assert!(err.to_string().contains("not/here.png"));
    }

    #[test]
    fn views_borrow_without_copying() {
        let img = ::image::GrayImage::from_raw(3, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let v = gray_view(&img);
        assert_eq!((v.width, v.height, v.get(2, 1)), (3, 2, 6));
        assert_eq!(to_image_gray(&v).unwrap(), img);
    }
}
