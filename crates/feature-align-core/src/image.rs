//! Lightweight row-major 8-bit image buffers.
//!
//! The core crate does not depend on the `image` crate; the facade converts
//! decoded files into these types.

/// Errors for malformed image buffers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("image is empty (width={width}, height={height})")]
    Empty { width: usize, height: usize },
    #[error("invalid image buffer length (expected {expected} bytes, got {got})")]
    DataLength { expected: usize, got: usize },
}

fn check_buffer(width: usize, height: usize, channels: usize, len: usize) -> Result<(), ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::Empty { width, height });
    }
    let expected = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(channels))
        .ok_or(ImageError::Empty { width, height })?;
    if len != expected {
        return Err(ImageError::DataLength { expected, got: len });
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

impl GrayImageView<'_> {
    /// Check that the view is non-empty and its buffer matches its dimensions.
    pub fn validate(&self) -> Result<(), ImageError> {
        check_buffer(self.width, self.height, 1, self.data.len())
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    pub fn to_owned_image(&self) -> GrayImage {
        GrayImage {
            width: self.width,
            height: self.height,
            data: self.data.to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self, ImageError> {
        check_buffer(width, height, 1, data.len())?;
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u8) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }
}

/// Interleaved 8-bit RGB view.
#[derive(Clone, Copy, Debug)]
pub struct RgbImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h*3
}

impl RgbImageView<'_> {
    pub fn validate(&self) -> Result<(), ImageError> {
        check_buffer(self.width, self.height, 3, self.data.len())
    }

    /// Luma conversion with ITU-R BT.601 weights.
    pub fn to_gray(&self) -> GrayImage {
        let data = self
            .data
            .chunks_exact(3)
            .map(|px| {
                let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect();
        GrayImage {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgbImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl RgbImage {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self, ImageError> {
        check_buffer(width, height, 3, data.len())?;
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn view(&self) -> RgbImageView<'_> {
        RgbImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.width + x) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Interleave three equally sized planes into one RGB image.
    pub fn from_planes(r: &GrayImage, g: &GrayImage, b: &GrayImage) -> Result<Self, ImageError> {
        let (w, h) = (g.width, g.height);
        for plane in [r, b] {
            if plane.width != w || plane.height != h {
                return Err(ImageError::DataLength {
                    expected: w * h,
                    got: plane.data.len(),
                });
            }
        }
        let mut data = Vec::with_capacity(w * h * 3);
        for i in 0..w * h {
            data.extend_from_slice(&[r.data[i], g.data[i], b.data[i]]);
        }
        Self::new(w, h, data)
    }
}

/// Borrowed input image of either supported layout.
#[derive(Clone, Copy, Debug)]
pub enum ImageRef<'a> {
    Gray(GrayImageView<'a>),
    Rgb(RgbImageView<'a>),
}

impl ImageRef<'_> {
    pub fn width(&self) -> usize {
        match self {
            ImageRef::Gray(v) => v.width,
            ImageRef::Rgb(v) => v.width,
        }
    }

    pub fn height(&self) -> usize {
        match self {
            ImageRef::Gray(v) => v.height,
            ImageRef::Rgb(v) => v.height,
        }
    }

    pub fn validate(&self) -> Result<(), ImageError> {
        match self {
            ImageRef::Gray(v) => v.validate(),
            ImageRef::Rgb(v) => v.validate(),
        }
    }

    /// Grayscale pixels for detection. Gray inputs are copied as-is.
    pub fn to_gray(&self) -> GrayImage {
        match self {
            ImageRef::Gray(v) => v.to_owned_image(),
            ImageRef::Rgb(v) => v.to_gray(),
        }
    }
}

impl<'a> From<GrayImageView<'a>> for ImageRef<'a> {
    fn from(v: GrayImageView<'a>) -> Self {
        ImageRef::Gray(v)
    }
}

impl<'a> From<RgbImageView<'a>> for ImageRef<'a> {
    fn from(v: RgbImageView<'a>) -> Self {
        ImageRef::Rgb(v)
    }
}

/// Owned image of either supported layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnyImage {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl AnyImage {
    pub fn width(&self) -> usize {
        match self {
            AnyImage::Gray(img) => img.width,
            AnyImage::Rgb(img) => img.width,
        }
    }

    pub fn height(&self) -> usize {
        match self {
            AnyImage::Gray(img) => img.height,
            AnyImage::Rgb(img) => img.height,
        }
    }

    pub fn as_image_ref(&self) -> ImageRef<'_> {
        match self {
            AnyImage::Gray(img) => ImageRef::Gray(img.view()),
            AnyImage::Rgb(img) => ImageRef::Rgb(img.view()),
        }
    }
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

/// Bilinear sample with zero padding outside the image.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_gray(src, x0, y0) as f32;
    let p10 = get_gray(src, x0 + 1, y0) as f32;
    let p01 = get_gray(src, x0, y0 + 1) as f32;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}
