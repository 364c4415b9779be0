//! Keypoints, descriptors and the detector capability consumed by the pipeline.

use crate::GrayImageView;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// A salient, repeatable image location.
///
/// Pixel centers sit at integer coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub position: Point2<f32>,
    /// Characteristic size in pixels, if the detector estimates one.
    pub scale: Option<f32>,
    /// Orientation in radians, if the detector estimates one.
    pub orientation: Option<f32>,
    /// Detector response used for ranking.
    pub response: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, response: f32) -> Self {
        Self {
            position: Point2::new(x, y),
            scale: None,
            orientation: None,
            response,
        }
    }
}

/// Family of a descriptor set, which fixes the comparison metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorKind {
    /// Floating point vectors compared with the Euclidean distance.
    Float { dim: usize },
    /// Packed bit strings compared with the Hamming distance.
    Binary { bytes: usize },
}

/// Row-major descriptor matrix, one row per keypoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Descriptors {
    Float { dim: usize, data: Vec<f32> },
    Binary { bytes: usize, data: Vec<u8> },
}

impl Descriptors {
    pub fn empty(kind: DescriptorKind) -> Self {
        match kind {
            DescriptorKind::Float { dim } => Descriptors::Float {
                dim,
                data: Vec::new(),
            },
            DescriptorKind::Binary { bytes } => Descriptors::Binary {
                bytes,
                data: Vec::new(),
            },
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            Descriptors::Float { dim, .. } => DescriptorKind::Float { dim: *dim },
            Descriptors::Binary { bytes, .. } => DescriptorKind::Binary { bytes: *bytes },
        }
    }

    /// Number of descriptor rows.
    pub fn len(&self) -> usize {
        match self {
            Descriptors::Float { dim, data } if *dim > 0 => data.len() / dim,
            Descriptors::Binary { bytes, data } if *bytes > 0 => data.len() / bytes,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row `i` of a float descriptor set.
    pub fn float_row(&self, i: usize) -> Option<&[f32]> {
        match self {
            Descriptors::Float { dim, data } => data.get(i * dim..(i + 1) * dim),
            Descriptors::Binary { .. } => None,
        }
    }

    /// Row `i` of a binary descriptor set.
    pub fn binary_row(&self, i: usize) -> Option<&[u8]> {
        match self {
            Descriptors::Binary { bytes, data } => data.get(i * bytes..(i + 1) * bytes),
            Descriptors::Float { .. } => None,
        }
    }

    fn row_width(&self) -> usize {
        match self {
            Descriptors::Float { dim, .. } => *dim,
            Descriptors::Binary { bytes, .. } => *bytes,
        }
    }

    fn data_len(&self) -> usize {
        match self {
            Descriptors::Float { data, .. } => data.len(),
            Descriptors::Binary { data, .. } => data.len(),
        }
    }

    /// Keep only the rows listed in `rows`, in that order.
    pub fn select(&self, rows: &[usize]) -> Descriptors {
        match self {
            Descriptors::Float { dim, data } => Descriptors::Float {
                dim: *dim,
                data: rows
                    .iter()
                    .flat_map(|&r| data[r * dim..(r + 1) * dim].iter().copied())
                    .collect(),
            },
            Descriptors::Binary { bytes, data } => Descriptors::Binary {
                bytes: *bytes,
                data: rows
                    .iter()
                    .flat_map(|&r| data[r * bytes..(r + 1) * bytes].iter().copied())
                    .collect(),
            },
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FeaturesError {
    #[error("descriptor row width must be positive")]
    ZeroWidth,
    #[error("descriptor buffer of {len} values is not a multiple of the row width {width}")]
    RaggedDescriptors { len: usize, width: usize },
    #[error("{keypoints} keypoints but {descriptors} descriptors")]
    LengthMismatch { keypoints: usize, descriptors: usize },
}

/// Detector output for one image: keypoints with index-aligned descriptors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Features {
    keypoints: Vec<Keypoint>,
    descriptors: Descriptors,
}

impl Features {
    pub fn new(keypoints: Vec<Keypoint>, descriptors: Descriptors) -> Result<Self, FeaturesError> {
        let width = descriptors.row_width();
        if width == 0 {
            return Err(FeaturesError::ZeroWidth);
        }
        if descriptors.data_len() % width != 0 {
            return Err(FeaturesError::RaggedDescriptors {
                len: descriptors.data_len(),
                width,
            });
        }
        if keypoints.len() != descriptors.len() {
            return Err(FeaturesError::LengthMismatch {
                keypoints: keypoints.len(),
                descriptors: descriptors.len(),
            });
        }
        Ok(Self {
            keypoints,
            descriptors,
        })
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &Descriptors {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Keep the `max` strongest keypoints (ties keep detection order).
    pub fn retain_strongest(self, max: usize) -> Features {
        if self.keypoints.len() <= max {
            return self;
        }
        let mut order: Vec<usize> = (0..self.keypoints.len()).collect();
        order.sort_by(|&a, &b| {
            self.keypoints[b]
                .response
                .total_cmp(&self.keypoints[a].response)
        });
        order.truncate(max);
        order.sort_unstable();

        let keypoints = order.iter().map(|&i| self.keypoints[i]).collect();
        let descriptors = self.descriptors.select(&order);
        Features {
            keypoints,
            descriptors,
        }
    }
}

/// Errors reported by a [`FeatureDetector`].
#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    #[error("image too small for detection ({width}x{height}, need at least {min}x{min})")]
    ImageTooSmall {
        width: usize,
        height: usize,
        min: usize,
    },
    #[error(transparent)]
    Features(#[from] FeaturesError),
    #[error("detector failed: {0}")]
    Other(String),
}

/// Keypoint detection and description on a grayscale image.
///
/// Detection internals are outside this workspace's core; the pipeline only
/// relies on this contract. `Sync` lets one detector serve concurrent runs.
pub trait FeatureDetector: Sync {
    fn detect(&self, image: &GrayImageView<'_>) -> Result<Features, DetectorError>;
}

impl<D: FeatureDetector + ?Sized> FeatureDetector for &D {
    fn detect(&self, image: &GrayImageView<'_>) -> Result<Features, DetectorError> {
        (**self).detect(image)
    }
}

/// Index-aligned source/destination point lists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointPairs {
    src: Vec<Point2<f32>>,
    dst: Vec<Point2<f32>>,
}

impl PointPairs {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            src: Vec::with_capacity(n),
            dst: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, src: Point2<f32>, dst: Point2<f32>) {
        self.src.push(src);
        self.dst.push(dst);
    }

    pub fn src(&self) -> &[Point2<f32>] {
        &self.src
    }

    pub fn dst(&self) -> &[Point2<f32>] {
        &self.dst
    }

    pub fn len(&self) -> usize {
        self.src.len()
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }
}

impl FromIterator<(Point2<f32>, Point2<f32>)> for PointPairs {
    fn from_iter<I: IntoIterator<Item = (Point2<f32>, Point2<f32>)>>(iter: I) -> Self {
        let (src, dst) = iter.into_iter().unzip();
        Self { src, dst }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(rows: &[[u8; 2]]) -> Descriptors {
        Descriptors::Binary {
            bytes: 2,
            data: rows.iter().flatten().copied().collect(),
        }
    }

    #[test]
    fn features_reject_length_mismatch() {
        let kps = vec![Keypoint::new(0.0, 0.0, 1.0)];
        let err = Features::new(kps, binary(&[[0, 0], [1, 1]])).unwrap_err();
        assert_eq!(
            err,
            FeaturesError::LengthMismatch {
                keypoints: 1,
                descriptors: 2
            }
        );
    }

    #[test]
    fn features_reject_ragged_descriptors() {
        let desc = Descriptors::Float {
            dim: 3,
            data: vec![0.0; 4],
        };
        assert!(matches!(
            Features::new(vec![], desc),
            Err(FeaturesError::RaggedDescriptors { len: 4, width: 3 })
        ));
    }

    #[test]
    fn retain_strongest_keeps_rows_aligned() {
        let kps = vec![
            Keypoint::new(0.0, 0.0, 1.0),
            Keypoint::new(1.0, 0.0, 5.0),
            Keypoint::new(2.0, 0.0, 3.0),
        ];
        let feats = Features::new(kps, binary(&[[0, 0], [1, 1], [2, 2]])).unwrap();
        let kept = feats.retain_strongest(2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.keypoints()[0].position.x, 1.0);
        assert_eq!(kept.keypoints()[1].position.x, 2.0);
        assert_eq!(kept.descriptors().binary_row(0), Some(&[1u8, 1][..]));
        assert_eq!(kept.descriptors().binary_row(1), Some(&[2u8, 2][..]));
    }

    #[test]
    fn point_pairs_stay_index_aligned() {
        let pairs: PointPairs = (0..3)
            .map(|i| {
                let p = Point2::new(i as f32, 0.0);
                (p, p + nalgebra::Vector2::new(1.0, 1.0))
            })
            .collect();
        assert_eq!(pairs.src().len(), pairs.dst().len());
        assert_eq!(pairs.dst()[2], Point2::new(3.0, 1.0));
    }
}
