//! Robust homography estimation by random sample consensus.
//!
//! Minimal samples of 4 correspondences are solved exactly, scored by the
//! forward reprojection error in the destination image, and the best consensus
//! set is optionally refit with the normalized DLT.
//!
//! Hypotheses that mirror, fold or collapse the bounding box of the source
//! points are discarded before scoring; they can gather a handful of chance
//! inliers on unrelated data but never describe a view of a planar scene.

use crate::homography::{estimate_homography_dlt, homography_from_4pt, Homography};
use log::debug;
use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Minimal sample size for a homography.
pub const MIN_SAMPLE: usize = 4;

/// Default consensus size: twice the minimal sample, so the sample alone
/// never suffices.
pub const DEFAULT_MIN_INLIERS: usize = 2 * MIN_SAMPLE;

const MAX_REFINE_ROUNDS: usize = 3;

// Accepted range for the area ratio of the projected source bounding box.
const MIN_AREA_RATIO: f64 = 1e-2;
const MAX_AREA_RATIO: f64 = 1e2;

/// Parameters for RANSAC homography fitting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Maximum reprojection error (pixels) for a pair to count as an inlier.
    pub threshold: f64,
    /// Upper bound on the number of sampled hypotheses.
    pub max_iterations: usize,
    /// Desired probability that at least one sample is outlier-free.
    pub confidence: f64,
    /// Minimal consensus size to accept a model (never below 4).
    pub min_inliers: usize,
    /// Refit on all inliers with the normalized DLT.
    pub refine: bool,
    /// Fixed seed for reproducible sampling; `None` draws from OS entropy.
    pub random_seed: Option<u64>,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            max_iterations: 2000,
            confidence: 0.995,
            min_inliers: DEFAULT_MIN_INLIERS,
            refine: true,
            random_seed: None,
        }
    }
}

/// Errors returned by the robust estimator.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EstimationError {
    #[error("need at least {required} point pairs, got {got}")]
    TooFewPoints { got: usize, required: usize },
    #[error("point lists differ in length (src={src}, dst={dst})")]
    LengthMismatch { src: usize, dst: usize },
    #[error("invalid RANSAC parameters: {0}")]
    InvalidParams(String),
    #[error("every sampled subset was degenerate or non-physical")]
    Degenerate,
    #[error("no consensus set reached {required} inliers (best had {inliers})")]
    NoConsensus { inliers: usize, required: usize },
    #[error("estimated homography is singular")]
    Singular,
}

/// Result of a successful robust fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HomographyEstimate {
    pub homography: Homography,
    /// One entry per input pair, true for inliers of `homography`.
    pub inlier_mask: Vec<bool>,
    pub inlier_count: usize,
    /// Number of hypotheses drawn.
    pub iterations: usize,
    /// RMS reprojection error over the inliers, in pixels.
    pub rms_error: f64,
}

impl HomographyEstimate {
    /// Indices of the inlier pairs.
    pub fn inliers(&self) -> Vec<usize> {
        self.inlier_mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect()
    }
}

impl RansacParams {
    pub fn validate(&self) -> Result<(), EstimationError> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(EstimationError::InvalidParams(format!(
                "threshold must be positive, got {}",
                self.threshold
            )));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(EstimationError::InvalidParams(format!(
                "confidence must be in (0, 1), got {}",
                self.confidence
            )));
        }
        if self.max_iterations == 0 {
            return Err(EstimationError::InvalidParams(
                "max_iterations must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn required_inliers(&self) -> usize {
        self.min_inliers.max(MIN_SAMPLE)
    }
}

/// Bounding box of the source points, corners in raster order around the box.
fn source_box(src: &[Point2<f32>]) -> [Point2<f64>; 4] {
    let (mut x0, mut y0) = (f64::INFINITY, f64::INFINITY);
    let (mut x1, mut y1) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in src {
        x0 = x0.min(p.x as f64);
        y0 = y0.min(p.y as f64);
        x1 = x1.max(p.x as f64);
        y1 = y1.max(p.y as f64);
    }
    [
        Point2::new(x0, y0),
        Point2::new(x1, y0),
        Point2::new(x1, y1),
        Point2::new(x0, y1),
    ]
}

fn turns(q: &[Point2<f64>; 4]) -> [f64; 4] {
    std::array::from_fn(|i| {
        let (a, b, c) = (q[i], q[(i + 1) % 4], q[(i + 2) % 4]);
        (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x)
    })
}

fn area(q: &[Point2<f64>; 4]) -> f64 {
    0.5 * (0..4)
        .map(|i| {
            let (a, b) = (q[i], q[(i + 1) % 4]);
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
}

/// The box stays in front of the camera, keeps its winding, stays convex and
/// keeps its area within two orders of magnitude.
fn is_plausible(h: &Homography, quad: &[Point2<f64>; 4]) -> bool {
    let src_area = area(quad);
    if !(src_area.abs() > f64::EPSILON) {
        return false;
    }
    let m = &h.h;
    let w: [f64; 4] = std::array::from_fn(|i| {
        m[(2, 0)] * quad[i].x + m[(2, 1)] * quad[i].y + m[(2, 2)]
    });
    if !(w.iter().all(|&v| v > 0.0) || w.iter().all(|&v| v < 0.0)) {
        return false;
    }
    let projected: [Point2<f64>; 4] = std::array::from_fn(|i| h.apply_f64(quad[i].x, quad[i].y));
    if projected.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return false;
    }
    let sign = src_area.signum();
    if turns(&projected).iter().any(|&t| t * sign <= 0.0) {
        return false;
    }
    let ratio = area(&projected) / src_area;
    (MIN_AREA_RATIO..=MAX_AREA_RATIO).contains(&ratio)
}

#[derive(Clone, Debug)]
struct Consensus {
    homography: Homography,
    mask: Vec<bool>,
    count: usize,
    sq_err_sum: f64,
}

impl Consensus {
    fn better_than(&self, other: &Consensus) -> bool {
        self.count > other.count || (self.count == other.count && self.sq_err_sum < other.sq_err_sum)
    }
}

fn score(h: Homography, src: &[Point2<f32>], dst: &[Point2<f32>], threshold: f64) -> Consensus {
    let thr_sq = threshold * threshold;
    let mut mask = Vec::with_capacity(src.len());
    let mut count = 0;
    let mut sq_err_sum = 0.0;
    for (s, d) in src.iter().zip(dst) {
        let p = h.apply_f64(s.x as f64, s.y as f64);
        let e = (p.x - d.x as f64).powi(2) + (p.y - d.y as f64).powi(2);
        let inlier = e.is_finite() && e <= thr_sq;
        if inlier {
            count += 1;
            sq_err_sum += e;
        }
        mask.push(inlier);
    }
    Consensus {
        homography: h,
        mask,
        count,
        sq_err_sum,
    }
}

// Number of draws needed so that an all-inlier sample is found with `confidence`.
fn adaptive_iterations(inlier_ratio: f64, confidence: f64, max_iterations: usize) -> usize {
    if inlier_ratio >= 1.0 {
        return 1;
    }
    let p_good = inlier_ratio.powi(MIN_SAMPLE as i32);
    if p_good <= f64::EPSILON {
        return max_iterations;
    }
    let num = (1.0 - confidence).ln();
    let den = (1.0 - p_good).ln();
    if !den.is_finite() || den >= 0.0 {
        return max_iterations;
    }
    let est = (num / den).ceil();
    if est.is_finite() && est > 0.0 {
        (est as usize).min(max_iterations)
    } else {
        max_iterations
    }
}

fn refine(
    best: Consensus,
    src: &[Point2<f32>],
    dst: &[Point2<f32>],
    threshold: f64,
    quad: &[Point2<f64>; 4],
) -> Consensus {
    let mut current = best;
    for _ in 0..MAX_REFINE_ROUNDS {
        let (s, d): (Vec<_>, Vec<_>) = current
            .mask
            .iter()
            .zip(src.iter().zip(dst))
            .filter_map(|(&m, (s, d))| m.then_some((*s, *d)))
            .unzip();
        let Some(h) = estimate_homography_dlt(&s, &d) else {
            break;
        };
        if !is_plausible(&h, quad) {
            break;
        }
        let candidate = score(h, src, dst, threshold);
        if candidate.count < current.count {
            break;
        }
        let grew = candidate.count > current.count;
        current = candidate;
        if !grew {
            break;
        }
    }
    current
}

/// Fit `dst ~ H * src` robustly.
///
/// Fewer than 4 pairs fail with [`EstimationError::TooFewPoints`] before any
/// sampling happens.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(src, dst, params), fields(pairs = src.len()))
)]
pub fn estimate_homography_ransac(
    src: &[Point2<f32>],
    dst: &[Point2<f32>],
    params: &RansacParams,
) -> Result<HomographyEstimate, EstimationError> {
    if src.len() != dst.len() {
        return Err(EstimationError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    let n = src.len();
    if n < MIN_SAMPLE {
        return Err(EstimationError::TooFewPoints {
            got: n,
            required: MIN_SAMPLE,
        });
    }
    params.validate()?;

    let mut rng: StdRng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let quad = source_box(src);
    let mut best: Option<Consensus> = None;
    let mut implausible = 0usize;
    let mut required_iters = if n == MIN_SAMPLE {
        1
    } else {
        params.max_iterations
    };
    let mut iterations = 0;

    while iterations < required_iters {
        iterations += 1;

        let mut s4 = [Point2::origin(); MIN_SAMPLE];
        let mut d4 = [Point2::origin(); MIN_SAMPLE];
        let sample = index::sample(&mut rng, n, MIN_SAMPLE);
        for (k, idx) in sample.iter().enumerate() {
            s4[k] = src[idx];
            d4[k] = dst[idx];
        }

        let Some(h) = homography_from_4pt(&s4, &d4) else {
            continue;
        };
        if !is_plausible(&h, &quad) {
            implausible += 1;
            continue;
        }

        let candidate = score(h, src, dst, params.threshold);
        let improved = best
            .as_ref()
            .is_none_or(|current| candidate.better_than(current));
        if improved {
            let ratio = candidate.count as f64 / n as f64;
            required_iters = required_iters.min(adaptive_iterations(
                ratio,
                params.confidence,
                params.max_iterations,
            ));
            best = Some(candidate);
        }
    }

    let Some(mut best) = best else {
        debug!("ransac: {iterations} samples, {implausible} non-physical, none usable");
        return Err(EstimationError::Degenerate);
    };

    let required = params.required_inliers();
    if best.count < required {
        debug!(
            "ransac: best consensus {} < required {required} after {iterations} samples",
            best.count
        );
        return Err(EstimationError::NoConsensus {
            inliers: best.count,
            required,
        });
    }

    if params.refine {
        best = refine(best, src, dst, params.threshold, &quad);
    }

    if !best.homography.is_invertible() {
        return Err(EstimationError::Singular);
    }

    let rms_error = (best.sq_err_sum / best.count.max(1) as f64).sqrt();
    debug!(
        "ransac: {}/{} inliers after {} samples (rms {:.3} px)",
        best.count, n, iterations, rms_error
    );

    Ok(HomographyEstimate {
        homography: best.homography,
        inlier_count: best.count,
        inlier_mask: best.mask,
        iterations,
        rms_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Matrix3;

    fn seeded(threshold: f64) -> RansacParams {
        RansacParams {
            threshold,
            random_seed: Some(7),
            ..RansacParams::default()
        }
    }

    fn grid(n: usize, step: f32) -> Vec<Point2<f32>> {
        (0..n * n)
            .map(|i| Point2::new((i % n) as f32 * step + 3.0, (i / n) as f32 * step + 7.0))
            .collect()
    }

    #[test]
    fn identical_points_give_identity_and_all_inliers() {
        let pts = grid(6, 17.0);
        let est = estimate_homography_ransac(&pts, &pts, &seeded(1.0)).expect("estimate");
        let id = Matrix3::<f64>::identity();
        for r in 0..3 {
            for c in 0..3 {
                assert_abs_diff_eq!(est.homography.h[(r, c)], id[(r, c)], epsilon = 1e-6);
            }
        }
        assert_eq!(est.inlier_count, pts.len());
        assert!(est.inlier_mask.iter().all(|&m| m));
    }

    #[test]
    fn fewer_than_four_pairs_fail_without_sampling() {
        let pts = grid(1, 1.0);
        let three = [pts[0], pts[0], pts[0]];
        for params in [seeded(3.0), RansacParams::default()] {
            assert_eq!(
                estimate_homography_ransac(&three, &three, &params),
                Err(EstimationError::TooFewPoints {
                    got: 3,
                    required: 4
                })
            );
        }
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let pts = grid(3, 10.0);
        assert!(matches!(
            estimate_homography_ransac(&pts, &pts[..5], &seeded(3.0)),
            Err(EstimationError::LengthMismatch { src: 9, dst: 5 })
        ));
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let line: Vec<Point2<f32>> = (0..10).map(|i| Point2::new(i as f32, 2.0 * i as f32)).collect();
        assert_eq!(
            estimate_homography_ransac(&line, &line, &seeded(3.0)),
            Err(EstimationError::Degenerate)
        );
    }

    #[test]
    fn recovers_perspective_with_outliers() {
        let truth = Homography::new(Matrix3::new(
            0.95, 0.04, 12.0, //
            -0.03, 1.05, -6.0, //
            0.0002, 0.0001, 1.0,
        ));
        let src = grid(8, 20.0);
        let mut dst: Vec<Point2<f32>> = src.iter().map(|&p| truth.apply(p)).collect();
        // corrupt every fourth pair
        for (i, d) in dst.iter_mut().enumerate() {
            if i % 4 == 0 {
                *d = Point2::new(d.y * 0.7 + 40.0, d.x * 0.3 - 15.0);
            }
        }

        let est = estimate_homography_ransac(&src, &dst, &seeded(2.0)).expect("estimate");
        assert_eq!(est.inlier_count, 48);
        for (i, &m) in est.inlier_mask.iter().enumerate() {
            assert_eq!(m, i % 4 != 0, "pair {i}");
        }
        for p in [Point2::new(0.0_f32, 0.0), Point2::new(100.0, 80.0)] {
            let a = est.homography.apply(p);
            let b = truth.apply(p);
            assert_abs_diff_eq!(a.x, b.x, epsilon = 1e-2);
            assert_abs_diff_eq!(a.y, b.y, epsilon = 1e-2);
        }
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let src = grid(5, 13.0);
        let dst: Vec<Point2<f32>> = src
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let jitter = if i % 3 == 0 { 25.0 } else { 0.0 };
                Point2::new(p.x + 4.0 + jitter, p.y - 2.0)
            })
            .collect();
        let a = estimate_homography_ransac(&src, &dst, &seeded(1.0)).expect("a");
        let b = estimate_homography_ransac(&src, &dst, &seeded(1.0)).expect("b");
        assert_eq!(a, b);
    }

    fn scatter(n: usize, seed: u64) -> Vec<Point2<f32>> {
        use rand::Rng;
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| Point2::new(rng.random_range(0.0..200.0), rng.random_range(0.0..150.0)))
            .collect()
    }

    #[test]
    fn default_params_reject_unrelated_scatter() {
        let params = RansacParams {
            threshold: 5.0,
            random_seed: Some(1),
            ..RansacParams::default()
        };
        for seed in 0..8 {
            let src = scatter(30, 2 * seed);
            let dst = scatter(30, 2 * seed + 1);
            let res = estimate_homography_ransac(&src, &dst, &params);
            assert!(
                matches!(
                    res,
                    Err(EstimationError::NoConsensus { .. } | EstimationError::Degenerate)
                ),
                "seed {seed}: {res:?}"
            );
        }
    }

    #[test]
    fn four_pairs_never_reach_default_consensus() {
        let src = grid(2, 50.0);
        let dst: Vec<Point2<f32>> = src.iter().map(|p| Point2::new(p.x + 3.0, p.y)).collect();
        assert_eq!(
            estimate_homography_ransac(&src, &dst, &seeded(1.0)),
            Err(EstimationError::NoConsensus {
                inliers: 4,
                required: DEFAULT_MIN_INLIERS
            })
        );
    }

    #[test]
    fn mirrored_correspondences_are_not_a_model() {
        let src = grid(6, 17.0);
        let dst: Vec<Point2<f32>> = src.iter().map(|p| Point2::new(200.0 - p.x, p.y)).collect();
        assert_eq!(
            estimate_homography_ransac(&src, &dst, &seeded(1.0)),
            Err(EstimationError::Degenerate)
        );
    }

    #[test]
    fn plausibility_of_box_mappings() {
        let quad = source_box(&grid(4, 10.0));
        assert!(is_plausible(&Homography::translation(40.0, -7.0), &quad));
        let mild = Homography::new(Matrix3::new(
            1.1, 0.05, 3.0, //
            -0.02, 0.9, 1.0, //
            0.0005, 0.0002, 1.0,
        ));
        assert!(is_plausible(&mild, &quad));
        let mirror = Homography::new(Matrix3::new(-1.0, 0.0, 100.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0));
        assert!(!is_plausible(&mirror, &quad));
        let collapse = Homography::new(Matrix3::new(0.01, 0.0, 0.0, 0.0, 0.01, 0.0, 0.0, 0.0, 1.0));
        assert!(!is_plausible(&collapse, &quad));
        // the horizon line x = 15 runs through the box
        let horizon = Homography::new(Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, -1.0 / 15.0, 0.0, 1.0));
        assert!(!is_plausible(&horizon, &quad));
    }

    #[test]
    fn unrelated_points_do_not_reach_consensus() {
        let src = grid(5, 10.0);
        // pseudo-random scatter with no common transform
        let dst: Vec<Point2<f32>> = (0..src.len())
            .map(|i| {
                let t = i as f32;
                Point2::new((t * 37.0) % 101.0, (t * t * 13.0) % 89.0)
            })
            .collect();
        let params = RansacParams {
            min_inliers: 12,
            ..seeded(1.0)
        };
        assert!(matches!(
            estimate_homography_ransac(&src, &dst, &params),
            Err(EstimationError::NoConsensus { required: 12, .. } | EstimationError::Degenerate)
        ));
    }

    #[test]
    fn adaptive_iterations_shrink_with_inlier_ratio() {
        assert_eq!(adaptive_iterations(1.0, 0.995, 2000), 1);
        let high = adaptive_iterations(0.9, 0.995, 2000);
        let low = adaptive_iterations(0.3, 0.995, 2000);
        assert!(high < low);
        assert!(low <= 2000);
    }

    #[test]
    fn invalid_threshold_is_rejected() {
        let pts = grid(3, 10.0);
        let params = RansacParams {
            threshold: -1.0,
            ..RansacParams::default()
        };
        assert!(matches!(
            estimate_homography_ransac(&pts, &pts, &params),
            Err(EstimationError::InvalidParams(_))
        ));
    }
}
