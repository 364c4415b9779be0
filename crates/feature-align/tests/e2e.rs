mod common;

use approx::assert_abs_diff_eq;
use common::{noise, rectangles, stacked};
use feature_align::core::AnyImage;
use feature_align::detect::FastBriefDetector;
use feature_align::pipeline::MatchFilter;
use feature_align::{align_channels, AlignError, AlignParams, Aligner, Alignment};

const W: usize = 240;
const H: usize = 180;

fn assert_shift(alignment: &Alignment, dx: f64, dy: f64) {
    let h = alignment.homography().h;
    assert_abs_diff_eq!(h[(0, 2)], dx, epsilon = 1.0);
    assert_abs_diff_eq!(h[(1, 2)], dy, epsilon = 1.0);
    assert_abs_diff_eq!(h[(0, 0)], 1.0, epsilon = 0.01);
    assert_abs_diff_eq!(h[(1, 1)], 1.0, epsilon = 0.01);
    assert_abs_diff_eq!(h[(0, 1)], 0.0, epsilon = 0.01);
    assert_abs_diff_eq!(h[(1, 0)], 0.0, epsilon = 0.01);
    // every projected source corner within a pixel of the true shift
    let (w, hh) = (W as f32, H as f32);
    let expected = [(0.0, 0.0), (w, 0.0), (w, hh), (0.0, hh)];
    for (p, (x, y)) in alignment.object_outline().iter().zip(expected) {
        assert_abs_diff_eq!(p.x, x + dx as f32, epsilon = 1.0);
        assert_abs_diff_eq!(p.y, y + dy as f32, epsilon = 1.0);
    }
}

#[test]
fn translated_scene_is_recovered_by_every_preset() {
    let src = rectangles(W, H, 0, 0, 7);
    let dst = rectangles(W, H, 10, 5, 7);
    for params in [
        AlignParams::channel_alignment(),
        AlignParams::object_finding(),
        AlignParams::registration(),
    ] {
        let aligner = Aligner::new(FastBriefDetector::default(), params.clone()).unwrap();
        let reg = aligner
            .align(src.view().into(), dst.view().into())
            .unwrap_or_else(|e| panic!("{params:?}: {e}"));
        assert_shift(&reg.alignment, 10.0, 5.0);
        assert!(reg.inlier_count() >= 4);
        assert_eq!((reg.warped.width(), reg.warped.height()), (W, H));
    }
}

#[test]
fn warped_source_overlays_destination() {
    let src = rectangles(W, H, 0, 0, 11);
    let dst = rectangles(W, H, 10, 5, 11);
    let aligner = Aligner::new(FastBriefDetector::default(), AlignParams::registration()).unwrap();
    let reg = aligner.align(src.view().into(), dst.view().into()).unwrap();
    let AnyImage::Gray(warped) = &reg.warped else {
        panic!("gray in, gray out");
    };
    let mut off = 0usize;
    let mut total = 0usize;
    for y in 10..H - 5 {
        for x in 15..W - 5 {
            total += 1;
            if (warped.get(x, y) as i32 - dst.get(x, y) as i32).abs() > 16 {
                off += 1;
            }
        }
    }
    assert!(off * 100 < 3 * total, "{off} of {total} pixels differ");
}

#[test]
fn unrelated_noise_fails_recoverably() {
    let a = noise(W, H, 1);
    let b = noise(W, H, 2);
    let params = AlignParams {
        filter: MatchFilter::Ratio { ratio: 0.7 },
        ..AlignParams::object_finding()
    };
    let aligner = Aligner::new(FastBriefDetector::default(), params).unwrap();
    let err = aligner.align(a.view().into(), b.view().into()).unwrap_err();
    assert!(
        matches!(
            err,
            AlignError::InsufficientMatches { .. } | AlignError::EstimationFailure(_)
        ),
        "unexpected {err}"
    );
    assert!(err.is_recoverable());
}

#[test]
fn stacked_plates_are_merged_in_the_green_frame() {
    let green = rectangles(W, H, 0, 0, 3);
    let blue = rectangles(W, H, 4, -3, 3);
    let red = rectangles(W, H, -6, 2, 3);
    let plates = stacked([&blue, &green, &red]);

    let aligner =
        Aligner::new(FastBriefDetector::default(), AlignParams::channel_alignment()).unwrap();
    let out = align_channels(&aligner, &plates.view()).unwrap();

    let hb = out.blue_to_green.homography().h;
    assert_abs_diff_eq!(hb[(0, 2)], -4.0, epsilon = 1.0);
    assert_abs_diff_eq!(hb[(1, 2)], 3.0, epsilon = 1.0);
    let hr = out.red_to_green.homography().h;
    assert_abs_diff_eq!(hr[(0, 2)], 6.0, epsilon = 1.0);
    assert_abs_diff_eq!(hr[(1, 2)], -2.0, epsilon = 1.0);
    assert_eq!((out.color.width, out.color.height), (W, H));
}
