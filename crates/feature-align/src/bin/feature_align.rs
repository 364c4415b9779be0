use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use feature_align::core::{
    composite_quad_gray, composite_quad_rgb, image_quad, warp_perspective_gray,
    warp_perspective_rgb, AnyImage, ImageError, Quad, QuadError, QuadTarget, QuadWarp, RgbImage,
    WarpError, WarpParams,
};
use feature_align::detect::{FastBriefDetector, FastBriefParams};
use feature_align::imageio::{load_gray, load_image, save_image, to_image_rgb, ImageIoError};
use feature_align::pipeline::{
    align_channels, AlignError, AlignParams, AlignReport, Aligner, IoError, MatchFilter,
    MatcherParams,
};
use imageproc::drawing::draw_line_segment_mut;
use log::{info, warn};
use nalgebra::Point2;

#[derive(thiserror::Error, Debug)]
enum AppError {
    #[error(transparent)]
    Image(#[from] ImageIoError),
    #[error(transparent)]
    Buffer(#[from] ImageError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Align(#[from] AlignError),
    #[error(transparent)]
    Quad(#[from] QuadError),
    #[error(transparent)]
    Warp(#[from] WarpError),
    #[error("logger: {0}")]
    Logger(String),
}

#[derive(Parser, Debug)]
#[command(name = "feature-align", version, about = "Feature-based image alignment")]
struct Cli {
    /// Repeat for more log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Warp SRC into the frame of DST.
    Register {
        src: PathBuf,
        dst: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Find OBJECT inside SCENE and report where its corners land.
    Locate {
        object: PathBuf,
        scene: PathBuf,
        /// Draw the object outline onto a copy of the scene.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Rebuild a color image from three stacked plates (blue, green, red from top).
    Channels {
        plates: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Warp a quadrilateral of SRC upright, or onto a quadrilateral of --dst.
    Quad {
        src: PathBuf,
        /// Corners as x1,y1,x2,y2,x3,y3,x4,y4 in any order.
        #[arg(long, value_parser = parse_quad, allow_hyphen_values = true)]
        src_quad: Quad,
        /// Canvas image; without it the quad is rectified.
        #[arg(long)]
        dst: Option<PathBuf>,
        /// Target corners in --dst; defaults to the whole image.
        #[arg(long, value_parser = parse_quad, requires = "dst", allow_hyphen_values = true)]
        dst_quad: Option<Quad>,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Preset {
    Channels,
    Object,
    Registration,
}

impl Preset {
    fn params(self) -> AlignParams {
        match self {
            Preset::Channels => AlignParams::channel_alignment(),
            Preset::Object => AlignParams::object_finding(),
            Preset::Registration => AlignParams::registration(),
        }
    }
}

/// Parameter sources, applied in order: preset or config file, then flags.
#[derive(Args, Debug)]
struct Tuning {
    #[arg(long, value_enum, conflicts_with = "config")]
    preset: Option<Preset>,
    /// JSON file with `AlignParams`; missing fields take defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write a JSON report here.
    #[arg(long)]
    report: Option<PathBuf>,
    #[arg(long)]
    max_features: Option<usize>,
    #[arg(long)]
    min_matches: Option<usize>,
    #[arg(long, conflicts_with = "percentile")]
    ratio: Option<f32>,
    #[arg(long)]
    percentile: Option<f32>,
    #[arg(long, requires = "checks", conflicts_with = "brute_force")]
    trees: Option<usize>,
    #[arg(long, requires = "trees")]
    checks: Option<usize>,
    #[arg(long)]
    brute_force: bool,
    /// RANSAC reprojection threshold in pixels.
    #[arg(long)]
    threshold: Option<f64>,
    /// Seed RANSAC sampling for reproducible output.
    #[arg(long)]
    seed: Option<u64>,
    /// FAST intensity threshold of the built-in detector.
    #[arg(long, default_value_t = FastBriefParams::default().fast_threshold)]
    fast_threshold: u8,
}

impl Tuning {
    fn params(&self, fallback: Preset) -> Result<AlignParams, AppError> {
        let mut params = match &self.config {
            Some(path) => AlignParams::load_json(path)?,
            None => self.preset.unwrap_or(fallback).params(),
        };
        if let Some(n) = self.max_features {
            params.max_features = n;
        }
        if let Some(n) = self.min_matches {
            params.min_match_count = n;
        }
        if let Some(ratio) = self.ratio {
            params.filter = MatchFilter::Ratio { ratio };
        }
        if let Some(keep) = self.percentile {
            params.filter = MatchFilter::Percentile { keep };
        }
        if let (Some(trees), Some(checks)) = (self.trees, self.checks) {
            params.matcher = MatcherParams::kd_forest(trees, checks);
        }
        if self.brute_force {
            params.matcher = MatcherParams::default();
        }
        if let Some(t) = self.threshold {
            params.ransac.threshold = t;
        }
        if self.seed.is_some() {
            params.ransac.random_seed = self.seed;
        }
        Ok(params)
    }

    fn aligner(&self, fallback: Preset) -> Result<Aligner<FastBriefDetector>, AppError> {
        let params = self.params(fallback)?;
        let detector = FastBriefDetector::new(FastBriefParams {
            fast_threshold: self.fast_threshold,
            ..FastBriefParams::default()
        });
        Ok(Aligner::new(detector, params)?)
    }
}

fn parse_quad(raw: &str) -> Result<Quad, String> {
    let values = raw
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("{raw:?}: {e}"))?;
    if values.len() != 8 {
        return Err(format!("{raw:?}: expected 8 numbers, got {}", values.len()));
    }
    Ok([0, 2, 4, 6].map(|i| Point2::new(values[i], values[i + 1])))
}

fn path_string(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn finish_report(
    report: &mut AlignReport,
    path: Option<&Path>,
    outcome: &Result<(), AppError>,
) -> Result<(), AppError> {
    match outcome {
        Err(AppError::Align(e)) => report.set_error(e),
        Err(other) => report.error = Some(other.to_string()),
        Ok(()) => {}
    }
    if let Some(path) = path {
        report.write_json(path)?;
        info!("report written to {}", path.display());
    }
    Ok(())
}

fn log_homography(label: &str, h: &feature_align::Homography) {
    info!("{label} homography:{}", h.h);
    for row in h.to_array() {
        println!("{:>14.6} {:>14.6} {:>14.6}", row[0], row[1], row[2]);
    }
}

fn register(src: &Path, dst: &Path, output: &Path, tuning: &Tuning) -> Result<(), AppError> {
    let aligner = tuning.aligner(Preset::Registration)?;
    let inputs = vec![path_string(src), path_string(dst)];
    let mut report = AlignReport::new("register", inputs, aligner.params());

    let outcome = (|| -> Result<(), AppError> {
        let src_img = load_image(src)?;
        let dst_img = load_image(dst)?;
        let reg = aligner.align(src_img.as_image_ref(), dst_img.as_image_ref())?;
        log_homography("src_to_dst", reg.homography());
        println!(
            "inliers {}/{}",
            reg.inlier_count(),
            reg.alignment.matches.len()
        );
        save_image(&reg.warped, output)?;
        report.push_alignment("src_to_dst", &reg.alignment);
        report.output_path = Some(path_string(output));
        Ok(())
    })();
    finish_report(&mut report, tuning.report.as_deref(), &outcome)?;
    outcome
}

fn to_rgb(img: AnyImage) -> Result<RgbImage, ImageError> {
    match img {
        AnyImage::Gray(g) => RgbImage::from_planes(&g, &g, &g),
        AnyImage::Rgb(c) => Ok(c),
    }
}

fn locate(
    object: &Path,
    scene: &Path,
    output: Option<&Path>,
    tuning: &Tuning,
) -> Result<(), AppError> {
    let aligner = tuning.aligner(Preset::Object)?;
    let inputs = vec![path_string(object), path_string(scene)];
    let mut report = AlignReport::new("locate", inputs, aligner.params());

    let outcome = (|| -> Result<(), AppError> {
        let object_img = load_image(object)?;
        let scene_img = load_image(scene)?;
        let alignment = aligner.estimate(object_img.as_image_ref(), scene_img.as_image_ref())?;
        log_homography("object_to_scene", alignment.homography());
        let outline = alignment.object_outline();
        for p in &outline {
            println!("corner {:.2} {:.2}", p.x, p.y);
        }
        if let Some(path) = output {
            let mut canvas = to_image_rgb(&to_rgb(scene_img)?.view())?;
            for i in 0..4 {
                let (a, b) = (outline[i], outline[(i + 1) % 4]);
                let green = ::image::Rgb([0, 255, 0]);
                draw_line_segment_mut(&mut canvas, (a.x, a.y), (b.x, b.y), green);
            }
            canvas.save(path).map_err(|source| ImageIoError::Write {
                path: path.to_path_buf(),
                source,
            })?;
            report.output_path = Some(path_string(path));
        }
        report.push_alignment("object_to_scene", &alignment);
        Ok(())
    })();
    finish_report(&mut report, tuning.report.as_deref(), &outcome)?;
    outcome
}

fn channels(plates: &Path, output: &Path, tuning: &Tuning) -> Result<(), AppError> {
    let aligner = tuning.aligner(Preset::Channels)?;
    let mut report = AlignReport::new("channels", vec![path_string(plates)], aligner.params());

    let outcome = (|| -> Result<(), AppError> {
        let stacked = load_gray(plates)?;
        let out = align_channels(&aligner, &stacked.view())?;
        log_homography("blue_to_green", out.blue_to_green.homography());
        log_homography("red_to_green", out.red_to_green.homography());
        save_image(&AnyImage::Rgb(out.color), output)?;
        report.push_alignment("blue_to_green", &out.blue_to_green.alignment);
        report.push_alignment("red_to_green", &out.red_to_green.alignment);
        report.output_path = Some(path_string(output));
        Ok(())
    })();
    finish_report(&mut report, tuning.report.as_deref(), &outcome)?;
    outcome
}

fn quad(
    src: &Path,
    src_quad: &Quad,
    dst: Option<&Path>,
    dst_quad: Option<&Quad>,
    output: &Path,
    report: Option<&Path>,
) -> Result<(), AppError> {
    let src_img = load_image(src)?;
    let canvas = dst.map(|p| load_image(p)).transpose()?;
    let target = match &canvas {
        Some(c) => QuadTarget::Onto {
            quad: dst_quad
                .copied()
                .unwrap_or_else(|| image_quad(c.width(), c.height())),
            width: c.width(),
            height: c.height(),
        },
        None => QuadTarget::Rectify,
    };
    let solved = QuadWarp::solve(src_quad, &target)?;
    info!(
        "quad warp into {}x{} canvas{}",
        solved.width, solved.height, solved.homography.h
    );
    let params = WarpParams::default();
    let (h, w, ht) = (&solved.homography, solved.width, solved.height);

    let result = match (src_img, canvas) {
        (AnyImage::Gray(s), None) => {
            AnyImage::Gray(warp_perspective_gray(&s.view(), h, w, ht, &params)?)
        }
        (AnyImage::Rgb(s), None) => {
            AnyImage::Rgb(warp_perspective_rgb(&s.view(), h, w, ht, &params)?)
        }
        (AnyImage::Gray(s), Some(AnyImage::Gray(mut c))) => {
            let warped = warp_perspective_gray(&s.view(), h, w, ht, &params)?;
            composite_quad_gray(&mut c, &warped, &solved.dst_quad)?;
            AnyImage::Gray(c)
        }
        (s, Some(c)) => {
            let s = to_rgb(s)?;
            let mut c = to_rgb(c)?;
            let warped = warp_perspective_rgb(&s.view(), h, w, ht, &params)?;
            composite_quad_rgb(&mut c, &warped, &solved.dst_quad)?;
            AnyImage::Rgb(c)
        }
    };
    save_image(&result, output)?;
    if let Some(path) = report {
        let json = serde_json::to_string_pretty(&solved).map_err(IoError::from)?;
        std::fs::write(path, json).map_err(IoError::from)?;
    }
    Ok(())
}

#[cfg(feature = "tracing")]
fn init_logging(_verbose: u8) -> Result<(), AppError> {
    let _ = tracing_log::LogTracer::init();
    feature_align::core::init_tracing(false);
    Ok(())
}

#[cfg(not(feature = "tracing"))]
fn init_logging(verbose: u8) -> Result<(), AppError> {
    let level = feature_align::core::level_from_verbosity(verbose);
    feature_align::core::init_with_level(level).map_err(|e| AppError::Logger(e.to_string()))
}

fn run(cli: Cli) -> Result<(), AppError> {
    init_logging(cli.verbose)?;
    match &cli.command {
        Command::Register {
            src,
            dst,
            output,
            tuning,
        } => register(src, dst, output, tuning),
        Command::Locate {
            object,
            scene,
            output,
            tuning,
        } => locate(object, scene, output.as_deref(), tuning),
        Command::Channels {
            plates,
            output,
            tuning,
        } => channels(plates, output, tuning),
        Command::Quad {
            src,
            src_quad,
            dst,
            dst_quad,
            output,
            report,
        } => quad(
            src,
            src_quad,
            dst.as_deref(),
            dst_quad.as_ref(),
            output,
            report.as_deref(),
        ),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(AppError::Align(e)) if e.is_recoverable() => {
            warn!("alignment failed: {e}");
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
