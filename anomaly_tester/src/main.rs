#[cfg(feature = "video")]
mod video;

use anyhow::{Context, Result};
use cell_vision::core_modules::frame_io::{FrameSink, FrameSource, ImageSequenceSink, ImageSequenceSource};
use cell_vision::core_modules::mixture::load_analysis_input;
use cell_vision::core_modules::region_geometry::DEFAULT_STD_THRESHOLD;
use cell_vision::parallel_pipeline::ParallelPipeline;
use cell_vision::pipeline::{AnomalyPipeline, PipelineConfig, ReportingSink, RunSummary};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const OUTPUT_STEM: &str = "bounding_box_example";
const REPORT_NAME: &str = "regions.json";

/// Indicates spatial regions demonstrating relatively high variance with bounding boxes.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// GMM intermediates archive (.npz) holding `means` and `covars`.
    #[arg(short = 'i', long)]
    intermediates: PathBuf,

    /// Eigen decomposition archive (.npz) holding `eigen_vecs`.
    #[arg(short = 'e', long)]
    eigendata: PathBuf,

    /// Individual cell video, or a directory of numbered frames.
    #[arg(short = 'v', long)]
    video: PathBuf,

    /// Output directory. Defaults to the current directory.
    #[arg(short = 'o', long)]
    outdir: Option<PathBuf>,

    /// Number of bounding boxes to draw.
    #[arg(short = 'k', long = "box-number", alias = "box_number", default_value_t = 1, allow_negative_numbers = true)]
    box_number: i64,

    /// Standard deviations covered on each side of a component mean.
    #[arg(long, default_value_t = DEFAULT_STD_THRESHOLD)]
    std_threshold: f64,

    /// Seed for the box colors. Random when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Frame rate of the encoded output video.
    #[arg(long, default_value_t = 1.0)]
    fps: f64,

    /// Annotation workers. Defaults to the number of CPUs.
    #[arg(long)]
    workers: Option<usize>,

    /// Also write the selected regions and their per-frame boxes as JSON.
    #[arg(long)]
    report: bool,

    /// Annotate on the calling thread instead of the worker pool.
    #[arg(long)]
    sequential: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    // --- 1. Load the mixture and eigen series ---
    let input = load_analysis_input(&args.intermediates, &args.eigendata).with_context(|| {
        format!(
            "failed to load {} and {}",
            args.intermediates.display(),
            args.eigendata.display()
        )
    })?;

    // --- 2. Open the video ---
    let mut source = open_source(&args.video)?;
    let metadata = source.metadata();
    info!(
        width = metadata.frame_size.width,
        height = metadata.frame_size.height,
        "video opened"
    );

    // --- 3. Rank and select regions ---
    let pipeline = AnomalyPipeline::new(pipeline_config(&args), input, metadata.frame_size);
    pipeline
        .check_video(&metadata)
        .with_context(|| format!("{} does not match the mixture series", args.video.display()))?;

    // --- 4. Stage the outputs ---
    let outdir = output_dir(&args)?;
    let mut sink = create_sink(&args.video, &outdir, &pipeline)?;
    if args.report {
        let report_path = outdir.join(REPORT_NAME);
        let staged = pipeline
            .region_report()
            .stage_json(&report_path)
            .with_context(|| format!("failed to prepare {}", report_path.display()))?;
        sink = Box::new(ReportingSink::new(sink, staged));
    }

    // --- 5. Annotate and publish ---
    let progress = progress_bar(pipeline.frame_count());
    let summary: RunSummary = if args.sequential {
        pipeline.run_with_progress(source.as_mut(), sink.as_mut(), |_| progress.inc(1))
    } else {
        ParallelPipeline::new(pipeline)
            .run_with_progress(source.as_mut(), sink.as_mut(), |_| progress.inc(1))
            .await
    }
    .context("annotation failed")?;
    progress.finish_and_clear();
    info!(frames = summary.frames, output = %summary.output.display(), "annotated video written");

    Ok(())
}

fn pipeline_config(args: &Args) -> PipelineConfig {
    let region_count = if args.box_number < 0 {
        warn!(box_number = args.box_number, "negative box number, drawing no boxes");
        0
    } else {
        args.box_number as usize
    };
    let mut config = PipelineConfig {
        region_count,
        std_threshold: args.std_threshold,
        color_seed: args.seed,
        output_fps: args.fps,
        ..PipelineConfig::default()
    };
    if let Some(workers) = args.workers {
        config.worker_count = workers.max(1);
        config.max_in_flight = 2 * config.worker_count;
    }
    config
}

fn output_dir(args: &Args) -> Result<PathBuf> {
    match &args.outdir {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir().context("failed to resolve the current directory"),
    }
}

fn open_source(video: &Path) -> Result<Box<dyn FrameSource>> {
    if video.is_dir() {
        let source = ImageSequenceSource::open(video)
            .with_context(|| format!("failed to read frames from {}", video.display()))?;
        return Ok(Box::new(source));
    }
    open_video(video)
}

fn create_sink(video: &Path, outdir: &Path, pipeline: &AnomalyPipeline) -> Result<Box<dyn FrameSink>> {
    if video.is_dir() {
        let sink = ImageSequenceSink::create(outdir, OUTPUT_STEM)
            .with_context(|| format!("failed to prepare output in {}", outdir.display()))?;
        return Ok(Box::new(sink));
    }
    create_video_sink(outdir, pipeline)
}

#[cfg(feature = "video")]
fn open_video(video: &Path) -> Result<Box<dyn FrameSource>> {
    let source =
        video::OpenCvVideoSource::open(video).with_context(|| format!("failed to open video {}", video.display()))?;
    Ok(Box::new(source))
}

#[cfg(feature = "video")]
fn create_video_sink(outdir: &Path, pipeline: &AnomalyPipeline) -> Result<Box<dyn FrameSink>> {
    let sink = video::OpenCvVideoSink::create(
        outdir,
        OUTPUT_STEM,
        pipeline.config().output_fps,
        pipeline.frame_size(),
    )
    .with_context(|| format!("failed to prepare output video in {}", outdir.display()))?;
    Ok(Box::new(sink))
}

#[cfg(not(feature = "video"))]
fn open_video(video: &Path) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!(
        "{} is not a frame directory; build with the `video` feature to read video files",
        video.display()
    )
}

#[cfg(not(feature = "video"))]
fn create_video_sink(_outdir: &Path, _pipeline: &AnomalyPipeline) -> Result<Box<dyn FrameSink>> {
    anyhow::bail!("video output requires the `video` feature")
}

fn progress_bar(frames: usize) -> ProgressBar {
    let progress = ProgressBar::new(frames as u64);
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} frames") {
        progress.set_style(style);
    }
    progress
}
