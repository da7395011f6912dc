// THEORY:
// The `pipeline` module is the top-level API for the anomaly engine. It takes a
// validated `AnalysisInput` and the size of the video it describes, and runs the
// one-off analysis immediately: Motion Ranking orders the components, the Greedy
// Region Selector picks the regions to show, and a palette fixes their colors.
// From then on the pipeline is immutable and only renders frames.
//
// Frames are streamed through `run` strictly in order. Every boundary rule that
// can be checked before output starts (video length, frame size) is checked
// first; anything discovered later aborts the run before the sink publishes.

use crate::core_modules::annotator::{Annotator, RegionPalette};
use crate::core_modules::frame_io::{FrameSink, FrameSource, VideoMetadata};
use crate::core_modules::mixture::AnalysisInput;
use crate::core_modules::motion_ranking::rank_components;
use crate::core_modules::region_geometry::DEFAULT_STD_THRESHOLD;
use crate::core_modules::region_selector::select_regions;
use crate::error::{AnalysisError, Result};
use image::RgbImage;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::mixture::ComponentId;
pub use crate::core_modules::motion_ranking::ComponentRank;
pub use crate::core_modules::region_geometry::{BoundingBox, FrameSize};

/// Configuration for the AnomalyPipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How many non-overlapping regions to box (K).
    pub region_count: usize,
    /// Standard deviations a box extends from its component's mean.
    pub std_threshold: f64,
    /// Seed for region colors. `None` draws a fresh seed per run.
    pub color_seed: Option<u64>,
    /// Frame rate the annotated video is encoded at.
    pub output_fps: f64,
    /// Annotation workers used by the parallel pipeline.
    pub worker_count: usize,
    /// Frames the parallel pipeline may hold between decode and write.
    pub max_in_flight: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let worker_count = num_cpus::get().max(1);
        Self {
            region_count: 1,
            std_threshold: DEFAULT_STD_THRESHOLD,
            color_seed: None,
            output_fps: 1.0,
            worker_count,
            max_in_flight: worker_count * 2,
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames: usize,
    pub output: PathBuf,
}

/// One selected region's color and its box on every frame.
#[derive(Debug, Clone, Serialize)]
pub struct RegionTrack {
    pub component: ComponentId,
    pub color: [u8; 3],
    pub boxes: Vec<BoundingBox>,
}

/// Machine-readable record of a run's ranking and selection.
#[derive(Debug, Clone, Serialize)]
pub struct RegionReport {
    pub frame_size: FrameSize,
    pub std_threshold: f64,
    pub ranking: Vec<ComponentRank>,
    pub regions: Vec<RegionTrack>,
}

impl RegionReport {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        self.stage_json(path)?.publish().map(|_| ())
    }

    /// Serializes the report next to `destination` without making it visible
    /// there. Dropping the result discards it.
    pub fn stage_json(&self, destination: &Path) -> Result<StagedReport> {
        let dir = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut file = tempfile::Builder::new()
            .prefix(".regions-")
            .suffix(".json")
            .tempfile_in(dir)
            .map_err(|e| AnalysisError::io(dir, e))?;

        let staged_path = file.path().to_path_buf();
        let mut writer = BufWriter::new(file.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, self).map_err(|source| AnalysisError::Json {
            path: destination.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(|e| AnalysisError::io(staged_path, e))?;
        drop(writer);

        Ok(StagedReport {
            file,
            destination: destination.to_path_buf(),
        })
    }
}

/// A serialized report waiting beside its destination.
pub struct StagedReport {
    file: NamedTempFile,
    destination: PathBuf,
}

impl StagedReport {
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Moves the report into place, replacing any previous file.
    pub fn publish(self) -> Result<PathBuf> {
        self.file
            .persist(&self.destination)
            .map_err(|e| AnalysisError::io(&self.destination, e.error))?;
        Ok(self.destination)
    }
}

/// Publishes a staged report together with the frames of the wrapped sink.
///
/// The report goes first; if the frames then fail to publish, the report is
/// removed again so a run leaves either both outputs or neither.
pub struct ReportingSink<K> {
    inner: K,
    report: Option<StagedReport>,
}

impl<K: FrameSink> ReportingSink<K> {
    pub fn new(inner: K, report: StagedReport) -> Self {
        Self {
            inner,
            report: Some(report),
        }
    }
}

impl<K: FrameSink> FrameSink for ReportingSink<K> {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        self.inner.write_frame(frame)
    }

    fn finish(&mut self) -> Result<PathBuf> {
        let Some(report) = self.report.take() else {
            return self.inner.finish();
        };
        let report_path = report.publish()?;
        match self.inner.finish() {
            Ok(output) => {
                info!(path = %report_path.display(), "region report written");
                Ok(output)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&report_path) {
                    warn!(path = %report_path.display(), error = %cleanup, "could not withdraw region report");
                }
                Err(e)
            }
        }
    }
}

/// The main, top-level struct for the anomaly engine.
pub struct AnomalyPipeline {
    config: PipelineConfig,
    frame_size: FrameSize,
    frame_count: usize,
    ranking: Vec<ComponentRank>,
    annotator: Arc<Annotator>,
}

impl AnomalyPipeline {
    pub fn new(config: PipelineConfig, input: AnalysisInput, frame_size: FrameSize) -> Self {
        let frame_count = input.frame_count();
        let ranking = rank_components(input.eigen());
        let (mixture, _) = input.into_parts();

        let regions = select_regions(
            &mixture,
            frame_size,
            ranking.iter().map(|rank| rank.component),
            config.region_count,
            config.std_threshold,
        );
        let seed = config.color_seed.unwrap_or_else(rand::random);
        let palette = RegionPalette::random(&regions, seed);

        info!(
            components = ranking.len(),
            frames = frame_count,
            requested = config.region_count,
            selected = ?regions.iter().map(|r| r.index()).collect::<Vec<_>>(),
            color_seed = seed,
            "selected anomalous regions"
        );

        let annotator = Annotator::new(Arc::new(mixture), regions, palette, config.std_threshold);
        Self {
            config,
            frame_size,
            frame_count,
            ranking,
            annotator: Arc::new(annotator),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn frame_size(&self) -> FrameSize {
        self.frame_size
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Every component, most motion first.
    pub fn ranking(&self) -> &[ComponentRank] {
        &self.ranking
    }

    pub fn selected_regions(&self) -> &[ComponentId] {
        self.annotator.regions()
    }

    pub fn annotator(&self) -> Arc<Annotator> {
        Arc::clone(&self.annotator)
    }

    /// Checks everything about a stream that is known before its first frame.
    pub fn check_video(&self, metadata: &VideoMetadata) -> Result<()> {
        if metadata.frame_size != self.frame_size {
            return Err(AnalysisError::FrameSizeMismatch {
                index: 0,
                expected: (self.frame_size.width, self.frame_size.height),
                found: (metadata.frame_size.width, metadata.frame_size.height),
            });
        }
        match metadata.frame_count {
            Some(video) if video != self.frame_count => Err(AnalysisError::VideoLengthMismatch {
                video,
                mixture: self.frame_count,
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn check_frame(&self, index: usize, frame: &RgbImage) -> Result<()> {
        if index >= self.frame_count {
            return Err(AnalysisError::VideoLengthMismatch {
                video: index + 1,
                mixture: self.frame_count,
            });
        }
        let found = frame.dimensions();
        let expected = (self.frame_size.width, self.frame_size.height);
        if found != expected {
            return Err(AnalysisError::FrameSizeMismatch {
                index,
                expected,
                found,
            });
        }
        Ok(())
    }

    pub(crate) fn check_complete(&self, frames: usize) -> Result<()> {
        if frames != self.frame_count {
            return Err(AnalysisError::VideoLengthMismatch {
                video: frames,
                mixture: self.frame_count,
            });
        }
        Ok(())
    }

    /// Validates and annotates a single frame.
    pub fn process_frame(&self, index: usize, frame: RgbImage) -> Result<RgbImage> {
        self.check_frame(index, &frame)?;
        Ok(self.annotator.annotate(index, frame))
    }

    pub fn run<S, K>(&self, source: &mut S, sink: &mut K) -> Result<RunSummary>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        self.run_with_progress(source, sink, |_| {})
    }

    /// Streams every frame from `source` through the annotator into `sink`, in
    /// order, calling `on_frame` with the index of each frame written.
    pub fn run_with_progress<S, K, F>(&self, source: &mut S, sink: &mut K, mut on_frame: F) -> Result<RunSummary>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
        F: FnMut(usize),
    {
        self.check_video(&source.metadata())?;

        let mut index = 0;
        while let Some(frame) = source.next_frame()? {
            let annotated = self.process_frame(index, frame)?;
            sink.write_frame(&annotated)?;
            on_frame(index);
            index += 1;
        }
        self.check_complete(index)?;

        let output = sink.finish()?;
        info!(frames = index, output = %output.display(), "annotation complete");
        Ok(RunSummary { frames: index, output })
    }

    /// Ranking, colors and per-frame boxes of every selected region.
    pub fn region_report(&self) -> RegionReport {
        let palette = self.annotator.palette();
        let mut regions: Vec<RegionTrack> = self
            .selected_regions()
            .iter()
            .map(|&component| RegionTrack {
                component,
                color: palette.color(component).0,
                boxes: Vec::with_capacity(self.frame_count),
            })
            .collect();
        for frame in 0..self.frame_count {
            for (track, (_, bbox)) in regions
                .iter_mut()
                .zip(self.annotator.region_boxes(frame, self.frame_size))
            {
                track.boxes.push(bbox);
            }
        }
        RegionReport {
            frame_size: self.frame_size,
            std_threshold: self.config.std_threshold,
            ranking: self.ranking.clone(),
            regions,
        }
    }
}
