//! Shared fixtures for the crate's unit tests.

use crate::core_modules::frame_io::{FrameSink, FrameSource, VideoMetadata};
use crate::core_modules::mixture::{AnalysisInput, EigenSeries, MixtureSeries};
use crate::core_modules::region_geometry::FrameSize;
use crate::error::Result;
use image::{Rgb, RgbImage};
use ndarray::{Array3, Array4};
use std::path::PathBuf;

pub const SIZE: FrameSize = FrameSize {
    width: 64,
    height: 64,
};

/// Three components over two frames.
///
/// Component 1 travels from (5, 5) to (50, 50) and has the largest eigenvector
/// motion. Component 0 stays at (10, 10) and ranks second. Component 2 stays at
/// (11, 11), ranks last, and its box overlaps component 0's.
pub fn three_component_input() -> AnalysisInput {
    let centres = [
        [(10.0, 10.0), (5.0, 5.0), (11.0, 11.0)],
        [(10.0, 10.0), (50.0, 50.0), (11.0, 11.0)],
    ];
    let mut means = Array3::<f64>::zeros((2, 3, 2));
    let mut covars = Array4::<f64>::zeros((2, 3, 2, 2));
    for (frame, row) in centres.iter().enumerate() {
        for (component, &(r, c)) in row.iter().enumerate() {
            means[[frame, component, 0]] = r;
            means[[frame, component, 1]] = c;
            covars[[frame, component, 0, 0]] = 0.25;
            covars[[frame, component, 1, 1]] = 0.25;
        }
    }

    let mut vectors = Array3::<f64>::zeros((2, 3, 3));
    vectors[[1, 0, 1]] = 2.0;
    vectors[[1, 1, 0]] = 9.0;
    vectors[[1, 2, 2]] = 1.0;

    AnalysisInput::new(
        MixtureSeries::new(means, covars).unwrap(),
        EigenSeries::new(vectors).unwrap(),
    )
    .unwrap()
}

pub fn gradient_frame(seed: u8, size: FrameSize) -> RgbImage {
    RgbImage::from_fn(size.width, size.height, |x, y| {
        Rgb([x as u8 ^ seed, y as u8, seed.wrapping_mul(3)])
    })
}

/// Frames served from memory.
pub struct MemorySource {
    frames: std::vec::IntoIter<RgbImage>,
    metadata: VideoMetadata,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>, size: FrameSize, advertise_count: bool) -> Self {
        let metadata = VideoMetadata {
            frame_size: size,
            fps: Some(24.0),
            frame_count: advertise_count.then_some(frames.len()),
        };
        Self {
            frames: frames.into_iter(),
            metadata,
        }
    }
}

impl FrameSource for MemorySource {
    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frames.next())
    }
}

/// Collects written frames; `finished` flips only on a successful run.
#[derive(Default)]
pub struct MemorySink {
    pub frames: Vec<RgbImage>,
    pub finished: bool,
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<PathBuf> {
        self.finished = true;
        Ok(PathBuf::from("memory"))
    }
}

/// Two components over `frames` frames. Component 0 drifts diagonally from
/// (8, 8) and dominates the motion ranking; component 1 sits still at (50, 10).
pub fn drifting_input(frames: usize) -> AnalysisInput {
    let mut means = Array3::<f64>::zeros((frames, 2, 2));
    let mut covars = Array4::<f64>::zeros((frames, 2, 2, 2));
    let mut vectors = Array3::<f64>::zeros((frames, 2, 2));
    for frame in 0..frames {
        let step = frame as f64;
        means[[frame, 0, 0]] = 8.0 + 3.0 * step;
        means[[frame, 0, 1]] = 8.0 + 3.0 * step;
        means[[frame, 1, 0]] = 50.0;
        means[[frame, 1, 1]] = 10.0;
        for component in 0..2 {
            covars[[frame, component, 0, 0]] = 1.0;
            covars[[frame, component, 1, 1]] = 1.0;
        }
        vectors[[frame, 0, 0]] = step;
        vectors[[frame, 1, 1]] = 0.1 * step;
    }
    AnalysisInput::new(
        MixtureSeries::new(means, covars).unwrap(),
        EigenSeries::new(vectors).unwrap(),
    )
    .unwrap()
}
