// OpenCV-backed video sources and sinks, enabled with the `video` feature.

use cell_vision::core_modules::frame_io::{FrameSink, FrameSource, VideoMetadata};
use cell_vision::core_modules::region_geometry::FrameSize;
use cell_vision::{AnalysisError, Result};
use image::RgbImage;
use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn video_err(path: &Path, message: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::Video {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn utf8_path(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| video_err(path, "path is not valid UTF-8"))
}

pub struct OpenCvVideoSource {
    path: PathBuf,
    capture: VideoCapture,
    metadata: VideoMetadata,
}

impl OpenCvVideoSource {
    pub fn open(path: &Path) -> Result<Self> {
        let err = |e: opencv::Error| video_err(path, e);
        let capture = VideoCapture::from_file(utf8_path(path)?, videoio::CAP_ANY).map_err(err)?;
        if !capture.is_opened().map_err(err)? {
            return Err(video_err(path, "could not open video"));
        }

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).map_err(err)? as u32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).map_err(err)? as u32;
        let fps = capture.get(videoio::CAP_PROP_FPS).map_err(err)?;
        info!(path = %path.display(), width, height, fps, "opened input video");

        // Container frame counts are estimates for many codecs, so the length is
        // verified while streaming instead.
        let metadata = VideoMetadata {
            frame_size: FrameSize::new(width, height),
            fps: (fps > 0.0).then_some(fps),
            frame_count: None,
        };

        Ok(Self {
            path: path.to_path_buf(),
            capture,
            metadata,
        })
    }
}

impl FrameSource for OpenCvVideoSource {
    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let path = self.path.as_path();
        let err = |e: opencv::Error| video_err(path, e);

        let mut bgr = Mat::default();
        if !self.capture.read(&mut bgr).map_err(err)? || bgr.empty() {
            return Ok(None);
        }
        let mut rgb = Mat::default();
        imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(err)?;

        let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
        let bytes = rgb.data_bytes().map_err(err)?.to_vec();
        RgbImage::from_raw(width, height, bytes)
            .map(Some)
            .ok_or_else(|| video_err(path, "decoded frame has an unexpected layout"))
    }
}

/// Encodes frames to an mp4 that only appears at its destination on `finish`.
pub struct OpenCvVideoSink {
    destination: PathBuf,
    staging: PathBuf,
    writer: VideoWriter,
    frame_size: FrameSize,
    finished: bool,
}

impl OpenCvVideoSink {
    pub fn create(out_dir: &Path, stem: &str, fps: f64, frame_size: FrameSize) -> Result<Self> {
        fs::create_dir_all(out_dir).map_err(|e| AnalysisError::Io {
            path: out_dir.to_path_buf(),
            source: e,
        })?;
        let destination = out_dir.join(format!("{stem}.mp4"));
        let staging = out_dir.join(format!(".{stem}.partial.mp4"));
        let err = |e: opencv::Error| video_err(&staging, e);

        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v').map_err(err)?;
        let writer = VideoWriter::new(
            utf8_path(&staging)?,
            fourcc,
            fps,
            core::Size::new(frame_size.width as i32, frame_size.height as i32),
            true,
        )
        .map_err(err)?;
        if !writer.is_opened().map_err(err)? {
            return Err(video_err(&staging, "could not open video writer"));
        }

        Ok(Self {
            destination,
            staging,
            writer,
            frame_size,
            finished: false,
        })
    }
}

impl FrameSink for OpenCvVideoSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let staging = self.staging.as_path();
        let err = |e: opencv::Error| video_err(staging, e);

        let mut rgb = Mat::new_rows_cols_with_default(
            self.frame_size.height as i32,
            self.frame_size.width as i32,
            core::CV_8UC3,
            Scalar::all(0.0),
        )
        .map_err(err)?;
        let buffer = rgb.data_bytes_mut().map_err(err)?;
        if buffer.len() != frame.as_raw().len() {
            return Err(video_err(staging, "frame does not match the encoder size"));
        }
        buffer.copy_from_slice(frame.as_raw());

        let mut bgr = Mat::default();
        imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0).map_err(err)?;
        self.writer.write(&bgr).map_err(err)
    }

    fn finish(&mut self) -> Result<PathBuf> {
        self.writer
            .release()
            .map_err(|e| video_err(&self.staging, e))?;
        fs::rename(&self.staging, &self.destination).map_err(|e| AnalysisError::Io {
            path: self.destination.clone(),
            source: e,
        })?;
        self.finished = true;
        Ok(self.destination.clone())
    }
}

impl Drop for OpenCvVideoSink {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let _ = self.writer.release();
        if let Err(e) = fs::remove_file(&self.staging) {
            warn!(path = %self.staging.display(), error = %e, "could not discard partial video");
        }
    }
}
