// THEORY:
// `frame_io` is the storage boundary of the engine. Decoding and encoding real
// video is someone else's job; the engine only needs an ordered stream of RGB
// frames in and an ordered stream of RGB frames out. Two small traits capture
// that, and this module ships the image-sequence implementations that need
// nothing beyond the `image` crate. Video-file backends live with the binaries
// that link a codec.
//
// Output is staged: frames are written to a temporary location next to the
// destination and only moved into place by `finish`. A run that fails part way
// leaves nothing behind at the destination.

use crate::core_modules::region_geometry::FrameSize;
use crate::error::{AnalysisError, Result};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};

const FRAME_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// What is known about a frame stream before it is read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    pub frame_size: FrameSize,
    /// Native frame rate, when the container records one.
    pub fps: Option<f64>,
    /// Number of frames, when it can be known up front.
    pub frame_count: Option<usize>,
}

/// An ordered stream of decoded frames.
pub trait FrameSource {
    fn metadata(&self) -> VideoMetadata;
    /// The next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// An ordered, staged destination for frames.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;
    /// Publishes everything written so far and returns where it landed.
    fn finish(&mut self) -> Result<PathBuf>;
}

/// Reads a directory of still images as frames, in file-name order.
pub struct ImageSequenceSource {
    dir: PathBuf,
    paths: Vec<PathBuf>,
    next: usize,
    metadata: VideoMetadata,
    first: Option<RgbImage>,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| AnalysisError::io(dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| AnalysisError::io(dir, e))?.path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if is_frame {
                paths.push(path);
            }
        }
        paths.sort();

        let Some(first_path) = paths.first() else {
            return Err(AnalysisError::NoFrames {
                path: dir.to_path_buf(),
            });
        };
        let first = decode(first_path)?;
        let metadata = VideoMetadata {
            frame_size: FrameSize::new(first.width(), first.height()),
            fps: None,
            frame_count: Some(paths.len()),
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            paths,
            next: 0,
            metadata,
            first: Some(first),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FrameSource for ImageSequenceSource {
    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        let frame = match self.first.take() {
            Some(first) => first,
            None => decode(path)?,
        };
        self.next += 1;
        Ok(Some(frame))
    }
}

fn decode(path: &Path) -> Result<RgbImage> {
    image::open(path)
        .map(|img| img.into_rgb8())
        .map_err(|source| AnalysisError::Image {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes frames as numbered PNGs into a directory that appears only on `finish`.
pub struct ImageSequenceSink {
    destination: PathBuf,
    staging: Option<TempDir>,
    written: usize,
}

impl ImageSequenceSink {
    /// Prepares to write into `out_dir/name`. `out_dir` is created if missing.
    pub fn create(out_dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(out_dir).map_err(|e| AnalysisError::io(out_dir, e))?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(out_dir)
            .map_err(|e| AnalysisError::io(out_dir, e))?;
        Ok(Self {
            destination: out_dir.join(name),
            staging: Some(staging),
            written: 0,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn frames_written(&self) -> usize {
        self.written
    }

    fn staging_dir(&self) -> Result<&Path> {
        self.staging
            .as_ref()
            .map(TempDir::path)
            .ok_or_else(already_finished(&self.destination))
    }
}

fn already_finished(destination: &Path) -> impl FnOnce() -> AnalysisError + '_ {
    move || AnalysisError::io(destination, std::io::Error::other("frame sink already finished"))
}

impl FrameSink for ImageSequenceSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let path = self.staging_dir()?.join(format!("frame_{:05}.png", self.written));
        frame.save(&path).map_err(|source| AnalysisError::Image { path, source })?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<PathBuf> {
        let staging = self.staging.take().ok_or_else(already_finished(&self.destination))?;
        if self.destination.exists() {
            fs::remove_dir_all(&self.destination).map_err(|e| AnalysisError::io(&self.destination, e))?;
        }
        // From here on the staged directory is ours to move or remove.
        let staged = staging.keep();
        if let Err(e) = fs::rename(&staged, &self.destination) {
            if let Err(cleanup) = fs::remove_dir_all(&staged) {
                warn!(path = %staged.display(), error = %cleanup, "could not discard staged frames");
            }
            return Err(AnalysisError::io(&self.destination, e));
        }
        info!(path = %self.destination.display(), frames = self.written, "published frame sequence");
        Ok(self.destination.clone())
    }
}

/// Forwards to the boxed sink.
impl<K: FrameSink + ?Sized> FrameSink for Box<K> {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        (**self).write_frame(frame)
    }

    fn finish(&mut self) -> Result<PathBuf> {
        (**self).finish()
    }
}

impl<K: FrameSink + ?Sized> FrameSink for &mut K {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        (**self).write_frame(frame)
    }

    fn finish(&mut self) -> Result<PathBuf> {
        (**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_frames(dir: &Path, count: u8) {
        for i in 0..count {
            let frame = RgbImage::from_pixel(6, 4, Rgb([i, i, i]));
            frame.save(dir.join(format!("f{i:03}.png"))).unwrap();
        }
    }

    #[test]
    fn reads_frames_in_name_order_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        let meta = source.metadata();
        assert_eq!(meta.frame_size, FrameSize::new(6, 4));
        assert_eq!(meta.frame_count, Some(3));
        assert_eq!(meta.fps, None);

        for expected in 0..3u8 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(*frame.get_pixel(0, 0), Rgb([expected; 3]));
        }
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn empty_directory_has_no_frames() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequenceSource::open(dir.path()),
            Err(AnalysisError::NoFrames { .. })
        ));
    }

    #[test]
    fn missing_directory_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        match ImageSequenceSource::open(&missing) {
            Err(AnalysisError::Io { path, .. }) => assert_eq!(path, missing),
            _ => panic!("expected an io error"),
        }
    }

    #[test]
    fn sink_publishes_only_on_finish() {
        let out = tempfile::tempdir().unwrap();
        let mut sink = ImageSequenceSink::create(out.path(), "boxes").unwrap();
        sink.write_frame(&RgbImage::new(4, 4)).unwrap();
        sink.write_frame(&RgbImage::new(4, 4)).unwrap();
        assert!(!out.path().join("boxes").exists());

        let published = sink.finish().unwrap();
        assert_eq!(published, out.path().join("boxes"));
        assert!(published.join("frame_00000.png").exists());
        assert!(published.join("frame_00001.png").exists());
        assert_eq!(sink.frames_written(), 2);
    }

    #[test]
    fn dropped_sink_leaves_no_output() {
        let out = tempfile::tempdir().unwrap();
        {
            let mut sink = ImageSequenceSink::create(out.path(), "boxes").unwrap();
            sink.write_frame(&RgbImage::new(4, 4)).unwrap();
        }
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn finish_replaces_a_previous_run() {
        let out = tempfile::tempdir().unwrap();
        let old = out.path().join("boxes");
        fs::create_dir_all(&old).unwrap();
        fs::write(old.join("stale.png"), b"x").unwrap();

        let mut sink = ImageSequenceSink::create(out.path(), "boxes").unwrap();
        sink.write_frame(&RgbImage::new(2, 2)).unwrap();
        sink.finish().unwrap();
        assert!(!old.join("stale.png").exists());
        assert!(old.join("frame_00000.png").exists());
    }

    #[test]
    fn finished_sink_refuses_more_work() {
        let out = tempfile::tempdir().unwrap();
        let mut sink = ImageSequenceSink::create(out.path(), "boxes").unwrap();
        sink.write_frame(&RgbImage::new(2, 2)).unwrap();
        let published = sink.finish().unwrap();

        assert!(matches!(sink.finish(), Err(AnalysisError::Io { .. })));
        assert!(matches!(sink.write_frame(&RgbImage::new(2, 2)), Err(AnalysisError::Io { .. })));
        assert!(published.join("frame_00000.png").exists());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 1);
    }

    #[test]
    fn blocked_destination_discards_staged_frames() {
        let out = tempfile::tempdir().unwrap();
        let blocker = out.path().join("boxes");
        fs::write(&blocker, b"not a directory").unwrap();

        let mut sink = ImageSequenceSink::create(out.path(), "boxes").unwrap();
        sink.write_frame(&RgbImage::new(2, 2)).unwrap();
        assert!(sink.finish().is_err());
        drop(sink);

        assert!(blocker.is_file());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 1);
    }
}
