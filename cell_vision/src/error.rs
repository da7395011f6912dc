// THEORY:
// Failure handling is concentrated at the boundary of the engine. Geometry,
// overlap, ranking and selection are pure functions over validated arrays and
// cannot fail; everything that can go wrong happens while loading archives,
// checking that the arrays describe the same run, or moving frames in and out
// of storage. Each variant names the offending path or array so a caller can
// report it without extra bookkeeping.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("npz decode error at {path}: {source}")]
    Npz {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpzError,
    },
    #[error("array `{name}` missing from {path}")]
    MissingArray { path: PathBuf, name: String },
    #[error("array `{array}` has shape {found:?}, expected {expected}")]
    ArrayShape {
        array: &'static str,
        expected: String,
        found: Vec<usize>,
    },
    #[error("frame count mismatch: mixture intermediates have {mixture} frames, eigen data has {eigen}")]
    FrameCountMismatch { mixture: usize, eigen: usize },
    #[error("component count mismatch: mixture intermediates have {mixture} components, eigen data has {eigen}")]
    ComponentCountMismatch { mixture: usize, eigen: usize },
    #[error("video has {video} frames but the mixture series covers {mixture}")]
    VideoLengthMismatch { video: usize, mixture: usize },
    #[error("frame {index} is {found:?} but the video is {expected:?}")]
    FrameSizeMismatch {
        index: usize,
        expected: (u32, u32),
        found: (u32, u32),
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("video backend error at {path}: {message}")]
    Video { path: PathBuf, message: String },
    #[error("no frames found at {path}")]
    NoFrames { path: PathBuf },
    #[error("worker pool failure: {0}")]
    Worker(String),
}

impl AnalysisError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
