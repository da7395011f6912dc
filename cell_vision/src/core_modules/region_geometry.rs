// THEORY:
// `region_geometry` turns the statistics of one mixture component into a concrete
// pixel region. A component is an ellipse in spirit, but downstream selection and
// drawing work on axis-aligned boxes, so the box is the component's mean extended
// by `std_threshold` standard deviations along each image axis.
//
// The covariance's off-diagonal terms are ignored: the box follows the marginal
// spread along rows and columns only. Every bound is clipped into the frame so a
// box is always drawable, even when the component sits partly or wholly outside.

use crate::core_modules::mixture::{ComponentId, MixtureSeries};

/// Number of standard deviations a region extends from its mean by default.
pub const DEFAULT_STD_THRESHOLD: f64 = 3.0;

/// Pixel dimensions of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A pixel position as `(row, col)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelCoord {
    pub row: u32,
    pub col: u32,
}

/// An axis-aligned, inclusive pixel box clipped to a frame.
/// Always satisfies `top <= bottom` and `left <= right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct BoundingBox {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl BoundingBox {
    /// Builds the box spanned by a Gaussian with the given mean and axis variances.
    ///
    /// Lower bounds are floored and upper bounds ceiled before clipping to
    /// `[0, height) x [0, width)`. A non-finite spread (for instance from a negative
    /// variance) collapses onto the frame origin instead of failing.
    pub fn from_gaussian(
        mean: [f64; 2],
        row_variance: f64,
        col_variance: f64,
        frame_size: FrameSize,
        std_threshold: f64,
    ) -> Self {
        let row_half = std_threshold * row_variance.sqrt();
        let col_half = std_threshold * col_variance.sqrt();
        let (top, bottom) = clip_span(mean[0] - row_half, mean[0] + row_half, frame_size.height);
        let (left, right) = clip_span(mean[1] - col_half, mean[1] + col_half, frame_size.width);
        Self {
            top,
            bottom,
            left,
            right,
        }
    }

    /// `[top, bottom]`.
    pub fn row_bounds(&self) -> [u32; 2] {
        [self.top, self.bottom]
    }

    /// `[left, right]`.
    pub fn col_bounds(&self) -> [u32; 2] {
        [self.left, self.right]
    }

    /// The four corners ordered top-left, top-right, bottom-left, bottom-right.
    pub fn corners(&self) -> [PixelCoord; 4] {
        [
            PixelCoord { row: self.top, col: self.left },
            PixelCoord { row: self.top, col: self.right },
            PixelCoord { row: self.bottom, col: self.left },
            PixelCoord { row: self.bottom, col: self.right },
        ]
    }

    pub fn contains(&self, point: PixelCoord) -> bool {
        point.row >= self.top
            && point.row <= self.bottom
            && point.col >= self.left
            && point.col <= self.right
    }

    /// Span lengths multiplied, matching how region areas are logged.
    pub fn area(&self) -> u64 {
        (self.bottom - self.top) as u64 * (self.right - self.left) as u64
    }

    pub fn width(&self) -> u32 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top + 1
    }
}

fn clip_span(low: f64, high: f64, extent: u32) -> (u32, u32) {
    let max = extent.saturating_sub(1) as f64;
    // NaN survives clamp and then casts to 0.
    let low = low.floor().clamp(0.0, max) as u32;
    let high = high.ceil().clamp(0.0, max) as u32;
    (low.min(high), low.max(high))
}

/// The box of `component` at `frame`, using the diagonal of its covariance.
pub fn compute_boundary(
    mixture: &MixtureSeries,
    frame_size: FrameSize,
    frame: usize,
    component: ComponentId,
    std_threshold: f64,
) -> BoundingBox {
    let covariance = mixture.covariance(frame, component);
    BoundingBox::from_gaussian(
        mixture.mean(frame, component),
        covariance[[0, 0]],
        covariance[[1, 1]],
        frame_size,
        std_threshold,
    )
}
