// THEORY:
// The `annotator` is the rendering layer. Once the selected regions are fixed it
// visits every frame, recomputes each region's box for that frame (the mixture
// evolves, so boxes drift and breathe with the cell), and burns a one-pixel
// outline into the image.
//
// Key architectural principles:
// 1.  **Stable Identity Colors**: Each selected region owns one color for the whole
//     video. Colors come from a `RegionPalette` built once per run and handed in,
//     so rendering has no hidden state and a fixed seed reproduces a video exactly.
// 2.  **Explicit Ownership**: `annotate` takes a frame by value and hands it back;
//     the annotator is the frame's single owner while drawing. Dimensions and pixel
//     format never change.
// 3.  **Frame Independence**: Annotating frame `i` reads nothing from frame `j`, so
//     a shared `Annotator` can serve many workers at once.

use crate::core_modules::mixture::{ComponentId, MixtureSeries};
use crate::core_modules::region_geometry::{BoundingBox, FrameSize, compute_boundary};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Used for any region the palette does not know about.
pub const FALLBACK_COLOR: Rgb<u8> = Rgb([30, 144, 255]);

/// Fixed color assignment for the selected regions of one run.
#[derive(Debug, Clone, Default)]
pub struct RegionPalette {
    colors: HashMap<ComponentId, Rgb<u8>>,
}

impl RegionPalette {
    /// Draws one random RGB color per region from a generator seeded with `seed`.
    pub fn random(regions: &[ComponentId], seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let colors = regions
            .iter()
            .map(|&region| (region, Rgb(rng.random::<[u8; 3]>())))
            .collect();
        Self { colors }
    }

    pub fn from_colors<I>(colors: I) -> Self
    where
        I: IntoIterator<Item = (ComponentId, Rgb<u8>)>,
    {
        Self {
            colors: colors.into_iter().collect(),
        }
    }

    pub fn color(&self, region: ComponentId) -> Rgb<u8> {
        self.colors.get(&region).copied().unwrap_or(FALLBACK_COLOR)
    }
}

/// Draws the four edges of `bbox`, inclusive of its bounding rows and columns.
pub fn draw_outline(frame: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let rect = Rect::at(bbox.left as i32, bbox.top as i32).of_size(bbox.width(), bbox.height());
    draw_hollow_rect_mut(frame, rect, color);
}

/// Renders the selected regions onto frames.
#[derive(Debug, Clone)]
pub struct Annotator {
    mixture: Arc<MixtureSeries>,
    regions: Vec<ComponentId>,
    palette: RegionPalette,
    std_threshold: f64,
}

impl Annotator {
    pub fn new(
        mixture: Arc<MixtureSeries>,
        regions: Vec<ComponentId>,
        palette: RegionPalette,
        std_threshold: f64,
    ) -> Self {
        Self {
            mixture,
            regions,
            palette,
            std_threshold,
        }
    }

    pub fn regions(&self) -> &[ComponentId] {
        &self.regions
    }

    pub fn palette(&self) -> &RegionPalette {
        &self.palette
    }

    /// The box of every selected region at `frame_index`, in selection order.
    pub fn region_boxes(&self, frame_index: usize, frame_size: FrameSize) -> Vec<(ComponentId, BoundingBox)> {
        self.regions
            .iter()
            .map(|&region| {
                let bbox = compute_boundary(&self.mixture, frame_size, frame_index, region, self.std_threshold);
                (region, bbox)
            })
            .collect()
    }

    /// Draws every selected region's outline for `frame_index` into `frame`.
    ///
    /// `frame_index` must be within the mixture series.
    pub fn annotate_in_place(&self, frame_index: usize, frame: &mut RgbImage) {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        for (slot, (region, bbox)) in self
            .region_boxes(frame_index, FrameSize::new(width, height))
            .into_iter()
            .enumerate()
        {
            debug!(
                frame = frame_index,
                slot,
                component = region.index(),
                area = bbox.area(),
                "drawing region"
            );
            draw_outline(frame, &bbox, self.palette.color(region));
        }
    }

    pub fn annotate(&self, frame_index: usize, mut frame: RgbImage) -> RgbImage {
        self.annotate_in_place(frame_index, &mut frame);
        frame
    }
}
