pub mod annotator;
pub mod frame_io;
pub mod mixture;
pub mod motion_ranking;
pub mod overlap;
pub mod region_geometry;
pub mod region_selector;
