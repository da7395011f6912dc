// THEORY:
// This file is the main entry point for the `cell_vision` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the public
// API that will be exposed to external consumers (like the `anomaly_tester` CLI).
//
// The primary goal is to export the `AnomalyPipeline` and its associated data
// structures (`PipelineConfig`, `RegionReport`, etc.) as the high-level interface
// for spatial anomaly detection over Gaussian-mixture models of cell video. The
// geometric and selection algorithms live in `core_modules`, where they remain
// usable on their own.

pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AnalysisError, Result};
