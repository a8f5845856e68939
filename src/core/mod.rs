//! Core ARD processing: parameters, toolbox invocation and the pipelines

pub mod batch;
pub mod burst_batch;
pub mod burst_to_ard;
pub mod gpt;
pub mod graph;
pub mod grd_batch;
pub mod grd_to_ard;
pub mod mosaic;
pub mod mt_masks;
pub mod params;
pub mod slc_wrappers;
pub mod timescan;
pub mod timeseries;
pub mod wrappers;

// Re-export main types
pub use batch::BatchConfig;
pub use burst_to_ard::{burst_to_ard, BurstOutputs};
pub use gpt::{Gpt, GptCommand};
pub use graph::{Graph, Node};
pub use grd_batch::SubsetDecision;
pub use grd_to_ard::grd_to_ard;
pub use params::{ArdParameters, DemParams, MosaicParams, SingleArd, TimeScanArd, TimeSeriesArd};
pub use mt_masks::MtMasks;
pub use timescan::Metric;
pub use timeseries::ard_to_ts;
