//! ardflow: Sentinel-1 Analysis-Ready-Data orchestration
//!
//! This library searches and downloads Sentinel-1 scenes, keeps scene and
//! burst inventories, and drives the SNAP graph processing tool through
//! preset ARD parameters to single-date products, time series, timescans
//! and mosaics.

pub mod config;
pub mod core;
pub mod geometry;
pub mod io;
pub mod project;
pub mod retry;
pub mod scene;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use config::Settings;
pub use crate::core::{ArdParameters, Gpt};
pub use geometry::{Geometry, Polygon};
pub use io::{BurstInventory, Inventory};
pub use project::{BatchProject, Project, Sentinel1Project};
pub use scene::Sentinel1Scene;
pub use types::{AcquisitionMode, ArdError, ArdResult, BoundingBox, Polarization, ProductType};
