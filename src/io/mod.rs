//! I/O modules for product archives, rasters, inventories and the catalogue APIs

pub mod annotation;
pub mod burst_inventory;
pub mod dem;
pub mod download;
pub mod geojson;
pub mod inventory;
pub mod raster;
pub mod safe;
pub mod search;

pub use annotation::AnnotationParser;
pub use burst_inventory::{BurstInventory, BurstJob, BurstRecord};
pub use dem::{DemReader, ExternalDem};
pub use download::{Credentials, Mirror};
pub use inventory::{Inventory, SceneOutputs, SceneRecord};
pub use safe::SafeReader;
pub use search::SearchQuery;
