use crate::types::{ArdError, ArdResult, BoundingBox};
use gdal::Dataset;
use std::path::{Path, PathBuf};

/// Properties of a user supplied DEM
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalDem {
    pub path: PathBuf,
    pub nodata: Option<f64>,
    pub width: usize,
    pub height: usize,
    pub bounds: BoundingBox,
}

/// Digital Elevation Model inspection
pub struct DemReader;

impl DemReader {
    /// Open an external DEM and read the properties the toolbox needs
    pub fn inspect<P: AsRef<Path>>(dem_path: P) -> ArdResult<ExternalDem> {
        let dem_path = dem_path.as_ref();
        if !dem_path.exists() {
            return Err(ArdError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("No file found at {}", dem_path.display()),
            )));
        }

        log::info!("Reading DEM properties from: {}", dem_path.display());
        let dataset = Dataset::open(dem_path)?;
        let (width, height) = dataset.raster_size();
        let geo_transform = dataset.geo_transform()?;
        let nodata = dataset.rasterband(1)?.no_data_value();

        let x0 = geo_transform[0];
        let y0 = geo_transform[3];
        let x1 = x0 + geo_transform[1] * width as f64;
        let y1 = y0 + geo_transform[5] * height as f64;

        let dem = ExternalDem {
            path: dem_path.to_path_buf(),
            nodata,
            width,
            height,
            bounds: BoundingBox {
                min_lon: x0.min(x1),
                max_lon: x0.max(x1),
                min_lat: y0.min(y1),
                max_lat: y0.max(y1),
            },
        };
        log::debug!("DEM size: {}x{}, nodata: {:?}", width, height, nodata);
        Ok(dem)
    }
}
