//! Common extent and layover/shadow masks of a multi-temporal stack.
//!
//! Both masks are uint8 rasters on the union grid of their inputs. The
//! extent marks pixels covered by every acquisition, the LS mask marks
//! pixels in layover or shadow in any acquisition.

use crate::core::timeseries::find_products;
use crate::io::raster::{self, OutputType, RasterLayer};
use crate::types::{ArdError, ArdResult};
use ndarray::{Array2, Zip};
use std::path::{Path, PathBuf};

/// Inward buffer of the common extent, in units of the raster's CRS
pub const EXTENT_BUFFER: f64 = 0.0018;

pub fn extent_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.extent.tif", name))
}

pub fn ls_mask_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.ls_mask.tif", name))
}

fn common_shape(bands: &[Array2<f32>]) -> ArdResult<(usize, usize)> {
    let first = bands
        .first()
        .ok_or_else(|| ArdError::Processing("No layers to combine".to_string()))?;
    if let Some(other) = bands.iter().find(|b| b.dim() != first.dim()) {
        return Err(ArdError::Processing(format!(
            "Layer shape {:?} differs from {:?}",
            other.dim(),
            first.dim()
        )));
    }
    Ok(first.dim())
}

/// 1 where every band holds data, 0 elsewhere
pub fn common_extent(bands: &[Array2<f32>]) -> ArdResult<Array2<f32>> {
    let mut mask = Array2::from_elem(common_shape(bands)?, 1.0f32);
    for band in bands {
        Zip::from(&mut mask).and(band).for_each(|m, &v| {
            if v == 0.0 || v.is_nan() {
                *m = 0.0;
            }
        });
    }
    Ok(mask)
}

/// 1 where any band flags layover or shadow, 0 elsewhere
pub fn layover_union(bands: &[Array2<f32>]) -> ArdResult<Array2<f32>> {
    let mut mask = Array2::zeros(common_shape(bands)?);
    for band in bands {
        Zip::from(&mut mask).and(band).for_each(|m, &v| {
            if v > 0.0 {
                *m = 1.0;
            }
        });
    }
    Ok(mask)
}

/// Shrink the valid area of a 0/1 mask by `radius` pixels. Pixels closer
/// than `radius` to the raster edge are removed as well.
pub fn erode(mask: &Array2<f32>, radius: usize) -> Array2<f32> {
    if radius == 0 {
        return mask.clone();
    }
    let (rows, cols) = mask.dim();
    let horizontal = Array2::from_shape_fn((rows, cols), |(r, c)| {
        if c < radius || c + radius >= cols {
            return 0.0;
        }
        (c - radius..=c + radius).map(|k| mask[[r, k]]).fold(1.0, f32::min)
    });
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        if r < radius || r + radius >= rows {
            return 0.0;
        }
        (r - radius..=r + radius).map(|k| horizontal[[k, c]]).fold(1.0, f32::min)
    })
}

/// Buffer distance in whole pixels of the grid
pub fn buffer_pixels(geo_transform: &[f64; 6], buffer: f64) -> usize {
    let size = geo_transform[1].abs();
    if size == 0.0 {
        0
    } else {
        (buffer.abs() / size).ceil() as usize
    }
}

/// Stack `images` on their union grid through a temporary virtual raster
fn stack(images: &[PathBuf], vrt: &Path) -> ArdResult<(Vec<Array2<f32>>, [f64; 6], String)> {
    raster::build_vrt(vrt, images)?;
    let layers = raster::read_bands(vrt);
    std::fs::remove_file(vrt)?;
    let layers = layers?;
    let first = layers
        .first()
        .ok_or_else(|| ArdError::Processing(format!("{} has no bands", vrt.display())))?;
    let (geo_transform, projection) = (first.geo_transform, first.projection.clone());
    Ok((layers.into_iter().map(|l| l.data).collect(), geo_transform, projection))
}

fn write_mask(outfile: &Path, mask: Array2<f32>, name: &str, geo_transform: &[f64; 6], projection: &str) -> ArdResult<()> {
    raster::write_geotiff(
        outfile,
        &[mask],
        &[name.to_string()],
        geo_transform,
        projection,
        OutputType::UInt8,
        Some(0.0),
    )
}

/// Common extent of `images`, shrunk by `buffer`. An existing output is reused.
pub fn mt_extent(images: &[PathBuf], outfile: &Path, buffer: f64) -> ArdResult<Option<PathBuf>> {
    if outfile.exists() {
        log::info!("Common extent {} already exists", outfile.display());
        return Ok(Some(outfile.to_path_buf()));
    }
    if images.is_empty() {
        return Ok(None);
    }
    log::info!("Creating common extent {} from {} layers", outfile.display(), images.len());
    let (bands, geo_transform, projection) = stack(images, &outfile.with_extension("vrt"))?;
    let mask = erode(&common_extent(&bands)?, buffer_pixels(&geo_transform, buffer));
    write_mask(outfile, mask, "extent", &geo_transform, &projection)?;
    Ok(Some(outfile.to_path_buf()))
}

/// Common layover/shadow mask of `ls_images`, limited to `extent` when
/// given. An existing output is reused.
pub fn mt_layover(ls_images: &[PathBuf], outfile: &Path, extent: Option<&Path>) -> ArdResult<Option<PathBuf>> {
    if outfile.exists() {
        log::info!("Layover/shadow mask {} already exists", outfile.display());
        return Ok(Some(outfile.to_path_buf()));
    }
    if ls_images.is_empty() {
        return Ok(None);
    }
    log::info!("Creating common layover/shadow mask {}", outfile.display());
    let (bands, geo_transform, projection) = stack(ls_images, &outfile.with_extension("vrt"))?;
    let mut mask = layover_union(&bands)?;
    if let Some(extent) = extent {
        let inside = raster::resample_nearest(&raster::read_band(extent, 1)?, &geo_transform, mask.dim());
        Zip::from(&mut mask).and(&inside).for_each(|m, &e| {
            if e == 0.0 {
                *m = 0.0;
            }
        });
    }
    write_mask(outfile, mask, "ls_mask", &geo_transform, &projection)?;
    Ok(Some(outfile.to_path_buf()))
}

fn product_images(products: &[PathBuf]) -> ArdResult<Vec<PathBuf>> {
    let mut images = Vec::new();
    for product in products {
        images.extend(
            raster::dimap_images(product)?
                .into_iter()
                .filter(|p| !p.to_string_lossy().to_lowercase().contains("layover")),
        );
    }
    Ok(images)
}

fn ls_images(products: &[PathBuf]) -> ArdResult<Vec<PathBuf>> {
    let mut images = Vec::new();
    for product in products {
        images.extend(raster::dimap_images(product)?);
    }
    Ok(images)
}

/// Create the common extent of the `{date}/*{bs_suffix}.dim` products under
/// `dir`, and with `create_ls_mask` the common LS mask of the `*_LS.dim`
/// products. Outputs are named after the track or burst `name`.
pub fn create_mt_masks(dir: &Path, name: &str, bs_suffix: &str, create_ls_mask: bool) -> ArdResult<()> {
    let mut backscatter = Vec::new();
    let mut layover = Vec::new();
    let mut date_dirs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    date_dirs.sort();
    for date_dir in &date_dirs {
        backscatter.extend(find_products(date_dir, bs_suffix)?);
        if create_ls_mask {
            layover.extend(find_products(date_dir, "_LS")?);
        }
    }

    let extent = mt_extent(&product_images(&backscatter)?, &extent_file(dir, name), EXTENT_BUFFER)?;
    if create_ls_mask {
        let images = ls_images(&layover)?;
        if images.is_empty() {
            log::debug!("No layover/shadow masks found for {}", name);
        } else {
            mt_layover(&images, &ls_mask_file(dir, name), extent.as_deref())?;
        }
    }
    Ok(())
}

/// Masks applied to the layers of a time series
#[derive(Debug, Clone, Default)]
pub struct MtMasks {
    pub extent: Option<RasterLayer>,
    pub ls_mask: Option<RasterLayer>,
}

impl MtMasks {
    /// Masks of the track or burst `name` found in `dir`. The LS mask is
    /// only loaded with `apply_ls_mask`.
    pub fn load(dir: &Path, name: &str, apply_ls_mask: bool) -> ArdResult<MtMasks> {
        let extent = extent_file(dir, name);
        let ls_mask = ls_mask_file(dir, name);
        Ok(MtMasks {
            extent: if extent.exists() {
                Some(raster::read_band(&extent, 1)?)
            } else {
                None
            },
            ls_mask: if apply_ls_mask && ls_mask.exists() {
                Some(raster::read_band(&ls_mask, 1)?)
            } else {
                None
            },
        })
    }

    /// Pixels of a layer on `geo_transform` removed by the masks
    pub fn masked(&self, geo_transform: &[f64; 6], shape: (usize, usize)) -> Array2<bool> {
        let mut masked = Array2::from_elem(shape, false);
        if let Some(extent) = &self.extent {
            let inside = raster::resample_nearest(extent, geo_transform, shape);
            Zip::from(&mut masked).and(&inside).for_each(|m, &v| *m |= v == 0.0);
        }
        if let Some(ls_mask) = &self.ls_mask {
            let flagged = raster::resample_nearest(ls_mask, geo_transform, shape);
            Zip::from(&mut masked).and(&flagged).for_each(|m, &v| *m |= v > 0.0);
        }
        masked
    }
}
