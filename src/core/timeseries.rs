//! Multi-temporal stacks of single-date ARD products, exported as GeoTIFF
//! layers and a virtual raster.

use crate::core::gpt::Gpt;
use crate::core::grd_to_ard::write_marker;
use crate::core::mt_masks::MtMasks;
use crate::core::params::ArdParameters;
use crate::core::wrappers::{self, data_dir, delete_dimap, dim_file, dimap_stem};
use crate::io::raster::{self, OutputType};
use crate::types::{ArdError, ArdResult};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Bands of the H-A-Alpha decomposition
pub const POLARIMETRIC_BANDS: [&str; 3] = ["Entropy", "Anisotropy", "Alpha"];

/// Value range stretched to the integer output types
pub fn stretch_range(product: &str, band: &str) -> (f32, f32) {
    match (product, band) {
        (_, "Alpha") => (0.000001, 90.0),
        (_, "Anisotropy") | (_, "Entropy") => (0.000001, 1.0),
        ("coh", _) => (0.000001, 1.0),
        _ => (-30.0, 5.0),
    }
}

/// Dates encoded as `12Jan2020` in a band name
pub fn band_dates(name: &str) -> Vec<NaiveDate> {
    name.split(|c| c == '_' || c == '.')
        .filter_map(|token| NaiveDate::parse_from_str(token, "%d%b%Y").ok())
        .collect()
}

/// Date prefix (`YYYYMMDD_...`) of a product file name
fn product_date(dim: &Path) -> Option<NaiveDate> {
    let name = dim.file_name()?.to_string_lossy().into_owned();
    let token = name.split('_').next()?;
    NaiveDate::parse_from_str(token, "%Y%m%d").ok()
}

/// Band images of a product whose name contains `band`
fn matching_images(product: &Path, band: &str) -> ArdResult<Vec<PathBuf>> {
    Ok(raster::dimap_images(product)?
        .into_iter()
        .filter(|p| {
            p.file_stem()
                .map_or(false, |s| s.to_string_lossy().contains(band))
        })
        .collect())
}

/// One output layer of the time series
#[derive(Debug, Clone, PartialEq)]
struct TsLayer {
    image: PathBuf,
    dates: Vec<NaiveDate>,
}

/// Output file name of the layer at 0-based `index`
pub fn layer_name(index: usize, dates: &[NaiveDate], product: &str, band: &str) -> String {
    match (product, dates) {
        ("coh", [master, slave, ..]) => format!(
            "{:02}.{}.{}.coh.{}.tif",
            index + 1,
            master.format("%y%m%d"),
            slave.format("%y%m%d"),
            band
        ),
        (_, [date, ..]) => format!("{:02}.{}.{}.{}.tif", index + 1, date.format("%Y%m%d"), product, band),
        (_, []) => format!("{:02}.{}.{}.tif", index + 1, product, band),
    }
}

fn stacked_layers(stack: &Path, band: &str) -> ArdResult<Vec<TsLayer>> {
    let mut layers: Vec<TsLayer> = matching_images(stack, band)?
        .into_iter()
        .filter_map(|image| {
            let stem = image.file_stem()?.to_string_lossy().into_owned();
            let dates = band_dates(&stem);
            if dates.is_empty() {
                None
            } else {
                Some(TsLayer { image, dates })
            }
        })
        .collect();
    layers.sort_by(|a, b| a.dates.cmp(&b.dates));
    Ok(layers)
}

fn single_layers(products: &[PathBuf], band: &str) -> ArdResult<Vec<TsLayer>> {
    let mut layers = Vec::new();
    for product in products {
        let Some(image) = matching_images(product, band)?.into_iter().next() else {
            log::debug!("{} has no {} band", product.display(), band);
            continue;
        };
        let stem = image.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let mut dates = band_dates(&stem);
        if dates.is_empty() {
            dates.extend(product_date(product));
        }
        layers.push(TsLayer { image, dates });
    }
    layers.sort_by(|a, b| a.dates.cmp(&b.dates));
    Ok(layers)
}

/// Convert one band image to a GeoTIFF layer with optional dB scaling and
/// integer stretch. Zero and pixels removed by `masks` become nodata.
pub fn convert_layer(
    image: &Path,
    outfile: &Path,
    to_db: bool,
    dtype: OutputType,
    range: (f32, f32),
    description: &str,
    masks: &MtMasks,
) -> ArdResult<()> {
    let layer = raster::read_band(image, 1)?;
    let mut nodata = masks.masked(&layer.geo_transform, layer.data.dim());
    nodata.zip_mut_with(&layer.data, |empty, &v| *empty |= v == 0.0 || v.is_nan());
    let mut data = layer.data;
    if to_db {
        raster::convert_to_db(&mut data);
    }
    if dtype != OutputType::Float32 {
        data = raster::scale_to_int(&data, range.0, range.1, dtype);
    }
    data.zip_mut_with(&nodata, |v, &empty| {
        if empty {
            *v = 0.0;
        }
    });
    raster::write_geotiff(
        outfile,
        &[data],
        &[description.to_string()],
        &layer.geo_transform,
        &layer.projection,
        dtype,
        Some(0.0),
    )
}

fn check_out_tiff(path: &Path) -> ArdResult<()> {
    let size = std::fs::metadata(path)?.len();
    if size == 0 {
        return Err(ArdError::Processing(format!("Empty output {}", path.display())));
    }
    raster::band_count(path)?;
    Ok(())
}

/// Build the time series of one product and band in `out_dir`, with every
/// layer limited by `masks`.
///
/// Returns the `Timeseries_{product}_{band}.vrt`, or `None` when none of
/// the products holds the band.
pub fn ard_to_ts(
    gpt: &Gpt,
    products: &[PathBuf],
    product: &str,
    band: &str,
    params: &ArdParameters,
    out_dir: &Path,
    temp_dir: &Path,
    masks: &MtMasks,
) -> ArdResult<Option<PathBuf>> {
    std::fs::create_dir_all(out_dir)?;
    let check_file = out_dir.join(format!(".{}.{}.processed", product, band));
    let out_vrt = out_dir.join(format!("Timeseries_{}_{}.vrt", product, band));
    if check_file.exists() && out_vrt.exists() {
        log::info!("Time series for {} in {} already processed", product, band);
        return Ok(Some(out_vrt));
    }

    let ard = &params.single_ard;
    let ts = &params.time_series;
    let to_db = product == "bs" && !ard.to_db && ts.to_db;
    let dtype: OutputType = ts.dtype_output.parse()?;

    std::fs::create_dir_all(temp_dir)?;
    let temp = tempfile::Builder::new()
        .prefix(&format!("ts_{}_{}_", product, band))
        .tempdir_in(temp_dir)?;

    let layers = if products.len() > 2 {
        let stack = temp.path().join(format!("{}_{}_stack", product, band));
        let stack_log = out_dir.join(format!("{}_{}_stack.err_log", product, band));
        let pattern = if POLARIMETRIC_BANDS.contains(&band) {
            log::info!("Creating multi-temporal stack of the {} band of the H-A-Alpha decomposition", band);
            format!("{}.*", band)
        } else {
            log::info!("Creating multi-temporal stack of {} products in {} polarisation", product, band);
            format!(".*_{}.*", band)
        };
        wrappers::create_stack(gpt, products, &stack, &stack_log, &pattern)?;

        let stack = if ts.remove_mt_speckle {
            let filtered = temp.path().join(format!("{}_{}_mt", product, band));
            let speckle_log = out_dir.join(format!("{}_{}_mt_speckle.err_log", product, band));
            wrappers::mt_speckle_filter(gpt, &dim_file(&stack), &filtered, &speckle_log, &ts.mt_speckle_filter)?;
            delete_dimap(&stack)?;
            filtered
        } else {
            stack
        };
        stacked_layers(&dim_file(&stack), band)?
    } else {
        single_layers(products, band)?
    };

    if layers.is_empty() {
        log::warn!("No {} layers found for {}", band, product);
        return Ok(None);
    }

    let range = stretch_range(product, band);
    let mut outfiles = Vec::with_capacity(layers.len());
    for (i, layer) in layers.iter().enumerate() {
        let outfile = out_dir.join(layer_name(i, &layer.dates, product, band));
        let description = outfile
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        convert_layer(&layer.image, &outfile, to_db, dtype, range, &description, masks)?;
        outfiles.push(outfile);
    }

    for file in &outfiles {
        if let Err(e) = check_out_tiff(file) {
            std::fs::remove_file(file)?;
            return Err(e);
        }
    }
    write_marker(&check_file)?;
    raster::build_vrt(&out_vrt, &outfiles)?;
    log::info!("Created time series {}", out_vrt.display());
    Ok(Some(out_vrt))
}

/// Time-series GeoTIFF layers of a product in `out_dir`, in time order
pub fn ts_layers(out_dir: &Path, product: &str, band: &str) -> ArdResult<Vec<PathBuf>> {
    let suffix = format!(".{}.{}.tif", product, band);
    let mut layers: Vec<PathBuf> = std::fs::read_dir(out_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .map_or(false, |n| n.to_string_lossy().ends_with(&suffix))
        })
        .collect();
    layers.sort();
    Ok(layers)
}

/// All `.dim` products in `dir` whose stem ends with `suffix`, sorted
pub fn find_products(dir: &Path, suffix: &str) -> ArdResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut products: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |e| e == "dim"))
        .filter(|p| {
            dimap_stem(p)
                .file_name()
                .map_or(false, |n| n.to_string_lossy().ends_with(suffix))
        })
        .filter(|p| data_dir(&dimap_stem(p)).is_dir())
        .collect();
    products.sort();
    Ok(products)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_band_dates() {
        assert_eq!(band_dates("Gamma0_VV_mst_12Jan2020"), vec![date(2020, 1, 12)]);
        assert_eq!(
            band_dates("coh_IW1_VV_12Jan2020_24Jan2020"),
            vec![date(2020, 1, 12), date(2020, 1, 24)]
        );
        assert!(band_dates("Alpha").is_empty());
    }

    #[test]
    fn test_layer_name() {
        assert_eq!(layer_name(0, &[date(2020, 1, 12)], "bs", "VV"), "01.20200112.bs.VV.tif");
        assert_eq!(
            layer_name(9, &[date(2020, 1, 12), date(2020, 1, 24)], "coh", "VH"),
            "10.200112.200124.coh.VH.tif"
        );
        assert_eq!(layer_name(1, &[date(2021, 6, 3)], "pol", "Alpha"), "02.20210603.pol.Alpha.tif");
    }

    #[test]
    fn test_stretch_range() {
        assert_eq!(stretch_range("bs", "VV"), (-30.0, 5.0));
        assert_eq!(stretch_range("coh", "VV"), (0.000001, 1.0));
        assert_eq!(stretch_range("pol", "Alpha"), (0.000001, 90.0));
        assert_eq!(stretch_range("pol", "Entropy"), (0.000001, 1.0));
    }

    #[test]
    fn test_convert_layer_applies_masks() {
        use crate::io::raster::RasterLayer;
        use ndarray::{array, Array2};

        let dir = tempfile::tempdir().unwrap();
        let geo_transform = [10.0, 0.001, 0.0, 50.0, 0.0, -0.001];
        let image = dir.path().join("Sigma0_VV.tif");
        raster::write_geotiff(
            &image,
            &[Array2::from_elem((2, 3), 0.1f32)],
            &[],
            &geo_transform,
            "",
            OutputType::Float32,
            Some(0.0),
        )
        .unwrap();

        let mask = |data: Array2<f32>| RasterLayer {
            data,
            geo_transform,
            projection: String::new(),
            nodata: Some(0.0),
        };
        let masks = MtMasks {
            extent: Some(mask(array![[1.0f32, 1.0, 0.0], [1.0, 1.0, 1.0]])),
            ls_mask: Some(mask(array![[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0]])),
        };

        let outfile = dir.path().join("01.20200112.bs.VV.tif");
        convert_layer(&image, &outfile, true, OutputType::Float32, (-30.0, 5.0), "bs", &masks).unwrap();
        let out = raster::read_band(&outfile, 1).unwrap();
        assert!((out.data[[0, 0]] + 10.0).abs() < 1e-4);
        assert_eq!(out.data[[0, 2]], 0.0);
        assert_eq!(out.data[[1, 0]], 0.0);
        assert!((out.data[[1, 2]] + 10.0).abs() < 1e-4);

        let unmasked = dir.path().join("unmasked.tif");
        convert_layer(&image, &unmasked, true, OutputType::Float32, (-30.0, 5.0), "bs", &MtMasks::default()).unwrap();
        assert!(raster::read_band(&unmasked, 1).unwrap().data.iter().all(|v| *v < -9.9));
    }

    #[test]
    fn test_find_products_and_layers() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["20200124_117_BS", "20200112_117_BS", "20200112_117_LS"] {
            std::fs::write(dir.path().join(format!("{}.dim", name)), "").unwrap();
            std::fs::create_dir(dir.path().join(format!("{}.data", name))).unwrap();
        }
        let found = find_products(dir.path(), "_BS").unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("20200112_117_BS.dim"));
        assert_eq!(product_date(&found[1]), Some(date(2020, 1, 24)));

        for name in ["02.20200124.bs.VV.tif", "01.20200112.bs.VV.tif", "01.20200112.bs.VH.tif"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let layers = ts_layers(dir.path(), "bs", "VV").unwrap();
        assert_eq!(layers.len(), 2);
        assert!(layers[0].ends_with("01.20200112.bs.VV.tif"));
    }
}
