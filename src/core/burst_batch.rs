//! Batch processing of a burst inventory: every burst and date to ARD,
//! then per-burst time series, timescans and mosaics across bursts.

use crate::core::batch::{run_pool, BatchConfig};
use crate::core::burst_to_ard::{burst_to_ard, BurstOutputs};
use crate::core::grd_to_ard::write_marker;
use crate::core::mt_masks::{self, MtMasks};
use crate::core::params::ArdParameters;
use crate::core::{mosaic, timescan, timeseries};
use crate::io::raster::OutputType;
use crate::io::{BurstInventory, BurstJob};
use crate::types::ArdResult;
use std::path::{Path, PathBuf};

/// Products of the burst workflow as `{product}.{band}`
pub const PRODUCT_LIST: [&str; 11] = [
    "bs.HH",
    "bs.VV",
    "bs.HV",
    "bs.VH",
    "coh.VV",
    "coh.VH",
    "coh.HH",
    "coh.HV",
    "pol.Entropy",
    "pol.Anisotropy",
    "pol.Alpha",
];

fn split_product(product: &str) -> (&str, &str) {
    product.split_once('.').unwrap_or((product, ""))
}

/// Process all bursts. Returns the outputs of the successful jobs and the
/// number of failed ones.
pub fn bursts_to_ards(cfg: &BatchConfig, bursts: &BurstInventory) -> ArdResult<(Vec<BurstOutputs>, usize)> {
    log::info!("Preparing the processing pipeline");
    let jobs = bursts.prepare_processing(&cfg.processing_dir, &cfg.download_dir, cfg.data_mount())?;
    log::info!("Processing {} burst jobs with {} workers", jobs.len(), cfg.max_workers);

    std::fs::create_dir_all(&cfg.temp_dir)?;
    let results = run_pool(&jobs, cfg.max_workers, |job: &BurstJob| -> ArdResult<BurstOutputs> {
        // import names only carry the date, so every job gets its own scratch directory
        let temp = tempfile::Builder::new()
            .prefix(&format!("{}_{}_", job.bid, job.date))
            .tempdir_in(&cfg.temp_dir)?;
        burst_to_ard(&cfg.gpt, job, &cfg.params, temp.path())
    })?;

    let mut outputs = Vec::with_capacity(results.len());
    let mut failed = 0;
    for (job, result) in jobs.iter().zip(results) {
        match result {
            Ok(out) => outputs.push(out),
            Err(e) => {
                failed += 1;
                log::error!("Burst {} of {} failed: {}", job.bid, job.date, e);
            }
        }
    }
    Ok((outputs, failed))
}

/// Burst ids that have a directory in the processing directory
pub fn processed_bids(processing_dir: &Path, bursts: &BurstInventory) -> Vec<String> {
    bursts
        .by_bid()
        .into_keys()
        .filter(|bid| processing_dir.join(bid).is_dir())
        .collect()
}

/// Products of a burst over all dates, e.g. every `*_bs.dim`
fn burst_products(burst_dir: &Path, product: &str) -> ArdResult<Vec<PathBuf>> {
    let mut dims = Vec::new();
    for entry in std::fs::read_dir(burst_dir)? {
        let dir = entry?.path();
        if dir.is_dir() {
            dims.extend(timeseries::find_products(&dir, &format!("_{}", product))?);
        }
    }
    dims.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));
    Ok(dims)
}

/// Time series of every burst and product
pub fn ards_to_timeseries(cfg: &BatchConfig, bids: &[String]) -> ArdResult<Vec<PathBuf>> {
    let mut vrts = Vec::new();
    for bid in bids {
        let burst_dir = cfg.processing_dir.join(bid);
        if !burst_dir.is_dir() {
            continue;
        }
        mt_masks::create_mt_masks(&burst_dir, bid, "_bs", cfg.params.single_ard.create_ls_mask)?;
        let masks = MtMasks::load(&burst_dir, bid, cfg.params.time_series.apply_ls_mask)?;

        let ts_dir = burst_dir.join("Timeseries");
        for entry in PRODUCT_LIST {
            let (product, band) = split_product(entry);
            let dims = burst_products(&burst_dir, product)?;
            if dims.is_empty() {
                continue;
            }
            log::info!("Creating time series of {} for burst {}", entry, bid);
            if let Some(vrt) = timeseries::ard_to_ts(
                &cfg.gpt,
                &dims,
                product,
                band,
                &cfg.params,
                &ts_dir,
                &cfg.temp_dir,
                &masks,
            )? {
                vrts.push(vrt);
            }
        }
    }
    Ok(vrts)
}

/// Power-domain averaging and integer rescaling of a product's timescan.
/// Only backscatter in dB is averaged as power and carries the dB stretch.
pub fn timescan_conversion(product: &str, params: &ArdParameters) -> ArdResult<(bool, Option<OutputType>)> {
    if product != "bs" {
        return Ok((false, None));
    }
    let dtype: OutputType = params.time_series.dtype_output.parse()?;
    let to_db = params.single_ard.to_db || params.time_series.to_db;
    Ok((to_db, (dtype != OutputType::Float32).then_some(dtype)))
}

/// Timescan metrics of every burst and product
pub fn timeseries_to_timescan(cfg: &BatchConfig, bids: &[String]) -> ArdResult<Vec<PathBuf>> {
    let scan = &cfg.params.time_scan;

    let mut vrts = Vec::new();
    for bid in bids {
        let burst_dir = cfg.processing_dir.join(bid);
        let ts_dir = burst_dir.join("Timeseries");
        let tscan_dir = burst_dir.join("Timescan");
        if !ts_dir.is_dir() {
            continue;
        }
        std::fs::create_dir_all(&tscan_dir)?;

        let mut products = Vec::new();
        for entry in PRODUCT_LIST {
            let (product, band) = split_product(entry);
            let check = tscan_dir.join(format!(".{}.processed", entry));
            if check.exists() {
                products.push(entry.to_string());
                continue;
            }
            let layers = timeseries::ts_layers(&ts_dir, product, band)?;
            if layers.is_empty() {
                continue;
            }
            let (to_power, rescale) = timescan_conversion(product, &cfg.params)?;
            log::info!("Processing timescan of {} for burst {}", entry, bid);
            timescan::mt_metrics(
                &layers,
                &tscan_dir.join(entry),
                &scan.metrics,
                to_power,
                rescale,
                scan.remove_outliers,
            )?;
            write_marker(&check)?;
            products.push(entry.to_string());
        }
        if let Some(vrt) = timescan::create_tscan_vrt(&tscan_dir, &products)? {
            vrts.push(vrt);
        }
    }
    Ok(vrts)
}

/// Mosaic the time series of all bursts
pub fn mosaic_timeseries(cfg: &BatchConfig, bids: &[String]) -> ArdResult<Vec<PathBuf>> {
    log::info!("Mosaicking time-series layers");
    let out_dir = cfg.processing_dir.join("Mosaic").join("Timeseries");
    let ts_dirs: Vec<PathBuf> = bids
        .iter()
        .map(|bid| cfg.processing_dir.join(bid).join("Timeseries"))
        .collect();
    let mut vrts = Vec::new();
    for product in PRODUCT_LIST {
        if let Some(vrt) = mosaic::mosaic_timeseries(
            &cfg.mosaic_tool,
            &ts_dirs,
            product,
            &out_dir,
            &cfg.temp_dir,
            &cfg.params.mosaic,
        )? {
            vrts.push(vrt);
        }
    }
    Ok(vrts)
}

/// Mosaic the timescans of all bursts
pub fn mosaic_timescan(cfg: &BatchConfig, bids: &[String]) -> ArdResult<Option<PathBuf>> {
    log::info!("Mosaicking timescan layers");
    let tscan_dirs: Vec<PathBuf> = bids
        .iter()
        .map(|bid| cfg.processing_dir.join(bid).join("Timescan"))
        .collect();
    let products: Vec<String> = PRODUCT_LIST.iter().map(|p| p.to_string()).collect();
    let metrics: Vec<String> = timescan::Metric::parse_list(&cfg.params.time_scan.metrics)?
        .iter()
        .map(|m| m.name().to_string())
        .collect();
    mosaic::mosaic_timescan(
        &cfg.mosaic_tool,
        &tscan_dirs,
        &products,
        &metrics,
        &cfg.processing_dir.join("Mosaic").join("Timescan"),
        &cfg.temp_dir,
        &cfg.params.mosaic,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gpt::Gpt;
    use crate::io::raster;
    use crate::types::ProductType;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn config(dir: &Path) -> BatchConfig {
        let mut params = ArdParameters::template(ProductType::Slc, "OST-GTC").unwrap();
        params.single_ard.to_db = false;
        params.time_series.to_db = true;
        params.time_series.dtype_output = "float32".to_string();
        params.time_scan.metrics = vec!["avg".to_string(), "max".to_string()];
        params.time_scan.remove_outliers = false;
        BatchConfig {
            gpt: Gpt::new(dir.join("gpt"), 1),
            max_workers: 1,
            download_dir: dir.join("download"),
            data_mount: None,
            processing_dir: dir.join("processing"),
            temp_dir: dir.join("temp"),
            mosaic_tool: dir.join("mosaic"),
            params,
        }
    }

    #[test]
    fn test_timescan_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = config(dir.path()).params;
        assert_eq!(timescan_conversion("bs", &params).unwrap(), (true, None));
        assert_eq!(timescan_conversion("coh", &params).unwrap(), (false, None));

        params.time_series.to_db = false;
        params.time_series.dtype_output = "uint8".to_string();
        assert_eq!(timescan_conversion("bs", &params).unwrap(), (false, Some(OutputType::UInt8)));
        params.single_ard.to_db = true;
        assert_eq!(timescan_conversion("bs", &params).unwrap(), (true, Some(OutputType::UInt8)));
        assert_eq!(timescan_conversion("pol", &params).unwrap(), (false, None));
    }

    #[test]
    fn test_backscatter_timescan_averages_power() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let bid = "A117_IW1_7345".to_string();
        let ts_dir = cfg.processing_dir.join(&bid).join("Timeseries");
        std::fs::create_dir_all(&ts_dir).unwrap();
        let geo_transform = [10.0, 0.001, 0.0, 50.0, 0.0, -0.001];
        for (name, value) in [("01.20200112.bs.VV.tif", -10.0f32), ("02.20200124.bs.VV.tif", -20.0)] {
            raster::write_geotiff(
                ts_dir.join(name),
                &[Array2::from_elem((3, 4), value)],
                &[],
                &geo_transform,
                "",
                OutputType::Float32,
                Some(0.0),
            )
            .unwrap();
        }

        let vrts = timeseries_to_timescan(&cfg, &[bid.clone()]).unwrap();
        assert_eq!(vrts.len(), 1);
        let tscan_dir = cfg.processing_dir.join(&bid).join("Timescan");
        assert!(tscan_dir.join(".bs.VV.processed").exists());

        // (0.1 + 0.01) / 2 in power, not the -15 dB mean of the dB values
        let avg = raster::read_band(tscan_dir.join("01.bs.VV.avg.tif"), 1).unwrap();
        assert_relative_eq!(avg.data[[1, 2]], 10.0 * 0.055f32.log10(), epsilon = 1e-3);
        let max = raster::read_band(tscan_dir.join("02.bs.VV.max.tif"), 1).unwrap();
        assert_relative_eq!(max.data[[0, 0]], -10.0, epsilon = 1e-3);
    }

    #[test]
    fn test_product_list_splits() {
        assert_eq!(split_product("pol.Anisotropy"), ("pol", "Anisotropy"));
        assert_eq!(PRODUCT_LIST.iter().filter(|p| p.starts_with("coh.")).count(), 4);
    }

    #[test]
    fn test_burst_products_over_dates() {
        let dir = tempfile::tempdir().unwrap();
        let bid = dir.path().join("A117_IW1_7345");
        for (date, kind) in [("20200124", "bs"), ("20200112", "bs"), ("20200112", "coh")] {
            let date_dir = bid.join(date);
            std::fs::create_dir_all(&date_dir).unwrap();
            let stem = format!("{}_A117_IW1_7345_{}", date, kind);
            std::fs::write(date_dir.join(format!("{}.dim", stem)), "").unwrap();
            std::fs::create_dir_all(date_dir.join(format!("{}.data", stem))).unwrap();
        }
        let bs = burst_products(&bid, "bs").unwrap();
        assert_eq!(bs.len(), 2);
        assert!(bs[0].to_string_lossy().contains("20200112"));
        assert_eq!(burst_products(&bid, "coh").unwrap().len(), 1);
        assert!(burst_products(&bid, "pol").unwrap().is_empty());
    }
}
