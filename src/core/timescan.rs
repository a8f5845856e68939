//! Per-pixel temporal statistics over time-series layers.

use crate::io::raster::{self, OutputType};
use crate::types::{ArdError, ArdResult};
use ndarray::Array2;
use std::path::{Path, PathBuf};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A statistic computed over the valid samples of a pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Avg,
    Max,
    Min,
    Std,
    Cov,
    Median,
    P95,
    P5,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Avg => "avg",
            Metric::Max => "max",
            Metric::Min => "min",
            Metric::Std => "std",
            Metric::Cov => "cov",
            Metric::Median => "median",
            Metric::P95 => "p95",
            Metric::P5 => "p5",
        }
    }

    /// Metrics that stay in the unit of the samples
    fn is_level(&self) -> bool {
        !matches!(self, Metric::Std | Metric::Cov)
    }

    /// Parse configured metric names; `percentiles` expands to p95 and p5
    pub fn parse_list(names: &[String]) -> ArdResult<Vec<Metric>> {
        let mut metrics = Vec::with_capacity(names.len() + 1);
        for name in names {
            match name.as_str() {
                "avg" => metrics.push(Metric::Avg),
                "max" => metrics.push(Metric::Max),
                "min" => metrics.push(Metric::Min),
                "std" => metrics.push(Metric::Std),
                "cov" => metrics.push(Metric::Cov),
                "median" => metrics.push(Metric::Median),
                "percentiles" => metrics.extend([Metric::P95, Metric::P5]),
                "harmonics" => log::warn!("Harmonics are not supported and will be skipped"),
                other => {
                    return Err(ArdError::InvalidParameters(format!("Unknown timescan metric {}", other)))
                }
            }
        }
        Ok(metrics)
    }
}

/// Linear interpolation between closest ranks of sorted samples
fn percentile(sorted: &[f32], q: f32) -> f32 {
    if sorted.is_empty() {
        return f32::NAN;
    }
    let rank = q / 100.0 * (sorted.len() - 1) as f32;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f32;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

fn mean_std(samples: &[f32]) -> (f32, f32) {
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    let var = samples.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (mean, var.sqrt())
}

/// Statistics of one pixel's samples in the order of `metrics`. Zero and
/// NaN samples are nodata; a pixel without valid samples yields NaN.
pub fn pixel_metrics(samples: &[f32], metrics: &[Metric], to_power: bool, remove_outliers: bool) -> Vec<f32> {
    let mut valid: Vec<f32> = samples
        .iter()
        .copied()
        .filter(|v| *v != 0.0 && !v.is_nan())
        .map(|v| if to_power { 10f32.powf(v / 10.0) } else { v })
        .collect();

    if remove_outliers && valid.len() > 2 {
        let (mean, std) = mean_std(&valid);
        valid.retain(|v| (v - mean).abs() <= 3.0 * std);
    }
    if valid.is_empty() {
        return vec![f32::NAN; metrics.len()];
    }

    let (mean, std) = mean_std(&valid);
    valid.sort_by(f32::total_cmp);

    metrics
        .iter()
        .map(|metric| {
            let value = match metric {
                Metric::Avg => mean,
                Metric::Max => valid[valid.len() - 1],
                Metric::Min => valid[0],
                Metric::Std => std,
                Metric::Cov => {
                    if mean == 0.0 {
                        f32::NAN
                    } else {
                        std / mean
                    }
                }
                Metric::Median => percentile(&valid, 50.0),
                Metric::P95 => percentile(&valid, 95.0),
                Metric::P5 => percentile(&valid, 5.0),
            };
            if to_power && metric.is_level() {
                10.0 * value.max(1e-13).log10()
            } else {
                value
            }
        })
        .collect()
}

/// Compute the temporal metrics of `layers` and write `{out_prefix}.{metric}.tif`.
///
/// `rescale` undoes the integer stretch of backscatter layers before the
/// statistics; `to_power` averages dB values in the power domain.
pub fn mt_metrics(
    layers: &[PathBuf],
    out_prefix: &Path,
    metrics: &[String],
    to_power: bool,
    rescale: Option<OutputType>,
    remove_outliers: bool,
) -> ArdResult<Vec<PathBuf>> {
    let metrics = Metric::parse_list(metrics)?;
    if layers.is_empty() || metrics.is_empty() {
        return Ok(Vec::new());
    }

    let mut reference = None;
    let mut cube: Vec<Array2<f32>> = Vec::with_capacity(layers.len());
    for layer in layers {
        let band = raster::read_band(layer, 1)?;
        let data = match rescale {
            Some(dtype) if dtype != OutputType::Float32 => {
                let mut data = raster::rescale_to_float(&band.data, dtype)?;
                data.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v });
                data
            }
            _ => band.data,
        };
        if let Some(first) = cube.first() {
            if first.dim() != data.dim() {
                return Err(ArdError::Processing(format!(
                    "{} has shape {:?}, expected {:?}",
                    layer.display(),
                    data.dim(),
                    first.dim()
                )));
            }
        }
        if reference.is_none() {
            reference = Some((band.geo_transform, band.projection));
        }
        cube.push(data);
    }
    let (geo_transform, projection) =
        reference.ok_or_else(|| ArdError::Processing("No timescan input".to_string()))?;
    let (height, width) = cube[0].dim();
    log::info!(
        "Calculating {} timescan metrics over {} layers of {}x{}",
        metrics.len(),
        cube.len(),
        width,
        height
    );

    let compute = |pixel: usize| {
        let (row, col) = (pixel / width, pixel % width);
        let samples: Vec<f32> = cube.iter().map(|layer| layer[[row, col]]).collect();
        pixel_metrics(&samples, &metrics, to_power, remove_outliers)
    };
    #[cfg(feature = "parallel")]
    let values: Vec<Vec<f32>> = (0..height * width).into_par_iter().map(compute).collect();
    #[cfg(not(feature = "parallel"))]
    let values: Vec<Vec<f32>> = (0..height * width).map(compute).collect();

    let mut outputs = Vec::with_capacity(metrics.len());
    for (m, metric) in metrics.iter().enumerate() {
        let data = Array2::from_shape_fn((height, width), |(row, col)| values[row * width + col][m]);
        let outfile = crate::core::wrappers::with_suffix(out_prefix, &format!(".{}.tif", metric.name()));
        raster::write_geotiff(
            &outfile,
            &[data],
            &[metric.name().to_string()],
            &geo_transform,
            &projection,
            OutputType::Float32,
            Some(0.0),
        )?;
        outputs.push(outfile);
    }
    Ok(outputs)
}

/// Number the timescan products in `timescan_dir` in the order of
/// `products` and build `Timescan.vrt` over them
pub fn create_tscan_vrt(timescan_dir: &Path, products: &[String]) -> ArdResult<Option<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(timescan_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |e| e == "tif"))
        .collect();
    files.sort();

    let unnumbered = |path: &Path| -> String {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match name.split_once('.') {
            Some((num, rest)) if num.len() == 2 && num.chars().all(|c| c.is_ascii_digit()) => rest.to_string(),
            _ => name,
        }
    };

    let mut ordered = Vec::new();
    for product in products {
        let prefix = format!("{}.", product);
        for file in &files {
            let name = unnumbered(file);
            if name.starts_with(&prefix) {
                let target = timescan_dir.join(format!("{:02}.{}", ordered.len() + 1, name));
                if *file != target {
                    std::fs::rename(file, &target)?;
                }
                ordered.push(target);
            }
        }
    }
    if ordered.is_empty() {
        return Ok(None);
    }

    let vrt = timescan_dir.join("Timescan.vrt");
    raster::build_vrt(&vrt, &ordered)?;
    Ok(Some(vrt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_list() {
        let names: Vec<String> = ["avg", "percentiles", "harmonics"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            Metric::parse_list(&names).unwrap(),
            vec![Metric::Avg, Metric::P95, Metric::P5]
        );
        assert!(Metric::parse_list(&["mode".to_string()]).is_err());
    }

    #[test]
    fn test_pixel_metrics_ignores_nodata() {
        let metrics = [Metric::Avg, Metric::Max, Metric::Min, Metric::Median, Metric::Std];
        let values = pixel_metrics(&[0.0, 1.0, 2.0, f32::NAN, 3.0], &metrics, false, false);
        assert_relative_eq!(values[0], 2.0);
        assert_relative_eq!(values[1], 3.0);
        assert_relative_eq!(values[2], 1.0);
        assert_relative_eq!(values[3], 2.0);
        assert_relative_eq!(values[4], (2.0f32 / 3.0).sqrt(), epsilon = 1e-6);

        let empty = pixel_metrics(&[0.0, f32::NAN], &metrics, false, false);
        assert!(empty.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_percentiles_interpolate() {
        let samples: Vec<f32> = (1..=11).map(|v| v as f32).collect();
        let values = pixel_metrics(&samples, &[Metric::P95, Metric::P5], false, false);
        assert_relative_eq!(values[0], 10.5, epsilon = 1e-5);
        assert_relative_eq!(values[1], 1.5, epsilon = 1e-5);
    }

    #[test]
    fn test_power_domain_average() {
        // -10 dB and 0 dB average to 0.55 in power
        let values = pixel_metrics(&[-10.0, 0.0], &[Metric::Avg, Metric::Std], true, false);
        assert_relative_eq!(values[0], 10.0 * 0.55f32.log10(), epsilon = 1e-4);
        assert_relative_eq!(values[1], 0.45, epsilon = 1e-5);
    }

    #[test]
    fn test_outlier_removal() {
        let mut samples = vec![1.0f32; 20];
        samples.push(100.0);
        let values = pixel_metrics(&samples, &[Metric::Max], false, true);
        assert_relative_eq!(values[0], 1.0);
    }

    #[test]
    fn test_create_tscan_vrt_numbers_products() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["bs.VV.avg.tif", "bs.VV.max.tif", "bs.VH.avg.tif"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let products = vec!["bs.VV".to_string(), "bs.VH".to_string()];
        // the empty files are not readable rasters
        assert!(create_tscan_vrt(dir.path(), &products).is_err());
        assert!(dir.path().join("01.bs.VV.avg.tif").exists());
        assert!(dir.path().join("02.bs.VV.max.tif").exists());
        assert!(dir.path().join("03.bs.VH.avg.tif").exists());
    }
}
