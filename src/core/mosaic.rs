//! Mosaics of time-series and timescan layers across tracks or bursts,
//! produced by the external mosaicking tool.

use crate::core::gpt::run_command;
use crate::core::grd_to_ard::write_marker;
use crate::core::params::MosaicParams;
use crate::io::raster;
use crate::types::{ArdError, ArdResult};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Check file of a mosaic output
pub fn check_file(outfile: &Path) -> PathBuf {
    let name = outfile
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    outfile
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{}.processed", name))
}

/// Arguments of the mosaicking tool
pub fn mosaic_args(files: &[PathBuf], outfile: &Path, temp_dir: &Path, params: &MosaicParams) -> Vec<OsString> {
    let harmonization: &[&str] = if params.harmonization {
        &["-harmo.method", "band", "-harmo.cost", "rmse"]
    } else {
        &["-harmo.method", "none"]
    };
    let mut args: Vec<OsString> = ["-ram", "4000", "-progress", "1", "-comp.feather", "large"]
        .iter()
        .chain(harmonization)
        .map(OsString::from)
        .collect();
    args.push("-tmpdir".into());
    args.push(temp_dir.into());
    args.push("-interpolator".into());
    args.push("nn".into());
    args.push("-il".into());
    args.extend(files.iter().map(OsString::from));
    args.push("-out".into());
    args.push(outfile.into());
    args
}

/// Mosaic `files` into `outfile` unless its check file exists
pub fn mosaic(tool: &Path, files: &[PathBuf], outfile: &Path, temp_dir: &Path, params: &MosaicParams) -> ArdResult<PathBuf> {
    let check = check_file(outfile);
    if check.exists() && outfile.exists() {
        log::info!("{} already processed", outfile.display());
        return Ok(outfile.to_path_buf());
    }
    if let Some(parent) = outfile.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match files {
        [] => {
            return Err(ArdError::InvalidParameters(format!(
                "No layers to mosaic into {}",
                outfile.display()
            )))
        }
        [single] => {
            log::info!("Single layer for {}, copying {}", outfile.display(), single.display());
            std::fs::copy(single, outfile)?;
            write_marker(&check)?;
            return Ok(outfile.to_path_buf());
        }
        _ => {}
    }
    std::fs::create_dir_all(temp_dir)?;
    if params.cut_to_aoi {
        log::warn!("cut_to_aoi is not supported, {} keeps the full extent", outfile.display());
    }

    log::info!("Mosaicking {} layers into {}", files.len(), outfile.display());
    let logfile = crate::core::wrappers::with_suffix(&outfile.with_extension(""), ".errLog");
    let code = run_command(tool.as_os_str(), &mosaic_args(files, outfile, temp_dir, params), &logfile)?;
    if code != 0 {
        return Err(ArdError::Processing(format!(
            "Mosaicking exited with an error {}. See {} for details",
            code,
            logfile.display()
        )));
    }
    write_marker(&check)?;
    Ok(outfile.to_path_buf())
}

/// Output name of the time-series mosaic at 0-based `index`
pub fn ts_mosaic_name(index: usize, start: &str, end: &str, product: &str) -> String {
    if start == end {
        format!("{:02}.{}.{}.tif", index + 1, start, product)
    } else {
        format!("{:02}.{}-{}.{}.tif", index + 1, start, end, product)
    }
}

/// Date part of a time-series layer name `NN.{date}.{product}.tif`
fn layer_date(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    name.split('.').nth(1).map(str::to_string)
}

/// Mosaic the time series of `product` (e.g. `bs.VV`) over all `ts_dirs`.
/// The i-th layers of all directories form the i-th mosaic.
pub fn mosaic_timeseries(
    tool: &Path,
    ts_dirs: &[PathBuf],
    product: &str,
    out_dir: &Path,
    temp_dir: &Path,
    params: &MosaicParams,
) -> ArdResult<Option<PathBuf>> {
    let (product_name, band) = product.split_once('.').unwrap_or((product, ""));
    let mut per_dir = Vec::new();
    for dir in ts_dirs {
        if dir.is_dir() {
            let layers = crate::core::timeseries::ts_layers(dir, product_name, band)?;
            if !layers.is_empty() {
                per_dir.push(layers);
            }
        }
    }
    let Some(count) = per_dir.iter().map(Vec::len).min() else {
        return Ok(None);
    };
    let most = per_dir.iter().map(Vec::len).max().unwrap_or(count);
    if most != count {
        log::warn!(
            "Time series of {} have between {} and {} layers, mosaicking only the first {}",
            product,
            count,
            most,
            count
        );
    }

    let mut outfiles = Vec::with_capacity(count);
    for i in 0..count {
        let files: Vec<PathBuf> = per_dir.iter().map(|layers| layers[i].clone()).collect();
        let mut dates: Vec<String> = files.iter().filter_map(|f| layer_date(f)).collect();
        dates.sort();
        let (Some(start), Some(end)) = (dates.first(), dates.last()) else {
            continue;
        };
        let outfile = out_dir.join(ts_mosaic_name(i, start, end, product));
        outfiles.push(mosaic(tool, &files, &outfile, temp_dir, params)?);
    }
    if outfiles.is_empty() {
        return Ok(None);
    }

    let vrt = out_dir.join(format!("Timeseries_{}.vrt", product));
    raster::build_vrt(&vrt, &outfiles)?;
    Ok(Some(vrt))
}

/// Mosaic the timescan metrics of `products` over all `tscan_dirs` into
/// `{product}.{metric}.tif` and build `Timescan.vrt`
pub fn mosaic_timescan(
    tool: &Path,
    tscan_dirs: &[PathBuf],
    products: &[String],
    metrics: &[String],
    out_dir: &Path,
    temp_dir: &Path,
    params: &MosaicParams,
) -> ArdResult<Option<PathBuf>> {
    let mut outfiles = Vec::new();
    for product in products {
        for metric in metrics {
            let suffix = format!("{}.{}.tif", product, metric);
            let mut files = Vec::new();
            for dir in tscan_dirs.iter().filter(|d| d.is_dir()) {
                for entry in std::fs::read_dir(dir)? {
                    let path = entry?.path();
                    let matches = path
                        .file_name()
                        .map_or(false, |n| n.to_string_lossy().ends_with(&suffix));
                    if matches {
                        files.push(path);
                    }
                }
            }
            if files.is_empty() {
                continue;
            }
            files.sort();
            let outfile = out_dir.join(&suffix);
            outfiles.push(mosaic(tool, &files, &outfile, temp_dir, params)?);
        }
    }
    if outfiles.is_empty() {
        return Ok(None);
    }
    let vrt = out_dir.join("Timescan.vrt");
    raster::build_vrt(&vrt, &outfiles)?;
    Ok(Some(vrt))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(harmonization: bool) -> MosaicParams {
        MosaicParams {
            harmonization,
            production: false,
            cut_to_aoi: false,
        }
    }

    #[test]
    fn test_ts_mosaic_name() {
        assert_eq!(ts_mosaic_name(0, "20200112", "20200112", "bs.VV"), "01.20200112.bs.VV.tif");
        assert_eq!(
            ts_mosaic_name(2, "20200112", "20200118", "bs.VV"),
            "03.20200112-20200118.bs.VV.tif"
        );
    }

    #[test]
    fn test_check_file() {
        assert_eq!(
            check_file(Path::new("/p/Mosaic/Timescan/bs.VV.avg.tif")),
            PathBuf::from("/p/Mosaic/Timescan/.bs.VV.avg.processed")
        );
    }

    #[test]
    fn test_mosaic_args() {
        let files = vec![PathBuf::from("a.tif"), PathBuf::from("b.tif")];
        let args: Vec<String> = mosaic_args(&files, Path::new("out.tif"), Path::new("/tmp"), &params(false))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let il = args.iter().position(|a| a == "-il").unwrap();
        assert_eq!(&args[il + 1..il + 3], &["a.tif", "b.tif"]);
        assert_eq!(&args[args.len() - 2..], &["-out", "out.tif"]);
        assert!(args.windows(2).any(|w| w[0] == "-harmo.method" && w[1] == "none"));

        let harmonized = mosaic_args(&files, Path::new("out.tif"), Path::new("/tmp"), &params(true));
        assert!(harmonized.iter().any(|a| a == "rmse"));
    }

    #[cfg(unix)]
    #[test]
    fn test_mosaic_writes_check_file() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("mosaic");
        // touch the file following -out
        std::fs::write(
            &tool,
            "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-out\" ]; then touch \"$2\"; fi\n  shift\ndone\n",
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let outfile = dir.path().join("Mosaic").join("01.20200112.bs.VV.tif");
        let files = vec![dir.path().join("a.tif"), dir.path().join("b.tif")];
        let out = mosaic(&tool, &files, &outfile, dir.path(), &params(false)).unwrap();
        assert!(out.exists());
        assert!(check_file(&outfile).exists());
    }

    #[test]
    fn test_single_layer_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let layer = dir.path().join("A117").join("bs.VV.avg.tif");
        std::fs::create_dir_all(layer.parent().unwrap()).unwrap();
        std::fs::write(&layer, "layer").unwrap();

        // the tool does not exist, so it must not be called
        let tool = dir.path().join("missing_tool");
        let outfile = dir.path().join("Mosaic").join("bs.VV.avg.tif");
        let out = mosaic(&tool, &[layer], &outfile, dir.path(), &params(false)).unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "layer");
        assert!(check_file(&outfile).exists());

        assert!(mosaic(&tool, &[], &dir.path().join("empty.tif"), dir.path(), &params(false)).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_timeseries_mosaic_stops_at_the_shortest_series() {
        use crate::io::raster::OutputType;
        use ndarray::Array2;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("mosaic");
        // copy the first input to the file following -out
        std::fs::write(
            &tool,
            "#!/bin/sh\nfirst=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-il\" ]; then first=\"$2\"; fi\n  if [ \"$1\" = \"-out\" ]; then cp \"$first\" \"$2\"; fi\n  shift\ndone\n",
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let gt = [11.0, 0.001, 0.0, 48.0, 0.0, -0.001];
        let write = |track: &str, name: &str| {
            let ts_dir = dir.path().join(track).join("Timeseries");
            std::fs::create_dir_all(&ts_dir).unwrap();
            let data = Array2::from_elem((4, 4), -12.0f32);
            raster::write_geotiff(ts_dir.join(name), &[data], &[], &gt, "", OutputType::Float32, Some(0.0)).unwrap();
            ts_dir
        };
        let long = write("A117", "01.20200112.bs.VV.tif");
        write("A117", "02.20200124.bs.VV.tif");
        let short = write("D44", "01.20200114.bs.VV.tif");

        let out_dir = dir.path().join("Mosaic").join("Timeseries");
        let vrt = mosaic_timeseries(&tool, &[long, short], "bs.VV", &out_dir, dir.path(), &params(false))
            .unwrap()
            .unwrap();
        assert!(vrt.exists());
        assert!(out_dir.join("01.20200112-20200114.bs.VV.tif").exists());
        assert!(!out_dir.join("02.20200124.bs.VV.tif").exists());
        let tifs = std::fs::read_dir(&out_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().map_or(false, |x| x == "tif"))
            .count();
        assert_eq!(tifs, 1);
    }
}
