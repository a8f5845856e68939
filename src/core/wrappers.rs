//! Single toolbox steps shared by the GRD, burst and time-series workflows.
//!
//! Inputs are BEAM-DIMAP headers (`*.dim`), outputs are given as stems the
//! toolbox extends with `.dim` and `.data`. Every step is repeated under
//! [`RetryPolicy::GPT`] when the toolbox exits with an error.

use crate::core::gpt::{Gpt, GptCommand};
use crate::core::graph::{self, Graph};
use crate::core::params::{DemParams, SingleArd, SpeckleFilterParams};
use crate::retry::{retry, RetryPolicy};
use crate::types::{ArdError, ArdResult};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// `stem` with a suffix appended, keeping any dots already in the name
pub fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = stem.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Header file of a product stem
pub fn dim_file(stem: &Path) -> PathBuf {
    with_suffix(stem, ".dim")
}

/// Data directory of a product stem
pub fn data_dir(stem: &Path) -> PathBuf {
    with_suffix(stem, ".data")
}

/// Stem of a product given by its header file
pub fn dimap_stem(dim: &Path) -> PathBuf {
    match dim.extension() {
        Some(ext) if ext == "dim" => dim.with_extension(""),
        _ => dim.to_path_buf(),
    }
}

/// Remove both parts of a BEAM-DIMAP product; missing parts are ignored
pub fn delete_dimap(stem: &Path) -> ArdResult<()> {
    let dim = dim_file(stem);
    let data = data_dir(stem);
    if dim.exists() {
        std::fs::remove_file(&dim)?;
    }
    if data.exists() {
        std::fs::remove_dir_all(&data)?;
    }
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> ArdResult<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn move_path(from: &Path, to: &Path) -> ArdResult<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // different file systems
    if from.is_dir() {
        copy_dir(from, to)?;
        std::fs::remove_dir_all(from)?;
    } else {
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}

/// Move a product to a new stem, replacing whatever is there
pub fn move_dimap(from: &Path, to: &Path) -> ArdResult<PathBuf> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    delete_dimap(to)?;
    move_path(&dim_file(from), &dim_file(to))?;
    if data_dir(from).exists() {
        move_path(&data_dir(from), &data_dir(to))?;
    }
    Ok(dim_file(to))
}

/// Sanity check of a toolbox output: header present and every band image non-empty
pub fn check_out_dimap(stem: &Path) -> ArdResult<()> {
    let dim = dim_file(stem);
    if !dim.is_file() {
        return Err(ArdError::Processing(format!("Missing product {}", dim.display())));
    }
    let data = data_dir(stem);
    let mut images = 0;
    for entry in std::fs::read_dir(&data)? {
        let path = entry?.path();
        if path.extension().map_or(false, |e| e == "img") {
            images += 1;
            if std::fs::metadata(&path)?.len() == 0 {
                return Err(ArdError::Processing(format!("Empty band image {}", path.display())));
            }
            if !path.with_extension("hdr").is_file() {
                return Err(ArdError::Processing(format!("Missing header for {}", path.display())));
            }
        }
    }
    if images == 0 {
        return Err(ArdError::Processing(format!("No band images in {}", data.display())));
    }
    Ok(())
}

/// Run a command, retrying toolbox failures
pub fn run_step(command: &GptCommand, logfile: &Path) -> ArdResult<()> {
    retry(&RetryPolicy::GPT, ArdError::is_gpt_runtime, || command.run(logfile))
}

/// Write `graph` beside `logfile` and run it
pub fn run_graph(gpt: &Gpt, graph: &Graph, name: &str, logfile: &Path) -> ArdResult<()> {
    let dir = logfile.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let file = tempfile::Builder::new()
        .prefix(&format!("{}_", name))
        .suffix(".xml")
        .tempfile_in(dir)?;
    graph.write(file.path())?;
    run_step(&gpt.graph(file.path()), logfile)
}

/// Import one GRD frame: thermal noise removal and precise orbits
pub fn grd_frame_import(gpt: &Gpt, infile: &Path, outfile: &Path, logfile: &Path, polarisation: &str) -> ArdResult<()> {
    log::info!(
        "Importing {} by applying precise orbit file and removing thermal noise",
        infile.display()
    );
    let graph = graph::grd_import(infile, &dim_file(outfile), polarisation, None);
    run_graph(gpt, &graph, "grd_import", logfile)?;
    log::info!("Successfully imported product");
    Ok(())
}

/// Import one GRD frame cut to a WKT region
pub fn grd_frame_import_subset(
    gpt: &Gpt,
    infile: &Path,
    outfile: &Path,
    georegion: &str,
    logfile: &Path,
    polarisation: &str,
) -> ArdResult<()> {
    log::info!(
        "Importing {} by applying precise orbit file, removing thermal noise and subsetting",
        infile.display()
    );
    let graph = graph::grd_import(infile, &dim_file(outfile), polarisation, Some(georegion));
    run_graph(gpt, &graph, "grd_import_subset", logfile)?;
    log::info!("Successfully imported product");
    Ok(())
}

/// Assemble consecutive frames of one acquisition
pub fn slice_assembly(gpt: &Gpt, infiles: &[PathBuf], outfile: &Path, logfile: &Path, polarisation: &str) -> ArdResult<()> {
    log::info!("Assembling {} consecutive frames", infiles.len());
    let mut command = gpt
        .operator("SliceAssembly")
        .param("selectedPolarisations", polarisation)
        .target(outfile);
    for file in infiles {
        command = command.source(file);
    }
    run_step(&command, logfile)?;
    log::info!("Successfully assembled products");
    Ok(())
}

pub fn subset_georegion(gpt: &Gpt, infile: &Path, outfile: &Path, logfile: &Path, georegion: &str) -> ArdResult<()> {
    log::info!("Subsetting imported imagery");
    let command = gpt
        .operator("Subset")
        .param("copyMetadata", true)
        .param("geoRegion", georegion)
        .target(outfile)
        .source(infile);
    run_step(&command, logfile)
}

pub fn calibration(gpt: &Gpt, infile: &Path, outfile: &Path, logfile: &Path, calibrate_to: &str) -> ArdResult<()> {
    log::info!("Calibrating the product to {}", calibrate_to);
    let command = gpt
        .operator("Calibration")
        .param("outputBetaBand", calibrate_to == "beta0")
        .param("outputGammaBand", calibrate_to == "gamma0")
        .param("outputSigmaBand", calibrate_to == "sigma0")
        .target(outfile)
        .source(infile);
    run_step(&command, logfile)?;
    log::info!("Calibration to {} successful", calibrate_to);
    Ok(())
}

pub fn multi_look(gpt: &Gpt, infile: &Path, outfile: &Path, logfile: &Path, rg_looks: u32, az_looks: u32) -> ArdResult<()> {
    log::info!(
        "Multi-looking the image with {} looks in azimuth and {} looks in range",
        az_looks,
        rg_looks
    );
    let command = gpt
        .operator("Multilook")
        .param("nAzLooks", az_looks)
        .param("nRgLooks", rg_looks)
        .target(outfile)
        .source(infile);
    run_step(&command, logfile)
}

fn with_speckle_params(command: GptCommand, params: &SpeckleFilterParams) -> GptCommand {
    command
        .param("estimateENL", params.estimate_enl)
        .param("anSize", params.pan_size)
        .param("dampingFactor", params.damping)
        .param("enl", params.enl)
        .param("filter", &params.filter)
        .param("filterSizeX", params.filter_x_size)
        .param("filterSizeY", params.filter_y_size)
        .param("numLooksStr", params.num_of_looks)
        .param("sigmaStr", params.sigma)
        .param("targetWindowSizeStr", &params.target_window_size)
        .param("windowSize", &params.window_size)
}

pub fn speckle_filter(
    gpt: &Gpt,
    infile: &Path,
    outfile: &Path,
    logfile: &Path,
    params: &SpeckleFilterParams,
) -> ArdResult<()> {
    log::info!("Applying {} speckle filter", params.filter);
    let command = with_speckle_params(gpt.operator("Speckle-Filter"), params)
        .target(outfile)
        .source(infile);
    run_step(&command, logfile)
}

/// Multi-temporal speckle filter over a stack
pub fn mt_speckle_filter(
    gpt: &Gpt,
    in_stack: &Path,
    out_stack: &Path,
    logfile: &Path,
    params: &SpeckleFilterParams,
) -> ArdResult<()> {
    log::info!("Applying multi-temporal speckle filtering");
    let command = with_speckle_params(gpt.operator("Multi-Temporal-Speckle-Filter"), params)
        .target(out_stack)
        .source(in_stack);
    run_step(&command, logfile)
}

pub fn linear_to_db(gpt: &Gpt, infile: &Path, outfile: &Path, logfile: &Path) -> ArdResult<()> {
    log::info!("Converting the image to dB-scale");
    let command = gpt.operator("LinearToFromdB").target(outfile).source(infile);
    run_step(&command, logfile)
}

fn with_dem(command: GptCommand, dem: &DemParams) -> GptCommand {
    command
        .param("demName", &dem.dem_name)
        .param("demResamplingMethod", &dem.dem_resampling)
        .param("externalDEMFile", &dem.dem_file)
        .param("externalDEMNoDataValue", dem.dem_nodata)
}

pub fn terrain_flattening(gpt: &Gpt, infile: &Path, outfile: &Path, logfile: &Path, dem: &DemParams) -> ArdResult<()> {
    log::info!("Applying terrain flattening");
    let command = with_dem(gpt.operator("Terrain-Flattening").cache("256M"), dem)
        .param("additionalOverlap", 0.1)
        .param("oversamplingMultiple", 1.5)
        .target(outfile)
        .source(infile);
    run_step(&command, logfile)
}

pub fn terrain_correction(
    gpt: &Gpt,
    infile: &Path,
    outfile: &Path,
    logfile: &Path,
    resolution: u32,
    dem: &DemParams,
) -> ArdResult<()> {
    log::info!("Geocoding with {} at {} m", dem.dem_name, resolution);
    let command = with_dem(gpt.operator("Terrain-Correction"), dem)
        .param("externalDEMApplyEGM", dem.egm_correction)
        .param("imgResamplingMethod", &dem.image_resampling)
        .param("pixelSpacingInMeter", resolution)
        .target(outfile)
        .source(infile);
    run_step(&command, logfile)
}

/// Geocoding on the ellipsoid, used where no DEM coverage exists
pub fn ellipsoid_correction(gpt: &Gpt, infile: &Path, outfile: &Path, logfile: &Path, dem: &DemParams) -> ArdResult<()> {
    log::info!("Geocoding on the ellipsoid");
    let command = gpt
        .operator("Ellipsoid-Correction-GG")
        .param("imgResamplingMethod", &dem.image_resampling)
        .param("mapProjection", &dem.out_projection)
        .target(outfile)
        .source(infile);
    run_step(&command, logfile)
}

/// Geocoding as configured by `single_ARD.geocoding`
pub fn geocode(gpt: &Gpt, infile: &Path, outfile: &Path, logfile: &Path, ard: &SingleArd) -> ArdResult<()> {
    if ard.geocoding == "ellipsoid" {
        ellipsoid_correction(gpt, infile, outfile, logfile, &ard.dem)
    } else {
        terrain_correction(gpt, infile, outfile, logfile, ard.resolution, &ard.dem)
    }
}

/// Layover/shadow mask at twice the output resolution
pub fn ls_mask(gpt: &Gpt, infile: &Path, outfile: &Path, logfile: &Path, ard: &SingleArd) -> ArdResult<()> {
    log::info!("Creating the layover/shadow mask");
    let graph = graph::ls_map(
        infile,
        &dim_file(outfile),
        ard.resolution * 2,
        &ard.dem,
        "NEAREST_NEIGHBOUR",
    );
    run_graph(gpt, &graph, "ls_map", logfile)?;
    log::info!("Successfully created a layover/shadow mask");
    Ok(())
}

/// Stack the bands matching `band_pattern` of several products
pub fn create_stack(gpt: &Gpt, infiles: &[PathBuf], out_stack: &Path, logfile: &Path, band_pattern: &str) -> ArdResult<()> {
    let inputs: Vec<&Path> = infiles.iter().map(PathBuf::as_path).collect();
    let graph = graph::stack(&inputs, &dim_file(out_stack), band_pattern);
    run_graph(gpt, &graph, "stacking", logfile)?;
    log::info!("Successfully created multi-temporal stack");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_product(stem: &Path, bands: &[&str]) {
        std::fs::write(dim_file(stem), "<Dimap_Document/>").unwrap();
        std::fs::create_dir_all(data_dir(stem)).unwrap();
        for band in bands {
            std::fs::write(data_dir(stem).join(format!("{}.img", band)), [1u8, 2, 3, 4]).unwrap();
            std::fs::write(data_dir(stem).join(format!("{}.hdr", band)), "ENVI").unwrap();
        }
    }

    #[test]
    fn test_suffix_keeps_dots() {
        let stem = Path::new("/tmp/20200101_117.ls_mask");
        assert_eq!(dim_file(stem), PathBuf::from("/tmp/20200101_117.ls_mask.dim"));
        assert_eq!(data_dir(stem), PathBuf::from("/tmp/20200101_117.ls_mask.data"));
        assert_eq!(dimap_stem(&dim_file(stem)), stem);
    }

    #[test]
    fn test_move_and_delete_dimap() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a_bs");
        let to = dir.path().join("out").join("a_BS");
        fake_product(&from, &["Gamma0_VV"]);
        fake_product(&to, &["old"]);

        let moved = move_dimap(&from, &to).unwrap();
        assert_eq!(moved, dim_file(&to));
        assert!(!dim_file(&from).exists());
        assert!(data_dir(&to).join("Gamma0_VV.img").exists());
        assert!(!data_dir(&to).join("old.img").exists());

        delete_dimap(&to).unwrap();
        assert!(!dim_file(&to).exists());
        assert!(!data_dir(&to).exists());
        delete_dimap(&to).unwrap();
    }

    #[test]
    fn test_check_out_dimap() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("p");
        assert!(check_out_dimap(&stem).is_err());

        fake_product(&stem, &["Sigma0_VV", "Sigma0_VH"]);
        check_out_dimap(&stem).unwrap();

        std::fs::write(data_dir(&stem).join("Sigma0_VH.img"), b"").unwrap();
        assert!(check_out_dimap(&stem).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_step_retries_then_fails() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("calls");
        let fake = dir.path().join("gpt");
        std::fs::write(
            &fake,
            format!("#!/bin/sh\necho x >> {}\nexit 1\n", counter.display()),
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let gpt = Gpt::new(&fake, 1);
        let log = dir.path().join("x.db.errLog");
        let err = linear_to_db(&gpt, Path::new("in.dim"), Path::new("out"), &log).unwrap_err();
        assert!(err.is_gpt_runtime());
        let calls = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(calls.lines().count(), RetryPolicy::GPT.tries as usize);
    }
}
