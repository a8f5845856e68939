//! GRD acquisition to backscatter ARD.
//!
//! One or more consecutive frames of the same acquisition are imported
//! (assembled and optionally subset), calibrated, multi-looked, filtered,
//! flattened, scaled and geocoded. Intermediate products live in the temp
//! directory and are deleted as soon as the next step has consumed them.

use crate::core::gpt::{step_logfile, Gpt};
use crate::core::params::ArdParameters;
use crate::core::wrappers::{self, data_dir, delete_dimap, dim_file, move_dimap};
use crate::io::raster;
use crate::types::{ArdError, ArdResult, Polarization};
use std::path::{Path, PathBuf};

/// Name of the marker written once an output directory is complete
pub const PROCESSED_MARKER: &str = ".processed";

/// Run a step and remove its partial output if it fails
fn step<F>(output: &Path, run: F) -> ArdResult<()>
where
    F: FnOnce() -> ArdResult<()>,
{
    run().map_err(|e| {
        if let Err(cleanup) = delete_dimap(output) {
            log::warn!("Could not remove {}: {}", output.display(), cleanup);
        }
        e
    })
}

/// Write a marker file stating the directory passed all checks
pub fn write_marker(path: &Path) -> ArdResult<()> {
    std::fs::write(path, "passed all tests \n")?;
    Ok(())
}

fn import(
    gpt: &Gpt,
    filelist: &[PathBuf],
    output_dir: &Path,
    file_id: &str,
    temp_dir: &Path,
    polarisation: &str,
    subset: Option<&str>,
) -> ArdResult<()> {
    let grd_import = temp_dir.join(format!("{}_imported", file_id));

    if filelist.len() > 1 {
        let mut frames = Vec::with_capacity(filelist.len());
        for file in filelist {
            let base = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let frame = temp_dir.join(format!("{}_imported", base));
            let logfile = output_dir.join(format!("{}.Import.errLog", base));
            step(&frame, || wrappers::grd_frame_import(gpt, file, &frame, &logfile, polarisation))?;
            frames.push(frame);
        }

        let headers: Vec<PathBuf> = frames.iter().map(|f| dim_file(f)).collect();
        let logfile = output_dir.join(format!("{}._slice_assembly.errLog", file_id));
        let assembled = step(&grd_import, || {
            wrappers::slice_assembly(gpt, &headers, &grd_import, &logfile, polarisation)
        });
        for frame in &frames {
            delete_dimap(frame)?;
        }
        assembled?;

        if let Some(region) = subset {
            let grd_subset = temp_dir.join(format!("{}_imported_subset", file_id));
            let result = step(&grd_subset, || {
                wrappers::subset_georegion(gpt, &dim_file(&grd_import), &grd_subset, &logfile, region)
            });
            delete_dimap(&grd_import)?;
            result?;
        }
    } else {
        let file = filelist
            .first()
            .ok_or_else(|| ArdError::InvalidParameters(format!("No input frames for {}", file_id)))?;
        let logfile = output_dir.join(format!("{}.Import.errLog", file_id));
        step(&grd_import, || match subset {
            None => wrappers::grd_frame_import(gpt, file, &grd_import, &logfile, polarisation),
            Some(region) => {
                wrappers::grd_frame_import_subset(gpt, file, &grd_import, region, &logfile, polarisation)
            }
        })?;
    }
    Ok(())
}

/// Process the frames of one acquisition into `{file_id}_BS.dim` in
/// `output_dir`.
///
/// Returns the backscatter product and the layover/shadow mask, or
/// `(None, None)` when the import yielded an empty product.
pub fn grd_to_ard(
    gpt: &Gpt,
    filelist: &[PathBuf],
    output_dir: &Path,
    file_id: &str,
    temp_dir: &Path,
    params: &ArdParameters,
    subset: Option<&str>,
) -> ArdResult<(Option<PathBuf>, Option<PathBuf>)> {
    let ard = &params.single_ard;
    let polarisation = ard.polarisation.replace(' ', "");
    std::fs::create_dir_all(output_dir)?;
    std::fs::create_dir_all(temp_dir)?;

    // 1 import
    import(gpt, filelist, output_dir, file_id, temp_dir, &polarisation, subset)?;

    // 2 border noise
    if ard.remove_border_noise && subset.is_none() {
        let data = data_dir(&temp_dir.join(format!("{}_imported", file_id)));
        for pol in Polarization::ALL {
            let image = data.join(format!("Intensity_{}.img", pol));
            if image.is_file() {
                log::info!("Remove border noise for {} band", pol);
                raster::remove_border_noise(&image)?;
            }
        }
    }

    let imported = ["_imported", "_imported_subset"]
        .iter()
        .map(|suffix| temp_dir.join(format!("{}{}", file_id, suffix)))
        .find(|stem| dim_file(stem).is_file());
    let Some(mut current) = imported else {
        log::info!("{} is an empty product", file_id);
        return Ok((None, None));
    };

    // 3 calibration
    let calibrated = temp_dir.join(format!("{}_cal", file_id));
    let logfile = step_logfile(output_dir, file_id, "Calibration");
    step(&calibrated, || {
        wrappers::calibration(gpt, &dim_file(&current), &calibrated, &logfile, ard.calibrate_to())
    })?;
    delete_dimap(&current)?;
    current = calibrated;

    // 4 multi-looking
    if ard.resolution >= 20 {
        let factor = ard.resolution / 10;
        let multi_looked = temp_dir.join(format!("{}_ml", file_id));
        let logfile = step_logfile(output_dir, file_id, "multilook");
        step(&multi_looked, || {
            wrappers::multi_look(gpt, &dim_file(&current), &multi_looked, &logfile, factor, factor)
        })?;
        delete_dimap(&current)?;
        current = multi_looked;
    }

    // 5 layover/shadow mask
    let mut out_ls_mask = None;
    if ard.create_ls_mask {
        let ls_mask = temp_dir.join(format!("{}.ls_mask", file_id));
        let logfile = step_logfile(output_dir, file_id, "ls_mask");
        step(&ls_mask, || wrappers::ls_mask(gpt, &dim_file(&current), &ls_mask, &logfile, ard))?;
        out_ls_mask = Some(move_dimap(&ls_mask, &output_dir.join(format!("{}_LS", file_id)))?);
    }

    // 6 speckle filter
    if ard.remove_speckle {
        let filtered = temp_dir.join(format!("{}_spk", file_id));
        let logfile = step_logfile(output_dir, file_id, "Speckle");
        step(&filtered, || {
            wrappers::speckle_filter(gpt, &dim_file(&current), &filtered, &logfile, &ard.speckle_filter)
        })?;
        delete_dimap(&current)?;
        current = filtered;
    }

    // 7 terrain flattening
    if ard.is_rtc() {
        let flattened = temp_dir.join(format!("{}_flat", file_id));
        let logfile = step_logfile(output_dir, file_id, "tf");
        step(&flattened, || {
            wrappers::terrain_flattening(gpt, &dim_file(&current), &flattened, &logfile, &ard.dem)
        })?;
        delete_dimap(&current)?;
        current = flattened;
    }

    // 8 dB
    if ard.to_db {
        let db_scaled = temp_dir.join(format!("{}_db", file_id));
        let logfile = step_logfile(output_dir, file_id, "db");
        step(&db_scaled, || {
            wrappers::linear_to_db(gpt, &dim_file(&current), &db_scaled, &logfile)
        })?;
        delete_dimap(&current)?;
        current = db_scaled;
    }

    // 9 geocoding
    let geocoded = temp_dir.join(format!("{}_bs", file_id));
    let logfile = output_dir.join(format!("{}_bs.errLog", file_id));
    step(&geocoded, || {
        wrappers::geocode(gpt, &dim_file(&current), &geocoded, &logfile, ard)
    })?;
    delete_dimap(&current)?;

    // 10 move to the output directory
    let out_final = move_dimap(&geocoded, &output_dir.join(format!("{}_BS", file_id)))?;
    write_marker(&output_dir.join(PROCESSED_MARKER))?;
    log::info!("Finished backscatter processing of {}", file_id);

    Ok((Some(out_final), out_ls_mask))
}
