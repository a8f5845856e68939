//! Single burst to backscatter, coherence and polarimetric ARD layers.

use crate::core::gpt::Gpt;
use crate::core::grd_to_ard::write_marker;
use crate::core::params::{ArdParameters, SingleArd};
use crate::core::slc_wrappers as slc;
use crate::core::wrappers::{self, check_out_dimap, delete_dimap, dim_file, dimap_stem, move_dimap};
use crate::io::BurstJob;
use crate::types::{ArdError, ArdResult};
use std::path::{Path, PathBuf};

pub const BS_MARKER: &str = ".bs.processed";
pub const POL_MARKER: &str = ".pol.processed";
pub const COH_MARKER: &str = ".coh.processed";

/// Remove a partially written product, keeping the error of the step that failed
fn discard_partial(stem: &Path) {
    if let Err(e) = delete_dimap(stem) {
        log::warn!("Could not remove partial product {}: {}", stem.display(), e);
    }
}

/// Products of one burst and date
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BurstOutputs {
    pub bs: Option<PathBuf>,
    pub ls: Option<PathBuf>,
    pub coh: Option<PathBuf>,
    pub pol: Option<PathBuf>,
}

fn scratch(temp_dir: &Path) -> ArdResult<tempfile::TempDir> {
    std::fs::create_dir_all(temp_dir)?;
    Ok(tempfile::Builder::new().prefix("burst_").tempdir_in(temp_dir)?)
}

/// A failed check is logged, the product is kept
fn check_or_warn(stem: &Path) {
    if let Err(e) = check_out_dimap(stem) {
        log::warn!("{}", e);
    }
}

/// Dual-pol H-A-Alpha decomposition, geocoded to `{prefix}_pol`
pub fn create_polarimetric_layers(
    gpt: &Gpt,
    import_file: &Path,
    out_dir: &Path,
    prefix: &str,
    ard: &SingleArd,
    temp_dir: &Path,
) -> ArdResult<PathBuf> {
    let temp = scratch(temp_dir)?;

    let out_haa = temp.path().join(format!("{}_h", prefix));
    let haa_log = out_dir.join(format!("{}_haa.err_log", prefix));
    let haa = slc::ha_alpha(gpt, import_file, &out_haa, &haa_log, ard)?;

    let out_htc = temp.path().join(format!("{}_pol", prefix));
    let tc_log = out_dir.join(format!("{}_haa_tc.err_log", prefix));
    wrappers::geocode(gpt, &haa, &out_htc, &tc_log, ard)?;
    check_or_warn(&out_htc);

    let out = move_dimap(&out_htc, &out_dir.join(format!("{}_pol", prefix)))?;
    write_marker(&out_dir.join(POL_MARKER))?;
    Ok(out)
}

/// Calibrated, optionally filtered and dB-scaled backscatter geocoded to
/// `{prefix}_bs`, plus the layover/shadow mask `{prefix}_LS` when requested
pub fn create_backscatter_layers(
    gpt: &Gpt,
    import_file: &Path,
    out_dir: &Path,
    prefix: &str,
    ard: &SingleArd,
    temp_dir: &Path,
) -> ArdResult<(PathBuf, Option<PathBuf>)> {
    let temp = scratch(temp_dir)?;

    let out_cal = temp.path().join(format!("{}_cal", prefix));
    let cal_log = out_dir.join(format!("{}_cal.err_log", prefix));
    let mut current = dimap_stem(&slc::calibration(gpt, import_file, &out_cal, &cal_log, ard)?);

    if ard.remove_speckle {
        let filtered = temp.path().join(format!("{}_speckle_import", prefix));
        let log = out_dir.join(format!("{}_speckle.err_log", prefix));
        wrappers::speckle_filter(gpt, &dim_file(&current), &filtered, &log, &ard.speckle_filter)?;
        delete_dimap(&current)?;
        current = filtered;
    }

    if ard.to_db {
        let db = temp.path().join(format!("{}_cal_db", prefix));
        let log = out_dir.join(format!("{}_cal_db.err_log", prefix));
        wrappers::linear_to_db(gpt, &dim_file(&current), &db, &log)?;
        delete_dimap(&current)?;
        current = db;
    }

    let out_tc = temp.path().join(format!("{}_bs", prefix));
    let tc_log = out_dir.join(format!("{}_bs_tc.err_log", prefix));
    wrappers::geocode(gpt, &dim_file(&current), &out_tc, &tc_log, ard)?;
    check_or_warn(&out_tc);
    let out_bs = move_dimap(&out_tc, &out_dir.join(format!("{}_bs", prefix)))?;

    let out_ls = if ard.create_ls_mask {
        let ls = temp.path().join(format!("{}_LS", prefix));
        let log = out_dir.join(format!("{}_LS.err_log", prefix));
        wrappers::ls_mask(gpt, &dim_file(&current), &ls, &log, ard)?;
        check_or_warn(&ls);
        Some(move_dimap(&ls, &out_dir.join(format!("{}_LS", prefix)))?)
    } else {
        None
    };

    write_marker(&out_dir.join(BS_MARKER))?;
    Ok((out_bs, out_ls))
}

/// Coherence between a master and its following slave, geocoded to `{prefix}_coh`.
/// The master import is consumed.
pub fn create_coherence_layers(
    gpt: &Gpt,
    master_import: &Path,
    slave_import: &Path,
    out_dir: &Path,
    prefix: &str,
    ard: &SingleArd,
    temp_dir: &Path,
) -> ArdResult<PathBuf> {
    let temp = scratch(temp_dir)?;

    let out_coreg = temp.path().join(format!("{}_coreg", prefix));
    let coreg_log = out_dir.join(format!("{}_coreg.err_log", prefix));
    let coreg = slc::coreg(gpt, master_import, slave_import, &out_coreg, &coreg_log, ard)?;
    delete_dimap(&dimap_stem(master_import))?;

    let out_coh = temp.path().join(format!("{}_coherence", prefix));
    let coh_log = out_dir.join(format!("{}_coh.err_log", prefix));
    let coh = slc::coherence(gpt, &coreg, &out_coh, &coh_log, ard)?;
    delete_dimap(&out_coreg)?;

    let out_tc = temp.path().join(format!("{}_coh", prefix));
    let tc_log = out_dir.join(format!("{}_coh_tc.err_log", prefix));
    wrappers::geocode(gpt, &coh, &out_tc, &tc_log, ard)?;
    delete_dimap(&out_coh)?;
    check_or_warn(&out_tc);

    let out = move_dimap(&out_tc, &out_dir.join(format!("{}_coh", prefix)))?;
    write_marker(&out_dir.join(COH_MARKER))?;
    Ok(out)
}

/// Process one burst job. Layers whose marker already exists are skipped,
/// their expected paths are still reported.
pub fn burst_to_ard(gpt: &Gpt, job: &BurstJob, params: &ArdParameters, temp_dir: &Path) -> ArdResult<BurstOutputs> {
    let ard = &params.single_ard;
    let out_dir = job.out_directory.as_path();
    std::fs::create_dir_all(out_dir)?;
    let prefix = job.master_prefix.as_str();

    let pol_done = out_dir.join(POL_MARKER).exists();
    let bs_done = out_dir.join(BS_MARKER).exists();
    let coh_done = out_dir.join(COH_MARKER).exists();
    let coherence = ard.coherence && job.slave_file.is_some();

    let need_pol = ard.h_a_alpha && !pol_done;
    let need_bs = ard.backscatter && !bs_done;
    let need_coh = coherence && !coh_done;

    if need_pol || need_bs || need_coh {
        let polarisation = ard.import_polarisations();
        let master_import = temp_dir.join(format!("{}_import", prefix));
        if !dim_file(&master_import).exists() {
            let log = out_dir.join(format!("{}_import.err_log", prefix));
            slc::burst_import(
                gpt,
                &job.file_location,
                &master_import,
                &log,
                &job.swath_id,
                job.burst_nr,
                &polarisation,
            )
            .map_err(|e| {
                discard_partial(&master_import);
                e
            })?;
        }
        let master_dim = dim_file(&master_import);

        if need_pol {
            create_polarimetric_layers(gpt, &master_dim, out_dir, prefix, ard, temp_dir)?;
        }
        if need_bs {
            create_backscatter_layers(gpt, &master_dim, out_dir, prefix, ard, temp_dir)?;
        }

        if need_coh {
            let (Some(slave_file), Some(slave_burst), Some(slave_prefix)) =
                (&job.slave_file, job.slave_burst_nr, &job.slave_prefix)
            else {
                return Err(ArdError::Processing(format!(
                    "Incomplete slave information for burst {} on {}",
                    job.bid, job.date
                )));
            };
            let slave_import = temp_dir.join(format!("{}_import", slave_prefix));
            let log = out_dir.join(format!("{}_import.err_log", slave_prefix));
            slc::burst_import(
                gpt,
                slave_file,
                &slave_import,
                &log,
                &job.swath_id,
                slave_burst,
                &polarisation,
            )?;
            let result = create_coherence_layers(
                gpt,
                &master_dim,
                &dim_file(&slave_import),
                out_dir,
                prefix,
                ard,
                temp_dir,
            );
            delete_dimap(&slave_import)?;
            result?;
        } else {
            delete_dimap(&master_import)?;
        }
    } else {
        log::info!("Burst {} of {} already processed", job.bid, job.date);
    }

    Ok(BurstOutputs {
        bs: ard.backscatter.then(|| out_dir.join(format!("{}_bs.dim", prefix))),
        ls: (ard.backscatter && ard.create_ls_mask).then(|| out_dir.join(format!("{}_LS.dim", prefix))),
        coh: coherence.then(|| out_dir.join(format!("{}_coh.dim", prefix))),
        pol: ard.h_a_alpha.then(|| out_dir.join(format!("{}_pol.dim", prefix))),
    })
}
