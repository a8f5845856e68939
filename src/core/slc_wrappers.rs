//! Toolbox steps specific to SLC bursts. Each returns the written `.dim` file.

use crate::core::gpt::Gpt;
use crate::core::graph;
use crate::core::params::SingleArd;
use crate::core::wrappers::{dim_file, run_graph};
use crate::types::ArdResult;
use std::path::{Path, PathBuf};

/// Multilook factors (azimuth, range) of a calibrated burst
pub fn multilook_factors(resolution: u32) -> (u32, u32) {
    let azimuth = (resolution / 20).max(1);
    (azimuth, azimuth * 5)
}

/// Extract a single burst of a swath and apply precise orbits
pub fn burst_import(
    gpt: &Gpt,
    infile: &Path,
    outfile: &Path,
    logfile: &Path,
    swath: &str,
    burst: usize,
    polarisation: &str,
) -> ArdResult<PathBuf> {
    log::info!(
        "Importing burst {} from swath {} of {}",
        burst,
        swath,
        infile.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    );
    let out = dim_file(outfile);
    let graph = graph::burst_import(infile, &out, polarisation, swath, burst);
    run_graph(gpt, &graph, "burst_import", logfile)?;
    log::info!("Successfully imported burst");
    Ok(out)
}

/// Noise removal, calibration, debursting and multilooking; terrain
/// flattening is added for RTC products
pub fn calibration(gpt: &Gpt, infile: &Path, outfile: &Path, logfile: &Path, ard: &SingleArd) -> ArdResult<PathBuf> {
    let (azimuth_looks, range_looks) = multilook_factors(ard.resolution);
    let flatten_with = if ard.is_rtc() { Some(&ard.dem) } else { None };
    log::info!(
        "Calibrating the burst to {}{}",
        ard.calibrate_to(),
        if flatten_with.is_some() { " with terrain flattening" } else { "" }
    );

    let out = dim_file(outfile);
    let graph = graph::slc_calibration(
        infile,
        &out,
        ard.calibrate_to(),
        azimuth_looks,
        range_looks,
        flatten_with,
    );
    run_graph(gpt, &graph, "slc_calibration", logfile)?;
    Ok(out)
}

/// Dual-pol H-A-Alpha decomposition, optionally after a polarimetric speckle filter
pub fn ha_alpha(gpt: &Gpt, infile: &Path, outfile: &Path, logfile: &Path, ard: &SingleArd) -> ArdResult<PathBuf> {
    let speckle = if ard.remove_pol_speckle {
        log::info!("Applying the polarimetric speckle filter and calculating the H-alpha dual-pol decomposition");
        Some(&ard.pol_speckle_filter)
    } else {
        log::info!("Calculating the H-alpha dual-pol decomposition");
        None
    };
    let out = dim_file(outfile);
    run_graph(gpt, &graph::ha_alpha(infile, &out, speckle), "ha_alpha", logfile)?;
    Ok(out)
}

/// Back-geocoding co-registration of a slave burst onto its master
pub fn coreg(gpt: &Gpt, master: &Path, slave: &Path, outfile: &Path, logfile: &Path, ard: &SingleArd) -> ArdResult<PathBuf> {
    log::info!("Co-registering {} and {}", master.display(), slave.display());
    let out = dim_file(outfile);
    let graph = graph::coregistration(master, slave, &out, &ard.dem);
    run_graph(gpt, &graph, "coregistration", logfile)?;
    Ok(out)
}

/// Interferometric coherence of a co-registered pair, debursted
pub fn coherence(gpt: &Gpt, infile: &Path, outfile: &Path, logfile: &Path, ard: &SingleArd) -> ArdResult<PathBuf> {
    log::info!("Coherence estimation");
    let polarisation = ard.coherence_bands.replace(' ', "");
    let out = dim_file(outfile);
    let graph = graph::coherence(
        infile,
        &out,
        ard.coherence_azimuth,
        ard.coherence_range,
        &polarisation,
    );
    run_graph(gpt, &graph, "coherence", logfile)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multilook_factors() {
        assert_eq!(multilook_factors(10), (1, 5));
        assert_eq!(multilook_factors(20), (1, 5));
        assert_eq!(multilook_factors(40), (2, 10));
        assert_eq!(multilook_factors(100), (5, 25));
    }
}
