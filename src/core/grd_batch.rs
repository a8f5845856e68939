//! Batch processing of a GRD inventory: one ARD product per track and
//! acquisition date, followed by time series, timescans and mosaics.

use crate::core::batch::{run_pool, BatchConfig};
use crate::core::grd_to_ard::{grd_to_ard, PROCESSED_MARKER};
use crate::core::mt_masks::{self, MtMasks};
use crate::core::{mosaic, timescan, timeseries};
use crate::geometry::{Geometry, Polygon};
use crate::io::raster::{self, OutputType};
use crate::io::{Inventory, SceneOutputs};
use crate::retry::{retry, RetryPolicy};
use crate::scene::Sentinel1Scene;
use crate::types::{ArdError, ArdResult, Polarization};
use std::path::{Path, PathBuf};

/// How much of an acquisition needs to be processed
#[derive(Debug, Clone, PartialEq)]
pub enum SubsetDecision {
    /// The acquisition misses the area of interest
    Skip,
    /// Process the whole acquisition
    Full,
    /// Cut the import to this WKT region
    Subset(String),
}

/// Decide the import region of an acquisition from its scene footprints.
///
/// The acquisition footprint is the convex hull of the scene footprints,
/// compared against the bounding box of the area of interest.
pub fn subset_decision(footprints: &[Polygon], aoi: &Geometry) -> ArdResult<SubsetDecision> {
    if let Geometry::Point(lon, lat) = aoi {
        // a point cannot be subset to
        let hit = footprints.is_empty() || footprints.iter().any(|p| p.contains_point((*lon, *lat)));
        return Ok(if hit { SubsetDecision::Full } else { SubsetDecision::Skip });
    }
    let aoi_bbox = aoi.bbox();
    let aoi_poly = Polygon::from_bbox(&aoi_bbox);
    if footprints.is_empty() {
        return Ok(SubsetDecision::Subset(aoi_poly.envelope().to_wkt(None)));
    }

    let points: Vec<(f64, f64)> = footprints
        .iter()
        .flat_map(|p| p.exterior.iter().copied())
        .collect();
    let acquisition = Polygon::convex_hull(&points)?;
    if !acquisition.intersects(&aoi_poly) {
        return Ok(SubsetDecision::Skip);
    }
    let Some(intersection) = acquisition.clip_to_bbox(&aoi_bbox) else {
        return Ok(SubsetDecision::Skip);
    };

    let coverage = intersection.area() / acquisition.area() * 100.0;
    if coverage > 85.0 || acquisition.within(&aoi_poly) {
        Ok(SubsetDecision::Full)
    } else {
        Ok(SubsetDecision::Subset(intersection.envelope().to_wkt(None)))
    }
}

/// Scenes of one track acquired on one date
#[derive(Debug, Clone, PartialEq)]
pub struct GrdGroup {
    pub track: String,
    pub scene_ids: Vec<String>,
}

impl GrdGroup {
    /// Groups of an inventory, ordered by track and date
    pub fn from_inventory(inventory: &Inventory) -> Vec<GrdGroup> {
        inventory
            .group_by_track_and_date()
            .into_iter()
            .flat_map(|(track, dates)| {
                dates.into_values().map(move |scene_ids| GrdGroup {
                    track: track.clone(),
                    scene_ids,
                })
            })
            .collect()
    }
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.exists().then_some(path)
}

/// GeoTIFF beside the backscatter product, created if missing
fn ensure_tif(out_dimap: &Path, to_db: bool) -> ArdResult<PathBuf> {
    let tif = out_dimap.with_extension("tif");
    if !tif.exists() {
        raster::dimap_to_tif(out_dimap, &tif, to_db)?;
    }
    Ok(tif)
}

fn process_group(cfg: &BatchConfig, group: &GrdGroup, aoi: &Geometry, to_tif: bool) -> ArdResult<SceneOutputs> {
    let scenes = group
        .scene_ids
        .iter()
        .map(|id| Sentinel1Scene::new(id))
        .collect::<ArdResult<Vec<_>>>()?;
    let first = scenes
        .first()
        .ok_or_else(|| ArdError::Inventory(format!("Empty acquisition group on track {}", group.track)))?;

    let date = first.start_date.clone();
    let out_dir = cfg.processing_dir.join(&group.track).join(&date);
    std::fs::create_dir_all(&out_dir)?;
    let file_id = format!("{}_{}", date, group.track);
    let out_file = out_dir.join(format!("{}_BS.dim", file_id));
    let out_ls = out_dir.join(format!("{}_LS.dim", file_id));
    let tif_to_db = !cfg.params.single_ard.to_db;

    if out_dir.join(PROCESSED_MARKER).is_file() {
        log::info!("Acquisition from {} of track {} already processed", date, group.track);
        let out_dimap = existing(out_file);
        let out_tif = match (&out_dimap, to_tif) {
            (Some(dimap), true) => Some(ensure_tif(dimap, tif_to_db)?),
            _ => None,
        };
        return Ok(SceneOutputs {
            out_dimap,
            out_ls_mask: existing(out_ls),
            out_tif,
        });
    }

    let footprints: Vec<Polygon> = scenes
        .iter()
        .filter_map(|s| s.product_polygon(&cfg.download_dir, cfg.data_mount()).ok())
        .collect();
    let subset = match subset_decision(&footprints, aoi)? {
        SubsetDecision::Skip => {
            log::debug!("Acquisition {} does not intersect the area of interest", file_id);
            return Ok(SceneOutputs::default());
        }
        SubsetDecision::Full => None,
        SubsetDecision::Subset(wkt) => Some(wkt),
    };

    let paths = scenes
        .iter()
        .map(|s| s.get_path(&cfg.download_dir, cfg.data_mount()))
        .collect::<ArdResult<Vec<_>>>()?;
    let temp_dir = cfg.temp_dir.join(&file_id);

    let (out_dimap, out_ls_mask) = retry(
        &RetryPolicy::GRD_BATCH,
        |e: &ArdError| !matches!(e, ArdError::InvalidParameters(_) | ArdError::InvalidScene(_)),
        || {
            grd_to_ard(
                &cfg.gpt,
                &paths,
                &out_dir,
                &file_id,
                &temp_dir,
                &cfg.params,
                subset.as_deref(),
            )
        },
    )?;
    if temp_dir.exists() {
        std::fs::remove_dir_all(&temp_dir)?;
    }

    let out_tif = match (&out_dimap, to_tif) {
        (Some(dimap), true) => Some(ensure_tif(dimap, tif_to_db)?),
        _ => None,
    };
    Ok(SceneOutputs {
        out_dimap,
        out_ls_mask,
        out_tif,
    })
}

/// Process every acquisition of the inventory and record the outputs per
/// scene. Failed groups are logged and counted.
pub fn grd_to_ard_batch(cfg: &BatchConfig, inventory: &mut Inventory, aoi: &Geometry, to_tif: bool) -> ArdResult<usize> {
    let groups = GrdGroup::from_inventory(inventory);
    log::info!("Processing {} acquisitions with {} workers", groups.len(), cfg.max_workers);

    let results = run_pool(&groups, cfg.max_workers, |group| process_group(cfg, group, aoi, to_tif))?;

    let mut failed = 0;
    for (group, result) in groups.iter().zip(results) {
        match result {
            Ok(outputs) => {
                for id in &group.scene_ids {
                    inventory.set_outputs(id, &outputs)?;
                }
            }
            Err(e) => {
                failed += 1;
                log::error!("Processing of {} failed: {}", group.scene_ids.join(", "), e);
            }
        }
    }
    Ok(failed)
}

/// Time series of every track and polarisation
pub fn ards_to_timeseries(cfg: &BatchConfig, tracks: &[String]) -> ArdResult<Vec<PathBuf>> {
    let mut vrts = Vec::new();
    for track in tracks {
        let track_dir = cfg.processing_dir.join(track);
        let mut dims = Vec::new();
        if track_dir.is_dir() {
            for entry in std::fs::read_dir(&track_dir)? {
                let dir = entry?.path();
                if dir.is_dir() {
                    dims.extend(timeseries::find_products(&dir, "_BS")?);
                }
            }
        }
        dims.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));
        if dims.is_empty() {
            continue;
        }

        log::info!("Creating common extent and masks for track {}", track);
        mt_masks::create_mt_masks(&track_dir, track, "_BS", cfg.params.single_ard.create_ls_mask)?;
        let masks = MtMasks::load(&track_dir, track, cfg.params.time_series.apply_ls_mask)?;

        let ts_dir = track_dir.join("Timeseries");
        for pol in Polarization::ALL {
            let band = pol.to_string();
            if let Some(vrt) = timeseries::ard_to_ts(
                &cfg.gpt,
                &dims,
                "bs",
                &band,
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

/// Timescan metrics of every track and polarisation
pub fn timeseries_to_timescan(cfg: &BatchConfig, tracks: &[String]) -> ArdResult<Vec<PathBuf>> {
    let ts = &cfg.params.time_series;
    let scan = &cfg.params.time_scan;
    let dtype: OutputType = ts.dtype_output.parse()?;
    let rescale = (dtype != OutputType::Float32).then_some(dtype);

    let mut vrts = Vec::new();
    for track in tracks {
        let track_dir = cfg.processing_dir.join(track);
        let ts_dir = track_dir.join("Timeseries");
        let tscan_dir = track_dir.join("Timescan");
        if !ts_dir.is_dir() {
            continue;
        }
        std::fs::create_dir_all(&tscan_dir)?;

        let mut products = Vec::new();
        for pol in Polarization::ALL {
            let product = format!("bs.{}", pol);
            let check = tscan_dir.join(format!(".{}.processed", pol));
            if check.exists() {
                log::info!("Timescan of {} for track {} already processed", pol, track);
                products.push(product);
                continue;
            }
            let layers = timeseries::ts_layers(&ts_dir, "bs", &pol.to_string())?;
            if layers.is_empty() {
                continue;
            }
            log::info!("Processing timescan of {} for track {}", pol, track);
            timescan::mt_metrics(
                &layers,
                &tscan_dir.join(&product),
                &scan.metrics,
                false,
                rescale,
                scan.remove_outliers,
            )?;
            crate::core::grd_to_ard::write_marker(&check)?;
            products.push(product);
        }
        if let Some(vrt) = timescan::create_tscan_vrt(&tscan_dir, &products)? {
            vrts.push(vrt);
        }
    }
    Ok(vrts)
}

/// Mosaic the time series of all tracks
pub fn mosaic_timeseries(cfg: &BatchConfig, tracks: &[String]) -> ArdResult<Vec<PathBuf>> {
    log::info!("Mosaicking time-series layers");
    let out_dir = cfg.processing_dir.join("Mosaic").join("Timeseries");
    let ts_dirs: Vec<PathBuf> = tracks
        .iter()
        .map(|t| cfg.processing_dir.join(t).join("Timeseries"))
        .collect();
    let mut vrts = Vec::new();
    for pol in Polarization::ALL {
        if let Some(vrt) = mosaic::mosaic_timeseries(
            &cfg.mosaic_tool,
            &ts_dirs,
            &format!("bs.{}", pol),
            &out_dir,
            &cfg.temp_dir,
            &cfg.params.mosaic,
        )? {
            vrts.push(vrt);
        }
    }
    Ok(vrts)
}

/// Mosaic the timescans of all tracks
pub fn mosaic_timescan(cfg: &BatchConfig, tracks: &[String]) -> ArdResult<Option<PathBuf>> {
    log::info!("Mosaicking timescan layers");
    let tscan_dirs: Vec<PathBuf> = tracks
        .iter()
        .map(|t| cfg.processing_dir.join(t).join("Timescan"))
        .collect();
    let products: Vec<String> = Polarization::ALL.iter().map(|p| format!("bs.{}", p)).collect();
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
    use crate::io::SceneRecord;

    fn square(x0: f64, y0: f64, size: f64) -> Polygon {
        Polygon::new(vec![(x0, y0), (x0 + size, y0), (x0 + size, y0 + size), (x0, y0 + size)]).unwrap()
    }

    #[test]
    fn test_subset_decision() {
        let aoi = Geometry::Polygon(square(10.0, 50.0, 1.0));

        // far away
        assert_eq!(
            subset_decision(&[square(30.0, 10.0, 1.0)], &aoi).unwrap(),
            SubsetDecision::Skip
        );
        // acquisition inside the area
        assert_eq!(
            subset_decision(&[square(10.2, 50.2, 0.5)], &aoi).unwrap(),
            SubsetDecision::Full
        );
        // small overlap is cut to the intersection envelope
        match subset_decision(&[square(10.5, 50.5, 2.0)], &aoi).unwrap() {
            SubsetDecision::Subset(wkt) => {
                assert!(wkt.starts_with("POLYGON"));
                assert!(wkt.contains("10.5 50.5"));
                assert!(wkt.contains("11 51"));
            }
            other => panic!("unexpected {:?}", other),
        }
        // no footprints: the area envelope
        match subset_decision(&[], &aoi).unwrap() {
            SubsetDecision::Subset(wkt) => assert!(wkt.contains("10 50")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_convex_hull_of_consecutive_frames_is_covered() {
        let aoi = Geometry::Polygon(square(9.0, 49.0, 4.0));
        let frames = [square(10.0, 50.0, 1.0), square(10.0, 51.0, 1.0)];
        assert_eq!(subset_decision(&frames, &aoi).unwrap(), SubsetDecision::Full);
    }

    #[test]
    fn test_groups_by_track_and_date() {
        let record = |id: &str, track: &str, date: &str| SceneRecord {
            identifier: id.to_string(),
            relativeorbit: track.to_string(),
            acquisitiondate: date.to_string(),
            ..Default::default()
        };
        let inventory = Inventory::from_records(vec![
            record("a", "117", "20200112"),
            record("b", "117", "20200112"),
            record("c", "117", "20200124"),
            record("d", "44", "20200112"),
        ]);
        let groups = GrdGroup::from_inventory(&inventory);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].track, "117");
        assert_eq!(groups[0].scene_ids, vec!["a", "b"]);
        assert_eq!(groups[2].track, "44");
    }
}
