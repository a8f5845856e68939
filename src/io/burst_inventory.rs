use crate::geometry::{Geometry, Polygon};
use crate::io::annotation::{AnnotationParser, SwathBursts};
use crate::io::geojson;
use crate::io::inventory::Inventory;
use crate::io::safe::SafeReader;
use crate::types::{ArdError, ArdResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// One burst of one SLC scene
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstRecord {
    #[serde(rename = "SceneID")]
    pub scene_id: String,
    #[serde(rename = "Track")]
    pub track: String,
    #[serde(rename = "Direction")]
    pub direction: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "SwathID")]
    pub swath_id: String,
    #[serde(rename = "AnxTime")]
    pub anx_time: i64,
    #[serde(rename = "BurstNr")]
    pub burst_nr: usize,
    /// Burst id, stable across acquisitions of the same track
    pub bid: String,
    #[serde(skip)]
    pub geometry: Option<Polygon>,
}

impl BurstRecord {
    pub fn burst_id(direction: &str, track: &str, swath: &str, anx_time: i64) -> String {
        format!(
            "{}{}_{}_{}",
            direction.chars().next().unwrap_or('X'),
            track,
            swath,
            anx_time
        )
    }
}

/// A burst ready for processing, paired with the next acquisition of the same burst
#[derive(Debug, Clone, PartialEq)]
pub struct BurstJob {
    pub bid: String,
    pub date: String,
    pub swath_id: String,
    pub burst_nr: usize,
    pub file_location: PathBuf,
    pub out_directory: PathBuf,
    pub master_prefix: String,
    pub slave_date: Option<String>,
    pub slave_file: Option<PathBuf>,
    pub slave_burst_nr: Option<usize>,
    pub slave_prefix: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BurstInventory {
    records: Vec<BurstRecord>,
}

impl BurstInventory {
    pub fn new(records: Vec<BurstRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[BurstRecord] {
        &self.records
    }

    /// Burst rows of one scene from its annotation files
    pub fn scene_bursts(
        scene_id: &str,
        track: &str,
        direction: &str,
        date: &str,
        product: &Path,
    ) -> ArdResult<Vec<BurstRecord>> {
        let mut reader = SafeReader::new(product)?;
        let mut swaths = Vec::new();
        for name in reader.find_annotation_files()? {
            let xml = reader.read_to_string(&name)?;
            let annotation = AnnotationParser::parse_annotation(&xml)?;
            swaths.push(AnnotationParser::extract_bursts(&annotation)?);
        }
        Ok(Self::rows_from_swaths(scene_id, track, direction, date, swaths))
    }

    fn rows_from_swaths(
        scene_id: &str,
        track: &str,
        direction: &str,
        date: &str,
        swaths: Vec<SwathBursts>,
    ) -> Vec<BurstRecord> {
        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for swath in swaths {
            for burst in swath.bursts {
                // every polarisation repeats the same bursts
                if !seen.insert((swath.swath.clone(), burst.anx_time)) {
                    continue;
                }
                rows.push(BurstRecord {
                    scene_id: scene_id.to_string(),
                    track: track.to_string(),
                    direction: direction.to_string(),
                    date: date.to_string(),
                    swath_id: swath.swath.clone(),
                    anx_time: burst.anx_time,
                    burst_nr: burst.burst_nr,
                    bid: BurstRecord::burst_id(direction, track, &swath.swath, burst.anx_time),
                    geometry: Some(round_polygon(&burst.footprint, 3)),
                });
            }
        }
        rows
    }

    /// Burst inventory of all SLC scenes available locally
    pub fn from_inventory(
        inventory: &Inventory,
        download_dir: &Path,
        data_mount: Option<&Path>,
    ) -> ArdResult<Self> {
        let mut records = Vec::new();
        for record in inventory.iter() {
            let scene = record.scene()?;
            if scene.product_type != "SLC" {
                log::warn!("Skipping {}: not an SLC product", scene.scene_id);
                continue;
            }
            let path = scene.get_path(download_dir, data_mount)?;
            let track = if record.relativeorbit.is_empty() {
                scene.rel_orbit.to_string()
            } else {
                record.relativeorbit.clone()
            };
            let date = if record.acquisitiondate.is_empty() {
                scene.start_date.clone()
            } else {
                record.acquisitiondate.clone()
            };
            let bursts =
                Self::scene_bursts(&scene.scene_id, &track, &record.orbitdirection, &date, &path)?;
            log::debug!("{}: {} bursts", scene.scene_id, bursts.len());
            records.extend(bursts);
        }
        log::info!("Created burst inventory with {} bursts", records.len());
        Ok(Self { records })
    }

    /// Bursts intersecting the area of interest
    pub fn refine(&self, aoi: &Geometry) -> BurstInventory {
        BurstInventory {
            records: self
                .records
                .iter()
                .filter(|r| r.geometry.as_ref().map_or(false, |g| aoi.intersects(g)))
                .cloned()
                .collect(),
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> ArdResult<Self> {
        let records = geojson::read_features::<BurstRecord, _>(path.as_ref())?
            .into_iter()
            .map(|(mut record, geometry)| {
                record.geometry = geometry;
                record
            })
            .collect();
        Ok(Self { records })
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> ArdResult<()> {
        geojson::write_features(
            path.as_ref(),
            self.records.iter().map(|r| (r, r.geometry.as_ref())),
        )?;
        log::info!(
            "Wrote {} bursts to {}",
            self.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Bursts grouped by burst id, each group sorted by date
    pub fn by_bid(&self) -> BTreeMap<String, Vec<&BurstRecord>> {
        let mut groups: BTreeMap<String, Vec<&BurstRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.bid.clone()).or_default().push(record);
        }
        for rows in groups.values_mut() {
            rows.sort_by(|a, b| a.date.cmp(&b.date));
        }
        groups
    }

    /// One job per burst and date; the following date of the same burst is its slave
    pub fn prepare_processing(
        &self,
        processing_dir: &Path,
        download_dir: &Path,
        data_mount: Option<&Path>,
    ) -> ArdResult<Vec<BurstJob>> {
        let mut locations: BTreeMap<&str, PathBuf> = BTreeMap::new();
        for record in &self.records {
            if !locations.contains_key(record.scene_id.as_str()) {
                let scene = crate::scene::Sentinel1Scene::new(&record.scene_id)?;
                locations.insert(&record.scene_id, scene.get_path(download_dir, data_mount)?);
            }
        }
        let location = |scene_id: &str| -> ArdResult<PathBuf> {
            locations.get(scene_id).cloned().ok_or_else(|| {
                ArdError::Inventory(format!("No product path for {}", scene_id))
            })
        };

        let mut jobs = Vec::new();
        for (bid, rows) in self.by_bid() {
            for (i, row) in rows.iter().enumerate() {
                let slave = rows.get(i + 1);
                jobs.push(BurstJob {
                    bid: bid.clone(),
                    date: row.date.clone(),
                    swath_id: row.swath_id.clone(),
                    burst_nr: row.burst_nr,
                    file_location: location(&row.scene_id)?,
                    out_directory: processing_dir.join(&bid).join(&row.date),
                    master_prefix: format!("{}_{}", row.date, bid),
                    slave_date: slave.map(|s| s.date.clone()),
                    slave_file: slave.map(|s| location(&s.scene_id)).transpose()?,
                    slave_burst_nr: slave.map(|s| s.burst_nr),
                    slave_prefix: slave.map(|s| format!("{}_{}", s.date, bid)),
                });
            }
        }
        log::info!("Prepared {} burst jobs", jobs.len());
        Ok(jobs)
    }
}

fn round_polygon(polygon: &Polygon, decimals: i32) -> Polygon {
    let factor = 10f64.powi(decimals);
    let round = |v: f64| (v * factor).round() / factor;
    Polygon {
        exterior: polygon
            .exterior
            .iter()
            .map(|&(x, y)| (round(x), round(y)))
            .collect(),
    }
}
