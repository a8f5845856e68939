use crate::geometry::{Geometry, Polygon};
use crate::io::geojson;
use crate::scene::Sentinel1Scene;
use crate::types::{ArdError, ArdResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// One row of the scene inventory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneRecord {
    pub id: String,
    pub identifier: String,
    pub polarisationmode: String,
    pub orbitdirection: String,
    /// Acquisition date as YYYYMMDD
    pub acquisitiondate: String,
    pub relativeorbit: String,
    pub orbitnumber: String,
    pub product_type: String,
    pub slicenumber: String,
    pub size: String,
    pub beginposition: String,
    pub endposition: String,
    pub lastrelativeorbitnumber: String,
    pub lastorbitnumber: String,
    pub uuid: String,
    pub platformidentifier: String,
    pub missiondatatakeid: String,
    pub swathidentifier: String,
    pub ingestiondate: String,
    pub sensoroperationalmode: String,

    #[serde(skip)]
    pub geometry: Option<Polygon>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_dimap: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_ls_mask: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_tif: Option<PathBuf>,
}

impl SceneRecord {
    pub fn scene(&self) -> ArdResult<Sentinel1Scene> {
        Sentinel1Scene::new(&self.identifier)
    }

    /// Product size in GB from strings like "1.65 GB" or "850 MB"
    pub fn size_gb(&self) -> f64 {
        let mut parts = self.size.split_whitespace();
        let value = parts.next().and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
        match parts.next().map(|u| u.to_uppercase()) {
            Some(unit) if unit == "MB" => value / 1024.0,
            Some(unit) if unit == "KB" => value / 1024.0 / 1024.0,
            _ => value,
        }
    }
}

/// Processing outputs recorded for a scene
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneOutputs {
    pub out_dimap: Option<PathBuf>,
    pub out_ls_mask: Option<PathBuf>,
    pub out_tif: Option<PathBuf>,
}

/// Scene inventory keyed by product identifier
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    records: Vec<SceneRecord>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from records; later duplicates of an identifier are dropped
    pub fn from_records(records: Vec<SceneRecord>) -> Self {
        let mut inventory = Self::new();
        for record in records {
            inventory.insert(record);
        }
        inventory
    }

    /// Insert a record unless its identifier is already present
    pub fn insert(&mut self, record: SceneRecord) -> bool {
        if self.get(&record.identifier).is_some() {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Append another inventory, keeping existing rows
    pub fn merge(&mut self, other: Inventory) -> usize {
        other
            .records
            .into_iter()
            .filter(|record| self.insert(record.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SceneRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneRecord> {
        self.records.iter()
    }

    pub fn get(&self, identifier: &str) -> Option<&SceneRecord> {
        self.records.iter().find(|r| r.identifier == identifier)
    }

    pub fn get_mut(&mut self, identifier: &str) -> Option<&mut SceneRecord> {
        self.records.iter_mut().find(|r| r.identifier == identifier)
    }

    pub fn read<P: AsRef<Path>>(path: P) -> ArdResult<Self> {
        let features = geojson::read_features::<SceneRecord, _>(path.as_ref())?;
        let records = features
            .into_iter()
            .map(|(mut record, geometry)| {
                record.geometry = geometry;
                record
            })
            .collect();
        let inventory = Self::from_records(records);
        log::info!(
            "Read {} scenes from {}",
            inventory.len(),
            path.as_ref().display()
        );
        Ok(inventory)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> ArdResult<()> {
        geojson::write_features(
            path.as_ref(),
            self.records.iter().map(|r| (r, r.geometry.as_ref())),
        )?;
        log::info!(
            "Wrote {} scenes to {}",
            self.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    pub fn filter<F: Fn(&SceneRecord) -> bool>(&self, predicate: F) -> Inventory {
        Inventory {
            records: self.records.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }

    /// Scenes whose footprint intersects the area of interest
    pub fn refine(&self, aoi: &Geometry) -> Inventory {
        self.filter(|r| r.geometry.as_ref().map_or(false, |g| aoi.intersects(g)))
    }

    /// Total size of the inventory in GB
    pub fn download_size(&self) -> f64 {
        self.records.iter().map(SceneRecord::size_gb).sum()
    }

    /// Distinct relative orbits, in order of appearance
    pub fn tracks(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .filter(|r| seen.insert(r.relativeorbit.clone()))
            .map(|r| r.relativeorbit.clone())
            .collect()
    }

    /// Identifiers grouped by relative orbit and then acquisition date
    pub fn group_by_track_and_date(&self) -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
        let mut groups: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for record in &self.records {
            groups
                .entry(record.relativeorbit.clone())
                .or_default()
                .entry(record.acquisitiondate.clone())
                .or_default()
                .push(record.identifier.clone());
        }
        groups
    }

    /// Fill `download_path` for scenes found locally; returns the number found
    pub fn check_availability(&mut self, download_dir: &Path, data_mount: Option<&Path>) -> usize {
        let mut available = 0;
        for record in &mut self.records {
            record.download_path = record
                .scene()
                .ok()
                .and_then(|scene| scene.get_path(download_dir, data_mount).ok());
            if record.download_path.is_some() {
                available += 1;
            }
        }
        log::info!(
            "{} of {} scenes are available locally",
            available,
            self.len()
        );
        available
    }

    /// Record processing outputs for a scene
    pub fn set_outputs(&mut self, identifier: &str, outputs: &SceneOutputs) -> ArdResult<()> {
        let record = self.get_mut(identifier).ok_or_else(|| {
            ArdError::Inventory(format!("Scene {} is not part of the inventory", identifier))
        })?;
        record.out_dimap = outputs.out_dimap.clone();
        record.out_ls_mask = outputs.out_ls_mask.clone();
        record.out_tif = outputs.out_tif.clone();
        Ok(())
    }
}

impl FromIterator<SceneRecord> for Inventory {
    fn from_iter<I: IntoIterator<Item = SceneRecord>>(iter: I) -> Self {
        Inventory::from_records(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(identifier: &str, track: &str, date: &str, size: &str) -> SceneRecord {
        SceneRecord {
            identifier: identifier.to_string(),
            relativeorbit: track.to_string(),
            acquisitiondate: date.to_string(),
            size: size.to_string(),
            geometry: Polygon::new(vec![(10.0, 50.0), (11.0, 50.0), (11.0, 51.0), (10.0, 51.0)]).ok(),
            ..Default::default()
        }
    }

    #[test]
    fn test_duplicates_keep_first() {
        let mut inventory = Inventory::from_records(vec![
            record("A", "15", "20200101", "1 GB"),
            record("A", "99", "20200101", "1 GB"),
        ]);
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.get("A").unwrap().relativeorbit, "15");
        assert!(!inventory.insert(record("A", "1", "20200102", "1 GB")));
    }

    #[test]
    fn test_download_size() {
        let inventory = Inventory::from_records(vec![
            record("A", "15", "20200101", "1.5 GB"),
            record("B", "15", "20200101", "512 MB"),
        ]);
        assert!((inventory.download_size() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_grouping() {
        let inventory = Inventory::from_records(vec![
            record("A", "15", "20200101", "1 GB"),
            record("B", "15", "20200101", "1 GB"),
            record("C", "15", "20200113", "1 GB"),
            record("D", "117", "20200102", "1 GB"),
        ]);
        let groups = inventory.group_by_track_and_date();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["15"]["20200101"], vec!["A".to_string(), "B".to_string()]);
        assert_eq!(groups["15"].len(), 2);
        assert_eq!(inventory.tracks(), vec!["15".to_string(), "117".to_string()]);
    }

    #[test]
    fn test_refine_by_aoi() {
        let mut far = record("B", "15", "20200101", "1 GB");
        far.geometry = Polygon::new(vec![(50.0, 0.0), (51.0, 0.0), (51.0, 1.0)]).ok();
        let inventory = Inventory::from_records(vec![record("A", "15", "20200101", "1 GB"), far]);

        let aoi = Geometry::from_wkt("POINT (10.5 50.5)").unwrap();
        let refined = inventory.refine(&aoi);
        assert_eq!(refined.len(), 1);
        assert_eq!(refined.records()[0].identifier, "A");
    }

    #[test]
    fn test_write_and_read_keeps_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory").join("full.inventory.geojson");

        let mut inventory = Inventory::from_records(vec![record("A", "15", "20200101", "1 GB")]);
        inventory
            .set_outputs(
                "A",
                &SceneOutputs {
                    out_dimap: Some(PathBuf::from("/p/15/20200101/20200101_15_BS.dim")),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(inventory.set_outputs("Z", &SceneOutputs::default()).is_err());
        inventory.write(&path).unwrap();

        let back = Inventory::read(&path).unwrap();
        let a = back.get("A").unwrap();
        assert_eq!(a.out_dimap, Some(PathBuf::from("/p/15/20200101/20200101_15_BS.dim")));
        assert_eq!(a.out_ls_mask, None);
        assert_eq!(a.geometry, inventory.get("A").unwrap().geometry);
    }
}
