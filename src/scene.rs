//! Sentinel-1 scene identifiers and the paths/URLs derived from them.

use crate::geometry::Polygon;
use crate::io::safe::SafeReader;
use crate::types::{AcquisitionMode, ArdError, ArdResult, Polarization};
use chrono::NaiveDate;
use regex::Regex;
use std::path::{Path, PathBuf};

const SCENE_ID_PATTERN: &str = r"^S1[AB]_(IW|EW|SM|WV|S[1-6])_(GRD|SLC|RAW|OCN)[FHM_]_[0-4][SA](SH|SV|DH|DV|HH|HV|VV|VH)_\d{8}T\d{6}_\d{8}T\d{6}_\d{6}_[0-9A-F]{6}_[0-9A-F]{4}$";

/// Orbits per repeat cycle of a single Sentinel-1 satellite
pub const ORBITS_PER_CYCLE: i64 = 175;

pub const ASF_DATAPOOL_URL: &str = "https://datapool.asf.alaska.edu";

/// Parsed Sentinel-1 product identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel1Scene {
    pub scene_id: String,
    pub mission: String,
    pub mode_beam: String,
    pub product_type: String,
    pub resolution_class: String,
    pub proc_level: String,
    pub pol_mode: String,
    pub start_date: String,
    pub start_time: String,
    pub stop_date: String,
    pub stop_time: String,
    pub abs_orbit: u32,
    pub data_take_id: String,
    pub unique_id: String,
    pub year: String,
    pub month: String,
    pub day: String,
    pub rel_orbit: u32,
}

impl Sentinel1Scene {
    /// Parse a scene identifier; a trailing `.zip` or `.SAFE` is accepted
    pub fn new(scene_id: &str) -> ArdResult<Self> {
        let scene_id = scene_id
            .trim()
            .trim_end_matches(".zip")
            .trim_end_matches(".SAFE");

        let re = Regex::new(SCENE_ID_PATTERN)
            .map_err(|e| ArdError::Processing(format!("Invalid scene id pattern: {}", e)))?;
        if !re.is_match(scene_id) {
            return Err(ArdError::InvalidScene(scene_id.to_string()));
        }

        let abs_orbit: u32 = scene_id[49..55]
            .parse()
            .map_err(|_| ArdError::InvalidScene(scene_id.to_string()))?;
        let mission = scene_id[0..3].to_string();
        let rel_orbit = Self::relative_orbit(&mission, abs_orbit)?;
        let start_date = scene_id[17..25].to_string();

        Ok(Sentinel1Scene {
            mode_beam: scene_id[4..6].to_string(),
            product_type: scene_id[7..10].to_string(),
            resolution_class: scene_id[10..11].to_string(),
            proc_level: scene_id[12..13].to_string(),
            pol_mode: scene_id[14..16].to_string(),
            start_time: scene_id[26..32].to_string(),
            stop_date: scene_id[33..41].to_string(),
            stop_time: scene_id[42..48].to_string(),
            data_take_id: scene_id[56..62].to_string(),
            unique_id: scene_id[63..].to_string(),
            year: start_date[0..4].to_string(),
            month: start_date[4..6].to_string(),
            day: start_date[6..8].to_string(),
            scene_id: scene_id.to_string(),
            mission,
            start_date,
            abs_orbit,
            rel_orbit,
        })
    }

    /// Relative orbit (track) from the absolute orbit number
    pub fn relative_orbit(mission: &str, abs_orbit: u32) -> ArdResult<u32> {
        let offset = match mission {
            "S1A" => 73,
            "S1B" => 27,
            other => {
                return Err(ArdError::InvalidScene(format!(
                    "No orbit offset known for mission {}",
                    other
                )))
            }
        };
        Ok(((abs_orbit as i64 - offset).rem_euclid(ORBITS_PER_CYCLE) + 1) as u32)
    }

    pub fn satellite(&self) -> &'static str {
        match self.mission.as_str() {
            "S1A" => "Sentinel-1A",
            _ => "Sentinel-1B",
        }
    }

    pub fn acquisition_mode(&self) -> Option<AcquisitionMode> {
        self.mode_beam.parse().ok()
    }

    pub fn acquisition_mode_name(&self) -> &str {
        match self.acquisition_mode() {
            Some(mode) => mode.long_name(),
            None => self.mode_beam.as_str(),
        }
    }

    pub fn product_type_name(&self) -> &'static str {
        match self.product_type.as_str() {
            "GRD" => "Ground Range Detected (GRD)",
            "SLC" => "Single-Look Complex (SLC)",
            "OCN" => "Ocean",
            _ => "Raw Data (RAW)",
        }
    }

    /// Polarisations contained in the product
    pub fn polarisations(&self) -> ArdResult<Vec<Polarization>> {
        use Polarization::*;
        match self.pol_mode.as_str() {
            "SH" | "HH" => Ok(vec![HH]),
            "SV" | "VV" => Ok(vec![VV]),
            "DH" => Ok(vec![HH, HV]),
            "DV" => Ok(vec![VV, VH]),
            "HV" => Ok(vec![HV]),
            "VH" => Ok(vec![VH]),
            other => Err(ArdError::InvalidScene(format!(
                "No valid polarization mode {} in {}",
                other, self.scene_id
            ))),
        }
    }

    pub fn acquisition_date(&self) -> ArdResult<NaiveDate> {
        NaiveDate::parse_from_str(&self.start_date, "%Y%m%d")
            .map_err(|e| ArdError::InvalidScene(format!("{}: {}", self.scene_id, e)))
    }

    /// Ordered key/value summary of the scene
    pub fn info(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Scene_Identifier", self.scene_id.clone()),
            ("Satellite", self.satellite().to_string()),
            ("Acquisition_Mode", self.acquisition_mode_name().to_string()),
            ("Processing_Level", self.proc_level.clone()),
            ("Product_Type", self.product_type_name().to_string()),
            ("Acquisition_Date", self.start_date.clone()),
            ("Start_Time", self.start_time.clone()),
            ("Stop_Time", self.stop_time.clone()),
            ("Absolute_Orbit", self.abs_orbit.to_string()),
            ("Relative_Orbit", self.rel_orbit.to_string()),
        ]
    }

    /// Directory the scene is downloaded to
    pub fn download_dir(&self, download_dir: &Path) -> PathBuf {
        download_dir
            .join("SAR")
            .join(&self.product_type)
            .join(&self.year)
            .join(&self.month)
            .join(&self.day)
    }

    pub fn download_path(&self, download_dir: &Path) -> PathBuf {
        self.download_dir(download_dir)
            .join(format!("{}.zip", self.scene_id))
    }

    /// Marker written once the archive passed the integrity check
    pub fn download_marker(&self, download_dir: &Path) -> PathBuf {
        self.download_path(download_dir).with_extension("downloaded")
    }

    pub fn is_downloaded(&self, download_dir: &Path) -> bool {
        self.download_marker(download_dir).exists()
    }

    /// Location of the product on a mounted data archive
    pub fn data_mount_path(&self, data_mount: &Path) -> PathBuf {
        data_mount
            .join("Sentinel-1")
            .join("SAR")
            .join(&self.product_type)
            .join(&self.year)
            .join(&self.month)
            .join(&self.day)
            .join(format!("{}.SAFE", self.scene_id))
    }

    /// Path of a verified download, or of the product on the data mount
    pub fn get_path(&self, download_dir: &Path, data_mount: Option<&Path>) -> ArdResult<PathBuf> {
        if self.is_downloaded(download_dir) {
            return Ok(self.download_path(download_dir));
        }
        if let Some(mount) = data_mount {
            let safe = self.data_mount_path(mount);
            if safe.join("manifest.safe").exists() {
                return Ok(safe);
            }
        }
        Err(ArdError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("No product path found for: {}", self.scene_id),
        )))
    }

    /// ASF datapool URL
    pub fn asf_url(&self) -> String {
        let product = if self.product_type == "SLC" {
            "SLC".to_string()
        } else {
            format!(
                "GRD_{}{}",
                self.resolution_class,
                &self.pol_mode[0..1]
            )
        };
        let platform = if self.mission == "S1A" { "SA" } else { "SB" };
        format!(
            "{}/{}/{}/{}.zip",
            ASF_DATAPOOL_URL, product, platform, self.scene_id
        )
    }

    /// Copernicus OData URL for a product uuid
    pub fn scihub_url(apihub: &str, uuid: &str) -> String {
        format!(
            "{}/odata/v1/Products('{}')/$value",
            apihub.trim_end_matches('/'),
            uuid
        )
    }

    /// Footprint read from the product manifest
    pub fn product_polygon(&self, download_dir: &Path, data_mount: Option<&Path>) -> ArdResult<Polygon> {
        let path = self.get_path(download_dir, data_mount)?;
        SafeReader::new(&path)?.product_polygon()
    }
}

impl std::fmt::Display for Sentinel1Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in self.info() {
            writeln!(f, "{:<18} {}", key, value)?;
        }
        Ok(())
    }
}
