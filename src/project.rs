//! Project layer: directories, area and period of interest, the scene and
//! burst inventories, and the batch processing entry points.

use crate::config::Settings;
use crate::core::batch::BatchConfig;
use crate::core::gpt::Gpt;
use crate::core::params::{valid_ard_types, ArdParameters, DemParams};
use crate::core::{burst_batch, grd_batch};
use crate::geometry::{Geometry, Polygon};
use crate::io::download::{self, Credentials, Mirror};
use crate::io::search::{self, SearchQuery};
use crate::io::{BurstInventory, DemReader, Inventory};
use crate::types::{ArdError, ArdResult, ProductType};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const INVENTORY_FILE: &str = "full.inventory.geojson";
pub const PROCESSED_INVENTORY_FILE: &str = "processed.inventory.geojson";
pub const BURST_INVENTORY_FILE: &str = "burst_inventory.geojson";
pub const CONFIG_FILE: &str = "project.json";

pub const PRODUCT_TYPES: [&str; 4] = ["*", "RAW", "SLC", "GRD"];
pub const BEAM_MODES: [&str; 4] = ["*", "IW", "EW", "SM"];
pub const POLARISATIONS: [&str; 7] = ["*", "VV", "VH", "HV", "HH", "VV VH", "HH HV"];

/// Earliest start of a Sentinel-1 period of interest
pub const S1_FIRST_DATE: &str = "2014-10-01";

/// Absolute latitude beyond which bursts are geocoded on the ellipsoid
const POLAR_LATITUDE: f64 = 59.0;

/// Optional overrides of the project sub-directories
#[derive(Debug, Clone, Default)]
pub struct ProjectDirs {
    pub download: Option<PathBuf>,
    pub inventory: Option<PathBuf>,
    pub processing: Option<PathBuf>,
    pub temp: Option<PathBuf>,
    /// Read-only archive mirroring the download layout
    pub data_mount: Option<PathBuf>,
}

/// Parse an area of interest given as WKT or as a GeoJSON file
pub fn parse_aoi(aoi: &str) -> ArdResult<Geometry> {
    let path = Path::new(aoi);
    if path.is_file() {
        let value: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let geometry = match value.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => value
                .get("features")
                .and_then(|f| f.get(0))
                .and_then(|f| f.get("geometry")),
            Some("Feature") => value.get("geometry"),
            _ => Some(&value),
        }
        .ok_or_else(|| ArdError::Geometry(format!("No geometry in {}", path.display())))?;
        return Ok(Geometry::Polygon(Polygon::from_geojson(geometry)?));
    }
    Geometry::from_wkt(aoi)
}

fn check_date(name: &str, value: &str) -> ArdResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        ArdError::InvalidParameters(format!(
            "Incorrect date format for {} date {}. It should be YYYY-MM-DD",
            name, value
        ))
    })
}

fn one_of(name: &str, value: &str, valid: &[&str]) -> ArdResult<()> {
    if valid.contains(&value) {
        Ok(())
    } else {
        Err(ArdError::InvalidParameters(format!(
            "{} must be one out of {:?}, got {}",
            name, valid, value
        )))
    }
}

/// Today as YYYY-MM-DD, the default end of a period of interest
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Directories, area and period of interest of a project
#[derive(Debug, Clone)]
pub struct Project {
    pub project_dir: PathBuf,
    pub download_dir: PathBuf,
    pub inventory_dir: PathBuf,
    pub processing_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub data_mount: Option<PathBuf>,
    pub aoi: Geometry,
    /// YYYY-MM-DD
    pub start: String,
    /// YYYY-MM-DD
    pub end: String,
    pub settings: Settings,
}

impl Project {
    /// Create the project directories and validate area and period of interest
    pub fn new<P: AsRef<Path>>(
        project_dir: P,
        aoi: &str,
        start: &str,
        end: &str,
        dirs: ProjectDirs,
        settings: Settings,
    ) -> ArdResult<Self> {
        let project_dir = project_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&project_dir)?;
        log::info!("Using project directory {}", project_dir.display());

        let subdir = |custom: Option<PathBuf>, name: &str| -> ArdResult<PathBuf> {
            let dir = custom.unwrap_or_else(|| project_dir.join(name));
            std::fs::create_dir_all(&dir)?;
            Ok(dir)
        };
        let download_dir = subdir(dirs.download, "download")?;
        let inventory_dir = subdir(dirs.inventory, "inventory")?;
        let processing_dir = subdir(dirs.processing, "processing")?;
        let temp_dir = subdir(dirs.temp, "temp")?;
        log::debug!("Downloads go to {}", download_dir.display());
        log::debug!("Inventories go to {}", inventory_dir.display());
        log::debug!("Processed data goes to {}", processing_dir.display());
        log::debug!("Temporary files go to {}", temp_dir.display());

        let aoi = parse_aoi(aoi)?;
        let start_date = check_date("start", start)?;
        let end_date = check_date("end", end)?;
        if start_date > end_date {
            return Err(ArdError::InvalidParameters(format!(
                "Start date {} is after end date {}",
                start, end
            )));
        }

        if let Some(mount) = &dirs.data_mount {
            if !mount.is_dir() {
                return Err(ArdError::InvalidParameters(format!(
                    "{} is not a directory",
                    mount.display()
                )));
            }
        }

        Ok(Self {
            project_dir,
            download_dir,
            inventory_dir,
            processing_dir,
            temp_dir,
            data_mount: dirs.data_mount,
            aoi,
            start: start.to_string(),
            end: end.to_string(),
            settings,
        })
    }

    pub fn data_mount(&self) -> Option<&Path> {
        self.data_mount.as_deref()
    }
}

/// A Sentinel-1 project with its scene and burst inventories
#[derive(Debug, Clone)]
pub struct Sentinel1Project {
    pub project: Project,
    pub product_type: String,
    pub beam_mode: String,
    pub polarisation: String,
    pub inventory: Option<Inventory>,
    pub inventory_file: Option<PathBuf>,
    pub burst_inventory: Option<BurstInventory>,
    pub burst_inventory_file: Option<PathBuf>,
}

impl Sentinel1Project {
    /// Validate the product selection and pick up an existing inventory
    pub fn new(project: Project, product_type: &str, beam_mode: &str, polarisation: &str) -> ArdResult<Self> {
        one_of("Product type", product_type, &PRODUCT_TYPES)?;
        one_of("Beam mode", beam_mode, &BEAM_MODES)?;
        one_of("Polarisation", polarisation, &POLARISATIONS)?;

        let mut s1 = Self {
            project,
            product_type: product_type.to_string(),
            beam_mode: beam_mode.to_string(),
            polarisation: polarisation.to_string(),
            inventory: None,
            inventory_file: None,
            burst_inventory: None,
            burst_inventory_file: None,
        };
        let existing = s1.project.inventory_dir.join(INVENTORY_FILE);
        if existing.is_file() {
            log::info!("Found an existing inventory file. Re-run the search to overwrite it.");
            s1.inventory_file = Some(existing);
            s1.read_inventory()?;
        }
        Ok(s1)
    }

    fn query(&self) -> SearchQuery {
        SearchQuery {
            aoi: self.project.aoi.clone(),
            start: self.project.start.clone(),
            end: self.project.end.clone(),
            product_type: self.product_type.clone(),
            polarisation: self.polarisation.clone(),
            beam_mode: self.beam_mode.clone(),
        }
    }

    /// Search a catalogue and write the result to `full.inventory.geojson`.
    /// With `append` the result is merged into the existing inventory.
    pub fn search(&mut self, catalogue: Mirror, append: bool, credentials: Option<Credentials>) -> ArdResult<usize> {
        let query = self.query();
        let settings = &self.project.settings;
        let found = match catalogue {
            Mirror::Asf => search::asf_search(&settings.asf_search_url, &query)?,
            Mirror::Scihub => {
                let credentials = match credentials {
                    Some(c) => c,
                    None => Credentials::resolve(settings, None, None, Mirror::Scihub)?,
                };
                search::scihub_search(&settings.scihub_url, &query, &credentials.username, &credentials.password)?
            }
        };

        let inventory_file = self.project.inventory_dir.join(INVENTORY_FILE);
        let inventory = match (append, inventory_file.is_file()) {
            (true, true) => {
                let mut existing = Inventory::read(&inventory_file)?;
                let added = existing.merge(found);
                log::info!("Appended {} new scenes to the inventory", added);
                existing
            }
            _ => found,
        };
        inventory.write(&inventory_file)?;
        let count = inventory.len();
        self.inventory = Some(inventory);
        self.inventory_file = Some(inventory_file);
        Ok(count)
    }

    pub fn read_inventory(&mut self) -> ArdResult<&Inventory> {
        let path = self
            .inventory_file
            .clone()
            .unwrap_or_else(|| self.project.inventory_dir.join(INVENTORY_FILE));
        let inventory = Inventory::read(&path)?;
        self.inventory_file = Some(path);
        Ok(&*self.inventory.insert(inventory))
    }

    fn inventory(&self) -> ArdResult<&Inventory> {
        self.inventory
            .as_ref()
            .ok_or_else(|| ArdError::Inventory("No inventory. Run a search first".to_string()))
    }

    /// Scenes of the inventory that intersect the area of interest
    pub fn refine_inventory(&self) -> ArdResult<Inventory> {
        let refined = self.inventory()?.refine(&self.project.aoi);
        log::info!("{} scenes intersect the area of interest", refined.len());
        Ok(refined)
    }

    /// Size of the inventory in GB
    pub fn download_size(&self, inventory: Option<&Inventory>) -> ArdResult<f64> {
        let inventory = match inventory {
            Some(i) => i,
            None => self.inventory()?,
        };
        let size = inventory.download_size();
        log::info!("There are about {:.1} GB to download", size);
        Ok(size)
    }

    pub fn download(
        &self,
        inventory: &Inventory,
        mirror: Mirror,
        credentials: &Credentials,
        max_workers: Option<usize>,
    ) -> ArdResult<()> {
        download::check_connection(mirror, credentials, &self.project.settings)?;
        download::batch_download(
            inventory,
            &self.project.download_dir,
            mirror,
            credentials,
            &self.project.settings,
            max_workers,
        )
    }

    /// Build the burst inventory from the SLC scenes of `inventory` (or the
    /// full inventory), optionally restricted to the area of interest
    pub fn create_burst_inventory(&mut self, inventory: Option<&Inventory>, refine: bool) -> ArdResult<&BurstInventory> {
        if self.product_type != "SLC" {
            return Err(ArdError::InvalidParameters(
                "Burst inventories can only be created for SLC projects".to_string(),
            ));
        }
        let inventory = match inventory {
            Some(i) => i,
            None => self.inventory()?,
        };
        let mut bursts = BurstInventory::from_inventory(inventory, &self.project.download_dir, self.project.data_mount())?;
        if refine {
            bursts = bursts.refine(&self.project.aoi);
            log::info!("{} bursts intersect the area of interest", bursts.len());
        }
        let outfile = self.project.inventory_dir.join(BURST_INVENTORY_FILE);
        bursts.write(&outfile)?;
        self.burst_inventory_file = Some(outfile);
        Ok(&*self.burst_inventory.insert(bursts))
    }

    pub fn read_burst_inventory(&mut self, burst_file: Option<&Path>) -> ArdResult<&BurstInventory> {
        let path = burst_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.project.inventory_dir.join(BURST_INVENTORY_FILE));
        let bursts = BurstInventory::read(&path)?;
        self.burst_inventory_file = Some(path);
        Ok(&*self.burst_inventory.insert(bursts))
    }
}

#[derive(Serialize)]
struct ProjectSection<'a> {
    project_dir: &'a Path,
    download_dir: &'a Path,
    inventory_dir: &'a Path,
    processing_dir: &'a Path,
    temp_dir: &'a Path,
    data_mount: Option<&'a Path>,
    aoi: String,
    start_date: &'a str,
    end_date: &'a str,
}

#[derive(Serialize)]
struct InventorySection<'a> {
    product_type: &'a str,
    beam_mode: &'a str,
    polarisation: &'a str,
    full_inventory_file: Option<&'a Path>,
    burst_inventory_file: Option<&'a Path>,
}

#[derive(Serialize)]
struct ProjectConfig<'a> {
    project: ProjectSection<'a>,
    inventory: InventorySection<'a>,
    processing: &'a ArdParameters,
    gpt_max_workers: usize,
    max_workers: usize,
}

/// Summary of a batch run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Acquisitions or burst jobs that failed
    pub failed: usize,
    pub timeseries: Vec<PathBuf>,
    pub timescans: Vec<PathBuf>,
    pub mosaics: Vec<PathBuf>,
}

/// A Sentinel-1 project that processes its inventory to ARD
#[derive(Debug, Clone)]
pub struct BatchProject {
    pub s1: Sentinel1Project,
    pub ard_type: String,
    pub ard_parameters: ArdParameters,
    /// Threads of each toolbox invocation
    pub gpt_max_workers: usize,
    /// Jobs run at the same time
    pub max_workers: usize,
    pub config_file: PathBuf,
}

impl BatchProject {
    pub fn new(s1: Sentinel1Project, ard_type: &str) -> ArdResult<Self> {
        let product_type: ProductType = s1.product_type.parse()?;
        if s1.beam_mode != "IW" {
            return Err(ArdError::InvalidParameters(
                "Only 'IW' beam mode supported for processing.".to_string(),
            ));
        }
        let valid = valid_ard_types(product_type);
        if !valid.contains(&ard_type) {
            return Err(ArdError::InvalidParameters(format!(
                "No valid ARD type for product type {}. Select from {:?}",
                product_type, valid
            )));
        }

        let cpus = s1.project.settings.cpus.max(1);
        let (gpt_max_workers, max_workers) = match product_type {
            ProductType::Grd => (cpus, 1),
            ProductType::Slc => (1, cpus),
        };

        let config_file = s1.project.project_dir.join(CONFIG_FILE);
        let batch = Self {
            ard_parameters: ArdParameters::template(product_type, ard_type)?,
            ard_type: ard_type.to_string(),
            s1,
            gpt_max_workers,
            max_workers,
            config_file,
        };
        batch.write_config()?;
        Ok(batch)
    }

    pub fn product_type(&self) -> ArdResult<ProductType> {
        self.s1.product_type.parse()
    }

    fn write_config(&self) -> ArdResult<()> {
        let project = &self.s1.project;
        let config = ProjectConfig {
            project: ProjectSection {
                project_dir: &project.project_dir,
                download_dir: &project.download_dir,
                inventory_dir: &project.inventory_dir,
                processing_dir: &project.processing_dir,
                temp_dir: &project.temp_dir,
                data_mount: project.data_mount(),
                aoi: project.aoi.to_wkt(None),
                start_date: &project.start,
                end_date: &project.end,
            },
            inventory: InventorySection {
                product_type: &self.s1.product_type,
                beam_mode: &self.s1.beam_mode,
                polarisation: &self.s1.polarisation,
                full_inventory_file: self.s1.inventory_file.as_deref(),
                burst_inventory_file: self.s1.burst_inventory_file.as_deref(),
            },
            processing: &self.ard_parameters,
            gpt_max_workers: self.gpt_max_workers,
            max_workers: self.max_workers,
        };
        std::fs::write(&self.config_file, serde_json::to_string_pretty(&config)?)?;
        log::debug!("Wrote project configuration to {}", self.config_file.display());
        Ok(())
    }

    /// Validate the edited parameters and dump them to `project.json`.
    /// A changed ARD type reloads that type's template, dropping other edits.
    pub fn update_ard_parameters(&mut self) -> ArdResult<()> {
        self.ard_parameters.check()?;
        if self.ard_parameters.single_ard.ard_type != self.ard_type {
            let ard_type = self.ard_parameters.single_ard.ard_type.clone();
            log::info!("ARD type changed to {}, reloading its template", ard_type);
            self.ard_parameters = ArdParameters::template(self.product_type()?, &ard_type)?;
            self.ard_type = ard_type;
        }
        self.write_config()
    }

    /// Use a DEM file instead of an auto-downloaded one
    pub fn set_external_dem<P: AsRef<Path>>(&mut self, dem_file: P, ellipsoid_correction: bool) -> ArdResult<()> {
        let dem = DemReader::inspect(dem_file.as_ref())?;
        let current = &self.ard_parameters.single_ard.dem;
        self.ard_parameters.single_ard.dem = DemParams {
            dem_name: "External DEM".to_string(),
            dem_file: dem.path.to_string_lossy().into_owned(),
            dem_nodata: dem.nodata.unwrap_or(0.0),
            dem_resampling: current.dem_resampling.clone(),
            image_resampling: current.image_resampling.clone(),
            egm_correction: ellipsoid_correction,
            out_projection: "WGS84(DD)".to_string(),
        };
        Ok(())
    }

    fn batch_config(&self) -> ArdResult<BatchConfig> {
        let project = &self.s1.project;
        Ok(BatchConfig {
            gpt: Gpt::from_settings(&project.settings, self.gpt_max_workers)?,
            max_workers: self.max_workers,
            download_dir: project.download_dir.clone(),
            data_mount: project.data_mount.clone(),
            processing_dir: project.processing_dir.clone(),
            temp_dir: project.temp_dir.clone(),
            mosaic_tool: PathBuf::from(&project.settings.otb_mosaic),
            params: self.ard_parameters.clone(),
        })
    }

    fn clear_processing_dir(&self) -> ArdResult<()> {
        log::info!("Deleting processing folder to start from scratch");
        for entry in std::fs::read_dir(&self.s1.project.processing_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Process the GRD inventory to ARD, then optionally to time series,
    /// timescans and mosaics
    pub fn grds_to_ard(
        &mut self,
        timeseries: bool,
        timescan: bool,
        mosaic: bool,
        overwrite: bool,
        to_tif: bool,
    ) -> ArdResult<BatchReport> {
        if self.product_type()? != ProductType::Grd {
            return Err(ArdError::InvalidParameters("grds_to_ard needs a GRD project".to_string()));
        }
        self.update_ard_parameters()?;
        if overwrite {
            self.clear_processing_dir()?;
        }
        let cfg = self.batch_config()?;

        let mut inventory = self.s1.inventory()?.clone();
        inventory.check_availability(&cfg.download_dir, cfg.data_mount());
        let mut report = BatchReport {
            failed: grd_batch::grd_to_ard_batch(&cfg, &mut inventory, &self.s1.project.aoi, to_tif)?,
            ..Default::default()
        };
        inventory.write(self.s1.project.inventory_dir.join(PROCESSED_INVENTORY_FILE))?;
        let tracks = inventory.tracks();
        self.s1.inventory = Some(inventory);

        if timeseries || timescan {
            report.timeseries = grd_batch::ards_to_timeseries(&cfg, &tracks)?;
        }
        if timescan {
            report.timescans = grd_batch::timeseries_to_timescan(&cfg, &tracks)?;
        }
        if mosaic && timeseries {
            report.mosaics.extend(grd_batch::mosaic_timeseries(&cfg, &tracks)?);
        }
        if mosaic && timescan {
            report.mosaics.extend(grd_batch::mosaic_timescan(&cfg, &tracks)?);
        }
        if report.failed > 0 {
            log::warn!("{} acquisitions failed to process", report.failed);
        }
        Ok(report)
    }

    /// Process the burst inventory to ARD, then optionally to time series,
    /// timescans and mosaics
    pub fn bursts_to_ards(
        &mut self,
        timeseries: bool,
        timescan: bool,
        mosaic: bool,
        overwrite: bool,
    ) -> ArdResult<BatchReport> {
        if self.product_type()? != ProductType::Slc {
            return Err(ArdError::InvalidParameters("bursts_to_ards needs an SLC project".to_string()));
        }
        let (_, lat) = self.s1.project.aoi.centroid();
        if lat.abs() > POLAR_LATITUDE {
            log::info!("Area of interest beyond {} degrees latitude, geocoding on the ellipsoid", POLAR_LATITUDE);
            self.ard_parameters.single_ard.geocoding = "ellipsoid".to_string();
        }
        self.update_ard_parameters()?;

        log::info!("Deleting temporary files");
        if self.s1.project.temp_dir.exists() {
            std::fs::remove_dir_all(&self.s1.project.temp_dir)?;
        }
        std::fs::create_dir_all(&self.s1.project.temp_dir)?;
        if overwrite {
            self.clear_processing_dir()?;
        }

        let cfg = self.batch_config()?;
        let bursts = self
            .s1
            .burst_inventory
            .as_ref()
            .ok_or_else(|| ArdError::Inventory("No burst inventory. Create one first".to_string()))?;

        let (_, failed) = burst_batch::bursts_to_ards(&cfg, bursts)?;
        let mut report = BatchReport {
            failed,
            ..Default::default()
        };
        let bids = burst_batch::processed_bids(&cfg.processing_dir, bursts);

        if timeseries || timescan {
            report.timeseries = burst_batch::ards_to_timeseries(&cfg, &bids)?;
        }
        if timescan {
            report.timescans = burst_batch::timeseries_to_timescan(&cfg, &bids)?;
        }
        if mosaic && timeseries {
            report.mosaics.extend(burst_batch::mosaic_timeseries(&cfg, &bids)?);
        }
        if mosaic && timescan {
            report.mosaics.extend(burst_batch::mosaic_timescan(&cfg, &bids)?);
        }
        if report.failed > 0 {
            log::warn!("{} burst jobs failed to process", report.failed);
        }
        Ok(report)
    }
}
