//! Command line front end of the Sentinel-1 ARD workflow
//!
//! # Usage
//!
//! ```bash
//! # Describe a scene from its identifier
//! ardflow info S1A_IW_GRDH_1SDV_20200112T051636_20200112T051701_030757_03869A_4B9D
//!
//! # Print an ARD preset
//! ardflow params GRD OST-GTC
//!
//! # Search, download and process a GRD project
//! ardflow search -p ./project --aoi "POLYGON ((...))" --start 2020-01-01 --end 2020-02-01
//! ardflow download -p ./project --aoi "POLYGON ((...))" --mirror asf --refine
//! ardflow process grd -p ./project --aoi "POLYGON ((...))" --timeseries --timescan --mosaic
//!
//! # SLC projects need a burst inventory first
//! ardflow bursts -p ./project --aoi "POLYGON ((...))" --refine
//! ardflow process slc -p ./project --aoi "POLYGON ((...))" --ard-type OST-COH --timeseries
//! ```

use anyhow::{bail, Context, Result};
use ardflow::config::Settings;
use ardflow::core::params::{template_json, ArdParameters};
use ardflow::io::{Credentials, Mirror};
use ardflow::project::{self, BatchProject, BatchReport, Project, ProjectDirs, Sentinel1Project};
use ardflow::scene::Sentinel1Scene;
use ardflow::types::ProductType;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ProjectArgs {
    /// Project directory
    #[arg(short, long)]
    project_dir: PathBuf,

    /// Area of interest as WKT or GeoJSON file
    #[arg(short, long)]
    aoi: String,

    /// Start of the period of interest (YYYY-MM-DD)
    #[arg(long, default_value = project::S1_FIRST_DATE)]
    start: String,

    /// End of the period of interest (YYYY-MM-DD), defaults to today
    #[arg(long)]
    end: Option<String>,

    /// Read-only archive with the downloaded layout
    #[arg(long)]
    data_mount: Option<PathBuf>,

    /// Product type: *, RAW, SLC or GRD
    #[arg(long, default_value = "GRD")]
    product_type: String,

    /// Beam mode: *, IW, EW or SM
    #[arg(long, default_value = "IW")]
    beam_mode: String,

    /// Polarisation: *, VV, VH, HV, HH, "VV VH" or "HH HV"
    #[arg(long, default_value = "*")]
    polarisation: String,
}

#[derive(Copy, Clone, ValueEnum)]
enum Level {
    Grd,
    Slc,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the metadata encoded in a scene identifier
    Info {
        scene: String,
    },

    /// Print the parameters of an ARD preset
    Params {
        /// GRD or SLC
        product_type: String,
        /// Preset name, e.g. OST-GTC
        ard_type: String,
    },

    /// Search a catalogue and write the project inventory
    Search {
        #[command(flatten)]
        project: ProjectArgs,

        /// Catalogue: asf or scihub
        #[arg(long, default_value = "asf")]
        catalogue: String,

        /// Merge into an existing inventory
        #[arg(long)]
        append: bool,
    },

    /// Download the scenes of the project inventory
    Download {
        #[command(flatten)]
        project: ProjectArgs,

        /// Mirror: asf or scihub
        #[arg(short, long, default_value = "asf")]
        mirror: String,

        /// Only scenes intersecting the area of interest
        #[arg(long)]
        refine: bool,

        #[arg(short, long)]
        username: Option<String>,

        /// Parallel downloads, capped by the mirror
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Create the burst inventory of an SLC project
    Bursts {
        #[command(flatten)]
        project: ProjectArgs,

        /// Only bursts intersecting the area of interest
        #[arg(long)]
        refine: bool,
    },

    /// Process the project to ARD
    Process {
        #[arg(value_enum)]
        level: Level,

        #[command(flatten)]
        project: ProjectArgs,

        /// ARD preset
        #[arg(long, default_value = "OST-GTC")]
        ard_type: String,

        /// JSON file with the processing parameters, replacing the preset
        #[arg(long)]
        params: Option<PathBuf>,

        /// External DEM file
        #[arg(long)]
        dem: Option<PathBuf>,

        #[arg(long)]
        timeseries: bool,

        #[arg(long)]
        timescan: bool,

        #[arg(long)]
        mosaic: bool,

        /// Delete earlier results first
        #[arg(long)]
        overwrite: bool,

        /// Also write GeoTIFFs of the GRD products
        #[arg(long)]
        to_tif: bool,
    },
}

fn open_project(args: &ProjectArgs, settings: &Settings) -> Result<Sentinel1Project> {
    let dirs = ProjectDirs {
        data_mount: args.data_mount.clone(),
        ..Default::default()
    };
    let end = args.end.clone().unwrap_or_else(project::today);
    let project = Project::new(&args.project_dir, &args.aoi, &args.start, &end, dirs, settings.clone())
        .context("Failed to set up the project")?;
    Ok(Sentinel1Project::new(
        project,
        &args.product_type,
        &args.beam_mode,
        &args.polarisation,
    )?)
}

fn print_report(report: &BatchReport) {
    for path in report.timeseries.iter().chain(&report.timescans).chain(&report.mosaics) {
        println!("{}", path.display());
    }
    if report.failed > 0 {
        eprintln!("{} jobs failed, see the log for details", report.failed);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let settings = Settings::from_env();

    match cli.command {
        Commands::Info { scene } => {
            let scene = Sentinel1Scene::new(&scene)?;
            for (key, value) in scene.info() {
                println!("{:<18} {}", key, value);
            }
        }

        Commands::Params { product_type, ard_type } => {
            let product_type: ProductType = product_type.parse()?;
            println!("{}", template_json(product_type, &ard_type)?);
        }

        Commands::Search { project, catalogue, append } => {
            let mut s1 = open_project(&project, &settings)?;
            let catalogue: Mirror = catalogue.parse()?;
            let count = s1.search(catalogue, append, None)?;
            println!("{} scenes in the inventory", count);
        }

        Commands::Download {
            project,
            mirror,
            refine,
            username,
            workers,
        } => {
            let s1 = open_project(&project, &settings)?;
            if s1.inventory.is_none() {
                bail!("No inventory in {}. Run search first", project.project_dir.display());
            }
            let mirror: Mirror = mirror.parse()?;
            let inventory = if refine {
                s1.refine_inventory()?
            } else {
                s1.inventory.clone().unwrap_or_default()
            };
            s1.download_size(Some(&inventory))?;
            let credentials = Credentials::resolve(&settings, username, None, mirror)?;
            s1.download(&inventory, mirror, &credentials, workers)
                .context("Download did not complete")?;
        }

        Commands::Bursts { project, refine } => {
            let mut s1 = open_project(&project, &settings)?;
            let bursts = s1.create_burst_inventory(None, refine)?;
            println!("{} bursts in the inventory", bursts.len());
        }

        Commands::Process {
            level,
            project,
            ard_type,
            params,
            dem,
            timeseries,
            timescan,
            mosaic,
            overwrite,
            to_tif,
        } => {
            let mut project = project;
            project.product_type = match level {
                Level::Grd => "GRD",
                Level::Slc => "SLC",
            }
            .to_string();
            let s1 = open_project(&project, &settings)?;
            let mut batch = BatchProject::new(s1, &ard_type)?;

            if let Some(file) = params {
                let json = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                batch.ard_parameters = ArdParameters::from_json(&json)?;
            }
            if let Some(dem) = dem {
                batch.set_external_dem(&dem, true)?;
            }

            let report = match level {
                Level::Grd => batch.grds_to_ard(timeseries, timescan, mosaic, overwrite, to_tif)?,
                Level::Slc => {
                    if batch.s1.read_burst_inventory(None).is_err() {
                        batch.s1.create_burst_inventory(None, true)?;
                    }
                    batch.bursts_to_ards(timeseries, timescan, mosaic, overwrite)?
                }
            };
            print_report(&report);
        }
    }
    Ok(())
}
