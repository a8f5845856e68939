#![cfg(unix)]

mod common;

use ardflow::core::grd_to_ard::{grd_to_ard, PROCESSED_MARKER};
use ardflow::core::params::ArdParameters;
use ardflow::geometry::Polygon;
use ardflow::io::{Inventory, SceneRecord};
use ardflow::project::{BatchProject, Project, ProjectDirs, Sentinel1Project, INVENTORY_FILE};
use ardflow::types::{ArdError, BoundingBox, ProductType};
use ardflow::{Gpt, Settings};
use tempfile::TempDir;

const SCENE: &str = "S1A_IW_GRDH_1SDV_20200112T051636_20200112T051701_030757_03869A_4B9D";
const AOI: &str = "POLYGON ((11 47, 12 47, 12 48, 11 48, 11 47))";

fn gtc_params() -> ArdParameters {
    let mut params = ArdParameters::template(ProductType::Grd, "OST-GTC").expect("Failed to load template");
    params.single_ard.remove_border_noise = false;
    params.single_ard.resolution = 20;
    params
}

#[test]
fn test_grd_to_ard_with_fake_toolbox() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().expect("Failed to create temp directory");
    let gpt = Gpt::new(common::fake_gpt(dir.path()), 2);

    let input = dir.path().join(format!("{}.zip", SCENE));
    std::fs::write(&input, "").expect("Failed to write input");
    let out_dir = dir.path().join("out");
    let temp_dir = dir.path().join("temp");

    let mut params = gtc_params();
    params.single_ard.create_ls_mask = true;
    params.single_ard.remove_speckle = true;

    let (bs, ls) = grd_to_ard(&gpt, &[input], &out_dir, "20200112_117", &temp_dir, &params, None)
        .expect("Pipeline failed");

    let bs = bs.expect("No backscatter product");
    assert_eq!(bs, out_dir.join("20200112_117_BS.dim"));
    assert!(bs.is_file());
    assert!(out_dir.join("20200112_117_BS.data").join("Sigma0_VV.img").is_file());
    assert_eq!(ls, Some(out_dir.join("20200112_117_LS.dim")));
    assert!(out_dir.join(PROCESSED_MARKER).is_file());

    let calls = common::calls(dir.path());
    println!("Toolbox calls: {:?}", calls);
    assert!(calls[0].starts_with("grd_import_"));
    assert!(calls.iter().any(|c| c == "Calibration"));
    assert!(calls.iter().any(|c| c == "Multilook"));
    assert!(calls.iter().any(|c| c == "Speckle-Filter"));
    assert!(calls.iter().any(|c| c.starts_with("ls_map_")));
    assert_eq!(calls.last().map(String::as_str), Some("Terrain-Correction"));

    // intermediate products are cleaned up
    let leftovers: Vec<_> = std::fs::read_dir(&temp_dir)
        .expect("Temp dir missing")
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |x| x == "dim"))
        .collect();
    assert!(leftovers.is_empty(), "Leftover products: {:?}", leftovers);
}

#[test]
fn test_failing_toolbox_reports_logfile() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let gpt = Gpt::new(common::failing_gpt(dir.path()), 1);
    let input = dir.path().join(format!("{}.zip", SCENE));
    std::fs::write(&input, "").expect("Failed to write input");
    let out_dir = dir.path().join("out");

    let err = grd_to_ard(&gpt, &[input], &out_dir, "x", &dir.path().join("temp"), &gtc_params(), None)
        .expect_err("Pipeline should fail");
    match err {
        ArdError::GptRuntime { code, logfile, .. } => {
            assert_eq!(code, 1);
            let log = std::fs::read_to_string(&logfile).expect("No log file");
            assert!(log.contains("operator failed"));
        }
        other => panic!("Unexpected error: {}", other),
    }
    assert!(!out_dir.join(PROCESSED_MARKER).exists());
}

#[test]
fn test_batch_project_processes_inventory() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().expect("Failed to create temp directory");
    let settings = Settings {
        gpt: Some(common::fake_gpt(dir.path())),
        cpus: 2,
        ..Settings::default()
    };
    let project_dir = dir.path().join("project");
    let project = Project::new(&project_dir, AOI, "2020-01-01", "2020-01-31", ProjectDirs::default(), settings)
        .expect("Failed to create project");

    // inventory with one downloaded scene covering half of the area
    let footprint = Polygon::from_bbox(&BoundingBox {
        min_lon: 11.5,
        max_lon: 13.0,
        min_lat: 46.5,
        max_lat: 48.5,
    });
    let record = SceneRecord {
        identifier: SCENE.to_string(),
        relativeorbit: "117".to_string(),
        acquisitiondate: "20200112".to_string(),
        product_type: "GRD".to_string(),
        geometry: Some(footprint),
        ..Default::default()
    };
    Inventory::from_records(vec![record])
        .write(project.inventory_dir.join(INVENTORY_FILE))
        .expect("Failed to write inventory");
    common::fake_download(&project.download_dir, SCENE);

    let s1 = Sentinel1Project::new(project, "GRD", "IW", "*").expect("Failed to open project");
    assert_eq!(s1.inventory.as_ref().map(Inventory::len), Some(1));
    let mut batch = BatchProject::new(s1, "OST-GTC").expect("Failed to create batch project");
    batch.ard_parameters.single_ard.remove_border_noise = false;

    let report = batch
        .grds_to_ard(false, false, false, false, false)
        .expect("Batch processing failed");
    assert_eq!(report.failed, 0);

    let out_dir = project_dir.join("processing").join("117").join("20200112");
    assert!(out_dir.join("20200112_117_BS.dim").is_file());
    assert!(out_dir.join(PROCESSED_MARKER).is_file());

    let processed = batch.s1.inventory.as_ref().expect("No inventory");
    let record = processed.get(SCENE).expect("Scene missing");
    assert_eq!(record.out_dimap, Some(out_dir.join("20200112_117_BS.dim")));

    // the unreadable archive has no footprint, so the import is cut to the area
    let calls = common::calls(dir.path());
    assert!(calls[0].starts_with("grd_import_subset_"), "{:?}", calls);

    // a second run finds the marker and skips the toolbox
    let before = common::calls(dir.path()).len();
    batch
        .grds_to_ard(false, false, false, false, false)
        .expect("Second run failed");
    assert_eq!(common::calls(dir.path()).len(), before);

    let config: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(project_dir.join("project.json")).expect("No project.json"))
            .expect("Invalid project.json");
    assert_eq!(config["processing"]["single_ARD"]["remove_border_noise"], false);
}
