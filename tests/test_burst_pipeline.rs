#![cfg(unix)]

mod common;

use ardflow::core::batch::BatchConfig;
use ardflow::core::burst_batch;
use ardflow::core::burst_to_ard::{BS_MARKER, COH_MARKER, POL_MARKER};
use ardflow::core::params::ArdParameters;
use ardflow::io::{BurstInventory, BurstRecord};
use ardflow::types::ProductType;
use ardflow::Gpt;
use tempfile::TempDir;

const MASTER: &str = "S1A_IW_SLC__1SDV_20200112T051636_20200112T051703_030757_03869A_1A2B";
const SLAVE: &str = "S1A_IW_SLC__1SDV_20200124T051636_20200124T051703_030932_038CB2_3C4D";

fn burst(scene_id: &str, date: &str, burst_nr: usize) -> BurstRecord {
    BurstRecord {
        scene_id: scene_id.to_string(),
        track: "117".to_string(),
        direction: "ASCENDING".to_string(),
        date: date.to_string(),
        swath_id: "IW1".to_string(),
        anx_time: 1234,
        burst_nr,
        bid: BurstRecord::burst_id("ASCENDING", "117", "IW1", 1234),
        geometry: None,
    }
}

fn config(dir: &std::path::Path) -> BatchConfig {
    let mut params = ArdParameters::template(ProductType::Slc, "OST-ALL").expect("Failed to load template");
    params.single_ard.polarisation = "VV, VH".to_string();
    params.single_ard.coherence_bands = "VV".to_string();
    BatchConfig {
        gpt: Gpt::new(common::fake_gpt(dir), 1),
        max_workers: 2,
        download_dir: dir.join("download"),
        data_mount: None,
        processing_dir: dir.join("processing"),
        temp_dir: dir.join("temp"),
        mosaic_tool: dir.join("mosaic"),
        params,
    }
}

#[test]
fn test_bursts_to_ards_with_fake_toolbox() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().expect("Failed to create temp directory");
    let cfg = config(dir.path());
    common::fake_download(&cfg.download_dir, MASTER);
    common::fake_download(&cfg.download_dir, SLAVE);

    let bursts = BurstInventory::new(vec![burst(SLAVE, "20200124", 4), burst(MASTER, "20200112", 3)]);
    let (outputs, failed) = burst_batch::bursts_to_ards(&cfg, &bursts).expect("Batch failed");
    assert_eq!(failed, 0);
    assert_eq!(outputs.len(), 2);

    let bid = BurstRecord::burst_id("ASCENDING", "117", "IW1", 1234);
    let first = cfg.processing_dir.join(&bid).join("20200112");
    let prefix = format!("20200112_{}", bid);
    for suffix in ["bs", "LS", "pol", "coh"] {
        let dim = first.join(format!("{}_{}.dim", prefix, suffix));
        assert!(dim.is_file(), "{} missing", dim.display());
    }
    for marker in [BS_MARKER, POL_MARKER, COH_MARKER] {
        assert!(first.join(marker).is_file());
    }

    // the last acquisition has no partner for coherence
    let last = cfg.processing_dir.join(&bid).join("20200124");
    assert!(last.join(BS_MARKER).is_file());
    assert!(!last.join(COH_MARKER).exists());

    assert_eq!(burst_batch::processed_bids(&cfg.processing_dir, &bursts), vec![bid]);

    let calls = common::calls(dir.path());
    let count = |prefix: &str| calls.iter().filter(|c| c.starts_with(prefix)).count();
    println!("Toolbox calls: {:?}", calls);
    // master imports for both dates, the slave import for the coherence pair
    assert_eq!(count("burst_import_"), 3);
    assert_eq!(count("coregistration_"), 1);
    assert_eq!(count("ha_alpha_"), 2);

    // markers make a rerun a no-op
    let before = calls.len();
    burst_batch::bursts_to_ards(&cfg, &bursts).expect("Rerun failed");
    assert_eq!(common::calls(dir.path()).len(), before);
}

#[test]
fn test_missing_download_fails_preparation() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let cfg = config(dir.path());
    let bursts = BurstInventory::new(vec![burst(MASTER, "20200112", 3)]);
    assert!(burst_batch::bursts_to_ards(&cfg, &bursts).is_err());
}
