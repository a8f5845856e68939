//! Shared setup of the batch drivers.

use crate::core::gpt::Gpt;
use crate::core::params::ArdParameters;
use crate::types::{ArdError, ArdResult};
use rayon::prelude::*;
use std::path::PathBuf;

/// Directories, tools and parameters of a batch run
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Toolbox, carrying the threads of each invocation
    pub gpt: Gpt,
    /// Jobs run at the same time
    pub max_workers: usize,
    pub download_dir: PathBuf,
    pub data_mount: Option<PathBuf>,
    pub processing_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// External mosaicking tool
    pub mosaic_tool: PathBuf,
    pub params: ArdParameters,
}

impl BatchConfig {
    pub fn data_mount(&self) -> Option<&std::path::Path> {
        self.data_mount.as_deref()
    }
}

/// Run `job` over `items` on a pool of `workers` threads and return the
/// results in input order
pub fn run_pool<T, R, F>(items: &[T], workers: usize, job: F) -> ArdResult<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| ArdError::Processing(format!("Failed to build worker pool: {}", e)))?;
    Ok(pool.install(|| items.par_iter().map(&job).collect()))
}
