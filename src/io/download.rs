//! Scene downloads from the Copernicus scihub and ASF mirrors.

use crate::config::Settings;
use crate::io::inventory::{Inventory, SceneRecord};
use crate::io::safe::SafeReader;
use crate::io::search::scihub_uuid;
use crate::retry::{retry, RetryPolicy};
use crate::scene::Sentinel1Scene;
use crate::types::{ArdError, ArdResult};
use rayon::prelude::*;
use reqwest::blocking::{Client, Response};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Small ASF product requested to check the credentials
const ASF_CHECK_URL: &str = "https://datapool.asf.alaska.edu/SLC/SA/S1A_IW_SLC__1SSV_20160801T234454_20160801T234520_012413_0135F9_B926.zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    Scihub,
    Asf,
}

impl Mirror {
    /// Parallel downloads the mirror tolerates
    pub fn max_concurrency(&self) -> usize {
        match self {
            Mirror::Scihub => 2,
            Mirror::Asf => 10,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Mirror::Scihub => RetryPolicy::DOWNLOAD_SCIHUB,
            Mirror::Asf => RetryPolicy::DOWNLOAD_ASF,
        }
    }
}

impl std::fmt::Display for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mirror::Scihub => write!(f, "scihub"),
            Mirror::Asf => write!(f, "ASF"),
        }
    }
}

impl std::str::FromStr for Mirror {
    type Err = ArdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scihub" | "copernicus" | "1" => Ok(Mirror::Scihub),
            "asf" | "2" => Ok(Mirror::Asf),
            _ => Err(ArdError::InvalidParameters(format!(
                "Unknown download mirror: {}. Choose scihub or asf",
                s
            ))),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    /// Explicit values first, then the environment, then an interactive prompt
    pub fn resolve(
        settings: &Settings,
        username: Option<String>,
        password: Option<String>,
        mirror: Mirror,
    ) -> ArdResult<Self> {
        let username = match username.or_else(|| settings.username.clone()) {
            Some(u) => u,
            None => {
                print!("Your {} username: ", mirror);
                std::io::stdout().flush()?;
                let mut line = String::new();
                std::io::stdin().read_line(&mut line)?;
                line.trim().to_string()
            }
        };
        let password = match password.or_else(|| settings.password.clone()) {
            Some(p) => p,
            None => {
                print!("Your {} password: ", mirror);
                std::io::stdout().flush()?;
                rpassword::read_password()?
            }
        };
        Ok(Self { username, password })
    }
}

/// What happened to a single requested scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded,
    AlreadyDownloaded,
    /// The mirror does not hold the product
    Missing,
}

fn download_client() -> ArdResult<Client> {
    Client::builder()
        .cookie_store(true)
        .timeout(Duration::from_secs(3600))
        .user_agent(concat!("ardflow/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ArdError::Download(format!("Failed to create HTTP client: {}", e)))
}

/// Check that the mirror accepts the credentials
pub fn check_connection(mirror: Mirror, credentials: &Credentials, settings: &Settings) -> ArdResult<()> {
    let client = download_client()?;
    let status = match mirror {
        Mirror::Scihub => {
            let url = format!(
                "{}/odata/v1/Products?$select=Id&$top=1",
                settings.scihub_url.trim_end_matches('/')
            );
            client
                .get(url)
                .basic_auth(&credentials.username, Some(&credentials.password))
                .send()?
                .status()
        }
        Mirror::Asf => asf_request(&client, ASF_CHECK_URL, credentials, None)?.status(),
    };

    match status {
        StatusCode::UNAUTHORIZED => Err(ArdError::Download(format!(
            "Wrong username or password for {}",
            mirror
        ))),
        s if s.is_success() || s == StatusCode::PARTIAL_CONTENT => {
            log::info!("Connection to {} established", mirror);
            Ok(())
        }
        s => Err(ArdError::Download(format!(
            "Connection to {} failed with HTTP {}",
            mirror, s
        ))),
    }
}

/// ASF redirects to an authentication server; the credentials go to the redirect target
fn asf_request(
    client: &Client,
    url: &str,
    credentials: &Credentials,
    range_start: Option<u64>,
) -> ArdResult<Response> {
    let first = client
        .get(url)
        .basic_auth(&credentials.username, Some(&credentials.password))
        .send()?;
    if first.status() == StatusCode::NOT_FOUND {
        return Ok(first);
    }
    let target = first.url().clone();
    let mut request = client
        .get(target)
        .basic_auth(&credentials.username, Some(&credentials.password));
    if let Some(start) = range_start {
        request = request.header(RANGE, format!("bytes={}-", start));
    }
    Ok(request.send()?)
}

/// Download one product archive to `filename`, resuming a partial file
pub fn download_file(
    client: &Client,
    mirror: Mirror,
    url: &str,
    filename: &Path,
    credentials: &Credentials,
) -> ArdResult<DownloadOutcome> {
    let marker = filename.with_extension("downloaded");
    if marker.exists() {
        return Ok(DownloadOutcome::AlreadyDownloaded);
    }
    if let Some(parent) = filename.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let first_byte = std::fs::metadata(filename).map(|m| m.len()).unwrap_or(0);
    let range_start = (first_byte > 0).then_some(first_byte);

    let mut response = match mirror {
        Mirror::Asf => asf_request(client, url, credentials, range_start)?,
        Mirror::Scihub => {
            let mut request = client
                .get(url)
                .basic_auth(&credentials.username, Some(&credentials.password));
            if let Some(start) = range_start {
                request = request.header(RANGE, format!("bytes={}-", start));
            }
            request.send()?
        }
    };

    match response.status() {
        StatusCode::NOT_FOUND if mirror == Mirror::Asf => {
            log::info!(
                "Product {} missing from the archive, continuing.",
                filename.display()
            );
            return Ok(DownloadOutcome::Missing);
        }
        StatusCode::RANGE_NOT_SATISFIABLE => {
            log::debug!("{} is already complete", filename.display());
        }
        StatusCode::PARTIAL_CONTENT => {
            log::info!(
                "Resuming download of {} at byte {}",
                filename.display(),
                first_byte
            );
            let file = OpenOptions::new().append(true).open(filename)?;
            write_body(&mut response, file)?;
        }
        s if s.is_success() => {
            log::info!("Downloading scene to: {}", filename.display());
            write_body(&mut response, File::create(filename)?)?;
        }
        s => {
            return Err(ArdError::Download(format!(
                "Downloading {} failed with HTTP {}",
                url, s
            )))
        }
    }

    log::info!("Checking the zip archive of {} for inconsistency", filename.display());
    if let Err(e) = SafeReader::verify_archive(filename) {
        std::fs::remove_file(filename)?;
        return Err(ArdError::Download(format!(
            "{} did not pass the zip test: {}. Re-downloading the full scene",
            filename.display(),
            e
        )));
    }
    log::info!("{} passed the zip test.", filename.display());
    File::create(&marker)?;
    Ok(DownloadOutcome::Downloaded)
}

fn write_body(response: &mut Response, file: File) -> ArdResult<u64> {
    let mut writer = BufWriter::new(file);
    let bytes = std::io::copy(response, &mut writer)?;
    writer.flush()?;
    log::debug!("Wrote {} bytes", bytes);
    Ok(bytes)
}

fn is_retryable(error: &ArdError) -> bool {
    matches!(
        error,
        ArdError::Download(_) | ArdError::Http(_) | ArdError::Io(_) | ArdError::Zip(_)
    )
}

struct DownloadJob<'a> {
    record: &'a SceneRecord,
    scene: Sentinel1Scene,
    filename: PathBuf,
}

fn download_url(
    record: &SceneRecord,
    scene: &Sentinel1Scene,
    mirror: Mirror,
    credentials: &Credentials,
    settings: &Settings,
) -> ArdResult<String> {
    match mirror {
        Mirror::Asf => Ok(scene.asf_url()),
        Mirror::Scihub => {
            let uuid = if record.uuid.is_empty() {
                scihub_uuid(
                    &settings.scihub_url,
                    &scene.scene_id,
                    &credentials.username,
                    &credentials.password,
                )?
            } else {
                record.uuid.clone()
            };
            Ok(Sentinel1Scene::scihub_url(&settings.scihub_url, &uuid))
        }
    }
}

/// Download every scene of the inventory that is not on disk yet
pub fn batch_download(
    inventory: &Inventory,
    download_dir: &Path,
    mirror: Mirror,
    credentials: &Credentials,
    settings: &Settings,
    max_workers: Option<usize>,
) -> ArdResult<()> {
    batch_download_with(
        inventory,
        download_dir,
        mirror,
        credentials,
        settings,
        max_workers,
        &mirror.retry_policy(),
    )
}

/// [`batch_download`] with an explicit retry policy per scene. The product
/// URL is resolved inside the retried operation.
pub fn batch_download_with(
    inventory: &Inventory,
    download_dir: &Path,
    mirror: Mirror,
    credentials: &Credentials,
    settings: &Settings,
    max_workers: Option<usize>,
    policy: &RetryPolicy,
) -> ArdResult<()> {
    let mut jobs = Vec::new();
    for record in inventory.iter() {
        let scene = record.scene()?;
        if scene.is_downloaded(download_dir) {
            log::info!("{} has been already downloaded.", scene.scene_id);
            continue;
        }
        jobs.push(DownloadJob {
            record,
            filename: scene.download_path(download_dir),
            scene,
        });
    }

    let mut missing = 0;
    if !jobs.is_empty() {
        let workers = max_workers
            .unwrap_or(mirror.max_concurrency())
            .clamp(1, mirror.max_concurrency());
        log::info!(
            "Downloading {} scenes from {} with {} parallel downloads",
            jobs.len(),
            mirror,
            workers
        );
        let client = download_client()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| ArdError::Processing(format!("Failed to create thread pool: {}", e)))?;

        let outcomes: Vec<(String, ArdResult<DownloadOutcome>)> = pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let result = retry(policy, is_retryable, || {
                        let url = download_url(job.record, &job.scene, mirror, credentials, settings)?;
                        download_file(&client, mirror, &url, &job.filename, credentials)
                    });
                    (job.scene.scene_id.clone(), result)
                })
                .collect()
        });

        for (scene_id, outcome) in outcomes {
            match outcome {
                Ok(DownloadOutcome::Missing) => missing += 1,
                Ok(_) => {}
                Err(e) => log::error!("Download of {} failed: {}", scene_id, e),
            }
        }
    }

    let downloaded = inventory
        .iter()
        .filter_map(|r| r.scene().ok())
        .filter(|s| s.is_downloaded(download_dir))
        .count();
    if downloaded + missing < inventory.len() {
        return Err(ArdError::Download(format!(
            "{} download is incomplete or has failed ({} of {} scenes)",
            mirror,
            downloaded,
            inventory.len()
        )));
    }
    log::info!("All products are downloaded.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_settings() {
        assert_eq!("asf".parse::<Mirror>().unwrap(), Mirror::Asf);
        assert_eq!("SciHub".parse::<Mirror>().unwrap(), Mirror::Scihub);
        assert!("peps".parse::<Mirror>().is_err());
        assert_eq!(Mirror::Scihub.max_concurrency(), 2);
        assert_eq!(Mirror::Asf.retry_policy().tries, 5);
    }

    #[test]
    fn test_credentials_from_settings() {
        let settings = Settings {
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let creds = Credentials::resolve(&settings, None, None, Mirror::Asf).unwrap();
        assert_eq!(creds.username, "user");
        assert!(!format!("{:?}", creds).contains("secret"));

        let creds =
            Credentials::resolve(&settings, Some("other".to_string()), None, Mirror::Asf).unwrap();
        assert_eq!(creds.username, "other");
    }

    #[test]
    fn test_already_downloaded_inventory_needs_no_network() {
        let dir = tempfile::tempdir().unwrap();
        let scene =
            Sentinel1Scene::new("S1A_IW_GRDH_1SDV_20141003T040550_20141003T040619_002660_002F64_EC04")
                .unwrap();
        let marker = scene.download_marker(dir.path());
        std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
        std::fs::write(&marker, "").unwrap();

        let inventory = Inventory::from_records(vec![SceneRecord {
            identifier: scene.scene_id.clone(),
            ..Default::default()
        }]);
        let creds = Credentials {
            username: "u".to_string(),
            password: "p".to_string(),
        };
        batch_download(&inventory, dir.path(), Mirror::Asf, &creds, &Settings::default(), None)
            .unwrap();
    }
}
