//! Process-wide settings gathered from the environment.

use crate::types::{ArdError, ArdResult};
use std::path::{Path, PathBuf};

pub const ENV_GPT: &str = "ARDFLOW_GPT";
pub const ENV_OTB_MOSAIC: &str = "ARDFLOW_OTB_MOSAIC";
pub const ENV_USERNAME: &str = "ARDFLOW_USERNAME";
pub const ENV_PASSWORD: &str = "ARDFLOW_PASSWORD";
pub const ENV_ASF_SEARCH_URL: &str = "ARDFLOW_ASF_SEARCH_URL";
pub const ENV_SCIHUB_URL: &str = "ARDFLOW_SCIHUB_URL";

pub const DEFAULT_ASF_SEARCH_URL: &str = "https://api.daac.asf.alaska.edu/services/search/param";
pub const DEFAULT_SCIHUB_URL: &str = "https://apihub.copernicus.eu/apihub";
pub const DEFAULT_OTB_MOSAIC: &str = "otbcli_Mosaic";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Explicit location of the graph processing tool
    pub gpt: Option<PathBuf>,
    pub otb_mosaic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub asf_search_url: String,
    pub scihub_url: String,
    pub cpus: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gpt: None,
            otb_mosaic: DEFAULT_OTB_MOSAIC.to_string(),
            username: None,
            password: None,
            asf_search_url: DEFAULT_ASF_SEARCH_URL.to_string(),
            scihub_url: DEFAULT_SCIHUB_URL.to_string(),
            cpus: num_cpus::get(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; empty values count as unset
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            gpt: get(ENV_GPT).map(PathBuf::from),
            otb_mosaic: get(ENV_OTB_MOSAIC).unwrap_or(defaults.otb_mosaic),
            username: get(ENV_USERNAME),
            password: get(ENV_PASSWORD),
            asf_search_url: get(ENV_ASF_SEARCH_URL).unwrap_or(defaults.asf_search_url),
            scihub_url: get(ENV_SCIHUB_URL).unwrap_or(defaults.scihub_url),
            cpus: defaults.cpus,
        }
    }

    /// Locate the graph processing tool
    pub fn gpt_path(&self) -> ArdResult<PathBuf> {
        if let Some(gpt) = &self.gpt {
            if gpt.is_file() {
                return Ok(gpt.clone());
            }
            return Err(ArdError::Processing(format!(
                "{} points to {}, which does not exist",
                ENV_GPT,
                gpt.display()
            )));
        }

        let on_path = std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
            .unwrap_or_default();
        let in_home = dirs::home_dir()
            .map(|home| vec![home.join("esa-snap/bin"), home.join("snap/bin")])
            .unwrap_or_default();

        find_executable("gpt", on_path.iter().chain(in_home.iter())).ok_or_else(|| {
            ArdError::Processing(format!(
                "Could not find the SNAP gpt executable. Set {} to its location",
                ENV_GPT
            ))
        })
    }
}

fn find_executable<'a, I: Iterator<Item = &'a PathBuf>>(name: &str, dirs: I) -> Option<PathBuf> {
    dirs.map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_unset() {
        let settings = Settings::from_lookup(|_| None);
        assert_eq!(settings.otb_mosaic, DEFAULT_OTB_MOSAIC);
        assert_eq!(settings.asf_search_url, DEFAULT_ASF_SEARCH_URL);
        assert!(settings.username.is_none());
        assert!(settings.cpus >= 1);
    }

    #[test]
    fn test_lookup_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_USERNAME, "user"),
            (ENV_PASSWORD, ""),
            (ENV_SCIHUB_URL, "http://localhost:8080"),
        ]
        .into_iter()
        .collect();
        let settings = Settings::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(settings.username.as_deref(), Some("user"));
        assert_eq!(settings.password, None);
        assert_eq!(settings.scihub_url, "http://localhost:8080");
    }

    #[test]
    fn test_missing_explicit_gpt_is_an_error() {
        let settings = Settings {
            gpt: Some(PathBuf::from("/nonexistent/gpt")),
            ..Default::default()
        };
        assert!(settings.gpt_path().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let gpt = dir.path().join("gpt");
        std::fs::write(&gpt, "#!/bin/sh\n").unwrap();
        let dirs = vec![PathBuf::from("/nonexistent"), dir.path().to_path_buf()];
        assert_eq!(find_executable("gpt", dirs.iter()), None);

        std::fs::set_permissions(&gpt, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_executable("gpt", dirs.iter()), Some(gpt));
    }
}
