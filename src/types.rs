use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Polarization channels of Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl Polarization {
    pub const ALL: [Polarization; 4] = [
        Polarization::VV,
        Polarization::VH,
        Polarization::HH,
        Polarization::HV,
    ];

    /// True for the co-polarized channels (VV, HH)
    pub fn is_co_pol(&self) -> bool {
        matches!(self, Polarization::VV | Polarization::HH)
    }
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl FromStr for Polarization {
    type Err = ArdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            other => Err(ArdError::InvalidParameters(format!(
                "Invalid polarization: {}",
                other
            ))),
        }
    }
}

/// Sentinel-1 acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquisitionMode {
    IW, // Interferometric Wide swath
    EW, // Extra Wide swath
    SM, // StripMap
    WV, // Wave
}

impl AcquisitionMode {
    pub fn long_name(&self) -> &'static str {
        match self {
            AcquisitionMode::IW => "Interferometric Wide Swath",
            AcquisitionMode::SM => "Stripmap",
            AcquisitionMode::EW => "Extra-Wide swath",
            AcquisitionMode::WV => "Wave",
        }
    }
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AcquisitionMode::IW => "IW",
            AcquisitionMode::EW => "EW",
            AcquisitionMode::SM => "SM",
            AcquisitionMode::WV => "WV",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for AcquisitionMode {
    type Err = ArdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "IW" => Ok(AcquisitionMode::IW),
            "EW" => Ok(AcquisitionMode::EW),
            "SM" => Ok(AcquisitionMode::SM),
            "WV" => Ok(AcquisitionMode::WV),
            other => Err(ArdError::InvalidParameters(format!(
                "Invalid acquisition mode: {}",
                other
            ))),
        }
    }
}

/// Product types that can be processed to ARD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductType {
    #[serde(rename = "GRD")]
    Grd,
    #[serde(rename = "SLC")]
    Slc,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Grd => "GRD",
            ProductType::Slc => "SLC",
        }
    }
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = ArdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GRD" => Ok(ProductType::Grd),
            "SLC" => Ok(ProductType::Slc),
            other => Err(ArdError::InvalidParameters(format!(
                "Product type {} not supported for processing. Only GRD and SLC are supported.",
                other
            ))),
        }
    }
}

/// Geographic bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }
}

/// Error types for ARD orchestration
#[derive(Debug, thiserror::Error)]
pub enum ArdError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("{operator} exited with an error {code}. See {} for SNAP error output", .logfile.display())]
    GptRuntime {
        operator: String,
        code: i32,
        logfile: PathBuf,
    },

    #[error("Invalid scene identifier: {0}")]
    InvalidScene(String),

    #[error("Invalid ARD parameters: {0}")]
    InvalidParameters(String),

    #[error("Inventory error: {0}")]
    Inventory(String),

    #[error("Invalid geometry: {0}")]
    Geometry(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl ArdError {
    pub fn is_download(&self) -> bool {
        matches!(self, ArdError::Download(_))
    }

    pub fn is_gpt_runtime(&self) -> bool {
        matches!(self, ArdError::GptRuntime { .. })
    }
}

/// Result type for ARD operations
pub type ArdResult<T> = Result<T, ArdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polarization_parse_and_display() {
        assert_eq!("vh".parse::<Polarization>().unwrap(), Polarization::VH);
        assert_eq!(Polarization::HH.to_string(), "HH");
        assert!("XX".parse::<Polarization>().is_err());
        assert!(Polarization::VV.is_co_pol());
        assert!(!Polarization::HV.is_co_pol());
    }

    #[test]
    fn test_product_type_rejects_unsupported() {
        assert_eq!("grd".parse::<ProductType>().unwrap(), ProductType::Grd);
        let err = "OCN".parse::<ProductType>().unwrap_err();
        assert!(err.to_string().contains("Only GRD and SLC"));
    }

    #[test]
    fn test_gpt_runtime_message_points_to_logfile() {
        let err = ArdError::GptRuntime {
            operator: "Terrain-Correction".to_string(),
            code: 1,
            logfile: PathBuf::from("/tmp/x.errLog"),
        };
        assert!(err.is_gpt_runtime());
        assert!(err.to_string().contains("/tmp/x.errLog"));
    }
}
