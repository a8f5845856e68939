//! ARD parameter templates.
//!
//! Every product type and ARD preset ships with a JSON template compiled into
//! the crate. A template is loaded into [`ArdParameters`], edited by the
//! caller if needed, and validated with [`ArdParameters::check`] before any
//! processing starts.

use crate::types::{ArdError, ArdResult, Polarization, ProductType};
use serde::{Deserialize, Serialize};

/// ARD presets available for GRD products
pub const ARD_TYPES_GRD: [&str; 5] = ["CEOS", "Earth-Engine", "OST-GTC", "OST-RTC", "OST-minimal"];

/// ARD presets available for SLC products
pub const ARD_TYPES_SLC: [&str; 7] = [
    "OST-GTC",
    "OST-RTC",
    "OST-COH",
    "OST-RTCCOH",
    "OST-POL",
    "OST-ALL",
    "OST-minimal",
];

pub const SPECKLE_FILTERS: [&str; 9] = [
    "None",
    "Boxcar",
    "Median",
    "Frost",
    "Gamma Map",
    "Lee",
    "Refined Lee",
    "Lee Sigma",
    "IDAN",
];

pub const POLARIMETRIC_FILTERS: [&str; 4] = [
    "Box Car Filter",
    "IDAN Filter",
    "Refined Lee Filter",
    "Improved Lee Sigma Filter",
];

pub const RESAMPLING_METHODS: [&str; 8] = [
    "NEAREST_NEIGHBOUR",
    "BILINEAR_INTERPOLATION",
    "CUBIC_CONVOLUTION",
    "BISINC_5_POINT_INTERPOLATION",
    "BISINC_11_POINT_INTERPOLATION",
    "BISINC_21_POINT_INTERPOLATION",
    "BICUBIC_INTERPOLATION",
    "DELAUNAY_INTERPOLATION",
];

pub const WINDOW_SIZES: [&str; 7] = ["5x5", "7x7", "9x9", "11x11", "13x13", "15x15", "17x17"];
pub const TARGET_WINDOW_SIZES: [&str; 2] = ["3x3", "5x5"];
pub const BACKSCATTER_TYPES: [&str; 3] = ["GTC-sigma0", "GTC-gamma0", "RTC-gamma0"];
pub const GEOCODING_TYPES: [&str; 2] = ["terrain", "ellipsoid"];
pub const OUTPUT_DTYPES: [&str; 3] = ["float32", "uint8", "uint16"];
pub const METRICS: [&str; 8] = [
    "avg",
    "max",
    "min",
    "std",
    "cov",
    "median",
    "percentiles",
    "harmonics",
];

const TEMPLATES: [(&str, &str); 12] = [
    ("grd.ceos.json", include_str!("../../templates/ard_json/grd.ceos.json")),
    ("grd.earth_engine.json", include_str!("../../templates/ard_json/grd.earth_engine.json")),
    ("grd.ost_gtc.json", include_str!("../../templates/ard_json/grd.ost_gtc.json")),
    ("grd.ost_rtc.json", include_str!("../../templates/ard_json/grd.ost_rtc.json")),
    ("grd.ost_minimal.json", include_str!("../../templates/ard_json/grd.ost_minimal.json")),
    ("slc.ost_gtc.json", include_str!("../../templates/ard_json/slc.ost_gtc.json")),
    ("slc.ost_rtc.json", include_str!("../../templates/ard_json/slc.ost_rtc.json")),
    ("slc.ost_coh.json", include_str!("../../templates/ard_json/slc.ost_coh.json")),
    ("slc.ost_rtccoh.json", include_str!("../../templates/ard_json/slc.ost_rtccoh.json")),
    ("slc.ost_pol.json", include_str!("../../templates/ard_json/slc.ost_pol.json")),
    ("slc.ost_all.json", include_str!("../../templates/ard_json/slc.ost_all.json")),
    ("slc.ost_minimal.json", include_str!("../../templates/ard_json/slc.ost_minimal.json")),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeckleFilterParams {
    pub filter: String,
    #[serde(rename = "ENL")]
    pub enl: f64,
    #[serde(rename = "estimate_ENL")]
    pub estimate_enl: bool,
    pub sigma: f64,
    pub filter_x_size: u32,
    pub filter_y_size: u32,
    pub window_size: String,
    pub target_window_size: String,
    pub num_of_looks: u32,
    pub damping: u32,
    pub pan_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolSpeckleFilterParams {
    pub polarimetric_filter: String,
    pub filter_size: u32,
    pub num_of_looks: u32,
    pub window_size: String,
    pub target_window_size: String,
    pub pan_size: u32,
    pub sigma: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemParams {
    pub dem_name: String,
    #[serde(default)]
    pub dem_file: String,
    #[serde(default)]
    pub dem_nodata: f64,
    pub dem_resampling: String,
    pub image_resampling: String,
    pub egm_correction: bool,
    pub out_projection: String,
}

/// Parameters of the single-date product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleArd {
    #[serde(rename = "type")]
    pub ard_type: String,
    pub resolution: u32,
    pub product_type: String,
    pub polarisation: String,
    pub remove_border_noise: bool,
    pub remove_speckle: bool,
    pub speckle_filter: SpeckleFilterParams,
    pub create_ls_mask: bool,
    pub to_db: bool,
    #[serde(default)]
    pub to_tif: bool,
    pub dem: DemParams,
    pub geocoding: String,
    pub backscatter: bool,
    pub coherence: bool,
    pub coherence_bands: String,
    pub coherence_azimuth: u32,
    pub coherence_range: u32,
    #[serde(rename = "H-A-Alpha")]
    pub h_a_alpha: bool,
    pub remove_pol_speckle: bool,
    pub pol_speckle_filter: PolSpeckleFilterParams,
}

impl SingleArd {
    /// Radiometric quantity the calibration step has to produce
    pub fn calibrate_to(&self) -> &'static str {
        match self.product_type.as_str() {
            "GTC-sigma0" => "sigma0",
            "GTC-gamma0" => "gamma0",
            _ => "beta0",
        }
    }

    /// Radiometric terrain flattening is needed
    pub fn is_rtc(&self) -> bool {
        self.product_type == "RTC-gamma0"
    }

    pub fn polarisations(&self) -> Vec<String> {
        split_list(&self.polarisation)
    }

    /// Polarisations to import from an SLC: the longer of the backscatter and coherence lists
    pub fn import_polarisations(&self) -> String {
        let bs = self.polarisation.replace(' ', "");
        let coh = self.coherence_bands.replace(' ', "");
        if self.coherence && coh.len() > bs.len() {
            coh
        } else {
            bs
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesArd {
    pub to_db: bool,
    pub dtype_output: String,
    pub remove_mt_speckle: bool,
    #[serde(default)]
    pub apply_ls_mask: bool,
    pub mt_speckle_filter: SpeckleFilterParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeScanArd {
    pub metrics: Vec<String>,
    pub remove_outliers: bool,
}

impl TimeScanArd {
    /// Metric names with the composite ones expanded to the layers they produce
    pub fn expanded_metrics(&self) -> Vec<String> {
        let mut metrics = Vec::with_capacity(self.metrics.len() + 3);
        for metric in &self.metrics {
            match metric.as_str() {
                "percentiles" => metrics.extend(["p95".to_string(), "p5".to_string()]),
                "harmonics" => metrics.extend(
                    ["amplitude", "phase", "residuals"].iter().map(|m| m.to_string()),
                ),
                other => metrics.push(other.to_string()),
            }
        }
        metrics
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicParams {
    pub harmonization: bool,
    pub production: bool,
    pub cut_to_aoi: bool,
}

/// Complete processing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArdParameters {
    #[serde(rename = "single_ARD")]
    pub single_ard: SingleArd,
    #[serde(rename = "time-series_ARD")]
    pub time_series: TimeSeriesArd,
    #[serde(rename = "time-scan_ARD")]
    pub time_scan: TimeScanArd,
    pub mosaic: MosaicParams,
}

#[derive(Deserialize)]
struct TemplateFile {
    processing: ArdParameters,
}

/// ARD presets valid for a product type
pub fn valid_ard_types(product_type: ProductType) -> &'static [&'static str] {
    match product_type {
        ProductType::Grd => &ARD_TYPES_GRD,
        ProductType::Slc => &ARD_TYPES_SLC,
    }
}

/// File name of the template of a preset
pub fn template_name(product_type: ProductType, ard_type: &str) -> String {
    format!(
        "{}.{}.json",
        product_type.as_str().to_lowercase(),
        ard_type.replace('-', "_").to_lowercase()
    )
}

/// Raw JSON of a template
pub fn template_json(product_type: ProductType, ard_type: &str) -> ArdResult<&'static str> {
    let valid = valid_ard_types(product_type);
    if !valid.contains(&ard_type) {
        return Err(ArdError::InvalidParameters(format!(
            "No valid ARD type for product type {}. Select from {:?}",
            product_type, valid
        )));
    }
    let name = template_name(product_type, ard_type);
    TEMPLATES
        .iter()
        .find(|(file, _)| *file == name)
        .map(|(_, json)| *json)
        .ok_or_else(|| ArdError::InvalidParameters(format!("No template {}", name)))
}

impl ArdParameters {
    /// Load the template of a preset
    pub fn template(product_type: ProductType, ard_type: &str) -> ArdResult<Self> {
        let json = template_json(product_type, ard_type)?;
        let file: TemplateFile = serde_json::from_str(json)?;
        log::debug!("Loaded {} template for {}", ard_type, product_type);
        Ok(file.processing)
    }

    pub fn from_json(json: &str) -> ArdResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> ArdResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate choices and ranges, reporting the first offending key
    pub fn check(&self) -> ArdResult<()> {
        let single = &self.single_ard;
        let valid_types: Vec<&str> = ARD_TYPES_GRD.iter().chain(ARD_TYPES_SLC.iter()).copied().collect();
        one_of("single_ARD.type", &single.ard_type, &valid_types)?;

        if !(10..=5000).contains(&single.resolution) {
            return Err(invalid(
                "single_ARD.resolution",
                &single.resolution.to_string(),
                "a value between 10 and 5000 metres",
            ));
        }
        one_of("single_ARD.product_type", &single.product_type, &BACKSCATTER_TYPES)?;
        polarisation_list("single_ARD.polarisation", &single.polarisation)?;
        polarisation_list("single_ARD.coherence_bands", &single.coherence_bands)?;
        speckle_filter("single_ARD.speckle_filter", &single.speckle_filter)?;

        let dem = &single.dem;
        one_of("single_ARD.dem.dem_resampling", &dem.dem_resampling, &RESAMPLING_METHODS)?;
        one_of("single_ARD.dem.image_resampling", &dem.image_resampling, &RESAMPLING_METHODS)?;
        one_of("single_ARD.geocoding", &single.geocoding, &GEOCODING_TYPES)?;

        if single.coherence_azimuth < 1 {
            return Err(invalid("single_ARD.coherence_azimuth", "0", "at least 1"));
        }
        if single.coherence_range < 1 {
            return Err(invalid("single_ARD.coherence_range", "0", "at least 1"));
        }

        let pol = &single.pol_speckle_filter;
        one_of(
            "single_ARD.pol_speckle_filter.polarimetric_filter",
            &pol.polarimetric_filter,
            &POLARIMETRIC_FILTERS,
        )?;
        one_of("single_ARD.pol_speckle_filter.window_size", &pol.window_size, &WINDOW_SIZES)?;
        one_of(
            "single_ARD.pol_speckle_filter.target_window_size",
            &pol.target_window_size,
            &TARGET_WINDOW_SIZES,
        )?;

        one_of("time-series_ARD.dtype_output", &self.time_series.dtype_output, &OUTPUT_DTYPES)?;
        speckle_filter("time-series_ARD.mt_speckle_filter", &self.time_series.mt_speckle_filter)?;

        for metric in &self.time_scan.metrics {
            one_of("time-scan_ARD.metrics", metric, &METRICS)?;
        }
        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn invalid(key: &str, value: &str, expected: &str) -> ArdError {
    ArdError::InvalidParameters(format!(
        "Invalid value {} for {}. Expected {}",
        value, key, expected
    ))
}

fn one_of(key: &str, value: &str, choices: &[&str]) -> ArdResult<()> {
    if choices.contains(&value) {
        Ok(())
    } else {
        Err(invalid(key, value, &format!("one of {:?}", choices)))
    }
}

fn polarisation_list(key: &str, value: &str) -> ArdResult<()> {
    let pols = split_list(value);
    if pols.is_empty() {
        return Err(invalid(key, value, "at least one polarisation"));
    }
    for pol in pols {
        pol.parse::<Polarization>()
            .map_err(|_| invalid(key, value, "a list of VV, VH, HH and HV"))?;
    }
    Ok(())
}

fn speckle_filter(key: &str, params: &SpeckleFilterParams) -> ArdResult<()> {
    one_of(&format!("{}.filter", key), &params.filter, &SPECKLE_FILTERS)?;
    one_of(&format!("{}.window_size", key), &params.window_size, &WINDOW_SIZES)?;
    one_of(
        &format!("{}.target_window_size", key),
        &params.target_window_size,
        &TARGET_WINDOW_SIZES,
    )?;
    if !(0.5..=0.95).contains(&params.sigma) {
        return Err(invalid(
            &format!("{}.sigma", key),
            &params.sigma.to_string(),
            "a value between 0.5 and 0.95",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_templates_load_and_check() {
        for ptype in [ProductType::Grd, ProductType::Slc] {
            for ard_type in valid_ard_types(ptype) {
                let params = ArdParameters::template(ptype, ard_type).unwrap();
                assert_eq!(params.single_ard.ard_type, *ard_type);
                params.check().unwrap();
            }
        }
    }

    #[test]
    fn test_template_name() {
        assert_eq!(template_name(ProductType::Grd, "Earth-Engine"), "grd.earth_engine.json");
        assert_eq!(template_name(ProductType::Slc, "OST-RTCCOH"), "slc.ost_rtccoh.json");
    }

    #[test]
    fn test_invalid_ard_type_lists_choices() {
        let err = ArdParameters::template(ProductType::Grd, "OST-COH").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("OST-COH") || msg.contains("GRD"));
        assert!(msg.contains("Earth-Engine"));
    }

    #[test]
    fn test_check_reports_offending_key() {
        let mut params = ArdParameters::template(ProductType::Grd, "OST-GTC").unwrap();
        params.single_ard.resolution = 5;
        assert!(params.check().unwrap_err().to_string().contains("single_ARD.resolution"));

        let mut params = ArdParameters::template(ProductType::Grd, "OST-GTC").unwrap();
        params.single_ard.speckle_filter.filter = "Wiener".to_string();
        assert!(params
            .check()
            .unwrap_err()
            .to_string()
            .contains("single_ARD.speckle_filter.filter"));

        let mut params = ArdParameters::template(ProductType::Slc, "OST-ALL").unwrap();
        params.single_ard.polarisation = "VV, XX".to_string();
        assert!(params.check().is_err());

        let mut params = ArdParameters::template(ProductType::Slc, "OST-ALL").unwrap();
        params.time_scan.metrics.push("mode".to_string());
        assert!(params.check().unwrap_err().to_string().contains("time-scan_ARD.metrics"));
    }

    #[test]
    fn test_expanded_metrics() {
        let scan = TimeScanArd {
            metrics: vec!["avg".to_string(), "percentiles".to_string(), "harmonics".to_string()],
            remove_outliers: false,
        };
        assert_eq!(
            scan.expanded_metrics(),
            vec!["avg", "p95", "p5", "amplitude", "phase", "residuals"]
        );
    }

    #[test]
    fn test_calibration_and_import_polarisations() {
        let params = ArdParameters::template(ProductType::Slc, "OST-RTCCOH").unwrap();
        assert_eq!(params.single_ard.calibrate_to(), "beta0");
        assert!(params.single_ard.is_rtc());

        let mut single = params.single_ard;
        single.polarisation = "VV".to_string();
        single.coherence_bands = "VV, VH".to_string();
        assert_eq!(single.import_polarisations(), "VV,VH");
        single.coherence = false;
        assert_eq!(single.import_polarisations(), "VV");
    }

    #[test]
    fn test_json_roundtrip_keeps_keys() {
        let params = ArdParameters::template(ProductType::Slc, "OST-POL").unwrap();
        let json = params.to_json().unwrap();
        assert!(json.contains("\"single_ARD\""));
        assert!(json.contains("\"H-A-Alpha\": true"));
        assert_eq!(ArdParameters::from_json(&json).unwrap(), params);
    }
}
