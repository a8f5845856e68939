//! Processing graphs in the toolbox's XML graph format.

use crate::core::params::{DemParams, PolSpeckleFilterParams};
use crate::types::{ArdError, ArdResult};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::path::Path;

/// One operator of a graph
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub operator: String,
    pub sources: Vec<String>,
    pub parameters: Vec<(String, String)>,
}

impl Node {
    pub fn new(id: &str, operator: &str) -> Self {
        Self {
            id: id.to_string(),
            operator: operator.to_string(),
            sources: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn source(mut self, refid: &str) -> Self {
        self.sources.push(refid.to_string());
        self
    }

    pub fn param<V: ToString>(mut self, key: &str, value: V) -> Self {
        self.parameters.push((key.to_string(), value.to_string()));
        self
    }

    pub fn param_path(self, key: &str, path: &Path) -> Self {
        let value = path.display().to_string();
        self.param(key, value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    pub nodes: Vec<Node>,
}

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn event(&mut self, event: Event<'_>) -> ArdResult<()> {
        self.writer
            .write_event(event)
            .map_err(|e| ArdError::XmlParsing(format!("Failed to write graph XML: {}", e)))
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> ArdResult<()> {
        let elem = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.event(Event::Start(elem))
    }

    fn end(&mut self, name: &str) -> ArdResult<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> ArdResult<()> {
        let elem = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.event(Event::Empty(elem))
    }

    fn text_element(&mut self, name: &str, text: &str) -> ArdResult<()> {
        if text.is_empty() {
            return self.empty(name, &[]);
        }
        self.start(name, &[])?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Id of the last node, the natural source of the next one
    pub fn last_id(&self) -> &str {
        self.nodes.last().map(|n| n.id.as_str()).unwrap_or_default()
    }

    /// Append a node reading from the current last node
    pub fn then(self, node: Node) -> Self {
        let source = self.last_id().to_string();
        self.add(node.source(&source))
    }

    pub fn operators(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.operator.as_str()).collect()
    }

    pub fn to_xml(&self) -> ArdResult<String> {
        let mut out = XmlOut {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        };
        out.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        out.start("graph", &[("id", "Graph")])?;
        out.text_element("version", "1.0")?;

        for node in &self.nodes {
            out.start("node", &[("id", node.id.as_str())])?;
            out.text_element("operator", &node.operator)?;

            if node.sources.is_empty() {
                out.empty("sources", &[])?;
            } else {
                out.start("sources", &[])?;
                for (i, source) in node.sources.iter().enumerate() {
                    let tag = if i == 0 {
                        "sourceProduct".to_string()
                    } else {
                        format!("sourceProduct.{}", i)
                    };
                    out.empty(&tag, &[("refid", source.as_str())])?;
                }
                out.end("sources")?;
            }

            out.start("parameters", &[])?;
            for (key, value) in &node.parameters {
                out.text_element(key, value)?;
            }
            out.end("parameters")?;
            out.end("node")?;
        }
        out.end("graph")?;

        String::from_utf8(out.writer.into_inner())
            .map_err(|e| ArdError::XmlParsing(format!("Graph XML is not UTF-8: {}", e)))
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> ArdResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), self.to_xml()?)?;
        Ok(())
    }
}

const ORBIT_TYPE: &str = "Sentinel Precise (Auto Download)";

fn read(id: &str, file: &Path) -> Node {
    Node::new(id, "Read").param_path("file", file)
}

fn write(file: &Path) -> Node {
    Node::new("Write", "Write")
        .param_path("file", file)
        .param("formatName", "BEAM-DIMAP")
}

fn apply_orbit() -> Node {
    Node::new("Apply-Orbit-File", "Apply-Orbit-File")
        .param("orbitType", ORBIT_TYPE)
        .param("polyDegree", 3)
        .param("continueOnFail", true)
}

fn thermal_noise(polarisation: &str) -> Node {
    Node::new("ThermalNoiseRemoval", "ThermalNoiseRemoval")
        .param("selectedPolarisations", polarisation)
        .param("removeThermalNoise", true)
        .param("reIntroduceThermalNoise", false)
}

fn dem_params(node: Node, dem: &DemParams) -> Node {
    node.param("demName", &dem.dem_name)
        .param("demResamplingMethod", &dem.dem_resampling)
        .param("externalDEMFile", &dem.dem_file)
        .param("externalDEMNoDataValue", dem.dem_nodata)
}

/// Read → ThermalNoiseRemoval → Apply-Orbit-File → [Subset] → Write
pub fn grd_import(input: &Path, output: &Path, polarisation: &str, subset: Option<&str>) -> Graph {
    let mut graph = Graph::new()
        .add(read("Read", input))
        .then(thermal_noise(polarisation))
        .then(apply_orbit());
    if let Some(region) = subset {
        graph = graph.then(
            Node::new("Subset", "Subset")
                .param("geoRegion", region)
                .param("copyMetadata", true),
        );
    }
    graph.then(write(output))
}

/// Read → Terrain-Correction with layover/shadow mask → BandSelect → Write
pub fn ls_map(
    input: &Path,
    output: &Path,
    resolution: u32,
    dem: &DemParams,
    image_resampling: &str,
) -> Graph {
    let tc = dem_params(Node::new("Terrain-Correction", "Terrain-Correction"), dem)
        .param("externalDEMApplyEGM", dem.egm_correction)
        .param("imgResamplingMethod", image_resampling)
        .param("pixelSpacingInMeter", resolution)
        .param("saveLayoverShadowMask", true)
        .param("saveSelectedSourceBand", false);
    Graph::new()
        .add(read("Read", input))
        .then(tc)
        .then(Node::new("BandSelect", "BandSelect").param("sourceBands", "layover_shadow_mask"))
        .then(write(output))
}

/// Read → TOPSAR-Split → Apply-Orbit-File → Write
pub fn burst_import(input: &Path, output: &Path, polarisation: &str, swath: &str, burst: usize) -> Graph {
    let split = Node::new("TOPSAR-Split", "TOPSAR-Split")
        .param("subswath", swath)
        .param("selectedPolarisations", polarisation)
        .param("firstBurstIndex", burst)
        .param("lastBurstIndex", burst);
    Graph::new()
        .add(read("Read", input))
        .then(split)
        .then(apply_orbit())
        .then(write(output))
}

/// Read → ThermalNoiseRemoval → Calibration → TOPSAR-Deburst → Multilook → [Terrain-Flattening] → Write
pub fn slc_calibration(
    input: &Path,
    output: &Path,
    calibrate_to: &str,
    azimuth_looks: u32,
    range_looks: u32,
    flatten_with: Option<&DemParams>,
) -> Graph {
    let calibration = Node::new("Calibration", "Calibration")
        .param("outputBetaBand", calibrate_to == "beta0")
        .param("outputGammaBand", calibrate_to == "gamma0")
        .param("outputSigmaBand", calibrate_to == "sigma0")
        .param("outputImageInComplex", false);
    let multilook = Node::new("Multilook", "Multilook")
        .param("nAzLooks", azimuth_looks)
        .param("nRgLooks", range_looks)
        .param("outputIntensity", true);

    let mut graph = Graph::new()
        .add(read("Read", input))
        .then(Node::new("ThermalNoiseRemoval", "ThermalNoiseRemoval").param("removeThermalNoise", true))
        .then(calibration)
        .then(Node::new("TOPSAR-Deburst", "TOPSAR-Deburst"))
        .then(multilook);
    if let Some(dem) = flatten_with {
        graph = graph.then(
            dem_params(Node::new("Terrain-Flattening", "Terrain-Flattening"), dem)
                .param("additionalOverlap", 0.1)
                .param("oversamplingMultiple", 1.5),
        );
    }
    graph.then(write(output))
}

/// Read → TOPSAR-Deburst → [Polarimetric-Speckle-Filter] → Polarimetric-Decomposition → Write
pub fn ha_alpha(input: &Path, output: &Path, speckle: Option<&PolSpeckleFilterParams>) -> Graph {
    let mut graph = Graph::new()
        .add(read("Read", input))
        .then(Node::new("TOPSAR-Deburst", "TOPSAR-Deburst"));
    if let Some(filter) = speckle {
        graph = graph.then(
            Node::new("Polarimetric-Speckle-Filter", "Polarimetric-Speckle-Filter")
                .param("filter", &filter.polarimetric_filter)
                .param("filterSize", filter.filter_size)
                .param("numLooksStr", filter.num_of_looks)
                .param("windowSize", &filter.window_size)
                .param("targetWindowSizeStr", &filter.target_window_size)
                .param("anSize", filter.pan_size)
                .param("sigmaStr", filter.sigma),
        );
    }
    graph
        .then(
            Node::new("Polarimetric-Decomposition", "Polarimetric-Decomposition")
                .param("decomposition", "H-Alpha Dual Pol Decomposition")
                .param("windowSize", 5),
        )
        .then(write(output))
}

/// Read ×2 → Back-Geocoding → Write
pub fn coregistration(master: &Path, slave: &Path, output: &Path, dem: &DemParams) -> Graph {
    let back_geocoding = dem_params(Node::new("Back-Geocoding", "Back-Geocoding"), dem)
        .source("Read")
        .source("Read(2)")
        .param("resamplingType", "BILINEAR_INTERPOLATION")
        .param("maskOutAreaWithoutElevation", false);
    Graph::new()
        .add(read("Read", master))
        .add(read("Read(2)", slave))
        .add(back_geocoding)
        .then(write(output))
}

/// Read → Coherence → TOPSAR-Deburst → Write
pub fn coherence(input: &Path, output: &Path, azimuth_window: u32, range_window: u32, polarisation: &str) -> Graph {
    Graph::new()
        .add(read("Read", input))
        .then(
            Node::new("Coherence", "Coherence")
                .param("cohWinAz", azimuth_window)
                .param("cohWinRg", range_window)
                .param("subtractFlatEarthPhase", true)
                .param("squarePixel", false),
        )
        .then(Node::new("TOPSAR-Deburst", "TOPSAR-Deburst").param("selectedPolarisations", polarisation))
        .then(write(output))
}

/// ProductSet-Reader → BandSelect → CreateStack → Write
pub fn stack(inputs: &[&Path], output: &Path, band_pattern: &str) -> Graph {
    let files = inputs
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",");
    Graph::new()
        .add(Node::new("ProductSet-Reader", "ProductSet-Reader").param("fileList", files))
        .then(Node::new("BandSelect", "BandSelect").param("bandNamePattern", band_pattern))
        .then(
            Node::new("CreateStack", "CreateStack")
                .param("extent", "Master")
                .param("initialOffsetMethod", "Product Geolocation")
                .param("resamplingType", "NONE"),
        )
        .then(write(output))
}
