//! Catalogue searches against the ASF and Copernicus scihub APIs.

use crate::geometry::Geometry;
use crate::io::inventory::{Inventory, SceneRecord};
use crate::retry::{retry, RetryPolicy};
use crate::types::{ArdError, ArdResult};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Search criteria shared by both catalogues
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub aoi: Geometry,
    /// YYYY-MM-DD
    pub start: String,
    /// YYYY-MM-DD
    pub end: String,
    pub product_type: String,
    pub polarisation: String,
    pub beam_mode: String,
}

pub(crate) fn http_client() -> ArdResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(300))
        .user_agent(concat!("ardflow/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ArdError::Download(format!("Failed to create HTTP client: {}", e)))
}

fn is_transient(error: &ArdError) -> bool {
    matches!(error, ArdError::Http(_) | ArdError::Download(_))
}

// ASF

/// Product, polarisation and beam parts of an ASF query
pub fn asf_product_specs(product_type: &str, polarisation: &str, beam: &str) -> String {
    let product_type = match product_type {
        "GRD" => "GRD_HD,GRD_MD,GRD_MS,GRD_HS",
        other => other,
    };
    let polarisation = match polarisation.replace(' ', ",").as_str() {
        "VV,VH" | "*" => "VV%2BVH".to_string(),
        "HH,HV" => "HH%2BHV".to_string(),
        other => other.to_string(),
    };
    let mut specs = format!("processinglevel={}&polarization={}", product_type, polarisation);
    if beam != "*" {
        specs.push_str(&format!("&beamSwath={}", beam));
    }
    specs
}

pub fn asf_aoi(aoi: &Geometry) -> String {
    let hull = match aoi {
        Geometry::Point(..) => aoi.to_wkt(None),
        Geometry::Polygon(polygon) => crate::geometry::Polygon::convex_hull(&polygon.exterior)
            .map(|hull| hull.to_wkt(None))
            .unwrap_or_else(|_| aoi.to_wkt(None)),
    };
    format!("intersectsWith={}", hull)
}

pub fn asf_toi(start: &str, end: &str) -> String {
    format!("start={}T00:00:01Z&end={}T23:59:00Z", start, end)
}

/// Full ASF search query string
pub fn asf_query(query: &SearchQuery) -> String {
    let aoi = asf_aoi(&query.aoi).replace(' ', "%20");
    format!(
        "platform=SENTINEL-1&{}&{}&{}&output=jsonlite",
        asf_product_specs(&query.product_type, &query.polarisation, &query.beam_mode),
        aoi,
        asf_toi(&query.start, &query.end)
    )
}

#[derive(Debug, Deserialize)]
struct JsonLite {
    #[serde(default)]
    results: Vec<JsonLiteResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonLiteResult {
    granule_name: String,
    #[serde(default, rename = "productID")]
    product_id: Value,
    #[serde(default)]
    flight_direction: Value,
    #[serde(default)]
    path: Value,
    #[serde(default)]
    orbit: Value,
    #[serde(default)]
    frame: Value,
    #[serde(default)]
    polarization: Value,
    #[serde(default)]
    product_type: Value,
    #[serde(default, rename = "sizeMB")]
    size_mb: Value,
    #[serde(default)]
    start_time: Value,
    #[serde(default)]
    stop_time: Value,
    #[serde(default)]
    mission_name: Value,
    #[serde(default)]
    beam_mode: Value,
    #[serde(default)]
    wkt: Value,
}

/// String form of a JSON scalar
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn compact_date(timestamp: &str) -> String {
    timestamp.get(0..10).unwrap_or_default().replace('-', "")
}

/// Inventory rows from an ASF `jsonlite` response
pub fn parse_asf_results(body: &str) -> ArdResult<Vec<SceneRecord>> {
    let parsed: JsonLite = serde_json::from_str(body)?;
    let mut records = Vec::with_capacity(parsed.results.len());
    for result in parsed.results {
        let geometry = match text(&result.wkt).as_str() {
            "" => None,
            wkt => match Geometry::from_wkt(wkt)? {
                Geometry::Polygon(polygon) => Some(polygon),
                Geometry::Point(..) => None,
            },
        };
        let begin = text(&result.start_time);
        let size = match &result.size_mb {
            Value::Null => String::new(),
            v => format!("{} MB", text(v)),
        };
        let data_take = crate::scene::Sentinel1Scene::new(&result.granule_name)
            .map(|s| s.data_take_id)
            .unwrap_or_default();
        records.push(SceneRecord {
            id: text(&result.product_id),
            identifier: result.granule_name,
            polarisationmode: text(&result.polarization).replace('+', " "),
            orbitdirection: text(&result.flight_direction).to_uppercase(),
            acquisitiondate: compact_date(&begin),
            relativeorbit: text(&result.path),
            orbitnumber: text(&result.orbit),
            product_type: text(&result.product_type),
            slicenumber: text(&result.frame),
            size,
            beginposition: begin,
            endposition: text(&result.stop_time),
            platformidentifier: text(&result.mission_name),
            missiondatatakeid: data_take,
            sensoroperationalmode: text(&result.beam_mode),
            geometry,
            ..Default::default()
        });
    }
    Ok(records)
}

/// Query the ASF catalogue
pub fn asf_search(base_url: &str, query: &SearchQuery) -> ArdResult<Inventory> {
    let client = http_client()?;
    let url = format!("{}?{}", base_url, asf_query(query));
    log::info!("Searching the ASF catalogue");
    log::debug!("Query: {}", url);

    let body = retry(&RetryPolicy::SEARCH, is_transient, || -> ArdResult<String> {
        Ok(client.get(&url).send()?.error_for_status()?.text()?)
    })?;
    let inventory = Inventory::from_records(parse_asf_results(&body)?);
    log::info!("{} scenes found", inventory.len());
    Ok(inventory)
}

// scihub

pub fn scihub_aoi(aoi: &Geometry) -> String {
    match aoi {
        Geometry::Point(lon, lat) => format!("( footprint:\"Intersects({}, {})\")", lat, lon),
        Geometry::Polygon(polygon) => {
            let wkt = crate::geometry::Polygon::convex_hull(&polygon.exterior)
                .map(|hull| hull.to_wkt(None))
                .unwrap_or_else(|_| polygon.to_wkt(None));
            format!("( footprint:\"Intersects({})\")", wkt)
        }
    }
}

pub fn scihub_toi(start: &str, end: &str) -> String {
    let start = format!("{}T00:00:00.000Z", start);
    let end = format!("{}T23:59:59.999Z", end);
    format!(
        "beginPosition:[{s} TO {e}] AND endPosition:[{s} TO {e}]",
        s = start,
        e = end
    )
}

pub fn scihub_product_specs(product_type: &str, polarisation: &str, beam: &str) -> String {
    format!(
        "producttype:{} AND polarisationMode:{} AND sensoroperationalmode:{}",
        product_type, polarisation, beam
    )
}

/// OpenSearch query, before URL encoding
pub fn scihub_query(query: &SearchQuery) -> String {
    format!(
        "platformname:Sentinel-1 AND {} AND {} AND {}",
        scihub_product_specs(&query.product_type, &query.polarisation, &query.beam_mode),
        scihub_aoi(&query.aoi),
        scihub_toi(&query.start, &query.end)
    )
}

/// Named values of an OpenSearch entry, across its `str`, `int` and `date` lists
fn entry_fields(entry: &Value) -> std::collections::HashMap<String, String> {
    let mut fields = std::collections::HashMap::new();
    for kind in ["str", "int", "date", "double"] {
        let items = match entry.get(kind) {
            Some(Value::Array(items)) => items.clone(),
            Some(item @ Value::Object(_)) => vec![item.clone()],
            _ => continue,
        };
        for item in items {
            if let (Some(name), Some(content)) = (item.get("name"), item.get("content")) {
                fields.insert(text(name), text(content));
            }
        }
    }
    fields
}

/// Inventory rows and the total hit count from one OpenSearch JSON page
pub fn parse_scihub_page(body: &str) -> ArdResult<(Vec<SceneRecord>, usize)> {
    let page: Value = serde_json::from_str(body)?;
    let feed = page
        .get("feed")
        .ok_or_else(|| ArdError::Inventory("No feed in scihub response".to_string()))?;
    let total = feed
        .get("opensearch:totalResults")
        .map(text)
        .and_then(|t| t.parse::<usize>().ok())
        .unwrap_or(0);
    let entries = match feed.get("entry") {
        Some(Value::Array(entries)) => entries.clone(),
        Some(entry @ Value::Object(_)) => vec![entry.clone()],
        _ => Vec::new(),
    };

    let mut records = Vec::with_capacity(entries.len());
    for entry in &entries {
        let mut f = entry_fields(entry);
        let mut take = |key: &str| f.remove(key).unwrap_or_default();
        let footprint = take("footprint");
        let geometry = match footprint.as_str() {
            "" => None,
            wkt => Geometry::from_wkt(wkt)?.as_polygon().cloned(),
        };
        let begin = take("beginposition");
        records.push(SceneRecord {
            id: entry.get("id").map(text).unwrap_or_default(),
            identifier: take("identifier"),
            polarisationmode: take("polarisationmode"),
            orbitdirection: take("orbitdirection"),
            acquisitiondate: compact_date(&begin),
            relativeorbit: take("relativeorbitnumber"),
            orbitnumber: take("orbitnumber"),
            product_type: take("producttype"),
            slicenumber: take("slicenumber"),
            size: take("size"),
            beginposition: begin,
            endposition: take("endposition"),
            lastrelativeorbitnumber: take("lastrelativeorbitnumber"),
            lastorbitnumber: take("lastorbitnumber"),
            uuid: take("uuid"),
            platformidentifier: take("platformidentifier"),
            missiondatatakeid: take("missiondatatakeid"),
            swathidentifier: take("swathidentifier"),
            ingestiondate: take("ingestiondate"),
            sensoroperationalmode: take("sensoroperationalmode"),
            geometry,
            ..Default::default()
        });
    }
    Ok((records, total))
}

/// Query Copernicus scihub, following the result pages
pub fn scihub_search(
    base_url: &str,
    query: &SearchQuery,
    username: &str,
    password: &str,
) -> ArdResult<Inventory> {
    const ROWS: usize = 100;
    let client = http_client()?;
    let q = scihub_query(query);
    log::info!("Searching the scihub catalogue");
    log::debug!("Query: {}", q);

    let mut inventory = Inventory::new();
    let mut start = 0;
    loop {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/search", base_url.trim_end_matches('/')),
            &[
                ("q", q.as_str()),
                ("rows", &ROWS.to_string()),
                ("start", &start.to_string()),
                ("format", "json"),
            ],
        )
        .map_err(|e| ArdError::Download(format!("Invalid search url: {}", e)))?;

        let body = retry(&RetryPolicy::SEARCH, is_transient, || -> ArdResult<String> {
            let response = client
                .get(url.clone())
                .basic_auth(username, Some(password))
                .send()?;
            Ok(response.error_for_status()?.text()?)
        })?;
        let (records, total) = parse_scihub_page(&body)?;
        let fetched = records.len();
        inventory.merge(Inventory::from_records(records));

        start += ROWS;
        if fetched == 0 || start >= total {
            break;
        }
    }
    log::info!("{} scenes found", inventory.len());
    Ok(inventory)
}

/// Resolve the scihub product uuid of a scene
pub fn scihub_uuid(base_url: &str, scene_id: &str, username: &str, password: &str) -> ArdResult<String> {
    let client = http_client()?;
    let url = reqwest::Url::parse_with_params(
        &format!("{}/odata/v1/Products", base_url.trim_end_matches('/')),
        &[
            ("$filter", format!("Name eq '{}'", scene_id).as_str()),
            ("$format", "json"),
        ],
    )
    .map_err(|e| ArdError::Download(format!("Invalid uuid url: {}", e)))?;

    let body: Value = client
        .get(url)
        .basic_auth(username, Some(password))
        .send()?
        .error_for_status()?
        .json()?;
    parse_uuid(&body)
        .ok_or_else(|| ArdError::Download(format!("No scihub product found for {}", scene_id)))
}

fn parse_uuid(body: &Value) -> Option<String> {
    body.pointer("/d/results/0/Id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Whether scihub holds the product online or in the long term archive
pub fn scihub_online_status(base_url: &str, uuid: &str, username: &str, password: &str) -> ArdResult<bool> {
    let client = http_client()?;
    let url = format!(
        "{}/odata/v1/Products('{}')/Online/$value",
        base_url.trim_end_matches('/'),
        uuid
    );
    let body = client
        .get(url)
        .basic_auth(username, Some(password))
        .send()?
        .error_for_status()?
        .text()?;
    Ok(body.trim() == "true")
}
