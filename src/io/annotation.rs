use crate::geometry::Polygon;
use crate::types::{ArdError, ArdResult};
use quick_xml::de::from_str;
use serde::Deserialize;

/// Seconds of one orbit (12 day repeat cycle with 175 orbits)
pub const ORBIT_TIME: f64 = 12.0 * 24.0 * 3600.0 / 175.0;

/// Annotation structures needed for burst bookkeeping.
/// This represents the root <product> element directly
#[derive(Debug, Deserialize)]
pub struct AnnotationRoot {
    #[serde(rename = "adsHeader")]
    pub ads_header: AdsHeader,
    #[serde(rename = "swathTiming")]
    pub swath_timing: SwathTiming,
    #[serde(rename = "geolocationGrid")]
    pub geolocation_grid: GeolocationGrid,
}

#[derive(Debug, Deserialize)]
pub struct AdsHeader {
    pub swath: String,
    pub polarisation: String,
}

#[derive(Debug, Deserialize)]
pub struct SwathTiming {
    #[serde(rename = "linesPerBurst")]
    pub lines_per_burst: usize,
    #[serde(rename = "samplesPerBurst")]
    pub samples_per_burst: usize,
    #[serde(rename = "burstList")]
    pub burst_list: BurstList,
}

#[derive(Debug, Deserialize)]
pub struct BurstList {
    #[serde(rename = "burst", default)]
    pub bursts: Vec<Burst>,
}

#[derive(Debug, Deserialize)]
pub struct Burst {
    #[serde(rename = "azimuthAnxTime")]
    pub azimuth_anx_time: f64,
}

#[derive(Debug, Deserialize)]
pub struct GeolocationGrid {
    #[serde(rename = "geolocationGridPointList")]
    pub point_list: GeolocationGridPointList,
}

#[derive(Debug, Deserialize)]
pub struct GeolocationGridPointList {
    #[serde(rename = "geolocationGridPoint", default)]
    pub points: Vec<GeolocationGridPoint>,
}

#[derive(Debug, Deserialize)]
pub struct GeolocationGridPoint {
    pub line: i64,
    pub pixel: i64,
    pub latitude: f64,
    pub longitude: f64,
}

/// Footprint and timing of a single burst
#[derive(Debug, Clone, PartialEq)]
pub struct BurstFootprint {
    /// 1-based position of the burst in the swath
    pub burst_nr: usize,
    /// Time since ascending node crossing, in tenths of a second
    pub anx_time: i64,
    pub footprint: Polygon,
}

/// Bursts of one swath as described by an annotation file
#[derive(Debug, Clone)]
pub struct SwathBursts {
    pub swath: String,
    pub polarisation: String,
    pub bursts: Vec<BurstFootprint>,
}

/// Parser for Sentinel-1 annotation XML files
pub struct AnnotationParser;

impl AnnotationParser {
    /// Parse complete annotation XML
    pub fn parse_annotation(xml_content: &str) -> ArdResult<AnnotationRoot> {
        from_str::<AnnotationRoot>(xml_content)
            .map_err(|e| ArdError::XmlParsing(format!("Failed to parse annotation XML: {}", e)))
    }

    /// Normalised ANX time: wrapped to one orbit, in tenths of a second
    pub fn anx_time(azimuth_anx_time: f64) -> i64 {
        (azimuth_anx_time.rem_euclid(ORBIT_TIME) * 10.0).round() as i64
    }

    /// Burst footprints from the geolocation grid.
    ///
    /// Burst `i` spans lines `i * linesPerBurst` to `(i + 1) * linesPerBurst`;
    /// both ends are snapped to the nearest grid line, and the near/far range
    /// corners are the first and last grid pixels on that line.
    pub fn extract_bursts(annotation: &AnnotationRoot) -> ArdResult<SwathBursts> {
        let timing = &annotation.swath_timing;
        let points = &annotation.geolocation_grid.point_list.points;

        if points.is_empty() {
            return Err(ArdError::XmlParsing(format!(
                "Empty geolocation grid for swath {}",
                annotation.ads_header.swath
            )));
        }

        let mut grid_lines: Vec<i64> = points.iter().map(|p| p.line).collect();
        grid_lines.sort_unstable();
        grid_lines.dedup();

        let mut bursts = Vec::with_capacity(timing.burst_list.bursts.len());
        for (i, burst) in timing.burst_list.bursts.iter().enumerate() {
            let first_line = nearest(&grid_lines, (i * timing.lines_per_burst) as i64);
            let last_line = nearest(&grid_lines, ((i + 1) * timing.lines_per_burst) as i64);

            let (near_first, far_first) = row_corners(points, first_line)?;
            let (near_last, far_last) = row_corners(points, last_line)?;

            let footprint = Polygon::new(vec![near_first, far_first, far_last, near_last])?;
            bursts.push(BurstFootprint {
                burst_nr: i + 1,
                anx_time: Self::anx_time(burst.azimuth_anx_time),
                footprint,
            });
        }

        log::debug!(
            "Swath {} ({}): {} bursts, {} samples per burst",
            annotation.ads_header.swath,
            annotation.ads_header.polarisation,
            bursts.len(),
            timing.samples_per_burst
        );

        Ok(SwathBursts {
            swath: annotation.ads_header.swath.to_uppercase(),
            polarisation: annotation.ads_header.polarisation.to_uppercase(),
            bursts,
        })
    }
}

fn nearest(sorted: &[i64], target: i64) -> i64 {
    sorted
        .iter()
        .copied()
        .min_by_key(|line| (line - target).abs())
        .unwrap_or(target)
}

/// (lon, lat) of the first and last pixel on a grid line
fn row_corners(points: &[GeolocationGridPoint], line: i64) -> ArdResult<((f64, f64), (f64, f64))> {
    let row = points.iter().filter(|p| p.line == line);
    let near = row.clone().min_by_key(|p| p.pixel);
    let far = row.max_by_key(|p| p.pixel);
    match (near, far) {
        (Some(n), Some(f)) => Ok(((n.longitude, n.latitude), (f.longitude, f.latitude))),
        _ => Err(ArdError::XmlParsing(format!("No grid points on line {}", line))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_annotation(swath: &str, anx_start: f64) -> String {
        let mut grid = String::new();
        for (line, lat) in [(0, 50.0), (1500, 50.2), (3000, 50.4)] {
            for (pixel, lon) in [(0, 10.0), (10000, 10.5), (20000, 11.0)] {
                grid.push_str(&format!(
                    "<geolocationGridPoint><azimuthTime>2020-01-03T17:08:15</azimuthTime><line>{}</line><pixel>{}</pixel><latitude>{}</latitude><longitude>{}</longitude><height>0</height></geolocationGridPoint>",
                    line, pixel, lat, lon
                ));
            }
        }
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<product>
  <adsHeader><missionId>S1A</missionId><productType>SLC</productType><polarisation>VV</polarisation><mode>IW</mode><swath>{swath}</swath></adsHeader>
  <swathTiming>
    <linesPerBurst>1500</linesPerBurst>
    <samplesPerBurst>20001</samplesPerBurst>
    <burstList count="2">
      <burst><azimuthTime>2020-01-03T17:08:15</azimuthTime><azimuthAnxTime>{a0}</azimuthAnxTime><byteOffset>0</byteOffset></burst>
      <burst><azimuthTime>2020-01-03T17:08:18</azimuthTime><azimuthAnxTime>{a1}</azimuthAnxTime><byteOffset>100</byteOffset></burst>
    </burstList>
  </swathTiming>
  <geolocationGrid><geolocationGridPointList count="9">{grid}</geolocationGridPointList></geolocationGrid>
</product>"#,
            swath = swath,
            a0 = anx_start,
            a1 = anx_start + 2.758277,
            grid = grid
        )
    }

    #[test]
    fn test_anx_time_wraps_to_orbit() {
        assert_eq!(AnnotationParser::anx_time(754.2), 7542);
        assert_eq!(AnnotationParser::anx_time(ORBIT_TIME + 754.2), 7542);
    }

    #[test]
    fn test_extract_bursts() {
        let xml = sample_annotation("IW1", 754.2);
        let annotation = AnnotationParser::parse_annotation(&xml).unwrap();
        let swath = AnnotationParser::extract_bursts(&annotation).unwrap();

        assert_eq!(swath.swath, "IW1");
        assert_eq!(swath.bursts.len(), 2);
        assert_eq!(swath.bursts[0].burst_nr, 1);
        assert_eq!(swath.bursts[0].anx_time, 7542);
        assert_eq!(swath.bursts[1].anx_time, 7570);

        let first = &swath.bursts[0].footprint;
        assert_eq!(first.exterior[0], (10.0, 50.0));
        assert_eq!(first.exterior[1], (11.0, 50.0));
        assert_eq!(first.exterior[2], (11.0, 50.2));

        let second = &swath.bursts[1].footprint;
        assert_eq!(second.bbox().max_lat, 50.4);
    }

    #[test]
    fn test_invalid_xml_is_an_error() {
        assert!(AnnotationParser::parse_annotation("<product><adsHeader/></product>").is_err());
    }
}
