//! Footprint geometry in geographic coordinates.
//!
//! Scene and burst footprints, as well as the area of interest, are handled as
//! simple polygons in lon/lat degrees. All operations are planar, which is
//! sufficient for the coverage bookkeeping done here.

use crate::types::{ArdError, ArdResult, BoundingBox};
use serde_json::{json, Value};
use std::str::FromStr;

/// Simple polygon given by its exterior ring (lon, lat), stored unclosed
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Vec<(f64, f64)>,
}

impl Polygon {
    /// Create a polygon from a ring; a closing vertex is dropped
    pub fn new(mut coords: Vec<(f64, f64)>) -> ArdResult<Self> {
        if coords.len() > 1 && coords.first() == coords.last() {
            coords.pop();
        }
        if coords.len() < 3 {
            return Err(ArdError::Geometry(format!(
                "A polygon needs at least 3 distinct vertices, got {}",
                coords.len()
            )));
        }
        Ok(Polygon { exterior: coords })
    }

    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        Polygon {
            exterior: vec![
                (bbox.min_lon, bbox.min_lat),
                (bbox.max_lon, bbox.min_lat),
                (bbox.max_lon, bbox.max_lat),
                (bbox.min_lon, bbox.max_lat),
            ],
        }
    }

    pub fn bbox(&self) -> BoundingBox {
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for &(x, y) in &self.exterior {
            bbox.min_lon = bbox.min_lon.min(x);
            bbox.max_lon = bbox.max_lon.max(x);
            bbox.min_lat = bbox.min_lat.min(y);
            bbox.max_lat = bbox.max_lat.max(y);
        }
        bbox
    }

    /// Envelope of the polygon as a polygon
    pub fn envelope(&self) -> Polygon {
        Polygon::from_bbox(&self.bbox())
    }

    fn edges(&self) -> impl Iterator<Item = ((f64, f64), (f64, f64))> + '_ {
        let n = self.exterior.len();
        (0..n).map(move |i| (self.exterior[i], self.exterior[(i + 1) % n]))
    }

    fn signed_area(&self) -> f64 {
        self.edges()
            .map(|((x1, y1), (x2, y2))| x1 * y2 - x2 * y1)
            .sum::<f64>()
            / 2.0
    }

    /// Planar area in square degrees
    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    pub fn centroid(&self) -> (f64, f64) {
        let a = self.signed_area();
        if a.abs() < f64::EPSILON {
            let n = self.exterior.len() as f64;
            let (sx, sy) = self
                .exterior
                .iter()
                .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x, sy + y));
            return (sx / n, sy / n);
        }
        let (mut cx, mut cy) = (0.0, 0.0);
        for ((x1, y1), (x2, y2)) in self.edges() {
            let cross = x1 * y2 - x2 * y1;
            cx += (x1 + x2) * cross;
            cy += (y1 + y2) * cross;
        }
        (cx / (6.0 * a), cy / (6.0 * a))
    }

    /// Ray casting; points on the boundary count as inside
    pub fn contains_point(&self, p: (f64, f64)) -> bool {
        if self.edges().any(|(a, b)| on_segment(a, b, p)) {
            return true;
        }
        let mut inside = false;
        for ((x1, y1), (x2, y2)) in self.edges() {
            if (y1 > p.1) != (y2 > p.1) {
                let x_cross = x1 + (p.1 - y1) * (x2 - x1) / (y2 - y1);
                if p.0 < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    pub fn intersects(&self, other: &Polygon) -> bool {
        if !self.bbox().intersects(&other.bbox()) {
            return false;
        }
        if self.exterior.iter().any(|&p| other.contains_point(p))
            || other.exterior.iter().any(|&p| self.contains_point(p))
        {
            return true;
        }
        self.edges()
            .any(|(a, b)| other.edges().any(|(c, d)| segments_intersect(a, b, c, d)))
    }

    /// True if every vertex lies inside `other` and no edges cross
    pub fn within(&self, other: &Polygon) -> bool {
        self.exterior.iter().all(|&p| other.contains_point(p))
            && !self.edges().any(|(a, b)| {
                other
                    .edges()
                    .any(|(c, d)| segments_cross_properly(a, b, c, d))
            })
    }

    /// Sutherland-Hodgman clipping against a rectangle
    pub fn clip_to_bbox(&self, bbox: &BoundingBox) -> Option<Polygon> {
        let mut ring = self.exterior.clone();

        let planes: [(fn((f64, f64), f64) -> bool, f64, bool); 4] = [
            (|p, v| p.0 >= v, bbox.min_lon, true),
            (|p, v| p.0 <= v, bbox.max_lon, true),
            (|p, v| p.1 >= v, bbox.min_lat, false),
            (|p, v| p.1 <= v, bbox.max_lat, false),
        ];

        for (inside, value, vertical) in planes {
            if ring.is_empty() {
                break;
            }
            let input = std::mem::take(&mut ring);
            let n = input.len();
            for i in 0..n {
                let current = input[i];
                let previous = input[(i + n - 1) % n];
                let cur_in = inside(current, value);
                let prev_in = inside(previous, value);
                if cur_in {
                    if !prev_in {
                        ring.push(cut(previous, current, value, vertical));
                    }
                    ring.push(current);
                } else if prev_in {
                    ring.push(cut(previous, current, value, vertical));
                }
            }
        }

        ring.dedup();
        let clipped = Polygon::new(ring).ok()?;
        if clipped.area() > 0.0 {
            Some(clipped)
        } else {
            None
        }
    }

    /// Convex hull of a set of points (Andrew's monotone chain)
    pub fn convex_hull(points: &[(f64, f64)]) -> ArdResult<Polygon> {
        let mut pts: Vec<(f64, f64)> = points.to_vec();
        pts.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        });
        pts.dedup();
        if pts.len() < 3 {
            return Err(ArdError::Geometry(
                "Convex hull needs at least 3 distinct points".to_string(),
            ));
        }

        let mut lower: Vec<(f64, f64)> = Vec::new();
        for &p in &pts {
            while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
                lower.pop();
            }
            lower.push(p);
        }
        let mut upper: Vec<(f64, f64)> = Vec::new();
        for &p in pts.iter().rev() {
            while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
                upper.pop();
            }
            upper.push(p);
        }
        lower.pop();
        upper.pop();
        lower.extend(upper);
        Polygon::new(lower)
    }

    /// WKT representation, optionally rounded to `precision` decimals
    pub fn to_wkt(&self, precision: Option<usize>) -> String {
        let mut ring: Vec<String> = self
            .exterior
            .iter()
            .map(|&(x, y)| format_coord(x, y, precision))
            .collect();
        if let Some(&(x, y)) = self.exterior.first() {
            ring.push(format_coord(x, y, precision));
        }
        format!("POLYGON (({}))", ring.join(", "))
    }

    pub fn to_geojson(&self) -> Value {
        let mut ring: Vec<Value> = self.exterior.iter().map(|&(x, y)| json!([x, y])).collect();
        if let Some(&(x, y)) = self.exterior.first() {
            ring.push(json!([x, y]));
        }
        json!({ "type": "Polygon", "coordinates": [ring] })
    }

    pub fn from_geojson(value: &Value) -> ArdResult<Polygon> {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
        let rings = value
            .get("coordinates")
            .and_then(Value::as_array)
            .ok_or_else(|| ArdError::Geometry("GeoJSON geometry without coordinates".to_string()))?;

        let ring = match kind {
            "Polygon" => rings.first(),
            "MultiPolygon" => rings
                .first()
                .and_then(Value::as_array)
                .and_then(|poly| poly.first()),
            other => {
                return Err(ArdError::Geometry(format!(
                    "Unsupported GeoJSON geometry type: {}",
                    other
                )))
            }
        }
        .and_then(Value::as_array)
        .ok_or_else(|| ArdError::Geometry("GeoJSON polygon without exterior ring".to_string()))?;

        let coords = ring
            .iter()
            .map(|pos| {
                let x = pos.get(0).and_then(Value::as_f64);
                let y = pos.get(1).and_then(Value::as_f64);
                x.zip(y)
                    .ok_or_else(|| ArdError::Geometry("Invalid GeoJSON position".to_string()))
            })
            .collect::<ArdResult<Vec<_>>>()?;
        Polygon::new(coords)
    }
}

impl std::fmt::Display for Polygon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_wkt(None))
    }
}

/// Area of interest or footprint geometry
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(f64, f64),
    Polygon(Polygon),
}

impl Geometry {
    /// Parse POINT, POLYGON and MULTIPOLYGON well-known text.
    ///
    /// Polygon holes are ignored and a multipolygon collapses to the convex
    /// hull of its vertices.
    pub fn from_wkt(wkt: &str) -> ArdResult<Geometry> {
        let text = wkt.trim();
        let upper = text.to_uppercase();
        let open = text
            .find('(')
            .ok_or_else(|| ArdError::Geometry(format!("Not a WKT geometry: {}", wkt)))?;
        let body = &text[open..];

        if upper.starts_with("POINT") {
            let coords = parse_coord_list(body.trim_matches(|c| c == '(' || c == ')'))?;
            let &(x, y) = coords
                .first()
                .ok_or_else(|| ArdError::Geometry(format!("Empty point: {}", wkt)))?;
            Ok(Geometry::Point(x, y))
        } else if upper.starts_with("MULTIPOLYGON") {
            let cleaned: String = body.chars().filter(|c| *c != '(' && *c != ')').collect();
            let coords = parse_coord_list(&cleaned)?;
            Ok(Geometry::Polygon(Polygon::convex_hull(&coords)?))
        } else if upper.starts_with("POLYGON") {
            let start = body.trim_start_matches(|c: char| c == '(' || c.is_whitespace());
            let end = start
                .find(')')
                .ok_or_else(|| ArdError::Geometry(format!("Unclosed polygon ring: {}", wkt)))?;
            let coords = parse_coord_list(&start[..end])?;
            Ok(Geometry::Polygon(Polygon::new(coords)?))
        } else {
            Err(ArdError::Geometry(format!(
                "Unsupported WKT geometry type: {}",
                wkt
            )))
        }
    }

    pub fn to_wkt(&self, precision: Option<usize>) -> String {
        match self {
            Geometry::Point(x, y) => format!("POINT ({})", format_coord(*x, *y, precision)),
            Geometry::Polygon(p) => p.to_wkt(precision),
        }
    }

    pub fn bbox(&self) -> BoundingBox {
        match self {
            Geometry::Point(x, y) => BoundingBox {
                min_lon: *x,
                max_lon: *x,
                min_lat: *y,
                max_lat: *y,
            },
            Geometry::Polygon(p) => p.bbox(),
        }
    }

    pub fn centroid(&self) -> (f64, f64) {
        match self {
            Geometry::Point(x, y) => (*x, *y),
            Geometry::Polygon(p) => p.centroid(),
        }
    }

    pub fn intersects(&self, other: &Polygon) -> bool {
        match self {
            Geometry::Point(x, y) => other.contains_point((*x, *y)),
            Geometry::Polygon(p) => p.intersects(other),
        }
    }

    pub fn as_polygon(&self) -> Option<&Polygon> {
        match self {
            Geometry::Polygon(p) => Some(p),
            Geometry::Point(..) => None,
        }
    }
}

impl FromStr for Geometry {
    type Err = ArdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Geometry::from_wkt(s)
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_wkt(None))
    }
}

fn parse_coord_list(text: &str) -> ArdResult<Vec<(f64, f64)>> {
    text.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|pair| {
            let mut values = pair.split_whitespace().map(f64::from_str);
            match (values.next(), values.next()) {
                (Some(Ok(x)), Some(Ok(y))) => Ok((x, y)),
                _ => Err(ArdError::Geometry(format!(
                    "Invalid coordinate pair: {}",
                    pair.trim()
                ))),
            }
        })
        .collect()
}

fn format_coord(x: f64, y: f64, precision: Option<usize>) -> String {
    match precision {
        Some(p) => {
            let factor = 10f64.powi(p as i32);
            format!("{} {}", (x * factor).round() / factor, (y * factor).round() / factor)
        }
        None => format!("{} {}", x, y),
    }
}

fn cut(a: (f64, f64), b: (f64, f64), value: f64, vertical: bool) -> (f64, f64) {
    if vertical {
        let t = (value - a.0) / (b.0 - a.0);
        (value, a.1 + t * (b.1 - a.1))
    } else {
        let t = (value - a.1) / (b.1 - a.1);
        (a.0 + t * (b.0 - a.0), value)
    }
}

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

fn on_segment(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> bool {
    cross(a, b, p).abs() < 1e-12
        && p.0 >= a.0.min(b.0) - 1e-12
        && p.0 <= a.0.max(b.0) + 1e-12
        && p.1 >= a.1.min(b.1) - 1e-12
        && p.1 <= a.1.max(b.1) + 1e-12
}

fn segments_intersect(a: (f64, f64), b: (f64, f64), c: (f64, f64), d: (f64, f64)) -> bool {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    on_segment(c, d, a) || on_segment(c, d, b) || on_segment(a, b, c) || on_segment(a, b, d)
}

fn segments_cross_properly(a: (f64, f64), b: (f64, f64), c: (f64, f64), d: (f64, f64)) -> bool {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);
    d1 * d2 < 0.0 && d3 * d4 < 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square(x0: f64, y0: f64, size: f64) -> Polygon {
        Polygon::from_bbox(&BoundingBox {
            min_lon: x0,
            max_lon: x0 + size,
            min_lat: y0,
            max_lat: y0 + size,
        })
    }

    #[test]
    fn test_parse_polygon_wkt() {
        let geom = Geometry::from_wkt("POLYGON ((0 0, 2 0, 2 1, 0 1, 0 0))").unwrap();
        let poly = geom.as_polygon().unwrap();
        assert_eq!(poly.exterior.len(), 4);
        assert_relative_eq!(poly.area(), 2.0);
        assert_eq!(poly.centroid(), (1.0, 0.5));
    }

    #[test]
    fn test_parse_point_and_compact_wkt() {
        assert_eq!(Geometry::from_wkt("POINT (13.4 52.5)").unwrap(), Geometry::Point(13.4, 52.5));
        assert!(Geometry::from_wkt("POLYGON((0 0,1 0,1 1,0 0))").is_ok());
        assert!(Geometry::from_wkt("LINESTRING (0 0, 1 1)").is_err());
    }

    #[test]
    fn test_wkt_rounding() {
        let poly = Polygon::new(vec![(0.12345, 1.98765), (1.0, 0.0), (1.0, 1.0)]).unwrap();
        assert_eq!(
            poly.to_wkt(Some(3)),
            "POLYGON ((0.123 1.988, 1 0, 1 1, 0.123 1.988))"
        );
    }

    #[test]
    fn test_intersects_and_within() {
        let a = square(0.0, 0.0, 2.0);
        let b = square(1.0, 1.0, 2.0);
        let c = square(5.0, 5.0, 1.0);
        let inner = square(0.5, 0.5, 0.5);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(inner.within(&a));
        assert!(!b.within(&a));
    }

    #[test]
    fn test_clip_to_bbox() {
        let a = square(0.0, 0.0, 2.0);
        let clipped = a
            .clip_to_bbox(&BoundingBox { min_lon: 1.0, max_lon: 3.0, min_lat: 1.0, max_lat: 3.0 })
            .unwrap();
        assert_relative_eq!(clipped.area(), 1.0, epsilon = 1e-12);
        assert!(a
            .clip_to_bbox(&BoundingBox { min_lon: 4.0, max_lon: 5.0, min_lat: 4.0, max_lat: 5.0 })
            .is_none());
    }

    #[test]
    fn test_convex_hull_drops_interior_points() {
        let hull = Polygon::convex_hull(&[(0.0, 0.0), (2.0, 0.0), (1.0, 1.0), (2.0, 2.0), (0.0, 2.0)]).unwrap();
        assert_eq!(hull.exterior.len(), 4);
        assert_relative_eq!(hull.area(), 4.0);
    }

    #[test]
    fn test_geojson_roundtrip_shape() {
        let a = square(0.0, 0.0, 1.0);
        let value = a.to_geojson();
        assert_eq!(value["coordinates"][0].as_array().unwrap().len(), 5);
        assert_eq!(Polygon::from_geojson(&value).unwrap(), a);
    }
}
