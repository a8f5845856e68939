//! GeoJSON FeatureCollection persistence for the inventories.

use crate::geometry::Polygon;
use crate::types::{ArdError, ArdResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Write records with their footprints as a FeatureCollection
pub fn write_features<'a, T, I, P>(path: P, features: I) -> ArdResult<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = (&'a T, Option<&'a Polygon>)>,
    P: AsRef<Path>,
{
    let features: Vec<Value> = features
        .into_iter()
        .map(|(properties, geometry)| -> ArdResult<Value> {
            Ok(json!({
                "type": "Feature",
                "properties": serde_json::to_value(properties)?,
                "geometry": geometry.map_or(Value::Null, Polygon::to_geojson),
            }))
        })
        .collect::<ArdResult<Vec<_>>>()?;

    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(
        writer,
        &json!({ "type": "FeatureCollection", "features": features }),
    )?;
    Ok(())
}

/// Read a FeatureCollection back into records and footprints
pub fn read_features<T, P>(path: P) -> ArdResult<Vec<(T, Option<Polygon>)>>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let reader = BufReader::new(File::open(path.as_ref())?);
    let collection: Value = serde_json::from_reader(reader)?;

    let features = collection
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ArdError::Inventory(format!(
                "{} is not a GeoJSON FeatureCollection",
                path.as_ref().display()
            ))
        })?;

    features
        .iter()
        .map(|feature| -> ArdResult<(T, Option<Polygon>)> {
            let properties = feature.get("properties").cloned().unwrap_or(Value::Null);
            let record: T = serde_json::from_value(properties)?;
            let geometry = match feature.get("geometry") {
                Some(Value::Null) | None => None,
                Some(g) => Some(Polygon::from_geojson(g)?),
            };
            Ok((record, geometry))
        })
        .collect()
}
