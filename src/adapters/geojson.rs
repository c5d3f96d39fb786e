//! Minimal GeoJSON reading: total bounds and MTBS fire perimeters.

use crate::domain::model::{parse_date, BoundingBox, FireEvent};
use crate::utils::error::{AnalyticsError, Result};
use regex::Regex;
use serde_json::Value;
use std::path::Path;

pub fn read_geojson<P: AsRef<Path>>(path: P) -> Result<Value> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(AnalyticsError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content)?;
    Ok(value)
}

/// Bounds of every coordinate in the file, like geopandas' `total_bounds`.
pub fn read_total_bounds<P: AsRef<Path>>(path: P) -> Result<BoundingBox> {
    let path = path.as_ref();
    let value = read_geojson(path)?;
    total_bounds(&value).map_err(|e| match e {
        AnalyticsError::GeoJsonError { message } => {
            AnalyticsError::geojson(format!("{}: {}", path.display(), message))
        }
        other => other,
    })
}

pub fn total_bounds(value: &Value) -> Result<BoundingBox> {
    let mut bounds: Option<BoundingBox> = None;
    collect_object_bounds(value, &mut bounds)?;
    bounds.ok_or_else(|| AnalyticsError::geojson("no coordinates found"))
}

fn collect_object_bounds(value: &Value, bounds: &mut Option<BoundingBox>) -> Result<()> {
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| AnalyticsError::geojson("object without a 'type' member"))?;

    match kind {
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(|f| f.as_array())
                .ok_or_else(|| AnalyticsError::geojson("FeatureCollection without 'features'"))?;
            for feature in features {
                collect_object_bounds(feature, bounds)?;
            }
        }
        "Feature" => {
            // null geometry is legal and contributes nothing
            if let Some(geometry) = value.get("geometry").filter(|g| !g.is_null()) {
                collect_object_bounds(geometry, bounds)?;
            }
        }
        "GeometryCollection" => {
            let geometries = value
                .get("geometries")
                .and_then(|g| g.as_array())
                .ok_or_else(|| AnalyticsError::geojson("GeometryCollection without 'geometries'"))?;
            for geometry in geometries {
                collect_object_bounds(geometry, bounds)?;
            }
        }
        "Point" | "MultiPoint" | "LineString" | "MultiLineString" | "Polygon"
        | "MultiPolygon" => {
            let coordinates = value
                .get("coordinates")
                .ok_or_else(|| AnalyticsError::geojson(format!("{} without coordinates", kind)))?;
            collect_coordinates(coordinates, bounds)?;
        }
        other => {
            return Err(AnalyticsError::geojson(format!(
                "unsupported GeoJSON type '{}'",
                other
            )))
        }
    }
    Ok(())
}

fn collect_coordinates(value: &Value, bounds: &mut Option<BoundingBox>) -> Result<()> {
    let items = value
        .as_array()
        .ok_or_else(|| AnalyticsError::geojson("coordinates must be arrays"))?;

    // A position is an array of numbers; anything else nests further.
    if items.first().map(|v| v.is_number()).unwrap_or(false) {
        let (x, y) = match (
            items.first().and_then(|v| v.as_f64()),
            items.get(1).and_then(|v| v.as_f64()),
        ) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(AnalyticsError::geojson("position needs at least two numbers")),
        };
        let point = BoundingBox::new(x, y, x, y);
        *bounds = Some(match bounds {
            Some(b) => b.union(&point),
            None => point,
        });
        return Ok(());
    }

    for item in items {
        collect_coordinates(item, bounds)?;
    }
    Ok(())
}

/// Every feature of an MTBS perimeter file as a [`FireEvent`].
pub fn read_fire_events<P: AsRef<Path>>(path: P) -> Result<Vec<FireEvent>> {
    let value = read_geojson(path)?;
    fire_events(&value)
}

pub fn fire_events(value: &Value) -> Result<Vec<FireEvent>> {
    let features: Vec<&Value> = match value.get("type").and_then(|t| t.as_str()) {
        Some("FeatureCollection") => value
            .get("features")
            .and_then(|f| f.as_array())
            .map(|f| f.iter().collect())
            .unwrap_or_default(),
        Some("Feature") => vec![value],
        _ => {
            return Err(AnalyticsError::geojson(
                "fire perimeters must be a Feature or FeatureCollection",
            ))
        }
    };

    features.into_iter().map(fire_event).collect()
}

fn fire_event(feature: &Value) -> Result<FireEvent> {
    let props = feature.get("properties").cloned().unwrap_or_default();
    let text = |key: &str| -> Option<String> {
        match props.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };

    let name = text("Incid_Name").unwrap_or_else(|| "Unknown".to_string());
    let ignition_date = text("Ig_Date").map(|d| parse_date(&d)).transpose()?;
    let post_fire_date = text("Post_ID")
        .map(|id| post_fire_date_from_id(&id))
        .transpose()?
        .flatten();
    let bounds = total_bounds(feature)?;

    Ok(FireEvent {
        name,
        ignition_date,
        post_fire_date,
        bounds,
    })
}

/// MTBS image ids end in the acquisition date, `YYYYMMDD`.
pub fn post_fire_date_from_id(post_id: &str) -> Result<Option<chrono::NaiveDateTime>> {
    let re = Regex::new(r"(\d{4})(\d{2})(\d{2})$").map_err(|e| AnalyticsError::processing(e.to_string()))?;
    match re.captures(post_id.trim()) {
        Some(caps) => {
            let date = format!("{}-{}-{}", &caps[1], &caps[2], &caps[3]);
            parse_date(&date).map(Some)
        }
        None => Ok(None),
    }
}
