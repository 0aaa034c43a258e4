//! Screening of uploaded `GeoJSON` documents.
//!
//! Every feature is converted to a typed line geometry in the source
//! SRID and reprojected into the working SRID. Features that cannot be
//! converted are dropped with a warning; only a document missing its
//! required top-level keys is rejected as a whole.

use civic_map_bicycle_network_models::{
    DropReason, FeatureCollection, FeatureOutcome, FilterOutcome, GeometryKind, LineFeature,
    LineGeometry, REQUIRED_KEYS,
};
use civic_map_spatial::{
    GeometrySettings, Srid, reproject_line_string, reproject_multi_line_string, source_data_srid,
};
use geo::{LineString, MultiLineString};
use serde_json::{Map, Value};

use crate::BicycleNetworkError;

/// Filters a parsed `GeoJSON` document into a collection of line
/// features in the working SRID.
///
/// # Errors
///
/// Returns [`BicycleNetworkError::InvalidInput`] if the document is not
/// an object, lacks any of `type`, `name`, `crs`, `features`, or its
/// `features` member is not an array.
pub fn filter_geojson(
    document: &Value,
    settings: &GeometrySettings,
) -> Result<FilterOutcome, BicycleNetworkError> {
    let Some(object) = document.as_object() else {
        return Err(BicycleNetworkError::InvalidInput {
            message: "document is not a JSON object".to_string(),
        });
    };

    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| !object.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(BicycleNetworkError::InvalidInput {
            message: format!("missing required keys: {}", missing.join(", ")),
        });
    }

    let Some(features) = object.get("features").and_then(Value::as_array) else {
        return Err(BicycleNetworkError::InvalidInput {
            message: "`features` is not an array".to_string(),
        });
    };

    let name = match object.get("name") {
        Some(Value::String(name)) => name.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    let crs = object.get("crs").unwrap_or(&Value::Null);
    let source_srid = source_data_srid(crs, settings.working_srid);
    let target_srid = settings.working_srid;
    log::debug!(
        "Filtering {} feature(s) from {source_srid} into {target_srid}",
        features.len()
    );

    let mut kept = Vec::with_capacity(features.len());
    let mut dropped = 0usize;

    for (index, feature) in features.iter().enumerate() {
        match classify_feature(feature, source_srid, target_srid) {
            FeatureOutcome::Kept(feature) => kept.push(feature),
            FeatureOutcome::Dropped(reason) => {
                log::warn!("Dropping feature {index}: {reason}");
                dropped += 1;
            }
        }
    }

    let single_multi_line_string = features.len() == 1
        && kept.len() == 1
        && kept[0].geometry.kind() == GeometryKind::MultiLineString;

    log::info!(
        "Kept {} of {} feature(s){}",
        kept.len(),
        features.len(),
        if single_multi_line_string {
            " (single MultiLineString, already merged)"
        } else {
            ""
        }
    );

    Ok(FilterOutcome {
        collection: FeatureCollection {
            name,
            srid: target_srid,
            features: kept,
        },
        single_multi_line_string,
        dropped,
    })
}

/// Converts one source feature into a [`LineFeature`] in `target_srid`,
/// or reports why it was dropped.
#[must_use]
pub fn classify_feature(feature: &Value, source_srid: Srid, target_srid: Srid) -> FeatureOutcome {
    let Some(geometry) = feature.get("geometry").filter(|g| g.is_object()) else {
        return FeatureOutcome::Dropped(DropReason::MissingGeometry);
    };

    let type_name = geometry.get("type").and_then(Value::as_str).unwrap_or("");
    let Some(kind) = GeometryKind::from_type_name(type_name) else {
        return FeatureOutcome::Dropped(DropReason::UnsupportedType(type_name.to_string()));
    };

    let Some(coordinates) = geometry.get("coordinates") else {
        return FeatureOutcome::Dropped(DropReason::MalformedCoordinates(
            "no coordinates".to_string(),
        ));
    };
    let coordinates = match kind {
        GeometryKind::LineString => coordinates,
        GeometryKind::MultiLineString => unwrap_extra_nesting(coordinates),
    };

    let mut source = Map::new();
    source.insert("type".to_string(), Value::from(type_name));
    source.insert("coordinates".to_string(), coordinates.clone());

    let parsed = geojson::Geometry::from_json_value(Value::Object(source))
        .map_err(|e| e.to_string())
        .and_then(|geometry| to_line_geometry(kind, geometry.value));
    let geometry = match parsed {
        Ok(geometry) => geometry,
        Err(message) => {
            return FeatureOutcome::Dropped(DropReason::MalformedCoordinates(message));
        }
    };

    let reprojected = match geometry {
        LineGeometry::LineString(line) => {
            reproject_line_string(&line, source_srid, target_srid).map(LineGeometry::LineString)
        }
        LineGeometry::MultiLineString(lines) => {
            reproject_multi_line_string(&lines, source_srid, target_srid)
                .map(LineGeometry::MultiLineString)
        }
    };

    match reprojected {
        Ok(geometry) => FeatureOutcome::Kept(LineFeature { geometry }),
        Err(e) => FeatureOutcome::Dropped(DropReason::Projection(e.to_string())),
    }
}

/// Converts a parsed `GeoJSON` geometry value into a typed line
/// geometry of the requested kind.
fn to_line_geometry(kind: GeometryKind, value: geojson::Value) -> Result<LineGeometry, String> {
    match &value {
        geojson::Value::LineString(positions) => check_positions(positions)?,
        geojson::Value::MultiLineString(lines) => {
            if lines.is_empty() {
                return Err("MultiLineString has no lines".to_string());
            }
            for positions in lines {
                check_positions(positions)?;
            }
        }
        _ => {}
    }

    match kind {
        GeometryKind::LineString => {
            let line: LineString<f64> =
                value.try_into().map_err(|e: geojson::Error| e.to_string())?;
            Ok(LineGeometry::LineString(line))
        }
        GeometryKind::MultiLineString => {
            let lines: MultiLineString<f64> =
                value.try_into().map_err(|e: geojson::Error| e.to_string())?;
            Ok(LineGeometry::MultiLineString(lines))
        }
    }
}

fn check_positions(positions: &[geojson::Position]) -> Result<(), String> {
    if let Some(short) = positions.iter().find(|p| p.len() < 2) {
        return Err(format!("position needs at least two numbers: {short:?}"));
    }
    if positions.len() < 2 {
        return Err(format!(
            "LineString needs at least two positions, got {}",
            positions.len()
        ));
    }
    Ok(())
}

/// Returns the inner array when MultiLineString coordinates carry one
/// surplus nesting level (`[[[[x, y], ...]]]`).
fn unwrap_extra_nesting(coordinates: &Value) -> &Value {
    let nested = coordinates
        .get(0)
        .and_then(|line| line.get(0))
        .and_then(|position| position.get(0))
        .is_some_and(Value::is_array);
    if nested {
        log::debug!("Unwrapping extra MultiLineString nesting level");
        &coordinates[0]
    } else {
        coordinates
    }
}
