#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial reference handling for the civic map pipelines.
//!
//! Resolves the source SRID of uploaded `GeoJSON` documents from their
//! `crs` block, projects coordinates between the geographic and metric
//! systems used by Finnish municipal data, and measures planar lengths.
//! All projection math is implemented here; no system PROJ/GDAL install
//! is required.

pub mod projection;
pub mod reproject;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use projection::{Projection, TransverseMercator};
pub use reproject::{reproject_line_string, reproject_multi_line_string};

/// Errors that can occur during spatial operations.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// No projection is implemented for this SRID.
    #[error("Unsupported SRID: {0}")]
    UnsupportedSrid(Srid),

    /// A coordinate could not be projected (non-finite input or output).
    #[error("Invalid coordinate ({x}, {y}) for SRID {srid}")]
    InvalidCoordinate {
        /// SRID the coordinate was expressed in.
        srid: Srid,
        /// X / easting / longitude.
        x: f64,
        /// Y / northing / latitude.
        y: f64,
    },
}

/// A spatial reference identifier (EPSG code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Srid(pub u32);

impl Srid {
    /// WGS84 geographic longitude/latitude.
    pub const WGS84: Self = Self(4326);
    /// ETRS89 / GK23FIN, used by the Turku region source data.
    pub const GK23FIN: Self = Self(3877);
    /// ETRS89 / GK25FIN, the metric system lengths are measured in.
    pub const GK25FIN: Self = Self(3879);
    /// ETRS89 / TM35FIN, the national Finnish grid.
    pub const TM35FIN: Self = Self(3067);

    /// Returns the numeric EPSG code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Srid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// `GeoJSON` `crs` names this crate recognizes, mapped to their SRID.
///
/// Anything not listed resolves to the configured default.
pub const KNOWN_CRS_NAMES: &[(&str, Srid)] = &[
    ("urn:ogc:def:crs:OGC:1.3:CRS84", Srid::WGS84),
    ("urn:ogc:def:crs:EPSG::3877", Srid::GK23FIN),
];

/// Resolves the source SRID from a `GeoJSON` `crs` block of the shape
/// `{"properties": {"name": <URN>}}`.
///
/// Unknown or missing names fall back to `default` without error.
#[must_use]
pub fn source_data_srid(crs: &serde_json::Value, default: Srid) -> Srid {
    let Some(name) = crs
        .get("properties")
        .and_then(|p| p.get("name"))
        .and_then(serde_json::Value::as_str)
    else {
        log::debug!("crs block has no properties.name, using {default}");
        return default;
    };

    KNOWN_CRS_NAMES
        .iter()
        .find(|(known, _)| *known == name)
        .map_or_else(
            || {
                log::debug!("Unrecognized crs name {name:?}, using {default}");
                default
            },
            |(_, srid)| *srid,
        )
}

/// The `GeoJSON` `crs` name to write for `srid`: the recognized name when
/// there is one, the EPSG URN otherwise.
#[must_use]
pub fn crs_name(srid: Srid) -> String {
    KNOWN_CRS_NAMES
        .iter()
        .find(|(_, known)| *known == srid)
        .map_or_else(
            || format!("urn:ogc:def:crs:EPSG::{}", srid.code()),
            |(name, _)| (*name).to_string(),
        )
}

/// SRID configuration shared by the ingestion pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometrySettings {
    /// SRID geometries are stored in, and the fallback source SRID.
    pub working_srid: Srid,
    /// Metric SRID used only for measuring lengths.
    pub length_srid: Srid,
}

impl Default for GeometrySettings {
    fn default() -> Self {
        Self {
            working_srid: Srid::WGS84,
            length_srid: Srid::GK25FIN,
        }
    }
}

impl GeometrySettings {
    /// Reads the working SRID from the `CIVIC_MAP_SRID` environment
    /// variable, falling back to the defaults when unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        match std::env::var("CIVIC_MAP_SRID") {
            Ok(value) => value.trim().parse::<u32>().map_or_else(
                |_| {
                    log::warn!("Ignoring invalid CIVIC_MAP_SRID value {value:?}");
                    defaults
                },
                |code| Self {
                    working_srid: Srid(code),
                    ..defaults
                },
            ),
            Err(_) => defaults,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_crs84() {
        let crs = json!({"type": "name", "properties": {"name": "urn:ogc:def:crs:OGC:1.3:CRS84"}});
        assert_eq!(source_data_srid(&crs, Srid::GK25FIN), Srid::WGS84);
    }

    #[test]
    fn resolves_gk23() {
        let crs = json!({"properties": {"name": "urn:ogc:def:crs:EPSG::3877"}});
        assert_eq!(source_data_srid(&crs, Srid::WGS84), Srid::GK23FIN);
    }

    #[test]
    fn unknown_names_fall_back_to_default() {
        for name in [
            "urn:ogc:def:crs:EPSG::3067",
            "EPSG:3877",
            "",
            "urn:ogc:def:crs:OGC:1.3:CRS83",
        ] {
            let crs = json!({"properties": {"name": name}});
            assert_eq!(source_data_srid(&crs, Srid::WGS84), Srid::WGS84, "{name}");
        }
    }

    #[test]
    fn malformed_crs_blocks_fall_back_to_default() {
        assert_eq!(source_data_srid(&json!(null), Srid::WGS84), Srid::WGS84);
        assert_eq!(source_data_srid(&json!({}), Srid::WGS84), Srid::WGS84);
        assert_eq!(
            source_data_srid(&json!({"properties": {"name": 3877}}), Srid::WGS84),
            Srid::WGS84
        );
    }

    #[test]
    fn crs_names_resolve_back_to_their_srid() {
        for srid in [Srid::WGS84, Srid::GK23FIN, Srid::GK25FIN] {
            let crs = json!({"properties": {"name": crs_name(srid)}});
            let resolved = source_data_srid(&crs, Srid::TM35FIN);
            if KNOWN_CRS_NAMES.iter().any(|(_, known)| *known == srid) {
                assert_eq!(resolved, srid);
            } else {
                assert_eq!(crs_name(srid), "urn:ogc:def:crs:EPSG::3879");
            }
        }
    }

    #[test]
    fn srid_displays_as_epsg() {
        assert_eq!(Srid::GK25FIN.to_string(), "EPSG:3879");
    }
}
