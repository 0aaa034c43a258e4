#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Bicycle network ingestion types.
//!
//! Plain records passed between the filter, merge, and persistence
//! stages. They carry typed `geo` geometries and the SRID those
//! coordinates are expressed in, independent of any storage.

use civic_map_spatial::Srid;
use geo::{LineString, MultiLineString};
use serde::{Deserialize, Serialize};

/// Top-level keys every uploaded `GeoJSON` document must carry.
pub const REQUIRED_KEYS: &[&str] = &["type", "name", "crs", "features"];

/// A bicycle network row as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BicycleNetwork {
    /// Database identifier.
    pub id: i64,
    /// Optional human-readable name.
    pub name: Option<String>,
    /// Staged upload still awaiting processing, if any.
    pub source_file: Option<String>,
    /// Total length in metres, rounded to two decimals.
    pub length: f64,
}

/// A bicycle network with the number of parts it currently owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BicycleNetworkSummary {
    /// The network row.
    #[serde(flatten)]
    pub network: BicycleNetwork,
    /// Number of stored parts.
    pub part_count: u64,
}

/// Geometry type names accepted in uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryKind {
    /// A single polyline.
    LineString,
    /// A set of polylines.
    MultiLineString,
}

impl GeometryKind {
    /// The `GeoJSON` type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LineString => "LineString",
            Self::MultiLineString => "MultiLineString",
        }
    }

    /// Parses a `GeoJSON` type name. Returns `None` for non-line types.
    #[must_use]
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "LineString" => Some(Self::LineString),
            "MultiLineString" => Some(Self::MultiLineString),
            _ => None,
        }
    }
}

/// A line geometry of one of the accepted kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum LineGeometry {
    /// A single polyline.
    LineString(LineString<f64>),
    /// A set of polylines.
    MultiLineString(MultiLineString<f64>),
}

impl LineGeometry {
    /// The geometry's kind.
    #[must_use]
    pub const fn kind(&self) -> GeometryKind {
        match self {
            Self::LineString(_) => GeometryKind::LineString,
            Self::MultiLineString(_) => GeometryKind::MultiLineString,
        }
    }

    /// The polylines making up this geometry, in order.
    #[must_use]
    pub fn parts(&self) -> Vec<&LineString<f64>> {
        match self {
            Self::LineString(line) => vec![line],
            Self::MultiLineString(lines) => lines.iter().collect(),
        }
    }

    /// Total number of coordinates across all parts.
    #[must_use]
    pub fn coordinate_count(&self) -> usize {
        self.parts().iter().map(|line| line.0.len()).sum()
    }
}

/// A single line feature. Source properties are not retained.
#[derive(Debug, Clone, PartialEq)]
pub struct LineFeature {
    /// The feature geometry.
    pub geometry: LineGeometry,
}

/// An ordered collection of line features in a known SRID.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCollection {
    /// The document's `name` member.
    pub name: String,
    /// SRID the feature coordinates are expressed in.
    pub srid: Srid,
    /// Features in source order.
    pub features: Vec<LineFeature>,
}

/// Why a feature was left out of the filtered collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The feature has no usable `geometry` object.
    MissingGeometry,
    /// The geometry is not a `LineString` or `MultiLineString`.
    UnsupportedType(String),
    /// The coordinates do not have the shape the type requires.
    MalformedCoordinates(String),
    /// Reprojection into the working SRID failed.
    Projection(String),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingGeometry => f.write_str("missing geometry"),
            Self::UnsupportedType(t) => write!(f, "unsupported geometry type {t:?}"),
            Self::MalformedCoordinates(m) => write!(f, "malformed coordinates: {m}"),
            Self::Projection(m) => write!(f, "reprojection failed: {m}"),
        }
    }
}

/// Result of screening one source feature.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOutcome {
    /// The feature was converted (and reprojected if needed).
    Kept(LineFeature),
    /// The feature was skipped.
    Dropped(DropReason),
}

/// Result of filtering a whole document.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    /// Surviving features, in the working SRID.
    pub collection: FeatureCollection,
    /// `true` when the input held exactly one feature and it was
    /// already a `MultiLineString`, meaning it was merged upstream.
    pub single_multi_line_string: bool,
    /// Number of features dropped.
    pub dropped: usize,
}

/// Result of attempting to merge a collection's lines.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Lines were merged; every feature is a `LineString`.
    Merged(FeatureCollection),
    /// Merging was rejected; the input collection is returned unchanged.
    Unmerged(FeatureCollection),
}

impl MergeOutcome {
    /// Whether the merge succeeded.
    #[must_use]
    pub const fn is_merged(&self) -> bool {
        matches!(self, Self::Merged(_))
    }

    /// The collection to persist, merged or not.
    #[must_use]
    pub fn into_collection(self) -> FeatureCollection {
        match self {
            Self::Merged(c) | Self::Unmerged(c) => c,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::line_string;

    #[test]
    fn counts_coordinates_across_parts() {
        let geometry = LineGeometry::MultiLineString(MultiLineString::new(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
            line_string![(x: 2.0, y: 0.0), (x: 3.0, y: 0.0), (x: 4.0, y: 0.0)],
        ]));
        assert_eq!(geometry.coordinate_count(), 5);
        assert_eq!(geometry.parts().len(), 2);
        assert_eq!(geometry.kind(), GeometryKind::MultiLineString);
    }

    #[test]
    fn parses_only_line_type_names() {
        assert_eq!(
            GeometryKind::from_type_name("LineString"),
            Some(GeometryKind::LineString)
        );
        assert_eq!(GeometryKind::from_type_name("Polygon"), None);
        assert_eq!(GeometryKind::MultiLineString.as_str(), "MultiLineString");
    }
}
