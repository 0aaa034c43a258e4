//! Persisting a processed collection as a network's parts.

use civic_map_bicycle_network_models::{FeatureCollection, LineGeometry};
use civic_map_database::network_db::{self, NetworkPartRow};
use civic_map_spatial::{GeometrySettings, Srid, reproject_line_string, reproject_multi_line_string};
use duckdb::Connection;
use geo::{Euclidean, Length};

use crate::BicycleNetworkError;

/// What a save wrote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaveSummary {
    /// Number of parts now stored for the network.
    pub parts: u64,
    /// Total length in metres, rounded to two decimals.
    pub length: f64,
}

/// Replaces a network's parts with `collection` and stores its total
/// length.
///
/// Geometries are stored in the working SRID. Lengths are measured in
/// the metric length SRID and rounded to two decimals. All geometry work
/// happens before the database is touched, so a failure leaves the
/// previous parts in place.
///
/// # Errors
///
/// * [`BicycleNetworkError::NotFound`] if the network does not exist
/// * [`BicycleNetworkError::Spatial`] if any geometry cannot be
///   reprojected
/// * [`BicycleNetworkError::Database`] if the replacement fails
pub fn save_network_to_db(
    conn: &Connection,
    collection: &FeatureCollection,
    network_id: i64,
    settings: &GeometrySettings,
) -> Result<SaveSummary, BicycleNetworkError> {
    if network_db::get_network(conn, network_id)?.is_none() {
        return Err(BicycleNetworkError::NotFound { id: network_id });
    }

    let mut rows: Vec<NetworkPartRow> = Vec::with_capacity(collection.features.len());
    let mut total_length = 0.0;

    for feature in &collection.features {
        let stored = to_srid(&feature.geometry, collection.srid, settings.working_srid)?;
        let measured = to_srid(&feature.geometry, collection.srid, settings.length_srid)?;

        total_length += planar_length(&measured);
        rows.push((
            stored.kind().as_str().to_string(),
            serde_json::to_string(&to_geojson(&stored))?,
        ));
    }

    let length = (total_length * 100.0).round() / 100.0;
    let parts = network_db::replace_parts(conn, network_id, &rows, length)?;

    log::info!("Network {network_id}: stored {parts} part(s), length {length:.2} m");

    Ok(SaveSummary { parts, length })
}

/// Cartesian length of all parts in the geometry's own units.
fn planar_length(geometry: &LineGeometry) -> f64 {
    match geometry {
        LineGeometry::LineString(line) => Euclidean.length(line),
        LineGeometry::MultiLineString(lines) => Euclidean.length(lines),
    }
}

fn to_srid(
    geometry: &LineGeometry,
    from: Srid,
    to: Srid,
) -> Result<LineGeometry, BicycleNetworkError> {
    Ok(match geometry {
        LineGeometry::LineString(line) => {
            LineGeometry::LineString(reproject_line_string(line, from, to)?)
        }
        LineGeometry::MultiLineString(lines) => {
            LineGeometry::MultiLineString(reproject_multi_line_string(lines, from, to)?)
        }
    })
}

/// Converts a line geometry into a `GeoJSON` geometry object.
#[must_use]
pub fn to_geojson(geometry: &LineGeometry) -> geojson::Geometry {
    let value = match geometry {
        LineGeometry::LineString(line) => geojson::Value::from(line),
        LineGeometry::MultiLineString(lines) => geojson::Value::from(lines),
    };
    geojson::Geometry::new(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_map_bicycle_network_models::LineFeature;
    use civic_map_database::network_db::{create_network, create_schema, get_network, get_parts};
    use geo::{MultiLineString, line_string};

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        conn
    }

    fn one_arc_second_line() -> FeatureCollection {
        FeatureCollection {
            name: "test".to_string(),
            srid: Srid::WGS84,
            features: vec![
                LineFeature {
                    geometry: LineGeometry::LineString(
                        line_string![(x: 25.0, y: 60.0), (x: 25.0 + 1.0 / 3600.0, y: 60.0)],
                    ),
                },
                LineFeature {
                    geometry: LineGeometry::MultiLineString(MultiLineString::new(vec![
                        line_string![(x: 25.0, y: 60.0), (x: 25.0 + 1.0 / 3600.0, y: 60.0)],
                    ])),
                },
            ],
        }
    }

    #[test]
    fn stores_parts_and_rounded_length() {
        let conn = memory_db();
        let id = create_network(&conn, Some("test")).unwrap();

        let summary =
            save_network_to_db(&conn, &one_arc_second_line(), id, &GeometrySettings::default())
                .unwrap();

        assert_eq!(summary.parts, 2);
        assert!((summary.length - 31.0).abs() < 0.2, "{}", summary.length);
        assert!(((summary.length * 100.0).round() - summary.length * 100.0).abs() < 1e-6);

        let parts = get_parts(&conn, id).unwrap();
        assert_eq!(parts[0].0, "LineString");
        assert_eq!(parts[1].0, "MultiLineString");
        let stored: serde_json::Value = serde_json::from_str(&parts[0].1).unwrap();
        assert_eq!(stored["type"], "LineString");
        assert_eq!(stored["coordinates"][0][0], 25.0);

        let network = get_network(&conn, id).unwrap().unwrap();
        assert!((network.length - summary.length).abs() < f64::EPSILON);
    }

    #[test]
    fn multi_part_length_sums_every_part() {
        let lines = MultiLineString::new(vec![
            line_string![(x: 0.0, y: 0.0), (x: 3.0, y: 4.0)],
            line_string![(x: 10.0, y: 0.0), (x: 10.0, y: 6.0), (x: 11.0, y: 6.0)],
        ]);
        let geometry = LineGeometry::MultiLineString(lines);
        assert!((planar_length(&geometry) - 12.0).abs() < 1e-12);

        let single = LineGeometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 0.0, y: 2.5)]);
        assert!((planar_length(&single) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn missing_network_is_an_error() {
        let conn = memory_db();
        let result =
            save_network_to_db(&conn, &one_arc_second_line(), 42, &GeometrySettings::default());
        assert!(matches!(result, Err(BicycleNetworkError::NotFound { id: 42 })));
    }

    #[test]
    fn reprojection_failure_keeps_previous_parts() {
        let conn = memory_db();
        let id = create_network(&conn, None).unwrap();
        save_network_to_db(&conn, &one_arc_second_line(), id, &GeometrySettings::default())
            .unwrap();

        let broken = FeatureCollection {
            name: "broken".to_string(),
            srid: Srid::WGS84,
            features: vec![LineFeature {
                geometry: LineGeometry::LineString(
                    line_string![(x: f64::NAN, y: 60.0), (x: 25.0, y: 60.0)],
                ),
            }],
        };
        let result = save_network_to_db(&conn, &broken, id, &GeometrySettings::default());

        assert!(matches!(result, Err(BicycleNetworkError::Spatial(_))));
        assert_eq!(get_parts(&conn, id).unwrap().len(), 2);
    }
}
