//! Reprojection of line geometries between supported SRIDs.

use geo::{Coord, LineString, MultiLineString};

use crate::projection::Projection;
use crate::{SpatialError, Srid};

/// A resolved source-to-target coordinate transformation.
struct Transform {
    from_srid: Srid,
    from: Projection,
    to: Projection,
}

impl Transform {
    fn new(from_srid: Srid, to_srid: Srid) -> Result<Self, SpatialError> {
        Ok(Self {
            from_srid,
            from: Projection::for_srid(from_srid)?,
            to: Projection::for_srid(to_srid)?,
        })
    }

    fn apply(&self, c: Coord<f64>) -> Result<Coord<f64>, SpatialError> {
        if !c.x.is_finite() || !c.y.is_finite() {
            return Err(SpatialError::InvalidCoordinate {
                srid: self.from_srid,
                x: c.x,
                y: c.y,
            });
        }

        let (lon, lat) = self.from.to_geographic(c.x, c.y);
        let (x, y) = self.to.from_geographic(lon, lat);

        if x.is_finite() && y.is_finite() {
            Ok(Coord { x, y })
        } else {
            Err(SpatialError::InvalidCoordinate {
                srid: self.from_srid,
                x: c.x,
                y: c.y,
            })
        }
    }

    fn line_string(&self, line: &LineString<f64>) -> Result<LineString<f64>, SpatialError> {
        line.coords()
            .map(|c| self.apply(*c))
            .collect::<Result<Vec<_>, _>>()
            .map(LineString::new)
    }
}

/// Reprojects a [`LineString`] from `from` to `to`.
///
/// Returns a clone when both SRIDs are equal.
///
/// # Errors
///
/// Returns [`SpatialError`] if either SRID is unsupported or a
/// coordinate cannot be projected.
pub fn reproject_line_string(
    line: &LineString<f64>,
    from: Srid,
    to: Srid,
) -> Result<LineString<f64>, SpatialError> {
    if from == to {
        return Ok(line.clone());
    }
    Transform::new(from, to)?.line_string(line)
}

/// Reprojects every part of a [`MultiLineString`] from `from` to `to`.
///
/// # Errors
///
/// Returns [`SpatialError`] if either SRID is unsupported or a
/// coordinate cannot be projected.
pub fn reproject_multi_line_string(
    lines: &MultiLineString<f64>,
    from: Srid,
    to: Srid,
) -> Result<MultiLineString<f64>, SpatialError> {
    if from == to {
        return Ok(lines.clone());
    }
    let transform = Transform::new(from, to)?;
    lines
        .iter()
        .map(|line| transform.line_string(line))
        .collect::<Result<Vec<_>, _>>()
        .map(MultiLineString::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Euclidean, Length, line_string};

    #[test]
    fn same_srid_is_identity() {
        let line = line_string![(x: 22.0, y: 60.0), (x: 22.1, y: 60.1)];
        let out = reproject_line_string(&line, Srid::WGS84, Srid::WGS84).unwrap();
        assert_eq!(out, line);
    }

    #[test]
    fn reprojects_between_gk_zones_through_geographic() {
        let line = line_string![(x: 22.2666, y: 60.4518), (x: 22.27, y: 60.45)];
        let gk23 = reproject_line_string(&line, Srid::WGS84, Srid::GK23FIN).unwrap();
        let gk25 = reproject_line_string(&gk23, Srid::GK23FIN, Srid::GK25FIN).unwrap();
        let back = reproject_line_string(&gk25, Srid::GK25FIN, Srid::WGS84).unwrap();

        for (a, b) in line.coords().zip(back.coords()) {
            assert!((a.x - b.x).abs() < 1e-7);
            assert!((a.y - b.y).abs() < 1e-7);
        }
    }

    #[test]
    fn non_finite_coordinates_are_rejected() {
        let line = line_string![(x: f64::NAN, y: 60.0), (x: 22.1, y: 60.1)];
        let result = reproject_line_string(&line, Srid::WGS84, Srid::GK25FIN);
        assert!(matches!(result, Err(SpatialError::InvalidCoordinate { .. })));
    }

    #[test]
    fn unsupported_target_is_rejected() {
        let line = line_string![(x: 22.0, y: 60.0), (x: 22.1, y: 60.1)];
        let result = reproject_line_string(&line, Srid::WGS84, Srid(27700));
        assert!(matches!(result, Err(SpatialError::UnsupportedSrid(_))));
    }

    #[test]
    fn one_arc_second_of_longitude_at_sixty_north_is_about_fifteen_metres() {
        let line = line_string![(x: 25.0, y: 60.0), (x: 25.0 + 1.0 / 3600.0, y: 60.0)];
        let projected = reproject_line_string(&line, Srid::WGS84, Srid::GK25FIN).unwrap();
        let length = Euclidean.length(&projected);
        assert!((length - 15.5).abs() < 0.1, "length was {length}");
    }
}
