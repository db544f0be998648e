//! Geometry conversions for citysim-geo.
//!
//! This module re-exports canonical types from `citysim-core` and provides
//! conversions to/from the `geo` crate and to `geojson` geometries.

use geo::Geometry as GeoGeometry;

// Re-export canonical types from citysim-core
pub use citysim_core::models::{BoundingBox, Geometry};

fn to_coord(c: &[f64; 2]) -> geo::Coord {
    geo::Coord { x: c[0], y: c[1] }
}

fn to_line_string(coords: &[[f64; 2]]) -> geo::LineString {
    geo::LineString::new(coords.iter().map(to_coord).collect())
}

fn to_polygon(rings: &[Vec<[f64; 2]>]) -> geo::Polygon {
    match rings.split_first() {
        Some((exterior, interiors)) => geo::Polygon::new(
            to_line_string(exterior),
            interiors.iter().map(|r| to_line_string(r)).collect(),
        ),
        None => geo::Polygon::new(geo::LineString::new(vec![]), vec![]),
    }
}

fn line_coords(ls: &geo::LineString) -> Vec<[f64; 2]> {
    ls.coords().map(|c| [c.x, c.y]).collect()
}

fn polygon_rings(p: &geo::Polygon) -> Vec<Vec<[f64; 2]>> {
    std::iter::once(p.exterior()).chain(p.interiors()).map(line_coords).collect()
}

/// Convert a canonical Geometry to a geo::Geometry
pub fn to_geo_geometry(geom: &Geometry) -> GeoGeometry {
    match geom {
        Geometry::Point { coordinates } => {
            GeoGeometry::Point(geo::Point::new(coordinates[0], coordinates[1]))
        }
        Geometry::LineString { coordinates } => GeoGeometry::LineString(to_line_string(coordinates)),
        Geometry::Polygon { coordinates } => GeoGeometry::Polygon(to_polygon(coordinates)),
        Geometry::MultiPoint { coordinates } => GeoGeometry::MultiPoint(geo::MultiPoint::new(
            coordinates.iter().map(|c| geo::Point::new(c[0], c[1])).collect(),
        )),
        Geometry::MultiLineString { coordinates } => GeoGeometry::MultiLineString(
            geo::MultiLineString::new(coordinates.iter().map(|l| to_line_string(l)).collect()),
        ),
        Geometry::MultiPolygon { coordinates } => GeoGeometry::MultiPolygon(geo::MultiPolygon::new(
            coordinates.iter().map(|p| to_polygon(p)).collect(),
        )),
    }
}

/// Convert a geo::Geometry to a canonical Geometry
///
/// Returns None for empty geometry collections, which have no canonical form.
pub fn from_geo_geometry(geom: &GeoGeometry) -> Option<Geometry> {
    let converted = match geom {
        GeoGeometry::Point(p) => Geometry::Point { coordinates: [p.x(), p.y()] },
        GeoGeometry::Line(l) => Geometry::LineString {
            coordinates: vec![[l.start.x, l.start.y], [l.end.x, l.end.y]],
        },
        GeoGeometry::LineString(ls) => Geometry::LineString { coordinates: line_coords(ls) },
        GeoGeometry::Polygon(p) => Geometry::Polygon { coordinates: polygon_rings(p) },
        GeoGeometry::MultiPoint(mp) => Geometry::MultiPoint {
            coordinates: mp.iter().map(|p| [p.x(), p.y()]).collect(),
        },
        GeoGeometry::MultiLineString(mls) => Geometry::MultiLineString {
            coordinates: mls.iter().map(line_coords).collect(),
        },
        GeoGeometry::MultiPolygon(mp) => Geometry::MultiPolygon {
            coordinates: mp.iter().map(polygon_rings).collect(),
        },
        GeoGeometry::GeometryCollection(gc) => return gc.iter().find_map(from_geo_geometry),
        GeoGeometry::Rect(r) => Geometry::Polygon { coordinates: polygon_rings(&r.to_polygon()) },
        GeoGeometry::Triangle(t) => {
            Geometry::Polygon { coordinates: polygon_rings(&t.to_polygon()) }
        }
    };
    Some(converted)
}

/// Convert a canonical Geometry to a `geojson` geometry
pub fn to_geojson_geometry(geom: &Geometry) -> geojson::Geometry {
    fn position(c: &[f64; 2]) -> Vec<f64> {
        vec![c[0], c[1]]
    }
    fn positions(coords: &[[f64; 2]]) -> Vec<Vec<f64>> {
        coords.iter().map(position).collect()
    }
    fn rings(rings: &[Vec<[f64; 2]>]) -> Vec<Vec<Vec<f64>>> {
        rings.iter().map(|r| positions(r)).collect()
    }

    let value = match geom {
        Geometry::Point { coordinates } => geojson::Value::Point(position(coordinates)),
        Geometry::LineString { coordinates } => geojson::Value::LineString(positions(coordinates)),
        Geometry::Polygon { coordinates } => geojson::Value::Polygon(rings(coordinates)),
        Geometry::MultiPoint { coordinates } => geojson::Value::MultiPoint(positions(coordinates)),
        Geometry::MultiLineString { coordinates } => {
            geojson::Value::MultiLineString(rings(coordinates))
        }
        Geometry::MultiPolygon { coordinates } => {
            geojson::Value::MultiPolygon(coordinates.iter().map(|p| rings(p)).collect())
        }
    };
    geojson::Geometry::new(value)
}

/// Extension trait for Geometry with geo-crate operations
pub trait GeometryExt {
    /// Convert to geo::Geometry
    fn to_geo(&self) -> GeoGeometry;

    /// Convert to a geojson geometry
    fn to_geojson_geometry(&self) -> geojson::Geometry;
}

impl GeometryExt for Geometry {
    fn to_geo(&self) -> GeoGeometry {
        to_geo_geometry(self)
    }

    fn to_geojson_geometry(&self) -> geojson::Geometry {
        to_geojson_geometry(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polygon_with_hole_keeps_rings() {
        let geom = Geometry::polygon(vec![
            vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0], [0.0, 0.0]],
            vec![[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 2.0], [1.0, 1.0]],
        ]);
        let back = from_geo_geometry(&to_geo_geometry(&geom)).unwrap();

        match back {
            Geometry::Polygon { coordinates } => assert_eq!(coordinates.len(), 2),
            other => panic!("Expected Polygon geometry, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_collection_has_no_canonical_form() {
        let empty = GeoGeometry::GeometryCollection(geo::GeometryCollection::new_from(vec![]));
        assert!(from_geo_geometry(&empty).is_none());
    }

    #[test]
    fn test_geojson_multipolygon() {
        let geom = Geometry::MultiPolygon {
            coordinates: vec![vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]],
        };
        let gj = geom.to_geojson_geometry();

        match gj.value {
            geojson::Value::MultiPolygon(polys) => {
                assert_eq!(polys.len(), 1);
                assert_eq!(polys[0][0][1], vec![1.0, 0.0]);
            }
            other => panic!("Expected MultiPolygon, got {:?}", other),
        }
    }
}
