//! Canonical geometry types used across all citysim crates.
//!
//! These types provide a bridge between GeoJSON serialization and the
//! computational geo crate types.

use serde::{Deserialize, Serialize};

/// GeoJSON-compatible geometry representation
///
/// This enum directly maps to GeoJSON geometry types with coordinate arrays.
/// It can be serialized/deserialized as GeoJSON and converted to/from `geo` crate types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        coordinates: [f64; 2],
    },
    LineString {
        coordinates: Vec<[f64; 2]>,
    },
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPoint {
        coordinates: Vec<[f64; 2]>,
    },
    MultiLineString {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
}

impl Geometry {
    /// Create a Point geometry
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point { coordinates: [x, y] }
    }

    /// Create a LineString geometry
    pub fn line_string(coords: Vec<[f64; 2]>) -> Self {
        Geometry::LineString { coordinates: coords }
    }

    /// Create a Polygon geometry
    pub fn polygon(rings: Vec<Vec<[f64; 2]>>) -> Self {
        Geometry::Polygon { coordinates: rings }
    }

    /// Create an axis-aligned rectangular Polygon
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Geometry::polygon(vec![vec![
            [min_x, min_y],
            [max_x, min_y],
            [max_x, max_y],
            [min_x, max_y],
            [min_x, min_y],
        ]])
    }

    /// Whether the geometry carries any coordinate data at all
    pub fn has_coordinates(&self) -> bool {
        match self {
            Geometry::Point { coordinates } => coordinates.iter().all(|c| c.is_finite()),
            Geometry::LineString { coordinates } | Geometry::MultiPoint { coordinates } => {
                !coordinates.is_empty()
            }
            Geometry::Polygon { coordinates } | Geometry::MultiLineString { coordinates } => {
                coordinates.iter().any(|ring| !ring.is_empty())
            }
            Geometry::MultiPolygon { coordinates } => {
                coordinates.iter().flatten().any(|ring| !ring.is_empty())
            }
        }
    }

    /// Bounding box of all coordinates, None for geometries without coordinates
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let coords: Vec<[f64; 2]> = match self {
            Geometry::Point { coordinates } => vec![*coordinates],
            Geometry::LineString { coordinates } | Geometry::MultiPoint { coordinates } => {
                coordinates.clone()
            }
            Geometry::Polygon { coordinates } | Geometry::MultiLineString { coordinates } => {
                coordinates.iter().flatten().copied().collect()
            }
            Geometry::MultiPolygon { coordinates } => {
                coordinates.iter().flatten().flatten().copied().collect()
            }
        };
        BoundingBox::from_coords(&coords)
    }

    /// Try to parse from a serde_json::Value (GeoJSON)
    pub fn from_geojson(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    fn from_coords(coords: &[[f64; 2]]) -> Option<Self> {
        let first = coords.first()?;
        let mut bbox = Self::new(first[0], first[1], first[0], first[1]);
        for c in coords.iter().skip(1) {
            bbox.min_x = bbox.min_x.min(c[0]);
            bbox.min_y = bbox.min_y.min(c[1]);
            bbox.max_x = bbox.max_x.max(c[0]);
            bbox.max_y = bbox.max_y.max(c[1]);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_serialization() {
        let point = Geometry::point(8.54, 47.37);
        let json = serde_json::to_string(&point).unwrap();
        assert!(json.contains("Point"));
        assert!(json.contains("8.54"));

        let parsed: Geometry = serde_json::from_str(&json).unwrap();
        assert_eq!(point, parsed);
    }

    #[test]
    fn test_empty_geometries_have_no_coordinates() {
        assert!(!Geometry::polygon(vec![]).has_coordinates());
        assert!(!Geometry::polygon(vec![vec![]]).has_coordinates());
        assert!(!Geometry::MultiPolygon { coordinates: vec![vec![]] }.has_coordinates());
        assert!(!Geometry::point(f64::NAN, 1.0).has_coordinates());
        assert!(Geometry::rectangle(0.0, 0.0, 1.0, 1.0).has_coordinates());
    }

    #[test]
    fn test_bounding_box() {
        let bbox = Geometry::rectangle(2.0, 3.0, 5.0, 9.0).bounding_box().unwrap();
        assert_eq!(bbox, BoundingBox::new(2.0, 3.0, 5.0, 9.0));
        assert_eq!(bbox.width(), 3.0);
        assert_eq!(bbox.height(), 6.0);
        assert!(Geometry::MultiPoint { coordinates: vec![] }.bounding_box().is_none());
    }
}
