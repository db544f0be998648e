//! Area-of-interest filtering.
//!
//! Discrete features (buildings, vegetation) are kept only when fully inside
//! the area. Continuous features (landuse, landcover, zones, networks) are
//! cropped to the area and dropped when nothing is left of them.

use crate::models::{from_geo_geometry, to_geo_geometry, Geometry};
use citysim_core::models::{AreaPolicy, GeoFeature};
use citysim_core::{CitysimError, Result};
use geo::algorithm::area::Area;
use geo::algorithm::bool_ops::BooleanOps;
use geo::algorithm::contains::Contains;
use geo::algorithm::intersects::Intersects;
use geo::{Geometry as GeoGeometry, MultiLineString, MultiPoint, MultiPolygon};

/// A polygonal area features are filtered against
#[derive(Debug, Clone)]
pub struct AreaFilter {
    area: MultiPolygon<f64>,
    area_geom: GeoGeometry<f64>,
}

impl AreaFilter {
    /// Build a filter from an areal geometry
    ///
    /// Only polygons and multi-polygons describe an area; anything else is
    /// rejected as an invalid parameter.
    pub fn new(area: &Geometry) -> Result<Self> {
        let area = match to_geo_geometry(area) {
            GeoGeometry::Polygon(p) => MultiPolygon::new(vec![p]),
            GeoGeometry::MultiPolygon(mp) => mp,
            other => {
                return Err(CitysimError::InvalidParameter {
                    name: "area".to_string(),
                    reason: format!("expected a polygonal area, got {}", geometry_kind(&other)),
                })
            }
        };

        if area.unsigned_area() == 0.0 {
            return Err(CitysimError::InvalidParameter {
                name: "area".to_string(),
                reason: "area has no extent".to_string(),
            });
        }

        Ok(Self { area_geom: GeoGeometry::MultiPolygon(area.clone()), area })
    }

    /// Apply the filter to a geometry under the given policy
    ///
    /// Returns None when the geometry is excluded or when cropping leaves
    /// nothing of it.
    pub fn apply(&self, geometry: &Geometry, policy: AreaPolicy) -> Option<Geometry> {
        if !geometry.has_coordinates() {
            return None;
        }

        let geom = to_geo_geometry(geometry);
        if !self.area_geom.intersects(&geom) {
            return None;
        }

        match policy {
            AreaPolicy::Contain => self.area_geom.contains(&geom).then(|| geometry.clone()),
            AreaPolicy::Crop => self.crop(&geom),
        }
    }

    /// Apply the filter to a feature with the policy of its category
    pub fn filter_feature(&self, feature: &GeoFeature) -> Option<GeoFeature> {
        let geometry = feature.geometry.as_ref()?;
        let filtered = self.apply(geometry, feature.category.area_policy())?;

        Some(GeoFeature { geometry: Some(filtered), ..feature.clone() })
    }

    fn crop(&self, geom: &GeoGeometry<f64>) -> Option<Geometry> {
        let cropped = match geom {
            GeoGeometry::Polygon(p) => GeoGeometry::MultiPolygon(self.area.intersection(p)),
            GeoGeometry::MultiPolygon(mp) => GeoGeometry::MultiPolygon(self.area.intersection(mp)),
            GeoGeometry::LineString(ls) => GeoGeometry::MultiLineString(
                self.area.clip(&MultiLineString::new(vec![ls.clone()]), false),
            ),
            GeoGeometry::MultiLineString(mls) => {
                GeoGeometry::MultiLineString(self.area.clip(mls, false))
            }
            GeoGeometry::MultiPoint(mp) => GeoGeometry::MultiPoint(MultiPoint::new(
                mp.iter().filter(|p| self.area.intersects(*p)).copied().collect(),
            )),
            other => other.clone(),
        };

        if is_empty(&cropped) {
            return None;
        }

        from_geo_geometry(&cropped)
    }
}

fn is_empty(geom: &GeoGeometry<f64>) -> bool {
    match geom {
        GeoGeometry::MultiPolygon(mp) => mp.0.is_empty() || mp.unsigned_area() == 0.0,
        GeoGeometry::MultiLineString(mls) => mls.0.iter().all(|ls| ls.0.len() < 2),
        GeoGeometry::MultiPoint(mp) => mp.0.is_empty(),
        _ => false,
    }
}

fn geometry_kind(geom: &GeoGeometry<f64>) -> &'static str {
    match geom {
        GeoGeometry::Point(_) => "Point",
        GeoGeometry::MultiPoint(_) => "MultiPoint",
        GeoGeometry::LineString(_) | GeoGeometry::Line(_) => "LineString",
        GeoGeometry::MultiLineString(_) => "MultiLineString",
        _ => "GeometryCollection",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citysim_core::models::{FeatureCategory, FeatureId};
    use proptest::prelude::*;

    fn area() -> AreaFilter {
        AreaFilter::new(&Geometry::rectangle(0.0, 0.0, 10.0, 10.0)).unwrap()
    }

    fn polygon_area(geom: &Geometry) -> f64 {
        to_geo_geometry(geom).unsigned_area()
    }

    #[test]
    fn test_straddling_building_is_excluded() {
        let building = GeoFeature::new(
            FeatureId(1),
            FeatureCategory::Building,
            Geometry::rectangle(8.0, 8.0, 12.0, 12.0),
        );

        assert!(area().filter_feature(&building).is_none());
    }

    #[test]
    fn test_contained_building_is_kept_unchanged() {
        let footprint = Geometry::rectangle(2.0, 2.0, 4.0, 4.0);
        let building = GeoFeature::new(FeatureId(1), FeatureCategory::Building, footprint.clone());

        let kept = area().filter_feature(&building).unwrap();
        assert_eq!(kept.geometry, Some(footprint));
    }

    #[test]
    fn test_straddling_landuse_is_cropped() {
        let parcel = GeoFeature::new(
            FeatureId(7),
            FeatureCategory::Landuse,
            Geometry::rectangle(8.0, 8.0, 12.0, 12.0),
        )
        .with_property("use", serde_json::json!("park"));

        let cropped = area().filter_feature(&parcel).unwrap();
        let geometry = cropped.geometry.unwrap();

        assert!(matches!(geometry, Geometry::MultiPolygon { .. }));
        assert!((polygon_area(&geometry) - 4.0).abs() < 1e-9);
        assert_eq!(cropped.properties["use"], "park");
    }

    #[test]
    fn test_landuse_touching_edge_is_dropped() {
        // Shares only the x = 10 edge with the area
        let parcel = Geometry::rectangle(10.0, 0.0, 12.0, 10.0);
        assert!(area().apply(&parcel, AreaPolicy::Crop).is_none());
    }

    #[test]
    fn test_disjoint_feature_is_dropped() {
        let far = Geometry::rectangle(20.0, 20.0, 30.0, 30.0);
        assert!(area().apply(&far, AreaPolicy::Crop).is_none());
        assert!(area().apply(&far, AreaPolicy::Contain).is_none());
    }

    #[test]
    fn test_network_line_is_clipped() {
        let road = Geometry::line_string(vec![[-5.0, 5.0], [15.0, 5.0]]);

        match area().apply(&road, AreaPolicy::Crop) {
            Some(Geometry::MultiLineString { coordinates }) => {
                assert_eq!(coordinates.len(), 1);
                let xs: Vec<f64> = coordinates[0].iter().map(|c| c[0]).collect();
                assert!(xs.iter().all(|x| (0.0..=10.0).contains(x)));
            }
            other => panic!("Expected clipped MultiLineString, got {:?}", other),
        }
    }

    #[test]
    fn test_feature_without_geometry_is_dropped() {
        let mut feature =
            GeoFeature::new(FeatureId(3), FeatureCategory::Landcover, Geometry::point(1.0, 1.0));
        feature.geometry = None;

        assert!(area().filter_feature(&feature).is_none());
    }

    #[test]
    fn test_non_areal_filter_rejected() {
        let err = AreaFilter::new(&Geometry::point(1.0, 1.0)).unwrap_err();
        assert!(matches!(err, CitysimError::InvalidParameter { .. }));
    }

    proptest! {
        #[test]
        fn prop_crop_never_yields_empty_or_larger(
            x in -20.0f64..20.0,
            y in -20.0f64..20.0,
            w in 0.5f64..15.0,
            h in 0.5f64..15.0,
        ) {
            let parcel = Geometry::rectangle(x, y, x + w, y + h);

            if let Some(cropped) = area().apply(&parcel, AreaPolicy::Crop) {
                let cropped_area = polygon_area(&cropped);
                prop_assert!(cropped_area > 0.0);
                prop_assert!(cropped_area <= w * h + 1e-6);
                prop_assert!(cropped_area <= 100.0 + 1e-6);
            }
        }

        #[test]
        fn prop_contain_is_all_or_nothing(
            x in -20.0f64..20.0,
            y in -20.0f64..20.0,
            w in 0.5f64..15.0,
            h in 0.5f64..15.0,
        ) {
            let building = Geometry::rectangle(x, y, x + w, y + h);
            let inside = x >= 0.0 && y >= 0.0 && x + w <= 10.0 && y + h <= 10.0;

            match area().apply(&building, AreaPolicy::Contain) {
                Some(kept) => {
                    prop_assert!(inside);
                    prop_assert_eq!(kept, building);
                }
                None => prop_assert!(!inside),
            }
        }
    }
}
