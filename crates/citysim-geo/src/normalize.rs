//! Composition of features into GeoJSON for rendering.

use crate::models::{to_geojson_geometry, Geometry};
use citysim_core::models::GeoFeature;
use geojson::{feature::Id, Feature, FeatureCollection};

/// Lift a Polygon into a single-member MultiPolygon
///
/// Every other geometry is returned unchanged.
pub fn to_multi_polygon(geometry: Geometry) -> Geometry {
    match geometry {
        Geometry::Polygon { coordinates } => Geometry::MultiPolygon { coordinates: vec![coordinates] },
        other => other,
    }
}

/// Build a feature collection, normalizing polygons to multi-polygons
///
/// Features whose geometry is missing or has no coordinates are dropped with a
/// warning.
pub fn compose_feature_collection<I>(features: I) -> FeatureCollection
where
    I: IntoIterator<Item = GeoFeature>,
{
    let mut dropped = 0usize;

    let features: Vec<Feature> = features
        .into_iter()
        .filter_map(|feature| {
            let geometry = match feature.geometry {
                Some(g) if g.has_coordinates() => to_multi_polygon(g),
                _ => {
                    tracing::warn!(
                        feature_id = feature.id.0,
                        category = feature.category.as_str(),
                        "Dropping feature without coordinates"
                    );
                    dropped += 1;
                    return None;
                }
            };

            let mut properties = feature.properties;
            properties.insert("category".to_string(), feature.category.as_str().into());

            Some(Feature {
                bbox: None,
                geometry: Some(to_geojson_geometry(&geometry)),
                id: Some(Id::Number(feature.id.0.into())),
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect();

    if dropped > 0 {
        tracing::debug!(dropped, kept = features.len(), "Composed feature collection");
    }

    FeatureCollection { bbox: None, features, foreign_members: None }
}
