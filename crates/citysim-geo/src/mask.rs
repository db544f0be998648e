//! Zone mask rasterization.
//!
//! A zone mask assigns every cell of a raster grid to the zone whose outline
//! contains the cell centre. Masks are expensive to compute, so a
//! [`ZoneMaskCache`] computes them lazily and memoizes them per
//! (bounding box, dimensions).
//!
//! The memo map is guarded by a `Mutex`; lock poisoning is treated as
//! unrecoverable and unwrapped.

use crate::models::{to_geo_geometry, BoundingBox, Geometry};
use citysim_core::models::ZoneId;
use citysim_core::{CitysimError, Result};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{Geometry as GeoGeometry, MultiPolygon, Point};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

type ZoneEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Extent and resolution of a raster grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RasterSpec {
    pub bbox: BoundingBox,
    pub width: usize,
    pub height: usize,
}

impl RasterSpec {
    pub fn new(bbox: BoundingBox, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CitysimError::InvalidParameter {
                name: "raster".to_string(),
                reason: format!("dimensions must be positive, got {}x{}", width, height),
            });
        }

        if !(bbox.width() > 0.0 && bbox.height() > 0.0) {
            return Err(CitysimError::InvalidParameter {
                name: "raster".to_string(),
                reason: "bounding box has no extent".to_string(),
            });
        }

        Ok(Self { bbox, width, height })
    }

    /// Centre of a cell; row 0 is the northern edge
    pub fn cell_centre(&self, col: usize, row: usize) -> [f64; 2] {
        let dx = self.bbox.width() / self.width as f64;
        let dy = self.bbox.height() / self.height as f64;
        [
            self.bbox.min_x + (col as f64 + 0.5) * dx,
            self.bbox.max_y - (row as f64 + 0.5) * dy,
        ]
    }

    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for v in [self.bbox.min_x, self.bbox.min_y, self.bbox.max_x, self.bbox.max_y] {
            v.to_bits().hash(&mut hasher);
        }
        self.width.hash(&mut hasher);
        self.height.hash(&mut hasher);
        hasher.finish()
    }
}

/// Zone assignment of every raster cell, row-major
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneMask {
    pub spec: RasterSpec,
    pub cells: Vec<Option<ZoneId>>,
}

impl ZoneMask {
    pub fn zone_at(&self, col: usize, row: usize) -> Option<ZoneId> {
        if col >= self.spec.width || row >= self.spec.height {
            return None;
        }
        self.cells[row * self.spec.width + col]
    }

    /// Number of cells assigned to each zone
    pub fn cell_counts(&self) -> BTreeMap<ZoneId, usize> {
        let mut counts = BTreeMap::new();
        for zone in self.cells.iter().flatten() {
            *counts.entry(*zone).or_insert(0) += 1;
        }
        counts
    }
}

/// Lazily computed, memoized zone masks for one set of zone outlines
pub struct ZoneMaskCache {
    zones: Vec<(ZoneId, MultiPolygon<f64>)>,
    index: RTree<ZoneEnvelope>,
    masks: Mutex<HashMap<u64, Arc<ZoneMask>>>,
}

impl ZoneMaskCache {
    /// Index zone outlines; non-areal or empty outlines are skipped
    pub fn new(zones: Vec<(ZoneId, Geometry)>) -> Self {
        let zones: Vec<(ZoneId, MultiPolygon<f64>)> = zones
            .into_iter()
            .filter_map(|(id, geometry)| match to_geo_geometry(&geometry) {
                GeoGeometry::Polygon(p) => Some((id, MultiPolygon::new(vec![p]))),
                GeoGeometry::MultiPolygon(mp) => Some((id, mp)),
                _ => {
                    tracing::warn!(zone_id = id.0, "Skipping zone without areal outline");
                    None
                }
            })
            .collect();

        let envelopes = zones
            .iter()
            .enumerate()
            .filter_map(|(i, (_, outline))| {
                let rect = outline.bounding_rect()?;
                Some(GeomWithData::new(
                    Rectangle::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                    i,
                ))
            })
            .collect();

        Self { zones, index: RTree::bulk_load(envelopes), masks: Mutex::new(HashMap::new()) }
    }

    /// Mask for a raster, computed on first request
    pub fn mask(&self, spec: &RasterSpec) -> Arc<ZoneMask> {
        let key = spec.fingerprint();

        if let Some(mask) = self.masks.lock().unwrap().get(&key) {
            tracing::debug!(key, "Zone mask cache hit");
            return Arc::clone(mask);
        }

        // Rasterize without holding the lock; a concurrent duplicate is discarded
        let computed = Arc::new(self.rasterize(spec));
        let mut masks = self.masks.lock().unwrap();
        Arc::clone(masks.entry(key).or_insert(computed))
    }

    /// Number of memoized masks
    pub fn len(&self) -> usize {
        self.masks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rasterize(&self, spec: &RasterSpec) -> ZoneMask {
        let mut cells = Vec::with_capacity(spec.width * spec.height);

        for row in 0..spec.height {
            for col in 0..spec.width {
                let centre = spec.cell_centre(col, row);
                let point = Point::new(centre[0], centre[1]);

                let zone = self
                    .index
                    .locate_all_at_point(&centre)
                    .map(|envelope| envelope.data)
                    .filter(|&i| self.zones[i].1.contains(&point))
                    .min()
                    .map(|i| self.zones[i].0);

                cells.push(zone);
            }
        }

        ZoneMask { spec: *spec, cells }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_zones() -> ZoneMaskCache {
        ZoneMaskCache::new(vec![
            (ZoneId(1), Geometry::rectangle(0.0, 0.0, 5.0, 10.0)),
            (ZoneId(2), Geometry::rectangle(5.0, 0.0, 10.0, 10.0)),
            (ZoneId(3), Geometry::point(1.0, 1.0)),
        ])
    }

    #[test]
    fn test_rasterize_assigns_cells_by_centre() {
        let cache = two_zones();
        let spec = RasterSpec::new(BoundingBox::new(0.0, 0.0, 20.0, 10.0), 4, 2).unwrap();

        let mask = cache.mask(&spec);

        assert_eq!(mask.zone_at(0, 0), Some(ZoneId(1)));
        assert_eq!(mask.zone_at(1, 1), Some(ZoneId(2)));
        assert_eq!(mask.zone_at(2, 0), None);
        assert_eq!(mask.zone_at(9, 9), None);

        let counts = mask.cell_counts();
        assert_eq!(counts[&ZoneId(1)], 2);
        assert_eq!(counts[&ZoneId(2)], 2);
        assert!(!counts.contains_key(&ZoneId(3)));
    }

    #[test]
    fn test_masks_memoized_by_bbox_and_dimensions() {
        let cache = two_zones();
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let spec = RasterSpec::new(bbox, 8, 8).unwrap();

        let first = cache.mask(&spec);
        let second = cache.mask(&spec);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        let finer = RasterSpec::new(bbox, 16, 16).unwrap();
        let third = cache.mask(&finer);
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_invalid_raster_rejected() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(RasterSpec::new(bbox, 0, 4).is_err());
        assert!(RasterSpec::new(BoundingBox::new(1.0, 1.0, 1.0, 5.0), 4, 4).is_err());
    }
}
