//! Gridded result content and its extractor.
//!
//! Grid results are JSON documents holding a row-major array of cell values
//! over a bounding box, row 0 at the northern edge. Cells without a value are
//! null.

use citysim_core::error::{CitysimError, Result};
use citysim_core::models::BoundingBox;
use citysim_geo::mask::RasterSpec;
use geojson::{Feature, FeatureCollection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::Path;

use crate::extraction::{ResultContent, ResultExtractor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    /// [min_x, min_y, max_x, max_y]
    pub bbox: [f64; 4],
    pub width: usize,
    pub height: usize,
    pub values: Vec<Option<f64>>,
}

impl Grid {
    /// Read and validate a grid document
    pub fn read(path: &Path) -> Result<Self> {
        let invalid = |reason: String| CitysimError::InvalidResultContent {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = fs::read(path)?;
        let grid: Grid = serde_json::from_slice(&bytes).map_err(|e| invalid(e.to_string()))?;

        let cells = grid
            .width
            .checked_mul(grid.height)
            .ok_or_else(|| invalid(format!("{}x{} cells overflow", grid.width, grid.height)))?;
        if grid.values.len() != cells {
            return Err(invalid(format!(
                "expected {} values for a {}x{} grid, found {}",
                cells,
                grid.width,
                grid.height,
                grid.values.len()
            )));
        }
        grid.raster().map_err(|e| invalid(e.to_string()))?;

        Ok(grid)
    }

    pub fn raster(&self) -> Result<RasterSpec> {
        let [min_x, min_y, max_x, max_y] = self.bbox;
        RasterSpec::new(BoundingBox::new(min_x, min_y, max_x, max_y), self.width, self.height)
    }

    pub fn same_shape(&self, other: &Grid) -> bool {
        self.bbox == other.bbox && self.width == other.width && self.height == other.height
    }

    /// Cell-wise `other - self`; a cell missing in either grid stays missing
    pub fn delta(&self, other: &Grid) -> Option<Grid> {
        if !self.same_shape(other) {
            return None;
        }

        let values = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| Some(b.as_ref()? - a.as_ref()?))
            .collect();

        Some(Grid {
            bbox: self.bbox,
            width: self.width,
            height: self.height,
            values,
        })
    }

    /// Smallest and largest present value
    pub fn range(&self) -> Option<(f64, f64)> {
        self.values.iter().flatten().fold(None, |range, &v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    fn to_points(&self) -> Result<FeatureCollection> {
        let raster = self.raster()?;
        let features = self
            .values
            .iter()
            .enumerate()
            .filter_map(|(i, value)| {
                let value = (*value)?;
                let [x, y] = raster.cell_centre(i % self.width, i / self.width);
                let mut properties = serde_json::Map::new();
                properties.insert("value".to_string(), json!(value));
                Some(Feature {
                    bbox: None,
                    geometry: Some(geojson::Geometry::new(geojson::Value::Point(vec![x, y]))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                })
            })
            .collect();

        Ok(FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        })
    }
}

/// Extractor for gridded results
pub struct GridExtractor {
    label: &'static str,
    unit: &'static str,
    delta: bool,
}

impl GridExtractor {
    pub fn new(label: &'static str, unit: &'static str) -> Self {
        Self {
            label,
            unit,
            delta: false,
        }
    }

    /// Also support deltas between two grids
    pub fn with_delta(mut self) -> Self {
        self.delta = true;
        self
    }

    fn heatmap(&self, grid: &Grid, legend: Option<(f64, f64)>) -> serde_json::Value {
        let legend = legend.map(|(min, max)| json!({ "min": min, "max": max, "unit": self.unit }));
        json!({
            "type": "heatmap",
            "label": self.label,
            "bbox": grid.bbox,
            "width": grid.width,
            "height": grid.height,
            "values": grid.values,
            "legend": legend,
        })
    }

    fn read_delta(&self, a: &ResultContent<'_>, b: &ResultContent<'_>, operation: &str) -> Result<Grid> {
        if !self.delta {
            return Err(CitysimError::UnsupportedOperation {
                target: a.result.name.clone(),
                operation: operation.to_string(),
            });
        }

        let path_b = b.primary_path()?;
        let grid_a = Grid::read(a.primary_path()?)?;
        let grid_b = Grid::read(path_b)?;
        grid_a.delta(&grid_b).ok_or_else(|| CitysimError::InvalidResultContent {
            path: path_b.to_path_buf(),
            reason: "grids differ in extent or resolution".to_string(),
        })
    }

    fn write(grid: &Grid, format: &str, dest: &Path) -> Result<()> {
        let bytes = match format {
            "json" => serde_json::to_vec_pretty(grid)?,
            _ => serde_json::to_vec(&grid.to_points()?)?,
        };
        fs::write(dest, bytes)?;
        Ok(())
    }
}

impl ResultExtractor for GridExtractor {
    fn export_formats(&self) -> &[&'static str] {
        &["json", "geojson"]
    }

    fn extract_feature(&self, content: &ResultContent<'_>) -> Result<serde_json::Value> {
        let grid = Grid::read(content.primary_path()?)?;
        Ok(self.heatmap(&grid, grid.range()))
    }

    /// Heatmap of B - A with a legend symmetric around zero
    fn extract_delta_feature(
        &self,
        a: &ResultContent<'_>,
        b: &ResultContent<'_>,
    ) -> Result<serde_json::Value> {
        let delta = self.read_delta(a, b, "extract_delta_feature")?;
        let legend = delta.range().map(|(lo, hi)| {
            let bound = lo.abs().max(hi.abs());
            (-bound, bound)
        });
        Ok(self.heatmap(&delta, legend))
    }

    fn export_feature(&self, content: &ResultContent<'_>, format: &str, dest: &Path) -> Result<()> {
        let grid = Grid::read(content.primary_path()?)?;
        Self::write(&grid, format, dest)
    }

    fn export_delta_feature(
        &self,
        a: &ResultContent<'_>,
        b: &ResultContent<'_>,
        format: &str,
        dest: &Path,
    ) -> Result<()> {
        let delta = self.read_delta(a, b, "export_delta_feature")?;
        Self::write(&delta, format, dest)
    }
}
