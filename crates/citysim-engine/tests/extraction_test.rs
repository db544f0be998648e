//! Extraction registry tests against the built-in urban wind extractors

use citysim_core::error::{CitysimError, Result};
use citysim_core::models::{AnalysisResult, DataRef};
use citysim_engine::analyses::urban_wind::{TYPE_NAME, WIND_COMFORT, WIND_SPEED};
use citysim_engine::analyses::Grid;
use citysim_engine::{ExtractorRegistry, ResultContent, ResultExtractor};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
}

impl ResultExtractor for Counting {
    fn export_formats(&self) -> &[&'static str] {
        &["json"]
    }

    fn extract_feature(&self, _content: &ResultContent<'_>) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::Value::Null)
    }

    fn extract_delta_feature(
        &self,
        _a: &ResultContent<'_>,
        _b: &ResultContent<'_>,
    ) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::Value::Null)
    }

    fn export_feature(&self, _content: &ResultContent<'_>, _format: &str, _dest: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn result(name: &str) -> AnalysisResult {
    AnalysisResult::new(name, name, DataRef::Single(format!("obj-{name}")), "json")
}

fn grid(values: Vec<Option<f64>>) -> Grid {
    Grid {
        bbox: [0.0, 0.0, 30.0, 10.0],
        width: values.len(),
        height: 1,
        values,
    }
}

fn write_grid(dir: &Path, name: &str, grid: &Grid) -> BTreeMap<String, PathBuf> {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_vec(grid).unwrap()).unwrap();
    BTreeMap::from([("default".to_string(), path)])
}

#[test]
fn test_delta_of_different_results_is_rejected_before_extraction() {
    let counting = Arc::new(Counting::default());
    let mut registry = ExtractorRegistry::new();
    registry.register(TYPE_NAME, WIND_SPEED, counting.clone());
    registry.register(TYPE_NAME, WIND_COMFORT, counting.clone());

    let paths = BTreeMap::new();
    let speed = result(WIND_SPEED);
    let comfort = result(WIND_COMFORT);
    let params = serde_json::Value::Null;

    let err = registry
        .extract_delta_feature(
            TYPE_NAME,
            &ResultContent::new(&paths, &speed, &params),
            &ResultContent::new(&paths, &comfort, &params),
        )
        .unwrap_err();

    assert!(matches!(err, CitysimError::ResultNameMismatch { .. }));
    assert!(err.to_string().contains(WIND_SPEED));
    assert!(err.to_string().contains(WIND_COMFORT));
    assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_default_registry_wind_extractors() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ExtractorRegistry::with_defaults();
    let params = serde_json::json!({ "wind_speed": 5.0 });

    let baseline = write_grid(dir.path(), "a.json", &grid(vec![Some(2.0), Some(4.0), None]));
    let variant = write_grid(dir.path(), "b.json", &grid(vec![Some(3.0), Some(1.0), Some(2.0)]));
    let speed = result(WIND_SPEED);
    let comfort = result(WIND_COMFORT);

    let delta = registry
        .extract_delta_feature(
            TYPE_NAME,
            &ResultContent::new(&baseline, &speed, &params),
            &ResultContent::new(&variant, &speed, &params),
        )
        .unwrap();
    assert_eq!(delta["type"], "heatmap");
    assert_eq!(delta["values"], serde_json::json!([1.0, -3.0, null]));
    assert_eq!(delta["legend"]["min"], -3.0);
    assert_eq!(delta["legend"]["max"], 3.0);

    let comfort_a = ResultContent::new(&baseline, &comfort, &params);
    let comfort_b = ResultContent::new(&variant, &comfort, &params);
    assert!(matches!(
        registry.extract_delta_feature(TYPE_NAME, &comfort_a, &comfort_b),
        Err(CitysimError::UnsupportedOperation { .. })
    ));

    let dest = dir.path().join("comfort.shp");
    assert!(matches!(
        registry.export_feature(TYPE_NAME, &comfort_a, "shapefile", &dest),
        Err(CitysimError::UnsupportedFormat { .. })
    ));
    assert!(!dest.exists());

    let dest = dir.path().join("speed-delta.geojson");
    registry
        .export_delta_feature(
            TYPE_NAME,
            &ResultContent::new(&baseline, &speed, &params),
            &ResultContent::new(&variant, &speed, &params),
            "geojson",
            &dest,
        )
        .unwrap();
    let collection: geojson::FeatureCollection =
        serde_json::from_slice(&fs::read(&dest).unwrap()).unwrap();
    assert_eq!(collection.features.len(), 2);
}

proptest! {
    #[test]
    fn prop_delta_is_antisymmetric(
        cells in proptest::collection::vec(
            (proptest::option::of(-50.0f64..50.0), proptest::option::of(-50.0f64..50.0)),
            1..32,
        )
    ) {
        let a = grid(cells.iter().map(|(a, _)| *a).collect());
        let b = grid(cells.iter().map(|(_, b)| *b).collect());

        let forward = a.delta(&b).unwrap();
        let backward = b.delta(&a).unwrap();

        for (f, r) in forward.values.iter().zip(&backward.values) {
            match (f, r) {
                (Some(f), Some(r)) => prop_assert!((f + r).abs() < 1e-9),
                (None, None) => {}
                _ => prop_assert!(false, "presence differs between directions"),
            }
        }
    }
}
