//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use chrono::Utc;
use citysim_core::models::{
    AnalysisGroup, AnalysisRun, FeatureCategory, FeatureId, GeoFeature, Geometry, GroupId,
    ProjectId, RunId, Scene, SceneId, ZonesConfigurationMapping,
};
use citysim_engine::analyses::Grid;
use citysim_engine::gateway::{LocalJob, LocalProcessor};
use citysim_engine::{AnalysisContext, AnalysisRegistry, Dispatcher, GeometryService, LocalJobGateway, Services};
use citysim_store::cache::{Cache, CacheConfig};
use citysim_store::memory::{MemoryGeometryStore, MemoryRunStore};
use citysim_store::ports::RunStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const PATIENCE: Duration = Duration::from_secs(5);

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub runs: Arc<MemoryRunStore>,
    pub gateway: Arc<LocalJobGateway>,
    pub geometries: Arc<GeometryService>,
    pub group: AnalysisGroup,
    pub scene: Scene,
    _cache_dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let cache_dir = tempfile::tempdir().unwrap();
        let runs = Arc::new(MemoryRunStore::new());
        let gateway = Arc::new(LocalJobGateway::new());
        let cache = Arc::new(Cache::new(CacheConfig::new(
            cache_dir.path(),
            Duration::from_secs(60),
            Duration::from_secs(600),
        )));
        let geometries = Arc::new(GeometryService::new(Arc::new(MemoryGeometryStore::new()), cache));

        geometries
            .create_zone(
                "harbour",
                &Geometry::rectangle(0.0, 0.0, 100.0, 100.0),
                vec![GeoFeature::new(
                    FeatureId(0),
                    FeatureCategory::Building,
                    Geometry::rectangle(10.0, 10.0, 20.0, 20.0),
                )],
            )
            .await
            .unwrap();

        let group = AnalysisGroup {
            id: GroupId::new("g-wind"),
            project_id: ProjectId::new("p1"),
            name: "westerly".to_string(),
            analysis_type: "urban-wind".to_string(),
            area_of_interest: Geometry::rectangle(0.0, 0.0, 50.0, 50.0),
            parameters: serde_json::json!({ "wind_direction": 270.0 }),
            created_at: Utc::now(),
        };
        let scene = Scene {
            id: SceneId::new("s-baseline"),
            project_id: ProjectId::new("p1"),
            name: "baseline".to_string(),
            zone_config_mapping: ZonesConfigurationMapping::new(),
            module_settings: serde_json::Value::Null,
        };
        runs.store_group(&group).await.unwrap();
        runs.store_scene(&scene).await.unwrap();

        let services = Services {
            store: runs.clone(),
            gateway: gateway.clone(),
            geometries: geometries.clone(),
        };
        let dispatcher = Dispatcher::new(AnalysisRegistry::with_defaults(), services, 4);

        Self {
            dispatcher,
            runs,
            gateway,
            geometries,
            group,
            scene,
            _cache_dir: cache_dir,
        }
    }

    pub fn run_id(&self) -> RunId {
        RunId::derive(&self.group.id, &self.scene.id)
    }

    /// Insert the run record without dispatching it
    pub async fn insert_run(&self) -> AnalysisRun {
        self.runs
            .insert_run(&AnalysisRun::new(&self.group, &self.scene, "alice"))
            .await
            .unwrap()
    }

    /// Context for a run outside of the dispatcher
    pub fn context(&self, run: &AnalysisRun) -> AnalysisContext {
        let services = self.dispatcher.services().clone();
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        AnalysisContext::new(run, self.group.clone(), self.scene.clone(), services, lock)
    }

    /// Wait until the run has persisted `checkpoint`
    pub async fn wait_for_checkpoint(&self, run_id: &RunId, checkpoint: &str) {
        tokio::time::timeout(PATIENCE, async {
            loop {
                let run = self.runs.get_run(run_id).await.unwrap().unwrap();
                if run.checkpoint == checkpoint {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("run never reached checkpoint '{}'", checkpoint));
    }
}

/// Wait for the `n`th job of a processor
pub async fn nth_job(processor: &LocalProcessor, n: usize) -> Arc<LocalJob> {
    tokio::time::timeout(PATIENCE, async {
        loop {
            if processor.submissions() >= n {
                if let Some(job) = processor.latest_job() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job was never submitted")
}

pub fn grid_bytes(value: f64) -> Vec<u8> {
    serde_json::to_vec(&Grid {
        bbox: [0.0, 0.0, 50.0, 50.0],
        width: 2,
        height: 2,
        values: vec![Some(value); 4],
    })
    .unwrap()
}

pub fn preparation_outputs() -> BTreeMap<String, Vec<u8>> {
    BTreeMap::from([("domain".to_string(), b"{\"cells\": 4}".to_vec())])
}

pub fn simulation_outputs() -> BTreeMap<String, Vec<u8>> {
    BTreeMap::from([
        ("wind-speed".to_string(), grid_bytes(3.5)),
        ("wind-comfort".to_string(), grid_bytes(1.0)),
    ])
}
