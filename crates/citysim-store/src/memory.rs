//! In-memory storage implementations for development and testing.
//!
//! These implementations use `RwLock::unwrap()` intentionally. Lock poisoning
//! only occurs when another thread panicked while holding the lock, which is
//! an unrecoverable state. For production workloads, use the PostgreSQL backend.

use async_trait::async_trait;
use citysim_core::error::{CitysimError, Result};
use citysim_core::models::{
    AnalysisGroup, AnalysisResult, AnalysisRun, CheckpointArgs, CheckpointState, ConfigurationId,
    FeatureCategory, FeatureId, GeoFeature, Geometry, GroupId, ProjectId, RunId, RunStatus, Scene, SceneId, Zone,
    ZoneConfiguration, ZoneId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::ports::{GeometryStore, RunStore};

/// In-memory implementation of RunStore
#[derive(Debug, Clone, Default)]
pub struct MemoryRunStore {
    groups: Arc<RwLock<HashMap<GroupId, AnalysisGroup>>>,
    scenes: Arc<RwLock<HashMap<SceneId, Scene>>>,
    runs: Arc<RwLock<HashMap<RunId, AnalysisRun>>>,
}

impl MemoryRunStore {
    /// Create a new in-memory run store
    pub fn new() -> Self {
        Self::default()
    }

    fn update_run<T>(&self, id: &RunId, f: impl FnOnce(&mut AnalysisRun) -> T) -> Result<T> {
        let mut runs = self.runs.write().unwrap();
        let run = runs.get_mut(id).ok_or_else(|| CitysimError::RunNotFound { id: id.to_string() })?;
        Ok(f(run))
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn store_group(&self, group: &AnalysisGroup) -> Result<()> {
        self.groups.write().unwrap().insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn get_group(&self, id: &GroupId) -> Result<Option<AnalysisGroup>> {
        Ok(self.groups.read().unwrap().get(id).cloned())
    }

    async fn store_scene(&self, scene: &Scene) -> Result<()> {
        self.scenes.write().unwrap().insert(scene.id.clone(), scene.clone());
        Ok(())
    }

    async fn get_scene(&self, id: &SceneId) -> Result<Option<Scene>> {
        Ok(self.scenes.read().unwrap().get(id).cloned())
    }

    async fn insert_run(&self, run: &AnalysisRun) -> Result<AnalysisRun> {
        let mut runs = self.runs.write().unwrap();
        Ok(runs.entry(run.id.clone()).or_insert_with(|| run.clone()).clone())
    }

    async fn get_run(&self, id: &RunId) -> Result<Option<AnalysisRun>> {
        Ok(self.runs.read().unwrap().get(id).cloned())
    }

    async fn list_runs(&self, project: &ProjectId) -> Result<Vec<AnalysisRun>> {
        let runs = self.runs.read().unwrap();
        let mut listed: Vec<AnalysisRun> =
            runs.values().filter(|r| &r.project_id == project).cloned().collect();
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(listed)
    }

    async fn list_runs_with_status(&self, statuses: &[RunStatus]) -> Result<Vec<AnalysisRun>> {
        let runs = self.runs.read().unwrap();
        Ok(runs.values().filter(|r| statuses.contains(&r.status)).cloned().collect())
    }

    async fn advance_checkpoint(
        &self,
        id: &RunId,
        checkpoint: &str,
        args: &CheckpointArgs,
    ) -> Result<CheckpointState> {
        self.update_run(id, |run| {
            if run.status == RunStatus::Running {
                run.checkpoint = checkpoint.to_string();
                run.checkpoint_args = args.clone();
            }
            run.checkpoint_state()
        })
    }

    async fn set_status(&self, id: &RunId, status: RunStatus) -> Result<()> {
        self.update_run(id, |run| run.status = status)
    }

    async fn set_progress(&self, id: &RunId, progress: u8) -> Result<()> {
        self.update_run(id, |run| run.progress = progress.min(100))
    }

    async fn set_message(&self, id: &RunId, message: &str) -> Result<()> {
        self.update_run(id, |run| run.message = Some(message.to_string()))
    }

    async fn complete_run(&self, id: &RunId, results: &[AnalysisResult]) -> Result<RunStatus> {
        self.update_run(id, |run| {
            if run.status == RunStatus::Running {
                run.results = results.to_vec();
                run.progress = 100;
                run.status = RunStatus::Completed;
            }
            run.status
        })
    }

    async fn delete_run(&self, id: &RunId) -> Result<bool> {
        Ok(self.runs.write().unwrap().remove(id).is_some())
    }
}

/// Everything the geometry store holds, mutated under one lock
#[derive(Debug, Clone, Default)]
struct GeometryState {
    zones: BTreeMap<ZoneId, Zone>,
    configurations: BTreeMap<ConfigurationId, ZoneConfiguration>,
    features: HashMap<FeatureId, GeoFeature>,
    next_zone_id: u64,
    next_configuration_id: u64,
    next_feature_id: u64,
}

impl GeometryState {
    /// Store features under fresh ids and collect them into a configuration
    fn load_configuration(
        &mut self,
        zone: ZoneId,
        name: &str,
        features: Vec<GeoFeature>,
    ) -> ZoneConfiguration {
        self.next_configuration_id += 1;
        let mut configuration = ZoneConfiguration {
            id: ConfigurationId(self.next_configuration_id),
            zone_id: zone,
            name: name.to_string(),
            ..Default::default()
        };

        for mut feature in features {
            if feature.category == FeatureCategory::Zone {
                tracing::warn!(zone_id = zone.0, "Ignoring zone outline among configuration features");
                continue;
            }
            self.next_feature_id += 1;
            feature.id = FeatureId(self.next_feature_id);
            configuration.assign(&feature);
            self.features.insert(feature.id, feature);
        }

        self.configurations.insert(configuration.id, configuration.clone());
        configuration
    }

    fn owned_configuration(
        &self,
        zone: ZoneId,
        config: ConfigurationId,
    ) -> Result<&ZoneConfiguration> {
        self.configurations.get(&config).filter(|c| c.zone_id == zone).ok_or(
            CitysimError::ZoneConfigurationNotFound { zone_id: zone.0, config_id: config.0 },
        )
    }
}

/// In-memory implementation of GeometryStore
#[derive(Debug, Clone, Default)]
pub struct MemoryGeometryStore {
    state: Arc<RwLock<GeometryState>>,
}

impl MemoryGeometryStore {
    /// Create a new in-memory geometry store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored features, across all configurations
    pub fn feature_count(&self) -> usize {
        self.state.read().unwrap().features.len()
    }
}

#[async_trait]
impl GeometryStore for MemoryGeometryStore {
    async fn create_zone(
        &self,
        name: &str,
        geometry: &Geometry,
        features: Vec<GeoFeature>,
    ) -> Result<Zone> {
        let mut state = self.state.write().unwrap();

        state.next_zone_id += 1;
        let zone_id = ZoneId(state.next_zone_id);
        let default = state.load_configuration(zone_id, "default", features);

        let zone = Zone {
            id: zone_id,
            name: name.to_string(),
            geometry: geometry.clone(),
            default_configuration: default.id,
            configuration_count: 1,
        };
        state.zones.insert(zone_id, zone.clone());

        tracing::info!(zone_id = zone_id.0, config_id = default.id.0, "Created zone");
        Ok(zone)
    }

    async fn get_zone(&self, id: ZoneId) -> Result<Option<Zone>> {
        Ok(self.state.read().unwrap().zones.get(&id).cloned())
    }

    async fn list_zones(&self) -> Result<Vec<Zone>> {
        Ok(self.state.read().unwrap().zones.values().cloned().collect())
    }

    async fn import_configuration(
        &self,
        zone: ZoneId,
        name: &str,
        features: Vec<GeoFeature>,
    ) -> Result<ZoneConfiguration> {
        let mut state = self.state.write().unwrap();
        if !state.zones.contains_key(&zone) {
            return Err(CitysimError::ZoneNotFound { zone_id: zone.0 });
        }

        let configuration = state.load_configuration(zone, name, features);
        if let Some(z) = state.zones.get_mut(&zone) {
            z.configuration_count += 1;
        }

        tracing::info!(zone_id = zone.0, config_id = configuration.id.0, "Imported zone configuration");
        Ok(configuration)
    }

    async fn get_configuration(
        &self,
        zone: ZoneId,
        config: ConfigurationId,
    ) -> Result<Option<ZoneConfiguration>> {
        let state = self.state.read().unwrap();
        Ok(state.owned_configuration(zone, config).ok().cloned())
    }

    async fn list_configurations(&self, zone: ZoneId) -> Result<Vec<ZoneConfiguration>> {
        let state = self.state.read().unwrap();
        if !state.zones.contains_key(&zone) {
            return Err(CitysimError::ZoneNotFound { zone_id: zone.0 });
        }

        Ok(state.configurations.values().filter(|c| c.zone_id == zone).cloned().collect())
    }

    async fn delete_configuration(&self, zone: ZoneId, config: ConfigurationId) -> Result<()> {
        let mut state = self.state.write().unwrap();

        // Validate everything before the first mutation
        let default = state
            .zones
            .get(&zone)
            .map(|z| z.default_configuration)
            .ok_or(CitysimError::ZoneNotFound { zone_id: zone.0 })?;
        if default == config {
            return Err(CitysimError::DefaultConfigurationRequired {
                zone_id: zone.0,
                config_id: config.0,
            });
        }
        let owned: Vec<FeatureId> = state.owned_configuration(zone, config)?.all_feature_ids().collect();

        for id in &owned {
            state.features.remove(id);
        }
        state.configurations.remove(&config);
        if let Some(z) = state.zones.get_mut(&zone) {
            z.configuration_count = z.configuration_count.saturating_sub(1);
        }

        tracing::info!(
            zone_id = zone.0,
            config_id = config.0,
            features = owned.len(),
            "Deleted zone configuration"
        );
        Ok(())
    }

    async fn get_features(&self, ids: &[FeatureId]) -> Result<Vec<GeoFeature>> {
        let state = self.state.read().unwrap();
        Ok(ids.iter().filter_map(|id| state.features.get(id).cloned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citysim_core::models::ZonesConfigurationMapping;

    fn group() -> AnalysisGroup {
        AnalysisGroup {
            id: GroupId::new("g1"),
            project_id: ProjectId::new("p1"),
            name: "Wind baseline".to_string(),
            analysis_type: "urban-wind".to_string(),
            area_of_interest: Geometry::rectangle(0.0, 0.0, 1.0, 1.0),
            parameters: serde_json::json!({}),
            created_at: chrono::Utc::now(),
        }
    }

    fn scene() -> Scene {
        Scene {
            id: SceneId::new("s1"),
            project_id: ProjectId::new("p1"),
            name: "Today".to_string(),
            zone_config_mapping: ZonesConfigurationMapping::new(),
            module_settings: serde_json::Value::Null,
        }
    }

    fn features() -> Vec<GeoFeature> {
        vec![
            GeoFeature::new(FeatureId(0), FeatureCategory::Building, Geometry::rectangle(0.0, 0.0, 1.0, 1.0)),
            GeoFeature::new(FeatureId(0), FeatureCategory::Landuse, Geometry::rectangle(0.0, 0.0, 5.0, 5.0)),
        ]
    }

    #[tokio::test]
    async fn test_insert_run_keeps_existing_record() {
        let store = MemoryRunStore::new();
        let run = AnalysisRun::new(&group(), &scene(), "alice");
        store.insert_run(&run).await.unwrap();
        store.set_status(&run.id, RunStatus::Running).await.unwrap();

        let again = store.insert_run(&AnalysisRun::new(&group(), &scene(), "bob")).await.unwrap();

        assert_eq!(again.creator, "alice");
        assert_eq!(again.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_advance_checkpoint_requires_running() {
        let store = MemoryRunStore::new();
        let run = store.insert_run(&AnalysisRun::new(&group(), &scene(), "alice")).await.unwrap();

        let mut args = CheckpointArgs::new();
        args.insert("job_id".to_string(), serde_json::json!("j-1"));

        // Still INITIALISED: nothing is written
        let state = store.advance_checkpoint(&run.id, "ready", &args).await.unwrap();
        assert_eq!(state.name, "initialised");
        assert!(state.args.is_empty());

        store.set_status(&run.id, RunStatus::Running).await.unwrap();
        let state = store.advance_checkpoint(&run.id, "ready", &args).await.unwrap();
        assert_eq!(state.name, "ready");
        assert_eq!(state.args["job_id"], "j-1");

        store.set_status(&run.id, RunStatus::Cancelled).await.unwrap();
        let state = store.advance_checkpoint(&run.id, "later", &CheckpointArgs::new()).await.unwrap();
        assert_eq!(state.name, "ready");
        assert_eq!(state.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_complete_run_does_not_override_cancellation() {
        let store = MemoryRunStore::new();
        let run = store.insert_run(&AnalysisRun::new(&group(), &scene(), "alice")).await.unwrap();
        store.set_status(&run.id, RunStatus::Cancelled).await.unwrap();

        let status = store.complete_run(&run.id, &[]).await.unwrap();
        assert_eq!(status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_unknown_run_is_reported() {
        let store = MemoryRunStore::new();
        let err = store.set_progress(&RunId::new("nope"), 10).await.unwrap_err();
        assert!(matches!(err, CitysimError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn test_zone_has_default_configuration() {
        let store = MemoryGeometryStore::new();
        let zone = store
            .create_zone("Centre", &Geometry::rectangle(0.0, 0.0, 10.0, 10.0), features())
            .await
            .unwrap();

        assert_eq!(zone.configuration_count, 1);
        let default = store.get_configuration(zone.id, zone.default_configuration).await.unwrap().unwrap();
        assert_eq!(default.building_ids.len(), 1);
        assert_eq!(default.landuse_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_configuration_cascades_and_decrements() {
        let store = MemoryGeometryStore::new();
        let zone = store
            .create_zone("Centre", &Geometry::rectangle(0.0, 0.0, 10.0, 10.0), features())
            .await
            .unwrap();
        let alt = store.import_configuration(zone.id, "densified", features()).await.unwrap();
        assert_eq!(store.get_zone(zone.id).await.unwrap().unwrap().configuration_count, 2);
        assert_eq!(store.feature_count(), 4);

        store.delete_configuration(zone.id, alt.id).await.unwrap();

        assert_eq!(store.get_zone(zone.id).await.unwrap().unwrap().configuration_count, 1);
        assert_eq!(store.feature_count(), 2);
        assert!(store.get_configuration(zone.id, alt.id).await.unwrap().is_none());
        let remaining: Vec<FeatureId> = alt.all_feature_ids().collect();
        assert!(store.get_features(&remaining).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_configuration_cannot_be_deleted() {
        let store = MemoryGeometryStore::new();
        let zone = store
            .create_zone("Centre", &Geometry::rectangle(0.0, 0.0, 10.0, 10.0), features())
            .await
            .unwrap();

        let err = store.delete_configuration(zone.id, zone.default_configuration).await.unwrap_err();

        assert!(matches!(err, CitysimError::DefaultConfigurationRequired { .. }));
        assert_eq!(store.get_zone(zone.id).await.unwrap().unwrap().configuration_count, 1);
        assert_eq!(store.feature_count(), 2);
    }

    #[tokio::test]
    async fn test_foreign_configuration_is_rejected() {
        let store = MemoryGeometryStore::new();
        let a = store.create_zone("A", &Geometry::rectangle(0.0, 0.0, 1.0, 1.0), vec![]).await.unwrap();
        let b = store.create_zone("B", &Geometry::rectangle(1.0, 0.0, 2.0, 1.0), vec![]).await.unwrap();
        let alt = store.import_configuration(b.id, "alt", features()).await.unwrap();

        let err = store.delete_configuration(a.id, alt.id).await.unwrap_err();

        assert!(matches!(err, CitysimError::ZoneConfigurationNotFound { .. }));
        assert_eq!(store.get_zone(b.id).await.unwrap().unwrap().configuration_count, 2);
    }
}
