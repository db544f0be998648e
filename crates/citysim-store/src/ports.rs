use async_trait::async_trait;
use citysim_core::error::Result;
use citysim_core::models::{
    AnalysisGroup, AnalysisResult, AnalysisRun, CheckpointArgs, CheckpointState, ConfigurationId,
    FeatureId, GeoFeature, Geometry, GroupId, ProjectId, RunId, RunStatus, Scene, SceneId, Zone,
    ZoneConfiguration, ZoneId,
};

/// Port for durable analysis run records
///
/// Mutating operations on a run that does not exist fail with
/// `CitysimError::RunNotFound`.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Store a new analysis group
    async fn store_group(&self, group: &AnalysisGroup) -> Result<()>;

    /// Retrieve an analysis group by ID
    async fn get_group(&self, id: &GroupId) -> Result<Option<AnalysisGroup>>;

    /// Store a new scene
    async fn store_scene(&self, scene: &Scene) -> Result<()>;

    /// Retrieve a scene by ID
    async fn get_scene(&self, id: &SceneId) -> Result<Option<Scene>>;

    /// Insert a run record unless one with the same ID exists
    ///
    /// Returns the persisted record, which is the pre-existing one when the
    /// run was already known.
    async fn insert_run(&self, run: &AnalysisRun) -> Result<AnalysisRun>;

    /// Retrieve a run by ID
    async fn get_run(&self, id: &RunId) -> Result<Option<AnalysisRun>>;

    /// List the runs of a project, oldest first
    async fn list_runs(&self, project: &ProjectId) -> Result<Vec<AnalysisRun>>;

    /// List every run whose status is one of `statuses`
    async fn list_runs_with_status(&self, statuses: &[RunStatus]) -> Result<Vec<AnalysisRun>>;

    /// Persist a new checkpoint, but only while the run is RUNNING
    ///
    /// Returns the checkpoint state as persisted after the call. Writing the
    /// same name and args twice leaves the record unchanged.
    async fn advance_checkpoint(
        &self,
        id: &RunId,
        checkpoint: &str,
        args: &CheckpointArgs,
    ) -> Result<CheckpointState>;

    /// Overwrite the status of a run
    async fn set_status(&self, id: &RunId, status: RunStatus) -> Result<()>;

    /// Overwrite the aggregate progress of a run
    async fn set_progress(&self, id: &RunId, progress: u8) -> Result<()>;

    /// Overwrite the latest status message of a run
    async fn set_message(&self, id: &RunId, message: &str) -> Result<()>;

    /// Attach results and mark the run COMPLETED, if it is still RUNNING
    ///
    /// Returns the status of the run after the call.
    async fn complete_run(&self, id: &RunId, results: &[AnalysisResult]) -> Result<RunStatus>;

    /// Delete a run record, returning whether it existed
    async fn delete_run(&self, id: &RunId) -> Result<bool>;
}

/// Port for zones, their alternative configurations and the features they own
#[async_trait]
pub trait GeometryStore: Send + Sync {
    /// Create a zone together with its default configuration
    ///
    /// Feature ids of `features` are ignored; the store assigns fresh ones.
    async fn create_zone(
        &self,
        name: &str,
        geometry: &Geometry,
        features: Vec<GeoFeature>,
    ) -> Result<Zone>;

    /// Retrieve a zone by ID
    async fn get_zone(&self, id: ZoneId) -> Result<Option<Zone>>;

    /// List all zones
    async fn list_zones(&self) -> Result<Vec<Zone>>;

    /// Bulk-load an alternative configuration for a zone
    async fn import_configuration(
        &self,
        zone: ZoneId,
        name: &str,
        features: Vec<GeoFeature>,
    ) -> Result<ZoneConfiguration>;

    /// Retrieve a configuration owned by a zone
    async fn get_configuration(
        &self,
        zone: ZoneId,
        config: ConfigurationId,
    ) -> Result<Option<ZoneConfiguration>>;

    /// List the configurations owned by a zone
    async fn list_configurations(&self, zone: ZoneId) -> Result<Vec<ZoneConfiguration>>;

    /// Delete a configuration, its features and decrement the zone's count
    ///
    /// Either all three happen or none does. The default configuration of a
    /// zone cannot be deleted.
    async fn delete_configuration(&self, zone: ZoneId, config: ConfigurationId) -> Result<()>;

    /// Retrieve features by IDs, skipping unknown ones
    async fn get_features(&self, ids: &[FeatureId]) -> Result<Vec<GeoFeature>>;
}
