//! Analysis context: the only door from an analysis to storage, the compute
//! network, geometry and progress reporting.
//!
//! Every read-then-write of the run record holds the run's lock, which the
//! dispatcher's cancellation path shares.
//!
//! This module uses `.unwrap()` on `Mutex` operations. Lock poisoning only
//! occurs if a thread panics while holding the lock, which indicates a bug.

use citysim_core::error::{CitysimError, Result};
use citysim_core::models::{
    AnalysisGroup, AnalysisRun, CheckpointArgs, CheckpointState, FeatureCategory, Geometry, RunId,
    RunStatus, Scene,
};
use citysim_core::progress::ProgressTracker;
use citysim_store::ports::RunStore;
use geojson::FeatureCollection;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, OnceCell};

use crate::gateway::{DataObject, Job, JobGateway, JobMessage, Processor};
use crate::geometries::{FeatureQuery, GeometryService};
use crate::locks::RunLock;

/// Shared services every analysis context is built from
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn RunStore>,
    pub gateway: Arc<dyn JobGateway>,
    pub geometries: Arc<GeometryService>,
}

enum JobEvent {
    Progress(u8),
    Message(JobMessage),
}

pub struct AnalysisContext {
    run_id: RunId,
    analysis_type: String,
    group: AnalysisGroup,
    scene: Scene,
    services: Services,
    lock: RunLock,
    progress: Mutex<ProgressTracker>,
    /// Progress persisted before this context existed
    resumed_progress: u8,
    aoi_obj: OnceCell<String>,
    bld_footprint_obj: OnceCell<String>,
}

impl AnalysisContext {
    /// Build the context of an existing run record
    pub fn new(
        run: &AnalysisRun,
        group: AnalysisGroup,
        scene: Scene,
        services: Services,
        lock: RunLock,
    ) -> Self {
        Self {
            run_id: run.id.clone(),
            analysis_type: run.analysis_type.clone(),
            group,
            scene,
            services,
            lock,
            progress: Mutex::new(ProgressTracker::new()),
            resumed_progress: run.progress,
            aoi_obj: OnceCell::new(),
            bld_footprint_obj: OnceCell::new(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn analysis_type(&self) -> &str {
        &self.analysis_type
    }

    pub fn group(&self) -> &AnalysisGroup {
        &self.group
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Analysis-specific parameters of the group
    pub fn parameters(&self) -> &serde_json::Value {
        &self.group.parameters
    }

    pub fn gateway(&self) -> &Arc<dyn JobGateway> {
        &self.services.gateway
    }

    /// Current durable checkpoint, without mutation
    pub async fn checkpoint(&self) -> Result<CheckpointState> {
        let _guard = self.lock.lock().await;
        self.read_checkpoint().await
    }

    async fn read_checkpoint(&self) -> Result<CheckpointState> {
        self.services
            .store
            .get_run(&self.run_id)
            .await?
            .map(|run| run.checkpoint_state())
            .ok_or_else(|| CitysimError::RunNotFound {
                id: self.run_id.to_string(),
            })
    }

    /// Persist a new checkpoint and return the up-to-date state
    ///
    /// Nothing is written unless the run is RUNNING; the returned status tells
    /// the caller whether to go on.
    pub async fn update_checkpoint(
        &self,
        checkpoint: &str,
        args: CheckpointArgs,
    ) -> Result<CheckpointState> {
        let _guard = self.lock.lock().await;
        let state = self
            .services
            .store
            .advance_checkpoint(&self.run_id, checkpoint, &args)
            .await?;

        if state.status == RunStatus::Running {
            tracing::info!(run_id = %self.run_id, checkpoint, "Checkpoint advanced");
        } else {
            tracing::info!(
                run_id = %self.run_id,
                checkpoint = %state.name,
                status = %state.status,
                "Checkpoint not advanced"
            );
        }

        Ok(state)
    }

    /// Register a unit of work with its relative weight
    pub fn add_update_tracker(&self, tracker_id: &str, weight: u32) {
        self.progress.lock().unwrap().add_tracker(tracker_id, weight);
    }

    /// Report progress on a tracker and persist the new aggregate
    ///
    /// A resumed run starts with fresh trackers, so the persisted value never
    /// drops below what the run had reached before. Nothing is written once
    /// the run left RUNNING.
    pub async fn update_progress(&self, tracker_id: &str, value: u8) -> Result<u8> {
        let aggregate = self
            .progress
            .lock()
            .unwrap()
            .update(tracker_id, value)
            .ok_or_else(|| CitysimError::InvalidParameter {
                name: "tracker_id".to_string(),
                reason: format!("tracker '{}' is not registered", tracker_id),
            })?
            .max(self.resumed_progress);

        let _guard = self.lock.lock().await;
        if self.is_running().await? {
            self.services.store.set_progress(&self.run_id, aggregate).await?;
        }
        Ok(aggregate)
    }

    /// Overwrite the user-visible status message
    ///
    /// Once the run left RUNNING the slot holds its terminal reason and is
    /// left alone.
    pub async fn update_message(&self, message: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        if !self.is_running().await? {
            tracing::debug!(run_id = %self.run_id, message, "Dropping status message of stopped run");
            return Ok(());
        }

        tracing::debug!(run_id = %self.run_id, message, "Status message");
        self.services.store.set_message(&self.run_id, message).await
    }

    async fn is_running(&self) -> Result<bool> {
        Ok(self.read_checkpoint().await?.status == RunStatus::Running)
    }

    pub fn area_of_interest(&self) -> &Geometry {
        &self.group.area_of_interest
    }

    /// Object id of the uploaded area of interest, uploaded on first use
    pub async fn aoi_obj_id(&self) -> Result<String> {
        self.aoi_obj
            .get_or_try_init(|| async {
                let artifact = self.services.geometries.area_artifact(self.area_of_interest())?;
                let object = self
                    .services
                    .gateway
                    .upload_content(artifact.path(), "area-of-interest", "geojson", false)
                    .await?;
                tracing::info!(run_id = %self.run_id, obj_id = %object.obj_id, "Uploaded area of interest");
                Ok::<_, CitysimError>(object.obj_id)
            })
            .await
            .cloned()
    }

    /// Object id of the uploaded building footprints, uploaded on first use
    pub async fn bld_footprint_obj_id(&self) -> Result<String> {
        self.bld_footprint_obj
            .get_or_try_init(|| async {
                let query = self.scene_query(FeatureCategory::Building);
                let artifact = self.services.geometries.cached_collection(&query).await?;
                let object = self
                    .services
                    .gateway
                    .upload_content(artifact.path(), "building-footprints", "geojson", false)
                    .await?;
                tracing::info!(run_id = %self.run_id, obj_id = %object.obj_id, "Uploaded building footprints");
                Ok::<_, CitysimError>(object.obj_id)
            })
            .await
            .cloned()
    }

    /// Features of a category in the scene, filtered to the area of interest
    pub async fn geometries(&self, category: FeatureCategory) -> Result<Arc<FeatureCollection>> {
        self.services
            .geometries
            .feature_collection(&self.scene_query(category))
            .await
    }

    fn scene_query(&self, category: FeatureCategory) -> FeatureQuery {
        FeatureQuery::new(category, self.scene.zone_config_mapping.clone())
            .with_area(self.area_of_interest().clone())
    }

    pub async fn find_processor(&self, name: &str) -> Result<Arc<dyn Processor>> {
        self.services
            .gateway
            .find_processor_by_name(name)
            .await?
            .ok_or_else(|| CitysimError::ProcessorNotFound {
                name: name.to_string(),
            })
    }

    pub async fn find_job(&self, job_id: &str) -> Result<Arc<dyn Job>> {
        self.services
            .gateway
            .find_job(job_id)
            .await?
            .ok_or_else(|| CitysimError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    pub async fn find_data_object(&self, obj_id: &str) -> Result<DataObject> {
        self.services
            .gateway
            .find_data_object(obj_id)
            .await?
            .ok_or_else(|| CitysimError::DataObjectNotFound {
                obj_id: obj_id.to_string(),
            })
    }

    /// Block on a job, forwarding its progress into `tracker_id` and its
    /// messages into the status message
    pub async fn wait_for_job(
        &self,
        job: &dyn Job,
        tracker_id: &str,
    ) -> Result<BTreeMap<String, DataObject>> {
        let (sender, mut events) = mpsc::unbounded_channel();
        let progress_sender = sender.clone();
        let on_progress = move |progress: u8| {
            let _ = progress_sender.send(JobEvent::Progress(progress));
        };
        let on_message = move |message: JobMessage| {
            let _ = sender.send(JobEvent::Message(message));
        };

        tracing::info!(run_id = %self.run_id, job_id = job.id(), "Waiting for job");
        let wait = job.wait(&on_progress, &on_message);
        tokio::pin!(wait);

        let outputs = loop {
            tokio::select! {
                outcome = &mut wait => {
                    while let Ok(event) = events.try_recv() {
                        self.apply_job_event(tracker_id, event).await?;
                    }
                    break outcome?;
                }
                Some(event) = events.recv() => self.apply_job_event(tracker_id, event).await?,
            }
        };

        self.update_progress(tracker_id, 100).await?;
        tracing::info!(run_id = %self.run_id, job_id = job.id(), outputs = outputs.len(), "Job resolved");
        Ok(outputs)
    }

    async fn apply_job_event(&self, tracker_id: &str, event: JobEvent) -> Result<()> {
        match event {
            JobEvent::Progress(progress) => self.update_progress(tracker_id, progress).await.map(|_| ()),
            JobEvent::Message(message) => self.update_message(&message.text).await,
        }
    }
}
