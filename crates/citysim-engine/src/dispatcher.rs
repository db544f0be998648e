//! Run dispatcher and bounded worker pool.
//!
//! Each run executes as its own Tokio task. A semaphore bounds how many run
//! concurrently; a run waiting for a permit is already RUNNING as far as the
//! record is concerned. Failures of a run end up in its status and message,
//! never in the caller of `submit`.

use citysim_core::error::{CitysimError, Result};
use citysim_core::models::{
    AnalysisResult, AnalysisRun, GroupId, ProjectId, RunId, RunStatus, SceneId,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::AbortHandle;

use crate::context::{AnalysisContext, Services};
use crate::locks::RunLocks;
use crate::registry::AnalysisRegistry;

#[derive(Clone)]
struct Worker {
    /// Distinguishes workers of successive records with the same run id
    generation: u64,
    done: Shared<BoxFuture<'static, ()>>,
    handle: AbortHandle,
}

impl Worker {
    fn spawn(inner: Arc<Inner>, run_id: RunId) -> Self {
        let generation = inner.generations.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(Dispatcher::execute(inner, run_id, generation));
        Self {
            generation,
            handle: task.abort_handle(),
            done: task.map(|_| ()).boxed().shared(),
        }
    }

    /// Abort the task and wait until it is gone
    async fn retire(self) {
        self.handle.abort();
        self.done.await;
    }

    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

struct Inner {
    registry: AnalysisRegistry,
    services: Services,
    locks: RunLocks,
    permits: Arc<Semaphore>,
    active: Mutex<HashMap<RunId, Worker>>,
    generations: AtomicU64,
}

/// Starts, resumes, cancels and deletes analysis runs
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(registry: AnalysisRegistry, services: Services, max_concurrent_runs: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                services,
                locks: RunLocks::new(),
                permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
                active: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    pub fn registry(&self) -> &AnalysisRegistry {
        &self.inner.registry
    }

    /// Create or resume the run of a group against a scene
    ///
    /// The run id is derived from the pair, so submitting again addresses the
    /// same record: a completed run is returned as it is, an executing run is
    /// left alone, anything else continues from its persisted checkpoint.
    pub async fn submit(
        &self,
        group_id: &GroupId,
        scene_id: &SceneId,
        creator: &str,
    ) -> Result<AnalysisRun> {
        let store = &self.inner.services.store;

        let group = store
            .get_group(group_id)
            .await?
            .ok_or_else(|| CitysimError::GroupNotFound {
                id: group_id.to_string(),
            })?;
        let scene = store
            .get_scene(scene_id)
            .await?
            .ok_or_else(|| CitysimError::SceneNotFound {
                id: scene_id.to_string(),
            })?;

        if group.project_id != scene.project_id {
            return Err(CitysimError::InvalidParameter {
                name: "scene_id".to_string(),
                reason: format!(
                    "scene {} belongs to project {}, not {}",
                    scene.id, scene.project_id, group.project_id
                ),
            });
        }
        self.inner.registry.get(&group.analysis_type)?;

        let run = store
            .insert_run(&AnalysisRun::new(&group, &scene, creator))
            .await?;
        self.start(run).await
    }

    /// Restart every INITIALISED or RUNNING run, after a process restart
    pub async fn resume_pending(&self) -> Result<Vec<RunId>> {
        let pending = self
            .inner
            .services
            .store
            .list_runs_with_status(&[RunStatus::Initialised, RunStatus::Running])
            .await?;

        let mut resumed = Vec::with_capacity(pending.len());
        for run in pending {
            if let Err(e) = self.inner.registry.get(&run.analysis_type) {
                tracing::warn!(run_id = %run.id, error = %e, "Skipping pending run");
                continue;
            }

            let run_id = run.id.clone();
            match self.start(run).await {
                Ok(_) => resumed.push(run_id),
                Err(e) => tracing::warn!(run_id = %run_id, error = %e, "Failed to resume run"),
            }
        }

        tracing::info!(count = resumed.len(), "Resumed pending runs");
        Ok(resumed)
    }

    async fn start(&self, run: AnalysisRun) -> Result<AnalysisRun> {
        let mut active = self.inner.active.lock().await;

        if active.get(&run.id).is_some_and(Worker::is_running) {
            tracing::debug!(run_id = %run.id, "Run is already executing");
            return Ok(run);
        }
        if run.status == RunStatus::Completed {
            tracing::info!(run_id = %run.id, "Run already completed");
            return Ok(run);
        }

        {
            let lock = self.inner.locks.get(&run.id);
            let _guard = lock.lock().await;
            self.inner
                .services
                .store
                .set_status(&run.id, RunStatus::Running)
                .await?;
        }

        let worker = Worker::spawn(Arc::clone(&self.inner), run.id.clone());
        active.insert(run.id.clone(), worker);
        drop(active);

        tracing::info!(
            run_id = %run.id,
            analysis_type = %run.analysis_type,
            checkpoint = %run.checkpoint,
            "Run submitted"
        );
        self.status(&run.id).await
    }

    async fn execute(inner: Arc<Inner>, run_id: RunId, generation: u64) {
        let permit = Arc::clone(&inner.permits).acquire_owned().await;
        if permit.is_ok() {
            let outcome = Self::run_analysis(&inner, &run_id).await;
            Self::finish(&inner, &run_id, outcome).await;
        } else {
            tracing::error!(run_id = %run_id, "Worker pool is closed");
        }

        let mut active = inner.active.lock().await;
        if active.get(&run_id).is_some_and(|w| w.generation == generation) {
            active.remove(&run_id);
        }
    }

    async fn run_analysis(inner: &Inner, run_id: &RunId) -> Result<Option<Vec<AnalysisResult>>> {
        let store = &inner.services.store;

        let run = store
            .get_run(run_id)
            .await?
            .ok_or_else(|| CitysimError::RunNotFound {
                id: run_id.to_string(),
            })?;
        let group = store
            .get_group(&run.group_id)
            .await?
            .ok_or_else(|| CitysimError::GroupNotFound {
                id: run.group_id.to_string(),
            })?;
        let scene = store
            .get_scene(&run.scene_id)
            .await?
            .ok_or_else(|| CitysimError::SceneNotFound {
                id: run.scene_id.to_string(),
            })?;
        let analysis = inner.registry.get(&run.analysis_type)?;

        tracing::info!(
            run_id = %run_id,
            analysis_type = %run.analysis_type,
            checkpoint = %run.checkpoint,
            "Run started"
        );

        let ctx = AnalysisContext::new(
            &run,
            group,
            scene,
            inner.services.clone(),
            inner.locks.get(run_id),
        );
        analysis.perform_analysis(&ctx).await
    }

    async fn finish(inner: &Inner, run_id: &RunId, outcome: Result<Option<Vec<AnalysisResult>>>) {
        let store = &inner.services.store;

        match outcome {
            Ok(Some(results)) => {
                let lock = inner.locks.get(run_id);
                let _guard = lock.lock().await;
                match store.complete_run(run_id, &results).await {
                    Ok(RunStatus::Completed) => {
                        tracing::info!(run_id = %run_id, results = results.len(), "Run completed")
                    }
                    Ok(status) => {
                        tracing::info!(run_id = %run_id, status = %status, "Run ended before completing")
                    }
                    Err(e) => tracing::error!(run_id = %run_id, error = %e, "Failed to store run results"),
                }
            }
            Ok(None) => tracing::info!(run_id = %run_id, "Run stopped after cancellation"),
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "Run failed");
                if let Err(store_err) = Self::mark_failed(inner, run_id, &e.to_string()).await {
                    tracing::warn!(run_id = %run_id, error = %store_err, "Failed to record run failure");
                }
            }
        }
    }

    /// Mark a run FAILED with `reason`, unless it already left RUNNING
    async fn mark_failed(inner: &Inner, run_id: &RunId, reason: &str) -> Result<()> {
        let store = &inner.services.store;
        let lock = inner.locks.get(run_id);
        let _guard = lock.lock().await;

        match store.get_run(run_id).await? {
            Some(run) if run.status == RunStatus::Running => {
                store.set_status(run_id, RunStatus::Failed).await?;
                store.set_message(run_id, reason).await
            }
            _ => Ok(()),
        }
    }

    /// Mark a run CANCELLED; it stops at its next checkpoint
    ///
    /// Runs that already finished are returned unchanged.
    pub async fn cancel(&self, run_id: &RunId) -> Result<AnalysisRun> {
        {
            let lock = self.inner.locks.get(run_id);
            let _guard = lock.lock().await;
            let run = self.status(run_id).await?;
            self.cancel_locked(&run).await?;
        }
        self.status(run_id).await
    }

    async fn cancel_locked(&self, run: &AnalysisRun) -> Result<()> {
        if !matches!(run.status, RunStatus::Initialised | RunStatus::Running) {
            return Ok(());
        }

        let store = &self.inner.services.store;
        store.set_status(&run.id, RunStatus::Cancelled).await?;
        store.set_message(&run.id, "Cancelled by user").await?;
        tracing::info!(run_id = %run.id, checkpoint = %run.checkpoint, "Run cancelled");
        Ok(())
    }

    /// Stop the worker of a run and discard its record
    ///
    /// Submissions wait until the record is gone, so a resubmission always
    /// starts a fresh worker on a fresh record.
    pub async fn delete(&self, run_id: &RunId) -> Result<()> {
        let mut active = self.inner.active.lock().await;
        self.status(run_id).await?;

        if let Some(worker) = active.remove(run_id) {
            worker.retire().await;
        }
        {
            let lock = self.inner.locks.get(run_id);
            let _guard = lock.lock().await;
            let run = self.status(run_id).await?;
            self.cancel_locked(&run).await?;
            self.inner.services.store.delete_run(run_id).await?;
        }
        self.inner.locks.remove(run_id);
        drop(active);

        tracing::info!(run_id = %run_id, "Run deleted");
        Ok(())
    }

    pub async fn status(&self, run_id: &RunId) -> Result<AnalysisRun> {
        self.inner
            .services
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| CitysimError::RunNotFound {
                id: run_id.to_string(),
            })
    }

    pub async fn list_runs(&self, project: &ProjectId) -> Result<Vec<AnalysisRun>> {
        self.inner.services.store.list_runs(project).await
    }

    /// Whether a worker is currently executing the run
    pub async fn is_active(&self, run_id: &RunId) -> bool {
        self.inner
            .active
            .lock()
            .await
            .get(run_id)
            .is_some_and(Worker::is_running)
    }

    /// Wait for the worker of a run to finish, if one is executing
    pub async fn join(&self, run_id: &RunId) {
        let worker = self.inner.active.lock().await.get(run_id).cloned();
        if let Some(worker) = worker {
            worker.done.await;
        }
    }
}
