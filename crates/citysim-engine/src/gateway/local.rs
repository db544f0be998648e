//! In-process Remote Job Gateway
//!
//! Jobs of a [`LocalProcessor`] stay running until something drives them
//! through [`LocalJob::report_progress`], [`LocalJob::complete`] or
//! [`LocalJob::fail`], or until the processor's handler resolves them.
//!
//! This module uses `.unwrap()` on `RwLock` and `Mutex` operations. Lock
//! poisoning only occurs if a thread panics while holding the lock, which
//! indicates a bug.

use async_trait::async_trait;
use citysim_core::error::{CitysimError, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::watch;

use super::{
    DataObject, Job, JobGateway, JobInputs, JobMessage, MessageCallback, Processor,
    ProductSpec, ProgressCallback,
};

/// Produces the content of each output of a job from its inputs
pub type JobHandler =
    Arc<dyn Fn(&JobInputs) -> Result<BTreeMap<String, Vec<u8>>> + Send + Sync>;

struct StoredObject {
    object: DataObject,
    content: Vec<u8>,
}

#[derive(Default)]
struct GatewayState {
    jobs: RwLock<HashMap<String, Arc<LocalJob>>>,
    objects: RwLock<HashMap<String, StoredObject>>,
    next_id: AtomicU64,
}

impl GatewayState {
    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn store_object(&self, data_type: &str, data_format: &str, content: Vec<u8>) -> DataObject {
        let object = DataObject {
            obj_id: self.next_id("obj"),
            data_type: data_type.to_string(),
            data_format: data_format.to_string(),
            size: content.len() as u64,
        };
        self.objects.write().unwrap().insert(
            object.obj_id.clone(),
            StoredObject {
                object: object.clone(),
                content,
            },
        );
        object
    }
}

/// In-process gateway holding processors, jobs and data objects in memory
#[derive(Default)]
pub struct LocalJobGateway {
    state: Arc<GatewayState>,
    processors: RwLock<HashMap<String, Arc<LocalProcessor>>>,
}

impl LocalJobGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor whose jobs are driven externally
    pub fn register_processor(&self, name: &str) -> Arc<LocalProcessor> {
        self.insert_processor(name, None)
    }

    /// Register a processor whose jobs resolve through `handler`
    pub fn register_processor_with_handler(
        &self,
        name: &str,
        handler: JobHandler,
    ) -> Arc<LocalProcessor> {
        self.insert_processor(name, Some(handler))
    }

    fn insert_processor(&self, name: &str, handler: Option<JobHandler>) -> Arc<LocalProcessor> {
        let processor = Arc::new(LocalProcessor {
            name: name.to_string(),
            state: Arc::clone(&self.state),
            handler,
            jobs: Mutex::new(Vec::new()),
        });
        self.processors
            .write()
            .unwrap()
            .insert(name.to_string(), Arc::clone(&processor));
        processor
    }

    /// Concrete handle of a submitted job
    pub fn local_job(&self, job_id: &str) -> Option<Arc<LocalJob>> {
        self.state.jobs.read().unwrap().get(job_id).cloned()
    }

    /// Content of a stored data object
    pub fn content(&self, obj_id: &str) -> Option<Vec<u8>> {
        self.state
            .objects
            .read()
            .unwrap()
            .get(obj_id)
            .map(|stored| stored.content.clone())
    }

    /// Store raw content as a data object
    pub fn store_content(&self, data_type: &str, data_format: &str, content: Vec<u8>) -> DataObject {
        self.state.store_object(data_type, data_format, content)
    }
}

#[async_trait]
impl JobGateway for LocalJobGateway {
    async fn find_processor_by_name(&self, name: &str) -> Result<Option<Arc<dyn Processor>>> {
        Ok(self
            .processors
            .read()
            .unwrap()
            .get(name)
            .map(|p| Arc::clone(p) as Arc<dyn Processor>))
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<Arc<dyn Job>>> {
        Ok(self.local_job(job_id).map(|job| job as Arc<dyn Job>))
    }

    async fn find_data_object(&self, obj_id: &str) -> Result<Option<DataObject>> {
        Ok(self
            .state
            .objects
            .read()
            .unwrap()
            .get(obj_id)
            .map(|stored| stored.object.clone()))
    }

    async fn upload_content(
        &self,
        path: &Path,
        data_type: &str,
        data_format: &str,
        _access_restricted: bool,
    ) -> Result<DataObject> {
        let content = tokio::fs::read(path).await?;
        let object = self.state.store_object(data_type, data_format, content);
        tracing::debug!(obj_id = %object.obj_id, path = %path.display(), "Uploaded content");
        Ok(object)
    }
}

/// Processor registered on a [`LocalJobGateway`]
pub struct LocalProcessor {
    name: String,
    state: Arc<GatewayState>,
    handler: Option<JobHandler>,
    jobs: Mutex<Vec<Arc<LocalJob>>>,
}

impl LocalProcessor {
    /// Number of jobs submitted so far
    pub fn submissions(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Most recently submitted job
    pub fn latest_job(&self) -> Option<Arc<LocalJob>> {
        self.jobs.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Processor for LocalProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(
        &self,
        inputs: JobInputs,
        outputs: BTreeMap<String, ProductSpec>,
        name: &str,
        _description: &str,
    ) -> Result<Arc<dyn Job>> {
        let (sender, _) = watch::channel(JobState::Running {
            progress: 0,
            message: None,
        });
        let job = Arc::new(LocalJob {
            id: self.state.next_id("job"),
            name: name.to_string(),
            inputs,
            outputs,
            state: sender,
            gateway: Arc::downgrade(&self.state),
        });

        self.state
            .jobs
            .write()
            .unwrap()
            .insert(job.id.clone(), Arc::clone(&job));
        self.jobs.lock().unwrap().push(Arc::clone(&job));

        tracing::info!(processor = %self.name, job_id = %job.id, "Job submitted");

        if let Some(handler) = &self.handler {
            let handler = Arc::clone(handler);
            let job = Arc::clone(&job);
            tokio::spawn(async move {
                job.report_progress(50, JobMessage::info("Processing"));
                let outcome = handler(&job.inputs).and_then(|contents| job.complete(contents));
                if let Err(e) = outcome {
                    job.fail(e.to_string());
                }
            });
        }

        Ok(job)
    }
}

#[derive(Debug, Clone)]
enum JobState {
    Running {
        progress: u8,
        message: Option<JobMessage>,
    },
    Completed(BTreeMap<String, DataObject>),
    Failed(String),
}

/// Job submitted to a [`LocalProcessor`]
pub struct LocalJob {
    id: String,
    name: String,
    inputs: JobInputs,
    outputs: BTreeMap<String, ProductSpec>,
    state: watch::Sender<JobState>,
    gateway: Weak<GatewayState>,
}

impl LocalJob {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &JobInputs {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<String, ProductSpec> {
        &self.outputs
    }

    /// Publish progress and a status message of a running job
    pub fn report_progress(&self, progress: u8, message: JobMessage) {
        self.state.send_modify(|state| {
            if let JobState::Running {
                progress: current,
                message: latest,
            } = state
            {
                *current = progress.min(100);
                *latest = Some(message);
            }
        });
    }

    /// Resolve the job, storing one data object per declared output
    ///
    /// Every declared output must be present in `contents`.
    pub fn complete(&self, mut contents: BTreeMap<String, Vec<u8>>) -> Result<()> {
        let gateway = self.gateway.upgrade().ok_or_else(|| CitysimError::JobFailed {
            job_id: self.id.clone(),
            reason: "gateway is gone".to_string(),
        })?;

        let mut produced = BTreeMap::new();
        for (output, spec) in &self.outputs {
            let content = contents.remove(output).ok_or_else(|| CitysimError::JobFailed {
                job_id: self.id.clone(),
                reason: format!("output '{}' was not produced", output),
            })?;
            let object = gateway.store_object(&spec.data_type, &spec.data_format, content);
            produced.insert(output.clone(), object);
        }

        tracing::info!(job_id = %self.id, outputs = produced.len(), "Job completed");
        self.state.send_replace(JobState::Completed(produced));
        Ok(())
    }

    /// Resolve the job as failed
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(job_id = %self.id, reason = %reason, "Job failed");
        self.state.send_replace(JobState::Failed(reason));
    }
}

#[async_trait]
impl Job for LocalJob {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait(
        &self,
        on_progress: ProgressCallback<'_>,
        on_message: MessageCallback<'_>,
    ) -> Result<BTreeMap<String, DataObject>> {
        let mut receiver = self.state.subscribe();
        let mut last_message: Option<JobMessage> = None;

        loop {
            let state = receiver.borrow_and_update().clone();
            match state {
                JobState::Running { progress, message } => {
                    on_progress(progress);
                    if let Some(message) = message {
                        if last_message.as_ref() != Some(&message) {
                            on_message(message.clone());
                            last_message = Some(message);
                        }
                    }
                }
                JobState::Completed(outputs) => return Ok(outputs),
                JobState::Failed(reason) => {
                    return Err(CitysimError::JobFailed {
                        job_id: self.id.clone(),
                        reason,
                    })
                }
            }

            if receiver.changed().await.is_err() {
                return Err(CitysimError::JobFailed {
                    job_id: self.id.clone(),
                    reason: "job was abandoned".to_string(),
                });
            }
        }
    }
}
