//! Remote Job Gateway interface.
//!
//! Analyses never talk to the compute network directly. They find a named
//! processor, submit a job with its inputs and expected outputs, and block on
//! the job until it resolves to a set of data objects.

pub mod local;

use async_trait::async_trait;
use citysim_core::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub use local::{JobHandler, LocalJob, LocalJobGateway, LocalProcessor};

/// Inputs handed to a processor, keyed by input name
pub type JobInputs = serde_json::Map<String, serde_json::Value>;

/// Description of one output product a job is expected to produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSpec {
    pub data_type: String,
    pub data_format: String,
    #[serde(default)]
    pub access_restricted: bool,
}

impl ProductSpec {
    pub fn new(data_type: impl Into<String>, data_format: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            data_format: data_format.into(),
            access_restricted: false,
        }
    }
}

/// Handle to a data object stored on the compute network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
    pub obj_id: String,
    pub data_type: String,
    pub data_format: String,
    pub size: u64,
}

/// Status line emitted by a running job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub severity: String,
    pub text: String,
}

impl JobMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            severity: "info".to_string(),
            text: text.into(),
        }
    }
}

/// Receives the 0-100 progress of a job
pub type ProgressCallback<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// Receives the status messages of a job
pub type MessageCallback<'a> = &'a (dyn Fn(JobMessage) + Send + Sync);

/// Entry point to the compute network
#[async_trait]
pub trait JobGateway: Send + Sync {
    /// Find a processor by its registered name
    async fn find_processor_by_name(&self, name: &str) -> Result<Option<Arc<dyn Processor>>>;

    /// Find a previously submitted job
    async fn find_job(&self, job_id: &str) -> Result<Option<Arc<dyn Job>>>;

    /// Find a stored data object
    async fn find_data_object(&self, obj_id: &str) -> Result<Option<DataObject>>;

    /// Upload the file at `path` as a new data object
    async fn upload_content(
        &self,
        path: &Path,
        data_type: &str,
        data_format: &str,
        access_restricted: bool,
    ) -> Result<DataObject>;
}

/// A named computation that can be submitted as jobs
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a job; returns as soon as the job is accepted
    async fn submit(
        &self,
        inputs: JobInputs,
        outputs: BTreeMap<String, ProductSpec>,
        name: &str,
        description: &str,
    ) -> Result<Arc<dyn Job>>;
}

/// A submitted job
#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> &str;

    /// Block until the job resolves, forwarding progress and messages
    ///
    /// Resolves to the produced data objects keyed by output name. A failed
    /// job resolves to `CitysimError::JobFailed`.
    async fn wait(
        &self,
        on_progress: ProgressCallback<'_>,
        on_message: MessageCallback<'_>,
    ) -> Result<BTreeMap<String, DataObject>>;
}
