//! Error types for CitySim

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CitysimError {
    // Run bookkeeping errors
    #[error("Analysis run not found: {id}")]
    RunNotFound { id: String },

    #[error("Analysis group not found: {id}")]
    GroupNotFound { id: String },

    #[error("Scene not found: {id}")]
    SceneNotFound { id: String },

    #[error("Unknown analysis type: {name}")]
    UnknownAnalysisType { name: String },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    // Checkpoint consistency errors
    #[error("Checkpoint '{checkpoint}' of run {run_id} is not part of analysis '{analysis_type}'")]
    CheckpointDiverged {
        run_id: String,
        analysis_type: String,
        checkpoint: String,
    },

    #[error("Run {run_id} reached checkpoint '{checkpoint}' with unexpected status {status}")]
    InvalidRunState {
        run_id: String,
        checkpoint: String,
        status: String,
    },

    // Geometry errors
    #[error("Unknown geometry type: {name}")]
    UnknownGeometryType { name: String },

    #[error("Zone not found: {zone_id}")]
    ZoneNotFound { zone_id: u64 },

    #[error("Zone configuration {config_id} does not exist for zone {zone_id}")]
    ZoneConfigurationNotFound { zone_id: u64, config_id: u64 },

    #[error("Zone configuration {config_id} is the default configuration of zone {zone_id}")]
    DefaultConfigurationRequired { zone_id: u64, config_id: u64 },

    // Remote compute errors
    #[error("Processor not found: {name}")]
    ProcessorNotFound { name: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("Data object not found: {obj_id}")]
    DataObjectNotFound { obj_id: String },

    // Result extraction errors
    #[error("Result names do not match: '{left}' vs '{right}'")]
    ResultNameMismatch { left: String, right: String },

    #[error("Export format '{format}' is not supported for result '{result}'")]
    UnsupportedFormat { result: String, format: String },

    #[error("Operation '{operation}' is not supported for '{target}'")]
    UnsupportedOperation { target: String, operation: String },

    #[error("Result content is invalid at {path}: {reason}")]
    InvalidResultContent { path: PathBuf, reason: String },

    // Configuration errors
    #[error("Missing required configuration: {key}")]
    ConfigMissing { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    ConfigInvalid { key: String, reason: String },

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CitysimError {
    /// Whether the error denotes a missing external or persisted resource
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CitysimError::RunNotFound { .. }
                | CitysimError::GroupNotFound { .. }
                | CitysimError::SceneNotFound { .. }
                | CitysimError::ZoneNotFound { .. }
                | CitysimError::ZoneConfigurationNotFound { .. }
                | CitysimError::ProcessorNotFound { .. }
                | CitysimError::JobNotFound { .. }
                | CitysimError::DataObjectNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for CitysimError {
    fn from(err: serde_json::Error) -> Self {
        CitysimError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CitysimError>;
