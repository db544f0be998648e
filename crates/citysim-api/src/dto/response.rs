use chrono::{DateTime, Utc};
use citysim_core::config::ConfigSource;
use citysim_core::models::{AnalysisResult, AnalysisRun, RunStatus};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            service: "citysim-api",
        }
    }
}

/// Analysis run as exposed over HTTP
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub id: String,
    pub project_id: String,
    pub group_id: String,
    pub scene_id: String,
    pub analysis_type: String,
    pub creator: String,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
    pub progress: u8,
    pub checkpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub results: Vec<AnalysisResult>,
}

impl From<AnalysisRun> for RunResponse {
    fn from(run: AnalysisRun) -> Self {
        Self {
            id: run.id.0,
            project_id: run.project_id.0,
            group_id: run.group_id.0,
            scene_id: run.scene_id.0,
            analysis_type: run.analysis_type,
            creator: run.creator,
            created_at: run.created_at,
            status: run.status,
            progress: run.progress,
            checkpoint: run.checkpoint,
            message: run.message,
            results: run.results,
        }
    }
}

/// One engine configuration value and where it came from
#[derive(Debug, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub source: ConfigSource,
}

/// Delete operation response
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

impl DeleteResponse {
    pub fn success(entity: &str, id: &str) -> Self {
        Self {
            success: true,
            message: format!("{} '{}' deleted", entity, id),
        }
    }
}
