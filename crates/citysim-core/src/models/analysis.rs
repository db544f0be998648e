use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::geometry::Geometry;
use super::result::AnalysisResult;
use super::zone::ZonesConfigurationMapping;

/// Checkpoint every run starts from
pub const INITIAL_CHECKPOINT: &str = "initialised";

/// Arguments persisted alongside a checkpoint name
pub type CheckpointArgs = serde_json::Map<String, serde_json::Value>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random identifier
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of the project owning groups, scenes and runs
    ProjectId
);
string_id!(
    /// Identifier of an analysis parameter group
    GroupId
);
string_id!(
    /// Identifier of a scene snapshot
    SceneId
);
string_id!(
    /// Identifier of an analysis run, derived from its group and scene
    RunId
);

impl RunId {
    /// Derive the run identifier for a (group, scene) pair
    ///
    /// Re-submitting the same group against the same scene always addresses
    /// the same run record, which is what makes resumption possible.
    pub fn derive(group: &GroupId, scene: &SceneId) -> Self {
        Self(format!("{}:{}", group.0, scene.0))
    }
}

/// Lifecycle status of an analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Initialised,
    Running,
    Cancelled,
    Failed,
    Completed,
}

impl RunStatus {
    /// Whether the status can no longer change without a resubmission
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Cancelled | RunStatus::Failed | RunStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Initialised => "INITIALISED",
            RunStatus::Running => "RUNNING",
            RunStatus::Cancelled => "CANCELLED",
            RunStatus::Failed => "FAILED",
            RunStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIALISED" => Some(RunStatus::Initialised),
            "RUNNING" => Some(RunStatus::Running),
            "CANCELLED" => Some(RunStatus::Cancelled),
            "FAILED" => Some(RunStatus::Failed),
            "COMPLETED" => Some(RunStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable resumption state of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub name: String,
    pub args: CheckpointArgs,
    pub status: RunStatus,
}

/// Persistent record of one analysis execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: RunId,
    pub project_id: ProjectId,
    pub group_id: GroupId,
    pub scene_id: SceneId,
    pub analysis_type: String,
    pub creator: String,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Weighted aggregate progress, 0 to 100
    pub progress: u8,
    pub checkpoint: String,
    pub checkpoint_args: CheckpointArgs,
    pub results: Vec<AnalysisResult>,
    pub message: Option<String>,
}

impl AnalysisRun {
    /// Create a fresh run record positioned at the initial checkpoint
    pub fn new(group: &AnalysisGroup, scene: &Scene, creator: impl Into<String>) -> Self {
        Self {
            id: RunId::derive(&group.id, &scene.id),
            project_id: group.project_id.clone(),
            group_id: group.id.clone(),
            scene_id: scene.id.clone(),
            analysis_type: group.analysis_type.clone(),
            creator: creator.into(),
            created_at: Utc::now(),
            status: RunStatus::Initialised,
            progress: 0,
            checkpoint: INITIAL_CHECKPOINT.to_string(),
            checkpoint_args: CheckpointArgs::new(),
            results: Vec::new(),
            message: None,
        }
    }

    pub fn checkpoint_state(&self) -> CheckpointState {
        CheckpointState {
            name: self.checkpoint.clone(),
            args: self.checkpoint_args.clone(),
            status: self.status,
        }
    }
}

/// A named parameter configuration for one analysis type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisGroup {
    pub id: GroupId,
    pub project_id: ProjectId,
    pub name: String,
    pub analysis_type: String,
    /// Area the analysis is evaluated over
    pub area_of_interest: Geometry,
    /// Analysis-specific parameters
    pub parameters: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of which zone configuration is active per zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub project_id: ProjectId,
    pub name: String,
    pub zone_config_mapping: ZonesConfigurationMapping,
    /// Build-module settings attached to the scene
    #[serde(default)]
    pub module_settings: serde_json::Value,
}
