pub mod analysis;
pub mod geometry;
pub mod result;
pub mod zone;

pub use analysis::{
    AnalysisGroup, AnalysisRun, CheckpointArgs, CheckpointState, GroupId, ProjectId, RunId,
    RunStatus, Scene, SceneId, INITIAL_CHECKPOINT,
};
pub use geometry::{BoundingBox, Geometry};
pub use result::{AnalysisResult, DataRef};
pub use zone::{
    AreaPolicy, ConfigurationId, FeatureCategory, FeatureId, GeoFeature, Zone, ZoneConfiguration,
    ZoneId, ZonesConfigurationMapping,
};
