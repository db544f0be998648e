use citysim_core::models::{Geometry, ZonesConfigurationMapping};
use serde::Deserialize;

/// Create analysis group request body
#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    /// Generated when absent
    pub id: Option<String>,
    pub name: String,
    pub analysis_type: String,
    pub area_of_interest: Geometry,
    #[serde(default = "empty_object")]
    pub parameters: serde_json::Value,
}

/// Create scene request body
#[derive(Debug, Deserialize)]
pub struct CreateSceneRequest {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub zone_config_mapping: ZonesConfigurationMapping,
    #[serde(default = "empty_object")]
    pub module_settings: serde_json::Value,
}

/// Submit run request body
#[derive(Debug, Deserialize)]
pub struct SubmitRunRequest {
    pub group_id: String,
    pub scene_id: String,
    #[serde(default = "default_creator")]
    pub creator: String,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_creator() -> String {
    "anonymous".to_string()
}
