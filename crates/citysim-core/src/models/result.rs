use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to stored result content on the remote network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataRef {
    /// A single data object id
    Single(String),
    /// Named parts, each referencing its own data object
    Composite(BTreeMap<String, String>),
}

impl DataRef {
    /// All referenced object ids keyed by part name
    ///
    /// A single reference is exposed under the part name `"default"`.
    pub fn parts(&self) -> BTreeMap<String, String> {
        match self {
            DataRef::Single(obj_id) => BTreeMap::from([("default".to_string(), obj_id.clone())]),
            DataRef::Composite(parts) => parts.clone(),
        }
    }
}

/// Output descriptor of a completed analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub name: String,
    pub label: String,
    pub obj_id: DataRef,
    /// Parameter/description specification of the result
    pub specification: serde_json::Value,
    pub export_format: String,
    /// Out-of-band data needed during extraction
    #[serde(default)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl AnalysisResult {
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        obj_id: DataRef,
        export_format: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            obj_id,
            specification: serde_json::Value::Null,
            export_format: export_format.into(),
            extras: serde_json::Map::new(),
        }
    }

    pub fn with_specification(mut self, specification: serde_json::Value) -> Self {
        self.specification = specification;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }
}
