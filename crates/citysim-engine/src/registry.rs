use citysim_core::error::{CitysimError, Result};
use std::collections::HashMap;
use std::sync::Arc;

use crate::analyses::urban_wind::UrbanWind;
use crate::analysis::Analysis;

/// Analysis implementations keyed by type tag
#[derive(Default)]
pub struct AnalysisRegistry {
    analyses: HashMap<&'static str, Arc<dyn Analysis>>,
}

impl AnalysisRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in analysis
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(UrbanWind::new()));
        registry
    }

    /// Register an analysis under its own type name, replacing any previous one
    pub fn register(&mut self, analysis: Arc<dyn Analysis>) {
        self.analyses.insert(analysis.type_name(), analysis);
    }

    pub fn get(&self, analysis_type: &str) -> Result<Arc<dyn Analysis>> {
        self.analyses
            .get(analysis_type)
            .cloned()
            .ok_or_else(|| CitysimError::UnknownAnalysisType {
                name: analysis_type.to_string(),
            })
    }

    /// Registered type names, sorted
    pub fn types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.analyses.keys().copied().collect();
        types.sort_unstable();
        types
    }
}
