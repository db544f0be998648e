use async_trait::async_trait;
use citysim_core::error::Result;
use citysim_core::models::AnalysisResult;

use crate::context::AnalysisContext;

/// An analysis type the engine can run
///
/// `perform_analysis` is re-entrant: it is called for fresh submissions and
/// for resumption alike, and must continue from the persisted checkpoint.
#[async_trait]
pub trait Analysis: Send + Sync {
    /// Tag stored on groups and runs of this analysis type
    fn type_name(&self) -> &'static str;

    /// Drive the run to completion
    ///
    /// Returns None when the run was cancelled before it finished.
    async fn perform_analysis(&self, ctx: &AnalysisContext) -> Result<Option<Vec<AnalysisResult>>>;
}
