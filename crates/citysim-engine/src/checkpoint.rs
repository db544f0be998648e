//! Checkpoint state machine.
//!
//! An analysis is a table from checkpoint name to handler. The driver reads
//! the persisted checkpoint, runs its handler, persists whatever checkpoint
//! the handler asks for and repeats while the run stays RUNNING. Re-entering
//! the driver after a crash resumes at the persisted checkpoint.

use citysim_core::error::{CitysimError, Result};
use citysim_core::models::{AnalysisResult, CheckpointArgs, RunStatus};
use futures::future::BoxFuture;

use crate::context::AnalysisContext;

/// Outcome of one checkpoint handler
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Persist this checkpoint and continue from it
    Advance {
        checkpoint: &'static str,
        args: CheckpointArgs,
    },
    /// The analysis finished with these results
    Done(Vec<AnalysisResult>),
}

impl Step {
    pub fn advance(checkpoint: &'static str, args: CheckpointArgs) -> Self {
        Step::Advance { checkpoint, args }
    }
}

/// Handler of one checkpoint: the analysis, its context and the persisted args
pub type CheckpointHandler<A> =
    for<'a> fn(&'a A, &'a AnalysisContext, CheckpointArgs) -> BoxFuture<'a, Result<Step>>;

pub struct CheckpointMachine<A> {
    analysis_type: &'static str,
    handlers: Vec<(&'static str, CheckpointHandler<A>)>,
}

impl<A> CheckpointMachine<A> {
    pub fn new(analysis_type: &'static str) -> Self {
        Self {
            analysis_type,
            handlers: Vec::new(),
        }
    }

    /// Append a checkpoint and its handler
    pub fn step(mut self, checkpoint: &'static str, handler: CheckpointHandler<A>) -> Self {
        self.handlers.push((checkpoint, handler));
        self
    }

    /// Checkpoint names in declaration order
    pub fn checkpoints(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.iter().map(|(name, _)| *name)
    }

    fn handler(&self, checkpoint: &str) -> Option<CheckpointHandler<A>> {
        self.handlers
            .iter()
            .find(|(name, _)| *name == checkpoint)
            .map(|(_, handler)| *handler)
    }

    /// Run handlers from the persisted checkpoint until the analysis finishes
    /// or the run stops being RUNNING
    ///
    /// Returns None when the run was cancelled. Any other non-running status,
    /// or a checkpoint name this machine does not know, is an error.
    pub async fn drive(
        &self,
        analysis: &A,
        ctx: &AnalysisContext,
    ) -> Result<Option<Vec<AnalysisResult>>> {
        let mut state = ctx.checkpoint().await?;

        loop {
            match state.status {
                RunStatus::Running => {}
                RunStatus::Cancelled => {
                    tracing::info!(
                        run_id = %ctx.run_id(),
                        checkpoint = %state.name,
                        "Run cancelled, stopping at checkpoint"
                    );
                    return Ok(None);
                }
                status => {
                    return Err(CitysimError::InvalidRunState {
                        run_id: ctx.run_id().to_string(),
                        checkpoint: state.name,
                        status: status.to_string(),
                    })
                }
            }

            let handler = self.handler(&state.name).ok_or_else(|| CitysimError::CheckpointDiverged {
                run_id: ctx.run_id().to_string(),
                analysis_type: self.analysis_type.to_string(),
                checkpoint: state.name.clone(),
            })?;

            tracing::debug!(run_id = %ctx.run_id(), checkpoint = %state.name, "Entering checkpoint");
            match handler(analysis, ctx, state.args).await? {
                Step::Advance { checkpoint, args } => {
                    state = ctx.update_checkpoint(checkpoint, args).await?;
                }
                Step::Done(results) => return Ok(Some(results)),
            }
        }
    }
}
