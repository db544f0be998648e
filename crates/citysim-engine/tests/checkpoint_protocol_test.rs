//! Integration tests for the checkpoint protocol of the analysis context

mod common;

use citysim_core::error::CitysimError;
use citysim_core::models::{CheckpointArgs, CheckpointState, RunStatus};
use citysim_engine::analyses::urban_wind::{UrbanWind, WAITING_FOR_SIMULATION};
use citysim_engine::Analysis;
use citysim_store::ports::RunStore;
use common::Harness;
use serde_json::json;

fn job_args() -> CheckpointArgs {
    let mut args = CheckpointArgs::new();
    args.insert("domain_obj_id".to_string(), json!("obj-3"));
    args.insert("job_id".to_string(), json!("job-7"));
    args
}

#[tokio::test]
async fn test_update_checkpoint_is_idempotent() {
    let h = Harness::new().await;
    let run = h.insert_run().await;
    h.runs.set_status(&run.id, RunStatus::Running).await.unwrap();
    let ctx = h.context(&run);

    let first = ctx
        .update_checkpoint(WAITING_FOR_SIMULATION, job_args())
        .await
        .unwrap();
    let second = ctx
        .update_checkpoint(WAITING_FOR_SIMULATION, job_args())
        .await
        .unwrap();

    let expected = CheckpointState {
        name: WAITING_FOR_SIMULATION.to_string(),
        args: job_args(),
        status: RunStatus::Running,
    };
    assert_eq!(first, expected);
    assert_eq!(second, expected);
    assert_eq!(ctx.checkpoint().await.unwrap(), expected);
}

#[tokio::test]
async fn test_update_checkpoint_on_cancelled_run_persists_nothing() {
    let h = Harness::new().await;
    let run = h.insert_run().await;
    h.runs.set_status(&run.id, RunStatus::Cancelled).await.unwrap();
    let ctx = h.context(&run);

    let state = ctx
        .update_checkpoint(WAITING_FOR_SIMULATION, job_args())
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Cancelled);
    assert_eq!(state.name, "initialised");
    assert!(state.args.is_empty());
}

#[tokio::test]
async fn test_checkpoint_of_missing_run_fails() {
    let h = Harness::new().await;
    let run = h.insert_run().await;
    let ctx = h.context(&run);
    h.runs.delete_run(&run.id).await.unwrap();

    assert!(matches!(
        ctx.checkpoint().await,
        Err(CitysimError::RunNotFound { .. })
    ));
}

#[tokio::test]
async fn test_cancelled_run_returns_without_results() {
    let h = Harness::new().await;
    let run = h.insert_run().await;
    h.runs.set_status(&run.id, RunStatus::Cancelled).await.unwrap();

    let outcome = UrbanWind::new().perform_analysis(&h.context(&run)).await.unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn test_unknown_checkpoint_is_fatal() {
    let h = Harness::new().await;
    let run = h.insert_run().await;
    h.runs.set_status(&run.id, RunStatus::Running).await.unwrap();
    h.runs
        .advance_checkpoint(&run.id, "mesh-refinement", &CheckpointArgs::new())
        .await
        .unwrap();

    let err = UrbanWind::new()
        .perform_analysis(&h.context(&run))
        .await
        .unwrap_err();

    match err {
        CitysimError::CheckpointDiverged { checkpoint, analysis_type, .. } => {
            assert_eq!(checkpoint, "mesh-refinement");
            assert_eq!(analysis_type, "urban-wind");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_failed_status_at_guard_is_invalid_state() {
    let h = Harness::new().await;
    let run = h.insert_run().await;
    h.runs.set_status(&run.id, RunStatus::Failed).await.unwrap();

    assert!(matches!(
        UrbanWind::new().perform_analysis(&h.context(&run)).await,
        Err(CitysimError::InvalidRunState { .. })
    ));
}

#[tokio::test]
async fn test_missing_job_is_fatal_for_the_run() {
    let h = Harness::new().await;
    let run = h.insert_run().await;
    h.runs.set_status(&run.id, RunStatus::Running).await.unwrap();
    h.runs
        .advance_checkpoint(&run.id, WAITING_FOR_SIMULATION, &job_args())
        .await
        .unwrap();

    assert!(matches!(
        UrbanWind::new().perform_analysis(&h.context(&run)).await,
        Err(CitysimError::JobNotFound { job_id }) if job_id == "job-7"
    ));
}
