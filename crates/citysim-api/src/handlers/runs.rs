use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use citysim_core::models::{GroupId, ProjectId, RunId, SceneId};

use crate::dto::{DeleteResponse, RunResponse, SubmitRunRequest};
use crate::error::ApiError;
use crate::state::AppState;

/// Create or resume the run of a group against a scene
pub async fn submit_run(
    State(state): State<AppState>,
    Json(request): Json<SubmitRunRequest>,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    tracing::info!(
        group_id = %request.group_id,
        scene_id = %request.scene_id,
        creator = %request.creator,
        "Submitting analysis run"
    );

    let run = state
        .dispatcher
        .submit(
            &GroupId::new(request.group_id),
            &SceneId::new(request.scene_id),
            &request.creator,
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(run.into())))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunResponse>, ApiError> {
    let run = state.dispatcher.status(&RunId::new(run_id)).await?;
    Ok(Json(run.into()))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunResponse>, ApiError> {
    tracing::info!(run_id = %run_id, "Cancelling analysis run");

    let run = state.dispatcher.cancel(&RunId::new(run_id)).await?;
    Ok(Json(run.into()))
}

pub async fn delete_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    tracing::info!(run_id = %run_id, "Deleting analysis run");

    state.dispatcher.delete(&RunId::new(run_id.as_str())).await?;
    Ok(Json(DeleteResponse::success("run", &run_id)))
}

pub async fn list_project_runs(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<RunResponse>>, ApiError> {
    let runs = state
        .dispatcher
        .list_runs(&ProjectId::new(project_id))
        .await?;

    Ok(Json(runs.into_iter().map(RunResponse::from).collect()))
}
