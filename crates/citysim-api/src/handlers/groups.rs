use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use citysim_core::models::{AnalysisGroup, GroupId, ProjectId};

use crate::dto::CreateGroupRequest;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn create_group(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<AnalysisGroup>), ApiError> {
    tracing::info!(
        project_id = %project_id,
        analysis_type = %request.analysis_type,
        "Creating analysis group"
    );

    state.dispatcher.registry().get(&request.analysis_type)?;
    if !request.area_of_interest.has_coordinates() {
        return Err(ApiError::bad_request("Area of interest has no coordinates"));
    }

    let group = AnalysisGroup {
        id: request.id.map(GroupId::new).unwrap_or_else(GroupId::generate),
        project_id: ProjectId::new(project_id),
        name: request.name,
        analysis_type: request.analysis_type,
        area_of_interest: request.area_of_interest,
        parameters: request.parameters,
        created_at: chrono::Utc::now(),
    };
    state.run_store().store_group(&group).await?;

    Ok((StatusCode::CREATED, Json(group)))
}
