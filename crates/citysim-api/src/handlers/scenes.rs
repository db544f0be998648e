use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use citysim_core::models::{ProjectId, Scene, SceneId};

use crate::dto::CreateSceneRequest;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn create_scene(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<CreateSceneRequest>,
) -> Result<(StatusCode, Json<Scene>), ApiError> {
    tracing::info!(project_id = %project_id, name = %request.name, "Creating scene");

    let scene = Scene {
        id: request.id.map(SceneId::new).unwrap_or_else(SceneId::generate),
        project_id: ProjectId::new(project_id),
        name: request.name,
        zone_config_mapping: request.zone_config_mapping,
        module_settings: request.module_settings,
    };
    state.run_store().store_scene(&scene).await?;

    Ok((StatusCode::CREATED, Json(scene)))
}
