use axum::{extract::State, Json};

use crate::dto::ConfigEntry;
use crate::state::AppState;

/// Effective engine configuration with the source of every value
pub async fn get_engine_config(State(state): State<AppState>) -> Json<Vec<ConfigEntry>> {
    let mut entries: Vec<ConfigEntry> = state
        .engine_config
        .to_inspection_map()
        .into_iter()
        .map(|(key, (value, source))| ConfigEntry { key, value, source })
        .collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));

    Json(entries)
}
