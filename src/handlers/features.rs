use axum::{Json, extract::State};

use crate::{AppState, error::ApiResult, models::Feature};

/// list_features
///
/// [Public Route] Every feature a trail can be tagged with, by name.
pub async fn list_features(State(state): State<AppState>) -> ApiResult<Json<Vec<Feature>>> {
    Ok(Json(state.repo.list_features().await?))
}
