//! Trust score handlers

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::TrustScoreResponse;
use crate::state::AppState;

/// Current trust score for a user
pub async fn get_trust_score(
    State(app_state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<TrustScoreResponse>> {
    let score = app_state.trust_service.get_score(user_id).await?;

    Ok(Json(TrustScoreResponse { user_id, score }))
}
