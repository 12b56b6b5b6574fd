//! Offer response handlers

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::models::{OfferResponseOutcome, RespondToOfferRequest};
use crate::state::AppState;

/// Accept or decline an offer as its candidate lender
pub async fn respond_to_offer(
    State(app_state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Json(request): Json<RespondToOfferRequest>,
) -> ApiResult<Json<OfferResponseOutcome>> {
    request.validate()?;

    let actor = request.actor().ok_or_else(|| {
        ApiError::Validation(
            "Exactly one of lender_user_id or lender_business_id is required".to_string(),
        )
    })?;

    let outcome = app_state
        .matching_service
        .respond_to_offer(match_id, actor, request.action, request.reason)
        .await?;

    Ok(Json(outcome))
}
