//! Eligibility handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{EligibilityQuery, EligibilityReport};
use crate::state::AppState;

/// Read-only eligibility report for a prospective borrower
pub async fn check_eligibility(
    State(app_state): State<AppState>,
    Path(borrower_id): Path<Uuid>,
    Query(query): Query<EligibilityQuery>,
) -> ApiResult<Json<EligibilityReport>> {
    let report = app_state
        .eligibility_service
        .check_eligibility(borrower_id, query.lender_type, query.requested_amount)
        .await?;

    Ok(Json(report))
}
