//! Vouch handlers

use axum::{extract::State, Json};
use validator::Validate;

use crate::error::ApiResult;
use crate::models::{CreateVouchRequest, NotificationKind, VoucherRecord};
use crate::state::AppState;

/// Declare a vouch for a borrower
pub async fn create_vouch(
    State(app_state): State<AppState>,
    Json(request): Json<CreateVouchRequest>,
) -> ApiResult<Json<VoucherRecord>> {
    request.validate()?;

    let record = app_state
        .voucher_service
        .create_vouch(request.voucher_user_id, request.vouchee_user_id)
        .await?;

    app_state
        .notification_service
        .notify(
            request.vouchee_user_id,
            NotificationKind::VouchReceived,
            "Someone vouched for your trustworthiness",
        )
        .await;

    Ok(Json(record))
}
