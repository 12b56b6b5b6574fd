//! Loan request handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::models::{CreateLoanRequest, Loan, LoanStatus};
use crate::state::AppState;

/// Query for listing loans
#[derive(Debug, Deserialize)]
pub struct ListLoansQuery {
    pub borrower_id: Option<Uuid>,
    pub lender_id: Option<Uuid>,
    pub status: Option<LoanStatus>,
}

/// Open a new loan request (eligibility-gated)
pub async fn create_loan(
    State(app_state): State<AppState>,
    Json(request): Json<CreateLoanRequest>,
) -> ApiResult<Json<Loan>> {
    request.validate()?;

    let loan = app_state.loan_service.create_loan(request).await?;
    Ok(Json(loan))
}

/// Get a single loan by ID
pub async fn get_loan(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Loan>> {
    let loan = app_state.loan_service.get_loan(&id).await?;
    Ok(Json(loan))
}

/// List loans with filters
pub async fn list_loans(
    State(app_state): State<AppState>,
    Query(query): Query<ListLoansQuery>,
) -> ApiResult<Json<Vec<Loan>>> {
    let loans = app_state
        .loan_service
        .list_loans(query.borrower_id, query.lender_id, query.status)
        .await?;
    Ok(Json(loans))
}
