//! Route definitions for the TrustLend API

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

// Loan routes
pub fn loan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/loans", post(create_loan))
        .route("/api/loans", get(list_loans))
        .route("/api/loans/:id", get(get_loan))
}

// Offer routes
pub fn match_routes() -> Router<AppState> {
    Router::new().route("/api/matches/:id/respond", post(respond_to_offer))
}

// Payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments/webhook", post(payment_webhook))
        .route("/api/payments/:id/confirm", post(confirm_payment))
}

// Eligibility routes
pub fn eligibility_routes() -> Router<AppState> {
    Router::new().route("/api/eligibility/:borrower_id", get(check_eligibility))
}

// Trust score routes
pub fn trust_routes() -> Router<AppState> {
    Router::new().route("/api/trust/:user_id", get(get_trust_score))
}

// Vouch routes
pub fn vouch_routes() -> Router<AppState> {
    Router::new().route("/api/vouches", post(create_vouch))
}
