//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::services::{
    EligibilityService, LoanService, MatchingService, NotificationService, PaymentService,
    TrustScoreService, VoucherService,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub loan_service: Arc<LoanService>,
    pub matching_service: Arc<MatchingService>,
    pub payment_service: Arc<PaymentService>,
    pub eligibility_service: Arc<EligibilityService>,
    pub trust_service: Arc<TrustScoreService>,
    pub voucher_service: Arc<VoucherService>,
    pub notification_service: Arc<NotificationService>,
    pub webhook_secret: Option<String>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        loan_service: Arc<LoanService>,
        matching_service: Arc<MatchingService>,
        payment_service: Arc<PaymentService>,
        eligibility_service: Arc<EligibilityService>,
        trust_service: Arc<TrustScoreService>,
        voucher_service: Arc<VoucherService>,
        notification_service: Arc<NotificationService>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            loan_service,
            matching_service,
            payment_service,
            eligibility_service,
            trust_service,
            voucher_service,
            notification_service,
            webhook_secret,
        }
    }
}

impl FromRef<AppState> for Arc<LoanService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.loan_service.clone()
    }
}

impl FromRef<AppState> for Arc<MatchingService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.matching_service.clone()
    }
}

impl FromRef<AppState> for Arc<PaymentService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.payment_service.clone()
    }
}

impl FromRef<AppState> for Arc<EligibilityService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.eligibility_service.clone()
    }
}

impl FromRef<AppState> for Arc<TrustScoreService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.trust_service.clone()
    }
}

impl FromRef<AppState> for Arc<VoucherService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.voucher_service.clone()
    }
}
