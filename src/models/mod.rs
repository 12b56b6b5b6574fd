//! Data models for the TrustLend lending engine
//!
//! Money is carried as `i64` cents throughout so schedule sums and balance
//! invariants stay integer-exact. Rates are `Decimal` percentages.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

/// Loan status enum
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Pending,
    Matched,
    Active,
    Completed,
    Defaulted,
}

/// Interest computation mode
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "interest_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InterestType {
    Simple,
    Compound,
}

/// Repayment cadence
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "repayment_frequency", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RepaymentFrequency {
    Weekly,
    Biweekly,
    Monthly,
}

/// Where the loan's interest rate came from (resolution chain provenance)
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "rate_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    LenderPreference,
    TierPolicy,
    PlatformDefault,
}

/// Outcome of the offer cascade for a loan still seeking a lender
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "loan_match_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoanMatchState {
    Searching,
    Matched,
    NoMatch,
}

/// Loan model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Loan {
    pub id: Uuid,
    pub borrower_id: Uuid,
    /// Individual lender; mutually exclusive with `business_lender_id`
    pub lender_id: Option<Uuid>,
    pub business_lender_id: Option<Uuid>,
    pub current_match_id: Option<Uuid>,
    /// Principal in cents
    pub amount: i64,
    pub currency: String,
    /// Annual rate, percent
    pub interest_rate: Decimal,
    pub rate_source: Option<RateSource>,
    pub interest_type: InterestType,
    pub total_interest: i64,
    pub total_amount: i64,
    pub repayment_frequency: RepaymentFrequency,
    pub total_installments: i32,
    pub status: LoanStatus,
    pub match_state: Option<LoanMatchState>,
    pub amount_paid: i64,
    /// Invariant: `total_amount - amount_paid` after every write
    pub amount_remaining: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// The assigned lender, whichever side funded the loan.
    pub fn funding_lender(&self) -> Option<LenderActor> {
        match (self.lender_id, self.business_lender_id) {
            (Some(id), _) => Some(LenderActor::User(id)),
            (None, Some(id)) => Some(LenderActor::Business(id)),
            (None, None) => None,
        }
    }
}

/// Schedule entry status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "schedule_entry_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScheduleEntryStatus {
    Scheduled,
    Paid,
    Overdue,
}

/// One installment of a loan's repayment schedule
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct PaymentScheduleEntry {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub installment_number: i32,
    pub due_date: DateTime<Utc>,
    /// `principal_amount + interest_amount`, cents
    pub amount: i64,
    pub principal_amount: i64,
    pub interest_amount: i64,
    pub is_paid: bool,
    pub status: ScheduleEntryStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Offer status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "match_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Skipped,
}

/// Time-boxed offer linking a loan to one candidate lender
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct LoanMatch {
    pub id: Uuid,
    pub loan_id: Uuid,
    /// Candidate: exactly one of the two is set
    pub lender_user_id: Option<Uuid>,
    pub lender_business_id: Option<Uuid>,
    /// Priority order among candidates, 1 = best
    pub match_rank: i32,
    pub status: MatchStatus,
    pub decline_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoanMatch {
    pub fn candidate(&self) -> Option<LenderActor> {
        match (self.lender_user_id, self.lender_business_id) {
            (Some(id), _) => Some(LenderActor::User(id)),
            (None, Some(id)) => Some(LenderActor::Business(id)),
            (None, None) => None,
        }
    }
}

/// Either side of the lending marketplace that can fund a loan
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum LenderActor {
    User(Uuid),
    Business(Uuid),
}

/// Trust score event types
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "trust_event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TrustEventType {
    PaymentOntime,
    PaymentEarly,
    PaymentLate,
    PaymentMissed,
    PaymentFailed,
    LoanCompleted,
    FirstLoanCompleted,
    VouchReceived,
    VoucheePayment,
    VoucheeLoanCompleted,
}

/// Append-only trust score event
///
/// `(user_id, loan_id, payment_id, event_family)` is the engine's
/// idempotency key, enforced by unique indexes at the store.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct TrustScoreEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub loan_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub event_type: TrustEventType,
    pub event_family: String,
    pub score_impact: i32,
    pub created_at: DateTime<Utc>,
}

/// Lender matching preference plus the capital account facet
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct LenderPreference {
    pub id: Uuid,
    pub lender_user_id: Option<Uuid>,
    pub lender_business_id: Option<Uuid>,
    /// Largest loan this lender will fund, cents
    pub max_amount: i64,
    pub first_time_borrower_limit: i64,
    pub allow_first_time_borrowers: bool,
    /// Preferred annual rate, percent
    pub interest_rate: Option<Decimal>,
    /// Available to lend, cents
    pub capital_pool: i64,
    /// Committed to active loans, cents; invariant >= 0
    pub capital_reserved: i64,
    pub offers_received: i32,
    pub offers_accepted: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LenderPreference {
    pub fn lender(&self) -> Option<LenderActor> {
        match (self.lender_user_id, self.lender_business_id) {
            (Some(id), _) => Some(LenderActor::User(id)),
            (None, Some(id)) => Some(LenderActor::Business(id)),
            (None, None) => None,
        }
    }

    /// Capital not yet committed to loans, cents.
    pub fn free_capital(&self) -> i64 {
        (self.capital_pool - self.capital_reserved).max(0)
    }
}

/// Vouch relation: one user standing behind a borrower
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct VoucherRecord {
    pub id: Uuid,
    pub voucher_user_id: Uuid,
    pub vouchee_user_id: Uuid,
    pub loans_active: i32,
    pub loans_completed: i32,
    /// Standing contribution accumulated from vouchee behavior
    pub standing: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Borrower/lender profile row
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
    /// Cached trust score, 0-100
    pub trust_score: i32,
    pub payments_made: i32,
    pub payments_ontime: i32,
    pub payments_early: i32,
    pub payments_late: i32,
    pub payments_missed: i32,
    pub completed_loans: i32,
    /// Personal-lending tier, 1-6
    pub borrowing_tier: i32,
    pub loans_at_current_tier: i32,
    pub is_blocked: bool,
    pub debt_cleared_at: Option<DateTime<Utc>>,
    pub restriction_ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// First-time borrowers have never completed a loan.
    pub fn is_first_time_borrower(&self) -> bool {
        self.completed_loans == 0
    }
}

/// Notification intent kinds consumed by the external delivery component
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "notification_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OfferReceived,
    OfferDeclined,
    LoanActivated,
    NoLenderMatched,
    PaymentReceived,
    PaymentOverdue,
    LoanCompleted,
    VouchReceived,
}

/// Notification intent row
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// ===== Request / response payloads =====

/// Lender category a borrower is requesting from
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LenderType {
    Personal,
    Business,
}

/// Request to open a loan
#[derive(Debug, Deserialize, Validate)]
pub struct CreateLoanRequest {
    pub borrower_id: Uuid,
    /// Principal in cents
    #[validate(range(min = 1))]
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub lender_type: LenderType,
    /// Direct counterparty for personal lending; ignored for business loans
    pub lender_id: Option<Uuid>,
    pub interest_type: InterestType,
    pub repayment_frequency: RepaymentFrequency,
    #[validate(range(min = 1, max = 120))]
    pub total_installments: i32,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Action a lender takes on an offer
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OfferAction {
    Accept,
    Decline,
}

/// Request to accept or decline an offer
#[derive(Debug, Deserialize, Validate)]
pub struct RespondToOfferRequest {
    /// Acting lender; must be the offer's candidate
    pub lender_user_id: Option<Uuid>,
    pub lender_business_id: Option<Uuid>,
    pub action: OfferAction,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

impl RespondToOfferRequest {
    pub fn actor(&self) -> Option<LenderActor> {
        match (self.lender_user_id, self.lender_business_id) {
            (Some(id), None) => Some(LenderActor::User(id)),
            (None, Some(id)) => Some(LenderActor::Business(id)),
            _ => None,
        }
    }
}

/// Outcome of an offer response
#[derive(Debug, Serialize)]
pub struct OfferResponseOutcome {
    pub match_id: Uuid,
    pub loan_id: Uuid,
    pub status: MatchStatus,
    /// Next offer activated by the cascade, if any
    pub next_match_id: Option<Uuid>,
    /// Set when no candidate remains and the loan went to no-match
    pub no_match: bool,
}

/// Payment-provider webhook payload
#[derive(Debug, Deserialize, Validate)]
pub struct PaymentWebhookPayload {
    /// `transfer.succeeded` or `transfer.failed`
    pub event: String,
    pub loan_id: Uuid,
    pub borrower_id: Uuid,
    pub payment_id: Uuid,
    /// Amount moved, cents
    #[validate(range(min = 1))]
    pub amount: i64,
    pub due_date: Option<DateTime<Utc>>,
    pub paid_date: Option<DateTime<Utc>>,
}

/// Manual payment-proof confirmation
#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmPaymentRequest {
    pub loan_id: Uuid,
    pub borrower_id: Uuid,
    #[validate(range(min = 1))]
    pub amount: i64,
    pub paid_date: Option<DateTime<Utc>>,
}

/// Result of a payment-completion invocation
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct PaymentCompletionOutcome {
    pub trust_score_updated: bool,
    pub loan_completed: bool,
    pub new_score: i32,
    /// True when the call was an idempotent no-op on the timing event
    pub duplicate_event: bool,
}

/// Eligibility report for a prospective borrower
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct EligibilityReport {
    pub can_borrow: bool,
    pub reason: Option<String>,
    /// Ceiling for this borrower and lender type, cents; None = unlimited
    pub max_amount: Option<i64>,
    pub available_amount: Option<i64>,
    /// Extra payment needed to cross the repayment threshold, cents
    pub required_payment: Option<i64>,
}

/// Query parameters for the eligibility endpoint
#[derive(Debug, Deserialize)]
pub struct EligibilityQuery {
    pub lender_type: LenderType,
    pub requested_amount: Option<i64>,
}

/// Request to vouch for a borrower
#[derive(Debug, Deserialize, Validate)]
pub struct CreateVouchRequest {
    pub voucher_user_id: Uuid,
    pub vouchee_user_id: Uuid,
}

/// Trust score response
#[derive(Debug, Serialize)]
pub struct TrustScoreResponse {
    pub user_id: Uuid,
    pub score: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respond_request_rejects_ambiguous_actor() {
        let req = RespondToOfferRequest {
            lender_user_id: Some(Uuid::new_v4()),
            lender_business_id: Some(Uuid::new_v4()),
            action: OfferAction::Accept,
            reason: None,
        };
        assert!(req.actor().is_none());
    }

    #[test]
    fn free_capital_never_negative() {
        let now = Utc::now();
        let pref = LenderPreference {
            id: Uuid::new_v4(),
            lender_user_id: Some(Uuid::new_v4()),
            lender_business_id: None,
            max_amount: 100_000,
            first_time_borrower_limit: 50_000,
            allow_first_time_borrowers: true,
            interest_rate: None,
            capital_pool: 10_000,
            capital_reserved: 25_000,
            offers_received: 0,
            offers_accepted: 0,
            active: true,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(pref.free_capital(), 0);
    }

    #[test]
    fn first_time_borrower_means_no_completions() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: None,
            name: None,
            trust_score: 50,
            payments_made: 0,
            payments_ontime: 0,
            payments_early: 0,
            payments_late: 0,
            payments_missed: 0,
            completed_loans: 0,
            borrowing_tier: 1,
            loans_at_current_tier: 0,
            is_blocked: false,
            debt_cleared_at: None,
            restriction_ends_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(user.is_first_time_borrower());
    }
}
