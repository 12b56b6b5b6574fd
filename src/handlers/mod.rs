//! API handlers for the TrustLend engine

mod eligibility;
mod loans;
mod matches;
mod payments;
mod trust;
mod vouches;

pub use eligibility::check_eligibility;
pub use loans::{create_loan, get_loan, list_loans};
pub use matches::respond_to_offer;
pub use payments::{confirm_payment, payment_webhook};
pub use trust::get_trust_score;
pub use vouches::create_vouch;
