//! Business logic services for TrustLend

pub mod eligibility;
pub mod loans;
pub mod matching;
pub mod notifications;
pub mod payments;
pub mod trust_score;
pub mod voucher;

pub use eligibility::EligibilityService;
pub use loans::LoanService;
pub use matching::MatchingService;
pub use notifications::NotificationService;
pub use payments::PaymentService;
pub use trust_score::TrustScoreService;
pub use voucher::VoucherService;
