//! Borrower Eligibility Calculator
//!
//! Read-only: consulted before a new loan request is accepted, never
//! mutating anything. The decision core is pure so the gate rules (block
//! states, the universal 75% rule, tier ceilings, lender limits) are
//! testable without a store.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::error::{ApiError, ApiResult};
use crate::models::{EligibilityReport, LenderPreference, LenderType, User};

/// Personal-lending ceilings per tier, cents. Tier 6 is unlimited.
pub const TIER_CEILINGS: [Option<i64>; 6] = [
    Some(50_000),
    Some(100_000),
    Some(250_000),
    Some(500_000),
    Some(1_000_000),
    None,
];

/// Ceiling for a borrower tier; out-of-range tiers clamp into the table.
pub fn tier_ceiling(tier: i32) -> Option<i64> {
    let idx = (tier.clamp(1, 6) - 1) as usize;
    TIER_CEILINGS[idx]
}

/// Outstanding-loan snapshot used by the repayment rule
#[derive(Debug, Clone)]
pub struct LoanExposure {
    pub loan_id: Uuid,
    /// Principal, cents
    pub amount: i64,
    pub amount_paid: i64,
    pub amount_remaining: i64,
}

/// The open loan with the lowest paid-back ratio, with that ratio.
pub fn lowest_repayment_ratio(loans: &[LoanExposure]) -> Option<(&LoanExposure, Decimal)> {
    loans
        .iter()
        .filter(|l| l.amount > 0)
        .map(|l| (l, Decimal::from(l.amount_paid) / Decimal::from(l.amount)))
        .min_by(|a, b| a.1.cmp(&b.1))
}

/// Whole days until a restriction lifts, rounded up.
fn days_remaining(until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let delta = until - now;
    let days = delta.num_days();
    if delta.num_seconds() % 86_400 > 0 {
        days + 1
    } else {
        days
    }
}

/// Pure eligibility decision. Gates run in fixed order: permanent block,
/// post-default restriction window, the universal repayment-threshold
/// rule, then the lender-type-specific amount rules.
pub fn evaluate(
    borrower: &User,
    open_loans: &[LoanExposure],
    prefs: &[LenderPreference],
    lender_type: LenderType,
    requested_amount: Option<i64>,
    settings: &EngineSettings,
    now: DateTime<Utc>,
) -> EligibilityReport {
    let outstanding: i64 = open_loans.iter().map(|l| l.amount_remaining).sum();

    if borrower.is_blocked && borrower.debt_cleared_at.is_none() {
        return EligibilityReport {
            can_borrow: false,
            reason: Some(format!(
                "Account blocked with {} cents of outstanding debt",
                outstanding
            )),
            max_amount: None,
            available_amount: None,
            required_payment: None,
        };
    }

    if let Some(ends_at) = borrower.restriction_ends_at {
        if borrower.debt_cleared_at.is_some() && ends_at > now {
            return EligibilityReport {
                can_borrow: false,
                reason: Some(format!(
                    "Borrowing restricted for {} more day(s) after a cleared default",
                    days_remaining(ends_at, now)
                )),
                max_amount: None,
                available_amount: None,
                required_payment: None,
            };
        }
    }

    // Universal repayment rule: the worst open loan must be paid back to
    // the threshold (inclusive) before any new request, whatever the
    // lender type.
    if let Some((loan, ratio)) = lowest_repayment_ratio(open_loans) {
        if ratio < settings.repayment_threshold {
            let needed = (settings.repayment_threshold * Decimal::from(loan.amount)).ceil();
            let required = (needed.to_i64().unwrap_or(loan.amount) - loan.amount_paid).max(0);
            return EligibilityReport {
                can_borrow: false,
                reason: Some(format!(
                    "Loan {} is only {:.2}% repaid; pay {} more cents to reach the threshold",
                    loan.loan_id,
                    ratio * Decimal::from(100),
                    required
                )),
                max_amount: None,
                available_amount: None,
                required_payment: Some(required),
            };
        }
    }

    match lender_type {
        LenderType::Business => {
            let first_time = borrower.is_first_time_borrower();
            let best_limit = prefs
                .iter()
                .filter(|p| p.active)
                .filter_map(|p| {
                    if first_time {
                        if p.allow_first_time_borrowers {
                            Some(p.first_time_borrower_limit)
                        } else {
                            None
                        }
                    } else {
                        Some(p.max_amount)
                    }
                })
                .max();

            match best_limit {
                None => EligibilityReport {
                    can_borrow: false,
                    reason: Some("No active lender currently accepts your profile".to_string()),
                    max_amount: None,
                    available_amount: None,
                    required_payment: None,
                },
                Some(limit) => {
                    if let Some(requested) = requested_amount {
                        if requested > limit {
                            return EligibilityReport {
                                can_borrow: false,
                                reason: Some(format!(
                                    "Requested amount exceeds the best lender limit of {} cents",
                                    limit
                                )),
                                max_amount: Some(limit),
                                available_amount: Some(limit),
                                required_payment: None,
                            };
                        }
                    }
                    EligibilityReport {
                        can_borrow: true,
                        reason: None,
                        max_amount: Some(limit),
                        available_amount: Some(limit),
                        required_payment: None,
                    }
                }
            }
        }
        LenderType::Personal => match tier_ceiling(borrower.borrowing_tier) {
            None => EligibilityReport {
                can_borrow: true,
                reason: None,
                max_amount: None,
                available_amount: None,
                required_payment: None,
            },
            Some(ceiling) => {
                let available = (ceiling - outstanding).max(0);
                if available == 0 {
                    return EligibilityReport {
                        can_borrow: false,
                        reason: Some(format!(
                            "Tier {} ceiling of {} cents is fully utilized",
                            borrower.borrowing_tier, ceiling
                        )),
                        max_amount: Some(ceiling),
                        available_amount: Some(0),
                        required_payment: None,
                    };
                }
                if let Some(requested) = requested_amount {
                    if requested > available {
                        return EligibilityReport {
                            can_borrow: false,
                            reason: Some(format!(
                                "Requested amount exceeds the {} cents available at tier {}",
                                available, borrower.borrowing_tier
                            )),
                            max_amount: Some(ceiling),
                            available_amount: Some(available),
                            required_payment: None,
                        };
                    }
                }
                EligibilityReport {
                    can_borrow: true,
                    reason: None,
                    max_amount: Some(ceiling),
                    available_amount: Some(available),
                    required_payment: None,
                }
            }
        },
    }
}

/// Eligibility service
#[derive(Clone)]
pub struct EligibilityService {
    db_pool: PgPool,
    settings: EngineSettings,
}

impl EligibilityService {
    pub fn new(db_pool: PgPool, settings: EngineSettings) -> Self {
        Self { db_pool, settings }
    }

    /// Load the borrower's open exposure and run the decision.
    pub async fn check_eligibility(
        &self,
        borrower_id: Uuid,
        lender_type: LenderType,
        requested_amount: Option<i64>,
    ) -> ApiResult<EligibilityReport> {
        let borrower = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(borrower_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("User {} not found", borrower_id)))?;

        let open_loans = sqlx::query_as::<_, (Uuid, i64, i64, i64)>(
            r#"
            SELECT id, amount, amount_paid, amount_remaining
            FROM loans
            WHERE borrower_id = $1 AND status IN ('pending', 'matched', 'active')
            "#,
        )
        .bind(borrower_id)
        .fetch_all(&self.db_pool)
        .await?
        .into_iter()
        .map(|(loan_id, amount, amount_paid, amount_remaining)| LoanExposure {
            loan_id,
            amount,
            amount_paid,
            amount_remaining,
        })
        .collect::<Vec<_>>();

        let prefs = if lender_type == LenderType::Business {
            sqlx::query_as::<_, LenderPreference>(
                "SELECT * FROM lender_preferences WHERE active = TRUE",
            )
            .fetch_all(&self.db_pool)
            .await?
        } else {
            vec![]
        };

        let report = evaluate(
            &borrower,
            &open_loans,
            &prefs,
            lender_type,
            requested_amount,
            &self.settings,
            Utc::now(),
        );

        tracing::debug!(
            borrower_id = %borrower_id,
            lender_type = ?lender_type,
            can_borrow = report.can_borrow,
            reason = ?report.reason,
            "Eligibility evaluated"
        );

        Ok(report)
    }
}
