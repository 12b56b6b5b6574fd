//! Interest and repayment-schedule arithmetic
//!
//! Pure functions, no store access. Amounts are `i64` cents; rates are
//! annual `Decimal` percentages.
//!
//! Term convention: the loan term is measured in months using the same
//! frequency mapping for both interest modes (weekly installment = 0.25
//! months, biweekly = 0.5, monthly = 1). Simple interest pro-rates the
//! annual rate over that term: `P * (r/100) * months/12`. Compound interest
//! uses the monthly-compounding approximation `P * (1 + r/1200)^months - P`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};
use serde::Serialize;
use thiserror::Error;

use crate::models::{InterestType, RateSource, RepaymentFrequency};

/// Per-tier annual rates for the tier-policy resolution strategy, percent.
/// Index 0 = tier 1; tiers beyond the table reuse the last entry.
const TIER_POLICY_RATES: [u32; 6] = [15, 15, 12, 12, 10, 10];

/// Arithmetic input errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Installment count must be at least 1, got {0}")]
    InvalidInstallments(i32),

    #[error("Principal must be positive, got {0}")]
    InvalidPrincipal(i64),

    #[error("Interest rate cannot be negative, got {0}")]
    NegativeRate(Decimal),
}

/// Amounts for a single installment, cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstallmentAmounts {
    pub amount: i64,
    pub principal: i64,
    pub interest: i64,
}

/// Priced loan: totals plus the per-installment split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanPricing {
    pub total_interest: i64,
    pub total_amount: i64,
    pub installments: Vec<InstallmentAmounts>,
}

/// Interest rate with the resolution strategy that supplied it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRate {
    pub rate: Decimal,
    pub source: RateSource,
}

/// Loan term in months for the given cadence and installment count.
pub fn term_months(frequency: RepaymentFrequency, installments: i32) -> Decimal {
    let per_installment = match frequency {
        RepaymentFrequency::Weekly => Decimal::new(25, 2),
        RepaymentFrequency::Biweekly => Decimal::new(5, 1),
        RepaymentFrequency::Monthly => Decimal::ONE,
    };
    Decimal::from(installments) * per_installment
}

/// Total simple interest in cents: annual rate pro-rated over the term.
pub fn simple_interest(
    principal: i64,
    annual_rate: Decimal,
    frequency: RepaymentFrequency,
    installments: i32,
) -> Result<i64, ScheduleError> {
    validate(principal, annual_rate, installments)?;

    let years = term_months(frequency, installments) / Decimal::from(12);
    let interest = Decimal::from(principal) * (annual_rate / Decimal::from(100)) * years;
    Ok(to_cents(interest))
}

/// Total compound interest in cents, monthly-compounding approximation.
pub fn compound_interest(
    principal: i64,
    annual_rate: Decimal,
    frequency: RepaymentFrequency,
    installments: i32,
) -> Result<i64, ScheduleError> {
    validate(principal, annual_rate, installments)?;

    let months = term_months(frequency, installments);
    let monthly_factor = Decimal::ONE + annual_rate / Decimal::from(1200);
    let grown = Decimal::from(principal) * monthly_factor.powd(months);
    Ok(to_cents(grown - Decimal::from(principal)))
}

/// Total interest for the loan's interest mode.
pub fn total_interest(
    interest_type: InterestType,
    principal: i64,
    annual_rate: Decimal,
    frequency: RepaymentFrequency,
    installments: i32,
) -> Result<i64, ScheduleError> {
    match interest_type {
        InterestType::Simple => simple_interest(principal, annual_rate, frequency, installments),
        InterestType::Compound => {
            compound_interest(principal, annual_rate, frequency, installments)
        }
    }
}

/// Split principal and interest into per-installment amounts.
///
/// Each component is divided evenly and rounded to the cent; the final
/// installment absorbs both rounding remainders, so the principal column
/// sums exactly to `principal`, the interest column to `total_interest`,
/// and the amount column to their sum. An installment's `amount` is the
/// sum of its rounded components.
pub fn build_schedule(
    principal: i64,
    total_interest: i64,
    installments: i32,
) -> Result<Vec<InstallmentAmounts>, ScheduleError> {
    if installments < 1 {
        return Err(ScheduleError::InvalidInstallments(installments));
    }
    if principal <= 0 {
        return Err(ScheduleError::InvalidPrincipal(principal));
    }

    let n = installments as i64;
    let principal_per = round_div(principal, n);
    let interest_per = round_div(total_interest, n);

    let mut lines = Vec::with_capacity(installments as usize);
    for _ in 0..(n - 1) {
        lines.push(InstallmentAmounts {
            amount: principal_per + interest_per,
            principal: principal_per,
            interest: interest_per,
        });
    }

    let principal_last = principal - principal_per * (n - 1);
    let interest_last = total_interest - interest_per * (n - 1);
    lines.push(InstallmentAmounts {
        amount: principal_last + interest_last,
        principal: principal_last,
        interest: interest_last,
    });

    Ok(lines)
}

/// Price a loan end to end: totals plus the installment split.
pub fn price_loan(
    interest_type: InterestType,
    principal: i64,
    annual_rate: Decimal,
    frequency: RepaymentFrequency,
    installments: i32,
) -> Result<LoanPricing, ScheduleError> {
    let interest = total_interest(interest_type, principal, annual_rate, frequency, installments)?;
    let lines = build_schedule(principal, interest, installments)?;
    Ok(LoanPricing {
        total_interest: interest,
        total_amount: principal + interest,
        installments: lines,
    })
}

/// Days between consecutive due dates for non-monthly cadences.
pub fn period_days(frequency: RepaymentFrequency) -> Option<i64> {
    match frequency {
        RepaymentFrequency::Weekly => Some(7),
        RepaymentFrequency::Biweekly => Some(14),
        RepaymentFrequency::Monthly => None,
    }
}

/// Resolve the loan's interest rate through the fixed strategy chain:
/// lender preference, then tier policy, then the platform default.
pub fn resolve_interest_rate(
    lender_rate: Option<Decimal>,
    borrower_tier: Option<i32>,
    default_rate: Decimal,
) -> ResolvedRate {
    if let Some(rate) = lender_rate {
        return ResolvedRate {
            rate,
            source: RateSource::LenderPreference,
        };
    }
    if let Some(tier) = borrower_tier {
        if tier >= 1 {
            let idx = ((tier - 1) as usize).min(TIER_POLICY_RATES.len() - 1);
            return ResolvedRate {
                rate: Decimal::from(TIER_POLICY_RATES[idx]),
                source: RateSource::TierPolicy,
            };
        }
    }
    ResolvedRate {
        rate: default_rate,
        source: RateSource::PlatformDefault,
    }
}

fn validate(principal: i64, rate: Decimal, installments: i32) -> Result<(), ScheduleError> {
    if installments < 1 {
        return Err(ScheduleError::InvalidInstallments(installments));
    }
    if principal <= 0 {
        return Err(ScheduleError::InvalidPrincipal(principal));
    }
    if rate < Decimal::ZERO {
        return Err(ScheduleError::NegativeRate(rate));
    }
    Ok(())
}

/// Round a decimal cent amount to a whole number of cents, half away
/// from zero.
fn to_cents(value: Decimal) -> i64 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

fn round_div(total: i64, n: i64) -> i64 {
    to_cents(Decimal::from(total) / Decimal::from(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn term_months_maps_frequencies() {
        assert_eq!(
            term_months(RepaymentFrequency::Weekly, 12),
            Decimal::new(3, 0)
        );
        assert_eq!(
            term_months(RepaymentFrequency::Biweekly, 12),
            Decimal::new(6, 0)
        );
        assert_eq!(
            term_months(RepaymentFrequency::Monthly, 12),
            Decimal::new(12, 0)
        );
    }

    #[test]
    fn simple_interest_reference_case() {
        // $1000 at 12% over 12 monthly installments = one year = $120.00
        let interest =
            simple_interest(100_000, Decimal::from(12), RepaymentFrequency::Monthly, 12).unwrap();
        assert_eq!(interest, 12_000);
    }

    #[test]
    fn simple_interest_pro_rates_short_terms() {
        // 12 weekly installments = 3 months = a quarter of the annual rate
        let interest =
            simple_interest(100_000, Decimal::from(12), RepaymentFrequency::Weekly, 12).unwrap();
        assert_eq!(interest, 3_000);
    }

    #[test]
    fn compound_interest_twelve_months() {
        // $1000 at 12% compounded monthly for a year: (1.01)^12 - 1
        let interest =
            compound_interest(100_000, Decimal::from(12), RepaymentFrequency::Monthly, 12)
                .unwrap();
        assert_eq!(interest, 12_683);
    }

    #[test]
    fn schedule_reference_case() {
        let pricing = price_loan(
            InterestType::Simple,
            100_000,
            Decimal::from(12),
            RepaymentFrequency::Monthly,
            12,
        )
        .unwrap();

        assert_eq!(pricing.total_interest, 12_000);
        assert_eq!(pricing.total_amount, 112_000);
        assert_eq!(pricing.installments.len(), 12);

        for line in &pricing.installments[..11] {
            assert_eq!(line.amount, 9_333);
        }
        assert_eq!(pricing.installments[11].amount, 9_337);
    }

    #[test]
    fn schedule_components_sum_exactly() {
        let lines = build_schedule(100_000, 12_000, 7).unwrap();

        let amount_sum: i64 = lines.iter().map(|l| l.amount).sum();
        let principal_sum: i64 = lines.iter().map(|l| l.principal).sum();
        let interest_sum: i64 = lines.iter().map(|l| l.interest).sum();

        assert_eq!(principal_sum, 100_000);
        assert_eq!(interest_sum, 12_000);
        assert_eq!(amount_sum, 112_000);
        for line in lines {
            assert_eq!(line.amount, line.principal + line.interest);
        }
    }

    #[test]
    fn single_installment_takes_everything() {
        let lines = build_schedule(99_999, 1_001, 1).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].amount, 101_000);
    }

    #[test]
    fn rejects_bad_inputs() {
        assert_eq!(
            build_schedule(100, 10, 0),
            Err(ScheduleError::InvalidInstallments(0))
        );
        assert_eq!(
            build_schedule(0, 10, 3),
            Err(ScheduleError::InvalidPrincipal(0))
        );
        assert!(simple_interest(
            100,
            Decimal::from(-1),
            RepaymentFrequency::Monthly,
            3
        )
        .is_err());
    }

    #[test]
    fn rate_resolution_order_and_provenance() {
        let resolved =
            resolve_interest_rate(Some(Decimal::from(9)), Some(3), Decimal::from(12));
        assert_eq!(resolved.rate, Decimal::from(9));
        assert_eq!(resolved.source, RateSource::LenderPreference);

        let resolved = resolve_interest_rate(None, Some(3), Decimal::from(12));
        assert_eq!(resolved.rate, Decimal::from(12));
        assert_eq!(resolved.source, RateSource::TierPolicy);

        let resolved = resolve_interest_rate(None, None, Decimal::from(12));
        assert_eq!(resolved.source, RateSource::PlatformDefault);
    }
}
