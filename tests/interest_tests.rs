//! Interest and schedule arithmetic tests
//!
//! These pin the engine's financial arithmetic to the cent: totals,
//! per-installment splits, and the final-installment remainder rule.

use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use trustlend_server::interest::{
    build_schedule, compound_interest, price_loan, resolve_interest_rate, simple_interest,
    term_months,
};
use trustlend_server::models::{InterestType, RateSource, RepaymentFrequency};

// ============================================================================
// Totals
// ============================================================================

#[test]
fn simple_interest_one_year_monthly() {
    // $1000 principal, 12% annual, 12 monthly installments
    let interest = simple_interest(
        100_000,
        Decimal::from(12),
        RepaymentFrequency::Monthly,
        12,
    )
    .unwrap();
    assert_eq!(interest, 12_000);
}

#[test]
fn simple_interest_scales_with_term() {
    // 6 monthly installments = half a year = half the annual interest
    let interest = simple_interest(
        100_000,
        Decimal::from(12),
        RepaymentFrequency::Monthly,
        6,
    )
    .unwrap();
    assert_eq!(interest, 6_000);

    // 12 biweekly installments = 6 months
    let biweekly = simple_interest(
        100_000,
        Decimal::from(12),
        RepaymentFrequency::Biweekly,
        12,
    )
    .unwrap();
    assert_eq!(biweekly, 6_000);
}

#[test]
fn compound_interest_exceeds_simple_over_a_year() {
    let simple = simple_interest(
        100_000,
        Decimal::from(12),
        RepaymentFrequency::Monthly,
        12,
    )
    .unwrap();
    let compound = compound_interest(
        100_000,
        Decimal::from(12),
        RepaymentFrequency::Monthly,
        12,
    )
    .unwrap();
    assert!(compound > simple);
    // (1.01)^12 - 1 on $1000.00
    assert_eq!(compound, 12_683);
}

#[test]
fn term_months_is_consistent_across_modes() {
    assert_eq!(term_months(RepaymentFrequency::Weekly, 8), dec!(2.00));
    assert_eq!(term_months(RepaymentFrequency::Biweekly, 8), dec!(4.0));
    assert_eq!(term_months(RepaymentFrequency::Monthly, 8), dec!(8));
}

// ============================================================================
// Schedule splits
// ============================================================================

#[test]
fn reference_schedule_eleven_equal_plus_remainder() {
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

    // $93.33 for installments 1-11, $93.37 absorbs the remainder
    for line in &pricing.installments[..11] {
        assert_eq!(line.amount, 9_333);
    }
    assert_eq!(pricing.installments[11].amount, 9_337);

    let total: i64 = pricing.installments.iter().map(|l| l.amount).sum();
    assert_eq!(total, pricing.total_amount);
}

#[test]
fn components_sum_exactly_for_awkward_divisors() {
    for n in [1, 3, 7, 11, 13, 52] {
        let lines = build_schedule(99_991, 10_007, n).unwrap();
        assert_eq!(lines.len(), n as usize);

        let principal: i64 = lines.iter().map(|l| l.principal).sum();
        let interest: i64 = lines.iter().map(|l| l.interest).sum();
        let amount: i64 = lines.iter().map(|l| l.amount).sum();

        assert_eq!(principal, 99_991, "principal column must sum exactly (n={})", n);
        assert_eq!(interest, 10_007, "interest column must sum exactly (n={})", n);
        assert_eq!(amount, 109_998, "amount column must sum exactly (n={})", n);

        for line in &lines {
            assert_eq!(line.amount, line.principal + line.interest);
        }
    }
}

#[test]
fn zero_interest_schedule_is_pure_principal() {
    let lines = build_schedule(120_000, 0, 12).unwrap();
    for line in &lines {
        assert_eq!(line.interest, 0);
        assert_eq!(line.amount, line.principal);
    }
    let total: i64 = lines.iter().map(|l| l.amount).sum();
    assert_eq!(total, 120_000);
}

// ============================================================================
// Rate resolution chain
// ============================================================================

#[test]
fn lender_preference_rate_wins() {
    let resolved = resolve_interest_rate(Some(dec!(8.5)), Some(4), Decimal::from(12));
    assert_eq!(resolved.rate, dec!(8.5));
    assert_eq!(resolved.source, RateSource::LenderPreference);
}

#[test]
fn tier_policy_rate_is_second() {
    let resolved = resolve_interest_rate(None, Some(5), Decimal::from(12));
    assert_eq!(resolved.rate, Decimal::from(10));
    assert_eq!(resolved.source, RateSource::TierPolicy);
}

#[test]
fn platform_default_is_last_resort() {
    let resolved = resolve_interest_rate(None, None, dec!(12));
    assert_eq!(resolved.rate, dec!(12));
    assert_eq!(resolved.source, RateSource::PlatformDefault);
}
