//! Engine decision-logic tests
//!
//! Pure-logic coverage for the matching cascade, payment timing rules,
//! eligibility gates, and trust score monotonicity.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use uuid::Uuid;

use trustlend_server::config::EngineSettings;
use trustlend_server::models::{
    EligibilityReport, LenderPreference, LenderType, LoanMatch, MatchStatus, TrustEventType, User,
};
use trustlend_server::services::eligibility::{
    evaluate, lowest_repayment_ratio, tier_ceiling, LoanExposure,
};
use trustlend_server::services::matching::{
    candidate_score, eligible_candidates, next_pending_match, rank_candidates,
};
use trustlend_server::services::payments::{classify_timing, days_from_due, missed_penalty};
use trustlend_server::services::trust_score::{impact_for, score_from_impacts};

fn make_user() -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        email: None,
        name: None,
        trust_score: 50,
        payments_made: 0,
        payments_ontime: 0,
        payments_early: 0,
        payments_late: 0,
        payments_missed: 0,
        completed_loans: 1,
        borrowing_tier: 1,
        loans_at_current_tier: 0,
        is_blocked: false,
        debt_cleared_at: None,
        restriction_ends_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn make_pref(pool: i64, reserved: i64, received: i32, accepted: i32) -> LenderPreference {
    let now = Utc::now();
    LenderPreference {
        id: Uuid::new_v4(),
        lender_user_id: None,
        lender_business_id: Some(Uuid::new_v4()),
        max_amount: 500_000,
        first_time_borrower_limit: 100_000,
        allow_first_time_borrowers: true,
        interest_rate: None,
        capital_pool: pool,
        capital_reserved: reserved,
        offers_received: received,
        offers_accepted: accepted,
        active: true,
        created_at: now,
        updated_at: now,
    }
}

fn make_match(loan_id: Uuid, rank: i32, status: MatchStatus) -> LoanMatch {
    let now = Utc::now();
    LoanMatch {
        id: Uuid::new_v4(),
        loan_id,
        lender_user_id: Some(Uuid::new_v4()),
        lender_business_id: None,
        match_rank: rank,
        status,
        decline_reason: None,
        expires_at: now + Duration::hours(24),
        created_at: now,
        updated_at: now,
    }
}

fn exposure(amount: i64, paid: i64) -> LoanExposure {
    LoanExposure {
        loan_id: Uuid::new_v4(),
        amount,
        amount_paid: paid,
        amount_remaining: amount - paid,
    }
}

// ============================================================================
// Matching: ranking and cascade
// ============================================================================

#[test]
fn ranking_is_deterministic() {
    let prefs = vec![
        make_pref(1_000_000, 0, 10, 9),
        make_pref(200_000, 100_000, 10, 2),
        make_pref(500_000, 0, 0, 0),
    ];

    let first = rank_candidates(prefs.clone(), 100_000);
    let second = rank_candidates(prefs, 100_000);

    let ids_a: Vec<Uuid> = first.iter().map(|p| p.id).collect();
    let ids_b: Vec<Uuid> = second.iter().map(|p| p.id).collect();
    assert_eq!(ids_a, ids_b);
}

#[test]
fn more_free_capital_ranks_higher_at_equal_acceptance() {
    let rich = make_pref(1_000_000, 0, 10, 5);
    let poor = make_pref(150_000, 100_000, 10, 5);

    assert!(candidate_score(&rich, 100_000) > candidate_score(&poor, 100_000));

    let ranked = rank_candidates(vec![poor.clone(), rich.clone()], 100_000);
    assert_eq!(ranked[0].id, rich.id);
}

#[test]
fn first_time_borrowers_face_dedicated_limits() {
    let mut strict = make_pref(1_000_000, 0, 0, 0);
    strict.allow_first_time_borrowers = false;

    let mut capped = make_pref(1_000_000, 0, 0, 0);
    capped.first_time_borrower_limit = 50_000;

    let prefs = vec![strict.clone(), capped.clone()];

    // Repeat borrowers see both; first-timers only the one that allows
    // them, and only within its first-time limit.
    assert_eq!(eligible_candidates(&prefs, 100_000, false).len(), 2);
    assert_eq!(eligible_candidates(&prefs, 100_000, true).len(), 0);
    let first_time = eligible_candidates(&prefs, 40_000, true);
    assert_eq!(first_time.len(), 1);
    assert_eq!(first_time[0].id, capped.id);
}

#[test]
fn cascade_picks_exactly_the_next_lowest_rank() {
    let loan_id = Uuid::new_v4();
    let matches = vec![
        make_match(loan_id, 1, MatchStatus::Declined),
        make_match(loan_id, 3, MatchStatus::Pending),
        make_match(loan_id, 2, MatchStatus::Pending),
    ];

    let next = next_pending_match(&matches).expect("a pending match remains");
    assert_eq!(next.match_rank, 2);
}

#[test]
fn cascade_exhausts_to_none() {
    let loan_id = Uuid::new_v4();
    let matches = vec![
        make_match(loan_id, 1, MatchStatus::Declined),
        make_match(loan_id, 2, MatchStatus::Expired),
        make_match(loan_id, 3, MatchStatus::Skipped),
    ];

    assert!(next_pending_match(&matches).is_none());
}

// ============================================================================
// Payment timing and missed penalties
// ============================================================================

#[test]
fn timing_classification_boundaries() {
    assert_eq!(classify_timing(-10), TrustEventType::PaymentEarly);
    assert_eq!(classify_timing(-3), TrustEventType::PaymentEarly);
    assert_eq!(classify_timing(-2), TrustEventType::PaymentOntime);
    assert_eq!(classify_timing(-1), TrustEventType::PaymentOntime);
    assert_eq!(classify_timing(0), TrustEventType::PaymentOntime);
    assert_eq!(classify_timing(1), TrustEventType::PaymentLate);
}

#[test]
fn absent_due_date_is_on_time() {
    let now = Utc::now();
    assert_eq!(days_from_due(None, now), 0);
    assert_eq!(
        classify_timing(days_from_due(None, now)),
        TrustEventType::PaymentOntime
    );
}

#[test]
fn missed_penalties_escalate() {
    let (t30, p30, _) = missed_penalty(45);
    let (t14, p14, _) = missed_penalty(20);
    let (t7, p7, _) = missed_penalty(10);
    let (t3, p3, _) = missed_penalty(1);

    assert_eq!(t30, TrustEventType::PaymentMissed);
    assert_eq!(t14, TrustEventType::PaymentLate);
    assert_eq!(t7, TrustEventType::PaymentLate);
    assert_eq!(t3, TrustEventType::PaymentLate);

    assert!(p30 < p14 && p14 < p7 && p7 < p3);
    assert_eq!((p30, p14, p7, p3), (-15, -8, -5, -3));
}

#[test]
fn each_missed_bracket_has_its_own_idempotency_family() {
    let (_, _, f30) = missed_penalty(31);
    let (_, _, f14) = missed_penalty(15);
    let (_, _, f7) = missed_penalty(8);
    let (_, _, f3) = missed_penalty(7);

    let families = [f30, f14, f7, f3];
    for (i, a) in families.iter().enumerate() {
        for b in families.iter().skip(i + 1) {
            assert_ne!(a, b);
        }
    }
}

// ============================================================================
// Trust score monotonicity
// ============================================================================

#[test]
fn clean_history_scores_at_least_as_high_as_one_with_a_miss() {
    let clean: i64 = (0..10)
        .map(|_| impact_for(TrustEventType::PaymentOntime) as i64)
        .sum::<i64>()
        + impact_for(TrustEventType::LoanCompleted) as i64;

    let with_miss = clean + impact_for(TrustEventType::PaymentMissed) as i64;

    assert!(score_from_impacts(clean) >= score_from_impacts(with_miss));
}

#[test]
fn extra_positive_history_never_hurts() {
    let base: i64 = impact_for(TrustEventType::PaymentOntime) as i64 * 3;
    for extra in [
        TrustEventType::PaymentEarly,
        TrustEventType::PaymentOntime,
        TrustEventType::LoanCompleted,
        TrustEventType::FirstLoanCompleted,
    ] {
        let grown = base + impact_for(extra) as i64;
        assert!(score_from_impacts(grown) >= score_from_impacts(base));
    }
}

// ============================================================================
// Eligibility
// ============================================================================

#[test]
fn repayment_threshold_boundary_is_inclusive() {
    let user = make_user();
    let settings = EngineSettings::default();
    let now = Utc::now();

    // 74.99% paid: denied, with the one-cent shortfall reported
    let below = evaluate(
        &user,
        &[exposure(10_000, 7_499)],
        &[],
        LenderType::Business,
        Some(5_000),
        &settings,
        now,
    );
    assert!(!below.can_borrow);
    assert_eq!(below.required_payment, Some(1));

    // Exactly 75.00% paid: permitted
    let at = evaluate(
        &user,
        &[exposure(10_000, 7_500)],
        &[make_pref(1_000_000, 0, 0, 0)],
        LenderType::Business,
        Some(5_000),
        &settings,
        now,
    );
    assert!(at.can_borrow);
}

#[test]
fn worst_loan_governs_the_threshold() {
    let loans = vec![exposure(10_000, 9_900), exposure(20_000, 1_000)];
    let (worst, ratio) = lowest_repayment_ratio(&loans).unwrap();
    assert_eq!(worst.amount, 20_000);
    assert_eq!(ratio, Decimal::new(5, 2));
}

#[test]
fn blocked_borrower_is_denied_with_outstanding_debt() {
    let mut user = make_user();
    user.is_blocked = true;

    let report = evaluate(
        &user,
        &[exposure(10_000, 8_000)],
        &[],
        LenderType::Personal,
        None,
        &EngineSettings::default(),
        Utc::now(),
    );

    assert!(!report.can_borrow);
    assert!(report.reason.as_deref().unwrap().contains("2000"));
}

#[test]
fn restriction_window_reports_days_remaining() {
    let now = Utc::now();
    let mut user = make_user();
    user.debt_cleared_at = Some(now - Duration::days(10));
    user.restriction_ends_at = Some(now + Duration::days(5));

    let report = evaluate(
        &user,
        &[],
        &[],
        LenderType::Personal,
        None,
        &EngineSettings::default(),
        now,
    );

    assert!(!report.can_borrow);
    assert!(report.reason.as_deref().unwrap().contains("5"));
}

#[test]
fn personal_tier_ceiling_minus_outstanding() {
    let mut user = make_user();
    user.borrowing_tier = 2; // $1000.00 ceiling

    let report = evaluate(
        &user,
        &[exposure(40_000, 40_000)],
        &[],
        LenderType::Personal,
        Some(50_000),
        &EngineSettings::default(),
        Utc::now(),
    );

    // Fully-paid open loan still counts zero outstanding
    assert!(report.can_borrow);
    assert_eq!(report.max_amount, Some(100_000));
    assert_eq!(report.available_amount, Some(100_000));
}

#[test]
fn tier_six_is_unlimited() {
    assert_eq!(tier_ceiling(6), None);

    let mut user = make_user();
    user.borrowing_tier = 6;

    let report = evaluate(
        &user,
        &[],
        &[],
        LenderType::Personal,
        Some(100_000_000),
        &EngineSettings::default(),
        Utc::now(),
    );
    assert!(report.can_borrow);
    assert_eq!(report.max_amount, None);
}

#[test]
fn business_limit_is_best_of_accepting_lenders() {
    let mut small = make_pref(1_000_000, 0, 0, 0);
    small.max_amount = 100_000;
    let mut large = make_pref(1_000_000, 0, 0, 0);
    large.max_amount = 400_000;

    let user = make_user();
    let report = evaluate(
        &user,
        &[],
        &[small, large],
        LenderType::Business,
        Some(300_000),
        &EngineSettings::default(),
        Utc::now(),
    );

    assert!(report.can_borrow);
    assert_eq!(report.max_amount, Some(400_000));
}

#[test]
fn business_denial_when_no_lender_accepts() {
    let user = make_user();
    let report: EligibilityReport = evaluate(
        &user,
        &[],
        &[],
        LenderType::Business,
        Some(10_000),
        &EngineSettings::default(),
        Utc::now(),
    );

    assert!(!report.can_borrow);
    assert!(report.reason.is_some());
}
