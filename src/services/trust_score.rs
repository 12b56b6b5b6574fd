//! Trust Score Service
//!
//! Maintains the borrower's 0-100 reputation score as an append-only event
//! log plus a cached column on the user row. Event inserts go through
//! `ON CONFLICT DO NOTHING` against the store's unique indexes, which are
//! the authoritative de-duplication mechanism; the in-code existence checks
//! are only a fast path to skip redundant work.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::TrustEventType;

// ============================================================================
// Scoring Constants
// ============================================================================

/// Score every user starts from
pub const BASELINE_SCORE: i32 = 50;

/// Score bounds
pub const MIN_SCORE: i32 = 0;
pub const MAX_SCORE: i32 = 100;

/// Event impacts. Positive history events never decrease the score and
/// missed/failed events never increase it; the clamp preserves that.
pub const IMPACT_PAYMENT_EARLY: i32 = 3;
pub const IMPACT_PAYMENT_ONTIME: i32 = 2;
pub const IMPACT_PAYMENT_LATE: i32 = -2;
pub const IMPACT_PAYMENT_MISSED: i32 = -15;
pub const IMPACT_PAYMENT_FAILED: i32 = -5;
pub const IMPACT_LOAN_COMPLETED: i32 = 10;
pub const IMPACT_FIRST_LOAN_COMPLETED: i32 = 15;
pub const IMPACT_VOUCH_RECEIVED: i32 = 2;
pub const IMPACT_VOUCHEE_LOAN_COMPLETED: i32 = 3;

// Event families scope the store-level uniqueness guarantees.
pub const FAMILY_PAYMENT_TIMING: &str = "payment_timing";
pub const FAMILY_LOAN_COMPLETION: &str = "loan_completion";
pub const FAMILY_PAYMENT_FAILED: &str = "payment_failed";
pub const FAMILY_VOUCH: &str = "vouch";
pub const FAMILY_VOUCH_COMPLETION: &str = "vouch_completion";

/// Clamped score for a summed event-impact total.
pub fn score_from_impacts(total_impact: i64) -> i32 {
    let raw = BASELINE_SCORE as i64 + total_impact;
    raw.clamp(MIN_SCORE as i64, MAX_SCORE as i64) as i32
}

/// Baseline impact for an event type.
pub fn impact_for(event_type: TrustEventType) -> i32 {
    match event_type {
        TrustEventType::PaymentEarly => IMPACT_PAYMENT_EARLY,
        TrustEventType::PaymentOntime => IMPACT_PAYMENT_ONTIME,
        TrustEventType::PaymentLate => IMPACT_PAYMENT_LATE,
        TrustEventType::PaymentMissed => IMPACT_PAYMENT_MISSED,
        TrustEventType::PaymentFailed => IMPACT_PAYMENT_FAILED,
        TrustEventType::LoanCompleted => IMPACT_LOAN_COMPLETED,
        TrustEventType::FirstLoanCompleted => IMPACT_FIRST_LOAN_COMPLETED,
        TrustEventType::VouchReceived => IMPACT_VOUCH_RECEIVED,
        TrustEventType::VoucheePayment => 1,
        TrustEventType::VoucheeLoanCompleted => IMPACT_VOUCHEE_LOAN_COMPLETED,
    }
}

/// A trust event about to be recorded
#[derive(Debug, Clone)]
pub struct NewTrustEvent {
    pub user_id: Uuid,
    pub loan_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub event_type: TrustEventType,
    pub event_family: String,
    pub score_impact: i32,
}

/// Trust score service
#[derive(Clone)]
pub struct TrustScoreService {
    db_pool: PgPool,
}

impl TrustScoreService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Cached score for a user.
    pub async fn get_score(&self, user_id: Uuid) -> ApiResult<i32> {
        let (score,): (i32,) =
            sqlx::query_as("SELECT trust_score FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.db_pool)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("User {} not found", user_id)))?;

        Ok(score)
    }

    /// Full rebuild from the event log, refreshing the cached column.
    ///
    /// Used right after a loan completes so callers observe the completion
    /// bonus immediately instead of a stale cache.
    pub async fn recalculate(&self, user_id: Uuid) -> ApiResult<i32> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(score_impact), 0)::BIGINT FROM trust_score_events WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.db_pool)
        .await?;

        let score = score_from_impacts(total);

        sqlx::query("UPDATE users SET trust_score = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(score)
            .execute(&self.db_pool)
            .await?;

        tracing::debug!(user_id = %user_id, score, "Trust score recalculated");

        Ok(score)
    }

    /// Fast-path check: has a payment-timing event already been recorded
    /// for this (user, loan, payment)?
    pub async fn has_payment_timing_event(
        &self,
        user_id: Uuid,
        loan_id: Uuid,
        payment_id: Uuid,
    ) -> ApiResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM trust_score_events
                WHERE user_id = $1 AND loan_id = $2 AND payment_id = $3
                  AND event_family = $4
            )
            "#,
        )
        .bind(user_id)
        .bind(loan_id)
        .bind(payment_id)
        .bind(FAMILY_PAYMENT_TIMING)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(exists)
    }

    /// Fast-path check: has this loan's completion already been recorded
    /// for the user?
    pub async fn has_completion_event(&self, user_id: Uuid, loan_id: Uuid) -> ApiResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM trust_score_events
                WHERE user_id = $1 AND loan_id = $2 AND payment_id IS NULL
                  AND event_family = $3
            )
            "#,
        )
        .bind(user_id)
        .bind(loan_id)
        .bind(FAMILY_LOAN_COMPLETION)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(exists)
    }

    /// Record an event. Returns true when a row was actually written; a
    /// duplicate keyed insert is swallowed by the unique index and returns
    /// false. The cached score moves only on a genuine insert.
    pub async fn record_event(&self, event: NewTrustEvent) -> ApiResult<bool> {
        let inserted = match event.payment_id {
            Some(payment_id) => {
                sqlx::query(
                    r#"
                    INSERT INTO trust_score_events
                        (id, user_id, loan_id, payment_id, event_type, event_family, score_impact, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                    ON CONFLICT (user_id, loan_id, payment_id, event_family)
                        WHERE payment_id IS NOT NULL
                    DO NOTHING
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(event.user_id)
                .bind(event.loan_id)
                .bind(payment_id)
                .bind(event.event_type)
                .bind(&event.event_family)
                .bind(event.score_impact)
                .execute(&self.db_pool)
                .await?
                .rows_affected()
                    > 0
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO trust_score_events
                        (id, user_id, loan_id, payment_id, event_type, event_family, score_impact, created_at)
                    VALUES ($1, $2, $3, NULL, $4, $5, $6, NOW())
                    ON CONFLICT (user_id, loan_id, event_family)
                        WHERE payment_id IS NULL
                    DO NOTHING
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(event.user_id)
                .bind(event.loan_id)
                .bind(event.event_type)
                .bind(&event.event_family)
                .bind(event.score_impact)
                .execute(&self.db_pool)
                .await?
                .rows_affected()
                    > 0
            }
        };

        if inserted {
            sqlx::query(
                r#"
                UPDATE users
                SET trust_score = LEAST($3, GREATEST($4, trust_score + $2)),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(event.user_id)
            .bind(event.score_impact)
            .bind(MAX_SCORE)
            .bind(MIN_SCORE)
            .execute(&self.db_pool)
            .await?;

            tracing::info!(
                user_id = %event.user_id,
                loan_id = ?event.loan_id,
                payment_id = ?event.payment_id,
                event_type = ?event.event_type,
                score_impact = event.score_impact,
                "Trust score event recorded"
            );
        } else {
            tracing::debug!(
                user_id = %event.user_id,
                loan_id = ?event.loan_id,
                payment_id = ?event.payment_id,
                event_type = ?event.event_type,
                "Duplicate trust score event skipped"
            );
        }

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_clamped_to_bounds() {
        assert_eq!(score_from_impacts(0), BASELINE_SCORE);
        assert_eq!(score_from_impacts(1000), MAX_SCORE);
        assert_eq!(score_from_impacts(-1000), MIN_SCORE);
    }

    #[test]
    fn positive_events_never_lower_the_score() {
        let history = [IMPACT_PAYMENT_ONTIME, IMPACT_PAYMENT_EARLY, IMPACT_LOAN_COMPLETED];
        let base: i64 = history.iter().map(|i| *i as i64).sum();
        let with_extra = base + IMPACT_PAYMENT_ONTIME as i64;
        assert!(score_from_impacts(with_extra) >= score_from_impacts(base));
    }

    #[test]
    fn missed_payments_never_raise_the_score() {
        let base: i64 = (IMPACT_PAYMENT_ONTIME * 5) as i64;
        let with_missed = base + impact_for(TrustEventType::PaymentMissed) as i64;
        assert!(score_from_impacts(with_missed) <= score_from_impacts(base));
    }

    #[test]
    fn completion_bonuses_are_positive() {
        assert!(impact_for(TrustEventType::LoanCompleted) > 0);
        assert!(
            impact_for(TrustEventType::FirstLoanCompleted)
                > impact_for(TrustEventType::LoanCompleted)
        );
    }
}
