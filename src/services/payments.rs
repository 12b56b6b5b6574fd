//! Payment Completion Handler
//!
//! The single choke point every payment-success path goes through:
//! provider webhooks, the missed-payment sweep, and manual proof
//! confirmation. Safe to invoke any number of times for the same logical
//! payment; the store's unique indexes on trust events are the
//! authoritative guards, and every balance or capital move is expressed as
//! a relative delta in SQL.
//!
//! Sub-step failures (trust, stats, voucher, capital, notifications) are
//! logged and never abort the handler: the money has already moved, and
//! each leg is independently retryable by re-invoking with the same
//! arguments.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    Loan, LoanStatus, NotificationKind, PaymentCompletionOutcome, PaymentScheduleEntry,
    TrustEventType, User,
};
use crate::services::notifications::NotificationService;
use crate::services::trust_score::{
    impact_for, NewTrustEvent, TrustScoreService, FAMILY_LOAN_COMPLETION, FAMILY_PAYMENT_FAILED,
    FAMILY_PAYMENT_TIMING,
};
use crate::services::voucher::VoucherService;

/// Days-early threshold separating "early" from "on time"
const EARLY_THRESHOLD_DAYS: i64 = -2;

/// Classify a payment by its distance from the due date in days:
/// more than two days early, on time (within two days early through the
/// due date), or late.
pub fn classify_timing(days_from_due: i64) -> TrustEventType {
    if days_from_due < EARLY_THRESHOLD_DAYS {
        TrustEventType::PaymentEarly
    } else if days_from_due <= 0 {
        TrustEventType::PaymentOntime
    } else {
        TrustEventType::PaymentLate
    }
}

/// Whole days between the due date and the payment date; a payment with no
/// due date counts as on time.
pub fn days_from_due(due_date: Option<DateTime<Utc>>, paid_date: DateTime<Utc>) -> i64 {
    due_date.map(|due| (paid_date - due).num_days()).unwrap_or(0)
}

/// Penalty for a missed payment, scaled by how overdue it is. Returns the
/// event type, score impact, and the idempotency family (bracketed so each
/// escalation level fires at most once per payment).
pub fn missed_penalty(days_overdue: i64) -> (TrustEventType, i32, &'static str) {
    if days_overdue > 30 {
        (TrustEventType::PaymentMissed, -15, "payment_missed_30")
    } else if days_overdue > 14 {
        (TrustEventType::PaymentLate, -8, "payment_missed_14")
    } else if days_overdue > 7 {
        (TrustEventType::PaymentLate, -5, "payment_missed_7")
    } else {
        (TrustEventType::PaymentLate, -3, "payment_missed_3")
    }
}

/// Everything the handler needs to know about one successful payment
#[derive(Debug, Clone)]
pub struct PaymentCompletedCommand {
    pub loan_id: Uuid,
    pub borrower_id: Uuid,
    pub payment_id: Uuid,
    /// Amount moved, cents
    pub amount: i64,
    pub due_date: Option<DateTime<Utc>>,
    pub paid_date: Option<DateTime<Utc>>,
    /// Set when the caller already updated the borrower's aggregate
    /// counters, to avoid double counting
    pub skip_user_stats: bool,
}

/// Payment completion service
#[derive(Clone)]
pub struct PaymentService {
    db_pool: PgPool,
    trust: TrustScoreService,
    voucher: VoucherService,
    notifications: NotificationService,
    settings: EngineSettings,
}

impl PaymentService {
    pub fn new(
        db_pool: PgPool,
        trust: TrustScoreService,
        voucher: VoucherService,
        notifications: NotificationService,
        settings: EngineSettings,
    ) -> Self {
        Self {
            db_pool,
            trust,
            voucher,
            notifications,
            settings,
        }
    }

    /// Apply one successful payment. Idempotent end to end: the schedule
    /// entry flip guards the balance update, the timing-event unique index
    /// guards reputation and stats, and the completion-event unique index
    /// guards the completion pipeline.
    pub async fn on_payment_completed(
        &self,
        cmd: PaymentCompletedCommand,
    ) -> ApiResult<PaymentCompletionOutcome> {
        let paid_date = cmd.paid_date.unwrap_or_else(Utc::now);

        let entry = sqlx::query_as::<_, PaymentScheduleEntry>(
            "SELECT * FROM payment_schedule_entries WHERE id = $1 AND loan_id = $2",
        )
        .bind(cmd.payment_id)
        .bind(cmd.loan_id)
        .fetch_optional(&self.db_pool)
        .await?;

        let due_date = cmd.due_date.or(entry.as_ref().map(|e| e.due_date));

        // Apply the money exactly once: the entry flip and the balance
        // delta commit together, so `amount_remaining` always equals
        // `total_amount - amount_paid`.
        if entry.is_some() {
            let mut tx = self.db_pool.begin().await?;

            let applied = sqlx::query(
                r#"
                UPDATE payment_schedule_entries
                SET is_paid = TRUE, status = 'paid', paid_at = $3
                WHERE id = $1 AND loan_id = $2 AND is_paid = FALSE
                "#,
            )
            .bind(cmd.payment_id)
            .bind(cmd.loan_id)
            .bind(paid_date)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                > 0;

            if applied {
                sqlx::query(
                    r#"
                    UPDATE loans
                    SET amount_paid = amount_paid + $2,
                        amount_remaining = amount_remaining - $2,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(cmd.loan_id)
                .bind(cmd.amount)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
        } else {
            tracing::warn!(
                loan_id = %cmd.loan_id,
                payment_id = %cmd.payment_id,
                "Payment references no schedule entry; balances untouched"
            );
        }

        // Fast-path duplicate detection; the unique index below remains
        // the authority under races.
        let duplicate_event = self
            .trust
            .has_payment_timing_event(cmd.borrower_id, cmd.loan_id, cmd.payment_id)
            .await?;

        let days = days_from_due(due_date, paid_date);
        let mut trust_score_updated = false;

        if !duplicate_event {
            let event_type = classify_timing(days);
            match self
                .trust
                .record_event(NewTrustEvent {
                    user_id: cmd.borrower_id,
                    loan_id: Some(cmd.loan_id),
                    payment_id: Some(cmd.payment_id),
                    event_type,
                    event_family: FAMILY_PAYMENT_TIMING.to_string(),
                    score_impact: impact_for(event_type),
                })
                .await
            {
                Ok(inserted) => {
                    trust_score_updated = inserted;
                    if inserted {
                        // Awaited: the voucher pipeline must be durable
                        // before we return to the caller.
                        if let Err(e) = self
                            .voucher
                            .on_vouchee_payment_made(cmd.borrower_id, cmd.loan_id, days)
                            .await
                        {
                            tracing::error!(
                                loan_id = %cmd.loan_id,
                                error = %e,
                                "Voucher payment-made hook failed"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(
                        loan_id = %cmd.loan_id,
                        payment_id = %cmd.payment_id,
                        error = %e,
                        "Failed to record payment timing event"
                    );
                }
            }
        }

        if trust_score_updated && !cmd.skip_user_stats {
            if let Err(e) = self
                .update_borrower_stats(cmd.borrower_id, classify_timing(days))
                .await
            {
                tracing::error!(
                    borrower_id = %cmd.borrower_id,
                    error = %e,
                    "Failed to update borrower payment counters"
                );
            }
        }

        let loan = self.get_loan(cmd.loan_id).await?;
        let loan_completed = self.detect_and_complete(&loan, cmd.borrower_id).await?;

        // Recompute after a completion so the caller sees the bonus
        // immediately; otherwise the cache is fine.
        let new_score = if loan_completed {
            self.trust.recalculate(cmd.borrower_id).await?
        } else {
            self.trust.get_score(cmd.borrower_id).await?
        };

        if trust_score_updated {
            self.notifications
                .notify(
                    cmd.borrower_id,
                    NotificationKind::PaymentReceived,
                    "Your payment has been received",
                )
                .await;
        }

        Ok(PaymentCompletionOutcome {
            trust_score_updated,
            loan_completed,
            new_score,
            duplicate_event,
        })
    }

    /// Record a failed money movement. Non-fatal, fixed penalty; repeated
    /// provider retries for the same payment collapse into one event.
    pub async fn on_payment_failed(
        &self,
        loan_id: Uuid,
        borrower_id: Uuid,
        payment_id: Uuid,
    ) -> ApiResult<bool> {
        let inserted = self
            .trust
            .record_event(NewTrustEvent {
                user_id: borrower_id,
                loan_id: Some(loan_id),
                payment_id: Some(payment_id),
                event_type: TrustEventType::PaymentFailed,
                event_family: FAMILY_PAYMENT_FAILED.to_string(),
                score_impact: impact_for(TrustEventType::PaymentFailed),
            })
            .await?;

        if inserted {
            tracing::info!(
                loan_id = %loan_id,
                payment_id = %payment_id,
                "Payment failure recorded"
            );
        }

        Ok(inserted)
    }

    /// Penalize a payment past its due date with no money received. The
    /// penalty escalates with lateness; each escalation bracket fires at
    /// most once per payment.
    pub async fn on_payment_missed(
        &self,
        loan_id: Uuid,
        borrower_id: Uuid,
        payment_id: Uuid,
        days_overdue: i64,
    ) -> ApiResult<bool> {
        let (event_type, impact, family) = missed_penalty(days_overdue);

        let inserted = self
            .trust
            .record_event(NewTrustEvent {
                user_id: borrower_id,
                loan_id: Some(loan_id),
                payment_id: Some(payment_id),
                event_type,
                event_family: family.to_string(),
                score_impact: impact,
            })
            .await?;

        if inserted {
            if let Err(e) = sqlx::query(
                r#"
                UPDATE payment_schedule_entries
                SET status = 'overdue'
                WHERE id = $1 AND is_paid = FALSE
                "#,
            )
            .bind(payment_id)
            .execute(&self.db_pool)
            .await
            {
                tracing::error!(payment_id = %payment_id, error = %e, "Failed to flag overdue entry");
            }

            if let Err(e) = sqlx::query(
                "UPDATE users SET payments_missed = payments_missed + 1, updated_at = NOW() WHERE id = $1",
            )
            .bind(borrower_id)
            .execute(&self.db_pool)
            .await
            {
                tracing::error!(borrower_id = %borrower_id, error = %e, "Failed to update missed counter");
            }

            self.notifications
                .notify(
                    borrower_id,
                    NotificationKind::PaymentOverdue,
                    "You have an overdue loan payment",
                )
                .await;

            tracing::info!(
                loan_id = %loan_id,
                payment_id = %payment_id,
                days_overdue,
                score_impact = impact,
                "Missed payment penalty recorded"
            );
        }

        Ok(inserted)
    }

    /// Scheduler entry point: penalize every unpaid schedule entry past
    /// its due date on active loans. Returns the number of new penalties.
    pub async fn sweep_missed_payments(&self) -> ApiResult<u64> {
        let overdue = sqlx::query_as::<_, (Uuid, Uuid, Uuid, DateTime<Utc>)>(
            r#"
            SELECT e.id, e.loan_id, l.borrower_id, e.due_date
            FROM payment_schedule_entries e
            JOIN loans l ON l.id = e.loan_id
            WHERE e.is_paid = FALSE AND e.due_date < NOW() AND l.status = 'active'
            "#,
        )
        .fetch_all(&self.db_pool)
        .await?;

        let now = Utc::now();
        let mut penalized = 0u64;

        for (payment_id, loan_id, borrower_id, due_date) in overdue {
            let days_overdue = (now - due_date).num_days();
            match self
                .on_payment_missed(loan_id, borrower_id, payment_id, days_overdue)
                .await
            {
                Ok(true) => penalized += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        loan_id = %loan_id,
                        payment_id = %payment_id,
                        error = %e,
                        "Missed-payment penalty failed"
                    );
                }
            }
        }

        Ok(penalized)
    }

    // ===== Private helpers =====

    /// Detect completion and, at most once per loan, run the completion
    /// pipeline. Returns true when the completion happened on this call.
    async fn detect_and_complete(&self, loan: &Loan, borrower_id: Uuid) -> ApiResult<bool> {
        let (unpaid,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM payment_schedule_entries WHERE loan_id = $1 AND is_paid = FALSE",
        )
        .bind(loan.id)
        .fetch_one(&self.db_pool)
        .await?;

        let complete =
            unpaid == 0 || loan.amount_remaining <= 0 || loan.status == LoanStatus::Completed;

        if !complete {
            return Ok(false);
        }

        if self.trust.has_completion_event(borrower_id, loan.id).await? {
            return Ok(false);
        }

        self.complete_loan(loan, borrower_id).await
    }

    /// The completion pipeline. The completion trust event's unique index
    /// is the authoritative once-only guard; everything after it is best
    /// effort and independently retryable.
    async fn complete_loan(&self, loan: &Loan, borrower_id: Uuid) -> ApiResult<bool> {
        let borrower = self.get_user(borrower_id).await?;

        let event_type = if borrower.completed_loans == 0 {
            TrustEventType::FirstLoanCompleted
        } else {
            TrustEventType::LoanCompleted
        };

        let inserted = self
            .trust
            .record_event(NewTrustEvent {
                user_id: borrower_id,
                loan_id: Some(loan.id),
                payment_id: None,
                event_type,
                event_family: FAMILY_LOAN_COMPLETION.to_string(),
                score_impact: impact_for(event_type),
            })
            .await?;

        if !inserted {
            // A concurrent invocation won the completion race.
            return Ok(false);
        }

        if let Err(e) = sqlx::query(
            r#"
            UPDATE loans
            SET status = 'completed', updated_at = NOW()
            WHERE id = $1 AND status != 'completed'
            "#,
        )
        .bind(loan.id)
        .execute(&self.db_pool)
        .await
        {
            tracing::error!(loan_id = %loan.id, error = %e, "Failed to mark loan completed");
        }

        if let Some(business_id) = loan.business_lender_id {
            if let Err(e) = sqlx::query(
                r#"
                INSERT INTO business_borrower_trust
                    (id, business_id, borrower_id, loans_completed, created_at, updated_at)
                VALUES ($1, $2, $3, 1, NOW(), NOW())
                ON CONFLICT (business_id, borrower_id)
                DO UPDATE SET loans_completed = business_borrower_trust.loans_completed + 1,
                              updated_at = NOW()
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(business_id)
            .bind(borrower_id)
            .execute(&self.db_pool)
            .await
            {
                tracing::error!(loan_id = %loan.id, error = %e, "Failed to update business trust");
            }
        }

        // Awaited: the completion is not durable for vouchers until this
        // returns.
        if let Err(e) = self
            .voucher
            .on_vouchee_loan_completed(borrower_id, loan.id)
            .await
        {
            tracing::error!(loan_id = %loan.id, error = %e, "Voucher completion pipeline failed");
        }

        self.release_lender_capital(loan).await;

        if let Err(e) = sqlx::query(
            r#"
            UPDATE users
            SET completed_loans = completed_loans + 1,
                borrowing_tier = CASE
                    WHEN loans_at_current_tier + 1 >= $2 AND borrowing_tier < 6
                    THEN borrowing_tier + 1 ELSE borrowing_tier END,
                loans_at_current_tier = CASE
                    WHEN loans_at_current_tier + 1 >= $2 AND borrowing_tier < 6
                    THEN 0 ELSE loans_at_current_tier + 1 END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(borrower_id)
        .bind(self.settings.loans_per_tier)
        .execute(&self.db_pool)
        .await
        {
            tracing::error!(borrower_id = %borrower_id, error = %e, "Failed to update completion counters");
        }

        self.notifications
            .notify(
                borrower_id,
                NotificationKind::LoanCompleted,
                "Congratulations, your loan is fully repaid",
            )
            .await;

        if let Some(lender) = loan.funding_lender() {
            let lender_id = match lender {
                crate::models::LenderActor::User(id) => id,
                crate::models::LenderActor::Business(id) => id,
            };
            self.notifications
                .notify(
                    lender_id,
                    NotificationKind::LoanCompleted,
                    "A loan you funded has been repaid in full",
                )
                .await;
        }

        tracing::info!(
            loan_id = %loan.id,
            borrower_id = %borrower_id,
            event_type = ?event_type,
            "Loan completed"
        );

        Ok(true)
    }

    /// Return the lender's reserved principal and credit the realized
    /// interest into the pool, as one atomic delta.
    async fn release_lender_capital(&self, loan: &Loan) {
        let result = match (loan.lender_id, loan.business_lender_id) {
            (Some(user_id), _) => {
                sqlx::query(
                    r#"
                    UPDATE lender_preferences
                    SET capital_reserved = GREATEST(capital_reserved - $2, 0),
                        capital_pool = capital_pool + $3,
                        updated_at = NOW()
                    WHERE lender_user_id = $1
                    "#,
                )
                .bind(user_id)
                .bind(loan.amount)
                .bind(loan.total_interest)
                .execute(&self.db_pool)
                .await
            }
            (None, Some(business_id)) => {
                sqlx::query(
                    r#"
                    UPDATE lender_preferences
                    SET capital_reserved = GREATEST(capital_reserved - $2, 0),
                        capital_pool = capital_pool + $3,
                        updated_at = NOW()
                    WHERE lender_business_id = $1
                    "#,
                )
                .bind(business_id)
                .bind(loan.amount)
                .bind(loan.total_interest)
                .execute(&self.db_pool)
                .await
            }
            (None, None) => return,
        };

        if let Err(e) = result {
            tracing::error!(loan_id = %loan.id, error = %e, "Failed to release lender capital");
        }
    }

    async fn update_borrower_stats(
        &self,
        borrower_id: Uuid,
        event_type: TrustEventType,
    ) -> Result<(), sqlx::Error> {
        let bucket = match event_type {
            TrustEventType::PaymentEarly => "early",
            TrustEventType::PaymentOntime => "ontime",
            _ => "late",
        };

        sqlx::query(
            r#"
            UPDATE users
            SET payments_made = payments_made + 1,
                payments_early = payments_early + CASE WHEN $2 = 'early' THEN 1 ELSE 0 END,
                payments_ontime = payments_ontime + CASE WHEN $2 = 'ontime' THEN 1 ELSE 0 END,
                payments_late = payments_late + CASE WHEN $2 = 'late' THEN 1 ELSE 0 END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(borrower_id)
        .bind(bucket)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    async fn get_loan(&self, loan_id: Uuid) -> ApiResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(loan_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Loan {} not found", loan_id)))
    }

    async fn get_user(&self, user_id: Uuid) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("User {} not found", user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_boundaries() {
        assert_eq!(classify_timing(-3), TrustEventType::PaymentEarly);
        assert_eq!(classify_timing(-2), TrustEventType::PaymentOntime);
        assert_eq!(classify_timing(0), TrustEventType::PaymentOntime);
        assert_eq!(classify_timing(1), TrustEventType::PaymentLate);
    }

    #[test]
    fn missing_due_date_counts_as_on_time() {
        assert_eq!(days_from_due(None, Utc::now()), 0);
    }

    #[test]
    fn missed_penalty_scales_with_lateness() {
        assert_eq!(
            missed_penalty(31),
            (TrustEventType::PaymentMissed, -15, "payment_missed_30")
        );
        assert_eq!(
            missed_penalty(15),
            (TrustEventType::PaymentLate, -8, "payment_missed_14")
        );
        assert_eq!(
            missed_penalty(8),
            (TrustEventType::PaymentLate, -5, "payment_missed_7")
        );
        assert_eq!(
            missed_penalty(2),
            (TrustEventType::PaymentLate, -3, "payment_missed_3")
        );
    }
}
