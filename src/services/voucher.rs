//! Voucher Accountability Module
//!
//! Third parties who vouch for a borrower share in the outcome of that
//! borrower's loans. The `voucher_loan_links` table (unique per
//! voucher/loan pair) makes the active-loan counter idempotent no matter
//! how many acceptance code paths invoke the hook.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{TrustEventType, VoucherRecord};
use crate::services::trust_score::{
    impact_for, NewTrustEvent, TrustScoreService, FAMILY_VOUCH, FAMILY_VOUCH_COMPLETION,
};

/// Standing deltas applied to a voucher from vouchee behavior
const STANDING_PAYMENT_REWARD: i32 = 1;
const STANDING_LATE_PENALTY: i32 = -1;
const STANDING_COMPLETION_REWARD: i32 = 5;

/// Outcome of a vouchee loan completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoucherCompletionOutcome {
    /// Vouchers whose counters moved on this call
    pub vouchers_updated: u32,
}

/// Voucher accountability service
#[derive(Clone)]
pub struct VoucherService {
    db_pool: PgPool,
    trust: TrustScoreService,
}

impl VoucherService {
    pub fn new(db_pool: PgPool, trust: TrustScoreService) -> Self {
        Self { db_pool, trust }
    }

    /// Record a vouch and reward the vouchee's trust score.
    pub async fn create_vouch(
        &self,
        voucher_user_id: Uuid,
        vouchee_user_id: Uuid,
    ) -> ApiResult<VoucherRecord> {
        if voucher_user_id == vouchee_user_id {
            return Err(ApiError::Validation(
                "A user cannot vouch for themselves".to_string(),
            ));
        }

        let record = sqlx::query_as::<_, VoucherRecord>(
            r#"
            INSERT INTO voucher_records
                (id, voucher_user_id, vouchee_user_id, loans_active, loans_completed,
                 standing, active, created_at, updated_at)
            VALUES ($1, $2, $3, 0, 0, 0, TRUE, NOW(), NOW())
            ON CONFLICT (voucher_user_id, vouchee_user_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(voucher_user_id)
        .bind(vouchee_user_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| {
            ApiError::Conflict(format!(
                "User {} already vouches for {}",
                voucher_user_id, vouchee_user_id
            ))
        })?;

        // Vouchee gains reputation for the endorsement. The unique
        // (voucher, vouchee) pair above already blocks double submission.
        self.trust
            .record_event(NewTrustEvent {
                user_id: vouchee_user_id,
                loan_id: None,
                payment_id: None,
                event_type: TrustEventType::VouchReceived,
                event_family: FAMILY_VOUCH.to_string(),
                score_impact: impact_for(TrustEventType::VouchReceived),
            })
            .await?;

        tracing::info!(
            voucher = %voucher_user_id,
            vouchee = %vouchee_user_id,
            "Vouch recorded"
        );

        Ok(record)
    }

    /// Active vouchers standing behind a borrower.
    pub async fn vouchers_for(&self, vouchee_user_id: Uuid) -> ApiResult<Vec<VoucherRecord>> {
        let records = sqlx::query_as::<_, VoucherRecord>(
            "SELECT * FROM voucher_records WHERE vouchee_user_id = $1 AND active = TRUE",
        )
        .bind(vouchee_user_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(records)
    }

    /// The vouchee took out a loan: bump `loans_active` for each of their
    /// vouchers, at most once per (voucher, loan) pair. Safe to call from
    /// any acceptance path any number of times.
    pub async fn on_vouchee_new_loan(&self, vouchee_user_id: Uuid, loan_id: Uuid) -> ApiResult<u32> {
        let vouchers = self.vouchers_for(vouchee_user_id).await?;
        let mut activated = 0u32;

        for record in &vouchers {
            let linked = sqlx::query(
                r#"
                INSERT INTO voucher_loan_links (id, voucher_record_id, loan_id, created_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (voucher_record_id, loan_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(record.id)
            .bind(loan_id)
            .execute(&self.db_pool)
            .await?
            .rows_affected()
                > 0;

            if linked {
                sqlx::query(
                    r#"
                    UPDATE voucher_records
                    SET loans_active = loans_active + 1, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(record.id)
                .execute(&self.db_pool)
                .await?;
                activated += 1;
            }
        }

        if activated > 0 {
            tracing::info!(
                vouchee = %vouchee_user_id,
                loan_id = %loan_id,
                vouchers = activated,
                "Voucher active-loan counters incremented"
            );
        }

        Ok(activated)
    }

    /// The vouchee made a payment: early and on-time payments strengthen
    /// each linked voucher's standing, late ones weaken it.
    pub async fn on_vouchee_payment_made(
        &self,
        vouchee_user_id: Uuid,
        loan_id: Uuid,
        days_from_due: i64,
    ) -> ApiResult<()> {
        let delta = if days_from_due <= 0 {
            STANDING_PAYMENT_REWARD
        } else {
            STANDING_LATE_PENALTY
        };

        let updated = sqlx::query(
            r#"
            UPDATE voucher_records v
            SET standing = v.standing + $3, updated_at = NOW()
            FROM voucher_loan_links l
            WHERE l.voucher_record_id = v.id
              AND l.loan_id = $2
              AND v.vouchee_user_id = $1
              AND v.active = TRUE
            "#,
        )
        .bind(vouchee_user_id)
        .bind(loan_id)
        .bind(delta)
        .execute(&self.db_pool)
        .await?
        .rows_affected();

        tracing::debug!(
            vouchee = %vouchee_user_id,
            loan_id = %loan_id,
            days_from_due,
            standing_delta = delta,
            vouchers = updated,
            "Voucher standing adjusted for payment"
        );

        Ok(())
    }

    /// The vouchee completed a loan: close out each linked voucher's
    /// active counter exactly once, credit the completion, and reward the
    /// voucher's own reputation. Callers must await this before treating
    /// the completion as durable.
    pub async fn on_vouchee_loan_completed(
        &self,
        vouchee_user_id: Uuid,
        loan_id: Uuid,
    ) -> ApiResult<VoucherCompletionOutcome> {
        let vouchers = self.vouchers_for(vouchee_user_id).await?;
        let mut updated = 0u32;

        for record in &vouchers {
            // The link row's completed_at is the per-pair idempotency guard.
            let closed = sqlx::query(
                r#"
                UPDATE voucher_loan_links
                SET completed_at = NOW()
                WHERE voucher_record_id = $1 AND loan_id = $2 AND completed_at IS NULL
                "#,
            )
            .bind(record.id)
            .bind(loan_id)
            .execute(&self.db_pool)
            .await?
            .rows_affected()
                > 0;

            if !closed {
                continue;
            }

            sqlx::query(
                r#"
                UPDATE voucher_records
                SET loans_active = GREATEST(loans_active - 1, 0),
                    loans_completed = loans_completed + 1,
                    standing = standing + $2,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(record.id)
            .bind(STANDING_COMPLETION_REWARD)
            .execute(&self.db_pool)
            .await?;

            self.trust
                .record_event(NewTrustEvent {
                    user_id: record.voucher_user_id,
                    loan_id: Some(loan_id),
                    payment_id: None,
                    event_type: TrustEventType::VoucheeLoanCompleted,
                    event_family: FAMILY_VOUCH_COMPLETION.to_string(),
                    score_impact: impact_for(TrustEventType::VoucheeLoanCompleted),
                })
                .await?;

            updated += 1;
        }

        tracing::info!(
            vouchee = %vouchee_user_id,
            loan_id = %loan_id,
            vouchers = updated,
            "Voucher completion pipeline finished"
        );

        Ok(VoucherCompletionOutcome {
            vouchers_updated: updated,
        })
    }
}
