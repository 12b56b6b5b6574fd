//! Loan Matching Engine
//!
//! Matches a pending business-sourced loan against lender preferences,
//! creates 24-hour offers, and cascades to the next-ranked candidate on
//! decline or expiry. Personal loans never pass through here for candidate
//! selection; they are funded directly via [`MatchingService::activate_direct`].
//!
//! All offer transitions are conditional updates guarded on the current
//! status, so a concurrent accept and expiry on the same match cannot both
//! mutate loan state.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{Duration, Months, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::error::{ApiError, ApiResult};
use crate::interest::{self, period_days};
use crate::models::{
    LenderActor, LenderPreference, Loan, LoanMatch, LoanStatus, MatchStatus, NotificationKind,
    OfferAction, OfferResponseOutcome, User,
};
use crate::services::notifications::NotificationService;
use crate::services::voucher::VoucherService;

/// Ranking weights: free-capital headroom dominates, historical acceptance
/// rate breaks the field apart. Ranking must be deterministic and total,
/// so ties fall back to preference age and then id.
const WEIGHT_FREE_CAPITAL: f64 = 0.6;
const WEIGHT_ACCEPTANCE_RATE: f64 = 0.4;

/// Acceptance rate assumed for lenders with no offer history
const NEUTRAL_ACCEPTANCE_RATE: f64 = 0.5;

/// Ranking score for one candidate against a requested amount.
pub fn candidate_score(pref: &LenderPreference, amount: i64) -> f64 {
    // Headroom saturates at 10x the requested amount.
    let headroom = (pref.free_capital() as f64 / amount.max(1) as f64).min(10.0) / 10.0;
    let acceptance = if pref.offers_received > 0 {
        pref.offers_accepted as f64 / pref.offers_received as f64
    } else {
        NEUTRAL_ACCEPTANCE_RATE
    };
    WEIGHT_FREE_CAPITAL * headroom + WEIGHT_ACCEPTANCE_RATE * acceptance
}

/// Preferences whose limits cover the request, honoring first-time rules.
pub fn eligible_candidates(
    prefs: &[LenderPreference],
    amount: i64,
    first_time_borrower: bool,
) -> Vec<LenderPreference> {
    prefs
        .iter()
        .filter(|p| {
            if !p.active {
                return false;
            }
            if first_time_borrower {
                p.allow_first_time_borrowers && p.first_time_borrower_limit >= amount
            } else {
                p.max_amount >= amount
            }
        })
        .cloned()
        .collect()
}

/// Deterministic total ordering of candidates: score descending, then
/// preference age, then id. Re-running on the same inputs reproduces the
/// same order.
pub fn rank_candidates(
    mut candidates: Vec<LenderPreference>,
    amount: i64,
) -> Vec<LenderPreference> {
    candidates.sort_by(|a, b| {
        candidate_score(b, amount)
            .partial_cmp(&candidate_score(a, amount))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates
}

/// The cascade's next offer: lowest rank still pending.
pub fn next_pending_match(matches: &[LoanMatch]) -> Option<&LoanMatch> {
    matches
        .iter()
        .filter(|m| m.status == MatchStatus::Pending)
        .min_by_key(|m| m.match_rank)
}

/// Loan matching service
#[derive(Clone)]
pub struct MatchingService {
    db_pool: PgPool,
    voucher: VoucherService,
    notifications: NotificationService,
    settings: EngineSettings,
}

impl MatchingService {
    pub fn new(
        db_pool: PgPool,
        voucher: VoucherService,
        notifications: NotificationService,
        settings: EngineSettings,
    ) -> Self {
        Self {
            db_pool,
            voucher,
            notifications,
            settings,
        }
    }

    /// Create ranked, time-boxed offers for a pending business loan.
    pub async fn create_offers(&self, loan_id: Uuid) -> ApiResult<Vec<LoanMatch>> {
        let loan = self.get_loan(loan_id).await?;

        if loan.status != LoanStatus::Pending {
            return Err(ApiError::Conflict(format!(
                "Loan {} is not awaiting offers (status: {:?})",
                loan_id, loan.status
            )));
        }
        if loan.lender_id.is_some() {
            return Err(ApiError::Validation(
                "Personal loans are funded directly and are not matched".to_string(),
            ));
        }

        let borrower = self.get_user(loan.borrower_id).await?;

        let prefs = sqlx::query_as::<_, LenderPreference>(
            "SELECT * FROM lender_preferences WHERE active = TRUE",
        )
        .fetch_all(&self.db_pool)
        .await?;

        let candidates = rank_candidates(
            eligible_candidates(&prefs, loan.amount, borrower.is_first_time_borrower()),
            loan.amount,
        );

        if candidates.is_empty() {
            sqlx::query(
                "UPDATE loans SET match_state = 'no_match', updated_at = NOW() WHERE id = $1",
            )
            .bind(loan_id)
            .execute(&self.db_pool)
            .await?;

            self.notifications
                .notify(
                    loan.borrower_id,
                    NotificationKind::NoLenderMatched,
                    "No lender currently accepts your loan request",
                )
                .await;

            tracing::info!(loan_id = %loan_id, "No eligible lenders for loan request");
            return Ok(vec![]);
        }

        let expires_at = Utc::now() + Duration::hours(self.settings.offer_ttl_hours);
        let mut matches = Vec::with_capacity(candidates.len());

        for (idx, pref) in candidates.iter().enumerate() {
            let offer = sqlx::query_as::<_, LoanMatch>(
                r#"
                INSERT INTO loan_matches
                    (id, loan_id, lender_user_id, lender_business_id, match_rank,
                     status, expires_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, 'pending', $6, NOW(), NOW())
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(loan_id)
            .bind(pref.lender_user_id)
            .bind(pref.lender_business_id)
            .bind((idx + 1) as i32)
            .bind(expires_at)
            .fetch_one(&self.db_pool)
            .await?;

            matches.push(offer);
        }

        let pref_ids: Vec<Uuid> = candidates.iter().map(|p| p.id).collect();
        sqlx::query(
            r#"
            UPDATE lender_preferences
            SET offers_received = offers_received + 1, updated_at = NOW()
            WHERE id = ANY($1)
            "#,
        )
        .bind(&pref_ids)
        .execute(&self.db_pool)
        .await?;

        let first = &matches[0];
        sqlx::query(
            r#"
            UPDATE loans
            SET status = 'matched', match_state = 'searching', current_match_id = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(loan_id)
        .bind(first.id)
        .execute(&self.db_pool)
        .await?;

        if let Some(candidate) = first.candidate() {
            self.notify_lender(
                candidate,
                NotificationKind::OfferReceived,
                "You have a new loan offer awaiting your response",
            )
            .await;
        }

        tracing::info!(
            loan_id = %loan_id,
            offers = matches.len(),
            "Offers created for loan"
        );

        Ok(matches)
    }

    /// Accept or decline an offer on behalf of its candidate lender.
    pub async fn respond_to_offer(
        &self,
        match_id: Uuid,
        actor: LenderActor,
        action: OfferAction,
        reason: Option<String>,
    ) -> ApiResult<OfferResponseOutcome> {
        let offer = sqlx::query_as::<_, LoanMatch>("SELECT * FROM loan_matches WHERE id = $1")
            .bind(match_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Offer {} not found", match_id)))?;

        if offer.candidate() != Some(actor) {
            return Err(ApiError::Forbidden(
                "Only the offer's candidate lender may respond".to_string(),
            ));
        }

        match action {
            OfferAction::Accept => self.accept_offer(offer, actor).await,
            OfferAction::Decline => self.decline_offer(offer, reason).await,
        }
    }

    async fn accept_offer(
        &self,
        offer: LoanMatch,
        actor: LenderActor,
    ) -> ApiResult<OfferResponseOutcome> {
        // Guarded transition: only a still-pending, unexpired offer can be
        // accepted. Expiry is judged against `now` at this moment, not by
        // any background marker.
        let accepted = sqlx::query_as::<_, LoanMatch>(
            r#"
            UPDATE loan_matches
            SET status = 'accepted', updated_at = NOW()
            WHERE id = $1 AND status = 'pending' AND expires_at > NOW()
            RETURNING *
            "#,
        )
        .bind(offer.id)
        .fetch_optional(&self.db_pool)
        .await?;

        let accepted = match accepted {
            Some(m) => m,
            None => {
                let current =
                    sqlx::query_as::<_, LoanMatch>("SELECT * FROM loan_matches WHERE id = $1")
                        .bind(offer.id)
                        .fetch_one(&self.db_pool)
                        .await?;
                return Err(match current.status {
                    MatchStatus::Pending => ApiError::OfferExpired(format!(
                        "Offer {} expired at {}",
                        offer.id, current.expires_at
                    )),
                    status => ApiError::Conflict(format!(
                        "Offer {} already resolved (status: {:?})",
                        offer.id, status
                    )),
                });
            }
        };

        let loan = self.get_loan(accepted.loan_id).await?;
        let loan = self.activate_loan(&loan, actor, Some(&accepted)).await?;

        // Sibling offers lose the race.
        sqlx::query(
            r#"
            UPDATE loan_matches
            SET status = 'skipped', updated_at = NOW()
            WHERE loan_id = $1 AND status = 'pending' AND id != $2
            "#,
        )
        .bind(loan.id)
        .bind(accepted.id)
        .execute(&self.db_pool)
        .await?;

        if let Some(pref) = self.find_preference(actor).await? {
            if let Err(e) = sqlx::query(
                r#"
                UPDATE lender_preferences
                SET offers_accepted = offers_accepted + 1, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(pref.id)
            .execute(&self.db_pool)
            .await
            {
                tracing::error!(match_id = %accepted.id, error = %e, "Failed to update acceptance counter");
            }
        }

        tracing::info!(
            match_id = %accepted.id,
            loan_id = %loan.id,
            "Offer accepted and loan activated"
        );

        Ok(OfferResponseOutcome {
            match_id: accepted.id,
            loan_id: loan.id,
            status: MatchStatus::Accepted,
            next_match_id: None,
            no_match: false,
        })
    }

    async fn decline_offer(
        &self,
        offer: LoanMatch,
        reason: Option<String>,
    ) -> ApiResult<OfferResponseOutcome> {
        // A decline after the expiry instant is still a normal decline;
        // both paths converge on the same cascade.
        let declined = sqlx::query_as::<_, LoanMatch>(
            r#"
            UPDATE loan_matches
            SET status = 'declined', decline_reason = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(offer.id)
        .bind(&reason)
        .fetch_optional(&self.db_pool)
        .await?;

        let declined = match declined {
            Some(m) => m,
            None => {
                let current =
                    sqlx::query_as::<_, LoanMatch>("SELECT * FROM loan_matches WHERE id = $1")
                        .bind(offer.id)
                        .fetch_one(&self.db_pool)
                        .await?;
                return Err(ApiError::Conflict(format!(
                    "Offer {} already resolved (status: {:?})",
                    offer.id, current.status
                )));
            }
        };

        let (next_match_id, no_match) = self.cascade_to_next(declined.loan_id).await?;

        tracing::info!(
            match_id = %declined.id,
            loan_id = %declined.loan_id,
            next_match = ?next_match_id,
            "Offer declined"
        );

        Ok(OfferResponseOutcome {
            match_id: declined.id,
            loan_id: declined.loan_id,
            status: MatchStatus::Declined,
            next_match_id,
            no_match,
        })
    }

    /// Mark every pending offer past its expiry as expired and run the
    /// decline cascade for each affected loan. Invoked by the scheduler.
    pub async fn expire_stale_offers(&self) -> ApiResult<Vec<Uuid>> {
        let expired = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            UPDATE loan_matches
            SET status = 'expired', updated_at = NOW()
            WHERE status = 'pending' AND expires_at < NOW()
            RETURNING id, loan_id
            "#,
        )
        .fetch_all(&self.db_pool)
        .await?;

        let mut loan_ids = HashSet::new();
        for (match_id, loan_id) in &expired {
            tracing::info!(match_id = %match_id, loan_id = %loan_id, "Offer expired");
            loan_ids.insert(*loan_id);
        }

        for loan_id in loan_ids {
            if let Err(e) = self.cascade_to_next(loan_id).await {
                tracing::error!(loan_id = %loan_id, error = %e, "Cascade after expiry failed");
            }
        }

        Ok(expired.into_iter().map(|(id, _)| id).collect())
    }

    /// Fund a personal loan directly, without candidate selection.
    pub async fn activate_direct(&self, loan_id: Uuid, lender: LenderActor) -> ApiResult<Loan> {
        let loan = self.get_loan(loan_id).await?;
        self.activate_loan(&loan, lender, None).await
    }

    // ===== Private helpers =====

    /// The funding pipeline shared by offer acceptance and direct lending:
    /// resolve the rate, price the loan, flip it to active, regenerate the
    /// schedule, reserve lender capital, and run the voucher hook. The
    /// voucher and notification legs are awaited but best effort.
    async fn activate_loan(
        &self,
        loan: &Loan,
        lender: LenderActor,
        via_match: Option<&LoanMatch>,
    ) -> ApiResult<Loan> {
        let borrower = self.get_user(loan.borrower_id).await?;
        let pref = self.find_preference(lender).await?;

        let resolved = interest::resolve_interest_rate(
            pref.as_ref().and_then(|p| p.interest_rate),
            Some(borrower.borrowing_tier),
            self.settings.default_interest_rate,
        );

        let pricing = interest::price_loan(
            loan.interest_type,
            loan.amount,
            resolved.rate,
            loan.repayment_frequency,
            loan.total_installments,
        )
        .map_err(|e| ApiError::Validation(e.to_string()))?;

        let (lender_user_id, lender_business_id) = match lender {
            LenderActor::User(id) => (Some(id), None),
            LenderActor::Business(id) => (None, Some(id)),
        };

        let activated = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET status = 'active',
                lender_id = $2,
                business_lender_id = $3,
                current_match_id = $4,
                match_state = 'matched',
                interest_rate = $5,
                rate_source = $6,
                total_interest = $7,
                total_amount = $8,
                amount_remaining = $8 - amount_paid,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'matched')
            RETURNING *
            "#,
        )
        .bind(loan.id)
        .bind(lender_user_id)
        .bind(lender_business_id)
        .bind(via_match.map(|m| m.id))
        .bind(resolved.rate)
        .bind(resolved.source)
        .bind(pricing.total_interest)
        .bind(pricing.total_amount)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| {
            ApiError::Conflict(format!(
                "Loan {} is not in a fundable status (status: {:?})",
                loan.id, loan.status
            ))
        })?;

        tracing::info!(
            loan_id = %loan.id,
            rate = %resolved.rate,
            rate_source = ?resolved.source,
            total_amount = pricing.total_amount,
            "Loan activated"
        );

        self.regenerate_schedule(&activated, &pricing.installments)
            .await?;

        // Downstream bookkeeping is best effort: the funding decision is
        // already durable and each leg is independently retryable.
        if let Some(pref) = &pref {
            if let Err(e) = sqlx::query(
                r#"
                UPDATE lender_preferences
                SET capital_reserved = capital_reserved + $2, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(pref.id)
            .bind(activated.amount)
            .execute(&self.db_pool)
            .await
            {
                tracing::error!(loan_id = %loan.id, error = %e, "Failed to reserve lender capital");
            }
        }

        if let Err(e) = self
            .voucher
            .on_vouchee_new_loan(activated.borrower_id, activated.id)
            .await
        {
            tracing::error!(loan_id = %loan.id, error = %e, "Voucher new-loan hook failed");
        }

        self.notifications
            .notify(
                activated.borrower_id,
                NotificationKind::LoanActivated,
                "Your loan has been funded and is now active",
            )
            .await;

        Ok(activated)
    }

    /// Rebuild the full payment schedule for a freshly activated loan.
    async fn regenerate_schedule(
        &self,
        loan: &Loan,
        installments: &[interest::InstallmentAmounts],
    ) -> ApiResult<()> {
        let mut tx = self.db_pool.begin().await?;

        sqlx::query("DELETE FROM payment_schedule_entries WHERE loan_id = $1")
            .bind(loan.id)
            .execute(&mut *tx)
            .await?;

        let start = Utc::now();
        for (idx, line) in installments.iter().enumerate() {
            let number = (idx + 1) as i32;
            let due_date = match period_days(loan.repayment_frequency) {
                Some(days) => start + Duration::days(days * number as i64),
                None => start + Months::new(number as u32),
            };

            sqlx::query(
                r#"
                INSERT INTO payment_schedule_entries
                    (id, loan_id, installment_number, due_date, amount,
                     principal_amount, interest_amount, is_paid, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, 'scheduled', NOW())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(loan.id)
            .bind(number)
            .bind(due_date)
            .bind(line.amount)
            .bind(line.principal)
            .bind(line.interest)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            loan_id = %loan.id,
            installments = installments.len(),
            "Payment schedule regenerated"
        );

        Ok(())
    }

    /// Advance the cascade after a decline or expiry: promote the
    /// next-ranked pending offer, or mark the loan unmatched when none
    /// remain. Guarded so an already-funded loan is left untouched.
    async fn cascade_to_next(&self, loan_id: Uuid) -> ApiResult<(Option<Uuid>, bool)> {
        let matches =
            sqlx::query_as::<_, LoanMatch>("SELECT * FROM loan_matches WHERE loan_id = $1")
                .bind(loan_id)
                .fetch_all(&self.db_pool)
                .await?;

        match next_pending_match(&matches) {
            Some(next) => {
                sqlx::query(
                    r#"
                    UPDATE loans
                    SET current_match_id = $2, updated_at = NOW()
                    WHERE id = $1 AND status IN ('pending', 'matched')
                    "#,
                )
                .bind(loan_id)
                .bind(next.id)
                .execute(&self.db_pool)
                .await?;

                if let Some(candidate) = next.candidate() {
                    self.notify_lender(
                        candidate,
                        NotificationKind::OfferReceived,
                        "You have a new loan offer awaiting your response",
                    )
                    .await;
                }

                Ok((Some(next.id), false))
            }
            None => {
                let unmatched = sqlx::query(
                    r#"
                    UPDATE loans
                    SET match_state = 'no_match', current_match_id = NULL, updated_at = NOW()
                    WHERE id = $1 AND status IN ('pending', 'matched')
                    "#,
                )
                .bind(loan_id)
                .execute(&self.db_pool)
                .await?
                .rows_affected();

                if unmatched > 0 {
                    let loan = self.get_loan(loan_id).await?;
                    self.notifications
                        .notify(
                            loan.borrower_id,
                            NotificationKind::NoLenderMatched,
                            "No lender accepted your loan request",
                        )
                        .await;
                }

                Ok((None, unmatched > 0))
            }
        }
    }

    async fn notify_lender(&self, lender: LenderActor, kind: NotificationKind, message: &str) {
        let id = match lender {
            LenderActor::User(id) => id,
            LenderActor::Business(id) => id,
        };
        self.notifications.notify(id, kind, message).await;
    }

    async fn find_preference(&self, lender: LenderActor) -> ApiResult<Option<LenderPreference>> {
        let pref = match lender {
            LenderActor::User(id) => {
                sqlx::query_as::<_, LenderPreference>(
                    "SELECT * FROM lender_preferences WHERE lender_user_id = $1 LIMIT 1",
                )
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?
            }
            LenderActor::Business(id) => {
                sqlx::query_as::<_, LenderPreference>(
                    "SELECT * FROM lender_preferences WHERE lender_business_id = $1 LIMIT 1",
                )
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?
            }
        };

        Ok(pref)
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
