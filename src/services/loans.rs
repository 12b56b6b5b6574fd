//! Loan service layer - request intake and lookups
//!
//! Opening a loan is gated by the read-only eligibility check, then routed
//! by lender type: business requests go through the matching engine's
//! offer cascade, personal requests fund directly against the named
//! counterparty.

use sqlx::PgPool;
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::error::{ApiError, ApiResult};
use crate::interest;
use crate::models::{CreateLoanRequest, LenderActor, LenderType, Loan, LoanStatus, User};
use crate::services::eligibility::EligibilityService;
use crate::services::matching::MatchingService;

/// Loan intake service
#[derive(Clone)]
pub struct LoanService {
    db_pool: PgPool,
    eligibility: EligibilityService,
    matching: MatchingService,
    settings: EngineSettings,
}

impl LoanService {
    pub fn new(
        db_pool: PgPool,
        eligibility: EligibilityService,
        matching: MatchingService,
        settings: EngineSettings,
    ) -> Self {
        Self {
            db_pool,
            eligibility,
            matching,
            settings,
        }
    }

    /// Open a new loan request. The eligibility gate runs first and is
    /// purely advisory reads; nothing is written when it denies.
    pub async fn create_loan(&self, request: CreateLoanRequest) -> ApiResult<Loan> {
        let direct_lender = match request.lender_type {
            LenderType::Personal => Some(request.lender_id.ok_or_else(|| {
                ApiError::Validation(
                    "Personal loans require a lender_id counterparty".to_string(),
                )
            })?),
            LenderType::Business => None,
        };

        let report = self
            .eligibility
            .check_eligibility(
                request.borrower_id,
                request.lender_type,
                Some(request.amount),
            )
            .await?;

        if !report.can_borrow {
            return Err(ApiError::Validation(
                report
                    .reason
                    .unwrap_or_else(|| "Borrower is not eligible for a new loan".to_string()),
            ));
        }

        let borrower = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(request.borrower_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| {
                ApiError::NotFound(format!("User {} not found", request.borrower_id))
            })?;

        // Provisional pricing from the tier policy / platform default; the
        // funding path re-resolves with the actual lender's rate.
        let resolved = interest::resolve_interest_rate(
            None,
            Some(borrower.borrowing_tier),
            self.settings.default_interest_rate,
        );
        let pricing = interest::price_loan(
            request.interest_type,
            request.amount,
            resolved.rate,
            request.repayment_frequency,
            request.total_installments,
        )
        .map_err(|e| ApiError::Validation(e.to_string()))?;

        let loan = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans
                (id, borrower_id, amount, currency, interest_rate, rate_source,
                 interest_type, total_interest, total_amount, repayment_frequency,
                 total_installments, status, amount_paid, amount_remaining,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'pending', 0, $9,
                    NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.borrower_id)
        .bind(request.amount)
        .bind(&request.currency)
        .bind(resolved.rate)
        .bind(resolved.source)
        .bind(request.interest_type)
        .bind(pricing.total_interest)
        .bind(pricing.total_amount)
        .bind(request.repayment_frequency)
        .bind(request.total_installments)
        .fetch_one(&self.db_pool)
        .await?;

        tracing::info!(
            loan_id = %loan.id,
            borrower_id = %loan.borrower_id,
            amount = loan.amount,
            lender_type = ?request.lender_type,
            "Loan request opened"
        );

        match direct_lender {
            None => {
                self.matching.create_offers(loan.id).await?;
            }
            Some(lender_id) => {
                self.matching
                    .activate_direct(loan.id, LenderActor::User(lender_id))
                    .await?;
            }
        }

        self.get_loan(&loan.id).await
    }

    /// Get loan by ID
    pub async fn get_loan(&self, id: &Uuid) -> ApiResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Loan {} not found", id)))
    }

    /// List loans with filters
    pub async fn list_loans(
        &self,
        borrower_id: Option<Uuid>,
        lender_id: Option<Uuid>,
        status: Option<LoanStatus>,
    ) -> ApiResult<Vec<Loan>> {
        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT * FROM loans WHERE 1=1");

        if let Some(b_id) = borrower_id {
            query_builder.push(" AND borrower_id = ");
            query_builder.push_bind(b_id);
        }
        if let Some(l_id) = lender_id {
            query_builder.push(" AND (lender_id = ");
            query_builder.push_bind(l_id);
            query_builder.push(" OR business_lender_id = ");
            query_builder.push_bind(l_id);
            query_builder.push(")");
        }
        if let Some(s) = status {
            query_builder.push(" AND status = ");
            query_builder.push_bind(s);
        }

        query_builder.push(" ORDER BY created_at DESC");

        let loans = query_builder
            .build_query_as::<Loan>()
            .fetch_all(&self.db_pool)
            .await?;

        Ok(loans)
    }
}
