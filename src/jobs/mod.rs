//! Scheduled background sweeps
//!
//! Two cron-driven jobs keep time-based state moving without any external
//! trigger: expiring stale offers (which runs the same cascade as a
//! decline) and penalizing overdue schedule entries. Both are idempotent,
//! so overlapping runs or restarts are harmless.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::Config;
use crate::services::{MatchingService, PaymentService};

/// Build and start the sweep scheduler.
pub async fn start_scheduler(
    matching: Arc<MatchingService>,
    payments: Arc<PaymentService>,
    config: &Config,
) -> Result<JobScheduler> {
    let mut scheduler = JobScheduler::new()
        .await
        .context("Failed to create job scheduler")?;

    let expiry_job = {
        let matching = matching.clone();
        Job::new_async(config.expiry_sweep_cron.as_str(), move |_id, _sched| {
            let matching = matching.clone();
            Box::pin(async move {
                match matching.expire_stale_offers().await {
                    Ok(expired) if !expired.is_empty() => {
                        tracing::info!(expired = expired.len(), "Offer expiry sweep completed");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Offer expiry sweep failed");
                    }
                }
            })
        })
        .context("Invalid expiry sweep cron expression")?
    };
    scheduler
        .add(expiry_job)
        .await
        .context("Failed to register expiry sweep")?;

    let missed_job = {
        let payments = payments.clone();
        Job::new_async(
            config.missed_payment_sweep_cron.as_str(),
            move |_id, _sched| {
                let payments = payments.clone();
                Box::pin(async move {
                    match payments.sweep_missed_payments().await {
                        Ok(penalized) if penalized > 0 => {
                            tracing::info!(penalized, "Missed-payment sweep completed");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Missed-payment sweep failed");
                        }
                    }
                })
            },
        )
        .context("Invalid missed-payment sweep cron expression")?
    };
    scheduler
        .add(missed_job)
        .await
        .context("Failed to register missed-payment sweep")?;

    scheduler
        .start()
        .await
        .context("Failed to start job scheduler")?;

    tracing::info!(
        expiry_cron = %config.expiry_sweep_cron,
        missed_cron = %config.missed_payment_sweep_cron,
        "Background sweeps scheduled"
    );

    Ok(scheduler)
}
