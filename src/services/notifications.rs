//! Notification intents
//!
//! The engine decides *that* a user must be told something; formatting and
//! delivery belong to an external component. Each intent is written as a
//! durable row and, when a delivery endpoint is configured, forwarded to it
//! best effort. A failed forward never fails the caller.

use reqwest::Client;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::NotificationKind;

/// Notification intent emitter
#[derive(Clone)]
pub struct NotificationService {
    db_pool: PgPool,
    http: Client,
    delivery_url: Option<String>,
}

impl NotificationService {
    pub fn new(db_pool: PgPool, delivery_url: Option<String>) -> Self {
        Self {
            db_pool,
            http: Client::new(),
            delivery_url,
        }
    }

    /// Emit an intent. Best effort on both legs: a lost notification is an
    /// operational problem, never a reason to roll back the event that
    /// triggered it.
    pub async fn notify(&self, user_id: Uuid, kind: NotificationKind, message: &str) {
        let insert = sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, message, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(kind)
        .bind(message)
        .execute(&self.db_pool)
        .await;

        if let Err(e) = insert {
            tracing::error!(
                user_id = %user_id,
                kind = ?kind,
                error = %e,
                "Failed to persist notification intent"
            );
        }

        if let Some(url) = &self.delivery_url {
            let result = self
                .http
                .post(url)
                .json(&json!({
                    "user_id": user_id,
                    "kind": kind,
                    "message": message,
                }))
                .send()
                .await;

            match result {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!(
                        user_id = %user_id,
                        kind = ?kind,
                        status = %resp.status(),
                        "Notification delivery endpoint returned an error"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        kind = ?kind,
                        error = %e,
                        "Failed to forward notification intent"
                    );
                }
                Ok(_) => {}
            }
        }
    }
}
