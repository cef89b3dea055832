use crate::database::error::DatabaseError;
use crate::payments::types::{OrderIntent, SessionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

/// One initiation attempt. Several rows may share a transaction
/// reference; the newest row is the authoritative state for that
/// reference.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub transaction_reference: String,
    pub amount: i64,
    pub currency: String,
    pub provider: String,
    pub channel: Option<String>,
    pub phone_number: String,
    pub order_intent: JsonValue,
    pub status: String,
    pub failure_reason: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentSession {
    pub fn status(&self) -> Option<SessionStatus> {
        SessionStatus::from_db(&self.status)
    }

    pub fn intent(&self) -> Result<OrderIntent, serde_json::Error> {
        serde_json::from_value(self.order_intent.clone())
    }
}

/// Fields for a fresh session row; status always starts at pending.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub transaction_reference: String,
    pub amount: i64,
    pub currency: String,
    pub provider: String,
    pub channel: Option<String>,
    pub phone_number: String,
    pub order_intent: JsonValue,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: NewSession) -> Result<PaymentSession, DatabaseError>;

    /// Newest session for this user and reference, across all statuses.
    async fn find_latest_for_user(
        &self,
        user_id: Uuid,
        reference: &str,
    ) -> Result<Option<PaymentSession>, DatabaseError>;

    /// Newest session for a reference regardless of user; webhook
    /// payloads carry no user id.
    async fn find_latest_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentSession>, DatabaseError>;

    async fn mark_processing(
        &self,
        id: Uuid,
        gateway_transaction_id: Option<&str>,
    ) -> Result<PaymentSession, DatabaseError>;

    async fn mark_completed(&self, id: Uuid) -> Result<PaymentSession, DatabaseError>;

    /// Marks a session failed unless it already completed. Returns
    /// `None` when the completion won the race; failure must never
    /// overwrite a completed session.
    async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
    ) -> Result<Option<PaymentSession>, DatabaseError>;

    /// Processing sessions older than `cutoff`, newest first.
    async fn find_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentSession>, DatabaseError>;

    /// Best-effort audit trail; initiation and reconciliation append
    /// here but never fail the payment over it.
    async fn append_log(
        &self,
        session_id: Uuid,
        event: &str,
        message: &str,
        context: Option<JsonValue>,
    ) -> Result<(), DatabaseError>;
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(&self, session: NewSession) -> Result<PaymentSession, DatabaseError> {
        sqlx::query_as::<_, PaymentSession>(
            r#"
            INSERT INTO payment_sessions
                (user_id, transaction_reference, amount, currency, provider,
                 channel, phone_number, order_intent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, user_id, transaction_reference, amount, currency, provider,
                      channel, phone_number, order_intent, status, failure_reason,
                      gateway_transaction_id, created_at, updated_at
            "#,
        )
        .bind(session.user_id)
        .bind(&session.transaction_reference)
        .bind(session.amount)
        .bind(&session.currency)
        .bind(&session.provider)
        .bind(&session.channel)
        .bind(&session.phone_number)
        .bind(&session.order_intent)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_latest_for_user(
        &self,
        user_id: Uuid,
        reference: &str,
    ) -> Result<Option<PaymentSession>, DatabaseError> {
        sqlx::query_as::<_, PaymentSession>(
            r#"
            SELECT id, user_id, transaction_reference, amount, currency, provider,
                   channel, phone_number, order_intent, status, failure_reason,
                   gateway_transaction_id, created_at, updated_at
            FROM payment_sessions
            WHERE user_id = $1 AND transaction_reference = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_latest_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentSession>, DatabaseError> {
        sqlx::query_as::<_, PaymentSession>(
            r#"
            SELECT id, user_id, transaction_reference, amount, currency, provider,
                   channel, phone_number, order_intent, status, failure_reason,
                   gateway_transaction_id, created_at, updated_at
            FROM payment_sessions
            WHERE transaction_reference = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn mark_processing(
        &self,
        id: Uuid,
        gateway_transaction_id: Option<&str>,
    ) -> Result<PaymentSession, DatabaseError> {
        sqlx::query_as::<_, PaymentSession>(
            r#"
            UPDATE payment_sessions
            SET status = 'processing',
                gateway_transaction_id = COALESCE($2, gateway_transaction_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, user_id, transaction_reference, amount, currency, provider,
                      channel, phone_number, order_intent, status, failure_reason,
                      gateway_transaction_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(gateway_transaction_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<PaymentSession, DatabaseError> {
        sqlx::query_as::<_, PaymentSession>(
            r#"
            UPDATE payment_sessions
            SET status = 'completed',
                failure_reason = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, user_id, transaction_reference, amount, currency, provider,
                      channel, phone_number, order_intent, status, failure_reason,
                      gateway_transaction_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
    ) -> Result<Option<PaymentSession>, DatabaseError> {
        sqlx::query_as::<_, PaymentSession>(
            r#"
            UPDATE payment_sessions
            SET status = 'failed',
                failure_reason = $2,
                updated_at = NOW()
            WHERE id = $1 AND status <> 'completed'
            RETURNING id, user_id, transaction_reference, amount, currency, provider,
                      channel, phone_number, order_intent, status, failure_reason,
                      gateway_transaction_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentSession>, DatabaseError> {
        sqlx::query_as::<_, PaymentSession>(
            r#"
            SELECT id, user_id, transaction_reference, amount, currency, provider,
                   channel, phone_number, order_intent, status, failure_reason,
                   gateway_transaction_id, created_at, updated_at
            FROM payment_sessions
            WHERE status = 'processing' AND created_at < $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn append_log(
        &self,
        session_id: Uuid,
        event: &str,
        message: &str,
        context: Option<JsonValue>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO payment_logs (session_id, event, message, context)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(session_id)
        .bind(event)
        .bind(message)
        .bind(context)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_row(status: &str, intent: JsonValue) -> PaymentSession {
        PaymentSession {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            transaction_reference: "ABCDEF1234567890ABCDEF12".to_string(),
            amount: 5000,
            currency: "TZS".to_string(),
            provider: "vodacom".to_string(),
            channel: Some("MPESA-TZ".to_string()),
            phone_number: "0712345678".to_string(),
            order_intent: intent,
            status: status.to_string(),
            failure_reason: None,
            gateway_transaction_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn status_parses_known_values() {
        let row = session_row("processing", serde_json::json!({"items": []}));
        assert_eq!(row.status(), Some(SessionStatus::Processing));

        let row = session_row("corrupted", serde_json::json!({"items": []}));
        assert_eq!(row.status(), None);
    }

    #[test]
    fn intent_deserializes_from_stored_json() {
        let row = session_row(
            "pending",
            serde_json::json!({
                "items": [{"product_id": 4, "quantity": 2, "price": 1500}],
                "shipping_address": "Mwanza"
            }),
        );
        let intent = row.intent().expect("stored intent should parse");
        assert_eq!(intent.items.len(), 1);
        assert_eq!(intent.items[0].product_id, 4);
        assert_eq!(intent.shipping_address.as_deref(), Some("Mwanza"));
    }

    #[test]
    fn malformed_intent_surfaces_a_parse_error() {
        let row = session_row("pending", serde_json::json!({"items": "not-a-list"}));
        assert!(row.intent().is_err());
    }
}
