use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::payments::types::WebhookNotification;
use crate::payments::utils::secure_eq;
use crate::services::reconciliation::ReconciliationService;

#[derive(Clone)]
pub struct WebhookState {
    pub reconciler: Arc<ReconciliationService>,
    /// Shared secret the gateway echoes back in `x-api-key`.
    pub api_key: String,
}

/// POST /api/webhooks/zeno
///
/// The gateway redelivers on any non-2xx, so every answer past the
/// authentication gate is a 200. Payloads that can never be processed
/// (malformed JSON, unknown references) are acknowledged too; redelivery
/// would not change them, and stuck sessions are the recovery job's
/// problem.
pub async fn handle_zeno_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    info!("Received gateway webhook");

    let supplied = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if supplied.is_empty() {
        warn!("Missing webhook api key");
        return (StatusCode::UNAUTHORIZED, "Missing api key").into_response();
    }
    if !secure_eq(supplied.as_bytes(), state.api_key.as_bytes()) {
        warn!("Invalid webhook api key");
        return (StatusCode::UNAUTHORIZED, "Invalid api key").into_response();
    }

    let payload: WebhookNotification = match serde_json::from_str(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Unparseable webhook payload acknowledged");
            return ack();
        }
    };

    match state.reconciler.process_notification(&payload).await {
        Ok(outcome) => {
            info!(outcome = ?outcome, "Webhook processed");
            ack()
        }
        Err(e) => {
            error!(error = %e, "Webhook processing failed");
            ack()
        }
    }
}

fn ack() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
}
