//! Mobile money payment API
//!
//! Checkout initiation, payment status lookup and an on-demand trigger
//! for the orphan recovery sweep.

use crate::database::session_repository::SessionStore;
use crate::middleware::error::{get_request_id_from_headers, payment_error_response, ErrorResponse};
use crate::payments::types::{InitiatePayment, OrderIntent, OrderIntentItem};
use crate::services::initiation::InitiationService;
use crate::services::reconciliation::ReconciliationService;
use crate::workers::orphan_recovery::OrphanRecoveryConfig;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct PaymentApiState {
    pub initiation: Arc<InitiationService>,
    pub reconciler: Arc<ReconciliationService>,
    pub sessions: Arc<dyn SessionStore>,
    pub recovery: OrphanRecoveryConfig,
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub user_id: Uuid,
    /// Smallest currency unit; TZS has no minor unit so this is shillings.
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Free-form provider label from the storefront, e.g. "vodacom".
    pub provider: String,
    pub phone_number: String,
    pub items: Vec<OrderIntentItem>,
    #[serde(default)]
    pub shipping_address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub buyer_name: Option<String>,
    #[serde(default)]
    pub buyer_email: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

fn default_currency() -> String {
    "TZS".to_string()
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub transaction_reference: String,
    pub status: String,
    /// True when an equivalent in-flight request was collapsed onto an
    /// existing session instead of charging again.
    pub reused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_transaction_id: Option<String>,
}

/// POST /api/payments/mobile
pub async fn initiate_payment(
    State(state): State<PaymentApiState>,
    headers: HeaderMap,
    Json(request): Json<InitiatePaymentRequest>,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);
    info!(
        user_id = %request.user_id,
        provider = %request.provider,
        amount = request.amount,
        "Payment initiation request received"
    );

    let payment = InitiatePayment {
        user_id: request.user_id,
        amount: request.amount,
        currency: request.currency,
        provider: request.provider,
        phone_number: request.phone_number,
        intent: OrderIntent {
            items: request.items,
            shipping_address: request.shipping_address,
            notes: request.notes,
        },
        buyer_name: request.buyer_name,
        buyer_email: request.buyer_email,
        idempotency_key: request.idempotency_key,
    };

    match state.initiation.initiate(payment).await {
        Ok(outcome) => {
            let session = outcome.session();
            let body = InitiatePaymentResponse {
                transaction_reference: session.transaction_reference.clone(),
                status: session.status.clone(),
                reused: outcome.reused(),
                gateway_transaction_id: session.gateway_transaction_id.clone(),
            };
            let status = if outcome.reused() {
                StatusCode::OK
            } else {
                StatusCode::ACCEPTED
            };
            (status, Json(body)).into_response()
        }
        Err(e) => payment_error_response(&e, request_id).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub transaction_reference: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// GET /api/payments/{reference}
///
/// Storefronts poll this while the customer confirms on their handset.
pub async fn get_payment_status(
    State(state): State<PaymentApiState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);

    match state.sessions.find_latest_by_reference(&reference).await {
        Ok(Some(session)) => (
            StatusCode::OK,
            Json(PaymentStatusResponse {
                transaction_reference: session.transaction_reference,
                status: session.status,
                amount: session.amount,
                currency: session.currency,
                provider: session.provider,
                channel: session.channel,
                failure_reason: session.failure_reason,
                created_at: session.created_at,
                updated_at: session.updated_at,
            }),
        )
            .into_response(),
        Ok(None) => ErrorResponse::not_found(
            request_id,
            format!("No payment found for reference {reference}"),
        )
        .into_response(),
        Err(e) => {
            error!(reference = %reference, error = %e, "Payment status lookup failed");
            ErrorResponse::internal_error(request_id).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecoveryRunResponse {
    pub scanned: usize,
    pub recovered: usize,
    pub skipped_existing: usize,
    pub failed: usize,
}

/// POST /api/payments/recovery/run
///
/// Same sweep the background worker runs, for operators who do not want
/// to wait for the next tick.
pub async fn run_recovery(
    State(state): State<PaymentApiState>,
    headers: HeaderMap,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);
    let grace = chrono::Duration::seconds(state.recovery.grace_period.as_secs() as i64);

    match state
        .reconciler
        .recover_orphans(grace, state.recovery.batch_size)
        .await
    {
        Ok(report) => {
            info!(
                scanned = report.scanned,
                recovered = report.recovered,
                "On-demand recovery pass finished"
            );
            (
                StatusCode::OK,
                Json(RecoveryRunResponse {
                    scanned: report.scanned,
                    recovered: report.recovered,
                    skipped_existing: report.skipped_existing,
                    failed: report.failed,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "On-demand recovery pass failed");
            ErrorResponse::internal_error(request_id).into_response()
        }
    }
}
