//! Error response formatting
//!
//! Provides standardized error responses with consistent JSON structure,
//! HTTP status codes, error codes, and user-friendly messages.

use crate::payments::error::PaymentError;
use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Standardized error response structure
///
/// This is returned to clients for all error cases, ensuring
/// consistent error handling across the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Request ID for debugging and support
    pub request_id: Option<String>,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,

    /// Optional additional details (e.g., validation errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether the client should retry the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_payment_error(error: &PaymentError, request_id: Option<String>) -> Self {
        // Failed-but-referenced payments keep their reference so the
        // client can resubmit the same logical request and land on the
        // same session history.
        let details = error
            .transaction_reference()
            .map(|r| serde_json::json!({ "transaction_reference": r }));
        Self {
            error: error.code().to_string(),
            message: error.user_message(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details,
            retryable: Some(error.is_retryable()),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Generic internal server error response
    pub fn internal_error(request_id: Option<String>) -> Self {
        Self {
            error: "INTERNAL_ERROR".to_string(),
            message: "An internal server error occurred. Please try again later.".to_string(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(false),
        }
    }

    pub fn not_found(request_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            error: "NOT_FOUND".to_string(),
            message: message.into(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(false),
        }
    }
}

/// Convert a payment error into an HTTP response with proper status code
/// and JSON formatting. Server-side failures log at error level, client
/// mistakes at warn.
pub fn payment_error_response(
    error: &PaymentError,
    request_id: Option<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    let status = StatusCode::from_u16(error.http_status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        tracing::error!(
            error = %error,
            request_id = ?request_id,
            status = %status.as_u16(),
            "Server error occurred"
        );
    } else {
        tracing::warn!(
            error = %error,
            request_id = ?request_id,
            status = %status.as_u16(),
            "Client error occurred"
        );
    }

    (status, Json(ErrorResponse::from_payment_error(error, request_id)))
}

/// Helper to extract request ID from request headers
pub fn get_request_id_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.as_str() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" | "INVALID_PHONE_FORMAT" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}
