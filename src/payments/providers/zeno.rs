//! Zeno mobile money gateway client (Tanzania push payments).

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::{GatewayOrderRequest, GatewayOrderResponse, MobileMoneyGateway};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

const DEFAULT_BASE_URL: &str = "https://zenoapi.com";
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ZenoConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl ZenoConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let api_key =
            std::env::var("ZENO_API_KEY").map_err(|_| PaymentError::ValidationError {
                message: "ZENO_API_KEY is required".to_string(),
                field: Some("ZENO_API_KEY".to_string()),
            })?;

        let base_url =
            std::env::var("ZENO_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let timeout_seconds = std::env::var("ZENO_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS);

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_seconds),
        })
    }
}

pub struct ZenoGateway {
    config: ZenoConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ZenoOrderBody<'a> {
    order_id: &'a str,
    buyer_name: &'a str,
    buyer_email: &'a str,
    buyer_phone: &'a str,
    amount: i64,
    webhook_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
}

/// The order endpoint has answered with several shapes over time; every
/// field is optional and unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct ZenoOrderReply {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    resultcode: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    transid: Option<String>,
}

impl From<ZenoOrderReply> for GatewayOrderResponse {
    fn from(reply: ZenoOrderReply) -> Self {
        // "000" is the documented success code; older deployments send a
        // status word instead.
        let status = match (reply.status, reply.resultcode) {
            (Some(status), _) => Some(status),
            (None, Some(code)) if code == "000" => Some("success".to_string()),
            (None, Some(code)) => Some(code),
            (None, None) => None,
        };
        GatewayOrderResponse {
            status,
            message: reply.message,
            gateway_transaction_id: reply.transid.or(reply.reference),
        }
    }
}

impl ZenoGateway {
    pub fn new(config: ZenoConfig) -> PaymentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::NetworkError {
                message: format!("failed to initialize HTTP client: {e}"),
            })?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(ZenoConfig::from_env()?)
    }

    fn orders_endpoint(&self) -> String {
        format!(
            "{}/api/payments/mobile_money_tanzania",
            self.config.base_url
        )
    }
}

#[async_trait]
impl MobileMoneyGateway for ZenoGateway {
    /// Single shot, no internal retries. A retried POST is a second push
    /// prompt on the subscriber's handset, and the attempt engine already
    /// decides when another submission is warranted.
    async fn create_order(
        &self,
        request: GatewayOrderRequest,
    ) -> PaymentResult<GatewayOrderResponse> {
        let body = ZenoOrderBody {
            order_id: &request.reference,
            buyer_name: &request.buyer_name,
            buyer_email: &request.buyer_email,
            buyer_phone: &request.phone_number,
            amount: request.amount,
            webhook_url: &request.webhook_url,
            channel: request.channel.as_deref(),
        };

        let response = self
            .client
            .post(self.orders_endpoint())
            .header("x-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError {
                message: format!("gateway request failed: {e}"),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(PaymentError::ProviderError {
                provider: self.name().to_string(),
                message: format!("HTTP {}: {}", status, truncate(&text, 300)),
                provider_code: Some(status.as_u16().to_string()),
                retryable: status.is_server_error(),
            });
        }

        if text.trim().is_empty() {
            return Ok(GatewayOrderResponse::default());
        }

        match serde_json::from_str::<ZenoOrderReply>(&text) {
            Ok(reply) => Ok(reply.into()),
            Err(e) => {
                // A 2xx with an unrecognizable body still means the push
                // went out. Rejections come back as JSON.
                warn!(error = %e, "unparseable gateway reply on 2xx, treating as accepted");
                Ok(GatewayOrderResponse {
                    status: None,
                    message: Some(truncate(&text, 300)),
                    gateway_transaction_id: None,
                })
            }
        }
    }

    fn name(&self) -> &'static str {
        "zeno"
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> ZenoConfig {
        ZenoConfig {
            api_key: "test-key".to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn endpoint_joins_cleanly_regardless_of_trailing_slash() {
        let gateway = ZenoGateway::new(config("https://zenoapi.com/")).unwrap();
        assert_eq!(
            gateway.orders_endpoint(),
            "https://zenoapi.com/api/payments/mobile_money_tanzania"
        );
    }

    #[test]
    fn reply_with_success_resultcode_maps_to_accepted() {
        let reply: ZenoOrderReply = serde_json::from_str(
            r#"{"resultcode":"000","message":"Request in progress","transid":"1003020496"}"#,
        )
        .unwrap();
        let response: GatewayOrderResponse = reply.into();
        assert!(response.is_accepted());
        assert_eq!(
            response.gateway_transaction_id.as_deref(),
            Some("1003020496")
        );
    }

    #[test]
    fn reply_status_word_wins_over_resultcode() {
        let reply: ZenoOrderReply =
            serde_json::from_str(r#"{"status":"failed","resultcode":"000"}"#).unwrap();
        let response: GatewayOrderResponse = reply.into();
        assert!(!response.is_accepted());
    }

    #[test]
    fn non_success_resultcode_maps_to_rejection() {
        let reply: ZenoOrderReply = serde_json::from_str(
            r#"{"resultcode":"403","message":"invalid mobile number"}"#,
        )
        .unwrap();
        let response: GatewayOrderResponse = reply.into();
        assert!(!response.is_accepted());
        assert_eq!(response.rejection_reason(), "invalid mobile number");
    }

    #[test]
    fn transid_is_preferred_over_reference() {
        let reply: ZenoOrderReply = serde_json::from_str(
            r#"{"status":"success","reference":"REF-1","transid":"TID-1"}"#,
        )
        .unwrap();
        let response: GatewayOrderResponse = reply.into();
        assert_eq!(response.gateway_transaction_id.as_deref(), Some("TID-1"));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let reply: ZenoOrderReply = serde_json::from_str(
            r#"{"status":"success","amount":5000,"channel":"MPESA-TZ","extra":{"a":1}}"#,
        )
        .unwrap();
        let response: GatewayOrderResponse = reply.into();
        assert!(response.is_accepted());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 300), "short");
        let long = "é".repeat(200);
        let cut = truncate(&long, 301);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 304);
    }
}
