use crate::payments::error::PaymentResult;
use async_trait::async_trait;

/// One push-payment order submission to the mobile money gateway.
///
/// `reference` doubles as the gateway-side order id, which is how the
/// webhook finds its way back to the session.
#[derive(Debug, Clone)]
pub struct GatewayOrderRequest {
    pub reference: String,
    pub buyer_name: String,
    pub buyer_email: String,
    pub phone_number: String,
    /// Smallest-currency-unit amount.
    pub amount: i64,
    pub currency: String,
    /// Network hint; `None` lets the gateway route by prefix.
    pub channel: Option<String>,
    pub webhook_url: String,
}

/// Normalized gateway reply. Gateways disagree on field names and on
/// whether a status is present at all, so acceptance is judged here in
/// one place rather than in each client.
#[derive(Debug, Clone, Default)]
pub struct GatewayOrderResponse {
    pub status: Option<String>,
    pub message: Option<String>,
    /// The gateway's own id for the initiated payment, when it sends one.
    pub gateway_transaction_id: Option<String>,
}

/// Status words that mean "the push was accepted and is in flight".
const ACCEPTED_STATUSES: &[&str] = &[
    "success",
    "successful",
    "processing",
    "pending",
    "queued",
    "initiated",
    "created",
    "ok",
];

impl GatewayOrderResponse {
    /// A 2xx reply with no status field at all counts as accepted; some
    /// gateway deployments only send a message body.
    pub fn is_accepted(&self) -> bool {
        match &self.status {
            None => true,
            Some(status) => {
                let status = status.trim().to_lowercase();
                ACCEPTED_STATUSES.contains(&status.as_str())
            }
        }
    }

    pub fn rejection_reason(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.status.clone())
            .unwrap_or_else(|| "gateway rejected the order".to_string())
    }
}

/// Seam between the attempt engine and a concrete gateway client.
#[async_trait]
pub trait MobileMoneyGateway: Send + Sync {
    /// Submits one order. Implementations must not retry internally;
    /// retry policy belongs to the attempt engine.
    async fn create_order(&self, request: GatewayOrderRequest)
        -> PaymentResult<GatewayOrderResponse>;

    fn name(&self) -> &'static str;
}
