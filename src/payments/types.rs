use crate::payments::error::{PaymentError, PaymentResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Mobile-network channel hints understood by the gateway.
///
/// The wire codes are what the gateway expects in its optional `channel`
/// field; omitting the field entirely is always valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Mpesa,
    TigoPesa,
    AirtelMoney,
    HaloPesa,
    AzamPesa,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Mpesa => "MPESA-TZ",
            Channel::TigoPesa => "TIGO-TZ",
            Channel::AirtelMoney => "AIRTEL-TZ",
            Channel::HaloPesa => "HALOPESA-TZ",
            Channel::AzamPesa => "AZAMPESA-TZ",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a payment session.
///
/// Transitions are monotonic: pending → processing → {completed, failed}.
/// A failed session stays failed as a row; resubmitting the same request
/// creates a fresh session row under the same transaction reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SessionStatus::Pending),
            "processing" => Some(SessionStatus::Processing),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// Only a failed session may be resubmitted under the same reference.
    pub fn allows_retry(&self) -> bool {
        matches!(self, SessionStatus::Failed)
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One line of an order intent as submitted by the client.
///
/// `price` is the unit price the client saw at checkout; when absent the
/// live catalog price is used at order creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderIntentItem {
    pub product_id: i64,
    pub quantity: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
}

/// The serialized cart a payment session carries until reconciliation
/// turns it into an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OrderIntent {
    pub items: Vec<OrderIntentItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Validated input for payment initiation.
#[derive(Debug, Clone)]
pub struct InitiatePayment {
    pub user_id: Uuid,
    /// Smallest-currency-unit amount (TZS has no subunit).
    pub amount: i64,
    pub currency: String,
    /// Free-text provider label as submitted, e.g. "vodacom".
    pub provider: String,
    pub phone_number: String,
    pub intent: OrderIntent,
    pub buyer_name: Option<String>,
    pub buyer_email: Option<String>,
    pub idempotency_key: Option<String>,
}

impl InitiatePayment {
    /// Boundary validation of the raw request. Phone shape is checked
    /// separately by the normalizer since it owns the format rules.
    pub fn validate(&self) -> PaymentResult<()> {
        if self.amount <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be a positive integer in the smallest currency unit"
                    .to_string(),
                field: Some("amount".to_string()),
            });
        }

        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::ValidationError {
                message: "currency must be a 3-letter code".to_string(),
                field: Some("currency".to_string()),
            });
        }

        if self.provider.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "provider is required".to_string(),
                field: Some("provider".to_string()),
            });
        }

        if self.intent.items.is_empty() {
            return Err(PaymentError::ValidationError {
                message: "order intent must contain at least one item".to_string(),
                field: Some("items".to_string()),
            });
        }

        for item in &self.intent.items {
            if item.product_id <= 0 {
                return Err(PaymentError::ValidationError {
                    message: format!("invalid product id {}", item.product_id),
                    field: Some("items".to_string()),
                });
            }
            if item.quantity <= 0 {
                return Err(PaymentError::ValidationError {
                    message: format!("invalid quantity for product {}", item.product_id),
                    field: Some("items".to_string()),
                });
            }
            if let Some(price) = item.price {
                if price < 0 {
                    return Err(PaymentError::ValidationError {
                        message: format!("invalid price for product {}", item.product_id),
                        field: Some("items".to_string()),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn normalized_currency(&self) -> String {
        self.currency.trim().to_uppercase()
    }
}

/// Gateway callback payload. Field names are tolerant of the aliases the
/// gateway has used across API revisions.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookNotification {
    /// The gateway echoes our transaction reference back as its order id.
    #[serde(default, alias = "orderId")]
    pub order_id: Option<String>,
    #[serde(default, alias = "paymentStatus", alias = "status")]
    pub payment_status: Option<String>,
    /// The gateway's own settlement identifier.
    #[serde(default, alias = "transid")]
    pub reference: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> InitiatePayment {
        InitiatePayment {
            user_id: Uuid::new_v4(),
            amount: 5000,
            currency: "TZS".to_string(),
            provider: "vodacom".to_string(),
            phone_number: "0712345678".to_string(),
            intent: OrderIntent {
                items: vec![OrderIntentItem {
                    product_id: 1,
                    quantity: 2,
                    price: Some(2500),
                }],
                shipping_address: Some("Dar es Salaam".to_string()),
                notes: None,
            },
            buyer_name: None,
            buyer_email: None,
            idempotency_key: None,
        }
    }

    #[test]
    fn valid_request_passes_validation() {
        assert!(sample_request().validate().is_ok());
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let mut req = sample_request();
        req.amount = 0;
        assert!(req.validate().is_err());
        req.amount = -100;
        assert!(req.validate().is_err());
    }

    #[test]
    fn bad_currency_is_rejected() {
        let mut req = sample_request();
        req.currency = "TZSH".to_string();
        assert!(req.validate().is_err());
        req.currency = "t1s".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn empty_items_are_rejected() {
        let mut req = sample_request();
        req.intent.items.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut req = sample_request();
        req.intent.items[0].quantity = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn currency_is_normalized_uppercase() {
        let mut req = sample_request();
        req.currency = " tzs ".to_string();
        assert_eq!(req.normalized_currency(), "TZS");
    }

    #[test]
    fn order_intent_round_trips_through_json() {
        let intent = OrderIntent {
            items: vec![
                OrderIntentItem {
                    product_id: 7,
                    quantity: 1,
                    price: None,
                },
                OrderIntentItem {
                    product_id: 3,
                    quantity: 4,
                    price: Some(1200),
                },
            ],
            shipping_address: None,
            notes: Some("call on arrival".to_string()),
        };
        let value = serde_json::to_value(&intent).expect("serialization should succeed");
        let parsed: OrderIntent =
            serde_json::from_value(value).expect("deserialization should succeed");
        assert_eq!(parsed, intent);
    }

    #[test]
    fn webhook_notification_accepts_field_aliases() {
        let raw = serde_json::json!({
            "orderId": "A1B2C3",
            "status": "COMPLETED",
            "transid": "1003020496"
        });
        let parsed: WebhookNotification =
            serde_json::from_value(raw).expect("deserialization should succeed");
        assert_eq!(parsed.order_id.as_deref(), Some("A1B2C3"));
        assert_eq!(parsed.payment_status.as_deref(), Some("COMPLETED"));
        assert_eq!(parsed.reference.as_deref(), Some("1003020496"));
    }

    #[test]
    fn status_transitions_are_monotonic() {
        use SessionStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
        assert!(Failed.allows_retry());
        assert!(!Processing.allows_retry());
    }

    #[test]
    fn status_db_round_trip() {
        for status in [
            SessionStatus::Pending,
            SessionStatus::Processing,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            assert_eq!(SessionStatus::from_db(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::from_db("unknown"), None);
    }

    #[test]
    fn channel_wire_codes_are_stable() {
        assert_eq!(Channel::Mpesa.as_str(), "MPESA-TZ");
        assert_eq!(Channel::TigoPesa.as_str(), "TIGO-TZ");
        assert_eq!(Channel::AirtelMoney.to_string(), "AIRTEL-TZ");
    }
}
