//! Gateway attempt engine.
//!
//! Gateway deployments are inconsistent about which phone format and
//! which channel field they accept, so a single submission is tried as a
//! sequence of format combinations: each phone variant first with the
//! resolved channel hint, then without it. The first accepted attempt
//! wins and no further combinations are tried.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::{GatewayOrderRequest, GatewayOrderResponse, MobileMoneyGateway};
use crate::payments::phone::{mask_phone, phone_variants};
use crate::payments::types::Channel;
use serde::Serialize;
use tracing::{debug, warn};

/// Three phone variants times with/without channel.
pub const MAX_ATTEMPTS: usize = 6;

/// One planned format combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAttempt {
    pub phone: String,
    pub channel: Option<Channel>,
}

/// Everything about the order except the fields the engine varies.
#[derive(Debug, Clone)]
pub struct OrderSubmission {
    pub reference: String,
    pub buyer_name: String,
    pub buyer_email: String,
    pub amount: i64,
    pub currency: String,
    pub webhook_url: String,
}

/// Audit record of one attempt, kept with the session log trail.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    pub attempt: usize,
    pub phone: String,
    pub channel: Option<&'static str>,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The attempt that the gateway accepted.
#[derive(Debug)]
pub struct AcceptedAttempt {
    pub response: GatewayOrderResponse,
    pub phone_used: String,
    pub channel_used: Option<Channel>,
    pub attempts_used: usize,
    pub reports: Vec<AttemptReport>,
}

/// Expands a raw phone number and optional channel into the ordered
/// attempt list. With a channel the list is six entries, without it
/// three; it is never empty for a well-formed number.
pub fn build_attempt_plan(
    raw_phone: &str,
    channel: Option<Channel>,
) -> PaymentResult<Vec<PlannedAttempt>> {
    let variants = phone_variants(raw_phone)?;
    let mut plan = Vec::with_capacity(variants.len() * 2);
    for phone in variants {
        if let Some(channel) = channel {
            plan.push(PlannedAttempt {
                phone: phone.clone(),
                channel: Some(channel),
            });
        }
        plan.push(PlannedAttempt {
            phone,
            channel: None,
        });
    }
    debug_assert!(plan.len() <= MAX_ATTEMPTS);
    Ok(plan)
}

/// Runs the plan against the gateway until one attempt is accepted.
///
/// Rejections and transport errors both advance to the next combination;
/// the distinction only matters for the audit trail. When every
/// combination has been tried the whole submission fails with the last
/// reason the gateway gave.
pub async fn submit_with_fallback(
    gateway: &dyn MobileMoneyGateway,
    submission: &OrderSubmission,
    raw_phone: &str,
    channel: Option<Channel>,
) -> PaymentResult<AcceptedAttempt> {
    let plan = build_attempt_plan(raw_phone, channel)?;
    let mut reports = Vec::with_capacity(plan.len());
    let mut last_reason = String::from("gateway rejected all submission formats");

    for (index, attempt) in plan.iter().enumerate() {
        let attempt_number = index + 1;
        let request = GatewayOrderRequest {
            reference: submission.reference.clone(),
            buyer_name: submission.buyer_name.clone(),
            buyer_email: submission.buyer_email.clone(),
            phone_number: attempt.phone.clone(),
            amount: submission.amount,
            currency: submission.currency.clone(),
            channel: attempt.channel.map(|c| c.as_str().to_string()),
            webhook_url: submission.webhook_url.clone(),
        };

        debug!(
            reference = %submission.reference,
            attempt = attempt_number,
            phone = %mask_phone(&attempt.phone),
            channel = ?attempt.channel.map(|c| c.as_str()),
            "submitting gateway order"
        );

        match gateway.create_order(request).await {
            Ok(response) if response.is_accepted() => {
                reports.push(AttemptReport {
                    attempt: attempt_number,
                    phone: mask_phone(&attempt.phone),
                    channel: attempt.channel.map(|c| c.as_str()),
                    accepted: true,
                    detail: response.status.clone(),
                });
                return Ok(AcceptedAttempt {
                    response,
                    phone_used: attempt.phone.clone(),
                    channel_used: attempt.channel,
                    attempts_used: attempt_number,
                    reports,
                });
            }
            Ok(response) => {
                let reason = response.rejection_reason();
                warn!(
                    reference = %submission.reference,
                    attempt = attempt_number,
                    reason = %reason,
                    "gateway rejected attempt"
                );
                reports.push(AttemptReport {
                    attempt: attempt_number,
                    phone: mask_phone(&attempt.phone),
                    channel: attempt.channel.map(|c| c.as_str()),
                    accepted: false,
                    detail: Some(reason.clone()),
                });
                last_reason = reason;
            }
            Err(err) => {
                warn!(
                    reference = %submission.reference,
                    attempt = attempt_number,
                    error = %err,
                    "gateway attempt errored"
                );
                reports.push(AttemptReport {
                    attempt: attempt_number,
                    phone: mask_phone(&attempt.phone),
                    channel: attempt.channel.map(|c| c.as_str()),
                    accepted: false,
                    detail: Some(err.to_string()),
                });
                last_reason = err.to_string();
            }
        }
    }

    Err(PaymentError::GatewayRejected {
        reference: submission.reference.clone(),
        message: last_reason,
        attempts: reports.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn submission() -> OrderSubmission {
        OrderSubmission {
            reference: "ABCDEF1234567890ABCDEF12".to_string(),
            buyer_name: "Guest".to_string(),
            buyer_email: "guest@example.com".to_string(),
            amount: 5000,
            currency: "TZS".to_string(),
            webhook_url: "https://shop.example/api/payments/webhook".to_string(),
        }
    }

    /// Replays a scripted sequence of replies and records each request.
    struct ScriptedGateway {
        replies: Mutex<VecDeque<PaymentResult<GatewayOrderResponse>>>,
        seen: Mutex<Vec<(String, Option<String>)>>,
    }

    impl ScriptedGateway {
        fn new(replies: Vec<PaymentResult<GatewayOrderResponse>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<(String, Option<String>)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MobileMoneyGateway for ScriptedGateway {
        async fn create_order(
            &self,
            request: GatewayOrderRequest,
        ) -> PaymentResult<GatewayOrderResponse> {
            self.seen
                .lock()
                .unwrap()
                .push((request.phone_number, request.channel));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(rejected("script exhausted")))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn accepted() -> GatewayOrderResponse {
        GatewayOrderResponse {
            status: Some("success".to_string()),
            message: None,
            gateway_transaction_id: Some("GW-9".to_string()),
        }
    }

    fn rejected(reason: &str) -> GatewayOrderResponse {
        GatewayOrderResponse {
            status: Some("failed".to_string()),
            message: Some(reason.to_string()),
            gateway_transaction_id: None,
        }
    }

    #[test]
    fn plan_with_channel_has_six_ordered_attempts() {
        let plan = build_attempt_plan("0712345678", Some(Channel::Mpesa)).unwrap();
        assert_eq!(plan.len(), 6);
        // Per variant: channel first, then bare.
        assert_eq!(plan[0].phone, "0712345678");
        assert_eq!(plan[0].channel, Some(Channel::Mpesa));
        assert_eq!(plan[1].phone, "0712345678");
        assert_eq!(plan[1].channel, None);
        assert_eq!(plan[2].phone, "255712345678");
        assert_eq!(plan[4].phone, "+255712345678");
        assert_eq!(plan[5].channel, None);
    }

    #[test]
    fn plan_without_channel_has_three_attempts() {
        let plan = build_attempt_plan("0712345678", None).unwrap();
        assert_eq!(plan.len(), 3);
        assert!(plan.iter().all(|a| a.channel.is_none()));
    }

    #[test]
    fn plan_rejects_malformed_phone() {
        assert!(build_attempt_plan("12345", Some(Channel::Mpesa)).is_err());
    }

    #[tokio::test]
    async fn first_accepted_attempt_stops_the_engine() {
        let gateway = ScriptedGateway::new(vec![
            Ok(rejected("unknown channel")),
            Ok(rejected("unknown channel")),
            Ok(accepted()),
        ]);
        let outcome = submit_with_fallback(
            &gateway,
            &submission(),
            "0712345678",
            Some(Channel::Mpesa),
        )
        .await
        .expect("third attempt should be accepted");

        assert_eq!(outcome.attempts_used, 3);
        assert_eq!(outcome.phone_used, "255712345678");
        assert_eq!(outcome.channel_used, Some(Channel::Mpesa));
        assert_eq!(gateway.seen().len(), 3);
        assert_eq!(outcome.reports.len(), 3);
        assert!(outcome.reports[2].accepted);
        assert!(!outcome.reports[0].accepted);
    }

    #[tokio::test]
    async fn transport_errors_advance_to_the_next_combination() {
        let gateway = ScriptedGateway::new(vec![
            Err(PaymentError::NetworkError {
                message: "connection reset".to_string(),
            }),
            Ok(accepted()),
        ]);
        let outcome = submit_with_fallback(&gateway, &submission(), "0712345678", None)
            .await
            .expect("second attempt should be accepted");
        assert_eq!(outcome.attempts_used, 2);
        assert_eq!(outcome.phone_used, "255712345678");
    }

    #[tokio::test]
    async fn exhaustion_reports_attempt_count_and_last_reason() {
        let gateway = ScriptedGateway::new(
            (0..6)
                .map(|i| Ok(rejected(&format!("reason {i}"))))
                .collect(),
        );
        let err = submit_with_fallback(
            &gateway,
            &submission(),
            "0712345678",
            Some(Channel::TigoPesa),
        )
        .await
        .expect_err("all attempts rejected");

        match err {
            PaymentError::GatewayRejected {
                reference,
                message,
                attempts,
            } => {
                assert_eq!(reference, submission().reference);
                assert_eq!(attempts, 6);
                assert_eq!(message, "reason 5");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(gateway.seen().len(), 6);
    }

    #[tokio::test]
    async fn channelless_exhaustion_uses_three_attempts() {
        let gateway =
            ScriptedGateway::new((0..3).map(|_| Ok(rejected("no"))).collect());
        let err = submit_with_fallback(&gateway, &submission(), "712345678", None)
            .await
            .expect_err("all attempts rejected");
        match err {
            PaymentError::GatewayRejected { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn attempts_vary_phone_format_and_channel_presence() {
        let gateway = ScriptedGateway::new(vec![]);
        let _ = submit_with_fallback(
            &gateway,
            &submission(),
            "0712345678",
            Some(Channel::Mpesa),
        )
        .await;
        let seen = gateway.seen();
        assert_eq!(
            seen,
            vec![
                ("0712345678".to_string(), Some("MPESA-TZ".to_string())),
                ("0712345678".to_string(), None),
                ("255712345678".to_string(), Some("MPESA-TZ".to_string())),
                ("255712345678".to_string(), None),
                ("+255712345678".to_string(), Some("MPESA-TZ".to_string())),
                ("+255712345678".to_string(), None),
            ]
        );
    }
}
