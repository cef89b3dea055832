//! Payment initiation: idempotency resolution, session creation and the
//! gateway submission handshake.

use crate::database::error::DatabaseError;
use crate::database::session_repository::{NewSession, PaymentSession, SessionStore};
use crate::payments::attempts::{submit_with_fallback, OrderSubmission};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::MobileMoneyGateway;
use crate::payments::idempotency;
use crate::payments::phone::{self, mask_phone};
use crate::payments::types::{InitiatePayment, SessionStatus};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct InitiationConfig {
    /// Callback URL handed to the gateway with every order.
    pub webhook_url: String,
    /// Buyer identity defaults for guest checkouts; the gateway requires
    /// both fields even though we key everything on the phone number.
    pub default_buyer_name: String,
    pub default_buyer_email: String,
}

/// What initiation produced for the caller.
#[derive(Debug)]
pub enum InitiationOutcome {
    /// A new gateway submission was accepted; session is processing.
    Started {
        session: PaymentSession,
        attempts_used: usize,
    },
    /// An equivalent request is already in flight or done; no gateway
    /// call was made.
    Reused { session: PaymentSession },
}

impl InitiationOutcome {
    pub fn session(&self) -> &PaymentSession {
        match self {
            InitiationOutcome::Started { session, .. } => session,
            InitiationOutcome::Reused { session } => session,
        }
    }

    pub fn reused(&self) -> bool {
        matches!(self, InitiationOutcome::Reused { .. })
    }
}

pub struct InitiationService {
    sessions: Arc<dyn SessionStore>,
    gateway: Arc<dyn MobileMoneyGateway>,
    config: InitiationConfig,
}

impl InitiationService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        gateway: Arc<dyn MobileMoneyGateway>,
        config: InitiationConfig,
    ) -> Self {
        Self {
            sessions,
            gateway,
            config,
        }
    }

    /// Runs one checkout submission end to end: validate, resolve the
    /// deterministic reference, collapse duplicates onto the existing
    /// session, otherwise create a pending session and push it through
    /// the gateway attempt engine.
    pub async fn initiate(&self, request: InitiatePayment) -> PaymentResult<InitiationOutcome> {
        request.validate()?;

        let local_phone = phone::normalize_local(&request.phone_number)?;
        let phone_cc = phone::to_country_code(&request.phone_number)?;
        let channel = phone::map_provider_to_channel(&request.provider);
        let currency = request.normalized_currency();

        let reference = idempotency::transaction_reference(
            request.idempotency_key.as_deref(),
            request.user_id,
            request.amount,
            &currency,
            &phone_cc,
            channel,
            &request.provider,
            &request.intent,
        )?;

        // Idempotency gate: the newest session for (user, reference)
        // decides whether this request is new, a retry, or a duplicate.
        if let Some(existing) = self
            .sessions
            .find_latest_for_user(request.user_id, &reference)
            .await
            .map_err(store_error)?
        {
            match existing.status() {
                Some(SessionStatus::Failed) => {
                    info!(
                        reference = %reference,
                        prior_session = %existing.id,
                        "resubmission after failure, starting a new attempt"
                    );
                    let _ = self
                        .sessions
                        .append_log(
                            existing.id,
                            "retry_after_failure",
                            "new attempt created under the same reference",
                            None,
                        )
                        .await;
                }
                _ => {
                    info!(
                        reference = %reference,
                        status = %existing.status,
                        "duplicate request collapsed onto existing session"
                    );
                    let _ = self
                        .sessions
                        .append_log(
                            existing.id,
                            "duplicate_request",
                            "request matched an in-flight or settled session",
                            None,
                        )
                        .await;
                    return Ok(InitiationOutcome::Reused { session: existing });
                }
            }
        }

        let intent_json =
            serde_json::to_value(&request.intent).map_err(|e| PaymentError::SerializationError {
                message: format!("order intent encoding failed: {e}"),
            })?;

        let session = self
            .sessions
            .create_session(NewSession {
                user_id: request.user_id,
                transaction_reference: reference.clone(),
                amount: request.amount,
                currency: currency.clone(),
                provider: request.provider.trim().to_string(),
                channel: channel.map(|c| c.as_str().to_string()),
                phone_number: local_phone.clone(),
                order_intent: intent_json,
            })
            .await
            .map_err(store_error)?;

        let _ = self
            .sessions
            .append_log(
                session.id,
                "initiated",
                "payment session created",
                Some(json!({
                    "phone": mask_phone(&local_phone),
                    "channel": channel.map(|c| c.as_str()),
                    "amount": request.amount,
                    "currency": currency,
                })),
            )
            .await;

        let submission = OrderSubmission {
            reference: reference.clone(),
            buyer_name: request
                .buyer_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| self.config.default_buyer_name.clone()),
            buyer_email: request
                .buyer_email
                .clone()
                .filter(|email| !email.trim().is_empty())
                .unwrap_or_else(|| self.config.default_buyer_email.clone()),
            amount: request.amount,
            currency: currency.clone(),
            webhook_url: self.config.webhook_url.clone(),
        };

        match submit_with_fallback(self.gateway.as_ref(), &submission, &local_phone, channel).await
        {
            Ok(accepted) => {
                let session = self
                    .sessions
                    .mark_processing(
                        session.id,
                        accepted.response.gateway_transaction_id.as_deref(),
                    )
                    .await
                    .map_err(store_error)?;

                info!(
                    reference = %reference,
                    session = %session.id,
                    attempts = accepted.attempts_used,
                    phone = %mask_phone(&accepted.phone_used),
                    channel = ?accepted.channel_used.map(|c| c.as_str()),
                    "gateway accepted payment order"
                );
                let _ = self
                    .sessions
                    .append_log(
                        session.id,
                        "gateway_accepted",
                        "gateway accepted order submission",
                        Some(json!({
                            "attempts": accepted.reports,
                            "gateway_transaction_id": session.gateway_transaction_id,
                        })),
                    )
                    .await;

                Ok(InitiationOutcome::Started {
                    session,
                    attempts_used: accepted.attempts_used,
                })
            }
            Err(err) => {
                let reason = match &err {
                    PaymentError::GatewayRejected { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                warn!(
                    reference = %reference,
                    session = %session.id,
                    reason = %reason,
                    "all gateway attempts failed, marking session failed"
                );
                if let Err(db_err) = self.sessions.mark_failed(session.id, &reason).await {
                    error!(
                        session = %session.id,
                        error = %db_err,
                        "failed to record gateway rejection on session"
                    );
                }
                let _ = self
                    .sessions
                    .append_log(
                        session.id,
                        "gateway_rejected",
                        "every submission format was rejected",
                        Some(json!({ "reason": reason })),
                    )
                    .await;
                Err(err)
            }
        }
    }
}

fn store_error(err: DatabaseError) -> PaymentError {
    PaymentError::StorageError {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::gateway::GatewayOrderRequest;
    use crate::payments::gateway::GatewayOrderResponse;
    use crate::payments::types::{OrderIntent, OrderIntentItem};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct MemorySessions {
        rows: Mutex<Vec<PaymentSession>>,
        logs: Mutex<Vec<(Uuid, String)>>,
    }

    impl MemorySessions {
        fn new() -> Self {
            Self {
                rows: Mutex::new(Vec::new()),
                logs: Mutex::new(Vec::new()),
            }
        }

        fn session_count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        fn statuses(&self) -> Vec<String> {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.status.clone())
                .collect()
        }

        fn events(&self) -> Vec<String> {
            self.logs
                .lock()
                .unwrap()
                .iter()
                .map(|(_, event)| event.clone())
                .collect()
        }
    }

    #[async_trait]
    impl SessionStore for MemorySessions {
        async fn create_session(
            &self,
            session: NewSession,
        ) -> Result<PaymentSession, DatabaseError> {
            let row = PaymentSession {
                id: Uuid::new_v4(),
                user_id: session.user_id,
                transaction_reference: session.transaction_reference,
                amount: session.amount,
                currency: session.currency,
                provider: session.provider,
                channel: session.channel,
                phone_number: session.phone_number,
                order_intent: session.order_intent,
                status: "pending".to_string(),
                failure_reason: None,
                gateway_transaction_id: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            self.rows.lock().unwrap().push(row.clone());
            Ok(row)
        }

        async fn find_latest_for_user(
            &self,
            user_id: Uuid,
            reference: &str,
        ) -> Result<Option<PaymentSession>, DatabaseError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|s| s.user_id == user_id && s.transaction_reference == reference)
                .cloned())
        }

        async fn find_latest_by_reference(
            &self,
            reference: &str,
        ) -> Result<Option<PaymentSession>, DatabaseError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|s| s.transaction_reference == reference)
                .cloned())
        }

        async fn mark_processing(
            &self,
            id: Uuid,
            gateway_transaction_id: Option<&str>,
        ) -> Result<PaymentSession, DatabaseError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| DatabaseError::from_sqlx(sqlx::Error::RowNotFound))?;
            row.status = "processing".to_string();
            if let Some(gtid) = gateway_transaction_id {
                row.gateway_transaction_id = Some(gtid.to_string());
            }
            row.updated_at = Utc::now();
            Ok(row.clone())
        }

        async fn mark_completed(&self, id: Uuid) -> Result<PaymentSession, DatabaseError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| DatabaseError::from_sqlx(sqlx::Error::RowNotFound))?;
            row.status = "completed".to_string();
            row.failure_reason = None;
            row.updated_at = Utc::now();
            Ok(row.clone())
        }

        async fn mark_failed(
            &self,
            id: Uuid,
            reason: &str,
        ) -> Result<Option<PaymentSession>, DatabaseError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| DatabaseError::from_sqlx(sqlx::Error::RowNotFound))?;
            if row.status == "completed" {
                return Ok(None);
            }
            row.status = "failed".to_string();
            row.failure_reason = Some(reason.to_string());
            row.updated_at = Utc::now();
            Ok(Some(row.clone()))
        }

        async fn find_stale_processing(
            &self,
            cutoff: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<PaymentSession>, DatabaseError> {
            let mut stale: Vec<PaymentSession> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.status == "processing" && s.created_at < cutoff)
                .cloned()
                .collect();
            stale.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            stale.truncate(limit as usize);
            Ok(stale)
        }

        async fn append_log(
            &self,
            session_id: Uuid,
            event: &str,
            _message: &str,
            _context: Option<serde_json::Value>,
        ) -> Result<(), DatabaseError> {
            self.logs
                .lock()
                .unwrap()
                .push((session_id, event.to_string()));
            Ok(())
        }
    }

    struct CountingGateway {
        calls: AtomicUsize,
        accept: bool,
    }

    impl CountingGateway {
        fn accepting() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                accept: true,
            }
        }

        fn rejecting() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                accept: false,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MobileMoneyGateway for CountingGateway {
        async fn create_order(
            &self,
            _request: GatewayOrderRequest,
        ) -> PaymentResult<GatewayOrderResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.accept {
                Ok(GatewayOrderResponse {
                    status: Some("success".to_string()),
                    message: None,
                    gateway_transaction_id: Some("GW-42".to_string()),
                })
            } else {
                Ok(GatewayOrderResponse {
                    status: Some("failed".to_string()),
                    message: Some("unsupported msisdn".to_string()),
                    gateway_transaction_id: None,
                })
            }
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn request() -> InitiatePayment {
        InitiatePayment {
            user_id: Uuid::parse_str("6f0b4a9e-2f6d-4e61-9d3a-53f6f9a51c11").unwrap(),
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

    fn service(
        sessions: Arc<MemorySessions>,
        gateway: Arc<CountingGateway>,
    ) -> InitiationService {
        InitiationService::new(
            sessions,
            gateway,
            InitiationConfig {
                webhook_url: "https://shop.example/api/payments/webhook".to_string(),
                default_buyer_name: "Guest Shopper".to_string(),
                default_buyer_email: "orders@shop.example".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn fresh_request_creates_processing_session() {
        let sessions = Arc::new(MemorySessions::new());
        let gateway = Arc::new(CountingGateway::accepting());
        let svc = service(sessions.clone(), gateway.clone());

        let outcome = svc.initiate(request()).await.expect("initiation");
        assert!(!outcome.reused());
        let session = outcome.session();
        assert_eq!(session.status, "processing");
        assert_eq!(session.gateway_transaction_id.as_deref(), Some("GW-42"));
        assert_eq!(session.phone_number, "0712345678");
        assert_eq!(session.channel.as_deref(), Some("MPESA-TZ"));
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn identical_request_reuses_the_session_without_gateway_call() {
        let sessions = Arc::new(MemorySessions::new());
        let gateway = Arc::new(CountingGateway::accepting());
        let svc = service(sessions.clone(), gateway.clone());

        let first = svc.initiate(request()).await.expect("first");
        let second = svc.initiate(request()).await.expect("second");

        assert!(second.reused());
        assert_eq!(
            first.session().transaction_reference,
            second.session().transaction_reference
        );
        // Exactly one session row and one gateway call for two submissions.
        assert_eq!(sessions.session_count(), 1);
        assert_eq!(gateway.calls(), 1);
        assert!(sessions.events().contains(&"duplicate_request".to_string()));
    }

    #[tokio::test]
    async fn differently_shaped_phone_collapses_to_the_same_reference() {
        let sessions = Arc::new(MemorySessions::new());
        let gateway = Arc::new(CountingGateway::accepting());
        let svc = service(sessions.clone(), gateway.clone());

        let first = svc.initiate(request()).await.expect("first");

        let mut same_subscriber = request();
        same_subscriber.phone_number = "+255712345678".to_string();
        let second = svc.initiate(same_subscriber).await.expect("second");

        assert!(second.reused());
        assert_eq!(
            first.session().transaction_reference,
            second.session().transaction_reference
        );
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_gateway_marks_session_failed_and_keeps_reference() {
        let sessions = Arc::new(MemorySessions::new());
        let gateway = Arc::new(CountingGateway::rejecting());
        let svc = service(sessions.clone(), gateway.clone());

        let err = svc.initiate(request()).await.expect_err("should fail");
        match &err {
            PaymentError::GatewayRejected {
                attempts, message, ..
            } => {
                assert_eq!(*attempts, 6);
                assert_eq!(message, "unsupported msisdn");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.transaction_reference().is_some());
        assert_eq!(sessions.statuses(), vec!["failed".to_string()]);
        assert_eq!(gateway.calls(), 6);
    }

    #[tokio::test]
    async fn failed_session_is_retried_under_the_same_reference() {
        let sessions = Arc::new(MemorySessions::new());

        // First round: every format rejected.
        let rejecting = Arc::new(CountingGateway::rejecting());
        let svc = service(sessions.clone(), rejecting.clone());
        let err = svc.initiate(request()).await.expect_err("first fails");
        let failed_reference = err.transaction_reference().map(str::to_string).unwrap();

        // Second round: gateway recovered.
        let accepting = Arc::new(CountingGateway::accepting());
        let svc = service(sessions.clone(), accepting.clone());
        let outcome = svc.initiate(request()).await.expect("retry succeeds");

        assert!(!outcome.reused());
        assert_eq!(outcome.session().transaction_reference, failed_reference);
        assert_eq!(outcome.session().status, "processing");
        // A retry is a new attempt row, not an update of the failed one.
        assert_eq!(sessions.session_count(), 2);
        assert_eq!(
            sessions.statuses(),
            vec!["failed".to_string(), "processing".to_string()]
        );
        assert!(sessions
            .events()
            .contains(&"retry_after_failure".to_string()));
    }

    #[tokio::test]
    async fn unknown_provider_label_still_initiates_without_channel() {
        let sessions = Arc::new(MemorySessions::new());
        let gateway = Arc::new(CountingGateway::accepting());
        let svc = service(sessions.clone(), gateway.clone());

        let mut req = request();
        req.provider = "some-new-network".to_string();
        let outcome = svc.initiate(req).await.expect("initiation");
        assert_eq!(outcome.session().channel, None);
    }

    #[tokio::test]
    async fn invalid_phone_fails_before_any_session_is_created() {
        let sessions = Arc::new(MemorySessions::new());
        let gateway = Arc::new(CountingGateway::accepting());
        let svc = service(sessions.clone(), gateway.clone());

        let mut req = request();
        req.phone_number = "12345".to_string();
        let err = svc.initiate(req).await.expect_err("bad phone");
        assert!(matches!(err, PaymentError::InvalidPhoneFormat { .. }));
        assert_eq!(sessions.session_count(), 0);
        assert_eq!(gateway.calls(), 0);
    }
}
