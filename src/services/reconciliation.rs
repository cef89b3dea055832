//! Webhook reconciliation and orphan recovery.
//!
//! Gateway callbacks arrive at-least-once and out of order, so turning
//! "payment completed" into an order has to tolerate duplicates, races
//! with the recovery job, and references that are legitimately reused
//! after the duplicate window. The only synchronization primitive is
//! the read-then-write discipline against the order store; there are no
//! in-process locks to lean on.

use crate::database::error::DatabaseError;
use crate::database::order_repository::{NewOrder, NewOrderItem, Order, OrderStore};
use crate::database::product_repository::ProductCatalog;
use crate::database::session_repository::{PaymentSession, SessionStore};
use crate::payments::types::{SessionStatus, WebhookNotification};
use crate::services::notification::{dispatch_order_confirmed, Notifier, OrderConfirmation};
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("order intent for {reference} is malformed: {detail}")]
    IntentParse { reference: String, detail: String },

    #[error("product resolution failed for {reference}: missing product ids {missing:?}")]
    ProductResolution { reference: String, missing: Vec<i64> },

    #[error("order creation failed for {reference}: {source}")]
    OrderCreation {
        reference: String,
        source: DatabaseError,
    },

    #[error("store error: {0}")]
    Store(#[from] DatabaseError),
}

/// What a single notification amounted to. Everything here is an
/// acknowledgment as far as the gateway is concerned; the distinction
/// matters for logs and tests.
#[derive(Debug)]
pub enum ReconciliationOutcome {
    Completed { session_id: Uuid, order_id: Uuid },
    Duplicate { reference: String },
    MarkedFailed { session_id: Uuid },
    Orphan { reference: String },
    Ignored { reason: String },
}

/// Result of the shared order-creation step.
#[derive(Debug)]
pub enum OrderCreationResult {
    Created { order: Order, item_count: usize },
    AlreadyExists { order_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Completed,
    Failed,
}

const COMPLETED_STATUSES: &[&str] = &["completed", "complete", "success", "successful", "paid"];
const FAILED_STATUSES: &[&str] = &[
    "failed", "failure", "cancelled", "canceled", "rejected", "declined", "expired",
];

/// `None` means the status word is not one this system acts on.
fn classify_status(raw: &str) -> Option<StatusClass> {
    let status = raw.trim().to_lowercase();
    if COMPLETED_STATUSES.contains(&status.as_str()) {
        Some(StatusClass::Completed)
    } else if FAILED_STATUSES.contains(&status.as_str()) {
        Some(StatusClass::Failed)
    } else {
        None
    }
}

/// Per-pass summary returned by the recovery scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub recovered: usize,
    pub skipped_existing: usize,
    pub failed: usize,
}

pub struct ReconciliationService {
    sessions: Arc<dyn SessionStore>,
    orders: Arc<dyn OrderStore>,
    catalog: Arc<dyn ProductCatalog>,
    notifier: Arc<dyn Notifier>,
    /// Completions for an already-settled reference inside this window
    /// are duplicates; beyond it they open a new purchase cycle.
    duplicate_window: Duration,
}

impl ReconciliationService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        orders: Arc<dyn OrderStore>,
        catalog: Arc<dyn ProductCatalog>,
        notifier: Arc<dyn Notifier>,
        duplicate_window: Duration,
    ) -> Self {
        Self {
            sessions,
            orders,
            catalog,
            notifier,
            duplicate_window,
        }
    }

    /// Applies one gateway notification. Never returns an error for
    /// conditions the gateway could "fix" by retrying delivery; those
    /// are outcomes, not failures.
    pub async fn process_notification(
        &self,
        payload: &WebhookNotification,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let reference = match payload.order_id.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => {
                warn!("webhook carried no transaction reference, ignoring");
                return Ok(ReconciliationOutcome::Ignored {
                    reason: "missing transaction reference".to_string(),
                });
            }
        };

        let raw_status = match payload.payment_status.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => {
                warn!(reference = %reference, "webhook carried no payment status, ignoring");
                return Ok(ReconciliationOutcome::Ignored {
                    reason: "missing payment status".to_string(),
                });
            }
        };

        let class = match classify_status(&raw_status) {
            Some(class) => class,
            None => {
                info!(
                    reference = %reference,
                    status = %raw_status,
                    "unrecognized webhook status, ignoring"
                );
                return Ok(ReconciliationOutcome::Ignored {
                    reason: format!("unrecognized status '{raw_status}'"),
                });
            }
        };

        let session = match self.sessions.find_latest_by_reference(&reference).await? {
            Some(session) => session,
            None => {
                warn!(
                    reference = %reference,
                    status = %raw_status,
                    "orphan notification: no session matches this reference"
                );
                return Ok(ReconciliationOutcome::Orphan { reference });
            }
        };

        match class {
            StatusClass::Failed => self.apply_failure(&session, &raw_status).await,
            StatusClass::Completed => self.apply_completion(&session, payload).await,
        }
    }

    async fn apply_failure(
        &self,
        session: &PaymentSession,
        raw_status: &str,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        if session.status() == Some(SessionStatus::Completed) {
            info!(
                session = %session.id,
                reference = %session.transaction_reference,
                "failure notification for completed session, not regressing"
            );
            let _ = self
                .sessions
                .append_log(
                    session.id,
                    "failure_after_completion_ignored",
                    "gateway reported failure after the session completed",
                    Some(json!({ "status": raw_status })),
                )
                .await;
            return Ok(ReconciliationOutcome::Ignored {
                reason: "session already completed".to_string(),
            });
        }

        let reason = format!("gateway reported '{}'", raw_status.trim());
        match self.sessions.mark_failed(session.id, &reason).await? {
            Some(updated) => {
                info!(
                    session = %updated.id,
                    reference = %updated.transaction_reference,
                    reason = %reason,
                    "session marked failed from webhook"
                );
                let _ = self
                    .sessions
                    .append_log(updated.id, "marked_failed", &reason, None)
                    .await;
                Ok(ReconciliationOutcome::MarkedFailed {
                    session_id: updated.id,
                })
            }
            // A concurrent completion won; keep it.
            None => Ok(ReconciliationOutcome::Ignored {
                reason: "session already completed".to_string(),
            }),
        }
    }

    async fn apply_completion(
        &self,
        session: &PaymentSession,
        payload: &WebhookNotification,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let reference = session.transaction_reference.clone();
        let existing_order = self.orders.find_by_reference(&reference).await?;

        // A settled reference inside the duplicate window is a repeat
        // delivery. Beyond the window the same signal means the
        // reference is being reused for a new purchase cycle, so a
        // fresh order is the correct response.
        let already_settled =
            existing_order.is_some() || session.status() == Some(SessionStatus::Completed);
        let prior_order = if already_settled {
            let elapsed = Utc::now() - session.created_at;
            if elapsed < self.duplicate_window {
                info!(
                    reference = %reference,
                    elapsed_seconds = elapsed.num_seconds(),
                    "duplicate completion webhook suppressed"
                );
                let _ = self
                    .sessions
                    .append_log(
                        session.id,
                        "duplicate_webhook",
                        "completion re-delivered inside the duplicate window",
                        None,
                    )
                    .await;
                return Ok(ReconciliationOutcome::Duplicate { reference });
            }
            info!(
                reference = %reference,
                elapsed_seconds = elapsed.num_seconds(),
                "completion beyond the duplicate window, treating reference as reused"
            );
            existing_order.map(|o| o.id)
        } else {
            None
        };

        if session.status() == Some(SessionStatus::Failed) {
            warn!(
                session = %session.id,
                reference = %reference,
                "completion arrived for a failed session, honoring the gateway"
            );
        }

        match self.create_order_for_session(session, prior_order).await? {
            OrderCreationResult::AlreadyExists { order_id } => {
                // Lost the race against a concurrent reconciler; their
                // order stands and this delivery is acknowledged as done.
                let _ = self.sessions.mark_completed(session.id).await;
                let _ = self
                    .sessions
                    .append_log(
                        session.id,
                        "completed_race_noop",
                        "another reconciler created the order first",
                        Some(json!({ "order_id": order_id })),
                    )
                    .await;
                Ok(ReconciliationOutcome::Completed {
                    session_id: session.id,
                    order_id,
                })
            }
            OrderCreationResult::Created { order, item_count } => {
                self.sessions.mark_completed(session.id).await?;
                info!(
                    session = %session.id,
                    reference = %reference,
                    order = %order.id,
                    total = order.total_amount,
                    "webhook reconciled into order"
                );
                let _ = self
                    .sessions
                    .append_log(
                        session.id,
                        "order_created",
                        "completion webhook produced an order",
                        Some(json!({
                            "order_id": order.id,
                            "gateway_reference": payload.reference,
                        })),
                    )
                    .await;

                dispatch_order_confirmed(
                    self.notifier.clone(),
                    OrderConfirmation {
                        order_id: order.id,
                        user_id: order.user_id,
                        transaction_reference: reference,
                        total_amount: order.total_amount,
                        currency: order.currency.clone(),
                        item_count,
                    },
                );

                Ok(ReconciliationOutcome::Completed {
                    session_id: session.id,
                    order_id: order.id,
                })
            }
        }
    }

    /// Shared order-creation step used by both the webhook path and the
    /// recovery job.
    ///
    /// `prior_order` names the order that is knowingly being superseded
    /// (reference reuse beyond the duplicate window). Finding any other
    /// order at the final existence check means another reconciler got
    /// there first, which is a no-op success.
    pub async fn create_order_for_session(
        &self,
        session: &PaymentSession,
        prior_order: Option<Uuid>,
    ) -> Result<OrderCreationResult, ReconciliationError> {
        let reference = session.transaction_reference.clone();

        let intent = session
            .intent()
            .map_err(|e| ReconciliationError::IntentParse {
                reference: reference.clone(),
                detail: e.to_string(),
            })?;

        // Snapshot lines from the intent; prices fall back to the live
        // catalog when checkout did not pin one.
        let mut lines = Vec::with_capacity(intent.items.len());
        let mut missing = Vec::new();
        for item in &intent.items {
            match self.catalog.find_product(item.product_id).await? {
                Some(product) => lines.push(NewOrderItem {
                    product_id: product.id,
                    product_name: product.name,
                    quantity: item.quantity,
                    unit_price: item.price.unwrap_or(product.price),
                }),
                None => missing.push(item.product_id),
            }
        }
        if !missing.is_empty() {
            warn!(
                reference = %reference,
                missing = ?missing,
                "order intent references products that no longer exist"
            );
            let _ = self
                .sessions
                .append_log(
                    session.id,
                    "product_resolution_failed",
                    "intent references missing products, order creation aborted",
                    Some(json!({ "missing": missing })),
                )
                .await;
            return Err(ReconciliationError::ProductResolution { reference, missing });
        }

        let total: i64 = lines
            .iter()
            .map(|line| line.unit_price * i64::from(line.quantity))
            .sum();

        // Existence check immediately before insertion; this is the
        // at-most-one-order guard and must stay adjacent to the insert.
        if let Some(current) = self.orders.find_by_reference(&reference).await? {
            if Some(current.id) != prior_order {
                info!(
                    reference = %reference,
                    order = %current.id,
                    "an order already exists for this reference, no-op"
                );
                return Ok(OrderCreationResult::AlreadyExists {
                    order_id: current.id,
                });
            }
        }

        let payment_method = session
            .channel
            .clone()
            .unwrap_or_else(|| session.provider.clone());

        let order = match self
            .orders
            .insert_order(NewOrder {
                user_id: session.user_id,
                transaction_reference: reference.clone(),
                total_amount: total,
                currency: session.currency.clone(),
                payment_method,
                shipping_address: intent.shipping_address.clone(),
                notes: intent.notes.clone(),
                paid_at: Utc::now(),
            })
            .await
        {
            Ok(order) => order,
            // A uniqueness backstop, if the schema carries one, turns a
            // lost race into a constraint violation.
            Err(e) if e.is_unique_violation() => {
                return match self.orders.find_by_reference(&reference).await? {
                    Some(current) => Ok(OrderCreationResult::AlreadyExists {
                        order_id: current.id,
                    }),
                    None => Err(ReconciliationError::OrderCreation {
                        reference,
                        source: e,
                    }),
                };
            }
            Err(e) => {
                return Err(ReconciliationError::OrderCreation {
                    reference,
                    source: e,
                })
            }
        };

        if let Err(item_err) = self.orders.insert_items(order.id, &lines).await {
            error!(
                order = %order.id,
                reference = %reference,
                error = %item_err,
                "item insertion failed, removing the order"
            );
            if let Err(delete_err) = self.orders.delete_order(order.id).await {
                error!(
                    order = %order.id,
                    error = %delete_err,
                    "compensating delete failed, order row left without items"
                );
            }
            return Err(ReconciliationError::OrderCreation {
                reference,
                source: item_err,
            });
        }

        Ok(OrderCreationResult::Created {
            order,
            item_count: lines.len(),
        })
    }

    /// One recovery pass: find processing sessions older than the grace
    /// period and replay order creation for each. Failures are counted
    /// and logged, never fatal to the pass.
    pub async fn recover_orphans(
        &self,
        grace: Duration,
        batch_size: i64,
    ) -> Result<RecoveryReport, ReconciliationError> {
        let cutoff = Utc::now() - grace;
        let stale = self
            .sessions
            .find_stale_processing(cutoff, batch_size)
            .await?;

        let mut report = RecoveryReport {
            scanned: stale.len(),
            ..Default::default()
        };

        for session in stale {
            match self.recover_session(&session).await {
                Ok(true) => report.recovered += 1,
                Ok(false) => report.skipped_existing += 1,
                Err(e) => {
                    warn!(
                        session = %session.id,
                        reference = %session.transaction_reference,
                        error = %e,
                        "recovery failed for session"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn recover_session(
        &self,
        session: &PaymentSession,
    ) -> Result<bool, ReconciliationError> {
        // Unlike the webhook path, recovery has no fresh completion
        // signal, so any existing order short-circuits it outright.
        if let Some(existing) = self
            .orders
            .find_by_reference(&session.transaction_reference)
            .await?
        {
            info!(
                session = %session.id,
                order = %existing.id,
                "recovery skipped, reference already has an order"
            );
            let _ = self
                .sessions
                .append_log(
                    session.id,
                    "recovery_skipped",
                    "an order already exists for this reference",
                    Some(json!({ "order_id": existing.id })),
                )
                .await;
            return Ok(false);
        }

        match self.create_order_for_session(session, None).await? {
            OrderCreationResult::AlreadyExists { order_id } => {
                // Raced a late webhook between the check above and the
                // insert; the webhook's order stands.
                let _ = self
                    .sessions
                    .append_log(
                        session.id,
                        "recovery_skipped",
                        "a webhook created the order concurrently",
                        Some(json!({ "order_id": order_id })),
                    )
                    .await;
                Ok(false)
            }
            OrderCreationResult::Created { order, item_count } => {
                self.sessions.mark_completed(session.id).await?;
                info!(
                    session = %session.id,
                    reference = %session.transaction_reference,
                    order = %order.id,
                    "orphaned session recovered into order"
                );
                let _ = self
                    .sessions
                    .append_log(
                        session.id,
                        "recovery_completed",
                        "order created by the recovery job",
                        Some(json!({ "order_id": order.id })),
                    )
                    .await;

                dispatch_order_confirmed(
                    self.notifier.clone(),
                    OrderConfirmation {
                        order_id: order.id,
                        user_id: order.user_id,
                        transaction_reference: session.transaction_reference.clone(),
                        total_amount: order.total_amount,
                        currency: order.currency.clone(),
                        item_count,
                    },
                );

                Ok(true)
            }
        }
    }
}
