use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification dispatch failed: {0}")]
    DispatchFailure(String),
}

/// Order summary handed to delivery channels after reconciliation.
#[derive(Debug, Clone)]
pub struct OrderConfirmation {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub transaction_reference: String,
    pub total_amount: i64,
    pub currency: String,
    pub item_count: usize,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_confirmed(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError>;
}

/// Log-backed notifier. Real delivery channels (email, SMS, push) plug
/// in behind the trait without touching the reconciler.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn order_confirmed(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError> {
        info!(
            order_id = %confirmation.order_id,
            user_id = %confirmation.user_id,
            reference = %confirmation.transaction_reference,
            amount = confirmation.total_amount,
            currency = %confirmation.currency,
            items = confirmation.item_count,
            "🔔 NOTIFICATION: Order Confirmed"
        );
        Ok(())
    }
}

/// Hands the confirmation to a detached task. The caller gets control
/// back immediately; a slow or failing channel only produces a warning
/// and never rolls back the order or session state.
pub fn dispatch_order_confirmed(notifier: Arc<dyn Notifier>, confirmation: OrderConfirmation) {
    tokio::spawn(async move {
        if let Err(e) = notifier.order_confirmed(&confirmation).await {
            warn!(
                order_id = %confirmation.order_id,
                reference = %confirmation.transaction_reference,
                error = %e,
                "notification dispatch failed"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct RecordingNotifier {
        sender: mpsc::UnboundedSender<Uuid>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn order_confirmed(
            &self,
            confirmation: &OrderConfirmation,
        ) -> Result<(), NotificationError> {
            let _ = self.sender.send(confirmation.order_id);
            Ok(())
        }
    }

    struct BrokenNotifier;

    #[async_trait]
    impl Notifier for BrokenNotifier {
        async fn order_confirmed(
            &self,
            _confirmation: &OrderConfirmation,
        ) -> Result<(), NotificationError> {
            Err(NotificationError::DispatchFailure(
                "smtp unreachable".to_string(),
            ))
        }
    }

    fn confirmation() -> OrderConfirmation {
        OrderConfirmation {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            transaction_reference: "ABCDEF1234567890ABCDEF12".to_string(),
            total_amount: 5000,
            currency: "TZS".to_string(),
            item_count: 2,
        }
    }

    #[tokio::test]
    async fn dispatch_reaches_the_notifier_without_being_awaited() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let notifier = Arc::new(RecordingNotifier { sender });
        let confirmation = confirmation();
        let expected = confirmation.order_id;

        dispatch_order_confirmed(notifier, confirmation);

        let delivered = receiver.recv().await.expect("notifier should run");
        assert_eq!(delivered, expected);
    }

    #[tokio::test]
    async fn dispatch_swallows_notifier_failures() {
        dispatch_order_confirmed(Arc::new(BrokenNotifier), confirmation());
        // Give the detached task a chance to run and fail.
        tokio::task::yield_now().await;
    }
}
