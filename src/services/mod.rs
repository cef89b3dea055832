//! Services module for business logic and integrations

pub mod initiation;
pub mod notification;
pub mod reconciliation;

pub use initiation::{InitiationConfig, InitiationOutcome, InitiationService};
pub use notification::{LogNotifier, Notifier, OrderConfirmation};
pub use reconciliation::{
    ReconciliationError, ReconciliationOutcome, ReconciliationService, RecoveryReport,
};
