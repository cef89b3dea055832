pub mod attempts;
pub mod error;
pub mod gateway;
pub mod idempotency;
pub mod phone;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use gateway::MobileMoneyGateway;
