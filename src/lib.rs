//! Duka backend: mobile money payment orchestration for the storefront.
//!
//! The pipeline runs in three stages: initiation (deterministic
//! reference, session row, gateway submission with format fallback),
//! webhook reconciliation (payment confirmations become orders), and
//! orphan recovery (a background sweep for sessions whose webhook never
//! arrived).

pub mod api;
pub mod config;
pub mod database;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
