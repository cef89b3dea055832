pub mod zeno;

pub use zeno::{ZenoConfig, ZenoGateway};
