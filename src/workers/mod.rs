pub mod orphan_recovery;

pub use orphan_recovery::{OrphanRecoveryConfig, OrphanRecoveryWorker};
