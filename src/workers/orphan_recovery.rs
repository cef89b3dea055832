use crate::services::reconciliation::ReconciliationService;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct OrphanRecoveryConfig {
    /// Workers can be disabled outright for read-only deployments.
    pub enabled: bool,
    /// How often the worker wakes up to scan for stale sessions.
    pub poll_interval: Duration,
    /// Processing sessions younger than this are left alone; their
    /// webhook may simply still be in flight.
    pub grace_period: Duration,
    /// Maximum sessions examined per pass.
    pub batch_size: i64,
}

impl Default for OrphanRecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(120),
            grace_period: Duration::from_secs(300),
            batch_size: 25,
        }
    }
}

impl OrphanRecoveryConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.enabled = std::env::var("RECOVERY_ENABLED")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(cfg.enabled);
        cfg.poll_interval = Duration::from_secs(
            std::env::var("RECOVERY_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.grace_period = Duration::from_secs(
            std::env::var("RECOVERY_GRACE_PERIOD_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.grace_period.as_secs()),
        );
        cfg.batch_size = std::env::var("RECOVERY_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

/// Background sweep for payments whose completion webhook never landed.
/// Each pass delegates to the reconciler so the worker itself stays a
/// thin scheduling shell.
pub struct OrphanRecoveryWorker {
    reconciler: Arc<ReconciliationService>,
    config: OrphanRecoveryConfig,
}

impl OrphanRecoveryWorker {
    pub fn new(reconciler: Arc<ReconciliationService>, config: OrphanRecoveryConfig) -> Self {
        Self { reconciler, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("orphan recovery worker disabled by configuration");
            return;
        }

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            grace_period_secs = self.config.grace_period.as_secs(),
            batch_size = self.config.batch_size,
            "orphan recovery worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("orphan recovery worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.run_cycle().await;
                }
            }
        }

        info!("orphan recovery worker stopped");
    }

    async fn run_cycle(&self) {
        let grace = ChronoDuration::seconds(self.config.grace_period.as_secs() as i64);
        match self
            .reconciler
            .recover_orphans(grace, self.config.batch_size)
            .await
        {
            Ok(report) => {
                if report.scanned > 0 {
                    info!(
                        scanned = report.scanned,
                        recovered = report.recovered,
                        skipped_existing = report.skipped_existing,
                        failed = report.failed,
                        "orphan recovery pass finished"
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, "orphan recovery pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_a_sensible_sweep() {
        let cfg = OrphanRecoveryConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.poll_interval, Duration::from_secs(120));
        assert_eq!(cfg.grace_period, Duration::from_secs(300));
        assert_eq!(cfg.batch_size, 25);
    }

    #[test]
    fn from_env_falls_back_on_garbage() {
        // Only values that parse override the defaults.
        std::env::set_var("RECOVERY_BATCH_SIZE", "not-a-number");
        let cfg = OrphanRecoveryConfig::from_env();
        assert_eq!(cfg.batch_size, 25);
        std::env::remove_var("RECOVERY_BATCH_SIZE");
    }
}
