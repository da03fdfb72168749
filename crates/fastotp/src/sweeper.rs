//! Background sweeper for stale OTPs and payments.
//!
//! Each cycle expires OTP logs past their validity window, fails top-ups
//! that were never confirmed, and polls the delivery provider for the
//! final state of sent messages.

use crate::otp::OtpEngine;
use crate::reconciler::Reconciler;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// What one sweep cycle changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_otps: usize,
    pub failed_transactions: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

pub struct Sweeper {
    engine: Arc<OtpEngine>,
    reconciler: Arc<Reconciler>,
    interval: Duration,
    pending_ttl: Duration,
}

impl Sweeper {
    pub fn new(
        engine: Arc<OtpEngine>,
        reconciler: Arc<Reconciler>,
        interval: Duration,
        pending_ttl: Duration,
    ) -> Self {
        Self {
            engine,
            reconciler,
            interval,
            pending_ttl,
        }
    }

    /// Run a single sweep cycle. Failures of one step do not skip the others.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.engine.expire_stale().await {
            Ok(expired) => report.expired_otps = expired,
            Err(e) => error!("OTP expiry sweep failed: {}", e),
        }

        match self.reconciler.fail_stale_pending(self.pending_ttl).await {
            Ok(failed) => report.failed_transactions = failed,
            Err(e) => error!("Stale transaction sweep failed: {}", e),
        }

        match self.engine.refresh_delivery_status().await {
            Ok(refresh) => {
                report.delivered = refresh.delivered;
                report.delivery_failures = refresh.failed;
            }
            Err(e) => error!("Delivery status refresh failed: {}", e),
        }

        report
    }

    /// Run the sweeper forever, sleeping between cycles.
    pub async fn run(&self) {
        info!(
            "Starting sweeper, interval: {:?}, pending ttl: {:?}",
            self.interval, self.pending_ttl
        );

        loop {
            tokio::time::sleep(self.interval).await;

            let report = self.sweep_once().await;
            if report.is_empty() {
                debug!("Sweep cycle made no changes");
            } else {
                info!(
                    expired_otps = report.expired_otps,
                    failed_transactions = report.failed_transactions,
                    delivered = report.delivered,
                    delivery_failures = report.delivery_failures,
                    "Sweep cycle complete"
                );
            }
        }
    }
}

/// Spawn the sweeper as a background task.
pub fn spawn_sweeper(sweeper: Sweeper) -> tokio::task::JoinHandle<()> {
    let sweeper = Arc::new(sweeper);
    tokio::spawn(async move {
        sweeper.run().await;
    })
}
