//! Background expiry sweep.
//!
//! Complements the lazy check-on-read: handoffs nobody looks at still leave
//! `pending` / `confirmed_by_sender` once their window closes. The sweep goes
//! through the same compare-and-swap as every command, so it can run
//! alongside live confirmations.

use crate::service::HandoffService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub struct ExpirySweeper {
    service: Arc<HandoffService>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(service: Arc<HandoffService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Run one sweep on the blocking pool. Returns how many handoffs expired.
    pub async fn sweep_once(&self) -> usize {
        let service = Arc::clone(&self.service);
        match tokio::task::spawn_blocking(move || service.expire_due()).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                warn!(error = %e, kind = %e.kind(), "Expiry sweep failed");
                0
            }
            Err(e) => {
                error!("Expiry sweep task panicked: {}", e);
                0
            }
        }
    }

    /// Sweep every `interval` until `shutdown` flips to true or its sender is
    /// dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Expiry sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = self.sweep_once().await;
                    debug!(expired, "Expiry sweep tick");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Expiry sweeper stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
