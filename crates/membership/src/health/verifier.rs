//! Failure verification loop

use std::sync::Arc;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use warden_transport::Transport;

use super::monitor::HealthMonitor;
use crate::error::{Error, Result};

impl<T> HealthMonitor<T>
where
    T: Transport,
{
    /// Wait for suspects, give each one the full grace period to recover,
    /// then confirm the ones that stayed silent. Runs until cancelled.
    pub async fn run_verifier(self: Arc<Self>, cancellation_token: CancellationToken) -> Result<()> {
        let mut suspects = self.suspect_rx.lock().await;
        let grace = self.config.verify_wait();

        'verify: loop {
            let first = tokio::select! {
                suspect = suspects.recv() => suspect,
                _ = cancellation_token.cancelled() => break,
            };
            let Some(first) = first else {
                return Err(Error::Task("suspect channel closed".to_string()));
            };
            debug!("Verifying {} on {} in {:?}", first, self.local.peer_id(), grace);

            while let Some(deadline) = self.cache.next_confirmation(grace) {
                if self.is_stopping() {
                    break;
                }
                tokio::select! {
                    _ = sleep_until(deadline) => {}
                    _ = cancellation_token.cancelled() => break 'verify,
                }

                // Queued suspects are tracked by their own deadlines
                while suspects.try_recv().is_ok() {}

                self.verify_once().await;
            }
        }

        info!("Failure verifier for {} stopped", self.local.peer_id());
        Ok(())
    }

    /// Confirm every peer whose grace period has run out as dead
    pub async fn verify_once(&self) {
        if self.is_stopping() {
            return;
        }

        let is_master = self.master.is_master();
        let confirmed = self
            .cache
            .confirm_suspects(Instant::now(), self.config.verify_wait());
        for node in confirmed {
            self.assign_and_report_failure(&node, is_master).await;
        }
    }
}
