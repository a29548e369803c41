//! Heartbeat and in-doubt detection loops

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_transport::Transport;

use super::monitor::HealthMonitor;
use crate::error::Result;
use crate::events::ClusterViewEventKind;
use crate::state::MemberState;

impl<T> HealthMonitor<T>
where
    T: Transport,
{
    /// Broadcast ALIVE every heartbeat period until cancelled
    pub async fn run_heartbeat(self: Arc<Self>, cancellation_token: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.heartbeat().await,
                _ = cancellation_token.cancelled() => {
                    info!("Heartbeat loop for {} stopped", self.local.peer_id());
                    break;
                }
            }
        }

        Ok(())
    }

    /// Scan for silent peers every heartbeat period until cancelled
    pub async fn run_detector(self: Arc<Self>, cancellation_token: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.detect_once().await,
                _ = cancellation_token.cancelled() => {
                    info!("In-doubt detector for {} stopped", self.local.peer_id());
                    break;
                }
            }
        }

        Ok(())
    }

    /// One detector pass: suspect every ALIVE peer that missed more than the
    /// allowed number of heartbeats, if this member may act on it.
    ///
    /// Only the master may suspect ordinary members; every member may suspect
    /// the master.
    pub async fn detect_once(&self) {
        if self.is_stopping() {
            return;
        }

        let is_master = self.master.is_master();
        let master_id = self.master.master_node_id();
        let suspects = self.cache.mark_suspects(
            Instant::now(),
            self.config.heartbeat_interval,
            self.config.max_missed_beats,
            |peer_id| is_master || master_id.as_ref() == Some(peer_id),
        );

        for node in suspects {
            warn!(
                "Member {} has not heard from {} for more than {} heartbeats, marking in doubt",
                self.local.peer_id(),
                node.peer_id(),
                self.config.max_missed_beats
            );

            if is_master {
                self.send_report(None, node.clone(), MemberState::InDoubt)
                    .await;
            }
            self.view.notify(ClusterViewEventKind::InDoubt, node.clone());
            self.notify_listeners(|l| l.on_peer_indoubt(&node));

            if self.suspect_tx.try_send(node.peer_id().clone()).is_err() {
                debug!("Verifier already has pending suspects");
            }
        }
    }
}
