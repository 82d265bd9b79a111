//! Polling notification source.
//!
//! Stands in for the node's push feed (`hashblock` / `rawtx`) when only the
//! RPC port is reachable: the tip and mempool are polled on a fixed
//! interval and every change is forwarded to a [`NotificationSink`].

use std::sync::Arc;
use std::time::Duration;

use bitcoin::{BlockHash, Txid};
use slpindex_core::{BoundedSet, EventQueue, NodeTransport, StopHandle, SyncError};
use tracing::{debug, info, warn};

/// Receiver of push notifications.
pub trait NotificationSink: Send + Sync {
    /// Returns `false` once the receiver is gone.
    fn on_block_hash(&self, hash: BlockHash) -> bool;
    fn on_raw_transaction(&self, raw: Vec<u8>) -> bool;
}

impl NotificationSink for EventQueue {
    fn on_block_hash(&self, hash: BlockHash) -> bool {
        EventQueue::on_block_hash(self, hash)
    }

    fn on_raw_transaction(&self, raw: Vec<u8>) -> bool {
        EventQueue::on_raw_transaction(self, raw)
    }
}

pub struct PollingNotifier<S> {
    transport: Arc<dyn NodeTransport>,
    sink: S,
    interval: Duration,
    seen: BoundedSet<Txid>,
    last_tip: Option<BlockHash>,
}

impl<S: NotificationSink> PollingNotifier<S> {
    pub fn new(transport: Arc<dyn NodeTransport>, sink: S, interval: Duration) -> Self {
        Self {
            transport,
            sink,
            interval,
            seen: BoundedSet::new(100_000),
            last_tip: None,
        }
    }

    /// One poll. The first call only records the current tip and mempool,
    /// which the synchronizer's startup pass already covers.
    ///
    /// Returns `Ok(false)` once the sink stops accepting notifications.
    pub async fn poll_once(&mut self) -> Result<bool, SyncError> {
        let primed = self.last_tip.is_some();

        let height = self.transport.block_count().await?;
        if let Some(tip) = self.transport.block_hash(height).await? {
            if self.last_tip != Some(tip) {
                self.last_tip = Some(tip);
                if primed {
                    debug!(height, hash = %tip, "new tip");
                    if !self.sink.on_block_hash(tip) {
                        return Ok(false);
                    }
                }
            }
        }

        for txid in self.transport.raw_mempool().await? {
            if self.seen.contains(&txid) {
                continue;
            }
            self.seen.insert(txid);
            if !primed {
                continue;
            }
            let raw = match self.transport.raw_transaction(&txid).await {
                Ok(raw) => raw,
                Err(e) => {
                    // mined or evicted between the two calls
                    debug!(%txid, error = %e, "mempool transaction vanished");
                    continue;
                }
            };
            if !self.sink.on_raw_transaction(raw) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Poll until `stop` is raised or the sink goes away.
    pub async fn run(mut self, stop: StopHandle) {
        info!(interval_ms = self.interval.as_millis() as u64, "polling node for notifications");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if stop.is_stopped() {
                break;
            }
            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => {
                    info!("notification receiver closed");
                    break;
                }
                Err(e) => warn!(error = %e, "node poll failed"),
            }
        }
    }
}
