//! Event ingestion queue.
//!
//! Push notifications arrive unordered and from any task. Producers push
//! them onto an unbounded channel without blocking; a single worker task
//! owns the [`Synchronizer`] and handles one notification at a time, so
//! every mutation of sync state is serialized.

use std::sync::Arc;

use bitcoin::BlockHash;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::status::{StatusReporter, SyncState};
use crate::synchronizer::Synchronizer;

#[derive(Debug)]
enum Notification {
    BlockHash(BlockHash),
    RawTransaction(Vec<u8>),
}

/// Producer handle for the ingestion worker.
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<Notification>,
    status: Arc<StatusReporter>,
}

impl EventQueue {
    /// Move `sync` into a new worker task.
    ///
    /// The worker stops when every `EventQueue` handle is dropped, when the
    /// synchronizer is stopped, or after a fatal error. The join handle
    /// gives the synchronizer back.
    pub fn spawn(sync: Synchronizer) -> (Self, JoinHandle<Synchronizer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = sync.status_reporter();
        let worker = tokio::spawn(run(sync, rx));
        (Self { tx, status }, worker)
    }

    /// Enqueue a new-block notification. Returns `false` if the worker has
    /// exited.
    pub fn on_block_hash(&self, hash: BlockHash) -> bool {
        self.status.block_incoming();
        self.tx.send(Notification::BlockHash(hash)).is_ok()
    }

    /// Enqueue a raw-transaction notification. Returns `false` if the
    /// worker has exited.
    pub fn on_raw_transaction(&self, raw: Vec<u8>) -> bool {
        self.status.txn_incoming();
        self.tx.send(Notification::RawTransaction(raw)).is_ok()
    }
}

async fn run(mut sync: Synchronizer, mut rx: mpsc::UnboundedReceiver<Notification>) -> Synchronizer {
    info!("listening for chain notifications");
    while let Some(notification) = rx.recv().await {
        if sync.is_stopping() {
            break;
        }
        let result = match notification {
            Notification::BlockHash(hash) => sync.process_block_notification(hash).await,
            Notification::RawTransaction(raw) => {
                sync.handle_raw_transaction(raw, None).await.map(|_| ())
            }
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                error!(error = %e, "fatal sync error, stopping ingestion");
                sync.status.exit_on_error(e.to_string());
                rx.close();
                return sync;
            }
            Err(e) => warn!(error = %e, "notification failed"),
        }
    }

    debug!("ingestion worker exiting");
    if !sync.status.snapshot().state.is_exited() {
        sync.status.set_state(SyncState::ExitedNormal);
    }
    sync
}
