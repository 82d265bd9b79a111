//! Background store deletes.
//!
//! Deletes are submitted without waiting for them and executed on spawned
//! tasks, at most `concurrency` at a time. Failures are logged and dropped,
//! so the store may briefly hold rows that memory has already forgotten.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bitcoin::Txid;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, warn};

use crate::store::SyncStore;
use crate::types::TokenId;

#[derive(Debug)]
enum DeleteJob {
    Unconfirmed(Vec<Txid>),
    Confirmed(Txid),
    /// Token row and persisted graph.
    Token(TokenId),
}

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Handle to the background delete worker.
#[derive(Clone)]
pub struct BackgroundDeleter {
    tx: mpsc::UnboundedSender<DeleteJob>,
    pending: Arc<Pending>,
}

impl BackgroundDeleter {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(store: Arc<dyn SyncStore>, concurrency: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Pending::default());
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        tokio::spawn(run(store, rx, semaphore, pending.clone()));
        Self { tx, pending }
    }

    pub fn delete_unconfirmed(&self, txids: Vec<Txid>) {
        if txids.is_empty() {
            return;
        }
        self.submit(DeleteJob::Unconfirmed(txids));
    }

    pub fn delete_confirmed(&self, txid: Txid) {
        self.submit(DeleteJob::Confirmed(txid));
    }

    pub fn delete_token(&self, token_id: TokenId) {
        self.submit(DeleteJob::Token(token_id));
    }

    /// Number of submitted deletes that have not finished.
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    /// Wait until every submitted delete has finished.
    pub async fn settle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn submit(&self, job: DeleteJob) {
        self.pending.count.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.tx.send(job) {
            warn!(job = ?e.0, "delete worker is gone, dropping delete");
            self.pending.finish();
        }
    }
}

async fn run(
    store: Arc<dyn SyncStore>,
    mut rx: mpsc::UnboundedReceiver<DeleteJob>,
    semaphore: Arc<Semaphore>,
    pending: Arc<Pending>,
) {
    while let Some(job) = rx.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            pending.finish();
            break;
        };
        let store = store.clone();
        let pending = pending.clone();
        tokio::spawn(async move {
            let result = match &job {
                DeleteJob::Unconfirmed(txids) => store.unconfirmed_delete(txids).await,
                DeleteJob::Confirmed(txid) => store.confirmed_delete(txid).await,
                DeleteJob::Token(token_id) => match store.token_delete(token_id).await {
                    Ok(()) => store.graph_delete(token_id).await,
                    Err(e) => Err(e),
                },
            };
            match result {
                Ok(()) => debug!(?job, "background delete done"),
                Err(e) => warn!(?job, error = %e, "background delete failed"),
            }
            drop(permit);
            pending.finish();
        });
    }
}
