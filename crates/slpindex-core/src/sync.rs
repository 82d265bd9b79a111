//! Block and mempool sync entry points.
//!
//! A sync is either *notified* (triggered by a push notification) or
//! *explicit* (startup, CLI). Notified block syncs swallow non-fatal
//! failures and return `None`, leaving the retry to the next notification.
//! Explicit syncs propagate every failure.
//!
//! Reorg detection for a notified block starts at the persisted checkpoint
//! rather than the notified block's height, so heights between the two are
//! checked as well.

use bitcoin::{BlockHash, Txid};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::error::{StoreError, SyncError};
use crate::publisher::SyncEvent;
use crate::status::SyncState;
use crate::synchronizer::Synchronizer;
use crate::types::MempoolSyncResult;

/// What to synchronize.
#[derive(Debug, Clone)]
pub enum SyncRequest {
    /// Catch up blocks; `notified` is the hash from a push notification.
    Block { notified: Option<BlockHash> },
    /// Validate and store one mempool transaction. `raw` is required when
    /// the transaction is not yet tracked.
    Mempool {
        txid: Option<Txid>,
        raw: Option<Vec<u8>>,
    },
}

/// Keep notified runs alive across non-fatal failures.
fn soften<T>(notified: bool, what: &str, result: Result<T, SyncError>) -> Result<Option<T>, SyncError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if notified && !e.is_fatal() => {
            warn!(error = %e, "{what} failed, waiting for the next notification");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

impl Synchronizer {
    /// Run one sync request.
    ///
    /// Block syncs return `Some(empty map)` when the checkpoint reached the
    /// node's best height and `None` otherwise. Mempool syncs return the
    /// accepted transaction (txid → hex) or an empty map.
    pub async fn sync(&mut self, request: SyncRequest) -> Result<Option<MempoolSyncResult>, SyncError> {
        match request {
            SyncRequest::Block { notified } => self.sync_blocks(notified).await,
            SyncRequest::Mempool { txid, raw } => {
                let txid = txid.ok_or(SyncError::MissingTxid)?;
                self.sync_mempool(txid, raw.as_deref()).await.map(Some)
            }
        }
    }

    /// Crawl every block between the checkpoint and the node's best height.
    pub async fn sync_blocks(
        &mut self,
        notified: Option<BlockHash>,
    ) -> Result<Option<MempoolSyncResult>, SyncError> {
        let push = notified.is_some();

        if let Some(hash) = notified {
            debug!(%hash, "checking for reorg before notified block sync");
            let checkpoint = self.checkpoints.load_or_floor().await?;
            let checked = self.check_for_block_reorg(checkpoint).await;
            let Some(checkpoint) = soften(push, "reorg check", checked)? else {
                return Ok(None);
            };
            if checkpoint.had_reorg {
                warn!(height = checkpoint.height, "resuming from rolled back checkpoint");
            }
        }

        let checkpoint = self.checkpoints.load_or_floor().await?;
        let Some(mut best) = soften(push, "block count", self.transport.block_count().await)? else {
            return Ok(None);
        };

        let mut height = checkpoint.height + 1;
        if height <= best {
            info!(from = height, to = best, "syncing blocks");
        }
        while height <= best {
            if self.is_stopping() {
                info!(height, "stop requested, leaving block sync");
                return Ok(None);
            }

            for token_id in self.graphs.prune_to_height(height).await {
                self.modified.insert(token_id);
            }

            let crawled = self.sync_one_block(height).await;
            let Some(hash) = soften(push, "block crawl", crawled)? else {
                return Ok(None);
            };

            self.checkpoints.advance(height, hash).await?;
            self.block_hash_ignore.insert(hash);
            self.status.block_processed(height, hash);
            self.publisher.publish(SyncEvent::BlockAccepted { height, hash });
            self.status.block_outgoing();

            let Some(next_best) = soften(push, "block count", self.transport.block_count().await)? else {
                return Ok(None);
            };
            best = next_best;
            height += 1;
        }

        let checkpoint = self.checkpoints.load_or_floor().await?;
        if push {
            let reconciled = self.remove_extraneous_mempool_txns().await;
            soften(push, "mempool reconciliation", reconciled)?;
        }

        if checkpoint.height == best {
            Ok(Some(IndexMap::new()))
        } else {
            Ok(None)
        }
    }

    async fn sync_one_block(&mut self, height: u64) -> Result<BlockHash, SyncError> {
        let hash = self
            .transport
            .block_hash(height)
            .await?
            .ok_or(SyncError::MissingBlock { height })?;
        self.crawl_block(height, hash).await?;
        Ok(hash)
    }

    /// Validate a mempool transaction and insert it into the unconfirmed
    /// store.
    pub async fn sync_mempool(
        &mut self,
        txid: Txid,
        raw: Option<&[u8]>,
    ) -> Result<MempoolSyncResult, SyncError> {
        let mut result = MempoolSyncResult::new();

        let filtered = if let Some(tracked) = self.mempool.raw(&txid) {
            self.filter.apply(tracked, &*self.graphs)
        } else if !self.mempool.is_ignored(&txid) {
            let raw = raw.ok_or(SyncError::MissingRawTransaction(txid))?;
            self.filter.apply(raw, &*self.graphs)
        } else {
            None
        };
        let Some(filtered) = filtered else {
            debug!(%txid, "skipping non-SLP transaction");
            return Ok(result);
        };

        let record = self.evaluate(&filtered, None).await?;
        match self.store.unconfirmed_insert(&record).await {
            Ok(()) => {
                info!(%txid, "SLP mempool transaction added");
                let hex = hex::encode(&filtered.raw);
                self.publisher.publish(SyncEvent::TransactionAccepted {
                    txid,
                    hex: hex.clone(),
                });
                self.status.txn_outgoing();
                result.insert(txid, hex);
            }
            Err(StoreError::DuplicateKey(_)) => {
                warn!(%txid, "mempool transaction already stored");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(result)
    }

    /// Handle a block-hash notification.
    pub async fn process_block_notification(&mut self, hash: BlockHash) -> Result<(), SyncError> {
        if !self.block_hash_ignore.insert(hash) {
            debug!(%hash, "block notification ignored, already processed");
            return Ok(());
        }
        info!(%hash, "new block notified");
        self.sync_blocks(Some(hash)).await?;
        self.graphs.on_block_hash(&hash).await;
        Ok(())
    }

    /// Startup sequence: explicit block sync, then a full mempool sync.
    ///
    /// Any failure moves the status to `ExitedOnError`.
    pub async fn startup(&mut self) -> Result<(), SyncError> {
        match self.run_startup().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.status.exit_on_error(e.to_string());
                Err(e)
            }
        }
    }

    async fn run_startup(&mut self) -> Result<(), SyncError> {
        let checkpoint = self.checkpoints.load_or_floor().await?;
        self.status.checkpoint(checkpoint.height, checkpoint.hash);
        self.status.set_state(SyncState::StartupBlockSync);
        info!(
            network = %self.config.network,
            height = checkpoint.height,
            "starting block sync"
        );

        // the node may have reorganized while we were offline
        if checkpoint.hash.is_some() || checkpoint.height > self.checkpoints.floor() {
            let checked = self.check_for_block_reorg(checkpoint).await?;
            if checked.had_reorg {
                warn!(height = checked.height, "rolled back while offline");
            }
        }
        self.sync_blocks(None).await?;
        if self.is_stopping() {
            return Ok(());
        }

        self.status.set_state(SyncState::StartupTokenProcessing);
        self.sync_slp_mempool().await?;

        self.status.set_state(SyncState::Running);
        info!("startup complete");
        Ok(())
    }
}
