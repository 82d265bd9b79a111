//! Reorg detection and rollback.
//!
//! Detection runs in two phases from the persisted checkpoint:
//!
//! 1. While the node has no block at the checkpoint height (our tip is
//!    ahead of the node's), roll back one height.
//! 2. While the hash stored for the checkpoint height differs from the
//!    node's hash at that height, roll back one height.
//!
//! Each phase may discard at most `max_rollback` heights and never goes
//! below the genesis floor. The cursor is persisted after every discarded
//! height, before that height's stored hash is dropped, so an interrupted
//! rollback resumes where it stopped. A cursor above the floor with no
//! stored hash counts as a mismatch.

use tracing::{info, warn};

use crate::checkpoint::ChainSyncCheckpoint;
use crate::error::SyncError;
use crate::graph::GraphLookup;
use crate::synchronizer::Synchronizer;

impl Synchronizer {
    /// Roll back derived state until the checkpoint sits on the node's
    /// active chain. Returns the resulting checkpoint.
    pub async fn check_for_block_reorg(
        &mut self,
        checkpoint: ChainSyncCheckpoint,
    ) -> Result<ChainSyncCheckpoint, SyncError> {
        let floor = self.checkpoints.floor();
        let limit = self.config.max_rollback;
        let mut height = checkpoint.height;
        let mut had_reorg = false;

        // phase 1: find a height the node has a block for
        let mut rollbacks = 0u64;
        let actual = loop {
            if let Some(hash) = self.transport.block_hash(height).await? {
                break Some(hash);
            }
            if height <= floor {
                warn!(height, "cannot roll back past the genesis floor");
                break None;
            }
            warn!(height, "node has no block at checkpoint height, rolling back");
            self.roll_back_height(height).await?;
            height -= 1;
            rollbacks += 1;
            had_reorg = true;
            if rollbacks > limit {
                return Err(SyncError::RollbackLimit {
                    limit,
                    height,
                    phase: "searching for the node tip",
                });
            }
        };
        let Some(mut actual) = actual else {
            return self.settle_at_floor().await;
        };
        if had_reorg {
            info!(height, "checkpoint was ahead of the node tip and was rolled back");
        }

        // phase 2: walk back until stored and actual hashes agree
        let mut stored = self.checkpoints.hash_at(height).await?;
        if stored.is_some() || height > floor {
            rollbacks = 0;
            while stored != Some(actual) && height > floor {
                warn!(
                    height,
                    stored = ?stored,
                    actual = %actual,
                    "block hash mismatch, rolling back"
                );
                self.roll_back_height(height).await?;
                height -= 1;
                rollbacks += 1;
                had_reorg = true;
                if rollbacks > limit {
                    return Err(SyncError::RollbackLimit {
                        limit,
                        height,
                        phase: "rolling back mismatched block hashes",
                    });
                }
                actual = self
                    .transport
                    .block_hash(height)
                    .await?
                    .ok_or(SyncError::MissingBlock { height })?;
                stored = self.checkpoints.hash_at(height).await?;
            }
            if stored != Some(actual) {
                return self.settle_at_floor().await;
            }
        }

        if had_reorg {
            info!(height, hash = %actual, "checkpoint rolled back after reorg");
            self.checkpoints.save(height, Some(actual)).await?;
            self.status.checkpoint(height, Some(actual));
        }
        Ok(ChainSyncCheckpoint {
            height,
            hash: Some(actual),
            had_reorg,
        })
    }

    async fn settle_at_floor(&mut self) -> Result<ChainSyncCheckpoint, SyncError> {
        let floor = self.checkpoints.floor();
        warn!(floor, "no matching block above the genesis floor");
        self.checkpoints.save(floor, None).await?;
        self.status.checkpoint(floor, None);
        Ok(ChainSyncCheckpoint {
            height: floor,
            hash: None,
            had_reorg: true,
        })
    }

    /// Discard `height` and move the cursor one below it, keeping whatever
    /// hash is stored there so a retry still sees a mismatch.
    async fn roll_back_height(&mut self, height: u64) -> Result<(), SyncError> {
        self.remove_reorg_transactions_at_height(height).await?;
        let below = height - 1;
        let kept = self.checkpoints.hash_at(below).await?;
        self.checkpoints.save(below, kept).await?;
        self.status.checkpoint(below, kept);
        self.checkpoints.delete_hash_at(height).await
    }

    /// Undo every confirmed transaction recorded at `height`.
    pub async fn remove_reorg_transactions_at_height(&mut self, height: u64) -> Result<(), SyncError> {
        let records = self.store.confirmed_fetch_for_reorg(height).await?;
        for record in &records {
            let txid = record.txid;
            info!(%txid, height, "removing reorged transaction");
            self.mempool.unignore(&txid);
            self.mempool.remove(&txid);
            for input in &record.inputs {
                self.mempool.release_spend(&input.prev_out, &txid);
            }

            let Some(token_id) = record.token_id() else {
                continue;
            };
            let lookup = GraphLookup {
                txid,
                ..GraphLookup::existing(token_id)
            };
            let Some(graph) = self.graphs.token_graph(lookup).await? else {
                warn!(%txid, %token_id, "no graph for reorged transaction");
                continue;
            };
            graph.remove_transaction(&txid).await?;
            graph.commit().await?;
            if graph.size() == 0 {
                info!(%token_id, "token graph emptied by reorg, deleting token");
                self.store.token_delete(&token_id).await?;
                self.store.graph_delete(&token_id).await?;
                self.graphs.remove_token(&token_id).await?;
            }
        }
        self.store.confirmed_delete_for_reorg(height).await?;
        self.report_mempool();
        Ok(())
    }
}

