//! Block crawler.
//!
//! A block is fetched, every input is recorded for burn detection, SLP
//! transactions are filtered out and sorted by dependency, then validated in
//! that order so each child sees its parent's graph update.

use std::sync::Arc;

use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::{Block, BlockHash, Txid};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::filter::FilteredTx;
use crate::graph::{GraphLookup, TokenGraph};
use crate::synchronizer::Synchronizer;
use crate::toposort::topological_sort;
use crate::types::{
    BlockInfo, BlockMeta, BlockRef, CrawlResult, CrawlTxnInfo, SlpInfo, SpentOutpoints, TokenId,
    TxRecord,
};

const INVALID_GENESIS: &str = "Invalid token Genesis.";

/// A fetched block reduced to what the crawler needs.
struct LoadedBlock {
    info: BlockInfo,
    tx_count: usize,
    slp: IndexMap<Txid, FilteredTx>,
    order: Vec<Txid>,
    spent: SpentOutpoints,
}

impl LoadedBlock {
    fn meta(&self) -> BlockMeta {
        BlockMeta {
            hash: self.info.hash,
            height: self.info.height,
            time: self.info.time,
        }
    }
}

impl Synchronizer {
    async fn load_block(&mut self, height: u64, block: BlockRef) -> Result<LoadedBlock, SyncError> {
        let info = self.transport.block_info(block).await?;
        let wrong_hash = matches!(block, BlockRef::Hash(hash) if hash != info.hash);
        if info.height != height || wrong_hash {
            return Err(SyncError::StaleBlock {
                height,
                hash: info.hash,
            });
        }
        debug!(height, hash = %info.hash, "crawling block");

        let raw = self.transport.raw_block(&info.hash).await?;
        let block: Block = deserialize(&raw).map_err(|e| SyncError::Decode {
            what: format!("block {}", info.hash),
            reason: e.to_string(),
        })?;

        let mut slp = IndexMap::new();
        let mut spent = SpentOutpoints::new();
        for tx in &block.txdata {
            let txid = tx.compute_txid();
            spent.extend(tx.input.iter().map(|input| (input.previous_output, txid)));

            let bytes = serialize(tx);
            if let Some(filtered) = self.filter.apply(&bytes, &*self.graphs) {
                self.mempool.index_spends(&filtered.tx, txid, Some(height));
                slp.insert(txid, filtered);
            }
        }

        let order = topological_sort(&slp, self.config.sort_yield_interval).await?;
        Ok(LoadedBlock {
            info,
            tx_count: block.txdata.len(),
            slp,
            order,
            spent,
        })
    }

    /// Validate a filtered transaction against its token graph and build the
    /// normalized record carrying the result.
    pub(crate) async fn evaluate(
        &self,
        filtered: &FilteredTx,
        block: Option<&BlockInfo>,
    ) -> Result<TxRecord, SyncError> {
        let schema_version = self.config.schema_version;
        let mut record = TxRecord::from_tx(&filtered.tx);
        let message = &filtered.message;

        let Some(token_id) = message.token_id else {
            record.slp = Some(SlpInfo::invalid(None, INVALID_GENESIS, schema_version));
            return Ok(record);
        };

        let lookup = GraphLookup {
            txid: filtered.txid,
            token_id,
            genesis: message.is_genesis().then_some(message),
            block_created: block.map(|b| b.height),
            block_time: block.map(|b| b.time),
        };
        let graph = match self.graphs.token_graph(lookup).await {
            Ok(graph) => graph,
            Err(e) => {
                warn!(txid = %filtered.txid, %token_id, error = %e, "token graph lookup failed");
                None
            }
        };

        record.slp = Some(match graph {
            None => SlpInfo::invalid(None, INVALID_GENESIS, schema_version),
            Some(graph) => match graph.validate_transaction(&filtered.txid).await {
                Ok(validation) => SlpInfo::from_validation(validation, schema_version),
                Err(e) => {
                    warn!(txid = %filtered.txid, %token_id, error = %e, "validation failed");
                    SlpInfo::invalid(None, e.to_string(), schema_version)
                }
            },
        });
        Ok(record)
    }

    async fn existing_graph(&self, token_id: TokenId) -> Result<Option<Arc<dyn TokenGraph>>, SyncError> {
        self.graphs.token_graph(GraphLookup::existing(token_id)).await
    }

    /// Crawl the block at `height` and commit its effects.
    pub async fn crawl_block(&mut self, height: u64, hash: BlockHash) -> Result<(), SyncError> {
        let block = self.load_block(height, BlockRef::Hash(hash)).await?;
        let meta = block.meta();

        for txid in &block.order {
            let Some(filtered) = block.slp.get(txid) else {
                continue;
            };
            let mut record = self.evaluate(filtered, Some(&block.info)).await?;
            record.block = Some(meta.clone());
            self.leave_mempool(*txid);

            let Some(token_id) = record.token_id() else {
                continue;
            };
            let valid = record.slp.as_ref().is_some_and(|s| s.valid);
            self.store.confirmed_replace(vec![record], height).await?;
            if valid {
                self.modified.insert(token_id);
                let lookup = GraphLookup {
                    txid: *txid,
                    ..GraphLookup::existing(token_id)
                };
                if let Some(graph) = self.graphs.token_graph(lookup).await? {
                    graph.add_transaction(txid, Some(height), Some(hash)).await?;
                }
            }
        }

        self.scan_burns(&block.spent, height).await?;
        self.commit_modified().await?;
        self.report_mempool();

        info!(
            height,
            txs = block.tx_count,
            slp_txs = block.order.len(),
            "block processed"
        );
        Ok(())
    }

    /// Crawl the block at `height` without writing anything.
    ///
    /// When `sync_complete` is set, SLP transactions that were never seen in
    /// the mempool are ingested and synced first so downstream notification
    /// stays consistent.
    pub async fn crawl(
        &mut self,
        height: u64,
        sync_complete: bool,
    ) -> Result<(CrawlResult, SpentOutpoints), SyncError> {
        let block = self.load_block(height, BlockRef::Height(height)).await?;
        let meta = block.meta();
        let mut result = CrawlResult::new();

        for txid in &block.order {
            let Some(filtered) = block.slp.get(txid) else {
                continue;
            };
            let mut record = self.evaluate(filtered, Some(&block.info)).await?;

            if sync_complete && !self.mempool.contains(txid) {
                warn!(%txid, "SLP transaction was not seen in the mempool");
                self.handle_mempool_transaction(*txid, Some(filtered.raw.clone()))
                    .await?;
                let synced = self.sync_mempool(*txid, None).await?;
                self.graphs.on_transaction_hash(&synced).await;
            }

            record.block = Some(meta.clone());
            if let Some(token_id) = record.token_id() {
                result.insert(
                    *txid,
                    CrawlTxnInfo {
                        record,
                        tx_hex: hex::encode(&filtered.raw),
                        token_id,
                    },
                );
            }
        }

        info!(
            height,
            txs = block.tx_count,
            slp_txs = block.order.len(),
            "block crawled"
        );
        Ok((result, block.spent))
    }

    /// Mark token outputs spent in this block as burned.
    async fn scan_burns(&mut self, spent: &SpentOutpoints, height: u64) -> Result<(), SyncError> {
        for (outpoint, spender) in spent {
            let Some(token_id) = self.graphs.take_live_utxo(outpoint) else {
                continue;
            };
            match self.existing_graph(token_id).await? {
                Some(graph) => {
                    if graph.mark_output_burned(outpoint, spender, height).await? {
                        debug!(%outpoint, %spender, %token_id, "token output burned");
                        self.modified.insert(token_id);
                    }
                }
                None => warn!(%outpoint, %token_id, "live token output without a graph"),
            }
        }
        Ok(())
    }

    /// Commit every modified graph and clear the modified set.
    pub(crate) async fn commit_modified(&mut self) -> Result<(), SyncError> {
        let tokens: Vec<TokenId> = self.modified.drain(..).collect();
        for token_id in tokens {
            if let Some(graph) = self.existing_graph(token_id).await? {
                graph.commit().await?;
            }
        }
        Ok(())
    }

    /// A confirmed transaction stops being a mempool entry.
    fn leave_mempool(&mut self, txid: Txid) {
        if self.mempool.remove(&txid) {
            self.deleter.delete_unconfirmed(vec![txid]);
        }
        self.mempool.ignore(txid);
    }
}
