//! Mempool manager: tracks SLP-relevant unconfirmed transactions and
//! detects double spends through the spent-outpoint index.

use std::collections::{HashMap, HashSet};

use bitcoin::consensus::encode::deserialize;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{OutPoint, Transaction, Txid};
use chrono::Utc;
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info, warn};

use crate::cache::{BoundedCache, BoundedSet};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::synchronizer::Synchronizer;
use crate::toposort::topological_sort;
use crate::types::{DoubleSpendRecord, MempoolAdmission, MempoolSyncResult, SpentBy};

/// Inputs referencing the all-zero txid are coinbase placeholders.
pub(crate) fn is_coinbase_outpoint(outpoint: &OutPoint) -> bool {
    outpoint.txid == Txid::all_zeros()
}

/// In-memory mempool bookkeeping.
pub struct MempoolState {
    entries: HashMap<Txid, Vec<u8>>,
    spent: BoundedCache<OutPoint, SpentBy>,
    double_spends: BoundedCache<OutPoint, DoubleSpendRecord>,
    ignore: BoundedSet<Txid>,
}

impl MempoolState {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            entries: HashMap::new(),
            spent: BoundedCache::new(config.spent_cache_capacity),
            double_spends: BoundedCache::new(config.double_spend_cache_capacity),
            ignore: BoundedSet::new(config.mempool_ignore_capacity),
        }
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn is_ignored(&self, txid: &Txid) -> bool {
        self.ignore.contains(txid)
    }

    pub fn raw(&self, txid: &Txid) -> Option<&[u8]> {
        self.entries.get(txid).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn txids(&self) -> impl Iterator<Item = &Txid> + '_ {
        self.entries.keys()
    }

    /// Current claimant of `outpoint`.
    pub fn spent_by(&self, outpoint: &OutPoint) -> Option<SpentBy> {
        self.spent.get(outpoint).copied()
    }

    pub fn double_spend(&self, outpoint: &OutPoint) -> Option<&DoubleSpendRecord> {
        self.double_spends.get(outpoint)
    }

    /// Double spends observed so far, oldest first.
    pub fn double_spend_history(&self) -> Vec<DoubleSpendRecord> {
        self.double_spends.iter().map(|(_, r)| r.clone()).collect()
    }

    pub(crate) fn insert(&mut self, txid: Txid, raw: Vec<u8>) {
        self.entries.insert(txid, raw);
    }

    pub(crate) fn remove(&mut self, txid: &Txid) -> bool {
        self.entries.remove(txid).is_some()
    }

    pub(crate) fn ignore(&mut self, txid: Txid) {
        self.ignore.insert(txid);
    }

    pub(crate) fn unignore(&mut self, txid: &Txid) {
        self.ignore.remove(txid);
    }

    /// Record `txid` as the claimant of every non-coinbase input.
    pub(crate) fn index_spends(&mut self, tx: &Transaction, txid: Txid, height: Option<u64>) {
        for input in &tx.input {
            if is_coinbase_outpoint(&input.previous_output) {
                continue;
            }
            self.spent
                .insert(input.previous_output, SpentBy { txid, height });
        }
    }

    /// Drop the claim of `txid` on `outpoint`; a newer claimant is kept.
    pub(crate) fn release_spend(&mut self, outpoint: &OutPoint, txid: &Txid) {
        if self.spent.get(outpoint).is_some_and(|s| s.txid == *txid) {
            self.spent.remove(outpoint);
        }
    }

    fn record_double_spend(&mut self, outpoint: OutPoint, original: Txid, current: Txid) {
        self.double_spends.insert(
            outpoint,
            DoubleSpendRecord {
                outpoint,
                original_txid: original,
                current_txid: current,
                detected_at: Utc::now(),
            },
        );
        self.spent.insert(
            outpoint,
            SpentBy {
                txid: current,
                height: None,
            },
        );
    }
}

impl Synchronizer {
    /// Offer a transaction to mempool tracking.
    ///
    /// Double spends of tracked outpoints are resolved in favour of this
    /// transaction before the protocol filter runs, so a non-SLP spend still
    /// evicts an SLP loser.
    pub async fn handle_mempool_transaction(
        &mut self,
        txid: Txid,
        raw: Option<Vec<u8>>,
    ) -> Result<MempoolAdmission, SyncError> {
        if self.mempool.contains(&txid) {
            return Ok(MempoolAdmission {
                is_slp: true,
                added: false,
            });
        }
        if self.mempool.is_ignored(&txid) {
            return Ok(MempoolAdmission::default());
        }

        let raw = match raw {
            Some(raw) => raw,
            None => match self.transport.raw_transaction(&txid).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(%txid, error = %e, "could not fetch mempool transaction");
                    return Ok(MempoolAdmission::default());
                }
            },
        };

        let tx: Transaction = match deserialize(&raw) {
            Ok(tx) => tx,
            Err(e) => {
                debug!(%txid, error = %e, "mempool transaction did not decode");
                self.mempool.ignore(txid);
                return Ok(MempoolAdmission::default());
            }
        };

        self.resolve_double_spends(&tx, txid).await?;

        let admission = match self.filter.apply(&raw, &*self.graphs) {
            Some(filtered) => {
                self.mempool.index_spends(&filtered.tx, txid, None);
                self.mempool.insert(txid, raw);
                MempoolAdmission {
                    is_slp: true,
                    added: true,
                }
            }
            None => {
                self.mempool.ignore(txid);
                MempoolAdmission::default()
            }
        };
        self.report_mempool();
        Ok(admission)
    }

    async fn resolve_double_spends(&mut self, tx: &Transaction, txid: Txid) -> Result<(), SyncError> {
        let mut losers: IndexSet<Txid> = IndexSet::new();
        for input in &tx.input {
            let outpoint = input.previous_output;
            if is_coinbase_outpoint(&outpoint) {
                continue;
            }
            let Some(previous) = self.mempool.spent_by(&outpoint) else {
                continue;
            };
            if previous.txid == txid {
                continue;
            }
            info!(
                %outpoint,
                original = %previous.txid,
                current = %txid,
                "double spend detected"
            );
            self.mempool
                .record_double_spend(outpoint, previous.txid, txid);
            losers.insert(previous.txid);
        }
        if losers.is_empty() {
            return Ok(());
        }

        let mut targeted = HashSet::new();
        for loser in losers {
            self.mempool.remove(&loser);
            self.deleter.delete_unconfirmed(vec![loser]);
            self.deleter.delete_confirmed(loser);
            if self.graphs.has_token(&loser) {
                info!(token_id = %loser, "double-spent genesis, dropping token");
                self.graphs.remove_token(&loser).await?;
                self.deleter.delete_token(loser);
            } else {
                targeted.insert(loser);
            }
        }
        if !targeted.is_empty() {
            self.graphs.remove_double_spends(&targeted).await?;
        }
        self.status
            .double_spends(self.mempool.double_spend_history());
        Ok(())
    }

    /// Drop tracked and stored unconfirmed transactions the node no longer
    /// has in its mempool. Returns how many were dropped.
    pub async fn remove_extraneous_mempool_txns(&mut self) -> Result<usize, SyncError> {
        let node: HashSet<Txid> = self.transport.raw_mempool().await?.into_iter().collect();
        let mut candidates: HashSet<Txid> = self.store.unconfirmed_txids().await?.into_iter().collect();
        candidates.extend(self.mempool.txids().copied());

        let stale: Vec<Txid> = candidates
            .into_iter()
            .filter(|txid| !node.contains(txid))
            .collect();
        for txid in &stale {
            self.mempool.remove(txid);
        }
        let removed = stale.len();
        if removed > 0 {
            debug!(removed, "dropping transactions no longer in the node mempool");
        }
        self.deleter.delete_unconfirmed(stale);
        self.report_mempool();
        Ok(removed)
    }

    /// Ingest one raw transaction notification.
    ///
    /// Returns the mempool sync result when the transaction was newly
    /// admitted, `None` when it was already tracked or is not SLP.
    pub async fn handle_raw_transaction(
        &mut self,
        raw: Vec<u8>,
        txid: Option<Txid>,
    ) -> Result<Option<MempoolSyncResult>, SyncError> {
        let txid = txid.unwrap_or_else(|| Txid::from_raw_hash(sha256d::Hash::hash(&raw)));

        let admission = self.handle_mempool_transaction(txid, Some(raw)).await?;
        if admission.added {
            debug!(%txid, "possible SLP transaction added");
            let result = self.sync_mempool(txid, None).await?;
            if !result.is_empty() {
                self.graphs.on_transaction_hash(&result).await;
            }
            Ok(Some(result))
        } else {
            if admission.is_slp {
                debug!(%txid, "transaction already handled");
            } else {
                debug!(%txid, "transaction ignored");
            }
            Ok(None)
        }
    }

    /// Bring mempool tracking in line with the node's full mempool.
    ///
    /// SLP transactions are ingested in dependency order. Transactions that
    /// arrive while a pass runs are picked up by further passes, up to
    /// `mempool_sync_passes` in total.
    pub async fn sync_slp_mempool(&mut self) -> Result<(), SyncError> {
        info!("syncing SLP mempool");
        let mut pending = self.transport.raw_mempool().await?;
        info!(node_mempool = pending.len(), "node mempool listed");

        for pass in 1..=self.config.mempool_sync_passes.max(1) {
            if self.is_stopping() {
                return Ok(());
            }

            let mut batch = IndexMap::new();
            for txid in &pending {
                let raw = match self.transport.raw_transaction(txid).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(%txid, error = %e, "mempool transaction vanished before it was fetched");
                        continue;
                    }
                };
                match self.filter.apply(&raw, &*self.graphs) {
                    Some(filtered) => {
                        batch.insert(filtered.txid, filtered);
                    }
                    None => self.mempool.ignore(*txid),
                }
            }

            let order = topological_sort(&batch, self.config.sort_yield_interval).await?;
            for txid in order {
                if let Some(filtered) = batch.swap_remove(&txid) {
                    self.handle_raw_transaction(filtered.raw, Some(txid)).await?;
                }
            }

            pending = self
                .transport
                .raw_mempool()
                .await?
                .into_iter()
                .filter(|txid| !self.mempool.contains(txid) && !self.mempool.is_ignored(txid))
                .collect();
            if pending.is_empty() {
                break;
            }
            debug!(pass, residual = pending.len(), "mempool changed during sync");
        }

        let removed = self.remove_extraneous_mempool_txns().await?;
        info!(slp_mempool = self.mempool.len(), removed, "SLP mempool synced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn outpoint(n: u8, vout: u32) -> OutPoint {
        OutPoint::new(Txid::from_byte_array([n; 32]), vout)
    }

    #[test]
    fn release_keeps_newer_claimant() {
        let mut state = MempoolState::new(&SyncConfig::default());
        let a = Txid::from_byte_array([1; 32]);
        let b = Txid::from_byte_array([2; 32]);
        let op = outpoint(9, 0);

        state.record_double_spend(op, a, b);
        state.release_spend(&op, &a);
        assert_eq!(state.spent_by(&op).map(|s| s.txid), Some(b));

        state.release_spend(&op, &b);
        assert!(state.spent_by(&op).is_none());
        assert_eq!(state.double_spend(&op).unwrap().original_txid, a);
    }

    #[test]
    fn double_spend_history_is_bounded() {
        let config = SyncConfig::default();
        let mut state = MempoolState::new(&config);
        for n in 0..30u8 {
            state.record_double_spend(
                outpoint(n, 0),
                Txid::from_byte_array([n; 32]),
                Txid::from_byte_array([n.wrapping_add(100); 32]),
            );
        }
        let history = state.double_spend_history();
        assert_eq!(history.len(), config.double_spend_cache_capacity);
        assert_eq!(history[0].outpoint, outpoint(10, 0));
    }

    #[test]
    fn coinbase_placeholder() {
        assert!(is_coinbase_outpoint(&OutPoint::null()));
        assert!(!is_coinbase_outpoint(&outpoint(1, 0)));
    }
}
