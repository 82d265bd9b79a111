//! In-memory storage backend.
//!
//! Keeps confirmed and unconfirmed records, token and graph documents, the
//! block cursor and per-height block hashes in RAM. Useful for testing and
//! short-lived runs that don't need persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use indexmap::IndexMap;

use slpindex_core::checkpoint::{ChainSyncCheckpoint, CheckpointStore};
use slpindex_core::error::StoreError;
use slpindex_core::store::SyncStore;
use slpindex_core::types::{TokenId, TxRecord};

#[derive(Default)]
struct State {
    unconfirmed: IndexMap<Txid, TxRecord>,
    confirmed: IndexMap<Txid, (u64, TxRecord)>,
    tokens: HashMap<TokenId, serde_json::Value>,
    graphs: HashMap<TokenId, serde_json::Value>,
    cursor: Option<u64>,
    block_hashes: BTreeMap<u64, BlockHash>,
}

/// In-memory index storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn unconfirmed(&self, txid: &Txid) -> Option<TxRecord> {
        self.lock().unconfirmed.get(txid).cloned()
    }

    /// Confirmed record and the height it was mined at.
    pub fn confirmed(&self, txid: &Txid) -> Option<(u64, TxRecord)> {
        self.lock().confirmed.get(txid).cloned()
    }

    pub fn unconfirmed_count(&self) -> usize {
        self.lock().unconfirmed.len()
    }

    pub fn confirmed_count(&self) -> usize {
        self.lock().confirmed.len()
    }

    /// Record a token document (written by the token graph manager).
    pub fn put_token(&self, token_id: TokenId, doc: serde_json::Value) {
        self.lock().tokens.insert(token_id, doc);
    }

    pub fn token(&self, token_id: &TokenId) -> Option<serde_json::Value> {
        self.lock().tokens.get(token_id).cloned()
    }

    /// Record a serialized token graph.
    pub fn put_graph(&self, token_id: TokenId, doc: serde_json::Value) {
        self.lock().graphs.insert(token_id, doc);
    }

    pub fn graph(&self, token_id: &TokenId) -> Option<serde_json::Value> {
        self.lock().graphs.get(token_id).cloned()
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn unconfirmed_insert(&self, record: &TxRecord) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.unconfirmed.contains_key(&record.txid) {
            return Err(StoreError::DuplicateKey(record.txid.to_string()));
        }
        state.unconfirmed.insert(record.txid, record.clone());
        Ok(())
    }

    async fn unconfirmed_delete(&self, txids: &[Txid]) -> Result<(), StoreError> {
        let mut state = self.lock();
        for txid in txids {
            state.unconfirmed.shift_remove(txid);
        }
        Ok(())
    }

    async fn unconfirmed_txids(&self) -> Result<Vec<Txid>, StoreError> {
        Ok(self.lock().unconfirmed.keys().copied().collect())
    }

    async fn confirmed_replace(&self, records: Vec<TxRecord>, height: u64) -> Result<(), StoreError> {
        let mut state = self.lock();
        for record in records {
            state.confirmed.insert(record.txid, (height, record));
        }
        Ok(())
    }

    async fn confirmed_delete(&self, txid: &Txid) -> Result<(), StoreError> {
        self.lock().confirmed.shift_remove(txid);
        Ok(())
    }

    async fn confirmed_fetch_for_reorg(&self, height: u64) -> Result<Vec<TxRecord>, StoreError> {
        Ok(self
            .lock()
            .confirmed
            .values()
            .filter(|(h, _)| *h == height)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn confirmed_delete_for_reorg(&self, height: u64) -> Result<(), StoreError> {
        self.lock().confirmed.retain(|_, (h, _)| *h != height);
        Ok(())
    }

    async fn token_delete(&self, token_id: &TokenId) -> Result<(), StoreError> {
        self.lock().tokens.remove(token_id);
        Ok(())
    }

    async fn graph_delete(&self, token_id: &TokenId) -> Result<(), StoreError> {
        self.lock().graphs.remove(token_id);
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(&self) -> Result<Option<ChainSyncCheckpoint>, StoreError> {
        let state = self.lock();
        Ok(state
            .cursor
            .map(|height| ChainSyncCheckpoint::new(height, state.block_hashes.get(&height).copied())))
    }

    async fn save(&self, height: u64, hash: Option<BlockHash>) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.cursor = Some(height);
        match hash {
            Some(hash) => state.block_hashes.insert(height, hash),
            None => state.block_hashes.remove(&height),
        };
        Ok(())
    }

    async fn hash_at(&self, height: u64) -> Result<Option<BlockHash>, StoreError> {
        Ok(self.lock().block_hashes.get(&height).copied())
    }

    async fn delete_hash_at(&self, height: u64) -> Result<(), StoreError> {
        self.lock().block_hashes.remove(&height);
        Ok(())
    }

    async fn delete(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.cursor = None;
        state.block_hashes.clear();
        Ok(())
    }
}
