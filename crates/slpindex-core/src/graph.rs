//! Token graph collaborator interface.
//!
//! The synchronizer never validates tokens itself. It hands transactions to
//! a [`TokenGraphManager`], which owns one [`TokenGraph`] per token and the
//! global index of live token outputs.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{BlockHash, OutPoint, Txid};

use crate::error::SyncError;
use crate::types::{MempoolSyncResult, SlpMessage, TokenId, Validation};

/// Parses the output-0 script of a transaction into an [`SlpMessage`].
pub trait SlpParser: Send + Sync {
    /// Returns `None` for scripts that are not well-formed SLP messages.
    fn parse_output_script(&self, script: &[u8]) -> Option<SlpMessage>;
}

/// Arguments of a [`TokenGraphManager::token_graph`] lookup.
#[derive(Debug, Clone, Copy)]
pub struct GraphLookup<'a> {
    /// Transaction that triggered the lookup.
    pub txid: Txid,
    pub token_id: TokenId,
    /// Set when `txid` is the token's GENESIS; lets the manager create the graph.
    pub genesis: Option<&'a SlpMessage>,
    pub block_created: Option<u64>,
    pub block_time: Option<i64>,
}

impl<'a> GraphLookup<'a> {
    /// Lookup of an already-known token.
    pub fn existing(token_id: TokenId) -> Self {
        Self {
            txid: token_id,
            token_id,
            genesis: None,
            block_created: None,
            block_time: None,
        }
    }
}

/// Per-token validation DAG.
#[async_trait]
pub trait TokenGraph: Send + Sync {
    fn token_id(&self) -> TokenId;

    async fn validate_transaction(&self, txid: &Txid) -> Result<Validation, SyncError>;

    /// Add a validated transaction, processing the graph up to `height`.
    async fn add_transaction(
        &self,
        txid: &Txid,
        height: Option<u64>,
        block_hash: Option<BlockHash>,
    ) -> Result<(), SyncError>;

    async fn remove_transaction(&self, txid: &Txid) -> Result<(), SyncError>;

    /// Record that a token output was spent by a non-conforming transaction.
    /// Returns `true` if the graph changed.
    async fn mark_output_burned(
        &self,
        outpoint: &OutPoint,
        spender: &Txid,
        height: u64,
    ) -> Result<bool, SyncError>;

    /// Flush pending graph changes to the persistent store.
    async fn commit(&self) -> Result<(), SyncError>;

    /// Number of transactions in the graph.
    fn size(&self) -> usize;
}

/// Owner of every token graph.
#[async_trait]
pub trait TokenGraphManager: SlpParser {
    /// Look up (or, for a GENESIS, create) the graph of a token.
    async fn token_graph(
        &self,
        lookup: GraphLookup<'_>,
    ) -> Result<Option<Arc<dyn TokenGraph>>, SyncError>;

    fn has_token(&self, token_id: &TokenId) -> bool;

    /// Drop a token's in-memory graph.
    async fn remove_token(&self, token_id: &TokenId) -> Result<(), SyncError>;

    /// Remove double-spent transactions from every graph that holds them.
    async fn remove_double_spends(&self, txids: &HashSet<Txid>) -> Result<(), SyncError>;

    /// Remove `outpoint` from the live token-output index, returning the
    /// owning token if it was present.
    fn take_live_utxo(&self, outpoint: &OutPoint) -> Option<TokenId>;

    /// Advance the pruning stack to `height`; returns the tokens it pruned.
    async fn prune_to_height(&self, height: u64) -> Vec<TokenId>;

    async fn on_block_hash(&self, _hash: &BlockHash) {}

    async fn on_transaction_hash(&self, _result: &MempoolSyncResult) {}
}
