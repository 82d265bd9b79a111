//! Persistent store interface used by the synchronizer.

use async_trait::async_trait;
use bitcoin::Txid;

use crate::error::StoreError;
use crate::types::{TokenId, TxRecord};

/// Confirmed / unconfirmed transaction records plus token and graph rows.
///
/// Implementations: `MemoryStore` and `SqliteStore` in `slpindex-storage`.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Insert an unconfirmed record. Fails with
    /// [`StoreError::DuplicateKey`] if the txid is already present.
    async fn unconfirmed_insert(&self, record: &TxRecord) -> Result<(), StoreError>;

    async fn unconfirmed_delete(&self, txids: &[Txid]) -> Result<(), StoreError>;

    async fn unconfirmed_txids(&self) -> Result<Vec<Txid>, StoreError>;

    /// Upsert confirmed records mined at `height`.
    async fn confirmed_replace(&self, records: Vec<TxRecord>, height: u64) -> Result<(), StoreError>;

    async fn confirmed_delete(&self, txid: &Txid) -> Result<(), StoreError>;

    /// Every confirmed record mined at `height`.
    async fn confirmed_fetch_for_reorg(&self, height: u64) -> Result<Vec<TxRecord>, StoreError>;

    async fn confirmed_delete_for_reorg(&self, height: u64) -> Result<(), StoreError>;

    async fn token_delete(&self, token_id: &TokenId) -> Result<(), StoreError>;

    async fn graph_delete(&self, token_id: &TokenId) -> Result<(), StoreError>;
}
