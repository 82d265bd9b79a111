//! Full-node transport interface.

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};

use crate::error::SyncError;
use crate::types::{BlockInfo, BlockRef};

/// Read access to a full node.
///
/// Push notifications are not part of this trait; they are delivered through
/// [`EventQueue`](crate::queue::EventQueue).
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn block_info(&self, block: BlockRef) -> Result<BlockInfo, SyncError>;

    /// Consensus-serialized block.
    async fn raw_block(&self, hash: &BlockHash) -> Result<Vec<u8>, SyncError>;

    /// Consensus-serialized transaction.
    async fn raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, SyncError>;

    async fn raw_mempool(&self) -> Result<Vec<Txid>, SyncError>;

    /// Hash of the active-chain block at `height`, `None` above the tip.
    async fn block_hash(&self, height: u64) -> Result<Option<BlockHash>, SyncError>;

    /// Height of the node's best block.
    async fn block_count(&self) -> Result<u64, SyncError>;
}
