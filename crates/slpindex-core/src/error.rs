//! Error types for the synchronizer pipeline.

use bitcoin::{BlockHash, Txid};
use thiserror::Error;

/// Errors raised by a [`SyncStore`](crate::store::SyncStore) or
/// [`CheckpointStore`](crate::checkpoint::CheckpointStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The row already exists (unique-key violation).
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors that can occur while synchronizing blocks and mempool.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("token graph error: {0}")]
    Graph(String),

    #[error("could not decode {what}: {reason}")]
    Decode { what: String, reason: String },

    #[error("block {height} is missing from the node")]
    MissingBlock { height: u64 },

    #[error("block {hash} is not the node's block at height {height}")]
    StaleBlock { height: u64, hash: BlockHash },

    #[error("topological sort returned {actual} transactions for a batch of {expected}")]
    TopologicalSort { expected: usize, actual: usize },

    #[error("rollback exceeded {limit} blocks while {phase}, stopped at height {height}")]
    RollbackLimit {
        limit: u64,
        height: u64,
        phase: &'static str,
    },

    #[error("mempool sync requires a txid")]
    MissingTxid,

    #[error("raw transaction required for {0}, which is not in the SLP mempool")]
    MissingRawTransaction(Txid),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("synchronizer stopped: {reason}")]
    Aborted { reason: String },
}

impl SyncError {
    /// Returns `true` for failures that a later notification or full sync
    /// can retry (node fetches, decode of node data, store hiccups).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::MissingBlock { .. }
                | Self::StaleBlock { .. }
                | Self::Decode { .. }
        )
    }

    /// Returns `true` for structural failures after which local consistency
    /// can no longer be guaranteed. These always terminate the synchronizer.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TopologicalSort { .. } | Self::RollbackLimit { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SyncError::Transport("connection refused".into()).is_transient());
        assert!(!SyncError::Transport("x".into()).is_fatal());

        let sort = SyncError::TopologicalSort { expected: 3, actual: 2 };
        assert!(sort.is_fatal());
        assert!(!sort.is_transient());

        let store: SyncError = StoreError::Backend("disk full".into()).into();
        assert!(!store.is_transient());
        assert!(!store.is_fatal());
    }
}
