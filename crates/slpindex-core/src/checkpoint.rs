//! Checkpoint manager: persists the synchronizer's block cursor.
//!
//! The checkpoint is the `(height, hash)` of the last block whose effects
//! are fully in the store. A hash is also kept for each recent height so
//! reorg detection can compare it against the node's active chain. On
//! restart, syncing resumes from `height + 1`; with no checkpoint it starts
//! from the network's genesis floor.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bitcoin::BlockHash;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, SyncError};

/// Position of the synchronizer on the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSyncCheckpoint {
    pub height: u64,
    /// `None` when the height was accepted without a hash commitment
    /// (a fresh start or a rollback that bottomed out at the floor).
    pub hash: Option<BlockHash>,
    pub had_reorg: bool,
}

impl ChainSyncCheckpoint {
    pub fn new(height: u64, hash: Option<BlockHash>) -> Self {
        Self {
            height,
            hash,
            had_reorg: false,
        }
    }
}

/// Trait for storing and loading the block cursor and per-height hashes.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the cursor, `None` if nothing was ever saved.
    async fn load(&self) -> Result<Option<ChainSyncCheckpoint>, StoreError>;

    /// Move the cursor to `height` and remember `hash` for that height.
    async fn save(&self, height: u64, hash: Option<BlockHash>) -> Result<(), StoreError>;

    async fn hash_at(&self, height: u64) -> Result<Option<BlockHash>, StoreError>;

    async fn delete_hash_at(&self, height: u64) -> Result<(), StoreError>;

    /// Forget the cursor and every stored hash.
    async fn delete(&self) -> Result<(), StoreError>;
}

/// Wraps a [`CheckpointStore`] with the network floor and hash retention.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    floor: u64,
    /// Stored hashes further than this below the cursor are deleted.
    history: u64,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, floor: u64, history: u64) -> Self {
        Self {
            store,
            floor,
            history,
        }
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }

    /// The saved checkpoint, if any.
    pub async fn load(&self) -> Result<Option<ChainSyncCheckpoint>, SyncError> {
        Ok(self.store.load().await?)
    }

    /// The saved checkpoint, or the genesis floor with no hash.
    pub async fn load_or_floor(&self) -> Result<ChainSyncCheckpoint, SyncError> {
        Ok(self
            .store
            .load()
            .await?
            .unwrap_or_else(|| ChainSyncCheckpoint::new(self.floor, None)))
    }

    pub async fn save(&self, height: u64, hash: Option<BlockHash>) -> Result<(), SyncError> {
        Ok(self.store.save(height, hash).await?)
    }

    /// Record a newly crawled block and drop the hash that fell out of the
    /// retention window.
    pub async fn advance(&self, height: u64, hash: BlockHash) -> Result<(), SyncError> {
        if let Some(old) = height.checked_sub(self.history) {
            self.store.delete_hash_at(old).await?;
        }
        self.store.save(height, Some(hash)).await?;
        Ok(())
    }

    pub async fn hash_at(&self, height: u64) -> Result<Option<BlockHash>, SyncError> {
        Ok(self.store.hash_at(height).await?)
    }

    pub async fn delete_hash_at(&self, height: u64) -> Result<(), SyncError> {
        Ok(self.store.delete_hash_at(height).await?)
    }

    pub async fn reset(&self) -> Result<(), SyncError> {
        Ok(self.store.delete().await?)
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

#[derive(Default)]
struct MemoryCheckpointState {
    cursor: Option<u64>,
    hashes: BTreeMap<u64, BlockHash>,
}

/// In-memory checkpoint store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    state: Mutex<MemoryCheckpointState>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a stored hash without moving the cursor.
    pub fn insert_hash(&self, height: u64, hash: BlockHash) {
        self.lock().hashes.insert(height, hash);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryCheckpointState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<ChainSyncCheckpoint>, StoreError> {
        let state = self.lock();
        Ok(state.cursor.map(|height| ChainSyncCheckpoint {
            height,
            hash: state.hashes.get(&height).copied(),
            had_reorg: false,
        }))
    }

    async fn save(&self, height: u64, hash: Option<BlockHash>) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.cursor = Some(height);
        match hash {
            Some(hash) => {
                state.hashes.insert(height, hash);
            }
            None => {
                state.hashes.remove(&height);
            }
        }
        Ok(())
    }

    async fn hash_at(&self, height: u64) -> Result<Option<BlockHash>, StoreError> {
        Ok(self.lock().hashes.get(&height).copied())
    }

    async fn delete_hash_at(&self, height: u64) -> Result<(), StoreError> {
        self.lock().hashes.remove(&height);
        Ok(())
    }

    async fn delete(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.cursor = None;
        state.hashes.clear();
        Ok(())
    }
}
