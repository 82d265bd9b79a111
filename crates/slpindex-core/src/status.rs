//! Synchronizer status snapshots, published on a `watch` channel.

use bitcoin::BlockHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::Network;
use crate::types::DoubleSpendRecord;

const MAX_PAST_ERRORS: usize = 5;

/// Lifecycle of the synchronizer process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    #[default]
    PreStartup,
    StartupBlockSync,
    StartupTokenProcessing,
    Running,
    ExitedOnError,
    ExitedNormal,
}

impl SyncState {
    pub fn is_exited(&self) -> bool {
        matches!(self, Self::ExitedOnError | Self::ExitedNormal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SyncStatus {
    pub state: SyncState,
    pub network: Network,
    pub checkpoint_height: Option<u64>,
    pub checkpoint_hash: Option<BlockHash>,
    /// Last block fully crawled and committed.
    pub processed_height: Option<u64>,
    pub mempool_size: usize,
    pub last_incoming_block: Option<DateTime<Utc>>,
    pub last_incoming_txn: Option<DateTime<Utc>>,
    pub last_outgoing_block: Option<DateTime<Utc>>,
    pub last_outgoing_txn: Option<DateTime<Utc>>,
    pub double_spends: Vec<DoubleSpendRecord>,
    /// Most recent fatal errors, newest first.
    pub past_errors: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Owns the status sender; cloned receivers observe every update.
#[derive(Debug)]
pub struct StatusReporter {
    tx: watch::Sender<SyncStatus>,
}

impl StatusReporter {
    pub fn new(network: Network) -> Self {
        let (tx, _) = watch::channel(SyncStatus {
            network,
            ..SyncStatus::default()
        });
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    pub fn set_state(&self, state: SyncState) {
        self.update(|s| s.state = state);
    }

    /// Record a fatal error and move to [`SyncState::ExitedOnError`].
    pub fn exit_on_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| {
            s.state = SyncState::ExitedOnError;
            s.past_errors.insert(0, message);
            s.past_errors.truncate(MAX_PAST_ERRORS);
        });
    }

    pub fn block_incoming(&self) {
        self.update(|s| s.last_incoming_block = Some(Utc::now()));
    }

    pub fn txn_incoming(&self) {
        self.update(|s| s.last_incoming_txn = Some(Utc::now()));
    }

    pub fn block_outgoing(&self) {
        self.update(|s| s.last_outgoing_block = Some(Utc::now()));
    }

    pub fn txn_outgoing(&self) {
        self.update(|s| s.last_outgoing_txn = Some(Utc::now()));
    }

    /// A block was crawled and the checkpoint moved to it.
    pub fn block_processed(&self, height: u64, hash: BlockHash) {
        self.update(|s| {
            s.processed_height = Some(height);
            s.checkpoint_height = Some(height);
            s.checkpoint_hash = Some(hash);
        });
    }

    pub fn checkpoint(&self, height: u64, hash: Option<BlockHash>) {
        self.update(|s| {
            s.checkpoint_height = Some(height);
            s.checkpoint_hash = hash;
        });
    }

    pub fn mempool_size(&self, size: usize) {
        self.update(|s| s.mempool_size = size);
    }

    pub fn double_spends(&self, history: Vec<DoubleSpendRecord>) {
        self.update(|s| s.double_spends = history);
    }

    fn update(&self, f: impl FnOnce(&mut SyncStatus)) {
        self.tx.send_modify(|s| {
            f(s);
            s.updated_at = Some(Utc::now());
        });
    }
}
