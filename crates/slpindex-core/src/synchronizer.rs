//! The synchronizer context and its builder.
//!
//! A [`Synchronizer`] owns every piece of mutable sync state: mempool
//! tracking, the seen-block set, the modified-token set and the checkpoint
//! cursor. Its operations live in `mempool`, `crawler`, `reorg` and `sync`.
//! Exactly one task drives it at a time; see [`EventQueue`](crate::queue::EventQueue).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitcoin::BlockHash;
use indexmap::IndexSet;
use tokio::sync::{broadcast, watch};

use crate::cache::BoundedSet;
use crate::checkpoint::{CheckpointManager, CheckpointStore};
use crate::config::SyncConfig;
use crate::deleter::BackgroundDeleter;
use crate::error::SyncError;
use crate::filter::{ProtocolFilter, TokenFilter};
use crate::graph::TokenGraphManager;
use crate::mempool::MempoolState;
use crate::publisher::{EventPublisher, SyncEvent};
use crate::status::{StatusReporter, SyncStatus};
use crate::store::SyncStore;
use crate::transport::NodeTransport;
use crate::types::TokenId;

/// Cloneable cooperative shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Synchronizer {
    pub(crate) config: SyncConfig,
    pub(crate) transport: Arc<dyn NodeTransport>,
    pub(crate) store: Arc<dyn SyncStore>,
    pub(crate) graphs: Arc<dyn TokenGraphManager>,
    pub(crate) checkpoints: CheckpointManager,
    pub(crate) filter: ProtocolFilter,
    pub(crate) mempool: MempoolState,
    pub(crate) block_hash_ignore: BoundedSet<BlockHash>,
    /// Tokens whose graph changed in the current batch.
    pub(crate) modified: IndexSet<TokenId>,
    pub(crate) stop: StopHandle,
    pub(crate) deleter: BackgroundDeleter,
    pub(crate) publisher: EventPublisher,
    pub(crate) status: Arc<StatusReporter>,
}

impl Synchronizer {
    pub fn builder() -> SynchronizerBuilder {
        SynchronizerBuilder::default()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn mempool(&self) -> &MempoolState {
        &self.mempool
    }

    /// Tokens modified since the last commit.
    pub fn modified_tokens(&self) -> impl Iterator<Item = &TokenId> + '_ {
        self.modified.iter()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.publisher.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub(crate) fn status_reporter(&self) -> Arc<StatusReporter> {
        self.status.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Ask the block loop to return at its next height.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Wait for every background delete submitted so far.
    pub async fn settle(&self) {
        self.deleter.settle().await;
    }

    pub(crate) fn report_mempool(&self) {
        self.status.mempool_size(self.mempool.len());
    }
}

/// Wires collaborators into a [`Synchronizer`].
#[derive(Default)]
pub struct SynchronizerBuilder {
    config: SyncConfig,
    transport: Option<Arc<dyn NodeTransport>>,
    store: Option<Arc<dyn SyncStore>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    graphs: Option<Arc<dyn TokenGraphManager>>,
}

impl SynchronizerBuilder {
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn NodeTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn SyncStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn graphs(mut self, graphs: Arc<dyn TokenGraphManager>) -> Self {
        self.graphs = Some(graphs);
        self
    }

    /// Build the synchronizer. Must be called inside a tokio runtime; the
    /// background deleter is spawned here.
    pub fn build(self) -> Result<Synchronizer, SyncError> {
        let transport = self
            .transport
            .ok_or_else(|| SyncError::Config("a node transport is required".into()))?;
        let store = self
            .store
            .ok_or_else(|| SyncError::Config("a sync store is required".into()))?;
        let checkpoint_store = self
            .checkpoints
            .ok_or_else(|| SyncError::Config("a checkpoint store is required".into()))?;
        let graphs = self
            .graphs
            .ok_or_else(|| SyncError::Config("a token graph manager is required".into()))?;

        let config = self.config;
        let checkpoints =
            CheckpointManager::new(checkpoint_store, config.floor(), config.checkpoint_history);
        let deleter = BackgroundDeleter::spawn(store.clone(), config.delete_concurrency);

        Ok(Synchronizer {
            transport,
            checkpoints,
            graphs,
            filter: ProtocolFilter::new(TokenFilter::new(config.token_filters.clone())),
            mempool: MempoolState::new(&config),
            block_hash_ignore: BoundedSet::new(config.block_hash_ignore_capacity),
            modified: IndexSet::new(),
            stop: StopHandle::default(),
            deleter,
            publisher: EventPublisher::new(config.channel_capacity),
            status: Arc::new(StatusReporter::new(config.network)),
            store,
            config,
        })
    }
}
