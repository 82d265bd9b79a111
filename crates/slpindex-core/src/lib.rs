//! slpindex-core: crawler and synchronizer engine of the SLP token index.
//!
//! # Architecture
//!
//! ```text
//! push notification → EventQueue (single worker)
//!                          └── Synchronizer
//!                                ├── reorg     (checkpoint rollback, 2 phases)
//!                                ├── mempool   (admission, double spends)
//!                                ├── crawler   (block crawl, burn scan)
//!                                ├── filter → toposort → TokenGraphManager
//!                                ├── CheckpointManager (durable cursor)
//!                                └── SyncStore (+ background deleter)
//! ```
//!
//! Transport, store and token validation are collaborators behind the
//! [`NodeTransport`], [`SyncStore`] and [`TokenGraphManager`] traits.

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod deleter;
pub mod error;
pub mod filter;
pub mod graph;
pub mod mempool;
pub mod publisher;
pub mod queue;
pub mod reorg;
pub mod status;
pub mod store;
pub mod sync;
pub mod synchronizer;
pub mod toposort;
pub mod transport;
pub mod types;

pub use cache::{BoundedCache, BoundedSet};
pub use checkpoint::{ChainSyncCheckpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use config::{Network, SyncConfig, SyncConfigBuilder};
pub use error::{StoreError, SyncError};
pub use filter::{FilteredTx, ProtocolFilter, TokenFilter, TokenFilterRule};
pub use graph::{GraphLookup, SlpParser, TokenGraph, TokenGraphManager};
pub use mempool::MempoolState;
pub use publisher::{EventPublisher, SyncEvent};
pub use queue::EventQueue;
pub use status::{StatusReporter, SyncState, SyncStatus};
pub use store::SyncStore;
pub use sync::SyncRequest;
pub use synchronizer::{StopHandle, Synchronizer, SynchronizerBuilder};
pub use toposort::topological_sort;
pub use transport::NodeTransport;
pub use types::*;
