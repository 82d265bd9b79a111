//! slpindex-storage: pluggable storage backends for the SLP token index.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement [`SyncStore`](slpindex_core::SyncStore) and
//! [`CheckpointStore`](slpindex_core::CheckpointStore), so one value can be
//! handed to the synchronizer builder for both roles.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
