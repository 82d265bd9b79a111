//! slpindex-rpc: node access for the SLP token index.
//!
//! - [`NodeRpcClient`]: bitcoind-style JSON-RPC over HTTP implementing
//!   [`NodeTransport`](slpindex_core::NodeTransport), with retry and
//!   exponential backoff for transient failures.
//! - [`PollingNotifier`]: turns periodic tip and mempool polls into push
//!   notifications for the ingestion queue.

pub mod client;
pub mod error;
pub mod notifier;
pub mod request;
pub mod retry;

pub use client::{NodeRpcClient, NodeRpcConfig};
pub use error::RpcError;
pub use notifier::{NotificationSink, PollingNotifier};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use retry::{RetryConfig, RetryPolicy};
