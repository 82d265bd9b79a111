//! Transport-level error types.

use slpindex_core::SyncError;
use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur while talking to the node.
#[derive(Debug, Error)]
pub enum RpcError {
    /// HTTP request failed (connection refused, timeout, bad status).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The node returned a well-formed but unusable value.
    #[error("unexpected {method} result: {reason}")]
    Unexpected { method: &'static str, reason: String },
}

impl RpcError {
    /// Returns `true` if this error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout { .. } => true,
            Self::Rpc(e) => e.code == JsonRpcError::IN_WARMUP,
            _ => false,
        }
    }

    /// Returns the node's error code, if any.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Rpc(e) => Some(e.code),
            _ => None,
        }
    }
}

impl From<RpcError> for SyncError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Deserialization(_) | RpcError::Unexpected { .. } => SyncError::Decode {
                what: "node response".into(),
                reason: e.to_string(),
            },
            other => SyncError::Transport(other.to_string()),
        }
    }
}
