//! HTTP JSON-RPC client for a bitcoind-style node, backed by `reqwest`.
//!
//! Features:
//! - Basic auth (`rpcuser` / `rpcpassword`)
//! - Automatic retry with exponential backoff for transient errors
//! - Typed wrappers for the calls the synchronizer needs, exposed through
//!   [`NodeTransport`]

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use slpindex_core::{BlockInfo, BlockRef, NodeTransport, SyncError};

use crate::error::RpcError;
use crate::request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::retry::{RetryConfig, RetryPolicy};

/// Configuration for [`NodeRpcClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRpcConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub request_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for NodeRpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8332".into(),
            user: None,
            password: None,
            request_timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

/// Subset of `getblockheader` (verbose) the synchronizer reads.
#[derive(Debug, Clone, Deserialize)]
struct BlockHeaderInfo {
    hash: String,
    height: u64,
    time: i64,
}

/// HTTP JSON-RPC client for the full node.
pub struct NodeRpcClient {
    url: String,
    auth: Option<(String, Option<String>)>,
    http: reqwest::Client,
    retry: RetryPolicy,
    request_timeout: Duration,
    next_id: AtomicU64,
}

impl NodeRpcClient {
    pub fn new(config: NodeRpcConfig) -> Result<Self, RpcError> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RpcError::Http(e.to_string()))?;

        Ok(Self {
            url: config.url,
            auth: config.user.map(|user| (user, config.password)),
            http,
            retry: RetryPolicy::new(config.retry),
            request_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        let mut builder = self.http.post(&self.url).json(req);
        if let Some((user, password)) = &self.auth {
            builder = builder.basic_auth(user, password.as_ref());
        }
        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RpcError::Timeout {
                    ms: self.request_timeout.as_millis() as u64,
                }
            } else {
                RpcError::Http(e.to_string())
            }
        })?;

        // the node answers RPC errors with a non-2xx status and a JSON body
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))?;
        match serde_json::from_str::<JsonRpcResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(RpcError::Http(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.trim()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Call `method`, retrying transient failures.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self
                .send_once(&req)
                .await
                .and_then(|resp| resp.into_result().map_err(RpcError::Rpc));
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis(),
                            error = %e,
                            method,
                            "retrying node request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(attempt, error = %e, method, "max retries exceeded");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, RpcError> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    // ─── Typed calls ─────────────────────────────────────────────────────────────

    pub async fn get_block_count(&self) -> Result<u64, RpcError> {
        self.call_as("getblockcount", vec![]).await
    }

    /// `None` when the height is past the node's tip.
    pub async fn get_block_hash(&self, height: u64) -> Result<Option<BlockHash>, RpcError> {
        match self.call_as::<String>("getblockhash", vec![json!(height)]).await {
            Ok(hex) => parse_hash("getblockhash", &hex).map(Some),
            Err(RpcError::Rpc(e)) if e.code == JsonRpcError::INVALID_PARAMETER => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_block_info(&self, hash: &BlockHash) -> Result<BlockInfo, RpcError> {
        let header: BlockHeaderInfo = self
            .call_as("getblockheader", vec![json!(hash.to_string()), json!(true)])
            .await?;
        Ok(BlockInfo {
            hash: parse_hash("getblockheader", &header.hash)?,
            height: header.height,
            time: header.time,
        })
    }

    pub async fn get_raw_block(&self, hash: &BlockHash) -> Result<Vec<u8>, RpcError> {
        let hex: String = self
            .call_as("getblock", vec![json!(hash.to_string()), json!(0)])
            .await?;
        decode_hex("getblock", &hex)
    }

    pub async fn get_raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, RpcError> {
        let hex: String = self
            .call_as("getrawtransaction", vec![json!(txid.to_string()), json!(0)])
            .await?;
        decode_hex("getrawtransaction", &hex)
    }

    pub async fn get_raw_mempool(&self) -> Result<Vec<Txid>, RpcError> {
        let txids: Vec<String> = self.call_as("getrawmempool", vec![]).await?;
        txids
            .iter()
            .map(|s| {
                Txid::from_str(s).map_err(|e| RpcError::Unexpected {
                    method: "getrawmempool",
                    reason: format!("{s}: {e}"),
                })
            })
            .collect()
    }
}

fn parse_hash(method: &'static str, s: &str) -> Result<BlockHash, RpcError> {
    BlockHash::from_str(s).map_err(|e| RpcError::Unexpected {
        method,
        reason: format!("{s}: {e}"),
    })
}

fn decode_hex(method: &'static str, s: &str) -> Result<Vec<u8>, RpcError> {
    hex::decode(s).map_err(|e| RpcError::Unexpected {
        method,
        reason: e.to_string(),
    })
}

#[async_trait]
impl NodeTransport for NodeRpcClient {
    async fn block_info(&self, block: BlockRef) -> Result<BlockInfo, SyncError> {
        let hash = match block {
            BlockRef::Hash(hash) => hash,
            BlockRef::Height(height) => self
                .get_block_hash(height)
                .await?
                .ok_or(SyncError::MissingBlock { height })?,
        };
        Ok(self.get_block_info(&hash).await?)
    }

    async fn raw_block(&self, hash: &BlockHash) -> Result<Vec<u8>, SyncError> {
        Ok(self.get_raw_block(hash).await?)
    }

    async fn raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, SyncError> {
        Ok(self.get_raw_transaction(txid).await?)
    }

    async fn raw_mempool(&self) -> Result<Vec<Txid>, SyncError> {
        Ok(self.get_raw_mempool().await?)
    }

    async fn block_hash(&self, height: u64) -> Result<Option<BlockHash>, SyncError> {
        Ok(self.get_block_hash(height).await?)
    }

    async fn block_count(&self) -> Result<u64, SyncError> {
        Ok(self.get_block_count().await?)
    }
}
