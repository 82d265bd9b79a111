//! Synchronizer configuration.

use serde::{Deserialize, Serialize};

use crate::filter::TokenFilterRule;

/// Chain the node is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mainnet => write!(f, "mainnet"),
            Self::Testnet => write!(f, "testnet"),
            Self::Regtest => write!(f, "regtest"),
        }
    }
}

/// Configuration for a [`Synchronizer`](crate::Synchronizer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub network: Network,
    /// Lowest height the checkpoint may roll back to on mainnet.
    pub from_mainnet: u64,
    pub from_testnet: u64,
    pub from_regtest: u64,
    /// Capacity of the spent-outpoint index used for double-spend detection.
    pub spent_cache_capacity: usize,
    /// Capacity of the double-spend history shown in status.
    pub double_spend_cache_capacity: usize,
    /// Capacity of the non-SLP txid ignore list.
    pub mempool_ignore_capacity: usize,
    /// Capacity of the seen-block-hash set.
    pub block_hash_ignore_capacity: usize,
    /// Hard ceiling on blocks rolled back by one reorg check.
    pub max_rollback: u64,
    /// Stored checkpoint hashes older than this many blocks are deleted.
    pub checkpoint_history: u64,
    /// The dependency sorter yields after this many visited transactions.
    pub sort_yield_interval: usize,
    /// Maximum passes of a full mempool sync (residual re-scans included).
    pub mempool_sync_passes: usize,
    /// Background store deletes allowed in flight at once.
    pub delete_concurrency: usize,
    /// Capacity of the outward event broadcast channel.
    pub channel_capacity: usize,
    /// Schema version stamped onto every record's SLP section.
    pub schema_version: u32,
    /// Allow / deny rules keyed by token id.
    pub token_filters: Vec<TokenFilterRule>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            from_mainnet: 543_375,
            from_testnet: 1_253_801,
            from_regtest: 0,
            spent_cache_capacity: 100_000,
            double_spend_cache_capacity: 20,
            mempool_ignore_capacity: 100_000,
            block_hash_ignore_capacity: 100,
            max_rollback: 100,
            checkpoint_history: 100,
            sort_yield_interval: 1_000,
            mempool_sync_passes: 3,
            delete_concurrency: 8,
            channel_capacity: 1_024,
            schema_version: 79,
            token_filters: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// The configured genesis floor for the active network.
    pub fn floor(&self) -> u64 {
        match self.network {
            Network::Mainnet => self.from_mainnet,
            Network::Testnet => self.from_testnet,
            Network::Regtest => self.from_regtest,
        }
    }

    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }
}

/// Fluent builder for [`SyncConfig`].
#[derive(Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn network(mut self, network: Network) -> Self {
        self.config.network = network;
        self
    }

    /// Override the genesis floor of the currently selected network.
    pub fn floor(mut self, height: u64) -> Self {
        match self.config.network {
            Network::Mainnet => self.config.from_mainnet = height,
            Network::Testnet => self.config.from_testnet = height,
            Network::Regtest => self.config.from_regtest = height,
        }
        self
    }

    pub fn spent_cache_capacity(mut self, n: usize) -> Self {
        self.config.spent_cache_capacity = n;
        self
    }

    pub fn mempool_ignore_capacity(mut self, n: usize) -> Self {
        self.config.mempool_ignore_capacity = n;
        self
    }

    pub fn max_rollback(mut self, n: u64) -> Self {
        self.config.max_rollback = n;
        self
    }

    pub fn sort_yield_interval(mut self, n: usize) -> Self {
        self.config.sort_yield_interval = n;
        self
    }

    pub fn token_filter(mut self, rule: TokenFilterRule) -> Self {
        self.config.token_filters.push(rule);
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}
