//! Shared types for the synchronizer pipeline.

use bitcoin::{BlockHash, OutPoint, Transaction, Txid};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A token is identified by the txid of its GENESIS transaction.
pub type TokenId = Txid;

// ─── Blocks ───────────────────────────────────────────────────────────────────

/// Selects a block by height or by hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Height(u64),
    Hash(BlockHash),
}

/// Block metadata as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: BlockHash,
    pub height: u64,
    /// Unix timestamp of the block header.
    pub time: i64,
}

/// Block attachment of a confirmed [`TxRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub hash: BlockHash,
    pub height: u64,
    pub time: i64,
}

// ─── Protocol messages ────────────────────────────────────────────────────────

/// SLP transaction type declared by the output-0 script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlpTxType {
    Genesis,
    Mint,
    Send,
}

impl std::fmt::Display for SlpTxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Genesis => write!(f, "GENESIS"),
            Self::Mint => write!(f, "MINT"),
            Self::Send => write!(f, "SEND"),
        }
    }
}

/// The structured message parsed from an SLP output script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlpMessage {
    pub transaction_type: SlpTxType,
    /// `None` for a GENESIS until it is assigned the transaction's own txid.
    pub token_id: Option<TokenId>,
    /// Token type / version byte.
    pub token_type: u16,
    /// Output amounts (SEND) or the minted quantity (GENESIS / MINT).
    #[serde(default)]
    pub amounts: Vec<u64>,
}

impl SlpMessage {
    pub fn is_genesis(&self) -> bool {
        self.transaction_type == SlpTxType::Genesis
    }
}

/// Outcome of validating one transaction against its token graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// The transaction is a valid member of the token graph.
    Valid(SlpMessage),
    /// The transaction is tagged but breaks the token rules.
    Invalid {
        details: Option<SlpMessage>,
        reason: String,
    },
    /// The transaction is not an SLP transaction at all.
    NotProtocol,
}

/// Validation result attached to a [`TxRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlpInfo {
    pub valid: bool,
    pub detail: Option<SlpMessage>,
    pub invalid_reason: Option<String>,
    pub schema_version: u32,
}

impl SlpInfo {
    pub fn from_validation(validation: Validation, schema_version: u32) -> Self {
        match validation {
            Validation::Valid(detail) => Self {
                valid: true,
                detail: Some(detail),
                invalid_reason: None,
                schema_version,
            },
            Validation::Invalid { details, reason } => Self {
                valid: false,
                detail: details,
                invalid_reason: Some(reason),
                schema_version,
            },
            Validation::NotProtocol => Self::invalid(None, "not an SLP transaction", schema_version),
        }
    }

    pub fn invalid(detail: Option<SlpMessage>, reason: impl Into<String>, schema_version: u32) -> Self {
        Self {
            valid: false,
            detail,
            invalid_reason: Some(reason.into()),
            schema_version,
        }
    }

    /// Token the record belongs to, when validation got far enough to know it.
    pub fn token_id(&self) -> Option<TokenId> {
        self.detail.as_ref().and_then(|d| d.token_id)
    }
}

// ─── Normalized transaction record ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    pub index: u32,
    pub prev_out: OutPoint,
    pub script_sig: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub index: u32,
    pub value: u64,
    pub script_pubkey: String,
}

/// The normalized, store-ready form of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub txid: Txid,
    pub inputs: Vec<InputRecord>,
    pub outputs: Vec<OutputRecord>,
    pub slp: Option<SlpInfo>,
    pub block: Option<BlockMeta>,
}

impl TxRecord {
    pub fn from_tx(tx: &Transaction) -> Self {
        Self {
            txid: tx.compute_txid(),
            inputs: tx
                .input
                .iter()
                .enumerate()
                .map(|(i, input)| InputRecord {
                    index: i as u32,
                    prev_out: input.previous_output,
                    script_sig: hex::encode(input.script_sig.as_bytes()),
                })
                .collect(),
            outputs: tx
                .output
                .iter()
                .enumerate()
                .map(|(i, output)| OutputRecord {
                    index: i as u32,
                    value: output.value.to_sat(),
                    script_pubkey: hex::encode(output.script_pubkey.as_bytes()),
                })
                .collect(),
            slp: None,
            block: None,
        }
    }

    pub fn token_id(&self) -> Option<TokenId> {
        self.slp.as_ref().and_then(SlpInfo::token_id)
    }
}

// ─── Mempool bookkeeping ──────────────────────────────────────────────────────

/// Current claimant of an outpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpentBy {
    pub txid: Txid,
    /// Containing block, `None` while unconfirmed.
    pub height: Option<u64>,
}

/// Observed conflict between two transactions spending the same outpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoubleSpendRecord {
    pub outpoint: OutPoint,
    pub original_txid: Txid,
    pub current_txid: Txid,
    pub detected_at: DateTime<Utc>,
}

/// Result of offering a transaction to the mempool manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MempoolAdmission {
    pub is_slp: bool,
    pub added: bool,
}

/// txid → raw transaction hex for transactions accepted by a mempool sync.
pub type MempoolSyncResult = IndexMap<Txid, String>;

// ─── Crawl results ────────────────────────────────────────────────────────────

/// Per-transaction output of a non-committing crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTxnInfo {
    pub record: TxRecord,
    pub tx_hex: String,
    pub token_id: TokenId,
}

/// Ordered crawl output for one block.
pub type CrawlResult = IndexMap<Txid, CrawlTxnInfo>;

/// Every (outpoint, spending txid) pair seen in a block.
pub type SpentOutpoints = Vec<(OutPoint, Txid)>;
