//! Protocol filter: decides whether raw transaction bytes carry an SLP
//! message and, if so, extracts it.
//!
//! The filter is a pure decision: every negative outcome is `None`, never an
//! error. Callers decide whether a rejection is worth logging.

use std::borrow::Borrow;

use bitcoin::consensus::encode::deserialize;
use bitcoin::{Transaction, Txid};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::graph::SlpParser;
use crate::types::{SlpMessage, TokenId};

/// `"SLP\0"`, the lokad id pushed in output 0 of every SLP transaction.
pub const SLP_MARKER: [u8; 4] = [0x53, 0x4c, 0x50, 0x00];

// ─── Token filter ─────────────────────────────────────────────────────────────

/// A single allow / deny rule keyed by token id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TokenFilterRule {
    IncludeSingle { token_id: TokenId },
    ExcludeSingle { token_id: TokenId },
}

/// Evaluates the configured token filter rules.
///
/// With no include rules every token passes unless excluded. With at least
/// one include rule, only included tokens pass.
#[derive(Debug, Clone, Default)]
pub struct TokenFilter {
    rules: Vec<TokenFilterRule>,
}

impl TokenFilter {
    pub fn new(rules: Vec<TokenFilterRule>) -> Self {
        Self { rules }
    }

    pub fn passes_all(&self, token_id: &TokenId) -> bool {
        let mut has_include = false;
        let mut included = false;
        for rule in &self.rules {
            match rule {
                TokenFilterRule::IncludeSingle { token_id: id } => {
                    has_include = true;
                    included |= id == token_id;
                }
                TokenFilterRule::ExcludeSingle { token_id: id } if id == token_id => {
                    return false;
                }
                TokenFilterRule::ExcludeSingle { .. } => {}
            }
        }
        !has_include || included
    }
}

// ─── Protocol filter ──────────────────────────────────────────────────────────

/// A transaction that passed the protocol filter.
#[derive(Debug, Clone)]
pub struct FilteredTx {
    pub txid: Txid,
    pub tx: Transaction,
    pub raw: Vec<u8>,
    /// Parsed output-0 message; GENESIS messages carry their own txid.
    pub message: SlpMessage,
}

impl FilteredTx {
    pub fn token_id(&self) -> Option<TokenId> {
        self.message.token_id
    }
}

impl Borrow<Transaction> for FilteredTx {
    fn borrow(&self) -> &Transaction {
        &self.tx
    }
}

/// Returns `true` if `raw` contains the SLP marker anywhere.
pub fn has_slp_marker(raw: &[u8]) -> bool {
    raw.windows(SLP_MARKER.len()).any(|w| w == SLP_MARKER)
}

#[derive(Debug, Clone, Default)]
pub struct ProtocolFilter {
    tokens: TokenFilter,
}

impl ProtocolFilter {
    pub fn new(tokens: TokenFilter) -> Self {
        Self { tokens }
    }

    /// Run the filter over raw transaction bytes.
    pub fn apply<P: SlpParser + ?Sized>(&self, raw: &[u8], parser: &P) -> Option<FilteredTx> {
        if !has_slp_marker(raw) {
            return None;
        }

        let tx: Transaction = match deserialize(raw) {
            Ok(tx) => tx,
            Err(e) => {
                debug!(error = %e, "marker present but transaction did not decode");
                return None;
            }
        };
        let txid = tx.compute_txid();

        let script = tx.output.first()?.script_pubkey.as_bytes();
        let mut message = parser.parse_output_script(script)?;
        if message.is_genesis() {
            message.token_id = Some(txid);
        }

        if let Some(token_id) = message.token_id {
            if !self.tokens.passes_all(&token_id) {
                info!(%txid, %token_id, "transaction excluded by token filter");
                return None;
            }
        }

        Some(FilteredTx {
            txid,
            tx,
            raw: raw.to_vec(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SlpTxType;
    use bitcoin::absolute::LockTime;
    use bitcoin::consensus::encode::serialize;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness};

    /// Parser that reads `SLP\0 <type byte> <token id: 32 bytes>`.
    struct TestParser;

    impl SlpParser for TestParser {
        fn parse_output_script(&self, script: &[u8]) -> Option<SlpMessage> {
            let pos = script.windows(4).position(|w| w == SLP_MARKER)?;
            let rest = &script[pos + 4..];
            let kind = match rest.first()? {
                1 => SlpTxType::Genesis,
                2 => SlpTxType::Mint,
                3 => SlpTxType::Send,
                _ => return None,
            };
            let token_id = match kind {
                SlpTxType::Genesis => None,
                _ => Some(Txid::from_slice(rest.get(1..33)?).ok()?),
            };
            Some(SlpMessage {
                transaction_type: kind,
                token_id,
                token_type: 1,
                amounts: vec![],
            })
        }
    }

    fn tx_with_script(script: Vec<u8>) -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([9; 32]), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::ZERO,
                script_pubkey: ScriptBuf::from_bytes(script),
            }],
        }
    }

    fn slp_script(kind: u8, token: Option<[u8; 32]>) -> Vec<u8> {
        let mut s = vec![0x6a, 0x04];
        s.extend_from_slice(&SLP_MARKER);
        s.push(kind);
        if let Some(t) = token {
            s.extend_from_slice(&t);
        }
        s
    }

    #[test]
    fn no_marker_is_rejected() {
        let tx = tx_with_script(vec![0x6a, 0x01, 0x00]);
        let raw = serialize(&tx);
        assert!(ProtocolFilter::default().apply(&raw, &TestParser).is_none());
    }

    #[test]
    fn undecodable_bytes_are_rejected() {
        let raw = [0x01, 0x53, 0x4c, 0x50, 0x00, 0xff];
        assert!(ProtocolFilter::default().apply(&raw, &TestParser).is_none());
    }

    #[test]
    fn genesis_gets_own_txid() {
        let tx = tx_with_script(slp_script(1, None));
        let raw = serialize(&tx);
        let filtered = ProtocolFilter::default().apply(&raw, &TestParser).unwrap();
        assert_eq!(filtered.txid, tx.compute_txid());
        assert_eq!(filtered.token_id(), Some(tx.compute_txid()));
    }

    #[test]
    fn unparsable_script_is_rejected() {
        let tx = tx_with_script(slp_script(7, None));
        let raw = serialize(&tx);
        assert!(ProtocolFilter::default().apply(&raw, &TestParser).is_none());
    }

    #[test]
    fn token_filter_rules() {
        let a = Txid::from_byte_array([1; 32]);
        let b = Txid::from_byte_array([2; 32]);

        let open = TokenFilter::default();
        assert!(open.passes_all(&a));

        let deny = TokenFilter::new(vec![TokenFilterRule::ExcludeSingle { token_id: a }]);
        assert!(!deny.passes_all(&a));
        assert!(deny.passes_all(&b));

        let allow = TokenFilter::new(vec![TokenFilterRule::IncludeSingle { token_id: a }]);
        assert!(allow.passes_all(&a));
        assert!(!allow.passes_all(&b));
    }

    #[test]
    fn excluded_token_is_rejected() {
        let token = [5u8; 32];
        let tx = tx_with_script(slp_script(3, Some(token)));
        let raw = serialize(&tx);
        let filter = ProtocolFilter::new(TokenFilter::new(vec![TokenFilterRule::ExcludeSingle {
            token_id: Txid::from_byte_array(token),
        }]));
        assert!(filter.apply(&raw, &TestParser).is_none());
        assert!(ProtocolFilter::default().apply(&raw, &TestParser).is_some());
    }
}
