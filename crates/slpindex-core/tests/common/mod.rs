//! In-process node, store and token-graph doubles for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxMerkleNode, TxOut, Txid, Witness,
};
use indexmap::{IndexMap, IndexSet};

use slpindex_core::{
    BlockInfo, BlockRef, GraphLookup, MemoryCheckpointStore, MempoolSyncResult, Network,
    NodeTransport, SlpMessage, SlpParser, SlpTxType, StoreError, SyncConfig, SyncError, SyncStore,
    Synchronizer, TokenGraph, TokenGraphManager, TokenId, TxRecord, Validation,
};

// ─── Transactions ─────────────────────────────────────────────────────────────

pub fn funding(n: u8) -> OutPoint {
    OutPoint::new(Txid::from_byte_array([n; 32]), 0)
}

pub fn op(txid: Txid, vout: u32) -> OutPoint {
    OutPoint::new(txid, vout)
}

pub fn raw(tx: &Transaction) -> Vec<u8> {
    serialize(tx)
}

fn input(outpoint: OutPoint) -> TxIn {
    TxIn {
        previous_output: outpoint,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }
}

fn dust() -> TxOut {
    TxOut {
        value: Amount::from_sat(546),
        script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
    }
}

/// `OP_RETURN <"SLP\0"> <type> [<token id>]`
pub fn slp_script(kind: u8, token: Option<TokenId>) -> ScriptBuf {
    let mut script = vec![0x6a, 0x04, 0x53, 0x4c, 0x50, 0x00, kind];
    if let Some(token) = token {
        script.extend_from_slice(token.as_byte_array());
    }
    ScriptBuf::from_bytes(script)
}

fn build(inputs: &[OutPoint], output0: Option<ScriptBuf>) -> Transaction {
    let mut output = Vec::new();
    if let Some(script) = output0 {
        output.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: script,
        });
    }
    output.push(dust());
    output.push(dust());
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: inputs.iter().copied().map(input).collect(),
        output,
    }
}

pub fn genesis(funding: OutPoint) -> Transaction {
    build(&[funding], Some(slp_script(1, None)))
}

pub fn send(token: TokenId, spends: &[OutPoint]) -> Transaction {
    build(spends, Some(slp_script(3, Some(token))))
}

pub fn plain(spends: &[OutPoint]) -> Transaction {
    build(spends, None)
}

fn coinbase(height: u64, nonce: u32) -> Transaction {
    let mut tag = height.to_le_bytes().to_vec();
    tag.extend_from_slice(&nonce.to_le_bytes());
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(tag),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![dust()],
    }
}

// ─── Node ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct NodeState {
    blocks: BTreeMap<u64, Block>,
    mempool: IndexSet<Txid>,
    known: HashMap<Txid, Vec<u8>>,
    offline: bool,
    /// `block_hash` calls answered before the node starts failing them.
    block_hash_budget: Option<usize>,
    nonce: u32,
}

/// A node whose chain and mempool are scripted by the test.
pub struct MockNode {
    state: Mutex<NodeState>,
    pub raw_transaction_calls: AtomicUsize,
}

impl MockNode {
    /// A chain holding a single block at `base`.
    pub fn new(base: u64) -> Self {
        let node = Self {
            state: Mutex::new(NodeState::default()),
            raw_transaction_calls: AtomicUsize::new(0),
        };
        {
            let mut state = node.state.lock().unwrap();
            let block = make_block(BlockHash::all_zeros(), base, vec![], 0);
            state.blocks.insert(base, block);
        }
        node
    }

    pub fn tip(&self) -> u64 {
        *self.state.lock().unwrap().blocks.keys().last().unwrap()
    }

    pub fn hash_at(&self, height: u64) -> BlockHash {
        self.state.lock().unwrap().blocks[&height].block_hash()
    }

    /// Mine `txs` on top of the tip; they leave the mempool.
    pub fn mine(&self, txs: Vec<Transaction>) -> BlockHash {
        let mut state = self.state.lock().unwrap();
        let (&tip, tip_block) = state.blocks.iter().last().unwrap();
        let prev = tip_block.block_hash();
        state.nonce += 1;
        let nonce = state.nonce;
        for tx in &txs {
            let txid = tx.compute_txid();
            state.mempool.shift_remove(&txid);
            state.known.insert(txid, serialize(tx));
        }
        let block = make_block(prev, tip + 1, txs, nonce);
        let hash = block.block_hash();
        state.blocks.insert(tip + 1, block);
        hash
    }

    pub fn mine_empty(&self, count: usize) {
        for _ in 0..count {
            self.mine(vec![]);
        }
    }

    /// Replace the block at `height` (and drop everything above it).
    pub fn fork_at(&self, height: u64, txs: Vec<Transaction>) -> BlockHash {
        self.truncate_above(height - 1);
        self.mine(txs)
    }

    pub fn truncate_above(&self, height: u64) {
        let mut state = self.state.lock().unwrap();
        state.blocks.retain(|h, _| *h <= height);
    }

    pub fn broadcast(&self, tx: &Transaction) -> Txid {
        let txid = tx.compute_txid();
        let mut state = self.state.lock().unwrap();
        state.mempool.insert(txid);
        state.known.insert(txid, serialize(tx));
        txid
    }

    pub fn evict(&self, txid: &Txid) {
        self.state.lock().unwrap().mempool.shift_remove(txid);
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Answer `calls` more `block_hash` requests, then fail them until
    /// reset with `None`.
    pub fn fail_block_hash_after(&self, calls: Option<usize>) {
        self.state.lock().unwrap().block_hash_budget = calls;
    }

    fn check_online(&self) -> Result<(), SyncError> {
        if self.state.lock().unwrap().offline {
            return Err(SyncError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

fn make_block(prev: BlockHash, height: u64, txs: Vec<Transaction>, nonce: u32) -> Block {
    let mut txdata = vec![coinbase(height, nonce)];
    txdata.extend(txs);
    Block {
        header: Header {
            version: BlockVersion::ONE,
            prev_blockhash: prev,
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_600_000_000 + height as u32,
            bits: CompactTarget::from_consensus(0x207f_ffff),
            nonce,
        },
        txdata,
    }
}

#[async_trait]
impl NodeTransport for MockNode {
    async fn block_info(&self, block: BlockRef) -> Result<BlockInfo, SyncError> {
        self.check_online()?;
        let state = self.state.lock().unwrap();
        let found = match block {
            BlockRef::Height(h) => state.blocks.get(&h).map(|b| (h, b)),
            BlockRef::Hash(hash) => state
                .blocks
                .iter()
                .find(|(_, b)| b.block_hash() == hash)
                .map(|(h, b)| (*h, b)),
        };
        let (height, block) = found.ok_or_else(|| SyncError::Transport("block not found".into()))?;
        Ok(BlockInfo {
            hash: block.block_hash(),
            height,
            time: block.header.time as i64,
        })
    }

    async fn raw_block(&self, hash: &BlockHash) -> Result<Vec<u8>, SyncError> {
        self.check_online()?;
        let state = self.state.lock().unwrap();
        state
            .blocks
            .values()
            .find(|b| b.block_hash() == *hash)
            .map(serialize)
            .ok_or_else(|| SyncError::Transport("block not found".into()))
    }

    async fn raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, SyncError> {
        self.raw_transaction_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let state = self.state.lock().unwrap();
        state
            .known
            .get(txid)
            .cloned()
            .ok_or_else(|| SyncError::Transport(format!("no such transaction {txid}")))
    }

    async fn raw_mempool(&self) -> Result<Vec<Txid>, SyncError> {
        self.check_online()?;
        Ok(self.state.lock().unwrap().mempool.iter().copied().collect())
    }

    async fn block_hash(&self, height: u64) -> Result<Option<BlockHash>, SyncError> {
        self.check_online()?;
        let mut state = self.state.lock().unwrap();
        match state.block_hash_budget.as_mut() {
            Some(0) => return Err(SyncError::Transport("connection reset".into())),
            Some(left) => *left -= 1,
            None => {}
        }
        Ok(state.blocks.get(&height).map(Block::block_hash))
    }

    async fn block_count(&self) -> Result<u64, SyncError> {
        self.check_online()?;
        Ok(self.tip())
    }
}

// ─── Store ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockStore {
    pub unconfirmed: Mutex<IndexMap<Txid, TxRecord>>,
    pub confirmed: Mutex<IndexMap<Txid, (TxRecord, u64)>>,
    pub tokens_deleted: Mutex<Vec<TokenId>>,
    pub graphs_deleted: Mutex<Vec<TokenId>>,
    pub fail_inserts: AtomicBool,
}

impl MockStore {
    pub fn has_unconfirmed(&self, txid: &Txid) -> bool {
        self.unconfirmed.lock().unwrap().contains_key(txid)
    }

    pub fn confirmed_height(&self, txid: &Txid) -> Option<u64> {
        self.confirmed.lock().unwrap().get(txid).map(|(_, h)| *h)
    }

    pub fn confirmed_record(&self, txid: &Txid) -> Option<TxRecord> {
        self.confirmed.lock().unwrap().get(txid).map(|(r, _)| r.clone())
    }
}

#[async_trait]
impl SyncStore for MockStore {
    async fn unconfirmed_insert(&self, record: &TxRecord) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".into()));
        }
        let mut unconfirmed = self.unconfirmed.lock().unwrap();
        if unconfirmed.contains_key(&record.txid) {
            return Err(StoreError::DuplicateKey(record.txid.to_string()));
        }
        unconfirmed.insert(record.txid, record.clone());
        Ok(())
    }

    async fn unconfirmed_delete(&self, txids: &[Txid]) -> Result<(), StoreError> {
        let mut unconfirmed = self.unconfirmed.lock().unwrap();
        for txid in txids {
            unconfirmed.shift_remove(txid);
        }
        Ok(())
    }

    async fn unconfirmed_txids(&self) -> Result<Vec<Txid>, StoreError> {
        Ok(self.unconfirmed.lock().unwrap().keys().copied().collect())
    }

    async fn confirmed_replace(&self, records: Vec<TxRecord>, height: u64) -> Result<(), StoreError> {
        let mut confirmed = self.confirmed.lock().unwrap();
        for record in records {
            confirmed.insert(record.txid, (record, height));
        }
        Ok(())
    }

    async fn confirmed_delete(&self, txid: &Txid) -> Result<(), StoreError> {
        self.confirmed.lock().unwrap().shift_remove(txid);
        Ok(())
    }

    async fn confirmed_fetch_for_reorg(&self, height: u64) -> Result<Vec<TxRecord>, StoreError> {
        Ok(self
            .confirmed
            .lock()
            .unwrap()
            .values()
            .filter(|(_, h)| *h == height)
            .map(|(r, _)| r.clone())
            .collect())
    }

    async fn confirmed_delete_for_reorg(&self, height: u64) -> Result<(), StoreError> {
        self.confirmed.lock().unwrap().retain(|_, (_, h)| *h != height);
        Ok(())
    }

    async fn token_delete(&self, token_id: &TokenId) -> Result<(), StoreError> {
        self.tokens_deleted.lock().unwrap().push(*token_id);
        Ok(())
    }

    async fn graph_delete(&self, token_id: &TokenId) -> Result<(), StoreError> {
        self.graphs_deleted.lock().unwrap().push(*token_id);
        Ok(())
    }
}

// ─── Token graphs ─────────────────────────────────────────────────────────────

/// A graph where GENESIS is always valid and any other transaction is valid
/// once the graph holds at least one transaction.
pub struct MockGraph {
    token_id: TokenId,
    pub txs: Mutex<IndexSet<Txid>>,
    pub commits: AtomicUsize,
    pub burned: Mutex<Vec<(OutPoint, Txid, u64)>>,
    rejected: Arc<Mutex<HashSet<Txid>>>,
    validated: Arc<Mutex<Vec<Txid>>>,
}

impl MockGraph {
    fn message(&self, txid: &Txid) -> SlpMessage {
        SlpMessage {
            transaction_type: if *txid == self.token_id {
                SlpTxType::Genesis
            } else {
                SlpTxType::Send
            },
            token_id: Some(self.token_id),
            token_type: 1,
            amounts: vec![],
        }
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.txs.lock().unwrap().contains(txid)
    }
}

#[async_trait]
impl TokenGraph for MockGraph {
    fn token_id(&self) -> TokenId {
        self.token_id
    }

    async fn validate_transaction(&self, txid: &Txid) -> Result<Validation, SyncError> {
        self.validated.lock().unwrap().push(*txid);
        let message = self.message(txid);
        if self.rejected.lock().unwrap().contains(txid) {
            return Ok(Validation::Invalid {
                details: Some(message),
                reason: "rejected by test".into(),
            });
        }
        if *txid == self.token_id || !self.txs.lock().unwrap().is_empty() {
            Ok(Validation::Valid(message))
        } else {
            Ok(Validation::Invalid {
                details: Some(message),
                reason: "genesis is not in the graph".into(),
            })
        }
    }

    async fn add_transaction(
        &self,
        txid: &Txid,
        _height: Option<u64>,
        _block_hash: Option<BlockHash>,
    ) -> Result<(), SyncError> {
        self.txs.lock().unwrap().insert(*txid);
        Ok(())
    }

    async fn remove_transaction(&self, txid: &Txid) -> Result<(), SyncError> {
        self.txs.lock().unwrap().shift_remove(txid);
        Ok(())
    }

    async fn mark_output_burned(
        &self,
        outpoint: &OutPoint,
        spender: &Txid,
        height: u64,
    ) -> Result<bool, SyncError> {
        self.burned
            .lock()
            .unwrap()
            .push((*outpoint, *spender, height));
        Ok(true)
    }

    async fn commit(&self) -> Result<(), SyncError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn size(&self) -> usize {
        self.txs.lock().unwrap().len()
    }
}

#[derive(Default)]
pub struct MockGraphs {
    tokens: Mutex<HashMap<TokenId, Arc<MockGraph>>>,
    live: Mutex<HashMap<OutPoint, TokenId>>,
    pub rejected: Arc<Mutex<HashSet<Txid>>>,
    pub validated: Arc<Mutex<Vec<Txid>>>,
    pub double_spend_removals: Mutex<Vec<Txid>>,
    pub pruned: Mutex<Vec<u64>>,
    pub block_hooks: Mutex<Vec<BlockHash>>,
    pub tx_hooks: Mutex<Vec<MempoolSyncResult>>,
}

impl MockGraphs {
    pub fn graph(&self, token_id: &TokenId) -> Option<Arc<MockGraph>> {
        self.tokens.lock().unwrap().get(token_id).cloned()
    }

    pub fn has_token_graph(&self, token_id: &TokenId) -> bool {
        self.tokens.lock().unwrap().contains_key(token_id)
    }

    pub fn add_live_utxo(&self, outpoint: OutPoint, token_id: TokenId) {
        self.live.lock().unwrap().insert(outpoint, token_id);
    }

    pub fn is_live(&self, outpoint: &OutPoint) -> bool {
        self.live.lock().unwrap().contains_key(outpoint)
    }

    pub fn reject(&self, txid: Txid) {
        self.rejected.lock().unwrap().insert(txid);
    }

    pub fn validation_order(&self) -> Vec<Txid> {
        self.validated.lock().unwrap().clone()
    }
}

impl SlpParser for MockGraphs {
    fn parse_output_script(&self, script: &[u8]) -> Option<SlpMessage> {
        let rest = script.strip_prefix(&[0x6a, 0x04, 0x53, 0x4c, 0x50, 0x00][..])?;
        let (kind, rest) = rest.split_first()?;
        let (transaction_type, token_id) = match kind {
            1 => (SlpTxType::Genesis, None),
            2 | 3 => {
                let id: [u8; 32] = rest.get(..32)?.try_into().ok()?;
                let kind = if *kind == 2 { SlpTxType::Mint } else { SlpTxType::Send };
                (kind, Some(Txid::from_byte_array(id)))
            }
            _ => return None,
        };
        Some(SlpMessage {
            transaction_type,
            token_id,
            token_type: 1,
            amounts: vec![],
        })
    }
}

#[async_trait]
impl TokenGraphManager for MockGraphs {
    async fn token_graph(
        &self,
        lookup: GraphLookup<'_>,
    ) -> Result<Option<Arc<dyn TokenGraph>>, SyncError> {
        let mut tokens = self.tokens.lock().unwrap();
        if let Some(graph) = tokens.get(&lookup.token_id) {
            return Ok(Some(graph.clone() as Arc<dyn TokenGraph>));
        }
        if lookup.genesis.is_none() {
            return Ok(None);
        }
        let graph = Arc::new(MockGraph {
            token_id: lookup.token_id,
            txs: Mutex::new(IndexSet::new()),
            commits: AtomicUsize::new(0),
            burned: Mutex::new(vec![]),
            rejected: self.rejected.clone(),
            validated: self.validated.clone(),
        });
        tokens.insert(lookup.token_id, graph.clone());
        Ok(Some(graph as Arc<dyn TokenGraph>))
    }

    fn has_token(&self, token_id: &TokenId) -> bool {
        self.tokens.lock().unwrap().contains_key(token_id)
    }

    async fn remove_token(&self, token_id: &TokenId) -> Result<(), SyncError> {
        self.tokens.lock().unwrap().remove(token_id);
        Ok(())
    }

    async fn remove_double_spends(&self, txids: &HashSet<Txid>) -> Result<(), SyncError> {
        for graph in self.tokens.lock().unwrap().values() {
            graph.txs.lock().unwrap().retain(|t| !txids.contains(t));
        }
        self.double_spend_removals
            .lock()
            .unwrap()
            .extend(txids.iter().copied());
        Ok(())
    }

    fn take_live_utxo(&self, outpoint: &OutPoint) -> Option<TokenId> {
        self.live.lock().unwrap().remove(outpoint)
    }

    async fn prune_to_height(&self, height: u64) -> Vec<TokenId> {
        self.pruned.lock().unwrap().push(height);
        vec![]
    }

    async fn on_block_hash(&self, hash: &BlockHash) {
        self.block_hooks.lock().unwrap().push(*hash);
    }

    async fn on_transaction_hash(&self, result: &MempoolSyncResult) {
        self.tx_hooks.lock().unwrap().push(result.clone());
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub node: Arc<MockNode>,
    pub store: Arc<MockStore>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub graphs: Arc<MockGraphs>,
    pub sync: Synchronizer,
}

impl Harness {
    /// Regtest harness whose genesis floor is `floor`.
    pub fn new(floor: u64) -> Self {
        Self::with_config(
            SyncConfig::builder()
                .network(Network::Regtest)
                .floor(floor)
                .build(),
        )
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let node = Arc::new(MockNode::new(config.floor()));
        let store = Arc::new(MockStore::default());
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let graphs = Arc::new(MockGraphs::default());
        let sync = Synchronizer::builder()
            .config(config)
            .transport(node.clone())
            .store(store.clone())
            .checkpoint_store(checkpoints.clone())
            .graphs(graphs.clone())
            .build()
            .unwrap();
        Self {
            node,
            store,
            checkpoints,
            graphs,
            sync,
        }
    }
}
