//! Ingestion worker tests.

mod common;

use common::{funding, genesis, raw, Harness};
use slpindex_core::{EventQueue, Network, SyncConfig, SyncState};

#[tokio::test]
async fn notifications_are_processed_in_order() {
    let h = Harness::new(100);
    let g = genesis(funding(1));
    let token = g.compute_txid();
    h.node.broadcast(&g);
    let hash = h.node.mine(vec![]);

    let (queue, worker) = EventQueue::spawn(h.sync);
    assert!(queue.on_raw_transaction(raw(&g)));
    assert!(queue.on_block_hash(hash));
    drop(queue);

    let sync = worker.await.unwrap();
    let status = sync.status().borrow().clone();
    assert_eq!(status.state, SyncState::ExitedNormal);
    assert_eq!(status.processed_height, Some(101));
    assert!(status.last_incoming_block.is_some());
    assert!(status.last_incoming_txn.is_some());
    assert!(status.last_outgoing_txn.is_some());

    assert!(h.store.has_unconfirmed(&token));
    assert_eq!(h.graphs.block_hooks.lock().unwrap().clone(), vec![hash]);
}

#[tokio::test]
async fn fatal_error_stops_the_worker() {
    let config = SyncConfig::builder()
        .network(Network::Regtest)
        .floor(90)
        .max_rollback(1)
        .build();
    let mut h = Harness::with_config(config);
    h.node.mine_empty(5);
    h.sync.sync_blocks(None).await.unwrap();
    h.node.fork_at(92, vec![]);
    let tip = {
        h.node.mine_empty(3);
        h.node.hash_at(95)
    };

    let (queue, worker) = EventQueue::spawn(h.sync);
    assert!(queue.on_block_hash(tip));

    let sync = worker.await.unwrap();
    let status = sync.status().borrow().clone();
    assert_eq!(status.state, SyncState::ExitedOnError);
    assert_eq!(status.past_errors.len(), 1);
    assert!(!queue.on_block_hash(tip));
}

#[tokio::test]
async fn transient_failures_keep_the_worker_alive() {
    let h = Harness::new(100);
    let hash = h.node.mine(vec![]);
    h.node.set_offline(true);

    let (queue, worker) = EventQueue::spawn(h.sync);
    assert!(queue.on_block_hash(hash));
    let g = genesis(funding(1));
    assert!(queue.on_raw_transaction(raw(&g)));
    drop(queue);

    let sync = worker.await.unwrap();
    let status = sync.status().borrow().clone();
    assert_eq!(status.state, SyncState::ExitedNormal);
    assert!(status.past_errors.is_empty());
    assert_eq!(status.processed_height, None);
}
