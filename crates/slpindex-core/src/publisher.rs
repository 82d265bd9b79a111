//! Outward event channel for accepted blocks and transactions.

use bitcoin::{BlockHash, Txid};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Event emitted after the synchronizer accepted new chain data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    BlockAccepted { height: u64, hash: BlockHash },
    /// An SLP transaction entered the unconfirmed store.
    TransactionAccepted { txid: Txid, hex: String },
}

/// Broadcast publisher; every subscriber receives every event sent after it
/// subscribed.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SyncEvent) {
        // no subscribers is not an error
        if self.tx.send(event).is_err() {
            trace!("sync event dropped, no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    #[tokio::test]
    async fn subscriber_receives_events() {
        let publisher = EventPublisher::new(8);
        publisher.publish(SyncEvent::BlockAccepted {
            height: 1,
            hash: BlockHash::all_zeros(),
        });

        let mut rx = publisher.subscribe();
        let txid = Txid::from_byte_array([3; 32]);
        publisher.publish(SyncEvent::TransactionAccepted {
            txid,
            hex: "00".into(),
        });
        match rx.recv().await.unwrap() {
            SyncEvent::TransactionAccepted { txid: got, .. } => assert_eq!(got, txid),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
