//! `slpindex probe`: compare the stored checkpoint with the node's chain.

use anyhow::Result;
use bitcoin::BlockHash;
use slpindex_core::{ChainSyncCheckpoint, CheckpointManager, NodeTransport};

#[derive(Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Nothing stored yet; a sync would start at the floor.
    Fresh { floor: u64, tip: u64 },
    InSync { height: u64 },
    Behind { checkpoint: u64, tip: u64 },
    /// The node no longer has the checkpointed block; a rollback is due.
    Diverged { height: u64 },
    /// Checkpoint above the node's tip (node resyncing or reorged shorter).
    AheadOfNode { checkpoint: u64, tip: u64 },
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fresh { floor, tip } => {
                write!(f, "no checkpoint; sync would crawl {floor}..={tip}")
            }
            Self::InSync { height } => write!(f, "in sync at {height}"),
            Self::Behind { checkpoint, tip } => {
                write!(f, "behind: checkpoint {checkpoint}, node tip {tip} ({} blocks)", tip - checkpoint)
            }
            Self::Diverged { height } => {
                write!(f, "reorg pending: node has a different block at {height}")
            }
            Self::AheadOfNode { checkpoint, tip } => {
                write!(f, "checkpoint {checkpoint} is above node tip {tip}")
            }
        }
    }
}

/// Decide where the index stands. `node_hash` is the node's block hash at
/// the checkpoint height.
pub fn classify(
    checkpoint: Option<&ChainSyncCheckpoint>,
    floor: u64,
    tip: u64,
    node_hash: Option<BlockHash>,
) -> ProbeOutcome {
    let Some(cp) = checkpoint else {
        return ProbeOutcome::Fresh { floor, tip };
    };
    if cp.height > tip {
        return ProbeOutcome::AheadOfNode { checkpoint: cp.height, tip };
    }
    if let (Some(stored), Some(live)) = (cp.hash, node_hash) {
        if stored != live {
            return ProbeOutcome::Diverged { height: cp.height };
        }
    }
    if cp.height == tip {
        ProbeOutcome::InSync { height: tip }
    } else {
        ProbeOutcome::Behind { checkpoint: cp.height, tip }
    }
}

pub async fn probe(checkpoints: &CheckpointManager, node: &dyn NodeTransport) -> Result<ProbeOutcome> {
    let checkpoint = checkpoints.load().await?;
    let tip = node.block_count().await?;
    let node_hash = match &checkpoint {
        Some(cp) if cp.height <= tip => node.block_hash(cp.height).await?,
        _ => None,
    };
    Ok(classify(checkpoint.as_ref(), checkpoints.floor(), tip, node_hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn hash(n: u8) -> BlockHash {
        BlockHash::from_byte_array([n; 32])
    }

    #[test]
    fn fresh_index() {
        assert_eq!(
            classify(None, 543_375, 650_000, None),
            ProbeOutcome::Fresh { floor: 543_375, tip: 650_000 }
        );
    }

    #[test]
    fn matching_hash() {
        let cp = ChainSyncCheckpoint::new(100, Some(hash(1)));
        assert_eq!(classify(Some(&cp), 0, 100, Some(hash(1))), ProbeOutcome::InSync { height: 100 });
        assert_eq!(
            classify(Some(&cp), 0, 104, Some(hash(1))),
            ProbeOutcome::Behind { checkpoint: 100, tip: 104 }
        );
    }

    #[test]
    fn replaced_block_is_a_divergence() {
        let cp = ChainSyncCheckpoint::new(100, Some(hash(1)));
        assert_eq!(classify(Some(&cp), 0, 101, Some(hash(2))), ProbeOutcome::Diverged { height: 100 });
    }

    #[test]
    fn hashless_checkpoint_cannot_diverge() {
        let cp = ChainSyncCheckpoint::new(90, None);
        assert_eq!(
            classify(Some(&cp), 90, 95, Some(hash(3))),
            ProbeOutcome::Behind { checkpoint: 90, tip: 95 }
        );
    }

    #[test]
    fn shorter_node_chain() {
        let cp = ChainSyncCheckpoint::new(100, Some(hash(1)));
        assert_eq!(
            classify(Some(&cp), 0, 97, None),
            ProbeOutcome::AheadOfNode { checkpoint: 100, tip: 97 }
        );
    }
}
