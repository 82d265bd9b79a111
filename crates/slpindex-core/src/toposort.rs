//! Dependency ordering of a batch of transactions.
//!
//! Iterative DFS post-order over the spends-from edges that stay inside the
//! batch. Roots are visited in batch order and parents in input order, so
//! the output is deterministic for a given batch.

use std::borrow::Borrow;
use std::collections::HashSet;

use bitcoin::{Transaction, Txid};
use indexmap::IndexMap;

use crate::error::SyncError;

/// Sort `batch` so that every transaction follows the same-batch parents it
/// spends from.
///
/// Yields to the runtime every `yield_every` visited transactions. Fails
/// with [`SyncError::TopologicalSort`] if the output does not contain every
/// member of the batch exactly once.
pub async fn topological_sort<T>(
    batch: &IndexMap<Txid, T>,
    yield_every: usize,
) -> Result<Vec<Txid>, SyncError>
where
    T: Borrow<Transaction>,
{
    let yield_every = yield_every.max(1);
    let mut visited: HashSet<Txid> = HashSet::with_capacity(batch.len());
    let mut sorted: Vec<Txid> = Vec::with_capacity(batch.len());
    // (txid, index of the next input to inspect)
    let mut stack: Vec<(Txid, usize)> = Vec::new();
    let mut since_yield = 0usize;

    for root in batch.keys() {
        if !visited.insert(*root) {
            continue;
        }
        stack.push((*root, 0));

        while let Some(&(txid, next_input)) = stack.last() {
            let Some(entry) = batch.get(&txid) else {
                stack.pop();
                continue;
            };
            let tx: &Transaction = entry.borrow();

            let mut cursor = next_input;
            let mut descend = None;
            while cursor < tx.input.len() {
                let parent = tx.input[cursor].previous_output.txid;
                cursor += 1;
                if batch.contains_key(&parent) && visited.insert(parent) {
                    descend = Some(parent);
                    break;
                }
            }
            if let Some(top) = stack.last_mut() {
                top.1 = cursor;
            }

            match descend {
                Some(parent) => stack.push((parent, 0)),
                None => {
                    sorted.push(txid);
                    stack.pop();

                    since_yield += 1;
                    if since_yield >= yield_every {
                        since_yield = 0;
                        tokio::task::yield_now().await;
                    }
                }
            }
        }
    }

    if sorted.len() != batch.len() {
        return Err(SyncError::TopologicalSort {
            expected: batch.len(),
            actual: sorted.len(),
        });
    }
    Ok(sorted)
}
