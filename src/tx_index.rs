//! Which blocks matched which transactions.
use std::collections::{BTreeSet, HashMap};

use bitcoin::{BlockHash, Txid};

/// `txid -> {block hashes}` association.
///
/// Normally one block per txid; several while a reorg leaves the same
/// transaction matched in a detached block and its replacement.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TxBlockIndex {
    links: HashMap<Txid, BTreeSet<BlockHash>>,
}

impl TxBlockIndex {
    /// Record that `block` matched `txid`. Returns false if already known.
    pub fn link(&mut self, txid: Txid, block: BlockHash) -> bool {
        self.links.entry(txid).or_default().insert(block)
    }

    /// Blocks that matched `txid`, in hash order.
    pub fn blocks_for(&self, txid: &Txid) -> impl Iterator<Item = &BlockHash> + '_ {
        self.links.get(txid).into_iter().flatten()
    }

    /// Drop every link to `block`.
    pub fn unlink_block(&mut self, block: &BlockHash) {
        self.links.retain(|_, blocks| {
            blocks.remove(block);
            !blocks.is_empty()
        });
    }

    /// All `(txid, block)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Txid, BlockHash)> + '_ {
        self.links
            .iter()
            .flat_map(|(txid, blocks)| blocks.iter().map(move |b| (*txid, *b)))
    }

    /// Number of distinct transactions tracked.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
