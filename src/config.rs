//! Chain configuration: trusted anchors and sync window size.
use std::collections::BTreeMap;

use bitcoin::{constants::genesis_block, BlockHash, Network};

/// Records per bulk request while catching up.
pub const DEFAULT_SYNC_BATCH: u32 = 2_000;

/// Trusted starting points of the header chain.
///
/// An anchor `(height, hash)` is accepted at its height without a parent.
/// The genesis header is the anchor at height 0; further checkpoints let a
/// wallet start mid-chain. Any other header offered at an anchored height
/// is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    anchors: BTreeMap<u32, BlockHash>,
    sync_batch: u32,
}

impl ChainConfig {
    /// Chain rooted at `genesis`.
    pub fn new(genesis: BlockHash) -> Self {
        Self {
            anchors: BTreeMap::from([(0, genesis)]),
            sync_batch: DEFAULT_SYNC_BATCH,
        }
    }

    /// Chain rooted at the genesis block of `network`.
    pub fn for_network(network: Network) -> Self {
        Self::new(genesis_block(network).block_hash())
    }

    /// Add checkpoints `(height, block_hash)`. A checkpoint at height 0
    /// replaces the genesis anchor.
    pub fn with_checkpoints(mut self, v: Vec<(u32, BlockHash)>) -> Self {
        self.anchors.extend(v);
        self
    }

    /// Set how many records `sync_to_tip` requests at once (minimum 1).
    pub fn with_sync_batch(mut self, n: u32) -> Self {
        self.sync_batch = n.max(1);
        self
    }

    /// Trusted hash at `height`, if any.
    pub fn anchor_at(&self, height: u32) -> Option<BlockHash> {
        self.anchors.get(&height).copied()
    }

    /// Lowest anchored height: where an empty chain starts.
    pub fn start_height(&self) -> u32 {
        self.anchors.keys().next().copied().unwrap_or(0)
    }

    /// Genesis anchor.
    pub fn genesis(&self) -> Option<BlockHash> {
        self.anchor_at(0)
    }

    /// All anchors in height order.
    pub fn anchors(&self) -> impl Iterator<Item = (u32, BlockHash)> + '_ {
        self.anchors.iter().map(|(h, b)| (*h, *b))
    }

    /// Records per bulk request.
    pub fn sync_batch(&self) -> u32 {
        self.sync_batch
    }
}
