//! In-memory header chain: records owned by hash, active chain viewed by height.
use std::collections::{BTreeMap, HashMap};

use bitcoin::{BlockHash, Txid};

use crate::{config::ChainConfig, error::ChainError, record::MerkleBlockRecord, tx_index::TxBlockIndex};

/// Owns every [`MerkleBlockRecord`].
///
/// `blocks` holds all records, active or detached. `heights` is the active
/// chain only and stores hashes, never copies of records. A record's
/// `height()` is `Some(h)` exactly when `heights[h]` is its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainIndex {
    pub(crate) config: ChainConfig,
    pub(crate) blocks: HashMap<BlockHash, MerkleBlockRecord>,
    pub(crate) heights: BTreeMap<u32, BlockHash>,
    pub(crate) txs: TxBlockIndex,
}

impl ChainIndex {
    /// Empty chain.
    pub fn new(config: ChainConfig) -> Self {
        Self {
            config,
            blocks: HashMap::new(),
            heights: BTreeMap::new(),
            txs: TxBlockIndex::default(),
        }
    }

    /// Rebuild from persisted records and transaction links.
    ///
    /// # Errors
    /// Fails if two records claim one height, if the restored active chain
    /// breaks the linkage invariant, or if a link names an unknown block.
    pub fn restore(
        config: ChainConfig,
        records: Vec<MerkleBlockRecord>,
        links: Vec<(Txid, BlockHash)>,
    ) -> Result<Self, ChainError> {
        let mut index = Self::new(config);
        for record in records {
            if let Some(h) = record.height() {
                if let Some(existing) = index.heights.insert(h, record.hash()) {
                    return Err(ChainError::DuplicateConflict {
                        height: h,
                        existing,
                        incoming: record.hash(),
                    });
                }
            }
            index.blocks.insert(record.hash(), record);
        }
        for (txid, block) in links {
            if !index.blocks.contains_key(&block) {
                return Err(ChainError::UnknownBlock(block));
            }
            index.txs.link(txid, block);
        }
        index.check_linkage()?;
        Ok(index)
    }

    /// Configuration this index was built with.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Highest active record.
    pub fn tip(&self) -> Option<&MerkleBlockRecord> {
        self.heights
            .values()
            .next_back()
            .and_then(|hash| self.blocks.get(hash))
    }

    /// `(height, hash)` of the tip.
    pub fn tip_id(&self) -> Option<(u32, BlockHash)> {
        self.heights.iter().next_back().map(|(h, b)| (*h, *b))
    }

    /// Record by hash, active or detached.
    pub fn get(&self, hash: &BlockHash) -> Option<&MerkleBlockRecord> {
        self.blocks.get(hash)
    }

    /// Active record at `height`.
    pub fn at_height(&self, height: u32) -> Option<&MerkleBlockRecord> {
        self.heights.get(&height).and_then(|hash| self.blocks.get(hash))
    }

    /// Whether `hash` is on the active chain.
    pub fn is_active(&self, hash: &BlockHash) -> bool {
        self.blocks
            .get(hash)
            .and_then(MerkleBlockRecord::height)
            .is_some()
    }

    /// Active block containing `txid`, if any.
    pub fn block_for_transaction(&self, txid: &Txid) -> Option<&MerkleBlockRecord> {
        self.txs
            .blocks_for(txid)
            .filter_map(|hash| self.blocks.get(hash))
            .find(|record| record.height().is_some())
    }

    /// Confirmations of `txid`: `tip - height + 1`, or 0 if not in an active block.
    pub fn confirmations(&self, txid: &Txid) -> u32 {
        match (self.block_for_transaction(txid).and_then(MerkleBlockRecord::height), self.tip_id()) {
            (Some(h), Some((tip, _))) => (tip - h).saturating_add(1),
            _ => 0,
        }
    }

    /// Transaction-block association.
    pub fn transactions(&self) -> &TxBlockIndex {
        &self.txs
    }

    /// Active records from `from` upward, in height order.
    pub fn active_from(&self, from: u32) -> impl Iterator<Item = &MerkleBlockRecord> + '_ {
        self.heights
            .range(from..)
            .filter_map(|(_, hash)| self.blocks.get(hash))
    }

    /// Records not on the active chain.
    pub fn detached(&self) -> impl Iterator<Item = &MerkleBlockRecord> + '_ {
        self.blocks.values().filter(|r| r.height().is_none())
    }

    /// All records, active and detached.
    pub fn records(&self) -> impl Iterator<Item = &MerkleBlockRecord> + '_ {
        self.blocks.values()
    }

    /// Number of records held, active and detached.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when no record is held.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Delete detached records and their transaction links.
    ///
    /// Returns the removed hashes.
    pub fn prune_detached(&mut self) -> Vec<BlockHash> {
        let gone: Vec<BlockHash> = self.detached().map(MerkleBlockRecord::hash).collect();
        for hash in &gone {
            self.blocks.remove(hash);
            self.txs.unlink_block(hash);
        }
        gone
    }

    /// Check that every active record links to the active record one height
    /// below, or is the anchor at its height with nothing active below it.
    pub fn check_linkage(&self) -> Result<(), ChainError> {
        for (height, hash) in &self.heights {
            let record = self.blocks.get(hash).ok_or(ChainError::UnknownBlock(*hash))?;
            if record.height() != Some(*height) {
                return Err(ChainError::UnknownBlock(*hash));
            }
            self.check_parent(record, *height)?;
        }
        Ok(())
    }

    /// Linkage rule for one record placed at `height`, against the active
    /// chain below it. An anchor only skips the parent check when nothing is
    /// active one height below.
    pub(crate) fn check_parent(
        &self,
        record: &MerkleBlockRecord,
        height: u32,
    ) -> Result<(), ChainError> {
        let anchor = self.config.anchor_at(height);
        if let Some(expected) = anchor {
            if expected != record.hash() {
                return Err(ChainError::CheckpointMismatch {
                    height,
                    expected,
                    found: record.hash(),
                });
            }
        }
        let linked = match height.checked_sub(1).and_then(|below| self.heights.get(&below)) {
            Some(parent) => *parent == record.prev_hash(),
            None => anchor.is_some(),
        };
        if linked {
            Ok(())
        } else {
            Err(ChainError::OrphanHeader {
                hash: record.hash(),
                height,
                prev: record.prev_hash(),
            })
        }
    }

    /// Linkage rule for the active record one height above a record placed
    /// at `height`. Only an anchor starts a segment, so that child is an
    /// anchor and must name `record` as its parent.
    pub(crate) fn check_child(
        &self,
        record: &MerkleBlockRecord,
        height: u32,
    ) -> Result<(), ChainError> {
        let Some(above) = height.checked_add(1) else {
            return Ok(());
        };
        match self.at_height(above) {
            Some(child) if child.prev_hash() != record.hash() => Err(ChainError::OrphanHeader {
                hash: child.hash(),
                height: above,
                prev: child.prev_hash(),
            }),
            _ => Ok(()),
        }
    }
}
