//! Ingestion pipeline: validate incoming headers against the index, then
//! apply them in one step.
//!
//! [`ChainIndex::prepare_chain`] and friends only borrow the index and
//! return an [`Ingestion`] plan, or the first error. [`ChainIndex::commit`]
//! applies a plan and cannot fail. Anything that must happen between the
//! two (persisting the plan) can abort without touching the index.
use bitcoin::{BlockHash, Txid};
use tracing::{debug, info};

use crate::{
    chain::ChainIndex,
    error::ChainError,
    fork_choice::{Fork, ForkChoice},
    record::MerkleBlockRecord,
    store::ChangeSet,
};

/// Where a single header goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Caller-asserted height.
    Height(u32),
    /// One above its parent on the active chain (or at its anchor height).
    Tip,
}

/// One header accepted by an ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Block hash.
    pub hash: BlockHash,
    /// Active height; `None` only for a proof attached to a detached record.
    pub height: Option<u32>,
    /// Transactions matched by the block's proof.
    pub matched: Vec<Txid>,
}

/// Result of a committed ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Accepted headers in submission order.
    pub accepted: Vec<Accepted>,
    /// Headers taken off the active chain by a reorg.
    pub detached: Vec<BlockHash>,
    /// Tip after the commit.
    pub tip: Option<(u32, BlockHash)>,
}

/// A validated ingestion, ready to commit.
#[derive(Debug, Clone)]
pub struct Ingestion {
    entries: Vec<(MerkleBlockRecord, Vec<Txid>)>,
    detached: Vec<MerkleBlockRecord>,
}

impl Ingestion {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            detached: Vec::new(),
        }
    }

    /// Nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.detached.is_empty()
    }

    /// Whether committing detaches active headers.
    pub fn is_reorg(&self) -> bool {
        !self.detached.is_empty()
    }

    /// Rows a store must write to mirror this plan.
    pub fn changes(&self) -> ChangeSet {
        let mut records = self.detached.clone();
        let mut links = Vec::new();
        for (record, matched) in &self.entries {
            records.push(record.clone());
            links.extend(matched.iter().map(|txid| (*txid, record.hash())));
        }
        ChangeSet { records, links }
    }
}

impl ChainIndex {
    /// Validate one header.
    ///
    /// # Errors
    /// `ProofMismatch`, `OrphanHeader`, `CheckpointMismatch`, or
    /// `DuplicateConflict` when the fork is refused.
    pub fn prepare(
        &self,
        record: MerkleBlockRecord,
        placement: Placement,
        fork_choice: &dyn ForkChoice,
    ) -> Result<Ingestion, ChainError> {
        let height = match placement {
            Placement::Height(h) => h,
            Placement::Tip => self.tip_placement(&record)?,
        };
        self.prepare_chain(height, vec![record], fork_choice)
    }

    /// Validate a contiguous run; `records[i]` goes to `start_height + i`.
    ///
    /// Same result as preparing and committing each header in turn, except
    /// that nothing is applied unless every header passes. The fork choice
    /// sees the first conflicting header, exactly as it would one at a time.
    ///
    /// # Errors
    /// `ChainDiscontinuity` if `records[i].prev_hash() != records[i - 1].hash()`,
    /// `OrphanHeader` if the run does not fit below `u32::MAX` or does not
    /// link to an active anchor right above it, plus everything
    /// [`ChainIndex::prepare`] returns.
    pub fn prepare_chain(
        &self,
        start_height: u32,
        records: Vec<MerkleBlockRecord>,
        fork_choice: &dyn ForkChoice,
    ) -> Result<Ingestion, ChainError> {
        if records.is_empty() {
            return Ok(Ingestion::empty());
        }

        for (i, pair) in records.windows(2).enumerate() {
            if pair[1].prev_hash() != pair[0].hash() {
                return Err(ChainError::ChainDiscontinuity {
                    index: i + 1,
                    expected: pair[0].hash(),
                    found: pair[1].prev_hash(),
                });
            }
        }

        let fits = u32::try_from(records.len() - 1)
            .ok()
            .and_then(|n| start_height.checked_add(n))
            .is_some();
        if !fits {
            return Err(ChainError::OrphanHeader {
                hash: records[0].hash(),
                height: start_height,
                prev: records[0].prev_hash(),
            });
        }

        let mut entries = Vec::with_capacity(records.len());
        for (offset, incoming) in records.into_iter().enumerate() {
            let height = start_height + offset as u32;
            if let Some(expected) = self.config.anchor_at(height) {
                if expected != incoming.hash() {
                    return Err(ChainError::CheckpointMismatch {
                        height,
                        expected,
                        found: incoming.hash(),
                    });
                }
            }
            let (mut record, matched) = self.merge_verified(incoming)?;
            record.set_height(Some(height));
            entries.push((record, matched));
        }

        self.check_parent(&entries[0].0, start_height)?;

        let conflict = entries.iter().find_map(|(record, _)| {
            let height = record.height()?;
            match self.heights.get(&height) {
                Some(existing) if *existing != record.hash() => {
                    Some((height, *existing, record.hash()))
                }
                _ => None,
            }
        });

        let mut detached = Vec::new();
        if let Some((height, displaced, incoming)) = conflict {
            let fork = Fork {
                height,
                displaced,
                incoming,
                current_tip: self.tip_id().unwrap_or((height, displaced)),
            };
            if !fork_choice.accept(&fork) {
                return Err(ChainError::DuplicateConflict {
                    height,
                    existing: displaced,
                    incoming,
                });
            }
            for (_, hash) in self.heights.range(height..) {
                if entries.iter().any(|(r, _)| r.hash() == *hash) {
                    continue;
                }
                if let Some(record) = self.blocks.get(hash) {
                    let mut record = record.clone();
                    record.set_height(None);
                    detached.push(record);
                }
            }
        } else {
            let (last, _) = &entries[entries.len() - 1];
            self.check_child(last, start_height + (entries.len() - 1) as u32)?;
        }

        Ok(Ingestion { entries, detached })
    }

    /// Validate a proof for a header that is already indexed, keeping its
    /// placement. `Ok(None)` if the header is unknown.
    ///
    /// # Errors
    /// `ProofMismatch` if the new proof does not verify.
    pub fn prepare_update_tree(
        &self,
        record: MerkleBlockRecord,
    ) -> Result<Option<Ingestion>, ChainError> {
        let Some(height) = self.blocks.get(&record.hash()).map(MerkleBlockRecord::height) else {
            return Ok(None);
        };
        let (mut merged, matched) = self.merge_verified(record)?;
        merged.set_height(height);
        Ok(Some(Ingestion {
            entries: vec![(merged, matched)],
            detached: Vec::new(),
        }))
    }

    /// Apply a plan produced by this index.
    ///
    /// Plans must be committed in the order they were prepared, with no other
    /// mutation in between.
    pub fn commit(&mut self, plan: Ingestion) -> IngestOutcome {
        let mut detached = Vec::with_capacity(plan.detached.len());
        for record in plan.detached {
            let hash = record.hash();
            if let Some(h) = self.blocks.get(&hash).and_then(MerkleBlockRecord::height) {
                self.heights.remove(&h);
            }
            self.blocks.insert(hash, record);
            detached.push(hash);
        }
        if !detached.is_empty() {
            info!(count = detached.len(), "reorg detached headers");
        }

        let mut accepted = Vec::with_capacity(plan.entries.len());
        for (record, matched) in plan.entries {
            let hash = record.hash();
            let height = record.height();
            if let Some(h) = height {
                self.heights.insert(h, hash);
            }
            for txid in &matched {
                self.txs.link(*txid, hash);
            }
            debug!(%hash, ?height, matched = matched.len(), "accepted header");
            self.blocks.insert(hash, record);
            accepted.push(Accepted {
                hash,
                height,
                matched,
            });
        }

        IngestOutcome {
            accepted,
            detached,
            tip: self.tip_id(),
        }
    }

    /// Prepare and commit one header.
    pub fn ingest(
        &mut self,
        record: MerkleBlockRecord,
        placement: Placement,
        fork_choice: &dyn ForkChoice,
    ) -> Result<IngestOutcome, ChainError> {
        let plan = self.prepare(record, placement, fork_choice)?;
        Ok(self.commit(plan))
    }

    /// Prepare and commit a contiguous run, all or nothing.
    pub fn ingest_chain(
        &mut self,
        start_height: u32,
        records: Vec<MerkleBlockRecord>,
        fork_choice: &dyn ForkChoice,
    ) -> Result<IngestOutcome, ChainError> {
        let plan = self.prepare_chain(start_height, records, fork_choice)?;
        Ok(self.commit(plan))
    }

    /// Attach a proof to an indexed header. `Ok(None)` if it is unknown.
    pub fn update_tree(
        &mut self,
        record: MerkleBlockRecord,
    ) -> Result<Option<IngestOutcome>, ChainError> {
        Ok(self
            .prepare_update_tree(record)?
            .map(|plan| self.commit(plan)))
    }

    /// Verify `incoming` and fold it into any existing record of the same
    /// block. Returns the merged record and the matches of its final proof.
    fn merge_verified(
        &self,
        incoming: MerkleBlockRecord,
    ) -> Result<(MerkleBlockRecord, Vec<Txid>), ChainError> {
        let found = incoming.verify()?;
        match self.blocks.get(&incoming.hash()) {
            Some(existing) if !incoming.has_proof() => {
                let matched = existing.verify()?.matched;
                Ok((existing.clone(), matched))
            }
            Some(existing) => {
                let mut merged = existing.clone();
                merged.merge(incoming);
                Ok((merged, found.matched))
            }
            None => Ok((incoming, found.matched)),
        }
    }

    fn tip_placement(&self, record: &MerkleBlockRecord) -> Result<u32, ChainError> {
        let hash = record.hash();
        if let Some((h, _)) = self.config.anchors().find(|(_, b)| *b == hash) {
            return Ok(h);
        }
        if let Some(h) = self.blocks.get(&hash).and_then(MerkleBlockRecord::height) {
            return Ok(h);
        }
        if let Some(h) = self
            .blocks
            .get(&record.prev_hash())
            .and_then(MerkleBlockRecord::height)
            .and_then(|parent| parent.checked_add(1))
        {
            return Ok(h);
        }
        Err(ChainError::OrphanHeader {
            hash,
            height: self
                .tip_id()
                .map_or(self.config.start_height(), |(h, _)| h.saturating_add(1)),
            prev: record.prev_hash(),
        })
    }
}
