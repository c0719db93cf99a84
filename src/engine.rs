//! Single-writer front end over the chain index:
//! 1) validate incoming headers and proofs against the index,
//! 2) persist the resulting change set,
//! 3) commit it to the index and notify the wallet.
use std::sync::Arc;

use anyhow::Context;
use bitcoin::{BlockHash, Txid};
use tokio::{
    sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard},
    task,
};
use tracing::{info, warn};

use crate::{
    chain::ChainIndex,
    config::ChainConfig,
    fork_choice::{ForkChoice, RejectForks},
    hooks::ChainHooks,
    ingest::{IngestOutcome, Ingestion, Placement},
    record::MerkleBlockRecord,
    source::BlockSource,
    store::Store,
};

/// Header chain engine. `S` = store, `W` = wallet hooks.
///
/// Writers queue on the index lock, so one ingestion is validated,
/// persisted and committed before the next starts. Readers never observe a
/// half-applied batch.
///
/// Once a validated change set is handed to the store, persisting and
/// committing it finish on their own task: dropping an `ingest*` or
/// `update_tree` future after that point still leaves store and index in
/// step, though hooks for that ingestion are not called.
pub struct MerkleChain<S, W> {
    index: Arc<RwLock<ChainIndex>>,
    store: Arc<S>,
    hooks: W,
    fork_choice: Box<dyn ForkChoice>,
}

impl<S, W> MerkleChain<S, W>
where
    S: Store + 'static,
    W: ChainHooks + 'static,
{
    /// Load the persisted chain from `store` and rebuild the index.
    ///
    /// # Errors
    /// Store failures, or persisted state that breaks the linkage invariant.
    pub async fn open(config: ChainConfig, store: S, hooks: W) -> anyhow::Result<Self> {
        let records = store.load_records().await.context("load merkle block records")?;
        let links = store.load_tx_links().await.context("load tx links")?;
        let index = ChainIndex::restore(config, records, links).context("restore chain index")?;
        info!(records = index.len(), tip = ?index.tip_id(), "chain index restored");
        Ok(Self {
            index: Arc::new(RwLock::new(index)),
            store: Arc::new(store),
            hooks,
            fork_choice: Box::new(RejectForks),
        })
    }

    /// Replace the reorg policy (default [`RejectForks`]).
    pub fn with_fork_choice(mut self, policy: impl ForkChoice + 'static) -> Self {
        self.fork_choice = Box::new(policy);
        self
    }

    /// Ingest one header, with or without a partial merkle tree.
    ///
    /// # Errors
    /// A [`ChainError`](crate::ChainError) (recover it with
    /// `downcast_ref`) when the header is rejected, in which case nothing
    /// changed; a store or hook error otherwise.
    pub async fn ingest(
        &self,
        record: MerkleBlockRecord,
        placement: Placement,
    ) -> anyhow::Result<IngestOutcome> {
        let hash = record.hash();
        let outcome = {
            let index = Arc::clone(&self.index).write_owned().await;
            let plan = index
                .prepare(record, placement, self.fork_choice.as_ref())
                .inspect_err(|e| warn!(%hash, error = %e, "rejected header"))?;
            self.persist_and_commit(index, plan).await?
        };
        self.notify(&outcome).await?;
        Ok(outcome)
    }

    /// Ingest a contiguous run starting at `start_height`, all or nothing.
    ///
    /// Yields the same index state as ingesting each record in order, with
    /// a single store write.
    pub async fn ingest_chain(
        &self,
        start_height: u32,
        records: Vec<MerkleBlockRecord>,
    ) -> anyhow::Result<IngestOutcome> {
        let count = records.len();
        let outcome = {
            let index = Arc::clone(&self.index).write_owned().await;
            let plan = index
                .prepare_chain(start_height, records, self.fork_choice.as_ref())
                .inspect_err(|e| warn!(start_height, count, error = %e, "rejected batch"))?;
            self.persist_and_commit(index, plan).await?
        };
        info!(start_height, count, tip = ?outcome.tip, "batch committed");
        self.notify(&outcome).await?;
        Ok(outcome)
    }

    /// Attach a proof to an already indexed header. `Ok(None)` if unknown.
    pub async fn update_tree(
        &self,
        record: MerkleBlockRecord,
    ) -> anyhow::Result<Option<IngestOutcome>> {
        let outcome = {
            let index = Arc::clone(&self.index).write_owned().await;
            let Some(plan) = index.prepare_update_tree(record)? else {
                return Ok(None);
            };
            self.persist_and_commit(index, plan).await?
        };
        self.notify(&outcome).await?;
        Ok(Some(outcome))
    }

    /// Delete detached records from the store and the index.
    pub async fn prune_detached(&self) -> anyhow::Result<Vec<BlockHash>> {
        let mut index = self.index.write().await;
        let gone: Vec<BlockHash> = index.detached().map(MerkleBlockRecord::hash).collect();
        if gone.is_empty() {
            return Ok(gone);
        }
        self.store
            .remove_records(&gone)
            .await
            .context("remove detached records")?;
        index.prune_detached();
        info!(count = gone.len(), "pruned detached headers");
        Ok(gone)
    }

    /// Pull runs from `source` until the local tip reaches the source's tip.
    ///
    /// Returns the local tip height afterwards.
    ///
    /// # Errors
    /// Source failures, an empty or oversized run, or any rejection of a run.
    pub async fn sync_to_tip<F>(&self, source: &F) -> anyhow::Result<Option<u32>>
    where
        F: BlockSource + ?Sized,
    {
        let remote_tip = source.tip_height().await.context("source tip_height")?;
        let (mut next, batch) = {
            let index = self.index.read().await;
            // `None` once the local tip sits at u32::MAX
            let next = match index.tip_id() {
                Some((h, _)) => h.checked_add(1),
                None => Some(index.config().start_height()),
            };
            (next, index.config().sync_batch())
        };

        while let Some(start) = next.filter(|n| *n <= remote_tip) {
            let stop = start.saturating_add(batch - 1).min(remote_tip);
            let records = source
                .get_blocks(start, stop)
                .await
                .with_context(|| format!("get_blocks(start={start}, stop={stop})"))?;
            let wanted = (stop - start) as usize + 1;
            if records.is_empty() || records.len() > wanted {
                anyhow::bail!(
                    "source returned {} records for {start}..={stop}",
                    records.len()
                );
            }
            let got = records.len() as u32;
            self.ingest_chain(start, records)
                .await
                .with_context(|| format!("apply blocks @{start}"))?;
            next = start.checked_add(got);
        }

        Ok(self.index.read().await.tip_id().map(|(h, _)| h))
    }

    /// Current tip `(height, hash)`.
    pub async fn tip(&self) -> Option<(u32, BlockHash)> {
        self.index.read().await.tip_id()
    }

    /// Record by hash, active or detached.
    pub async fn header_by_hash(&self, hash: &BlockHash) -> Option<MerkleBlockRecord> {
        self.index.read().await.get(hash).cloned()
    }

    /// Active record at `height`.
    pub async fn header_by_height(&self, height: u32) -> Option<MerkleBlockRecord> {
        self.index.read().await.at_height(height).cloned()
    }

    /// Active block whose proof matched `txid`.
    pub async fn block_for_transaction(&self, txid: &Txid) -> Option<MerkleBlockRecord> {
        self.index.read().await.block_for_transaction(txid).cloned()
    }

    /// Confirmation count of `txid` (0 if not in an active block).
    pub async fn confirmations(&self, txid: &Txid) -> u32 {
        self.index.read().await.confirmations(txid)
    }

    /// Consistent read view; holds off writers while alive.
    pub async fn snapshot(&self) -> RwLockReadGuard<'_, ChainIndex> {
        self.index.read().await
    }

    /// Write `plan` to the store, then commit it under the held write lock.
    /// Runs as its own task so the pair completes even if the caller is dropped.
    async fn persist_and_commit(
        &self,
        mut index: OwnedRwLockWriteGuard<ChainIndex>,
        plan: Ingestion,
    ) -> anyhow::Result<IngestOutcome> {
        if plan.is_empty() {
            return Ok(IngestOutcome {
                tip: index.tip_id(),
                ..IngestOutcome::default()
            });
        }
        let store = Arc::clone(&self.store);
        task::spawn(async move {
            store
                .write_changes(&plan.changes())
                .await
                .context("persist ingestion")?;
            Ok::<_, anyhow::Error>(index.commit(plan))
        })
        .await
        .context("ingestion task")?
    }

    async fn notify(&self, outcome: &IngestOutcome) -> anyhow::Result<()> {
        if !outcome.detached.is_empty() {
            self.hooks
                .on_blocks_detached(&outcome.detached)
                .await
                .context("on_blocks_detached")?;
        }
        for accepted in &outcome.accepted {
            let Some(height) = accepted.height else {
                continue;
            };
            self.hooks
                .on_block_accepted(height, accepted.hash, &accepted.matched)
                .await
                .with_context(|| format!("on_block_accepted @height {height}"))?;
        }
        Ok(())
    }
}
