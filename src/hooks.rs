//! Wallet glue: receive accepted blocks, their matches, and reorgs.
use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};

/// Called by the engine after each committed ingestion.
#[async_trait]
pub trait ChainHooks: Send + Sync {
    /// A block at `height` was accepted; `matched` are the transactions its
    /// proof includes (empty for header-only records).
    async fn on_block_accepted(
        &self,
        height: u32,
        block: BlockHash,
        matched: &[Txid],
    ) -> anyhow::Result<()>;

    /// Blocks that left the active chain in a reorg. Confirmations of their
    /// transactions should be recomputed.
    async fn on_blocks_detached(&self, _blocks: &[BlockHash]) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks that ignore everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

#[async_trait]
impl ChainHooks for NoHooks {
    async fn on_block_accepted(&self, _h: u32, _b: BlockHash, _m: &[Txid]) -> anyhow::Result<()> {
        Ok(())
    }
}
