//! Where headers and merkle blocks come from (P2P peers, an HTTP service...).
use async_trait::async_trait;

use crate::record::MerkleBlockRecord;

/// Network provider for chain sync.
///
/// Records arrive deserialized. Cancelling or retrying a request is the
/// provider's business; the engine only sees completed runs.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Current best height known to the provider.
    async fn tip_height(&self) -> anyhow::Result<u32>;

    /// Consecutive records for heights `start..=stop`, header-only or with
    /// a partial merkle tree. May return fewer than requested, never more.
    async fn get_blocks(&self, start: u32, stop: u32) -> anyhow::Result<Vec<MerkleBlockRecord>>;
}
