//! Persistence adapter for the chain index.
//!
//! The index never talks to storage itself; the engine hands each committed
//! ingestion to a [`Store`] as one [`ChangeSet`] and rebuilds the index from
//! [`Store::load_records`] and [`Store::load_tx_links`] on startup.
use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};

use crate::record::MerkleBlockRecord;

/// Rows written by one ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Records to insert or overwrite, keyed by hash (height included).
    pub records: Vec<MerkleBlockRecord>,
    /// New `(txid, block)` associations.
    pub links: Vec<(Txid, BlockHash)>,
}

impl ChangeSet {
    /// No rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.links.is_empty()
    }
}

/// Durable storage for header records and transaction links.
#[async_trait]
pub trait Store: Send + Sync {
    /// Every stored record, active and detached.
    async fn load_records(&self) -> anyhow::Result<Vec<MerkleBlockRecord>>;

    /// Every stored `(txid, block)` association.
    async fn load_tx_links(&self) -> anyhow::Result<Vec<(Txid, BlockHash)>>;

    /// Apply `changes` atomically: all rows or none.
    async fn write_changes(&self, changes: &ChangeSet) -> anyhow::Result<()>;

    /// Delete records and their links.
    async fn remove_records(&self, hashes: &[BlockHash]) -> anyhow::Result<()>;
}

// submodules / concrete stores live here
#[cfg(feature = "store-sqlite")]
pub mod sqlite_store;
#[cfg(feature = "store-sqlite")]
pub use sqlite_store::SqliteStore;
