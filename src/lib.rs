#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! merkle-chain: BIP37 merkle-block verification and a reorg-tolerant
//! header chain for SPV wallets.
//!
//! ## What you implement
//! - [`BlockSource`]: fetch runs of headers / merkle blocks by height.
//! - [`ChainHooks`]: receive accepted blocks with their matched txids, and reorgs.
//! - [`Store`]: persist records and tx links ([`SqliteStore`] ships with the crate).
//! - [`ForkChoice`] (optional): decide whether a competing branch replaces the active one.
//!
//! ## What the engine does
//! - Rebuilds each block's **partial merkle tree** and checks it against the header.
//! - Keeps the active chain linked by height: every header's parent sits one below it.
//! - Applies single headers or long runs **atomically**, reorgs included.
//! - Tracks which block confirmed which transaction.
//!
//! ## Minimal usage
//! ```rust,ignore
//! use merkle_chain::prelude::*;
//! use bitcoin::Network;
//!
//! async fn run(source: impl BlockSource, merkle_block: bitcoin::MerkleBlock) -> anyhow::Result<()> {
//!     let store = SqliteStore::new("chain.sqlite")?;
//!     let chain = MerkleChain::open(ChainConfig::for_network(Network::Bitcoin), store, NoHooks)
//!         .await?
//!         .with_fork_choice(FollowCaller);
//!
//!     chain.sync_to_tip(&source).await?;
//!
//!     let record = MerkleBlockRecord::from_merkle_block(&merkle_block);
//!     let outcome = chain.ingest(record, Placement::Tip).await?;
//!     for accepted in outcome.accepted {
//!         println!("{} matched {} txs", accepted.hash, accepted.matched.len());
//!     }
//!     Ok(())
//! }
//! ```

/// Partial merkle tree traversal and full merkle roots.
pub mod partial_tree;

/// Header records with optional proofs.
pub mod record;

/// In-memory chain index.
pub mod chain;

/// Validate-then-commit ingestion of single headers and runs.
pub mod ingest;

/// Reorg policies.
pub mod fork_choice;

/// Transaction to block association.
pub mod tx_index;

/// Anchors and sync settings.
pub mod config;

/// Error kinds.
pub mod error;

/// Async engine tying index, store and hooks together.
pub mod engine;

/// Network provider abstraction.
pub mod source;

/// Wallet callbacks.
pub mod hooks;

/// Persistence layer (traits and SQLite implementation).
pub mod store;

// Public re-exports
pub use chain::ChainIndex;
pub use config::ChainConfig;
pub use engine::MerkleChain;
pub use error::{ChainError, ProofError};
pub use fork_choice::{FollowCaller, Fork, ForkChoice, RejectForks};
pub use hooks::{ChainHooks, NoHooks};
pub use ingest::{Accepted, IngestOutcome, Placement};
pub use record::MerkleBlockRecord;
pub use source::BlockSource;
#[cfg(feature = "store-sqlite")]
pub use store::SqliteStore;
pub use store::{ChangeSet, Store};

/// Convenience prelude for end users.
pub mod prelude {
    #[cfg(feature = "store-sqlite")]
    pub use crate::SqliteStore;
    pub use crate::{
        BlockSource, ChainConfig, ChainError, ChainHooks, ChainIndex, FollowCaller, ForkChoice,
        MerkleBlockRecord, MerkleChain, NoHooks, Placement, RejectForks, Store,
    };
}
