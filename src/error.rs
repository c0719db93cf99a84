//! Error kinds returned by proof verification and chain ingestion.
use bitcoin::{BlockHash, TxMerkleNode};
use thiserror::Error;

/// Why a partial merkle tree could not be turned into a root.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    /// More leaves declared than a block can hold.
    #[error("too many transactions: {0}")]
    TooManyTransactions(u32),
    /// More hashes than leaves.
    #[error("{hashes} hashes for {total} transactions")]
    TooManyHashes {
        /// Hashes supplied.
        hashes: usize,
        /// Declared leaf count.
        total: u32,
    },
    /// The flag bitstream ran out before traversal finished.
    #[error("flag bits exhausted")]
    FlagsExhausted,
    /// The hash list ran out before traversal finished.
    #[error("hashes exhausted")]
    HashesExhausted,
    /// Traversal finished with hashes left over.
    #[error("{0} unused hashes")]
    UnusedHashes(usize),
    /// Traversal finished with whole flag bytes left over.
    #[error("{0} unused flag bytes")]
    UnusedFlags(usize),
    /// A descended node has identical left and right children.
    #[error("duplicated branch at height {0}")]
    DuplicateBranch(u32),
    /// Header-only record carrying proof data.
    #[error("proof data present with zero transactions")]
    UnexpectedProof,
    /// Reconstructed root disagrees with the header.
    #[error("merkle root mismatch: header {declared}, proof {computed}")]
    RootMismatch {
        /// Root committed to by the header.
        declared: TxMerkleNode,
        /// Root rebuilt from the proof.
        computed: TxMerkleNode,
    },
}

/// Rejections from the chain index and ingestion pipeline.
///
/// Every variant is returned before the index is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The attached proof does not commit to the header's merkle root.
    #[error("proof mismatch for block {hash}: {source}")]
    ProofMismatch {
        /// Offending block.
        hash: BlockHash,
        /// What went wrong in the proof.
        #[source]
        source: ProofError,
    },
    /// Parent is not the active header one height below. An anchor is exempt
    /// only when that height is empty.
    #[error("orphan header {hash} at height {height}: parent {prev} not indexed at height {}", .height.wrapping_sub(1))]
    OrphanHeader {
        /// Offending block.
        hash: BlockHash,
        /// Height it was meant to occupy.
        height: u32,
        /// Its declared parent.
        prev: BlockHash,
    },
    /// A run of headers is not internally linked.
    #[error("chain discontinuity at batch index {index}: expected parent {expected}, found {found}")]
    ChainDiscontinuity {
        /// Position in the batch of the header with the bad link.
        index: usize,
        /// Hash of the preceding header in the batch.
        expected: BlockHash,
        /// `prev_blockhash` actually declared.
        found: BlockHash,
    },
    /// A different header already holds the height and the fork was not accepted.
    #[error("height {height} already holds {existing}, refusing {incoming}")]
    DuplicateConflict {
        /// Contested height.
        height: u32,
        /// Active header at that height.
        existing: BlockHash,
        /// Header that tried to replace it.
        incoming: BlockHash,
    },
    /// A header sits at a checkpointed height with the wrong hash.
    #[error("checkpoint mismatch at height {height}: expected {expected}, found {found}")]
    CheckpointMismatch {
        /// Checkpointed height.
        height: u32,
        /// Trusted hash.
        expected: BlockHash,
        /// Hash that was offered.
        found: BlockHash,
    },
    /// `update_tree` or a persisted link referenced a header that is not indexed.
    #[error("unknown block {0}")]
    UnknownBlock(BlockHash),
}

impl ChainError {
    pub(crate) fn proof(hash: BlockHash, source: ProofError) -> Self {
        Self::ProofMismatch { hash, source }
    }
}
