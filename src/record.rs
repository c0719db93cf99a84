//! One indexed block header, optionally carrying a partial merkle tree.
use bitcoin::{
    block::{Header, Version},
    consensus::{self, encode::VarInt},
    pow::CompactTarget,
    BlockHash, MerkleBlock, TxMerkleNode,
};

use crate::{
    error::{ChainError, ProofError},
    partial_tree::{extract_matches, PartialTreeMatch},
};

/// A header plus its placement and raw proof payload.
///
/// The block hash is derived from `header` and cannot be set independently.
/// `total_transactions == 0` means a header-only record; constructors
/// enforce that such a record has no hashes and no flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBlockRecord {
    header: Header,
    hash: BlockHash,
    height: Option<u32>,
    total_transactions: u32,
    hashes: Vec<TxMerkleNode>,
    flags: Vec<u8>,
}

impl MerkleBlockRecord {
    /// A record with no proof attached.
    pub fn header_only(header: Header) -> Self {
        Self {
            hash: header.block_hash(),
            header,
            height: None,
            total_transactions: 0,
            hashes: Vec::new(),
            flags: Vec::new(),
        }
    }

    /// A record with a partial merkle tree. The proof is not verified here.
    ///
    /// # Errors
    /// [`ProofError::UnexpectedProof`] if `total_transactions` is zero but
    /// hashes or flags were supplied.
    pub fn with_proof(
        header: Header,
        total_transactions: u32,
        hashes: Vec<TxMerkleNode>,
        flags: Vec<u8>,
    ) -> Result<Self, ProofError> {
        if total_transactions == 0 && (!hashes.is_empty() || !flags.is_empty()) {
            return Err(ProofError::UnexpectedProof);
        }
        Ok(Self {
            hash: header.block_hash(),
            header,
            height: None,
            total_transactions,
            hashes,
            flags,
        })
    }

    /// Build from raw header fields.
    pub fn from_fields(
        version: i32,
        prev_blockhash: BlockHash,
        merkle_root: TxMerkleNode,
        time: u32,
        bits: u32,
        nonce: u32,
    ) -> Self {
        Self::header_only(Header {
            version: Version::from_consensus(version),
            prev_blockhash,
            merkle_root,
            time,
            bits: CompactTarget::from_consensus(bits),
            nonce,
        })
    }

    /// Take header and partial tree out of a decoded `merkleblock` message.
    pub fn from_merkle_block(block: &MerkleBlock) -> Self {
        let txn = &block.txn;
        let mut flags = vec![0u8; txn.bits().len().div_ceil(8)];
        for (i, bit) in txn.bits().iter().enumerate() {
            if *bit {
                flags[i / 8] |= 1 << (i % 8);
            }
        }
        let total = txn.num_transactions();
        if total == 0 {
            return Self::header_only(block.header);
        }
        Self {
            hash: block.header.block_hash(),
            header: block.header,
            height: None,
            total_transactions: total,
            hashes: txn.hashes().clone(),
            flags,
        }
    }

    /// Re-encode as a `merkleblock` message.
    ///
    /// # Errors
    /// Fails only if the stored payload cannot be decoded back, which a
    /// record built through this type's constructors never triggers.
    pub fn to_merkle_block(&self) -> Result<MerkleBlock, consensus::encode::Error> {
        let mut raw = consensus::serialize(&self.header);
        raw.extend_from_slice(&self.total_transactions.to_le_bytes());
        raw.extend(consensus::serialize(&VarInt(self.hashes.len() as u64)));
        for node in &self.hashes {
            raw.extend_from_slice(node.as_ref());
        }
        raw.extend(consensus::serialize(&self.flags));
        consensus::deserialize(&raw)
    }

    /// Block hash (double SHA-256 of the 80-byte header).
    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    /// Raw header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Parent hash.
    pub fn prev_hash(&self) -> BlockHash {
        self.header.prev_blockhash
    }

    /// Declared merkle root.
    pub fn merkle_root(&self) -> TxMerkleNode {
        self.header.merkle_root
    }

    /// Claimed production time (unix seconds).
    pub fn timestamp(&self) -> u32 {
        self.header.time
    }

    /// Placement in the active chain; `None` while unplaced or detached.
    pub fn height(&self) -> Option<u32> {
        self.height
    }

    /// Declared leaf count of the partial tree.
    pub fn total_transactions(&self) -> u32 {
        self.total_transactions
    }

    /// Proof hashes in traversal order.
    pub fn hashes(&self) -> &[TxMerkleNode] {
        &self.hashes
    }

    /// Proof flag bytes.
    pub fn flags(&self) -> &[u8] {
        &self.flags
    }

    /// Whether a partial tree is attached.
    pub fn has_proof(&self) -> bool {
        self.total_transactions > 0
    }

    /// Run the partial tree and check it against the header.
    ///
    /// Header-only records verify trivially with no matches.
    pub fn verify(&self) -> Result<PartialTreeMatch, ChainError> {
        if !self.has_proof() {
            return Ok(PartialTreeMatch {
                root: self.header.merkle_root,
                matched: Vec::new(),
                positions: Vec::new(),
            });
        }
        let found = extract_matches(self.total_transactions, &self.flags, &self.hashes)
            .map_err(|e| ChainError::proof(self.hash, e))?;
        if found.root != self.header.merkle_root {
            return Err(ChainError::proof(
                self.hash,
                ProofError::RootMismatch {
                    declared: self.header.merkle_root,
                    computed: found.root,
                },
            ));
        }
        Ok(found)
    }

    /// Fold a later arrival of the same block into this one.
    ///
    /// A proof on `other` replaces ours; a header-only `other` keeps ours.
    pub(crate) fn merge(&mut self, other: MerkleBlockRecord) {
        debug_assert_eq!(self.hash, other.hash);
        if other.has_proof() {
            self.total_transactions = other.total_transactions;
            self.hashes = other.hashes;
            self.flags = other.flags;
        }
    }

    pub(crate) fn set_height(&mut self, height: Option<u32>) {
        self.height = height;
    }

    /// Restore a persisted record, height included.
    ///
    /// # Errors
    /// Same as [`MerkleBlockRecord::with_proof`].
    pub fn from_parts(
        header: Header,
        height: Option<u32>,
        total_transactions: u32,
        hashes: Vec<TxMerkleNode>,
        flags: Vec<u8>,
    ) -> Result<Self, ProofError> {
        let mut record = Self::with_proof(header, total_transactions, hashes, flags)?;
        record.height = height;
        Ok(record)
    }
}
