//! BIP37 partial merkle tree traversal.
//!
//! A partial tree is `(total_transactions, flags, hashes)`. Nodes are visited
//! depth first, left before right, starting at the root. Each visit consumes
//! one flag bit (LSB first within each byte):
//!
//!   bit 0, any node    -> next hash is this node's value, do not descend
//!   bit 1, inner node  -> descend into both children
//!   bit 1, leaf        -> next hash is a matched txid
//!
//! Inner values are `HASH256(left || right)`; a node without a right child
//! is paired with itself, exactly as full merkle trees pad odd levels.
use bitcoin::{
    hashes::{sha256d, Hash},
    TxMerkleNode, Txid,
};

use crate::error::ProofError;

/// Upper bound on leaves: `MAX_BLOCK_WEIGHT / MIN_TRANSACTION_WEIGHT`.
pub const MAX_TRANSACTIONS: u32 = 4_000_000 / 240;

/// Output of a successful traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialTreeMatch {
    /// Reconstructed merkle root.
    pub root: TxMerkleNode,
    /// Matched txids, in leaf order.
    pub matched: Vec<Txid>,
    /// Leaf positions of `matched`.
    pub positions: Vec<u32>,
}

impl PartialTreeMatch {
    fn empty() -> Self {
        Self {
            root: TxMerkleNode::all_zeros(),
            matched: Vec::new(),
            positions: Vec::new(),
        }
    }
}

/// Reconstruct the root and matched leaves of a partial merkle tree.
///
/// Zero transactions yields the all-zero root with no traversal. The
/// caller compares `root` against the header.
///
/// # Errors
/// Fails if the flag or hash stream is exhausted early, if hashes or whole
/// flag bytes are left over, or if a descended node duplicates its left
/// branch into its right.
pub fn extract_matches(
    total_transactions: u32,
    flags: &[u8],
    hashes: &[TxMerkleNode],
) -> Result<PartialTreeMatch, ProofError> {
    if total_transactions == 0 {
        if !hashes.is_empty() || !flags.is_empty() {
            return Err(ProofError::UnexpectedProof);
        }
        return Ok(PartialTreeMatch::empty());
    }
    if total_transactions > MAX_TRANSACTIONS {
        return Err(ProofError::TooManyTransactions(total_transactions));
    }
    if hashes.len() > total_transactions as usize {
        return Err(ProofError::TooManyHashes {
            hashes: hashes.len(),
            total: total_transactions,
        });
    }
    // every hash is consumed by exactly one visit, each visit costs a bit
    if flags.len() * 8 < hashes.len() {
        return Err(ProofError::FlagsExhausted);
    }

    let mut walk = Traversal {
        total: total_transactions,
        flags,
        hashes,
        bits_used: 0,
        hashes_used: 0,
        matched: Vec::new(),
        positions: Vec::new(),
    };

    let root = walk.visit(tree_height(total_transactions), 0)?;

    if walk.hashes_used != hashes.len() {
        return Err(ProofError::UnusedHashes(hashes.len() - walk.hashes_used));
    }
    // padding up to the byte boundary is allowed, whole spare bytes are not
    let bytes_used = walk.bits_used.div_ceil(8);
    if bytes_used != flags.len() {
        return Err(ProofError::UnusedFlags(flags.len() - bytes_used));
    }

    Ok(PartialTreeMatch {
        root,
        matched: walk.matched,
        positions: walk.positions,
    })
}

/// Full merkle root of an ordered txid list, the all-zero root when empty.
pub fn merkle_root(txids: &[Txid]) -> TxMerkleNode {
    if txids.is_empty() {
        return TxMerkleNode::all_zeros();
    }
    let mut level: Vec<TxMerkleNode> = txids
        .iter()
        .map(|t| TxMerkleNode::from_raw_hash(t.to_raw_hash()))
        .collect();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    level[0]
}

/// `HASH256(left || right)`.
pub fn hash_pair(left: &TxMerkleNode, right: &TxMerkleNode) -> TxMerkleNode {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(left.as_ref());
    data.extend_from_slice(right.as_ref());
    TxMerkleNode::from_raw_hash(sha256d::Hash::hash(&data))
}

/// Number of nodes at `height` (leaves are height 0).
fn tree_width(total: u32, height: u32) -> u32 {
    let total = u64::from(total);
    ((total + (1u64 << height) - 1) >> height) as u32
}

fn tree_height(total: u32) -> u32 {
    let mut height = 0;
    while tree_width(total, height) > 1 {
        height += 1;
    }
    height
}

fn flag_bit(flags: &[u8], index: usize) -> bool {
    (flags[index / 8] >> (index % 8)) & 1 == 1
}

struct Traversal<'a> {
    total: u32,
    flags: &'a [u8],
    hashes: &'a [TxMerkleNode],
    bits_used: usize,
    hashes_used: usize,
    matched: Vec<Txid>,
    positions: Vec<u32>,
}

impl Traversal<'_> {
    fn visit(&mut self, height: u32, pos: u32) -> Result<TxMerkleNode, ProofError> {
        if self.bits_used >= self.flags.len() * 8 {
            return Err(ProofError::FlagsExhausted);
        }
        let descend = flag_bit(self.flags, self.bits_used);
        self.bits_used += 1;

        if height == 0 || !descend {
            let node = *self
                .hashes
                .get(self.hashes_used)
                .ok_or(ProofError::HashesExhausted)?;
            self.hashes_used += 1;
            if height == 0 && descend {
                self.matched.push(Txid::from_raw_hash(node.to_raw_hash()));
                self.positions.push(pos);
            }
            return Ok(node);
        }

        let left = self.visit(height - 1, pos * 2)?;
        let right = if pos * 2 + 1 < tree_width(self.total, height - 1) {
            let right = self.visit(height - 1, pos * 2 + 1)?;
            if right == left {
                return Err(ProofError::DuplicateBranch(height));
            }
            right
        } else {
            left
        };
        Ok(hash_pair(&left, &right))
    }
}
