#![allow(dead_code)]
//! Fixtures shared by the integration tests: synthetic headers, txids and
//! BIP37 proofs built with the `bitcoin` crate's own partial merkle tree.
use bitcoin::{
    block::{Header, Version},
    hashes::{sha256d, Hash},
    merkle_tree::{calculate_root, PartialMerkleTree},
    pow::CompactTarget,
    BlockHash, MerkleBlock, TxMerkleNode, Txid,
};
use merkle_chain::{ChainConfig, MerkleBlockRecord};

pub fn header(prev: BlockHash, merkle_root: TxMerkleNode, nonce: u32) -> Header {
    Header {
        version: Version::from_consensus(2),
        prev_blockhash: prev,
        merkle_root,
        time: 1_700_000_000 + nonce,
        bits: CompactTarget::from_consensus(0x207fffff), // easy target (regtest-like)
        nonce,
    }
}

/// `n` distinct txids, different for each `seed`.
pub fn txids(seed: u8, n: usize) -> Vec<Txid> {
    (0..n)
        .map(|i| Txid::from_raw_hash(sha256d::Hash::hash(&[seed, i as u8, (i >> 8) as u8])))
        .collect()
}

/// Reference root from the `bitcoin` crate.
pub fn root_of(txids: &[Txid]) -> TxMerkleNode {
    calculate_root(txids.iter().map(|t| TxMerkleNode::from_raw_hash(t.to_raw_hash())))
        .unwrap_or_else(TxMerkleNode::all_zeros)
}

/// A block over `txids` carrying a proof for the flagged ones.
pub fn proof_record(prev: BlockHash, txids: &[Txid], matches: &[bool], nonce: u32) -> MerkleBlockRecord {
    let header = header(prev, root_of(txids), nonce);
    let txn = PartialMerkleTree::from_txids(txids, matches);
    MerkleBlockRecord::from_merkle_block(&MerkleBlock { header, txn })
}

pub fn genesis() -> MerkleBlockRecord {
    MerkleBlockRecord::header_only(header(BlockHash::all_zeros(), TxMerkleNode::all_zeros(), 0))
}

pub fn config() -> ChainConfig {
    ChainConfig::new(genesis().hash())
}

/// `n` header-only records linked after `prev`; `nonce_base` separates branches.
pub fn header_chain(prev: BlockHash, n: usize, nonce_base: u32) -> Vec<MerkleBlockRecord> {
    let mut out = Vec::with_capacity(n);
    let mut prev = prev;
    for i in 0..n {
        let r = MerkleBlockRecord::header_only(header(prev, TxMerkleNode::all_zeros(), nonce_base + i as u32 + 1));
        prev = r.hash();
        out.push(r);
    }
    out
}

/// Genesis followed by `n` header-only records.
pub fn main_chain(n: usize) -> Vec<MerkleBlockRecord> {
    let g = genesis();
    let mut out = vec![g.clone()];
    out.extend(header_chain(g.hash(), n, 0));
    out
}
