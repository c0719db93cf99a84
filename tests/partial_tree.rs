mod common;

use bitcoin::{
    consensus,
    constants::genesis_block,
    hashes::Hash,
    merkle_tree::PartialMerkleTree,
    MerkleBlock, Network, TxMerkleNode, Txid,
};
use merkle_chain::{
    partial_tree::{extract_matches, merkle_root},
    ChainError, MerkleBlockRecord, ProofError,
};
use proptest::prelude::*;

use common::{header, proof_record, root_of, txids};

const GENESIS_HEADER_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";

fn node(t: &Txid) -> TxMerkleNode {
    TxMerkleNode::from_raw_hash(t.to_raw_hash())
}

fn proof_err(record: &MerkleBlockRecord) -> ProofError {
    match record.verify() {
        Err(ChainError::ProofMismatch { source, .. }) => source,
        other => panic!("expected proof mismatch, got {other:?}"),
    }
}

#[test]
fn mainnet_genesis_merkle_block_verifies() -> anyhow::Result<()> {
    let block = genesis_block(Network::Bitcoin);
    let coinbase = block.txdata[0].compute_txid();
    let mb = MerkleBlock::from_block_with_predicate(&block, |_| true);

    let record = MerkleBlockRecord::from_merkle_block(&mb);
    assert_eq!(hex::encode(consensus::serialize(record.header())), GENESIS_HEADER_HEX);
    assert_eq!(
        record.hash().to_string(),
        "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
    );
    assert_eq!(record.total_transactions(), 1);
    assert_eq!(record.flags(), &[0x01]);

    let found = record.verify()?;
    assert_eq!(
        found.root.to_string(),
        "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
    );
    assert_eq!(found.matched, vec![coinbase]);
    assert_eq!(found.positions, vec![0]);

    // and back to the wire message
    let again = record.to_merkle_block()?;
    assert_eq!(consensus::serialize(&again), consensus::serialize(&mb));
    Ok(())
}

#[test]
fn zero_transactions_is_the_empty_tree() {
    let found = extract_matches(0, &[], &[]).unwrap();
    assert_eq!(found.root, TxMerkleNode::all_zeros());
    assert!(found.matched.is_empty());

    assert_eq!(extract_matches(0, &[0x01], &[]), Err(ProofError::UnexpectedProof));
    let h = node(&txids(1, 1)[0]);
    assert_eq!(extract_matches(0, &[], &[h]), Err(ProofError::UnexpectedProof));
}

#[test]
fn header_only_record_rejects_stray_proof_data() {
    let h = header(bitcoin::BlockHash::all_zeros(), TxMerkleNode::all_zeros(), 1);
    let err = MerkleBlockRecord::with_proof(h, 0, vec![], vec![0x01]).unwrap_err();
    assert_eq!(err, ProofError::UnexpectedProof);

    let record = MerkleBlockRecord::with_proof(h, 0, vec![], vec![]).unwrap();
    assert!(!record.has_proof());
    assert!(record.verify().unwrap().matched.is_empty());
}

#[test]
fn odd_levels_duplicate_the_last_node() {
    // 3 and 5 leaves force padding at more than one level
    for n in [3usize, 5, 7, 11] {
        let ids = txids(2, n);
        let expected = root_of(&ids);
        assert_eq!(merkle_root(&ids), expected, "full root, n={n}");

        let all = vec![true; n];
        let record = proof_record(bitcoin::BlockHash::all_zeros(), &ids, &all, n as u32);
        let found = record.verify().unwrap();
        assert_eq!(found.root, expected, "partial root, n={n}");
        assert_eq!(found.matched, ids);
    }
}

#[test]
fn only_flagged_leaves_are_reported() {
    let ids = txids(3, 9);
    let mut matches = vec![false; 9];
    matches[2] = true;
    matches[8] = true;
    let record = proof_record(bitcoin::BlockHash::all_zeros(), &ids, &matches, 1);

    let found = record.verify().unwrap();
    assert_eq!(found.matched, vec![ids[2], ids[8]]);
    assert_eq!(found.positions, vec![2, 8]);
    // pruned tree is smaller than the full leaf set
    assert!(record.hashes().len() < ids.len());
}

#[test]
fn truncated_streams_are_rejected() {
    let ids = txids(4, 8);
    let mut matches = vec![false; 8];
    matches[5] = true;
    let record = proof_record(bitcoin::BlockHash::all_zeros(), &ids, &matches, 1);
    let (total, flags, hashes) = (record.total_transactions(), record.flags(), record.hashes());

    let short = &hashes[..hashes.len() - 1];
    assert_eq!(extract_matches(total, flags, short), Err(ProofError::HashesExhausted));

    let mut extra = hashes.to_vec();
    extra.push(node(&ids[0]));
    assert_eq!(extract_matches(total, flags, &extra), Err(ProofError::UnusedHashes(1)));

    let mut padded = flags.to_vec();
    padded.push(0);
    assert_eq!(extract_matches(total, &padded, hashes), Err(ProofError::UnusedFlags(1)));

    assert_eq!(extract_matches(total, &[], hashes), Err(ProofError::FlagsExhausted));
}

#[test]
fn declared_root_must_match() {
    let ids = txids(5, 4);
    let record = proof_record(bitcoin::BlockHash::all_zeros(), &ids, &[true, false, false, true], 1);
    let forged = MerkleBlockRecord::with_proof(
        header(bitcoin::BlockHash::all_zeros(), root_of(&txids(6, 4)), 1),
        record.total_transactions(),
        record.hashes().to_vec(),
        record.flags().to_vec(),
    )
    .unwrap();
    assert!(matches!(proof_err(&forged), ProofError::RootMismatch { .. }));
}

#[test]
fn duplicated_right_branch_is_rejected() {
    // two leaves, both descended into, identical hashes (CVE-2012-2459 shape)
    let a = node(&txids(7, 1)[0]);
    assert_eq!(extract_matches(2, &[0b111], &[a, a]), Err(ProofError::DuplicateBranch(1)));
}

#[test]
fn limits_are_enforced() {
    let a = node(&txids(8, 1)[0]);
    assert!(matches!(
        extract_matches(2, &[0x01], &[a, a, a]),
        Err(ProofError::TooManyHashes { hashes: 3, total: 2 })
    ));
    assert_eq!(
        extract_matches(u32::MAX, &[0x00], &[a]),
        Err(ProofError::TooManyTransactions(u32::MAX))
    );
}

fn arb_tree() -> impl Strategy<Value = (Vec<Txid>, Vec<bool>)> {
    (1usize..160, any::<u8>()).prop_flat_map(|(n, seed)| {
        (Just(txids(seed, n)), prop::collection::vec(any::<bool>(), n))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn partial_root_equals_full_root((ids, matches) in arb_tree()) {
        let record = proof_record(bitcoin::BlockHash::all_zeros(), &ids, &matches, 1);
        let found = record.verify().unwrap();
        prop_assert_eq!(found.root, root_of(&ids));
        prop_assert_eq!(found.root, merkle_root(&ids));

        let expected: Vec<Txid> = ids.iter().zip(&matches).filter(|(_, m)| **m).map(|(t, _)| *t).collect();
        prop_assert_eq!(&found.matched, &expected);

        // agrees with the bitcoin crate's own extraction
        let pmt = PartialMerkleTree::from_txids(&ids, &matches);
        let (mut m, mut idx) = (Vec::new(), Vec::new());
        let root = pmt.extract_matches(&mut m, &mut idx).unwrap();
        prop_assert_eq!(found.root, root);
        prop_assert_eq!(found.matched, m);
        prop_assert_eq!(found.positions, idx);
    }

    #[test]
    fn corrupted_hash_is_never_accepted(
        (ids, matches) in arb_tree(),
        which in any::<prop::sample::Index>(),
        byte in 0usize..32,
        bit in 0u8..8,
    ) {
        let record = proof_record(bitcoin::BlockHash::all_zeros(), &ids, &matches, 1);
        let mut hashes = record.hashes().to_vec();
        let i = which.index(hashes.len());
        let mut raw = hashes[i].to_byte_array();
        raw[byte] ^= 1 << bit;
        hashes[i] = TxMerkleNode::from_byte_array(raw);

        let tampered = MerkleBlockRecord::with_proof(
            *record.header(),
            record.total_transactions(),
            hashes,
            record.flags().to_vec(),
        ).unwrap();
        prop_assert!(tampered.verify().is_err());
    }

    #[test]
    fn flipped_flag_never_reports_a_foreign_match(
        (ids, matches) in arb_tree(),
        which in any::<prop::sample::Index>(),
    ) {
        let record = proof_record(bitcoin::BlockHash::all_zeros(), &ids, &matches, 1);
        let mut flags = record.flags().to_vec();
        let bit = which.index(flags.len() * 8);
        flags[bit / 8] ^= 1 << (bit % 8);

        let tampered = MerkleBlockRecord::with_proof(
            *record.header(),
            record.total_transactions(),
            record.hashes().to_vec(),
            flags,
        ).unwrap();
        // a leaf bit only toggles whether that leaf is reported; anything
        // structural changes the root or breaks the traversal
        if let Ok(found) = tampered.verify() {
            prop_assert_eq!(found.root, root_of(&ids));
            prop_assert!(found.matched.iter().all(|t| ids.contains(t)));
        }
    }
}
