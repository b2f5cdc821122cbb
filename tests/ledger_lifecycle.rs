use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::thread;

use sha2::{Digest, Sha256};

use ballot_ledger::models::canonical_bytes;
use ballot_ledger::store::{JsonLinesStore, MemoryStore};
use ballot_ledger::{
    Ballot, Block, BlockFault, ChainStatus, Ledger, PayloadCipher, PayloadKey, TallyAggregator,
    VoterAssertion, GENESIS_PREVIOUS_HASH,
};

fn voter(name: &str) -> VoterAssertion {
    VoterAssertion {
        voter: name.to_string(),
        department: "engineering".to_string(),
        has_voted: false,
        eligible_categories: [1, 2, 3].into_iter().collect::<BTreeSet<u64>>(),
    }
}

fn flip_first_hex(hash: &mut String) {
    let replacement = if hash.starts_with('0') { "1" } else { "0" };
    hash.replace_range(0..1, replacement);
}

#[test]
fn two_identical_ballots_then_tamper() {
    let ledger = Ledger::in_memory(PayloadKey::generate());
    let tally = TallyAggregator::default();

    let first = ledger.append(&Ballot::new().select(1, 2), &voter("a")).unwrap();
    assert_eq!(first.index, 1);
    assert_eq!(first.previous_hash, GENESIS_PREVIOUS_HASH);

    let mut hasher = Sha256::new();
    hasher.update(format!(
        "1{}{}{}",
        first.timestamp.format("%Y-%m-%d %H:%M:%S+00:00"),
        first.payload,
        GENESIS_PREVIOUS_HASH
    ));
    assert_eq!(first.hash, format!("{:x}", hasher.finalize()));

    let counts = tally.get_tally(&ledger);
    assert_eq!(counts.tally.count(1, 2), 1);
    assert_eq!(counts.tally.categories().len(), 1);

    ledger.append(&Ballot::new().select(1, 2), &voter("b")).unwrap();
    assert_eq!(tally.get_tally(&ledger).tally.count(1, 2), 2);

    let mut blocks: Vec<Block> = (*ledger.snapshot()).clone();
    flip_first_hex(&mut blocks[0].hash);
    let report = ballot_ledger::verifier::verify_blocks(&blocks);

    assert_eq!(report.status, ChainStatus::Invalid);
    assert!(matches!(
        report.verdict(1).unwrap().faults[..],
        [BlockFault::HashMismatch { .. }]
    ));
    assert!(matches!(
        report.verdict(2).unwrap().faults[..],
        [BlockFault::PreviousHashMismatch { .. }]
    ));
}

#[test]
fn indices_are_contiguous_and_linked() {
    let ledger = Ledger::in_memory(PayloadKey::generate());
    for i in 0..10 {
        ledger
            .append(&Ballot::new().select(1 + i % 3, i), &voter("v"))
            .unwrap();
    }

    let blocks = ledger.snapshot();
    for (pos, block) in blocks.iter().enumerate() {
        assert_eq!(block.index, pos as u64 + 1);
        assert_eq!(block.hash, block.recompute_hash());
        if pos == 0 {
            assert_eq!(block.previous_hash, GENESIS_PREVIOUS_HASH);
        } else {
            assert_eq!(block.previous_hash, blocks[pos - 1].hash);
        }
    }
    assert!(ledger.verify_chain().is_valid());
}

#[test]
fn concurrent_appends_never_share_an_index() {
    let ledger = Arc::new(Ledger::in_memory(PayloadKey::generate()));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for i in 0..25 {
                    ledger
                        .append(&Ballot::new().select(1, (t * 100 + i) as u64), &voter("c"))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(ledger.len(), 200);
    let report = ledger.verify_chain();
    assert!(report.is_valid());
    assert_eq!(report.blocks_checked, 200);

    let counts = TallyAggregator::default().get_tally(&ledger);
    assert_eq!(counts.tally.total(1), 200);
}

#[test]
fn ballots_decrypt_to_their_canonical_form() {
    let ledger = Ledger::in_memory(PayloadKey::generate());
    let ballot = Ballot::new().select(3, 30).select(1, 10).select(2, 20);
    let block = ledger.append(&ballot, &voter("d")).unwrap();

    let plaintext = ledger.cipher().decrypt(&block.payload).unwrap();
    assert_eq!(plaintext, ballot.to_canonical_json().unwrap());
    assert_eq!(ledger.decrypt_ballot(&block).unwrap(), ballot);
}

#[test]
fn tally_grows_by_exactly_the_new_ballot() {
    let ledger = Ledger::in_memory(PayloadKey::generate());
    let tally = TallyAggregator::default();
    ledger.append(&Ballot::new().select(1, 1).select(2, 4), &voter("e")).unwrap();

    let before = tally.get_tally(&ledger);
    assert_eq!(tally.get_tally(&ledger).tally, before.tally);

    ledger.append(&Ballot::new().select(2, 5).select(3, 7), &voter("f")).unwrap();
    let after = tally.get_tally(&ledger);

    assert_eq!(after.tally.count(1, 1), before.tally.count(1, 1));
    assert_eq!(after.tally.count(2, 4), before.tally.count(2, 4));
    assert_eq!(after.tally.count(2, 5), before.tally.count(2, 5) + 1);
    assert_eq!(after.tally.count(3, 7), before.tally.count(3, 7) + 1);
    assert_eq!(after.tally.total(2), before.tally.total(2) + 1);
}

#[test]
fn foreign_block_is_skipped_but_others_count() {
    let key = PayloadKey::generate();
    let foreign = PayloadCipher::new(PayloadKey::generate());

    let first = Block::seal(
        1,
        chrono::Utc::now(),
        foreign.encrypt(br#"{"1":9}"#).unwrap(),
        GENESIS_PREVIOUS_HASH.to_string(),
    );
    let store = MemoryStore::with_blocks(vec![first]);
    let ledger = Ledger::open(Box::new(store), PayloadCipher::new(key)).unwrap();
    ledger.append(&Ballot::new().select(1, 2), &voter("g")).unwrap();

    let snapshot = TallyAggregator::default().get_tally(&ledger);
    assert_eq!(snapshot.tally.count(1, 2), 1);
    assert_eq!(snapshot.tally.count(1, 9), 0);
    assert_eq!(snapshot.skipped.len(), 1);
    assert_eq!(snapshot.skipped[0].index, 1);
    assert!(ledger.verify_chain().is_valid());
}

#[test]
fn file_backed_ledger_survives_restart_and_detects_edits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks.jsonl");
    let key = PayloadKey::generate();

    {
        let ledger = Ledger::open(
            Box::new(JsonLinesStore::open(&path).unwrap()),
            PayloadCipher::new(key.clone()),
        )
        .unwrap();
        ledger.append(&Ballot::new().select(1, 2), &voter("h")).unwrap();
        ledger.append(&Ballot::new().select(1, 3), &voter("i")).unwrap();
    }

    let reopened = Ledger::open(
        Box::new(JsonLinesStore::open(&path).unwrap()),
        PayloadCipher::new(key.clone()),
    )
    .unwrap();
    assert_eq!(reopened.len(), 2);
    assert!(reopened.verify_chain().is_valid());
    let third = reopened.append(&Ballot::new().select(2, 1), &voter("j")).unwrap();
    assert_eq!(third.index, 3);
    drop(reopened);

    // Rewrite the second block's payload on disk with another valid token.
    let contents = fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
    let mut second: Block = serde_json::from_str(&lines[1]).unwrap();
    second.payload = PayloadCipher::new(key.clone())
        .encrypt(br#"{"1":2}"#)
        .unwrap();
    lines[1] = serde_json::to_string(&second).unwrap();
    fs::write(&path, lines.join("\n") + "\n").unwrap();

    let tampered = Ledger::open(
        Box::new(JsonLinesStore::open(&path).unwrap()),
        PayloadCipher::new(key),
    )
    .unwrap();
    let report = tampered.verify_chain();
    let failed: Vec<u64> = report.failures().map(|v| v.position).collect();
    assert_eq!(failed, vec![2]);

    let receipt_check = tampered.verify_receipt(&second.hash).unwrap();
    assert!(!receipt_check.is_valid());
}

#[test]
fn edited_index_on_disk_flags_only_that_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks.jsonl");
    let key = PayloadKey::generate();

    {
        let ledger = Ledger::open(
            Box::new(JsonLinesStore::open(&path).unwrap()),
            PayloadCipher::new(key.clone()),
        )
        .unwrap();
        for name in ["l", "m", "n", "o"] {
            ledger.append(&Ballot::new().select(1, 1), &voter(name)).unwrap();
        }
    }

    let contents = fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
    let mut second: Block = serde_json::from_str(&lines[1]).unwrap();
    second.index = 7;
    lines[1] = serde_json::to_string(&second).unwrap();
    fs::write(&path, lines.join("\n") + "\n").unwrap();

    let tampered = Ledger::open(
        Box::new(JsonLinesStore::open(&path).unwrap()),
        PayloadCipher::new(key),
    )
    .unwrap();
    let report = tampered.verify_chain();
    let failed: Vec<u64> = report.failures().map(|v| v.position).collect();
    assert_eq!(failed, vec![2]);
    assert_eq!(report.verdict(2).unwrap().index, 7);
    assert!(report.verdict(3).unwrap().is_valid());
    assert!(report.verdict(4).unwrap().is_valid());

    let receipt_check = tampered.verify_receipt(&second.hash).unwrap();
    assert_eq!(receipt_check.position, 2);
    assert!(!receipt_check.is_valid());
}

#[test]
fn canonical_bytes_are_stable() {
    let block = Ledger::in_memory(PayloadKey::generate())
        .append(&Ballot::new().select(1, 1), &voter("k"))
        .unwrap();
    let a = canonical_bytes(block.index, &block.timestamp, &block.payload, &block.previous_hash);
    let b = canonical_bytes(block.index, &block.timestamp, &block.payload, &block.previous_hash);
    assert_eq!(a, b);
    assert!(a.ends_with(GENESIS_PREVIOUS_HASH.as_bytes()));
}
