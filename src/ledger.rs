//! Append-only, hash-chained ballot ledger.
//!
//! All appends go through one lock, and the store independently refuses any
//! index other than `last + 1`, so two ballots can never share an index or
//! chain to the same predecessor. Readers take an `Arc` snapshot of the block
//! list and never observe a half-appended block.

use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::cipher::{PayloadCipher, PayloadKey};
use crate::error::{IneligibleReason, LedgerError, LedgerResult};
use crate::models::{Ballot, Block, Receipt, VoterAssertion, GENESIS_PREVIOUS_HASH};
use crate::store::{BlockStore, MemoryStore};
use crate::verifier::{self, BlockVerdict, VerificationReport};

/// Length and head hash. Changes on every successful append.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    pub length: usize,
    pub head_hash: Option<String>,
}

pub struct Ledger {
    store: Box<dyn BlockStore>,
    cipher: PayloadCipher,
    blocks: RwLock<Arc<Vec<Block>>>,
    append_lock: Mutex<()>,
}

impl Ledger {
    /// Opens a ledger over `store`, loading every block it already holds.
    /// Existing blocks are not validated here; use `verify_chain`.
    pub fn open(store: Box<dyn BlockStore>, cipher: PayloadCipher) -> LedgerResult<Self> {
        let blocks = store.load()?;
        info!("Ledger opened with {} blocks", blocks.len());
        Ok(Ledger {
            store,
            cipher,
            blocks: RwLock::new(Arc::new(blocks)),
            append_lock: Mutex::new(()),
        })
    }

    pub fn in_memory(key: PayloadKey) -> Self {
        Ledger {
            store: Box::new(MemoryStore::new()),
            cipher: PayloadCipher::new(key),
            blocks: RwLock::new(Arc::new(Vec::new())),
            append_lock: Mutex::new(()),
        }
    }

    pub fn cipher(&self) -> &PayloadCipher {
        &self.cipher
    }

    /// Consistent view of every block, ordered by index.
    pub fn snapshot(&self) -> Arc<Vec<Block>> {
        Arc::clone(&self.blocks.read())
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn head(&self) -> Option<Block> {
        self.blocks.read().last().cloned()
    }

    pub fn tip(&self) -> ChainTip {
        tip_of(&self.blocks.read())
    }

    /// Records a ballot and returns the new block.
    ///
    /// The voter assertion is checked before any encryption happens. On
    /// success the block is durable; only then may the caller mark the voter
    /// as having voted.
    pub fn append(&self, ballot: &Ballot, voter: &VoterAssertion) -> LedgerResult<Block> {
        check_eligibility(ballot, voter).map_err(|reason| LedgerError::IneligibleVote {
            voter: voter.voter.clone(),
            reason,
        })?;

        let plaintext = ballot.to_canonical_json()?;
        let payload = self.cipher.encrypt(&plaintext)?;

        let _guard = self.append_lock.lock();
        let head = self.head();
        let (index, previous_hash) = match &head {
            Some(block) => (block.index + 1, block.hash.clone()),
            None => (1, GENESIS_PREVIOUS_HASH.to_string()),
        };
        let block = Block::seal(index, Utc::now(), payload, previous_hash);

        if let Err(e) = self.store.append(&block) {
            error!("Failed to persist block {}: {}", index, e);
            return Err(LedgerError::Append { index, source: e });
        }

        Arc::make_mut(&mut self.blocks.write()).push(block.clone());
        info!("Appended block {} ({})", block.index, &block.hash[..12]);
        Ok(block)
    }

    /// `append`, returning the voter-facing receipt.
    pub fn cast(&self, ballot: &Ballot, voter: &VoterAssertion) -> LedgerResult<Receipt> {
        self.append(ballot, voter).map(|block| Receipt::from(&block))
    }

    pub fn block_at(&self, index: u64) -> Option<Block> {
        let blocks = self.blocks.read();
        let pos = usize::try_from(index.checked_sub(1)?).ok()?;
        blocks.get(pos).filter(|b| b.index == index).cloned().or_else(|| {
            blocks.iter().find(|b| b.index == index).cloned()
        })
    }

    pub fn block_by_hash(&self, hash: &str) -> Option<Block> {
        self.blocks.read().iter().find(|b| b.hash == hash).cloned()
    }

    pub fn block_by_payload(&self, payload: &str) -> Option<Block> {
        self.blocks.read().iter().find(|b| b.payload == payload).cloned()
    }

    pub fn decrypt_ballot(&self, block: &Block) -> LedgerResult<Ballot> {
        let plaintext = self.cipher.decrypt(&block.payload)?;
        Ok(Ballot::from_json(&plaintext)?)
    }

    /// Walks the whole chain. Faults are reported, never repaired.
    pub fn verify_chain(&self) -> VerificationReport {
        let blocks = self.snapshot();
        let report = verifier::verify_blocks(&blocks);
        for verdict in report.failures() {
            warn!(
                "Block at position {} (index {}) failed verification: {:?}",
                verdict.position, verdict.index, verdict.faults
            );
        }
        report
    }

    /// Checks one receipt without verifying the rest of the chain. A
    /// 64-character hex input is looked up as a block hash, anything else as
    /// a payload token. The block is checked against the slot it occupies
    /// and the block stored in the slot before it.
    pub fn verify_receipt(&self, input: &str) -> LedgerResult<BlockVerdict> {
        let input = input.trim();
        let blocks = self.snapshot();
        let pos = if looks_like_hash(input) {
            let hash = input.to_ascii_lowercase();
            blocks.iter().position(|b| b.hash == hash)
        } else {
            blocks.iter().position(|b| b.payload == input)
        }
        .ok_or_else(|| LedgerError::NotFound(input.to_string()))?;

        let predecessor = pos.checked_sub(1).map(|p| &blocks[p]);
        Ok(verifier::verify_single_block(
            &blocks[pos],
            pos as u64 + 1,
            predecessor,
        ))
    }
}

pub(crate) fn tip_of(blocks: &[Block]) -> ChainTip {
    ChainTip {
        length: blocks.len(),
        head_hash: blocks.last().map(|b| b.hash.clone()),
    }
}

fn looks_like_hash(input: &str) -> bool {
    input.len() == 64 && input.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn check_eligibility(ballot: &Ballot, voter: &VoterAssertion) -> Result<(), IneligibleReason> {
    if voter.has_voted {
        return Err(IneligibleReason::AlreadyVoted);
    }
    if ballot.is_empty() {
        return Err(IneligibleReason::EmptyBallot);
    }
    for category in ballot.categories() {
        if !voter.eligible_categories.contains(&category) {
            return Err(IneligibleReason::CategoryNotEligible(category));
        }
    }
    Ok(())
}
