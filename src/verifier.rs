//! Chain integrity checks.
//!
//! Every block is checked on its own fields and against its predecessor, and a
//! fault in one block never stops the walk, so a single report shows the full
//! extent of any tampering.

use serde::Serialize;

use crate::models::{Block, GENESIS_PREVIOUS_HASH};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockFault {
    /// Stored hash differs from the hash of the block's own fields.
    HashMismatch { computed: String },
    /// `previous_hash` differs from the predecessor's stored hash
    /// (or the sentinel for the first block).
    PreviousHashMismatch { expected: String },
    IndexOutOfSequence { expected: u64 },
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockVerdict {
    /// 1-based slot the block occupies in the chain.
    pub position: u64,
    /// Index as stored in the block.
    pub index: u64,
    pub hash: String,
    pub faults: Vec<BlockFault>,
}

impl BlockVerdict {
    pub fn is_valid(&self) -> bool {
        self.faults.is_empty()
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Valid,
    Invalid,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub status: ChainStatus,
    pub blocks_checked: usize,
    pub verdicts: Vec<BlockVerdict>,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.status == ChainStatus::Valid
    }

    pub fn failures(&self) -> impl Iterator<Item = &BlockVerdict> {
        self.verdicts.iter().filter(|v| !v.is_valid())
    }

    pub fn verdict(&self, position: u64) -> Option<&BlockVerdict> {
        self.verdicts.iter().find(|v| v.position == position)
    }
}

impl FromIterator<BlockVerdict> for VerificationReport {
    fn from_iter<I: IntoIterator<Item = BlockVerdict>>(iter: I) -> Self {
        let verdicts: Vec<BlockVerdict> = iter.into_iter().collect();
        let status = if verdicts.iter().all(BlockVerdict::is_valid) {
            ChainStatus::Valid
        } else {
            ChainStatus::Invalid
        };
        VerificationReport {
            status,
            blocks_checked: verdicts.len(),
            verdicts,
        }
    }
}

/// Checks the block sitting at `position` (1-based) against its own fields
/// and against the stored hash of `predecessor`, the block in the slot before
/// it. `None` means `block` is the first block of the chain.
///
/// The stored index is compared with the slot, never with the predecessor's
/// index, so an edited index flags only the edited block.
pub fn verify_single_block(
    block: &Block,
    position: u64,
    predecessor: Option<&Block>,
) -> BlockVerdict {
    let mut faults = Vec::new();

    if block.index != position {
        faults.push(BlockFault::IndexOutOfSequence { expected: position });
    }

    let expected_previous = predecessor.map_or(GENESIS_PREVIOUS_HASH, |prev| prev.hash.as_str());

    let computed = block.recompute_hash();
    if computed != block.hash {
        faults.push(BlockFault::HashMismatch { computed });
    }

    if block.previous_hash != expected_previous {
        faults.push(BlockFault::PreviousHashMismatch {
            expected: expected_previous.to_string(),
        });
    }

    BlockVerdict {
        position,
        index: block.index,
        hash: block.hash.clone(),
        faults,
    }
}

/// Lazy walk over an index-ordered block slice. Stop early by dropping it or
/// with `take`, then `collect` into a `VerificationReport`.
pub struct ChainWalk<'a> {
    blocks: &'a [Block],
    pos: usize,
}

impl<'a> Iterator for ChainWalk<'a> {
    type Item = BlockVerdict;

    fn next(&mut self) -> Option<Self::Item> {
        let blocks = self.blocks;
        let block = blocks.get(self.pos)?;
        let predecessor = self.pos.checked_sub(1).map(|p| &blocks[p]);
        self.pos += 1;
        Some(verify_single_block(block, self.pos as u64, predecessor))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.blocks.len() - self.pos;
        (left, Some(left))
    }
}

pub fn walk(blocks: &[Block]) -> ChainWalk<'_> {
    ChainWalk { blocks, pos: 0 }
}

pub fn verify_blocks(blocks: &[Block]) -> VerificationReport {
    walk(blocks).collect()
}
