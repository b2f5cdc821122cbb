use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type CategoryId = u64;
pub type CandidateId = u64;

/// `previous_hash` of the first block. There is no index-0 block.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Timestamp layout used in the hash input. Part of the chain format.
pub const HASH_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S+00:00";

/// One voter's selections, keyed by category.
///
/// Backed by a `BTreeMap`, so the JSON form has a stable key order and the
/// same ballot always serializes to the same bytes.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Ballot(BTreeMap<CategoryId, CandidateId>);

impl Ballot {
    pub fn new() -> Self {
        Ballot(BTreeMap::new())
    }

    pub fn select(mut self, category: CategoryId, candidate: CandidateId) -> Self {
        self.0.insert(category, candidate);
        self
    }

    pub fn selections(&self) -> impl Iterator<Item = (CategoryId, CandidateId)> + '_ {
        self.0.iter().map(|(cat, cand)| (*cat, *cand))
    }

    pub fn categories(&self) -> impl Iterator<Item = CategoryId> + '_ {
        self.0.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_canonical_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

impl FromIterator<(CategoryId, CandidateId)> for Ballot {
    fn from_iter<I: IntoIterator<Item = (CategoryId, CandidateId)>>(iter: I) -> Self {
        Ballot(iter.into_iter().collect())
    }
}

/// What the identity service vouches for when it forwards a ballot.
/// The ledger checks it but never persists voter state.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VoterAssertion {
    pub voter: String,
    pub department: String,
    pub has_voted: bool,
    pub eligible_categories: BTreeSet<CategoryId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    /// Sealed ballot token, see `cipher`.
    pub payload: String,
    pub previous_hash: String,
    pub hash: String,
    /// Reserved. Not part of the hash input.
    #[serde(default)]
    pub nonce: u64,
}

impl Block {
    /// Builds a block and computes its hash. The timestamp is truncated to
    /// whole seconds so the stored value and the hashed text agree.
    pub fn seal(
        index: u64,
        timestamp: DateTime<Utc>,
        payload: String,
        previous_hash: String,
    ) -> Self {
        let timestamp = timestamp.trunc_subsecs(0);
        let hash = compute_hash(index, &timestamp, &payload, &previous_hash);
        Block {
            index,
            timestamp,
            payload,
            previous_hash,
            hash,
            nonce: 0,
        }
    }

    pub fn recompute_hash(&self) -> String {
        compute_hash(self.index, &self.timestamp, &self.payload, &self.previous_hash)
    }

    pub fn timestamp_string(&self) -> String {
        hash_timestamp(&self.timestamp)
    }
}

pub fn hash_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(HASH_TIMESTAMP_FORMAT).to_string()
}

/// `index || timestamp || payload || previous_hash` with no separators.
///
/// Timestamp and previous hash are fixed width, which keeps the field
/// boundaries recoverable for well-formed blocks. Changing this layout
/// invalidates every existing chain.
pub fn canonical_bytes(
    index: u64,
    timestamp: &DateTime<Utc>,
    payload: &str,
    previous_hash: &str,
) -> Vec<u8> {
    format!(
        "{}{}{}{}",
        index,
        hash_timestamp(timestamp),
        payload,
        previous_hash
    )
    .into_bytes()
}

pub fn compute_hash(
    index: u64,
    timestamp: &DateTime<Utc>,
    payload: &str,
    previous_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(index, timestamp, payload, previous_hash));
    format!("{:x}", hasher.finalize())
}

/// Confirmation handed to the voter once their block is durable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub index: u64,
    pub timestamp: String,
    pub encrypted_vote: String,
    pub block_hash: String,
}

impl From<&Block> for Receipt {
    fn from(block: &Block) -> Self {
        Receipt {
            index: block.index,
            timestamp: block.timestamp_string(),
            encrypted_vote: block.payload.clone(),
            block_hash: block.hash.clone(),
        }
    }
}

impl Receipt {
    /// Plain-text form offered for download.
    pub fn render(&self) -> String {
        format!(
            "Vote Confirmation\nTimestamp: {}\nEncrypted Vote: {}\nBlock Hash: {}\n",
            self.timestamp, self.encrypted_vote, self.block_hash
        )
    }
}
