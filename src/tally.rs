//! Vote counts reconstructed from the ledger, with a coherent cache.
//!
//! The cached result is keyed by the ledger's length and head hash and is
//! checked against both on every read, so it goes stale at most until the next
//! read after an append. The time-to-live is a second, independent bound.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::Serialize;

use crate::cipher::PayloadCipher;
use crate::ledger::{tip_of, ChainTip, Ledger};
use crate::models::{Ballot, Block, CandidateId, CategoryId};

pub const DEFAULT_TALLY_TTL: Duration = Duration::from_secs(3600);

/// Category -> candidate -> votes.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Tally(BTreeMap<CategoryId, BTreeMap<CandidateId, u64>>);

impl Tally {
    pub fn add_ballot(&mut self, ballot: &Ballot) {
        for (category, candidate) in ballot.selections() {
            *self
                .0
                .entry(category)
                .or_default()
                .entry(candidate)
                .or_insert(0) += 1;
        }
    }

    pub fn count(&self, category: CategoryId, candidate: CandidateId) -> u64 {
        self.0
            .get(&category)
            .and_then(|c| c.get(&candidate))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self, category: CategoryId) -> u64 {
        self.0.get(&category).map_or(0, |c| c.values().sum())
    }

    /// Share of the category's votes, in percent. Zero when nobody voted.
    pub fn percentage(&self, category: CategoryId, candidate: CandidateId) -> f64 {
        let total = self.total(category);
        if total == 0 {
            return 0.0;
        }
        self.count(category, candidate) as f64 / total as f64 * 100.0
    }

    pub fn categories(&self) -> &BTreeMap<CategoryId, BTreeMap<CandidateId, u64>> {
        &self.0
    }
}

/// A block left out of the counts because it could not be opened or parsed.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SkippedBlock {
    pub index: u64,
    pub reason: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TallySnapshot {
    pub tally: Tally,
    pub skipped: Vec<SkippedBlock>,
    pub tip: ChainTip,
}

/// Decrypts and counts every block. Failures are per block: they are logged,
/// listed in the result, and never stop the rest of the count.
pub fn aggregate<'a, I>(blocks: I, cipher: &PayloadCipher) -> (Tally, Vec<SkippedBlock>)
where
    I: IntoIterator<Item = &'a Block>,
{
    let mut tally = Tally::default();
    let mut skipped = Vec::new();

    for block in blocks {
        let ballot = cipher
            .decrypt(&block.payload)
            .map_err(|e| e.to_string())
            .and_then(|plain| Ballot::from_json(&plain).map_err(|e| format!("bad ballot: {}", e)));
        match ballot {
            Ok(ballot) => tally.add_ballot(&ballot),
            Err(reason) => {
                warn!("Skipping block {} in tally: {}", block.index, reason);
                skipped.push(SkippedBlock {
                    index: block.index,
                    reason,
                });
            }
        }
    }

    (tally, skipped)
}

struct CachedTally {
    snapshot: Arc<TallySnapshot>,
    expires_at: Instant,
}

pub struct TallyAggregator {
    ttl: Duration,
    cache: RwLock<Option<CachedTally>>,
}

impl TallyAggregator {
    pub fn new(ttl: Duration) -> Self {
        TallyAggregator {
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Returns the cached counts when they still describe the ledger's
    /// current tip, otherwise recounts from a snapshot of the ledger.
    pub fn get_tally(&self, ledger: &Ledger) -> Arc<TallySnapshot> {
        let current = ledger.tip();
        if let Some(cached) = self.cache.read().as_ref() {
            if cached.snapshot.tip == current && Instant::now() < cached.expires_at {
                debug!("Tally cache hit at length {}", current.length);
                return Arc::clone(&cached.snapshot);
            }
        }

        let blocks = ledger.snapshot();
        let (tally, skipped) = aggregate(blocks.iter(), ledger.cipher());
        info!(
            "Tally recomputed over {} blocks ({} skipped)",
            blocks.len(),
            skipped.len()
        );

        let snapshot = Arc::new(TallySnapshot {
            tally,
            skipped,
            tip: tip_of(&blocks),
        });
        *self.cache.write() = Some(CachedTally {
            snapshot: Arc::clone(&snapshot),
            expires_at: Instant::now() + self.ttl,
        });
        snapshot
    }

    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }
}

impl Default for TallyAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_TALLY_TTL)
    }
}
