//! Error types for the ballot ledger

use std::io;

use thiserror::Error;

use crate::models::CategoryId;

/// Failures of the payload cipher.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Invalid payload key: {0}")]
    InvalidKey(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Malformed token, failed tag check, or wrong key.
    #[error("Decryption error: {0}")]
    Decryption(String),
}

/// Failures of the durable block store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Corrupt record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Index conflict: expected {expected}, got {found}")]
    IndexConflict { expected: u64, found: u64 },
}

/// Why a voter assertion was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IneligibleReason {
    AlreadyVoted,
    EmptyBallot,
    CategoryNotEligible(CategoryId),
}

impl std::fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IneligibleReason::AlreadyVoted => write!(f, "ballot already cast"),
            IneligibleReason::EmptyBallot => write!(f, "ballot has no selections"),
            IneligibleReason::CategoryNotEligible(category) => {
                write!(f, "not eligible for category {}", category)
            }
        }
    }
}

/// Errors surfaced by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("Ballot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Voter {voter} cannot vote: {reason}")]
    IneligibleVote { voter: String, reason: IneligibleReason },

    /// The block was built but not durably recorded. Before retrying, check
    /// whether a block with `index` now exists.
    #[error("Failed to append block {index}: {source}")]
    Append {
        index: u64,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No block matches {0}")]
    NotFound(String),
}

/// Errors raised while loading process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("Key file {path} is missing and the ledger already holds {blocks} blocks")]
    MissingKey { path: String, blocks: usize },

    #[error("Key file I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Cipher(#[from] CipherError),
}

pub type CipherResult<T> = Result<T, CipherError>;

pub type StoreResult<T> = Result<T, StoreError>;

pub type LedgerResult<T> = Result<T, LedgerError>;
