//! Tamper-evident ballot ledger: hash-chained blocks of encrypted ballots,
//! chain verification, and cached tallies.

pub mod cipher;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod service;
pub mod store;
pub mod tally;
pub mod verifier;

pub use cipher::{PayloadCipher, PayloadKey};
pub use error::{CipherError, ConfigError, IneligibleReason, LedgerError, StoreError};
pub use ledger::{ChainTip, Ledger};
pub use models::{Ballot, Block, Receipt, VoterAssertion, GENESIS_PREVIOUS_HASH};
pub use tally::{Tally, TallyAggregator, TallySnapshot};
pub use verifier::{BlockFault, BlockVerdict, ChainStatus, VerificationReport};
