//! Tranche Settlement
//!
//! The on-ledger half of the system: epoch control, the deposit registry,
//! the root publisher and the phased claims engine, composed behind a
//! serialized `Ledger`.
//!
//! ## Claim Flow
//!
//! 1. **Deposit**: a holder deposits for a recipient. The record is stamped
//!    with the current epoch and appended to the deposit log.
//! 2. **Publish**: an operator replays the log off-path, builds the Merkle
//!    distribution and publishes its root.
//! 3. **Instant claim**: the recipient proves `(recipient, amount, epoch)`
//!    against the active root and receives the instant tranche:
//!    `amount * instant_ratio / total_ratio`.
//! 4. **Vested claim**: once the vesting period has passed since the
//!    instant claim, the remainder is released. No proof is needed; the
//!    amount is bound by the instant claim.

mod authority;
mod claims;
mod clock;
mod config;
mod epoch;
mod ledger;
mod payout;
mod publisher;
mod registry;
mod types;

pub use authority::{AdminAction, Authority, KeySetAuthority, SingleKeyAuthority};
pub use claims::{ClaimContext, ClaimsEngine};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ClaimsConfig;
pub use epoch::{Epoch, EpochController};
pub use ledger::Ledger;
pub use payout::{Payout, PayoutError, Release, RecordingPayout};
pub use publisher::RootPublisher;
pub use registry::DepositRegistry;
pub use types::*;

use thiserror::Error;

use tranche_core::{Amount, LogError};

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Invalid Merkle proof for the active root")]
    ProofInvalid,

    #[error("Already claimed")]
    AlreadyClaimed,

    #[error("Instant tranche has not been claimed yet")]
    NotYetInstantClaimed,

    #[error("Vesting period not elapsed (unlocks at {unlocks_at})")]
    VestingNotElapsed { unlocks_at: u64 },

    #[error("Amount mismatch: proven {expected}, got {got}")]
    AmountMismatch { expected: Amount, got: Amount },

    #[error("Deposit amount must be greater than zero")]
    InvalidAmount,

    #[error("Recipient must not be the null address")]
    InvalidRecipient,

    #[error("No root has been published")]
    NoActiveRoot,

    #[error("Operation halted by the administrative authority")]
    Halted,

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Deposit log error: {0}")]
    Log(#[from] LogError),
}

impl SettlementError {
    /// True when the same request can succeed later without changes.
    ///
    /// Everything else needs different input (a valid proof, the proven
    /// amount) or an administrative action.
    pub fn is_retryable_later(&self) -> bool {
        matches!(self, SettlementError::VestingNotElapsed { .. })
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;
