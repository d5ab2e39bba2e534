//! Settlement types for claim bookkeeping
//!
//! Each `(recipient, epoch)` pair moves through
//! `Unclaimed → InstantClaimed → FullyClaimed`, never skipping a state and
//! never moving back. `Unclaimed` is the absence of a `ClaimStatus`.

use serde::{Deserialize, Serialize};

use tranche_core::{Address, Amount, EpochId, Tranche};

pub const SECS_PER_DAY: u64 = 86_400;

/// Delay between the instant claim and the vested claim (90 days)
pub const VESTING_PERIOD_SECS: u64 = 90 * SECS_PER_DAY;

/// Instant share numerator in the reference 50/50 split
pub const INSTANT_RATIO: u64 = 1;

/// Share denominator in the reference 50/50 split
pub const TOTAL_RATIO: u64 = 2;

/// Where a `(recipient, epoch)` pair sits in the claim lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimPhase {
    /// No claim yet
    Unclaimed,
    /// Instant tranche released, vested tranche pending
    InstantClaimed,
    /// Both tranches released
    FullyClaimed,
}

/// Stored claim progress for one `(recipient, epoch)` pair.
///
/// The amount is bound by the proof checked at instant-claim time and
/// reused for the vested claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    InstantClaimed {
        amount: Amount,
        instant_at: u64,
    },
    FullyClaimed {
        amount: Amount,
        instant_at: u64,
        vested_at: u64,
    },
}

impl ClaimStatus {
    /// Proven entitlement this status is bound to
    pub fn amount(&self) -> Amount {
        match self {
            ClaimStatus::InstantClaimed { amount, .. } => *amount,
            ClaimStatus::FullyClaimed { amount, .. } => *amount,
        }
    }

    pub fn instant_at(&self) -> u64 {
        match self {
            ClaimStatus::InstantClaimed { instant_at, .. } => *instant_at,
            ClaimStatus::FullyClaimed { instant_at, .. } => *instant_at,
        }
    }

    pub fn phase(&self) -> ClaimPhase {
        match self {
            ClaimStatus::InstantClaimed { .. } => ClaimPhase::InstantClaimed,
            ClaimStatus::FullyClaimed { .. } => ClaimPhase::FullyClaimed,
        }
    }

    /// Transition to `FullyClaimed`. Only an instant-claimed status can
    /// vest; a fully claimed one is returned unchanged as `None`.
    pub fn vest(&self, vested_at: u64) -> Option<ClaimStatus> {
        match *self {
            ClaimStatus::InstantClaimed { amount, instant_at } => Some(ClaimStatus::FullyClaimed {
                amount,
                instant_at,
                vested_at,
            }),
            ClaimStatus::FullyClaimed { .. } => None,
        }
    }
}

/// Result of a successful claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub recipient: Address,
    pub epoch: EpochId,
    pub tranche: Tranche,
    /// Amount released by this claim
    pub released: Amount,
    /// Ledger time of the claim (unix seconds)
    pub at: u64,
}
