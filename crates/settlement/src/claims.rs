//! Phased claims engine.
//!
//! The instant claim is the only proof-gated step: it verifies
//! `(recipient, amount, epoch)` against the active root and binds the
//! amount into the claim status. The vested claim reuses that bound amount,
//! so it keeps working after the root has been rotated.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use tranche_core::{short_hex, Address, Amount, EpochId, Tranche};
use tranche_prover::{verify_entitlement, MerkleProof};

use crate::authority::{require, AdminAction, Authority};
use crate::payout::Payout;
use crate::{ClaimPhase, ClaimReceipt, ClaimStatus, ClaimsConfig, Result, SettlementError};

/// Per-call environment of a claim: where value goes and when it happens
pub struct ClaimContext<'a> {
    pub payout: &'a mut dyn Payout,
    /// Unix seconds
    pub now: u64,
}

pub struct ClaimsEngine {
    config: ClaimsConfig,
    statuses: HashMap<(Address, EpochId), ClaimStatus>,
    authority: Arc<dyn Authority>,
    halted: bool,
}

impl ClaimsEngine {
    pub fn new(config: ClaimsConfig, authority: Arc<dyn Authority>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            statuses: HashMap::new(),
            authority,
            halted: false,
        })
    }

    /// Claim the instant tranche.
    ///
    /// Fails with `ProofInvalid` unless the proof verifies against
    /// `active_root`; a superseded root is never accepted here. The payout
    /// runs before the status is written, so a failed transfer leaves the
    /// pair unclaimed.
    pub fn claim_instant(
        &mut self,
        ctx: ClaimContext<'_>,
        active_root: Option<&[u8; 32]>,
        recipient: Address,
        amount: Amount,
        epoch: EpochId,
        proof: &MerkleProof,
    ) -> Result<ClaimReceipt> {
        let ClaimContext { payout, now } = ctx;
        if self.halted {
            return Err(SettlementError::Halted);
        }
        let root = active_root.ok_or(SettlementError::NoActiveRoot)?;

        if !verify_entitlement(root, &recipient, amount, epoch, proof) {
            warn!(
                "Invalid proof from {} for amount {} in epoch {}",
                short_hex(&recipient),
                amount,
                epoch,
            );
            return Err(SettlementError::ProofInvalid);
        }

        let key = (recipient, epoch);
        if self.statuses.contains_key(&key) {
            return Err(SettlementError::AlreadyClaimed);
        }

        let released = self.config.instant_share(amount);
        payout
            .release(&recipient, epoch, Tranche::Instant, released)
            .map_err(|e| SettlementError::TransferFailed(e.to_string()))?;

        self.statuses.insert(key, ClaimStatus::InstantClaimed {
            amount,
            instant_at: now,
        });

        info!(
            "Instant claim by {} (epoch {}): released {} of {}",
            short_hex(&recipient),
            epoch,
            released,
            amount,
        );

        Ok(ClaimReceipt {
            recipient,
            epoch,
            tranche: Tranche::Instant,
            released,
            at: now,
        })
    }

    /// Claim the vested tranche.
    ///
    /// Checks, in order: an instant claim exists, the vested tranche is
    /// still open, the vesting period has elapsed, and `amount` equals the
    /// amount proven at instant-claim time.
    pub fn claim_vested(
        &mut self,
        ctx: ClaimContext<'_>,
        recipient: Address,
        amount: Amount,
        epoch: EpochId,
    ) -> Result<ClaimReceipt> {
        let ClaimContext { payout, now } = ctx;
        if self.halted {
            return Err(SettlementError::Halted);
        }

        let key = (recipient, epoch);
        let status = match self.statuses.get(&key) {
            None => return Err(SettlementError::NotYetInstantClaimed),
            Some(ClaimStatus::FullyClaimed { .. }) => return Err(SettlementError::AlreadyClaimed),
            Some(status) => *status,
        };

        let unlocks_at = self.unlock_time(&status);
        if now < unlocks_at {
            return Err(SettlementError::VestingNotElapsed { unlocks_at });
        }

        if amount != status.amount() {
            warn!(
                "Vested claim by {} (epoch {}) with amount {}, proven {}",
                short_hex(&recipient),
                epoch,
                amount,
                status.amount(),
            );
            return Err(SettlementError::AmountMismatch {
                expected: status.amount(),
                got: amount,
            });
        }

        let vested = status.vest(now).ok_or(SettlementError::AlreadyClaimed)?;
        let released = self.config.vested_share(amount);
        payout
            .release(&recipient, epoch, Tranche::Vested, released)
            .map_err(|e| SettlementError::TransferFailed(e.to_string()))?;

        self.statuses.insert(key, vested);

        info!(
            "Vested claim by {} (epoch {}): released {} of {}",
            short_hex(&recipient),
            epoch,
            released,
            amount,
        );

        Ok(ClaimReceipt {
            recipient,
            epoch,
            tranche: Tranche::Vested,
            released,
            at: now,
        })
    }

    /// Halt or resume both claim kinds.
    pub fn set_halted(&mut self, caller: &Address, halted: bool) -> Result<()> {
        require(self.authority.as_ref(), caller, AdminAction::HaltClaims)?;
        self.halted = halted;
        info!("Claims {}", if halted { "halted" } else { "resumed" });
        Ok(())
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn status(&self, recipient: &Address, epoch: EpochId) -> Option<ClaimStatus> {
        self.statuses.get(&(*recipient, epoch)).copied()
    }

    pub fn phase(&self, recipient: &Address, epoch: EpochId) -> ClaimPhase {
        self.status(recipient, epoch)
            .map(|s| s.phase())
            .unwrap_or(ClaimPhase::Unclaimed)
    }

    /// When the vested tranche unlocks. `None` before the instant claim
    /// and after the vested claim.
    pub fn claimable_at(&self, recipient: &Address, epoch: EpochId) -> Option<u64> {
        match self.status(recipient, epoch)? {
            status @ ClaimStatus::InstantClaimed { .. } => Some(self.unlock_time(&status)),
            ClaimStatus::FullyClaimed { .. } => None,
        }
    }

    pub fn config(&self) -> &ClaimsConfig {
        &self.config
    }

    fn unlock_time(&self, status: &ClaimStatus) -> u64 {
        status.instant_at().saturating_add(self.config.vesting_period_secs)
    }
}

impl std::fmt::Debug for ClaimsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimsEngine")
            .field("config", &self.config)
            .field("claims", &self.statuses.len())
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}
