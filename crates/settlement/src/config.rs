//! Claims configuration

use serde::{Deserialize, Serialize};

use tranche_core::Amount;

use crate::{Result, SettlementError, INSTANT_RATIO, TOTAL_RATIO, VESTING_PERIOD_SECS};

/// Release parameters for the claims engine.
///
/// Fixed for the lifetime of a ledger: changing the ratio or the vesting
/// period mid-cycle would treat claimants of the same batch differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimsConfig {
    /// Delay between the instant claim and the vested claim (seconds)
    pub vesting_period_secs: u64,
    /// Numerator of the instant share
    pub instant_ratio: u64,
    /// Denominator of both shares
    pub total_ratio: u64,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self::reference()
    }
}

impl ClaimsConfig {
    /// 50/50 split with a 90-day vesting delay
    pub fn reference() -> Self {
        Self {
            vesting_period_secs: VESTING_PERIOD_SECS,
            instant_ratio: INSTANT_RATIO,
            total_ratio: TOTAL_RATIO,
        }
    }

    pub fn with_vesting_period(mut self, secs: u64) -> Self {
        self.vesting_period_secs = secs;
        self
    }

    pub fn with_ratio(mut self, instant: u64, total: u64) -> Self {
        self.instant_ratio = instant;
        self.total_ratio = total;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.total_ratio == 0 {
            return Err(SettlementError::Config("total_ratio must be non-zero".to_string()));
        }
        if self.instant_ratio > self.total_ratio {
            return Err(SettlementError::Config(format!(
                "instant_ratio {} exceeds total_ratio {}",
                self.instant_ratio, self.total_ratio,
            )));
        }
        Ok(())
    }

    /// Instant tranche of `amount`, rounded down.
    ///
    /// Computed as `q * instant + r * instant / total` with
    /// `amount = q * total + r`, which is exact and cannot overflow.
    pub fn instant_share(&self, amount: Amount) -> Amount {
        let total = self.total_ratio as u128;
        let instant = self.instant_ratio as u128;
        (amount / total) * instant + (amount % total) * instant / total
    }

    /// Vested tranche: whatever the instant tranche left over, so the two
    /// always sum to `amount`.
    pub fn vested_share(&self, amount: Amount) -> Amount {
        amount - self.instant_share(amount)
    }
}
