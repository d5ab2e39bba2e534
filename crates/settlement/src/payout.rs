//! Release sink.
//!
//! The claims engine decides when and how much a recipient may receive;
//! moving value is someone else's job. A `Payout` is called before the
//! claim status is committed, so a failed release leaves no trace.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use tranche_core::{Address, Amount, EpochId, Tranche};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PayoutError(pub String);

pub trait Payout: Send {
    fn release(
        &mut self,
        recipient: &Address,
        epoch: EpochId,
        tranche: Tranche,
        amount: Amount,
    ) -> Result<(), PayoutError>;
}

/// One release, as recorded by `RecordingPayout`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    pub recipient: Address,
    pub epoch: EpochId,
    pub tranche: Tranche,
    pub amount: Amount,
}

#[derive(Debug, Default)]
struct Journal {
    releases: Vec<Release>,
    balances: HashMap<Address, Amount>,
    /// Fail the next release (test hook)
    fail_next: Option<String>,
}

/// In-memory payout that records every release and per-recipient totals.
///
/// Clones share the same journal, so a test can keep a handle after
/// moving one into the ledger.
#[derive(Debug, Clone, Default)]
pub struct RecordingPayout {
    journal: Arc<Mutex<Journal>>,
}

impl RecordingPayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total released to a recipient across all epochs and tranches
    pub fn balance(&self, recipient: &Address) -> Amount {
        self.journal.lock().balances.get(recipient).copied().unwrap_or(0)
    }

    /// Total released for one `(recipient, epoch)` pair
    pub fn released_for(&self, recipient: &Address, epoch: EpochId) -> Amount {
        self.journal
            .lock()
            .releases
            .iter()
            .filter(|r| r.recipient == *recipient && r.epoch == epoch)
            .map(|r| r.amount)
            .sum()
    }

    pub fn releases(&self) -> Vec<Release> {
        self.journal.lock().releases.clone()
    }

    /// Make the next `release` call fail with the given reason.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.journal.lock().fail_next = Some(reason.into());
    }
}

impl Payout for RecordingPayout {
    fn release(
        &mut self,
        recipient: &Address,
        epoch: EpochId,
        tranche: Tranche,
        amount: Amount,
    ) -> Result<(), PayoutError> {
        let mut journal = self.journal.lock();
        if let Some(reason) = journal.fail_next.take() {
            return Err(PayoutError(reason));
        }

        let balance = journal.balances.entry(*recipient).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| PayoutError("recipient balance overflow".to_string()))?;

        journal.releases.push(Release {
            recipient: *recipient,
            epoch,
            tranche,
            amount,
        });
        Ok(())
    }
}
