//! Epoch controller.
//!
//! Epoch boundaries are operator-driven. Advancing never invalidates
//! deposits of the old epoch; they stay tagged with their epoch id and get
//! batched whenever the operator builds a tree over it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use tranche_core::{Address, EpochId, GENESIS_EPOCH};

use crate::authority::{require, AdminAction, Authority};
use crate::{Result, SettlementError};

/// A batching window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub id: EpochId,
    /// When the epoch was opened (unix seconds)
    pub started_at: u64,
    /// Sequence number of the first deposit that can land in this epoch
    pub first_sequence: u64,
}

pub struct EpochController {
    /// Every epoch opened so far; the last one is current. Never empty.
    history: Vec<Epoch>,
    authority: Arc<dyn Authority>,
}

impl EpochController {
    /// Open the genesis epoch.
    pub fn new(authority: Arc<dyn Authority>, started_at: u64) -> Self {
        Self {
            history: vec![Epoch {
                id: GENESIS_EPOCH,
                started_at,
                first_sequence: 0,
            }],
            authority,
        }
    }

    /// Rebuild a controller from a saved history.
    ///
    /// The history must start at the genesis epoch with contiguous ids, and
    /// epoch starts may never move backwards in the log.
    pub fn restore(authority: Arc<dyn Authority>, history: Vec<Epoch>) -> Result<Self> {
        let Some(first) = history.first() else {
            return Err(SettlementError::Config("epoch history is empty".into()));
        };
        if first.id != GENESIS_EPOCH || first.first_sequence != 0 {
            return Err(SettlementError::Config(format!(
                "epoch history must open at genesis epoch {}",
                GENESIS_EPOCH
            )));
        }
        for pair in history.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.id != prev.id + 1 {
                return Err(SettlementError::Config(format!(
                    "epoch {} follows epoch {}",
                    next.id, prev.id
                )));
            }
            if next.first_sequence < prev.first_sequence {
                return Err(SettlementError::Config(format!(
                    "epoch {} starts before epoch {} in the log",
                    next.id, prev.id
                )));
            }
        }

        Ok(Self { history, authority })
    }

    pub fn current_epoch(&self) -> EpochId {
        self.current().id
    }

    pub fn current(&self) -> &Epoch {
        // history always holds the genesis epoch
        &self.history[self.history.len() - 1]
    }

    /// Close the current epoch and open the next one.
    ///
    /// `first_sequence` is the deposit log length at the moment of the
    /// switch, telling off-path consumers where the new epoch begins.
    pub fn advance_epoch(
        &mut self,
        caller: &Address,
        now: u64,
        first_sequence: u64,
    ) -> Result<EpochId> {
        require(self.authority.as_ref(), caller, AdminAction::AdvanceEpoch)?;

        let closed = self.current_epoch();
        let next = Epoch {
            id: closed + 1,
            started_at: now,
            first_sequence,
        };
        self.history.push(next);

        info!(
            "Advanced epoch {} → {} (first deposit #{})",
            closed, next.id, first_sequence,
        );
        Ok(next.id)
    }

    pub fn epoch(&self, id: EpochId) -> Option<&Epoch> {
        // ids are contiguous from GENESIS_EPOCH
        let index = id.checked_sub(GENESIS_EPOCH)?;
        self.history.get(usize::try_from(index).ok()?)
    }

    pub fn epochs(&self) -> &[Epoch] {
        &self.history
    }
}

impl std::fmt::Debug for EpochController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochController")
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}
