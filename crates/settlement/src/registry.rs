//! Deposit registry: the only write path into the deposit log.
//!
//! The registry owns the epoch controller, so every record is stamped with
//! the epoch that is current when it is appended.

use std::sync::Arc;

use tracing::info;

use tranche_core::{
    short_hex, Address, Amount, DepositDraft, DepositLog, DepositRecord, EpochId, LogReader,
    NULL_ADDRESS,
};

use crate::authority::{require, AdminAction, Authority};
use crate::epoch::{Epoch, EpochController};
use crate::{Result, SettlementError};

pub struct DepositRegistry {
    log: Arc<dyn DepositLog>,
    epochs: EpochController,
    authority: Arc<dyn Authority>,
    halted: bool,
}

impl DepositRegistry {
    pub fn new(
        log: Arc<dyn DepositLog>,
        epochs: EpochController,
        authority: Arc<dyn Authority>,
    ) -> Self {
        Self {
            log,
            epochs,
            authority,
            halted: false,
        }
    }

    /// Accept a deposit into the current epoch.
    ///
    /// The appended record is the deposit notification: it carries the
    /// full `(depositor, recipient, amount, epoch)` and its sequence.
    pub fn deposit(
        &self,
        depositor: Address,
        recipient: Address,
        amount: Amount,
    ) -> Result<DepositRecord> {
        if self.halted {
            return Err(SettlementError::Halted);
        }
        if amount == 0 {
            return Err(SettlementError::InvalidAmount);
        }
        if recipient == NULL_ADDRESS {
            return Err(SettlementError::InvalidRecipient);
        }

        let epoch = self.epochs.current_epoch();
        let record = self.log.append(DepositDraft {
            depositor,
            recipient,
            amount,
            epoch,
        })?;

        info!(
            "Deposit #{}: {} → {} amount {} (epoch {})",
            record.sequence,
            short_hex(&depositor),
            short_hex(&recipient),
            amount,
            epoch,
        );
        Ok(record)
    }

    /// Close the current epoch and open the next one at the current log
    /// length.
    pub fn advance_epoch(&mut self, caller: &Address, now: u64) -> Result<EpochId> {
        let first_sequence = self.log.len()?;
        self.epochs.advance_epoch(caller, now, first_sequence)
    }

    pub fn current_epoch(&self) -> EpochId {
        self.epochs.current_epoch()
    }

    pub fn epoch(&self, id: EpochId) -> Option<&Epoch> {
        self.epochs.epoch(id)
    }

    pub fn epochs(&self) -> &[Epoch] {
        self.epochs.epochs()
    }

    /// Halt or resume deposits.
    pub fn set_halted(&mut self, caller: &Address, halted: bool) -> Result<()> {
        require(self.authority.as_ref(), caller, AdminAction::HaltDeposits)?;
        self.halted = halted;
        info!("Deposits {}", if halted { "halted" } else { "resumed" });
        Ok(())
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Replay-only view of the deposit log
    pub fn reader(&self) -> LogReader {
        LogReader::new(self.log.clone())
    }
}

impl std::fmt::Debug for DepositRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepositRegistry")
            .field("epochs", &self.epochs)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SingleKeyAuthority;
    use tranche_core::{DepositSource, MemoryDepositLog};

    const ADMIN: Address = [0xAD; 32];

    fn registry() -> DepositRegistry {
        let authority: Arc<dyn Authority> = Arc::new(SingleKeyAuthority::new(ADMIN));
        DepositRegistry::new(
            Arc::new(MemoryDepositLog::new()),
            EpochController::new(authority.clone(), 1_000),
            authority,
        )
    }

    #[test]
    fn test_deposit_appends_record() {
        let reg = registry();
        let record = reg.deposit([1u8; 32], [2u8; 32], 10).unwrap();

        assert_eq!(record.sequence, 0);
        assert_eq!(record.depositor, [1u8; 32]);
        assert_eq!(record.recipient, [2u8; 32]);
        assert_eq!(record.amount, 10);
        assert_eq!(record.epoch, 1);
        assert_eq!(reg.reader().replay(0).unwrap(), vec![record]);
    }

    #[test]
    fn test_deposit_stamped_with_current_epoch() {
        let mut reg = registry();
        let before = reg.deposit([1u8; 32], [2u8; 32], 10).unwrap();
        assert_eq!(before.epoch, 1);

        assert_eq!(reg.advance_epoch(&ADMIN, 2_000).unwrap(), 2);
        let after = reg.deposit([1u8; 32], [2u8; 32], 10).unwrap();
        assert_eq!(after.epoch, 2);

        // The new epoch starts right after the last deposit of the old one
        assert_eq!(reg.epoch(2).unwrap().first_sequence, 1);
        assert_eq!(reg.current_epoch(), 2);
    }

    #[test]
    fn test_advance_epoch_requires_authority() {
        let mut reg = registry();
        assert!(matches!(
            reg.advance_epoch(&[0x01; 32], 2_000),
            Err(SettlementError::NotAuthorized)
        ));
        assert_eq!(reg.deposit([1u8; 32], [2u8; 32], 10).unwrap().epoch, 1);
    }

    #[test]
    fn test_zero_amount_rejected() {
        let reg = registry();
        assert!(matches!(
            reg.deposit([1u8; 32], [2u8; 32], 0),
            Err(SettlementError::InvalidAmount)
        ));
        assert!(reg.reader().is_empty().unwrap());
    }

    #[test]
    fn test_null_recipient_rejected() {
        let reg = registry();
        assert!(matches!(
            reg.deposit([1u8; 32], NULL_ADDRESS, 10),
            Err(SettlementError::InvalidRecipient)
        ));
    }

    #[test]
    fn test_halt_blocks_deposits() {
        let mut reg = registry();
        reg.set_halted(&ADMIN, true).unwrap();
        assert!(matches!(
            reg.deposit([1u8; 32], [2u8; 32], 10),
            Err(SettlementError::Halted)
        ));

        reg.set_halted(&ADMIN, false).unwrap();
        assert!(reg.deposit([1u8; 32], [2u8; 32], 10).is_ok());
    }

    #[test]
    fn test_halt_requires_authority() {
        let mut reg = registry();
        assert!(matches!(
            reg.set_halted(&[0x01; 32], true),
            Err(SettlementError::NotAuthorized)
        ));
        assert!(!reg.is_halted());
    }
}
