//! Serialized ledger facade.
//!
//! Every state-changing operation runs under one lock over the whole ledger
//! state, so two claims for the same `(recipient, epoch)` can never both
//! observe `Unclaimed`. Time comes from the injected `Clock`; value moves
//! through the injected `Payout`.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use tranche_core::{Address, Amount, DepositLog, DepositRecord, EpochId, LogReader};
use tranche_prover::MerkleProof;

use crate::authority::Authority;
use crate::clock::Clock;
use crate::payout::Payout;
use crate::{
    ClaimContext, ClaimPhase, ClaimReceipt, ClaimStatus, ClaimsConfig, ClaimsEngine,
    DepositRegistry, Epoch, EpochController, Result, RootPublisher,
};

struct LedgerState {
    registry: DepositRegistry,
    publisher: RootPublisher,
    claims: ClaimsEngine,
    payout: Box<dyn Payout>,
}

pub struct Ledger {
    state: Mutex<LedgerState>,
    clock: Arc<dyn Clock>,
    reader: LogReader,
}

impl Ledger {
    /// Create a ledger at the genesis epoch, started at the clock's now.
    ///
    /// The ledger takes the log over; afterwards deposits only enter it
    /// through [`Ledger::deposit`].
    pub fn new(
        config: ClaimsConfig,
        authority: Arc<dyn Authority>,
        clock: Arc<dyn Clock>,
        log: impl DepositLog + 'static,
        payout: Box<dyn Payout>,
    ) -> Result<Self> {
        let claims = ClaimsEngine::new(config, authority.clone())?;
        let epochs = EpochController::new(authority.clone(), clock.now());
        let registry = DepositRegistry::new(Arc::new(log), epochs, authority.clone());
        let reader = registry.reader();
        let state = LedgerState {
            registry,
            publisher: RootPublisher::new(authority),
            claims,
            payout,
        };

        debug!("Ledger created with {:?}", config);

        Ok(Self {
            state: Mutex::new(state),
            clock,
            reader,
        })
    }

    // ==================== Epochs ====================

    pub fn current_epoch(&self) -> EpochId {
        self.state.lock().registry.current_epoch()
    }

    pub fn epoch(&self, id: EpochId) -> Option<Epoch> {
        self.state.lock().registry.epoch(id).copied()
    }

    /// Close the current epoch. Deposits accepted after this call land in
    /// the new one.
    pub fn advance_epoch(&self, caller: &Address) -> Result<EpochId> {
        let now = self.clock.now();
        self.state.lock().registry.advance_epoch(caller, now)
    }

    // ==================== Deposits ====================

    /// Deposit for `recipient`, stamped with the current epoch.
    pub fn deposit(
        &self,
        depositor: Address,
        recipient: Address,
        amount: Amount,
    ) -> Result<DepositRecord> {
        self.state.lock().registry.deposit(depositor, recipient, amount)
    }

    pub fn halt_deposits(&self, caller: &Address, halted: bool) -> Result<()> {
        self.state.lock().registry.set_halted(caller, halted)
    }

    pub fn deposits_halted(&self) -> bool {
        self.state.lock().registry.is_halted()
    }

    /// Replay-only handle on the deposit log, for off-path consumers
    pub fn log(&self) -> LogReader {
        self.reader.clone()
    }

    // ==================== Roots ====================

    pub fn publish_root(&self, caller: &Address, root: [u8; 32]) -> Result<()> {
        let now = self.clock.now();
        self.state.lock().publisher.publish(caller, root, now)
    }

    pub fn active_root(&self) -> Option<[u8; 32]> {
        self.state.lock().publisher.active_root().copied()
    }

    pub fn prior_root(&self) -> Option<[u8; 32]> {
        self.state.lock().publisher.prior_root().copied()
    }

    pub fn root_replaced_at(&self) -> Option<u64> {
        self.state.lock().publisher.replaced_at()
    }

    // ==================== Claims ====================

    pub fn claim_instant(
        &self,
        recipient: Address,
        amount: Amount,
        epoch: EpochId,
        proof: &MerkleProof,
    ) -> Result<ClaimReceipt> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let root = state.publisher.active_root().copied();
        let ctx = ClaimContext {
            payout: state.payout.as_mut(),
            now,
        };
        state
            .claims
            .claim_instant(ctx, root.as_ref(), recipient, amount, epoch, proof)
    }

    pub fn claim_vested(
        &self,
        recipient: Address,
        amount: Amount,
        epoch: EpochId,
    ) -> Result<ClaimReceipt> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let ctx = ClaimContext {
            payout: state.payout.as_mut(),
            now,
        };
        state.claims.claim_vested(ctx, recipient, amount, epoch)
    }

    pub fn halt_claims(&self, caller: &Address, halted: bool) -> Result<()> {
        self.state.lock().claims.set_halted(caller, halted)
    }

    pub fn claims_halted(&self) -> bool {
        self.state.lock().claims.is_halted()
    }

    pub fn claim_status(&self, recipient: &Address, epoch: EpochId) -> Option<ClaimStatus> {
        self.state.lock().claims.status(recipient, epoch)
    }

    pub fn claim_phase(&self, recipient: &Address, epoch: EpochId) -> ClaimPhase {
        self.state.lock().claims.phase(recipient, epoch)
    }

    pub fn claimable_at(&self, recipient: &Address, epoch: EpochId) -> Option<u64> {
        self.state.lock().claims.claimable_at(recipient, epoch)
    }

    pub fn config(&self) -> ClaimsConfig {
        *self.state.lock().claims.config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, RecordingPayout, SettlementError, SingleKeyAuthority, SECS_PER_DAY};
    use std::thread;
    use tranche_core::MemoryDepositLog;
    use tranche_prover::MerkleTree;

    const ADMIN: Address = [0xAD; 32];
    const HOLDER: Address = [0x11; 32];
    const ALICE: Address = [0xA1; 32];
    const T0: u64 = 1_700_000_000;

    fn ledger() -> (Ledger, ManualClock, RecordingPayout) {
        let clock = ManualClock::new(T0);
        let payout = RecordingPayout::new();
        let ledger = Ledger::new(
            ClaimsConfig::reference(),
            Arc::new(SingleKeyAuthority::new(ADMIN)),
            Arc::new(clock.clone()),
            MemoryDepositLog::new(),
            Box::new(payout.clone()),
        )
        .unwrap();
        (ledger, clock, payout)
    }

    #[test]
    fn test_deposit_stamped_with_current_epoch() {
        let (ledger, clock, _) = ledger();
        let first = ledger.deposit(HOLDER, ALICE, 10).unwrap();
        assert_eq!(first.epoch, 1);

        clock.advance(60);
        assert_eq!(ledger.advance_epoch(&ADMIN).unwrap(), 2);

        let second = ledger.deposit(HOLDER, ALICE, 5).unwrap();
        assert_eq!(second.epoch, 2);
        assert_eq!(second.sequence, 1);

        let epoch2 = ledger.epoch(2).unwrap();
        assert_eq!(epoch2.started_at, T0 + 60);
        assert_eq!(epoch2.first_sequence, 1);
    }

    #[test]
    fn test_rotated_root_rejects_old_proofs() {
        let (ledger, clock, _) = ledger();
        let old = MerkleTree::from_entries(&[(ALICE, 10, 1)]);
        let new = MerkleTree::from_entries(&[(ALICE, 12, 1)]);

        ledger.publish_root(&ADMIN, old.root()).unwrap();
        clock.advance(5);
        ledger.publish_root(&ADMIN, new.root()).unwrap();

        assert_eq!(ledger.prior_root(), Some(old.root()));
        assert_eq!(ledger.root_replaced_at(), Some(T0 + 5));

        let stale = old.proof(0).unwrap();
        assert!(matches!(
            ledger.claim_instant(ALICE, 10, 1, &stale),
            Err(SettlementError::ProofInvalid)
        ));

        let fresh = new.proof(0).unwrap();
        assert_eq!(ledger.claim_instant(ALICE, 12, 1, &fresh).unwrap().released, 6);
    }

    #[test]
    fn test_vested_claim_survives_root_rotation() {
        let (ledger, clock, payout) = ledger();
        let tree = MerkleTree::from_entries(&[(ALICE, 15, 1)]);
        ledger.publish_root(&ADMIN, tree.root()).unwrap();
        ledger.claim_instant(ALICE, 15, 1, &tree.proof(0).unwrap()).unwrap();

        ledger.publish_root(&ADMIN, [0xEE; 32]).unwrap();
        clock.advance(90 * SECS_PER_DAY);

        assert_eq!(ledger.claim_vested(ALICE, 15, 1).unwrap().released, 8);
        assert_eq!(payout.balance(&ALICE), 15);
    }

    #[test]
    fn test_claimable_at_tracks_clock() {
        let (ledger, clock, _) = ledger();
        let tree = MerkleTree::from_entries(&[(ALICE, 15, 1)]);
        ledger.publish_root(&ADMIN, tree.root()).unwrap();

        clock.advance(100);
        ledger.claim_instant(ALICE, 15, 1, &tree.proof(0).unwrap()).unwrap();
        assert_eq!(
            ledger.claimable_at(&ALICE, 1),
            Some(T0 + 100 + 90 * SECS_PER_DAY)
        );
    }

    #[test]
    fn test_halts() {
        let (ledger, _, _) = ledger();
        ledger.halt_deposits(&ADMIN, true).unwrap();
        assert!(ledger.deposits_halted());
        assert!(matches!(
            ledger.deposit(HOLDER, ALICE, 10),
            Err(SettlementError::Halted)
        ));

        ledger.halt_claims(&ADMIN, true).unwrap();
        assert!(ledger.claims_halted());
        assert!(matches!(
            ledger.claim_vested(ALICE, 10, 1),
            Err(SettlementError::Halted)
        ));
    }

    #[test]
    fn test_concurrent_instant_claims_release_once() {
        let (ledger, _, payout) = ledger();
        let tree = MerkleTree::from_entries(&[(ALICE, 100, 1)]);
        ledger.publish_root(&ADMIN, tree.root()).unwrap();

        let ledger = Arc::new(ledger);
        let proof = tree.proof(0).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                let proof = proof.clone();
                thread::spawn(move || ledger.claim_instant(ALICE, 100, 1, &proof).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(payout.balance(&ALICE), 50);
        assert_eq!(ledger.claim_phase(&ALICE, 1), ClaimPhase::InstantClaimed);
    }
}
