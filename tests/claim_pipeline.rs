//! Claim pipeline integration tests
//!
//! Drives the full cycle through the public crates:
//! 1. Deposits land in the log tagged with the current epoch
//! 2. The tree builder replays the log and builds the distribution
//! 3. The root is published and claimed against in two tranches
//! 4. Root rotation and concurrent submission

use std::sync::Arc;
use std::thread;

use sha2::{Digest, Sha256};

use tranche_aggregator::TreeBuilder;
use tranche_core::{Address, DepositSource, MemoryDepositLog, Tranche};
use tranche_prover::{merkle_leaf, verify_entitlement, MerkleTree};
use tranche_settlement::{
    AdminAction, ClaimPhase, ClaimsConfig, KeySetAuthority, Ledger, ManualClock, RecordingPayout,
    SettlementError, SingleKeyAuthority, SECS_PER_DAY,
};

const ADMIN: Address = [0xAD; 32];
const HOLDER: Address = [0x11; 32];
const ALICE: Address = [0xA1; 32];
const BOB: Address = [0xB0; 32];
const DAY0: u64 = 1_700_000_000;

struct Harness {
    ledger: Arc<Ledger>,
    clock: ManualClock,
    payout: RecordingPayout,
}

fn harness() -> Harness {
    let clock = ManualClock::new(DAY0);
    let payout = RecordingPayout::new();
    let ledger = Ledger::new(
        ClaimsConfig::reference(),
        Arc::new(SingleKeyAuthority::new(ADMIN)),
        Arc::new(clock.clone()),
        MemoryDepositLog::new(),
        Box::new(payout.clone()),
    )
    .unwrap();

    Harness {
        ledger: Arc::new(ledger),
        clock,
        payout,
    }
}

fn at_day(h: &Harness, day: u64) {
    h.clock.set(DAY0 + day * SECS_PER_DAY);
}

/// Replay the ledger's log and publish the distribution for `epoch`
fn publish_epoch(h: &Harness, epoch: u64) -> tranche_aggregator::Distribution {
    let mut builder = TreeBuilder::new();
    builder.ingest_from(&h.ledger.log(), 0).unwrap();
    let dist = builder.build_epochs(&[epoch]);
    h.ledger.publish_root(&ADMIN, dist.root).unwrap();
    dist
}

// ============================================================================
// 1. Aggregation
// ============================================================================

#[test]
fn test_repeat_deposits_aggregate_into_one_leaf() {
    let h = harness();
    h.ledger.deposit(HOLDER, ALICE, 10).unwrap();
    h.ledger.deposit(HOLDER, ALICE, 5).unwrap();

    let dist = publish_epoch(&h, 1);
    assert_eq!(dist.len(), 1);
    assert_eq!(dist.entitlement(&ALICE, 1), Some(15));

    let proof = dist.proof(&ALICE, 15, 1).unwrap();
    assert!(verify_entitlement(&dist.root, &ALICE, 15, 1, &proof));
    assert!(!verify_entitlement(&dist.root, &ALICE, 14, 1, &proof));
    assert!(dist.proof(&ALICE, 14, 1).is_none());
}

#[test]
fn test_leaf_encoding_is_bit_exact() {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(ALICE);
    hasher.update(15u128.to_le_bytes());
    hasher.update(1u64.to_le_bytes());
    let expected: [u8; 32] = hasher.finalize().into();

    assert_eq!(merkle_leaf(&ALICE, 15, 1), expected);

    // Three leaves pad to four: root = H(0x01 || H(0x01 || a || b) || H(0x01 || c || zero))
    let node = |left: [u8; 32], right: [u8; 32]| -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update([0x01]);
        hasher.update(left);
        hasher.update(right);
        hasher.finalize().into()
    };
    let a = merkle_leaf(&ALICE, 15, 1);
    let b = merkle_leaf(&BOB, 3, 1);
    let c = merkle_leaf(&BOB, 4, 2);

    let tree = MerkleTree::from_entries(&[(ALICE, 15, 1), (BOB, 3, 1), (BOB, 4, 2)]);
    assert_eq!(tree.root(), node(node(a, b), node(c, [0u8; 32])));

    let single = MerkleTree::from_entries(&[(ALICE, 15, 1)]);
    assert_eq!(single.root(), expected);
}

#[test]
fn test_epochs_stay_separate() {
    let h = harness();
    h.ledger.deposit(HOLDER, ALICE, 10).unwrap();
    h.ledger.advance_epoch(&ADMIN).unwrap();
    h.ledger.deposit(HOLDER, ALICE, 7).unwrap();

    let records = h.ledger.log().replay(0).unwrap();
    assert_eq!(records.iter().map(|r| r.epoch).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(h.ledger.epoch(2).unwrap().first_sequence, 1);

    let mut builder = TreeBuilder::new();
    builder.ingest_all(records).unwrap();
    let both = builder.build();
    assert_eq!(both.entitlement(&ALICE, 1), Some(10));
    assert_eq!(both.entitlement(&ALICE, 2), Some(7));

    let first = builder.build_epochs(&[1]);
    assert_eq!(first.len(), 1);
    assert!(first.entitlement(&ALICE, 2).is_none());
}

#[test]
fn test_redelivered_log_gives_same_root() {
    let h = harness();
    for amount in [3, 9, 27] {
        h.ledger.deposit(HOLDER, ALICE, amount).unwrap();
        h.ledger.deposit(HOLDER, BOB, amount * 2).unwrap();
    }
    let log = h.ledger.log();

    let mut once = TreeBuilder::new();
    once.ingest_from(&log, 0).unwrap();

    let mut twice = TreeBuilder::new();
    let next = twice.ingest_from(&log, 0).unwrap();
    assert_eq!(next, 6);
    twice.ingest_from(&log, 2).unwrap();

    assert_eq!(once.build().root, twice.build().root);
    assert_eq!(twice.stats().duplicates, 4);
}

// ============================================================================
// 2. Phased claims
// ============================================================================

#[test]
fn test_full_vesting_timeline() {
    let h = harness();
    h.ledger.deposit(HOLDER, ALICE, 10).unwrap();
    h.ledger.deposit(HOLDER, ALICE, 5).unwrap();
    let dist = publish_epoch(&h, 1);
    let proof = dist.proof(&ALICE, 15, 1).unwrap();

    // Day 0: instant tranche
    let receipt = h.ledger.claim_instant(ALICE, 15, 1, &proof).unwrap();
    assert_eq!(receipt.released, 7);
    assert_eq!(h.payout.balance(&ALICE), 7);

    // Day 89: too early
    at_day(&h, 89);
    let err = h.ledger.claim_vested(ALICE, 15, 1).unwrap_err();
    assert!(err.is_retryable_later());
    assert!(matches!(
        err,
        SettlementError::VestingNotElapsed { unlocks_at } if unlocks_at == DAY0 + 90 * SECS_PER_DAY
    ));

    // Day 90: remainder
    at_day(&h, 90);
    let receipt = h.ledger.claim_vested(ALICE, 15, 1).unwrap();
    assert_eq!(receipt.released, 8);
    assert_eq!(h.payout.balance(&ALICE), 15);
    assert_eq!(h.ledger.claim_phase(&ALICE, 1), ClaimPhase::FullyClaimed);

    // Nothing left
    assert!(matches!(
        h.ledger.claim_vested(ALICE, 15, 1),
        Err(SettlementError::AlreadyClaimed)
    ));
    assert!(matches!(
        h.ledger.claim_instant(ALICE, 15, 1, &proof),
        Err(SettlementError::AlreadyClaimed)
    ));
}

#[test]
fn test_claim_before_publication() {
    let h = harness();
    h.ledger.deposit(HOLDER, ALICE, 15).unwrap();
    let tree = MerkleTree::from_entries(&[(ALICE, 15, 1)]);

    assert!(matches!(
        h.ledger.claim_instant(ALICE, 15, 1, &tree.proof(0).unwrap()),
        Err(SettlementError::NoActiveRoot)
    ));
}

#[test]
fn test_root_rotation_invalidates_unclaimed_proofs() {
    let h = harness();
    h.ledger.deposit(HOLDER, ALICE, 10).unwrap();
    h.ledger.deposit(HOLDER, BOB, 20).unwrap();
    let old = publish_epoch(&h, 1);
    let old_proof = old.proof(&ALICE, 10, 1).unwrap();

    // Late deposit in the same epoch, republished
    h.ledger.deposit(HOLDER, ALICE, 5).unwrap();
    at_day(&h, 1);
    let new = publish_epoch(&h, 1);

    assert_eq!(h.ledger.prior_root(), Some(old.root));
    assert_eq!(h.ledger.active_root(), Some(new.root));
    assert_eq!(h.ledger.root_replaced_at(), Some(DAY0 + SECS_PER_DAY));

    assert!(matches!(
        h.ledger.claim_instant(ALICE, 10, 1, &old_proof),
        Err(SettlementError::ProofInvalid)
    ));

    let new_proof = new.proof(&ALICE, 15, 1).unwrap();
    assert_eq!(h.ledger.claim_instant(ALICE, 15, 1, &new_proof).unwrap().released, 7);
}

#[test]
fn test_conservation_across_recipients() {
    let h = harness();
    let amounts: [(Address, u128); 3] = [(ALICE, 15), (BOB, 1), ([0xC0; 32], 1_000_001)];
    for (who, amount) in amounts {
        h.ledger.deposit(HOLDER, who, amount).unwrap();
    }
    let dist = publish_epoch(&h, 1);

    for (who, amount) in amounts {
        let proof = dist.proof(&who, amount, 1).unwrap();
        h.ledger.claim_instant(who, amount, 1, &proof).unwrap();
    }
    at_day(&h, 90);
    for (who, amount) in amounts {
        h.ledger.claim_vested(who, amount, 1).unwrap();
        assert_eq!(h.payout.released_for(&who, 1), amount);
    }
    assert_eq!(h.payout.releases().len(), 6);
}

#[test]
fn test_concurrent_claims_release_once() {
    let h = harness();
    h.ledger.deposit(HOLDER, ALICE, 1_000).unwrap();
    let dist = publish_epoch(&h, 1);
    let proof = dist.proof(&ALICE, 1_000, 1).unwrap();

    let instant: Vec<_> = (0..16)
        .map(|_| {
            let ledger = h.ledger.clone();
            let proof = proof.clone();
            thread::spawn(move || ledger.claim_instant(ALICE, 1_000, 1, &proof))
        })
        .collect();
    let ok = instant
        .into_iter()
        .map(|t| t.join().unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(ok, 1);

    at_day(&h, 90);
    let vested: Vec<_> = (0..16)
        .map(|_| {
            let ledger = h.ledger.clone();
            thread::spawn(move || ledger.claim_vested(ALICE, 1_000, 1))
        })
        .collect();
    let results: Vec<_> = vested.into_iter().map(|t| t.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, SettlementError::AlreadyClaimed)));

    assert_eq!(h.payout.balance(&ALICE), 1_000);
}

#[test]
fn test_fifteen_splits_seven_instant_eight_vested() {
    let h = harness();
    h.ledger.deposit(HOLDER, ALICE, 15).unwrap();
    let dist = publish_epoch(&h, 1);
    let proof = dist.proof(&ALICE, 15, 1).unwrap();

    // Instant tranche rounds down, vested tranche takes the remainder
    h.ledger.claim_instant(ALICE, 15, 1, &proof).unwrap();
    at_day(&h, 90);
    h.ledger.claim_vested(ALICE, 15, 1).unwrap();

    let released: Vec<_> = h
        .payout
        .releases()
        .iter()
        .map(|r| (r.tranche, r.amount))
        .collect();
    assert_eq!(released, vec![(Tranche::Instant, 7), (Tranche::Vested, 8)]);
    assert_eq!(h.payout.released_for(&ALICE, 1), 15);
}

// ============================================================================
// 3. Administrative hooks
// ============================================================================

#[test]
fn test_key_set_authority_grants_per_action() {
    let publisher: Address = [0x50; 32];
    let authority = KeySetAuthority::new()
        .grant_all(ADMIN)
        .grant(publisher, AdminAction::PublishRoot);

    let ledger = Ledger::new(
        ClaimsConfig::reference(),
        Arc::new(authority),
        Arc::new(ManualClock::new(DAY0)),
        MemoryDepositLog::new(),
        Box::new(RecordingPayout::new()),
    )
    .unwrap();

    assert!(ledger.publish_root(&publisher, [0x01; 32]).is_ok());
    assert!(matches!(
        ledger.advance_epoch(&publisher),
        Err(SettlementError::NotAuthorized)
    ));
    assert!(matches!(
        ledger.halt_claims(&publisher, true),
        Err(SettlementError::NotAuthorized)
    ));
    assert_eq!(ledger.advance_epoch(&ADMIN).unwrap(), 2);
}

#[test]
fn test_failed_payout_is_retryable_by_resubmission() {
    let h = harness();
    h.ledger.deposit(HOLDER, ALICE, 15).unwrap();
    let dist = publish_epoch(&h, 1);
    let proof = dist.proof(&ALICE, 15, 1).unwrap();

    h.payout.fail_next("reserve empty");
    assert!(matches!(
        h.ledger.claim_instant(ALICE, 15, 1, &proof),
        Err(SettlementError::TransferFailed(_))
    ));
    assert_eq!(h.ledger.claim_phase(&ALICE, 1), ClaimPhase::Unclaimed);
    assert!(h.ledger.claim_status(&ALICE, 1).is_none());

    assert!(h.ledger.claim_instant(ALICE, 15, 1, &proof).is_ok());
}
