//! Tranche
//!
//! Merkle-proof-gated phased claims. Deposits are batched per epoch into an
//! append-only log, an off-path builder turns the log into a Merkle
//! distribution, and the ledger releases each entitlement in an instant
//! tranche and a vested tranche against the published root.
//!
//! This crate re-exports the workspace members under one roof.

pub use tranche_aggregator;
pub use tranche_core;
pub use tranche_prover;
pub use tranche_settlement;
