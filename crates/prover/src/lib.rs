//! Tranche Prover
//!
//! Binary Merkle tree over aggregated deposit entitlements.
//!
//! The `MerkleTree` is used by both the aggregator (to build the published
//! root and a proof for each leaf) and by the claims engine (to verify an
//! instant claim). Both sides share `merkle_leaf`, `hash_pair` and
//! `MerkleTree::verify`, which together form the bit-exact leaf contract.

pub mod merkle;

pub use merkle::{
    hash_pair, merkle_leaf, verify_entitlement, MerkleProof, MerkleTree, EMPTY_HASH,
};
