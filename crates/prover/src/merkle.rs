//! Binary Merkle tree for deposit entitlements.
//!
//! Leaf formula:
//! `SHA256(0x00 || recipient[32] || amount.to_le_bytes()[16] || epoch.to_le_bytes()[8])`.
//! Internal nodes: `SHA256(0x01 || left || right)`.
//! If the leaf count is not a power of 2, pad with `[0u8; 32]`.
//!
//! The tree builder and the claims engine both go through this module, so
//! the encoding and the odd-count policy cannot drift apart.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tranche_core::{hex32, Address, Amount, EpochId};

/// Domain tag prepended to leaf preimages.
pub const LEAF_TAG: u8 = 0x00;

/// Domain tag prepended to internal node preimages.
pub const NODE_TAG: u8 = 0x01;

/// Hash used for padding leaves and for the root of an empty tree.
pub const EMPTY_HASH: [u8; 32] = [0u8; 32];

/// A Merkle proof consisting of sibling hashes along the path to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Sibling hashes from leaf level to root (bottom-up).
    #[serde(with = "hex_siblings")]
    pub siblings: Vec<[u8; 32]>,
    /// Index of the leaf in the tree (determines left/right at each level).
    pub leaf_index: usize,
}

/// A binary Merkle tree.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// All nodes stored level by level, bottom-up. `layers[0]` = padded leaves.
    layers: Vec<Vec<[u8; 32]>>,
    /// Leaf count before padding
    len: usize,
}

/// Compute the leaf hash for an aggregated `(recipient, amount, epoch)`.
pub fn merkle_leaf(recipient: &Address, amount: Amount, epoch: EpochId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_TAG]);
    hasher.update(recipient);
    hasher.update(amount.to_le_bytes());
    hasher.update(epoch.to_le_bytes());
    hasher.finalize().into()
}

/// Hash two child nodes to produce a parent.
pub fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([NODE_TAG]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

impl MerkleTree {
    /// Build a Merkle tree from `(recipient, amount, epoch)` entries, in the
    /// order given. Callers are responsible for canonical ordering.
    pub fn from_entries(entries: &[(Address, Amount, EpochId)]) -> Self {
        let leaves: Vec<[u8; 32]> = entries
            .iter()
            .map(|(recipient, amount, epoch)| merkle_leaf(recipient, *amount, *epoch))
            .collect();
        Self::from_leaves(leaves)
    }

    /// Build a Merkle tree from pre-hashed leaves.
    pub fn from_leaves(leaves: Vec<[u8; 32]>) -> Self {
        let len = leaves.len();
        if leaves.is_empty() {
            return Self {
                layers: vec![vec![EMPTY_HASH]],
                len,
            };
        }

        let mut current = leaves;
        current.resize(len.next_power_of_two(), EMPTY_HASH);

        let mut layers = Vec::new();
        while current.len() > 1 {
            let next: Vec<[u8; 32]> = current
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
            layers.push(current);
            current = next;
        }
        layers.push(current);

        Self { layers, len }
    }

    /// Get the Merkle root.
    pub fn root(&self) -> [u8; 32] {
        self.layers
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or(EMPTY_HASH)
    }

    /// Generate a proof for the leaf at the given index.
    ///
    /// Returns `None` for padding positions and out-of-range indices, and
    /// for every index of an empty tree.
    pub fn proof(&self, leaf_index: usize) -> Option<MerkleProof> {
        if leaf_index >= self.len {
            return None;
        }

        let mut siblings = Vec::with_capacity(self.layers.len() - 1);
        let mut idx = leaf_index;

        for layer in &self.layers[..self.layers.len() - 1] {
            siblings.push(layer[idx ^ 1]);
            idx /= 2;
        }

        Some(MerkleProof {
            siblings,
            leaf_index,
        })
    }

    /// Verify a Merkle proof against a given root and leaf hash.
    pub fn verify(root: &[u8; 32], leaf: &[u8; 32], proof: &MerkleProof) -> bool {
        // An index outside the proof depth would silently drop high bits
        if proof.siblings.len() < usize::BITS as usize
            && proof.leaf_index >> proof.siblings.len() != 0
        {
            return false;
        }

        let mut current = *leaf;
        let mut idx = proof.leaf_index;

        for sibling in &proof.siblings {
            current = if idx % 2 == 0 {
                hash_pair(&current, sibling)
            } else {
                hash_pair(sibling, &current)
            };
            idx /= 2;
        }

        current == *root
    }

    /// Number of real (unpadded) leaves.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of leaves including padding.
    pub fn padded_len(&self) -> usize {
        self.layers[0].len()
    }
}

/// Verify that `(recipient, amount, epoch)` is a member of the tree with
/// the given root.
pub fn verify_entitlement(
    root: &[u8; 32],
    recipient: &Address,
    amount: Amount,
    epoch: EpochId,
    proof: &MerkleProof,
) -> bool {
    MerkleTree::verify(root, &merkle_leaf(recipient, amount, epoch), proof)
}

mod hex_siblings {
    use serde::{ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    #[derive(serde::Serialize, Deserialize)]
    #[serde(transparent)]
    struct Node(#[serde(with = "super::hex32")] [u8; 32]);

    pub fn serialize<S: Serializer>(siblings: &[[u8; 32]], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(siblings.len()))?;
        for sibling in siblings {
            seq.serialize_element(&Node(*sibling))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<[u8; 32]>, D::Error> {
        let nodes = Vec::<Node>::deserialize(d)?;
        Ok(nodes.into_iter().map(|n| n.0).collect())
    }
}
