//! Tranche Aggregator
//!
//! Off-path batch job that any operator can run. Replays the deposit log,
//! consolidates duplicate deposits per `(recipient, epoch)`, builds the
//! Merkle distribution whose root gets published, and hands out proofs.
//!
//! Replays are at-least-once: a record seen twice is recognised by its
//! sequence number and counted once.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tranche_core::{
    hex32, short_hex, Address, AggregatedLeaf, Amount, DepositRecord, DepositSource, EpochId,
    LogError,
};
use tranche_prover::{MerkleProof, MerkleTree};

/// Merkle distribution over aggregated leaves (ready for root publication)
#[derive(Debug, Clone)]
pub struct Distribution {
    /// Merkle root of the canonical leaf set
    pub root: [u8; 32],
    /// Sum of every leaf amount
    pub total: Amount,
    /// Leaves sorted by `(recipient, epoch)`
    leaves: Vec<AggregatedLeaf>,
    /// The Merkle tree (for generating per-leaf proofs)
    tree: MerkleTree,
}

impl Distribution {
    fn from_leaves(mut leaves: Vec<AggregatedLeaf>) -> Self {
        // Sort by (recipient, epoch) for a deterministic tree shape
        leaves.sort_by_key(|leaf| (leaf.recipient, leaf.epoch));

        let entries: Vec<(Address, Amount, EpochId)> = leaves
            .iter()
            .map(|leaf| (leaf.recipient, leaf.amount, leaf.epoch))
            .collect();
        let tree = MerkleTree::from_entries(&entries);

        // Every leaf passed the per-group overflow check; the grand total
        // saturates rather than failing a build over a reporting figure.
        let total = leaves
            .iter()
            .fold(0u128, |acc, leaf| acc.saturating_add(leaf.amount));

        Self {
            root: tree.root(),
            total,
            leaves,
            tree,
        }
    }

    /// Generate a proof for an exact `(recipient, amount, epoch)` triple.
    ///
    /// Returns `None` if the triple is not an aggregated leaf, including
    /// when the recipient is present with a different amount.
    pub fn proof(&self, recipient: &Address, amount: Amount, epoch: EpochId) -> Option<MerkleProof> {
        let index = self.position(recipient, epoch)?;
        if self.leaves[index].amount != amount {
            return None;
        }
        self.tree.proof(index)
    }

    /// Aggregated amount for a `(recipient, epoch)` pair, if present.
    pub fn entitlement(&self, recipient: &Address, epoch: EpochId) -> Option<Amount> {
        self.position(recipient, epoch).map(|i| self.leaves[i].amount)
    }

    pub fn leaves(&self) -> &[AggregatedLeaf] {
        &self.leaves
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Serializable snapshot with a proof for every leaf.
    pub fn export(&self) -> DistributionExport {
        let leaves = self
            .leaves
            .iter()
            .enumerate()
            .filter_map(|(i, leaf)| {
                self.tree.proof(i).map(|proof| ExportedLeaf { leaf: *leaf, proof })
            })
            .collect();

        DistributionExport {
            root: self.root,
            total: self.total,
            leaves,
        }
    }

    fn position(&self, recipient: &Address, epoch: EpochId) -> Option<usize> {
        self.leaves
            .binary_search_by_key(&(*recipient, epoch), |leaf| (leaf.recipient, leaf.epoch))
            .ok()
    }
}

/// JSON form of a distribution, as handed to claimants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionExport {
    #[serde(with = "hex32")]
    pub root: [u8; 32],
    #[serde(with = "tranche_core::amount_str")]
    pub total: Amount,
    pub leaves: Vec<ExportedLeaf>,
}

impl DistributionExport {
    /// Find the exported leaf for a `(recipient, epoch)` pair
    pub fn find(&self, recipient: &Address, epoch: EpochId) -> Option<&ExportedLeaf> {
        self.leaves
            .iter()
            .find(|e| e.leaf.recipient == *recipient && e.leaf.epoch == epoch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedLeaf {
    #[serde(flatten)]
    pub leaf: AggregatedLeaf,
    pub proof: MerkleProof,
}

/// Deposit statistics over everything ingested so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Distinct records ingested
    pub records: usize,
    /// Redelivered records that were skipped
    pub duplicates: usize,
    /// Distinct `(recipient, epoch)` leaves
    pub leaves: usize,
    /// Distinct epochs seen
    pub epochs: usize,
}

/// The tree builder
///
/// Ingests deposit records (possibly redelivered, in any order) and builds
/// Merkle distributions over one or more epochs.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    /// Sequence → record, for redelivery dedupe
    seen: HashMap<u64, DepositRecord>,
    /// Per (recipient, epoch): running sum. BTreeMap keeps iteration
    /// order independent of arrival order.
    sums: BTreeMap<(Address, EpochId), Amount>,
    duplicates: usize,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one deposit record.
    ///
    /// Returns `Ok(true)` if the record was new, `Ok(false)` if it was a
    /// redelivery of a record already counted.
    pub fn ingest(&mut self, record: DepositRecord) -> Result<bool, AggregatorError> {
        if let Some(existing) = self.seen.get(&record.sequence) {
            if *existing != record {
                warn!(
                    "Conflicting deposit #{}: recipient {} amount {} vs recipient {} amount {}",
                    record.sequence,
                    short_hex(&existing.recipient),
                    existing.amount,
                    short_hex(&record.recipient),
                    record.amount,
                );
                return Err(AggregatorError::ConflictingRecord {
                    sequence: record.sequence,
                });
            }
            self.duplicates += 1;
            debug!("Skipping redelivered deposit #{}", record.sequence);
            return Ok(false);
        }

        let key = record.leaf_key();
        let current = self.sums.get(&key).copied().unwrap_or(0);
        let summed = current
            .checked_add(record.amount)
            .ok_or(AggregatorError::AmountOverflow {
                recipient: record.recipient,
                epoch: record.epoch,
            })?;

        self.sums.insert(key, summed);
        self.seen.insert(record.sequence, record);

        debug!(
            "Ingested deposit #{} for {} (epoch {}): running total {}",
            record.sequence,
            short_hex(&record.recipient),
            record.epoch,
            summed,
        );

        Ok(true)
    }

    /// Ingest a batch; returns how many records were new.
    pub fn ingest_all<I>(&mut self, records: I) -> Result<usize, AggregatorError>
    where
        I: IntoIterator<Item = DepositRecord>,
    {
        let mut fresh = 0;
        for record in records {
            if self.ingest(record)? {
                fresh += 1;
            }
        }
        Ok(fresh)
    }

    /// Replay deposits from `offset`.
    ///
    /// Returns the offset to resume from next time. Resuming from an older
    /// offset is safe; the overlap is deduped.
    pub fn ingest_from(
        &mut self,
        source: &dyn DepositSource,
        offset: u64,
    ) -> Result<u64, AggregatorError> {
        let records = source.replay(offset)?;
        let next = records
            .iter()
            .map(|r| r.sequence + 1)
            .max()
            .unwrap_or(offset)
            .max(offset);
        let fresh = self.ingest_all(records)?;
        info!("Replayed deposit log from #{}: {} new records, next #{}", offset, fresh, next);
        Ok(next)
    }

    /// Aggregated leaves for the given epochs (all epochs when `None`).
    pub fn aggregated_leaves(&self, epochs: Option<&[EpochId]>) -> Vec<AggregatedLeaf> {
        let wanted: Option<BTreeSet<EpochId>> = epochs.map(|e| e.iter().copied().collect());
        self.sums
            .iter()
            .filter(|((_, epoch), _)| wanted.as_ref().map_or(true, |w| w.contains(epoch)))
            .map(|((recipient, epoch), amount)| AggregatedLeaf::new(*recipient, *amount, *epoch))
            .collect()
    }

    /// Build a distribution over every ingested epoch.
    pub fn build(&self) -> Distribution {
        self.build_distribution(None)
    }

    /// Build a distribution restricted to a set of (closed) epochs.
    pub fn build_epochs(&self, epochs: &[EpochId]) -> Distribution {
        self.build_distribution(Some(epochs))
    }

    fn build_distribution(&self, epochs: Option<&[EpochId]>) -> Distribution {
        let dist = Distribution::from_leaves(self.aggregated_leaves(epochs));
        info!(
            "Built distribution: {} leaves, total {}, root {}",
            dist.len(),
            dist.total,
            short_hex(&dist.root),
        );
        dist
    }

    /// Epochs with at least one ingested deposit, ascending
    pub fn epochs(&self) -> Vec<EpochId> {
        let set: BTreeSet<EpochId> = self.sums.keys().map(|(_, e)| *e).collect();
        set.into_iter().collect()
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            records: self.seen.len(),
            duplicates: self.duplicates,
            leaves: self.sums.len(),
            epochs: self.epochs().len(),
        }
    }
}

/// Aggregator errors
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Deposit #{sequence} redelivered with different content")]
    ConflictingRecord { sequence: u64 },

    #[error("Aggregated amount overflows for recipient {} in epoch {epoch}", hex::encode(.recipient))]
    AmountOverflow { recipient: Address, epoch: EpochId },

    #[error("Deposit log error: {0}")]
    Log(#[from] LogError),
}
