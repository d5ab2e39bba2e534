use serde::{Deserialize, Serialize};

/// 32-byte account address
pub type Address = [u8; 32];

/// Token amount in base units
pub type Amount = u128;

/// Epoch identifier (monotonic, first epoch is 1)
pub type EpochId = u64;

/// The null address. Deposits may never name it as recipient.
pub const NULL_ADDRESS: Address = [0u8; 32];

/// Epoch the controller opens at genesis
pub const GENESIS_EPOCH: EpochId = 1;

/// Short hex prefix of an address for log lines
pub fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(8)])
}

/// Parse a 32-byte value from a hex string (optional `0x` prefix)
pub fn parse_hex32(s: &str) -> Option<[u8; 32]> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed).ok()?;
    bytes.try_into().ok()
}

/// Serde adapter that writes `[u8; 32]` as a hex string
pub mod hex32 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        super::parse_hex32(&s).ok_or_else(|| D::Error::custom("expected 32 hex-encoded bytes"))
    }
}

/// Serde adapter for `u128` amounts as decimal strings.
///
/// JSON numbers lose precision above 2^53 in most consumers, so amounts
/// always travel as strings.
pub mod amount_str {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// A deposit before the store has assigned it a sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositDraft {
    pub depositor: Address,
    pub recipient: Address,
    pub amount: Amount,
    pub epoch: EpochId,
}

/// An accepted deposit. Immutable once appended to the log.
///
/// `sequence` is the record identity: the log assigns it and off-path
/// consumers dedupe redeliveries by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRecord {
    pub sequence: u64,
    #[serde(with = "hex32")]
    pub depositor: Address,
    #[serde(with = "hex32")]
    pub recipient: Address,
    #[serde(with = "amount_str")]
    pub amount: Amount,
    pub epoch: EpochId,
}

impl DepositRecord {
    pub fn from_draft(sequence: u64, draft: DepositDraft) -> Self {
        Self {
            sequence,
            depositor: draft.depositor,
            recipient: draft.recipient,
            amount: draft.amount,
            epoch: draft.epoch,
        }
    }

    /// The `(recipient, epoch)` pair this record aggregates under
    pub fn leaf_key(&self) -> (Address, EpochId) {
        (self.recipient, self.epoch)
    }
}

/// Summed entitlement for one `(recipient, epoch)` pair.
///
/// Derived by the tree builder, never stored by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedLeaf {
    #[serde(with = "hex32")]
    pub recipient: Address,
    #[serde(with = "amount_str")]
    pub amount: Amount,
    pub epoch: EpochId,
}

impl AggregatedLeaf {
    pub fn new(recipient: Address, amount: Amount, epoch: EpochId) -> Self {
        Self { recipient, amount, epoch }
    }
}

/// Which part of an entitlement a release pays out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tranche {
    /// Released together with the first proof-gated claim
    Instant,
    /// Released once the vesting period has elapsed
    Vested,
}

impl Tranche {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tranche::Instant => "instant",
            Tranche::Vested => "vested",
        }
    }
}
