pub mod chain;
pub mod constants;
pub mod error;
pub mod mine;
pub mod sync;
pub mod validate;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use chain::{genesis_block, Chain, ChainConfig, ChainWriter, KvStore, MemoryStore};
pub use error::{LedgerError, Result};
pub use mine::{CancelFlag, Miner};
pub use sync::{SignatureVerifier, SyncReport, SyncService, TransactionStore};
pub use validate::{first_violation, is_valid, Violation};

/// Lowercase hex SHA-256 digest, always `HASH_HEX_SIZE` characters.
pub type Hash = String;

/// Lifecycle status of a transaction in the external transaction store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Synced,
    Verified,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxStatus::Pending => "pending",
            TxStatus::Synced => "synced",
            TxStatus::Verified => "verified",
        };
        f.write_str(s)
    }
}

/// A transaction record as handed over by the client application.
///
/// `id` is the identity used for de-duplication; every other field is
/// carried through to the block payload untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TxStatus>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Transaction {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: None,
            fields: Map::new(),
        }
    }

    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            status: Some(TxStatus::Pending),
            ..Self::new(id)
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Any non-empty id counts, whitespace included.
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }
}

/// One link of the chain. Once appended to a `Chain` a block is never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    /// Milliseconds since the Unix epoch, captured once when mining starts.
    pub timestamp: u64,
    pub data: Value,
    pub previous_hash: Hash,
    pub hash: Hash,
    pub nonce: u64,
}

impl Block {
    /// Recompute the digest from the block's own fields.
    pub fn compute_hash(&self) -> Hash {
        digest(
            self.index,
            self.timestamp,
            &self.data.to_string(),
            &self.previous_hash,
            self.nonce,
        )
    }

    /// The `id` of the payload, if the payload is a record carrying one.
    pub fn payload_id(&self) -> Option<&str> {
        self.data.get("id").and_then(Value::as_str)
    }
}

/// Hash a block's fields. `data` is serialized to canonical JSON first; any
/// serialization failure is returned, never papered over.
pub fn calculate_hash<D: Serialize + ?Sized>(
    index: u64,
    timestamp: u64,
    data: &D,
    previous_hash: &str,
    nonce: u64,
) -> Result<Hash> {
    let data = serde_json::to_value(data)?;
    Ok(digest(
        index,
        timestamp,
        &data.to_string(),
        previous_hash,
        nonce,
    ))
}

/// SHA-256 over the decimal index, decimal timestamp, serialized data,
/// previous hash and decimal nonce, concatenated in that order.
pub(crate) fn digest(
    index: u64,
    timestamp: u64,
    data_json: &str,
    previous_hash: &str,
    nonce: u64,
) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(index.to_string());
    hasher.update(timestamp.to_string());
    hasher.update(data_json);
    hasher.update(previous_hash);
    hasher.update(nonce.to_string());
    hex::encode(hasher.finalize())
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
