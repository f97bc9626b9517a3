use thiserror::Error;

/// Errors raised by the chain, the miner and the sync layer.
///
/// Only `SyncService`'s public boundary swallows these; everything below it
/// propagates them to the caller.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("transaction {0} already exists in the chain")]
    DuplicateTransaction(String),

    #[error("mining failed: {0}")]
    MiningFailed(String),

    #[error("mining cancelled after {attempts} attempts")]
    MiningCancelled { attempts: u64 },

    #[error("no nonce met difficulty {difficulty} within {attempts} attempts")]
    AttemptLimitReached { difficulty: usize, attempts: u64 },

    #[error("chain has no blocks")]
    EmptyChain,

    #[error("failed to persist chain: {0}")]
    Persistence(String),

    #[error("failed to load chain: {0}")]
    Load(String),

    #[error("chain failed validation after appending block {0}")]
    ValidationFailed(u64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
