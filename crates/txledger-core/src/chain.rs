use crate::constants::{CHAIN_STORAGE_KEY, DEFAULT_DIFFICULTY, GENESIS_DATA, HASH_HEX_SIZE};
use crate::error::{LedgerError, Result};
use crate::{digest, now_millis, validate, Block};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Durable key-value substrate the chain persists itself into.
/// Backends live in `txledger-storage`; `MemoryStore` is the in-process one.
pub trait KvStore: Send + Sync {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: impl Into<String>) -> Self {
        let store = Self::new();
        store.entries.lock().insert(key.to_string(), value.into());
        store
    }
}

impl KvStore for MemoryStore {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainConfig {
    /// Leading `'0'` hex characters a mined hash must start with.
    pub difficulty: usize,
    pub storage_key: String,
    /// Upper bound on nonce attempts per block. `None` runs to completion.
    pub max_attempts: Option<u64>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            storage_key: CHAIN_STORAGE_KEY.to_string(),
            max_attempts: None,
        }
    }
}

/// The fixed, never-mined first block.
pub fn genesis_block() -> Block {
    let timestamp = now_millis();
    let data = Value::from(GENESIS_DATA);
    let previous_hash = zero_hash();
    let hash = digest(0, timestamp, &data.to_string(), &previous_hash, 0);
    Block {
        index: 0,
        timestamp,
        data,
        previous_hash,
        hash,
        nonce: 0,
    }
}

pub fn zero_hash() -> String {
    "0".repeat(HASH_HEX_SIZE)
}

fn is_genesis_shape(block: &Block) -> bool {
    block.index == 0 && block.previous_hash == zero_hash()
}

pub(crate) fn contains_id(blocks: &[Block], id: &str) -> bool {
    blocks.iter().any(|b| b.payload_id() == Some(id))
}

/// In-memory chain backed by a load/validate/persist cycle against a `KvStore`.
///
/// Readers take cheap `Arc` snapshots. Appends go through a single
/// `ChainWriter` at a time and publish copy-on-write, so a snapshot taken
/// before an append never observes it.
pub struct Chain<S: KvStore> {
    store: Arc<S>,
    config: ChainConfig,
    blocks: RwLock<Arc<Vec<Block>>>,
    writer: Mutex<()>,
}

impl<S: KvStore> Chain<S> {
    /// Load the persisted chain, or start a fresh one from genesis when
    /// nothing is stored or what is stored cannot be trusted. Never fails.
    pub fn load(store: Arc<S>, config: ChainConfig) -> Self {
        let blocks = match read_persisted(store.as_ref(), &config.storage_key) {
            Ok(Some(blocks)) => {
                info!(
                    "loaded chain of {} blocks from {}",
                    blocks.len(),
                    config.storage_key
                );
                blocks
            }
            Ok(None) => {
                info!("no chain stored under {}, starting from genesis", config.storage_key);
                vec![genesis_block()]
            }
            Err(err) => {
                error!("{err}; creating new chain");
                vec![genesis_block()]
            }
        };
        Self {
            store,
            config,
            blocks: RwLock::new(Arc::new(blocks)),
            writer: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Full ordered sequence of blocks at this instant.
    pub fn snapshot(&self) -> Arc<Vec<Block>> {
        self.blocks.read().clone()
    }

    pub fn latest(&self) -> Result<Block> {
        self.blocks.read().last().cloned().ok_or(LedgerError::EmptyChain)
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    pub fn is_valid(&self) -> bool {
        validate::is_valid(&self.snapshot())
    }

    pub fn contains_transaction(&self, id: &str) -> bool {
        contains_id(&self.snapshot(), id)
    }

    pub fn find_transaction(&self, id: &str) -> Option<Block> {
        self.snapshot()
            .iter()
            .find(|b| b.payload_id() == Some(id))
            .cloned()
    }

    /// Exclusive append access. Blocks until any in-flight writer is done.
    pub fn writer(&self) -> ChainWriter<'_, S> {
        ChainWriter {
            chain: self,
            _guard: self.writer.lock(),
        }
    }

    pub fn append(&self, block: Block) {
        self.writer().append(block);
    }

    /// Serialize the whole chain under the configured key.
    pub fn persist(&self) -> Result<()> {
        let json = serde_json::to_string(self.snapshot().as_slice())?;
        self.store
            .write(&self.config.storage_key, &json)
            .map_err(|e| LedgerError::Persistence(format!("{e:#}")))
    }
}

fn read_persisted<S: KvStore + ?Sized>(store: &S, key: &str) -> Result<Option<Vec<Block>>> {
    let Some(raw) = store
        .read(key)
        .map_err(|e| LedgerError::Load(format!("storage read failed: {e:#}")))?
    else {
        return Ok(None);
    };
    let blocks: Vec<Block> = serde_json::from_str(&raw)
        .map_err(|e| LedgerError::Load(format!("stored chain is not parseable: {e}")))?;
    match blocks.first() {
        None => return Err(LedgerError::Load("stored chain is empty".into())),
        Some(first) if !is_genesis_shape(first) => {
            return Err(LedgerError::Load(
                "stored chain does not start with a genesis block".into(),
            ))
        }
        Some(_) => {}
    }
    if !validate::is_valid(&blocks) {
        return Err(LedgerError::Load("loaded blockchain is invalid".into()));
    }
    Ok(Some(blocks))
}

/// Holds the chain's single-writer lock for as long as it lives.
pub struct ChainWriter<'a, S: KvStore> {
    chain: &'a Chain<S>,
    _guard: MutexGuard<'a, ()>,
}

impl<S: KvStore> ChainWriter<'_, S> {
    pub fn latest(&self) -> Result<Block> {
        self.chain.latest()
    }

    pub fn contains_transaction(&self, id: &str) -> bool {
        self.chain.contains_transaction(id)
    }

    /// Push `block` and persist the full chain. A persistence failure is
    /// logged and the in-memory append stands.
    pub fn append(&mut self, block: Block) {
        let index = block.index;
        {
            let mut blocks = self.chain.blocks.write();
            Arc::make_mut(&mut *blocks).push(block);
        }
        if let Err(err) = self.chain.persist() {
            warn!("block {index} appended in memory only: {err}");
        }
    }
}
