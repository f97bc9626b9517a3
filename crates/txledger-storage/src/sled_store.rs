use crate::tx_store::SledTransactionStore;
use anyhow::{Context, Result};
use sled::Db;
use std::path::Path;
use tracing::{debug, info};
use txledger_core::KvStore;

const TREE_KV: &str = "kv";

/// Durable key-value substrate for the chain, one sled database per node.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let db = sled::open(path).with_context(|| format!("opening sled at {}", path.display()))?;
    info!("sled store opened at {}", path.display());
    Ok(Self { db })
  }

  pub fn open_temporary() -> Result<Self> {
    let db = sled::Config::new().temporary(true).open()?;
    Ok(Self { db })
  }

  /// Transaction store sharing this database.
  pub fn transactions(&self) -> Result<SledTransactionStore> {
    SledTransactionStore::new(&self.db)
  }

  pub fn close(&self) -> Result<()> {
    self.db.flush()?;
    Ok(())
  }

  pub fn clear(&self) -> Result<()> {
    self.kv()?.clear()?;
    self.db.flush()?;
    Ok(())
  }

  fn kv(&self) -> Result<sled::Tree> {
    Ok(self.db.open_tree(TREE_KV)?)
  }
}

impl KvStore for SledStore {
  fn read(&self, key: &str) -> Result<Option<String>> {
    let Some(bytes) = self.kv()?.get(key.as_bytes())? else {
      return Ok(None);
    };
    let value = String::from_utf8(bytes.to_vec())
      .with_context(|| format!("value under {key} is not utf-8"))?;
    Ok(Some(value))
  }

  fn write(&self, key: &str, value: &str) -> Result<()> {
    self.kv()?.insert(key.as_bytes(), value.as_bytes())?;
    self.db.flush()?;
    debug!("wrote {} bytes under {key}", value.len());
    Ok(())
  }
}
