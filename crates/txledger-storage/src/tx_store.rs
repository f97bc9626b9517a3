//! sled-backed transaction store.
//!
//! Records live in `transactions` keyed by a monotonically increasing
//! sequence number, so `list_all` returns them in insertion order. The
//! `transaction_ids` tree maps a transaction id to its sequence key.

use anyhow::{anyhow, Context, Result};
use sled::{Db, Tree};
use tracing::debug;
use txledger_core::{Transaction, TransactionStore, TxStatus};

const TREE_TRANSACTIONS: &str = "transactions";
const TREE_IDS: &str = "transaction_ids";

#[derive(Clone)]
pub struct SledTransactionStore {
    db: Db,
    records: Tree,
    ids: Tree,
}

impl SledTransactionStore {
    pub(crate) fn new(db: &Db) -> Result<Self> {
        Ok(Self {
            db: db.clone(),
            records: db.open_tree(TREE_TRANSACTIONS)?,
            ids: db.open_tree(TREE_IDS)?,
        })
    }

    /// Insert a new transaction, or overwrite the record with the same id in
    /// place without changing its position.
    pub fn put(&self, tx: &Transaction) -> Result<()> {
        if !tx.has_id() {
            return Err(anyhow!("transaction has no id"));
        }
        let key = match self.ids.get(tx.id.as_bytes())? {
            Some(key) => key.to_vec(),
            None => {
                let fresh = self.db.generate_id()?.to_be_bytes().to_vec();
                // a concurrent put of the same id may claim a slot first
                let claimed = self.ids.compare_and_swap(
                    tx.id.as_bytes(),
                    None as Option<&[u8]>,
                    Some(fresh.clone()),
                )?;
                match claimed {
                    Ok(()) => fresh,
                    Err(cas) => cas
                        .current
                        .map(|k| k.to_vec())
                        .ok_or_else(|| anyhow!("id slot for {} vanished", tx.id))?,
                }
            }
        };
        self.records.insert(key, serde_json::to_vec(tx)?)?;
        self.db.flush()?;
        debug!("stored transaction {}", tx.id);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Transaction>> {
        let Some(key) = self.ids.get(id.as_bytes())? else {
            return Ok(None);
        };
        match self.records.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn decode(bytes: &[u8]) -> Result<Transaction> {
    serde_json::from_slice(bytes).context("decoding stored transaction")
}

impl TransactionStore for SledTransactionStore {
    fn list_all(&self) -> Result<Vec<Transaction>> {
        self.records
            .iter()
            .values()
            .map(|v| decode(&v?))
            .collect()
    }

    fn update_status(&self, id: &str, status: TxStatus) -> Result<()> {
        let mut tx = self
            .get(id)?
            .ok_or_else(|| anyhow!("transaction {id} not found"))?;
        tx.status = Some(status);
        self.put(&tx)
    }
}
