//! Transaction sync service.
//!
//! `add_transaction` is the typed, error-returning path. `sync_transaction`,
//! `sync_pending` and `verify_transaction` form the boundary: they never
//! return errors, only booleans and counts, so one bad transaction cannot
//! abort a batch.

use crate::chain::{Chain, KvStore};
use crate::error::{LedgerError, Result};
use crate::mine::{CancelFlag, Miner};
use crate::{Block, Transaction, TxStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// External store of client transactions.
pub trait TransactionStore: Send + Sync {
    fn list_all(&self) -> anyhow::Result<Vec<Transaction>>;
    fn update_status(&self, id: &str, status: TxStatus) -> anyhow::Result<()>;
}

/// Verifies a signature made over a transaction by an external key holder.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &Transaction, signature: &str, public_key: &str)
        -> anyhow::Result<bool>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub success: usize,
    pub failed: usize,
}

pub struct SyncService<S: KvStore, T: TransactionStore, V: SignatureVerifier> {
    chain: Arc<Chain<S>>,
    miner: Miner,
    transactions: Arc<T>,
    verifier: Arc<V>,
    cancel: CancelFlag,
}

impl<S: KvStore, T: TransactionStore, V: SignatureVerifier> SyncService<S, T, V> {
    pub fn new(chain: Arc<Chain<S>>, transactions: Arc<T>, verifier: Arc<V>) -> Self {
        let miner = Miner::from_config(chain.config());
        Self {
            chain,
            miner,
            transactions,
            verifier,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_miner(mut self, miner: Miner) -> Self {
        self.miner = miner;
        self
    }

    pub fn chain(&self) -> &Arc<Chain<S>> {
        &self.chain
    }

    pub fn transactions(&self) -> &Arc<T> {
        &self.transactions
    }

    /// Flag that aborts any mining started through this service.
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Mine `tx` into the chain unless it lacks an id or is already recorded.
    /// The duplicate check and the append happen under one writer lock.
    pub fn add_transaction(&self, tx: &Transaction) -> Result<Block> {
        if !tx.has_id() {
            return Err(LedgerError::InvalidTransaction(
                "transaction has no id".into(),
            ));
        }
        let mut writer = self.chain.writer();
        if writer.contains_transaction(&tx.id) {
            return Err(LedgerError::DuplicateTransaction(tx.id.clone()));
        }
        self.miner.mine_on(&mut writer, tx, &self.cancel)
    }

    /// Record `tx` and audit the whole chain. A failed audit fails the sync
    /// but the appended block is not rolled back.
    pub fn try_sync_transaction(&self, tx: &Transaction) -> Result<Block> {
        let block = self.add_transaction(tx)?;
        if !self.chain.is_valid() {
            return Err(LedgerError::ValidationFailed(block.index));
        }
        Ok(block)
    }

    pub fn sync_transaction(&self, tx: &Transaction) -> bool {
        info!("syncing transaction {} to chain", tx.id);
        match self.try_sync_transaction(tx) {
            Ok(block) => {
                info!("transaction {} synced to block {}", tx.id, block.index);
                true
            }
            Err(err) => {
                warn!("failed to sync transaction {}: {err}", tx.id);
                false
            }
        }
    }

    /// Sync every pending transaction, one at a time, in store order.
    pub fn sync_pending(&self) -> SyncReport {
        info!("syncing all pending transactions");
        let mut report = SyncReport::default();
        let all = match self.transactions.list_all() {
            Ok(all) => all,
            Err(err) => {
                error!("failed to list transactions: {err:#}");
                return report;
            }
        };
        for tx in all.iter().filter(|t| t.status == Some(TxStatus::Pending)) {
            if !self.sync_transaction(tx) {
                report.failed += 1;
                continue;
            }
            report.success += 1;
            if let Err(err) = self.transactions.update_status(&tx.id, TxStatus::Synced) {
                error!("transaction {} synced but status not updated: {err:#}", tx.id);
            }
        }
        info!(
            "pending sync done: {} succeeded, {} failed",
            report.success, report.failed
        );
        report
    }

    /// Signature check first, then presence in the chain. Only a verified
    /// transaction that is already recorded is marked `verified`.
    pub fn try_verify_transaction(
        &self,
        tx: &Transaction,
        signature: &str,
        public_key: &str,
    ) -> Result<bool> {
        if !self.verifier.verify(tx, signature, public_key)? {
            warn!("transaction {} has an invalid signature", tx.id);
            return Ok(false);
        }
        if !self.chain.contains_transaction(&tx.id) {
            warn!("transaction {} not found in chain", tx.id);
            return Ok(false);
        }
        self.transactions.update_status(&tx.id, TxStatus::Verified)?;
        Ok(true)
    }

    pub fn verify_transaction(&self, tx: &Transaction, signature: &str, public_key: &str) -> bool {
        info!("verifying transaction {}", tx.id);
        match self.try_verify_transaction(tx, signature, public_key) {
            Ok(verified) => {
                if verified {
                    info!("transaction {} verified", tx.id);
                }
                verified
            }
            Err(err) => {
                error!("verification of transaction {} failed: {err}", tx.id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChainConfig, MemoryStore};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeStore {
        txs: Mutex<Vec<Transaction>>,
        fail_list: bool,
    }

    impl FakeStore {
        fn with(txs: Vec<Transaction>) -> Self {
            Self {
                txs: Mutex::new(txs),
                fail_list: false,
            }
        }

        fn statuses(&self) -> HashMap<String, Option<TxStatus>> {
            self.txs
                .lock()
                .iter()
                .map(|t| (t.id.clone(), t.status))
                .collect()
        }
    }

    impl TransactionStore for FakeStore {
        fn list_all(&self) -> anyhow::Result<Vec<Transaction>> {
            if self.fail_list {
                anyhow::bail!("store offline");
            }
            Ok(self.txs.lock().clone())
        }

        fn update_status(&self, id: &str, status: TxStatus) -> anyhow::Result<()> {
            let mut txs = self.txs.lock();
            let tx = txs
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| anyhow::anyhow!("unknown transaction {id}"))?;
            tx.status = Some(status);
            Ok(())
        }
    }

    /// Accepts exactly one signature string, or errors when it sees "boom".
    struct FakeVerifier;

    impl SignatureVerifier for FakeVerifier {
        fn verify(&self, _payload: &Transaction, signature: &str, _pk: &str) -> anyhow::Result<bool> {
            if signature == "boom" {
                anyhow::bail!("malformed signature");
            }
            Ok(signature == "good")
        }
    }

    type Service = SyncService<MemoryStore, FakeStore, FakeVerifier>;

    fn service_with(store: FakeStore) -> Service {
        let chain = Chain::load(Arc::new(MemoryStore::new()), ChainConfig::default());
        SyncService::new(Arc::new(chain), Arc::new(store), Arc::new(FakeVerifier))
    }

    fn service() -> Service {
        service_with(FakeStore::default())
    }

    #[test]
    fn sync_appends_transaction_payload() {
        let svc = service();
        let tx = Transaction::new("tx1")
            .with_field("amount", 150)
            .with_field("timestamp", 1_700_000_000_000u64);

        assert!(svc.sync_transaction(&tx));

        let latest = svc.chain().latest().unwrap();
        assert_eq!(latest.index, 1);
        assert_eq!(latest.data, serde_json::to_value(&tx).unwrap());
        assert!(latest.hash.starts_with("00"));
    }

    #[test]
    fn duplicate_sync_is_rejected() {
        let svc = service();
        let tx = Transaction::new("tx2").with_field("amount", 300);

        assert!(svc.sync_transaction(&tx));
        assert!(!svc.sync_transaction(&tx));

        let blocks = svc.chain().snapshot();
        assert_eq!(blocks.iter().filter(|b| b.payload_id() == Some("tx2")).count(), 1);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn add_transaction_errors_are_typed() {
        let svc = service();
        let err = svc.add_transaction(&Transaction::new("")).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransaction(_)));

        svc.add_transaction(&Transaction::new("dup")).unwrap();
        let err = svc.add_transaction(&Transaction::new("dup")).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateTransaction(id) if id == "dup"));
    }

    #[test]
    fn missing_id_fails_closed() {
        let svc = service();
        let tx: Transaction = serde_json::from_value(json!({"amount": 3})).unwrap();
        assert!(!svc.sync_transaction(&tx));
        assert_eq!(svc.chain().len(), 1);
    }

    #[test]
    fn mining_failure_degrades_to_false() {
        let svc = service().with_miner(Miner::new(64).with_max_attempts(5));
        assert!(!svc.sync_transaction(&Transaction::new("slow")));
        assert_eq!(svc.chain().len(), 1);
    }

    #[test]
    fn cancelled_service_does_not_mine() {
        let svc = service();
        svc.cancel_flag().cancel();
        assert!(!svc.sync_transaction(&Transaction::new("never")));
        assert_eq!(svc.chain().len(), 1);
    }

    #[test]
    fn batch_sync_skips_duplicates() {
        let svc = service_with(FakeStore::with(vec![
            Transaction::pending("a"),
            Transaction::pending("b"),
            Transaction::pending("c"),
        ]));
        svc.add_transaction(&Transaction::new("b")).unwrap();

        let report = svc.sync_pending();

        assert_eq!(report, SyncReport { success: 2, failed: 1 });
        let statuses = svc.transactions().statuses();
        assert_eq!(statuses["a"], Some(TxStatus::Synced));
        assert_eq!(statuses["b"], Some(TxStatus::Pending));
        assert_eq!(statuses["c"], Some(TxStatus::Synced));
        assert_eq!(svc.chain().len(), 4);
    }

    #[test]
    fn batch_sync_ignores_non_pending_and_keeps_order() {
        let mut synced = Transaction::pending("old");
        synced.status = Some(TxStatus::Synced);
        let svc = service_with(FakeStore::with(vec![
            Transaction::pending("first"),
            synced,
            Transaction::new("no-status"),
            Transaction::pending("second"),
        ]));

        assert_eq!(svc.sync_pending(), SyncReport { success: 2, failed: 0 });
        let ids: Vec<_> = svc
            .chain()
            .snapshot()
            .iter()
            .filter_map(|b| b.payload_id().map(str::to_string))
            .collect();
        assert_eq!(ids, ["first", "second"]);
    }

    #[test]
    fn batch_sync_with_unreadable_store_reports_nothing() {
        let svc = service_with(FakeStore {
            fail_list: true,
            ..FakeStore::default()
        });
        assert_eq!(svc.sync_pending(), SyncReport::default());
    }

    #[test]
    fn verify_requires_valid_signature() {
        let svc = service_with(FakeStore::with(vec![Transaction::pending("v1")]));
        let tx = Transaction::new("v1");
        svc.add_transaction(&tx).unwrap();

        assert!(!svc.verify_transaction(&tx, "bad", "pk"));
        assert!(!svc.verify_transaction(&tx, "boom", "pk"));
        assert_eq!(svc.transactions().statuses()["v1"], Some(TxStatus::Pending));
    }

    #[test]
    fn verify_requires_recorded_transaction() {
        let svc = service_with(FakeStore::with(vec![Transaction::pending("v2")]));
        assert!(!svc.verify_transaction(&Transaction::new("v2"), "good", "pk"));
        assert_eq!(svc.transactions().statuses()["v2"], Some(TxStatus::Pending));
    }

    #[test]
    fn verify_marks_recorded_transaction() {
        let svc = service_with(FakeStore::with(vec![Transaction::pending("v3")]));
        let tx = Transaction::new("v3").with_field("amount", 1);
        assert!(svc.sync_transaction(&tx));

        assert!(svc.verify_transaction(&tx, "good", "pk"));
        assert_eq!(svc.transactions().statuses()["v3"], Some(TxStatus::Verified));
    }

    #[test]
    fn failed_audit_fails_sync_but_keeps_block() {
        let svc = service();
        let genesis = svc.chain().latest().unwrap();
        svc.chain().append(Block {
            index: 1,
            timestamp: genesis.timestamp,
            data: json!({"id": "forged"}),
            previous_hash: genesis.hash,
            hash: "ff".into(),
            nonce: 1,
        });
        assert_eq!(svc.chain().len(), 2);

        let err = svc.try_sync_transaction(&Transaction::new("p0")).unwrap_err();
        assert!(matches!(err, LedgerError::ValidationFailed(2)));

        assert!(!svc.sync_transaction(&Transaction::new("p1")));
        assert_eq!(svc.chain().len(), 4);
        assert!(svc.chain().contains_transaction("p1"));
        assert_eq!(svc.chain().latest().unwrap().payload_id(), Some("p1"));
    }

    #[test]
    fn verify_status_update_failure_degrades_to_false() {
        // recorded in the chain, but unknown to the transaction store
        let svc = service();
        let tx = Transaction::new("orphan");
        svc.add_transaction(&tx).unwrap();
        assert!(!svc.verify_transaction(&tx, "good", "pk"));
    }
}
