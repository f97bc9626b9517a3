use crate::chain::{ChainConfig, ChainWriter, KvStore};
use crate::error::{LedgerError, Result};
use crate::{digest, now_millis, Block, Chain, Hash};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared stop signal for an in-flight nonce search.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Number of leading `'0'` characters in a hex digest.
pub fn count_leading_zero_chars(hash: &str) -> usize {
    hash.bytes().take_while(|b| *b == b'0').count()
}

pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    count_leading_zero_chars(hash) >= difficulty
}

/// Proof-of-work block producer.
#[derive(Clone, Debug)]
pub struct Miner {
    difficulty: usize,
    max_attempts: Option<u64>,
}

impl Miner {
    pub fn new(difficulty: usize) -> Self {
        Self {
            difficulty,
            max_attempts: None,
        }
    }

    pub fn from_config(config: &ChainConfig) -> Self {
        Self {
            difficulty: config.difficulty,
            max_attempts: config.max_attempts,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Mine `data` onto the tip of `chain` and append the result.
    pub fn mine<S: KvStore, D: Serialize + ?Sized>(&self, chain: &Chain<S>, data: &D) -> Result<Block> {
        self.mine_cancellable(chain, data, &CancelFlag::new())
    }

    pub fn mine_cancellable<S: KvStore, D: Serialize + ?Sized>(
        &self,
        chain: &Chain<S>,
        data: &D,
        cancel: &CancelFlag,
    ) -> Result<Block> {
        self.mine_on(&mut chain.writer(), data, cancel)
    }

    /// Mine while already holding the writer. The chain is untouched unless a
    /// valid nonce is found.
    pub fn mine_on<S: KvStore, D: Serialize + ?Sized>(
        &self,
        writer: &mut ChainWriter<'_, S>,
        data: &D,
        cancel: &CancelFlag,
    ) -> Result<Block> {
        let previous = writer.latest()?;
        let index = previous.index + 1;
        let data = serde_json::to_value(data)
            .map_err(|e| LedgerError::MiningFailed(format!("cannot serialize block data: {e}")))?;
        let data_json = data.to_string();
        let timestamp = now_millis();

        debug!("mining block {index} at difficulty {}", self.difficulty);
        let (nonce, hash) = self.search(index, timestamp, &data_json, &previous.hash, cancel)?;
        info!("mined block {index} with nonce {nonce} and hash {hash}");

        let block = Block {
            index,
            timestamp,
            data,
            previous_hash: previous.hash,
            hash,
            nonce,
        };
        writer.append(block.clone());
        Ok(block)
    }

    /// Brute-force the nonce, starting at 1, for fixed block fields.
    pub fn search(
        &self,
        index: u64,
        timestamp: u64,
        data_json: &str,
        previous_hash: &str,
        cancel: &CancelFlag,
    ) -> Result<(u64, Hash)> {
        let mut nonce = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(LedgerError::MiningCancelled { attempts: nonce });
            }
            if self.max_attempts.is_some_and(|max| nonce >= max) {
                return Err(LedgerError::AttemptLimitReached {
                    difficulty: self.difficulty,
                    attempts: nonce,
                });
            }
            nonce = nonce
                .checked_add(1)
                .ok_or_else(|| LedgerError::MiningFailed("nonce space exhausted".into()))?;
            let hash = digest(index, timestamp, data_json, previous_hash, nonce);
            if meets_difficulty(&hash, self.difficulty) {
                return Ok((nonce, hash));
            }
        }
    }
}
