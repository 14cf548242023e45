//! Pending transaction pool.
//!
//! Holds validated transactions waiting to be included in a block. The pool
//! is guarded by its own lock; proposers drain it in insertion order.
//! Transactions that would consume a key image already claimed by a pooled
//! transaction are rejected so a proposer never packs a self-conflicting
//! block.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::primitives::{Hash, PublicKey};
use crate::transaction::Transaction;

/// Errors from mempool operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MempoolError {
    #[error("transaction already in pool")]
    Duplicate,
    #[error("key image conflicts with a pooled transaction")]
    KeyImageConflict(PublicKey),
    #[error("mempool full")]
    Full,
    #[error("mempool lock poisoned")]
    LockPoisoned,
}

#[derive(Default)]
struct PoolInner {
    queue: VecDeque<Transaction>,
    hashes: HashSet<Hash>,
    key_images: HashSet<PublicKey>,
}

/// The pending pool.
pub struct Mempool {
    max_txs: usize,
    inner: Mutex<PoolInner>,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(crate::constants::MEMPOOL_MAX_TXS)
    }
}

impl Mempool {
    pub fn new(max_txs: usize) -> Self {
        Mempool {
            max_txs,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolInner>, MempoolError> {
        self.inner.lock().map_err(|_| MempoolError::LockPoisoned)
    }

    /// Add a validated transaction to the pool.
    pub fn insert(&self, tx: Transaction) -> Result<(), MempoolError> {
        let mut pool = self.lock()?;

        if pool.queue.len() >= self.max_txs {
            return Err(MempoolError::Full);
        }
        let hash = tx.hash();
        if pool.hashes.contains(&hash) {
            return Err(MempoolError::Duplicate);
        }
        for input in &tx.inputs {
            if pool.key_images.contains(&input.key_image) {
                return Err(MempoolError::KeyImageConflict(input.key_image));
            }
        }

        for input in &tx.inputs {
            pool.key_images.insert(input.key_image);
        }
        pool.hashes.insert(hash);
        pool.queue.push_back(tx);
        Ok(())
    }

    /// Remove and return up to `limit` transactions in insertion order.
    pub fn drain(&self, limit: usize) -> Result<Vec<Transaction>, MempoolError> {
        let mut pool = self.lock()?;
        let take = limit.min(pool.queue.len());
        let drained: Vec<Transaction> = pool.queue.drain(..take).collect();
        for tx in &drained {
            pool.hashes.remove(&tx.hash());
            for input in &tx.inputs {
                pool.key_images.remove(&input.key_image);
            }
        }
        Ok(drained)
    }

    /// Drop any pooled transaction that spends one of the given key images.
    ///
    /// Called after a block finalizes: those spends are now on-chain and the
    /// pooled transactions can never apply.
    pub fn evict_spent(&self, spent: &[PublicKey]) -> Result<usize, MempoolError> {
        let mut pool = self.lock()?;
        let spent: HashSet<&PublicKey> = spent.iter().collect();
        let before = pool.queue.len();

        let retained: VecDeque<Transaction> = pool
            .queue
            .drain(..)
            .filter(|tx| !tx.inputs.iter().any(|i| spent.contains(&i.key_image)))
            .collect();

        pool.hashes = retained.iter().map(|tx| tx.hash()).collect();
        pool.key_images = retained
            .iter()
            .flat_map(|tx| tx.inputs.iter().map(|i| i.key_image))
            .collect();
        let evicted = before - retained.len();
        pool.queue = retained;
        Ok(evicted)
    }

    pub fn len(&self) -> Result<usize, MempoolError> {
        Ok(self.lock()?.queue.len())
    }

    pub fn is_empty(&self) -> Result<bool, MempoolError> {
        Ok(self.lock()?.queue.is_empty())
    }
}
