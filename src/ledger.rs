//! In-memory chain state: the UTXO set, spent key images, and the validator
//! registry.
//!
//! `ChainState` is a single owned object passed to the components that need
//! it; all accessors are safe for concurrent use behind one read/write lock.
//! Readers (transaction validation, UTXO and validator lookups) take the
//! read lock; mutators (block application, validator updates) take the write
//! lock. Block application is transactional: a failing transaction rolls
//! back everything the block touched.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::genesis::GenesisConfig;
use crate::primitives::{Hash, PublicKey};
use crate::transaction::{Transaction, TxOutput};

/// Errors from ledger operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("key image already spent")]
    KeyImageSpent,
    #[error("missing ring signature")]
    MissingRingSignature,
    #[error("transaction amounts do not balance: inputs {inputs} != outputs {outputs} + fee {fee}")]
    Unbalanced {
        inputs: u128,
        outputs: u128,
        fee: u64,
    },
    #[error("invalid block height: expected {expected}, got {got}")]
    InvalidHeight { expected: u64, got: u64 },
    #[error("UTXO not found")]
    UtxoNotFound,
    #[error("validator already exists")]
    ValidatorExists,
    #[error("validator not found")]
    ValidatorNotFound,
    #[error("validator stake must be positive")]
    ZeroStake,
    #[error("state lock poisoned")]
    LockPoisoned,
}

/// Staking record for a validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorState {
    pub public_key: PublicKey,
    pub staked_amount: u64,
    pub active: bool,
    pub joined_height: u64,
    /// Block height at which unbonding completes; 0 while bonded.
    pub unbonding_until: u64,
    pub slash_count: u32,
}

/// An unspent transaction output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_hash: Hash,
    pub output_index: u32,
    pub output: TxOutput,
    pub block_height: u64,
    pub spent: bool,
}

/// UTXO map key: producing transaction hash plus output position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UtxoKey {
    pub tx_hash: Hash,
    pub index: u32,
}

impl UtxoKey {
    /// The key's byte preimage fed to the state root: the 64-character hex
    /// transaction hash followed by the big-endian output index.
    fn preimage(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(68);
        bytes.extend_from_slice(self.tx_hash.to_string().as_bytes());
        bytes.extend_from_slice(&self.index.to_be_bytes());
        bytes
    }
}

#[derive(Default)]
struct StateInner {
    utxos: HashMap<UtxoKey, Utxo>,
    spent_key_images: HashSet<PublicKey>,
    validators: HashMap<PublicKey, ValidatorState>,
    height: u64,
    total_supply: u64,
}

/// The shared chain state.
#[derive(Default)]
pub struct ChainState {
    inner: RwLock<StateInner>,
}

impl ChainState {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StateInner>, LedgerError> {
        self.inner.read().map_err(|_| LedgerError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StateInner>, LedgerError> {
        self.inner.write().map_err(|_| LedgerError::LockPoisoned)
    }

    /// Seed the state from genesis: initial validators, supply, height 0.
    pub fn init_genesis(&self, genesis: &GenesisConfig) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        for validator in &genesis.initial_validators {
            if state.validators.contains_key(&validator.public_key) {
                return Err(LedgerError::ValidatorExists);
            }
            state.validators.insert(validator.public_key, *validator);
        }
        state.total_supply = genesis.initial_supply;
        state.height = 0;
        Ok(())
    }

    /// Validate a transaction against the current state without mutating it.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let state = self.read()?;

        for input in &tx.inputs {
            if state.spent_key_images.contains(&input.key_image) {
                return Err(LedgerError::KeyImageSpent);
            }
        }

        if tx.ring_signature.is_none() {
            return Err(LedgerError::MissingRingSignature);
        }

        // Widened arithmetic so adversarial amounts cannot wrap into balance.
        let inputs: u128 = tx.inputs.iter().map(|i| i.amount as u128).sum();
        let outputs: u128 = tx.outputs.iter().map(|o| o.amount as u128).sum();
        if inputs != outputs + tx.fee as u128 {
            return Err(LedgerError::Unbalanced {
                inputs,
                outputs,
                fee: tx.fee,
            });
        }

        Ok(())
    }

    /// Apply a finalized block: consume key images, create UTXOs, advance
    /// the height. Either the whole block applies or the state is left
    /// untouched.
    pub fn apply_block(&self, block: &Block) -> Result<(), LedgerError> {
        let mut state = self.write()?;

        if block.header.height != state.height + 1 {
            return Err(LedgerError::InvalidHeight {
                expected: state.height + 1,
                got: block.header.height,
            });
        }

        // Track touched entries so a mid-block failure can be undone.
        let mut inserted_images: Vec<PublicKey> = Vec::new();
        let mut inserted_utxos: Vec<UtxoKey> = Vec::new();

        for tx in &block.transactions {
            if let Err(err) = apply_transaction(
                &mut state,
                tx,
                block.header.height,
                &mut inserted_images,
                &mut inserted_utxos,
            ) {
                for image in &inserted_images {
                    state.spent_key_images.remove(image);
                }
                for key in &inserted_utxos {
                    state.utxos.remove(key);
                }
                return Err(err);
            }
        }

        state.height = block.header.height;
        Ok(())
    }

    /// Look up a UTXO by producing transaction and output index.
    pub fn get_utxo(&self, tx_hash: Hash, index: u32) -> Result<Utxo, LedgerError> {
        let state = self.read()?;
        state
            .utxos
            .get(&UtxoKey { tx_hash, index })
            .copied()
            .ok_or(LedgerError::UtxoNotFound)
    }

    /// All unspent outputs, for decoy selection and wallet scanning.
    pub fn unspent_utxos(&self) -> Result<Vec<Utxo>, LedgerError> {
        let state = self.read()?;
        Ok(state.utxos.values().filter(|u| !u.spent).copied().collect())
    }

    /// Whether a key image has been consumed.
    pub fn is_key_image_spent(&self, key_image: &PublicKey) -> Result<bool, LedgerError> {
        Ok(self.read()?.spent_key_images.contains(key_image))
    }

    /// Register a new validator. Fails if the key is already present or the
    /// stake is zero; an active validator always carries stake.
    pub fn add_validator(
        &self,
        public_key: PublicKey,
        stake: u64,
        height: u64,
    ) -> Result<(), LedgerError> {
        if stake == 0 {
            return Err(LedgerError::ZeroStake);
        }
        let mut state = self.write()?;
        if state.validators.contains_key(&public_key) {
            return Err(LedgerError::ValidatorExists);
        }
        state.validators.insert(
            public_key,
            ValidatorState {
                public_key,
                staked_amount: stake,
                active: true,
                joined_height: height,
                unbonding_until: 0,
                slash_count: 0,
            },
        );
        Ok(())
    }

    /// Apply an in-place update to a validator (slashing, unbonding).
    pub fn update_validator(
        &self,
        public_key: &PublicKey,
        update: impl FnOnce(&mut ValidatorState),
    ) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        let validator = state
            .validators
            .get_mut(public_key)
            .ok_or(LedgerError::ValidatorNotFound)?;
        update(validator);
        Ok(())
    }

    /// Look up a validator.
    pub fn get_validator(&self, public_key: &PublicKey) -> Result<ValidatorState, LedgerError> {
        self.read()?
            .validators
            .get(public_key)
            .copied()
            .ok_or(LedgerError::ValidatorNotFound)
    }

    /// All active validators in canonical order: sorted by public key
    /// ascending. Proposer selection iterates this list, so the ordering is
    /// part of the protocol.
    pub fn active_validators(&self) -> Result<Vec<ValidatorState>, LedgerError> {
        let state = self.read()?;
        let mut active: Vec<ValidatorState> = state
            .validators
            .values()
            .filter(|v| v.active)
            .copied()
            .collect();
        active.sort_by_key(|v| v.public_key);
        Ok(active)
    }

    /// Commitment to the UTXO set: the double SHA-256 over every UTXO key
    /// preimage. Keys are iterated in sorted order so every node derives the
    /// same root for the same set.
    pub fn compute_state_root(&self) -> Result<Hash, LedgerError> {
        let state = self.read()?;
        let mut keys: Vec<UtxoKey> = state.utxos.keys().copied().collect();
        keys.sort();
        let preimages: Vec<Vec<u8>> = keys.iter().map(|k| k.preimage()).collect();
        let parts: Vec<&[u8]> = preimages.iter().map(|p| p.as_slice()).collect();
        Ok(crate::sha256d(&parts))
    }

    /// Current chain height.
    pub fn height(&self) -> Result<u64, LedgerError> {
        Ok(self.read()?.height)
    }

    /// Total supply recorded at genesis.
    pub fn total_supply(&self) -> Result<u64, LedgerError> {
        Ok(self.read()?.total_supply)
    }
}

/// Apply one transaction under the held write lock, recording every
/// insertion for rollback.
fn apply_transaction(
    state: &mut StateInner,
    tx: &Transaction,
    block_height: u64,
    inserted_images: &mut Vec<PublicKey>,
    inserted_utxos: &mut Vec<UtxoKey>,
) -> Result<(), LedgerError> {
    // Re-check under the write lock; also catches conflicts between
    // transactions inside the same block.
    for input in &tx.inputs {
        if state.spent_key_images.contains(&input.key_image) {
            return Err(LedgerError::KeyImageSpent);
        }
    }

    for input in &tx.inputs {
        state.spent_key_images.insert(input.key_image);
        inserted_images.push(input.key_image);
    }

    let tx_hash = tx.hash();
    for (i, output) in tx.outputs.iter().enumerate() {
        let key = UtxoKey {
            tx_hash,
            index: i as u32,
        };
        state.utxos.insert(
            key,
            Utxo {
                tx_hash,
                output_index: i as u32,
                output: *output,
                block_height,
                spent: false,
            },
        );
        inserted_utxos.push(key);
    }

    Ok(())
}
