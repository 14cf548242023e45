//! Stake-weighted BFT consensus: proposer rotation, block validation, vote
//! collection, and slashing.
//!
//! Proposer selection is a pure function of (height, round) over the active
//! validator set in canonical order, weighted by stake. A block is final
//! once votes carrying at least ⌈2·totalStake/3⌉ cumulative stake have been
//! collected for its header hash. A validator that signs two different
//! blocks at the same round is slashed.
//!
//! The engine's mutable state (the round counter, the pending vote map, and
//! the cached validator snapshot) lives behind its own mutex, separate from
//! the ledger's lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::block::{compute_tx_root, Block, BlockHeader, ValidatorSignature};
use crate::crypto::keys::KeyPair;
use crate::crypto::ring;
use crate::ledger::{ChainState, LedgerError, ValidatorState};
use crate::primitives::{Hash, PublicKey};
use crate::transaction::{StakingTx, StakingType, Transaction};

/// Errors from consensus operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    #[error("no validators in set")]
    NoValidators,
    #[error("node is not a validator")]
    NotAValidator,
    #[error("unknown validator")]
    UnknownValidator,
    #[error("inactive validator")]
    InactiveValidator,
    #[error("invalid vote signature")]
    InvalidVoteSignature,
    #[error("vote round {got} does not match current round {current}")]
    StaleRound { got: u32, current: u32 },
    #[error("double-vote detected")]
    DoubleVote,
    #[error("insufficient validator stake for finality: {collected} < {required}")]
    InsufficientQuorum { collected: u64, required: u64 },
    #[error("invalid block height: expected {expected}, got {got}")]
    InvalidHeight { expected: u64, got: u64 },
    #[error("invalid previous block hash")]
    InvalidPrevHash,
    #[error("block timestamp too far in future")]
    TimestampTooFar,
    #[error("invalid proposer for this round")]
    InvalidProposer,
    #[error("invalid ring signature")]
    InvalidRingSignature,
    #[error("ring signature key image does not match transaction input")]
    KeyImageMismatch,
    #[error("invalid staking signature")]
    InvalidStakingSignature,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("engine lock poisoned")]
    LockPoisoned,
}

/// Slashable infractions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlashReason {
    /// Signed two different blocks at the same round.
    DoubleVote,
    /// Proposed a block that fails validation.
    InvalidBlock,
    /// Missed-proposal counter crossed the configured threshold.
    Downtime,
}

impl std::fmt::Display for SlashReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SlashReason::DoubleVote => "double-vote",
            SlashReason::InvalidBlock => "invalid-block",
            SlashReason::Downtime => "downtime",
        })
    }
}

struct StoredVote {
    signature: ValidatorSignature,
    block_hash: Hash,
}

struct EngineInner {
    round: u32,
    /// Active validators in canonical order (sorted by public key).
    validator_set: Vec<ValidatorState>,
    total_stake: u64,
    votes: HashMap<PublicKey, StoredVote>,
    pending_block: Option<Block>,
    missed_proposals: HashMap<PublicKey, u32>,
}

/// The consensus engine.
pub struct Engine {
    state: Arc<ChainState>,
    /// Local validator identity, when this node validates.
    identity: Option<KeyPair>,
    /// Missed proposals before a downtime slash; None disables the check
    /// (operator policy).
    downtime_threshold: Option<u32>,
    inner: Mutex<EngineInner>,
}

impl Engine {
    pub fn new(state: Arc<ChainState>, identity: Option<KeyPair>) -> Self {
        Engine {
            state,
            identity,
            downtime_threshold: None,
            inner: Mutex::new(EngineInner {
                round: 0,
                validator_set: Vec::new(),
                total_stake: 0,
                votes: HashMap::new(),
                pending_block: None,
                missed_proposals: HashMap::new(),
            }),
        }
    }

    /// Enable downtime slashing after `threshold` missed proposals.
    pub fn with_downtime_threshold(mut self, threshold: u32) -> Self {
        self.downtime_threshold = Some(threshold);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, EngineInner>, ConsensusError> {
        self.inner.lock().map_err(|_| ConsensusError::LockPoisoned)
    }

    /// The local validator's public key, if any.
    pub fn local_validator(&self) -> Option<PublicKey> {
        self.identity.as_ref().map(|kp| kp.public)
    }

    /// The current BFT round.
    pub fn round(&self) -> Result<u32, ConsensusError> {
        Ok(self.lock()?.round)
    }

    /// Refresh the cached validator snapshot from the ledger.
    pub fn update_validator_set(&self) -> Result<(), ConsensusError> {
        let validators = self.state.active_validators()?;
        let total: u64 = validators.iter().map(|v| v.staked_amount).sum();
        let mut inner = self.lock()?;
        inner.validator_set = validators;
        inner.total_stake = total;
        Ok(())
    }

    /// Deterministically select the proposer for (height, round).
    pub fn select_proposer(&self, height: u64, round: u32) -> Result<PublicKey, ConsensusError> {
        let inner = self.lock()?;
        select_weighted(&inner.validator_set, inner.total_stake, height, round)
    }

    /// Build a block proposal on top of `prev_block`.
    pub fn propose_block(
        &self,
        txs: Vec<Transaction>,
        prev_block: &Block,
    ) -> Result<Block, ConsensusError> {
        let identity = self.identity.as_ref().ok_or(ConsensusError::NotAValidator)?;
        let round = self.lock()?.round;

        let header = BlockHeader {
            height: prev_block.header.height + 1,
            timestamp: unix_now(),
            prev_block_hash: prev_block.hash(),
            tx_root: compute_tx_root(&txs),
            state_root: self.state.compute_state_root()?,
            proposer: identity.public,
            round,
        };

        Ok(Block {
            header,
            transactions: txs,
            validators: vec![],
        })
    }

    /// Validate a proposed block against its predecessor and the ledger.
    pub fn validate_block(&self, block: &Block, prev_block: &Block) -> Result<(), ConsensusError> {
        let expected_height = prev_block.header.height + 1;
        if block.header.height != expected_height {
            return Err(ConsensusError::InvalidHeight {
                expected: expected_height,
                got: block.header.height,
            });
        }

        if block.header.prev_block_hash != prev_block.hash() {
            return Err(ConsensusError::InvalidPrevHash);
        }

        if block.header.timestamp > unix_now() + crate::constants::MAX_TIMESTAMP_SKEW_SECS {
            return Err(ConsensusError::TimestampTooFar);
        }

        let proposer = self.select_proposer(block.header.height, block.header.round)?;
        if proposer != block.header.proposer {
            return Err(ConsensusError::InvalidProposer);
        }

        for tx in &block.transactions {
            self.state.validate_transaction(tx)?;
            verify_ring(tx)?;
        }

        Ok(())
    }

    /// Sign the block's header hash as the local validator.
    pub fn vote_for_block(&self, block: &Block) -> Result<ValidatorSignature, ConsensusError> {
        let identity = self.identity.as_ref().ok_or(ConsensusError::NotAValidator)?;
        let round = self.lock()?.round;
        let block_hash = block.hash();
        Ok(ValidatorSignature {
            validator: identity.public,
            signature: identity.sign(&block_hash.0),
            round,
        })
    }

    /// Collect a vote for the block with the given header hash.
    ///
    /// The first well-formed vote from a validator at a round wins; a second
    /// vote for a different block at the same round slashes the validator.
    /// An identical re-delivery is ignored.
    pub fn collect_vote(
        &self,
        vote: &ValidatorSignature,
        block_hash: Hash,
    ) -> Result<(), ConsensusError> {
        let validator = self
            .state
            .get_validator(&vote.validator)
            .map_err(|_| ConsensusError::UnknownValidator)?;
        if !validator.active {
            return Err(ConsensusError::InactiveValidator);
        }

        if !crate::crypto::keys::verify(&vote.validator, &block_hash.0, &vote.signature) {
            return Err(ConsensusError::InvalidVoteSignature);
        }

        let mut inner = self.lock()?;
        if vote.round != inner.round {
            return Err(ConsensusError::StaleRound {
                got: vote.round,
                current: inner.round,
            });
        }

        if let Some(stored) = inner.votes.get(&vote.validator) {
            if stored.block_hash != block_hash {
                drop(inner);
                self.slash(&vote.validator, SlashReason::DoubleVote)?;
                return Err(ConsensusError::DoubleVote);
            }
            // Duplicate delivery of the same vote: at-least-once transport.
            return Ok(());
        }

        inner.votes.insert(
            vote.validator,
            StoredVote {
                signature: *vote,
                block_hash,
            },
        );
        Ok(())
    }

    /// Whether collected votes reach the two-thirds-by-stake quorum.
    /// A set with no stake can never make progress.
    pub fn has_quorum(&self) -> Result<bool, ConsensusError> {
        let inner = self.lock()?;
        if inner.total_stake == 0 {
            return Ok(false);
        }
        Ok(collected_stake(&inner) >= crate::constants::quorum_threshold(inner.total_stake))
    }

    /// Finalize a block: attach the collected votes, verify quorum, reset
    /// the vote map, and advance the round.
    pub fn finalize_block(&self, block: &mut Block) -> Result<(), ConsensusError> {
        let mut inner = self.lock()?;
        if inner.total_stake == 0 {
            return Err(ConsensusError::NoValidators);
        }

        let collected = collected_stake(&inner);
        let required = crate::constants::quorum_threshold(inner.total_stake);
        if collected < required {
            return Err(ConsensusError::InsufficientQuorum {
                collected,
                required,
            });
        }

        let mut votes: Vec<ValidatorSignature> =
            inner.votes.values().map(|v| v.signature).collect();
        // Canonical attachment order.
        votes.sort_by_key(|v| v.validator);
        block.validators.extend(votes);

        inner.votes.clear();
        inner.pending_block = None;
        inner.round += 1;
        Ok(())
    }

    /// Stash the block currently being voted on.
    pub fn set_pending_block(&self, block: Block) -> Result<(), ConsensusError> {
        self.lock()?.pending_block = Some(block);
        Ok(())
    }

    /// The block currently being voted on, if any.
    pub fn pending_block(&self) -> Result<Option<Block>, ConsensusError> {
        Ok(self.lock()?.pending_block.clone())
    }

    /// Take the pending block out of the engine.
    pub fn take_pending_block(&self) -> Result<Option<Block>, ConsensusError> {
        Ok(self.lock()?.pending_block.take())
    }

    /// Slash a validator: burn a fraction of its stake and deactivate it
    /// after repeated infractions. The slashing record stays local.
    pub fn slash(&self, validator: &PublicKey, reason: SlashReason) -> Result<(), ConsensusError> {
        self.state.update_validator(validator, |v| {
            let slashed = v.staked_amount * crate::constants::SLASH_PERCENTAGE / 100;
            v.staked_amount -= slashed;
            v.slash_count += 1;
            if v.slash_count >= crate::constants::MAX_SLASH_COUNT {
                v.active = false;
            }
            tracing::warn!(
                validator = %v.public_key,
                %reason,
                slashed,
                remaining = v.staked_amount,
                slash_count = v.slash_count,
                "validator slashed"
            );
        })?;
        Ok(())
    }

    /// Record a missed proposal window; slashes for downtime once the
    /// configured threshold is crossed.
    pub fn record_missed_proposal(&self, validator: &PublicKey) -> Result<(), ConsensusError> {
        let Some(threshold) = self.downtime_threshold else {
            return Ok(());
        };
        let crossed = {
            let mut inner = self.lock()?;
            let count = inner.missed_proposals.entry(*validator).or_insert(0);
            *count += 1;
            if *count >= threshold {
                *count = 0;
                true
            } else {
                false
            }
        };
        if crossed {
            self.slash(validator, SlashReason::Downtime)?;
        }
        Ok(())
    }

    /// Apply a staking transaction: bond a new validator or begin unbonding
    /// an existing one. Authenticated by the validator's spend key.
    pub fn process_staking_tx(&self, stx: &StakingTx, height: u64) -> Result<(), ConsensusError> {
        if !stx.verify() {
            return Err(ConsensusError::InvalidStakingSignature);
        }
        match stx.tx_type {
            StakingType::Bond => {
                self.state.add_validator(stx.validator, stx.amount, height)?;
            }
            StakingType::Unbond => {
                self.state.update_validator(&stx.validator, |v| {
                    v.active = false;
                    v.unbonding_until = height + crate::constants::UNBONDING_PERIOD;
                })?;
            }
        }
        Ok(())
    }
}

/// Stake-weighted deterministic selection over the canonical validator list.
fn select_weighted(
    validators: &[ValidatorState],
    total_stake: u64,
    height: u64,
    round: u32,
) -> Result<PublicKey, ConsensusError> {
    if validators.is_empty() || total_stake == 0 {
        return Err(ConsensusError::NoValidators);
    }

    let mut seed_input = [0u8; 12];
    seed_input[..8].copy_from_slice(&height.to_be_bytes());
    seed_input[8..].copy_from_slice(&round.to_be_bytes());
    let seed = crate::sha256(&[&seed_input]);

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&seed.0[..8]);
    let selection = u64::from_be_bytes(prefix) % total_stake;

    let mut cumulative = 0u64;
    for validator in validators {
        cumulative += validator.staked_amount;
        if selection < cumulative {
            return Ok(validator.public_key);
        }
    }

    // Unreachable while total_stake equals the sum of the set.
    Ok(validators[0].public_key)
}

/// Cumulative stake behind the collected votes, measured against the cached
/// snapshot.
fn collected_stake(inner: &EngineInner) -> u64 {
    inner
        .votes
        .keys()
        .filter_map(|voter| {
            inner
                .validator_set
                .iter()
                .find(|v| &v.public_key == voter)
                .map(|v| v.staked_amount)
        })
        .sum()
}

/// Structural ring-signature check for a transaction: the signature must
/// verify over the transaction hash and its key image must match the first
/// input's. Invoked on ingest and again during block validation, before any
/// transaction is applied.
pub fn verify_ring(tx: &Transaction) -> Result<(), ConsensusError> {
    let Some(sig) = &tx.ring_signature else {
        return Err(ConsensusError::Ledger(LedgerError::MissingRingSignature));
    };
    if let Some(first) = tx.inputs.first() {
        if sig.key_image != first.key_image {
            return Err(ConsensusError::KeyImageMismatch);
        }
    }
    if !ring::verify(sig, &tx.hash().0) {
        return Err(ConsensusError::InvalidRingSignature);
    }
    Ok(())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
