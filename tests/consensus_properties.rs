//! Consensus property tests: determinism, stake-proportionality, quorum
//! arithmetic, and equivocation slashing, exercised through the public
//! engine API.
//!
//! Properties verified:
//! - **Determinism**: proposer selection is a pure function of the active
//!   validator set and (height, round), and agrees across engines
//! - **Proportionality**: over many heights the selection frequency of each
//!   validator converges to its stake share
//! - **Quorum**: finalization succeeds exactly when collected stake reaches
//!   ⌈2·total/3⌉
//! - **Accountability**: a validator voting for two blocks at one round
//!   loses exactly the slash fraction and gains a slash count

use std::collections::HashMap;
use std::sync::Arc;

use obscura::block::{compute_tx_root, Block, BlockHeader, ValidatorSignature};
use obscura::consensus::{ConsensusError, Engine};
use obscura::constants;
use obscura::crypto::keys::KeyPair;
use obscura::ledger::ChainState;
use obscura::primitives::{Hash, PublicKey};

// ── Helpers ─────────────────────────────────────────────────────────────

/// A state populated with fixed-key validators of the given stakes.
fn state_with_stakes(stakes: &[(u8, u64)]) -> Arc<ChainState> {
    let state = Arc::new(ChainState::new());
    for (key, stake) in stakes {
        state
            .add_validator(PublicKey([*key; 32]), *stake, 0)
            .unwrap();
    }
    state
}

fn engine_over(state: Arc<ChainState>, identity: Option<KeyPair>) -> Engine {
    let engine = Engine::new(state, identity);
    engine.update_validator_set().unwrap();
    engine
}

fn genesis_block() -> Block {
    Block {
        header: BlockHeader {
            height: 0,
            timestamp: 0,
            prev_block_hash: Hash::default(),
            tx_root: compute_tx_root(&[]),
            state_root: Hash::default(),
            proposer: PublicKey::default(),
            round: 0,
        },
        transactions: vec![],
        validators: vec![],
    }
}

// ── Determinism ─────────────────────────────────────────────────────────

#[test]
fn proposer_selection_is_pure() {
    let engine = engine_over(state_with_stakes(&[(1, 50), (2, 30), (3, 20)]), None);
    for height in [1u64, 2, 100, 9_999] {
        for round in [0u32, 1, 7] {
            let first = engine.select_proposer(height, round).unwrap();
            for _ in 0..5 {
                assert_eq!(engine.select_proposer(height, round).unwrap(), first);
            }
        }
    }
}

#[test]
fn independent_engines_agree_on_proposers() {
    // Two nodes with the same validator set must select identical proposers
    // regardless of registration order.
    let a = engine_over(state_with_stakes(&[(1, 50), (2, 30), (3, 20)]), None);
    let b = engine_over(state_with_stakes(&[(3, 20), (1, 50), (2, 30)]), None);

    for height in 1..200u64 {
        assert_eq!(
            a.select_proposer(height, 0).unwrap(),
            b.select_proposer(height, 0).unwrap(),
            "divergence at height {height}"
        );
    }
}

// ── Stake proportionality ───────────────────────────────────────────────

#[test]
fn proposer_frequency_tracks_stake() {
    let stakes: &[(u8, u64)] = &[(1, 50), (2, 30), (3, 20)];
    let engine = engine_over(state_with_stakes(stakes), None);

    const SAMPLES: u64 = 10_000;
    let mut counts: HashMap<PublicKey, u64> = HashMap::new();
    for height in 1..=SAMPLES {
        let proposer = engine.select_proposer(height, 0).unwrap();
        *counts.entry(proposer).or_default() += 1;
    }

    let total_stake: u64 = stakes.iter().map(|(_, s)| s).sum();
    let mut chi_squared = 0.0f64;
    for (key, stake) in stakes {
        let observed = *counts.get(&PublicKey([*key; 32])).unwrap_or(&0) as f64;
        let share = *stake as f64 / total_stake as f64;
        let expected = share * SAMPLES as f64;

        // Within ±2 percentage points of the stake share.
        let frequency = observed / SAMPLES as f64;
        assert!(
            (frequency - share).abs() <= 0.02,
            "validator {key}: frequency {frequency:.4}, stake share {share:.4}"
        );

        chi_squared += (observed - expected).powi(2) / expected;
    }

    // df = 2; 13.82 is the 0.001 critical value.
    assert!(chi_squared < 13.82, "chi-squared {chi_squared:.2}");
}

#[test]
fn zero_stake_set_cannot_select() {
    let engine = engine_over(state_with_stakes(&[]), None);
    assert_eq!(
        engine.select_proposer(1, 0).unwrap_err(),
        ConsensusError::NoValidators
    );
}

// ── Quorum ──────────────────────────────────────────────────────────────

/// Validators with real keys registered in a shared state.
fn keyed_validators(stakes: &[u64]) -> (Arc<ChainState>, Vec<KeyPair>) {
    let state = Arc::new(ChainState::new());
    let mut keypairs = Vec::new();
    for stake in stakes {
        let kp = KeyPair::generate();
        state.add_validator(kp.public, *stake, 0).unwrap();
        keypairs.push(kp);
    }
    (state, keypairs)
}

fn vote_for(kp: &KeyPair, block: &Block) -> ValidatorSignature {
    ValidatorSignature {
        validator: kp.public,
        signature: kp.sign(&block.hash().0),
        round: 0,
    }
}

#[test]
fn finalization_requires_two_thirds_stake() {
    let (state, keypairs) = keyed_validators(&[40, 30, 30]);
    let engine = engine_over(state, Some(keypairs[0].clone()));

    let prev = genesis_block();
    let mut block = engine.propose_block(vec![], &prev).unwrap();

    // threshold = ⌈2·100/3⌉ = 67
    assert_eq!(constants::quorum_threshold(100), 67);

    engine
        .collect_vote(&vote_for(&keypairs[0], &block), block.hash())
        .unwrap();
    assert!(!engine.has_quorum().unwrap()); // 40 < 67
    let mut early = block.clone();
    assert!(matches!(
        engine.finalize_block(&mut early).unwrap_err(),
        ConsensusError::InsufficientQuorum {
            collected: 40,
            required: 67
        }
    ));

    engine
        .collect_vote(&vote_for(&keypairs[1], &block), block.hash())
        .unwrap();
    assert!(engine.has_quorum().unwrap()); // 70 >= 67

    engine.finalize_block(&mut block).unwrap();
    assert_eq!(block.validators.len(), 2);
    assert_eq!(engine.round().unwrap(), 1);
}

#[test]
fn finalize_clears_votes_between_rounds() {
    let (state, keypairs) = keyed_validators(&[100]);
    let engine = engine_over(state, Some(keypairs[0].clone()));

    let prev = genesis_block();
    let mut block = engine.propose_block(vec![], &prev).unwrap();
    engine
        .collect_vote(&vote_for(&keypairs[0], &block), block.hash())
        .unwrap();
    engine.finalize_block(&mut block).unwrap();

    // The vote map was cleared: no stale quorum carries into round 1.
    assert!(!engine.has_quorum().unwrap());
}

#[test]
fn slashed_stake_weakens_quorum_progress() {
    // After a 10% slash the validator's vote carries less stake.
    let (state, keypairs) = keyed_validators(&[50, 50]);
    let engine = engine_over(state.clone(), None);

    engine
        .slash(&keypairs[0].public, obscura::consensus::SlashReason::DoubleVote)
        .unwrap();
    engine.update_validator_set().unwrap();

    // total = 45 + 50 = 95, threshold = ⌈190/3⌉ = 64.
    let prev = genesis_block();
    let block = Block {
        header: BlockHeader {
            height: 1,
            timestamp: 0,
            prev_block_hash: prev.hash(),
            tx_root: compute_tx_root(&[]),
            state_root: Hash::default(),
            proposer: PublicKey::default(),
            round: 0,
        },
        transactions: vec![],
        validators: vec![],
    };

    engine
        .collect_vote(&vote_for(&keypairs[1], &block), block.hash())
        .unwrap();
    assert!(!engine.has_quorum().unwrap()); // 50 < 64

    engine
        .collect_vote(&vote_for(&keypairs[0], &block), block.hash())
        .unwrap();
    assert!(engine.has_quorum().unwrap()); // 95 >= 64
}

// ── Equivocation ────────────────────────────────────────────────────────

#[test]
fn equivocation_slashes_exactly_once_per_offense() {
    let (state, keypairs) = keyed_validators(&[100, 100]);
    let engine = engine_over(state.clone(), None);
    let offender = &keypairs[0];

    let hash_a = Hash([0xAA; 32]);
    let hash_b = Hash([0xBB; 32]);

    let vote_a = ValidatorSignature {
        validator: offender.public,
        signature: offender.sign(&hash_a.0),
        round: 0,
    };
    engine.collect_vote(&vote_a, hash_a).unwrap();

    let vote_b = ValidatorSignature {
        validator: offender.public,
        signature: offender.sign(&hash_b.0),
        round: 0,
    };
    assert_eq!(
        engine.collect_vote(&vote_b, hash_b).unwrap_err(),
        ConsensusError::DoubleVote
    );

    let v = state.get_validator(&offender.public).unwrap();
    assert_eq!(v.staked_amount, 90);
    assert_eq!(v.slash_count, 1);

    // The honest validator is untouched.
    let honest = state.get_validator(&keypairs[1].public).unwrap();
    assert_eq!(honest.staked_amount, 100);
    assert_eq!(honest.slash_count, 0);
}

#[test]
fn repeated_equivocation_deactivates_after_three_slashes() {
    let (state, keypairs) = keyed_validators(&[1_000]);
    let offender = &keypairs[0];

    // Each round of offenses happens under a fresh engine (as after a
    // restart); the slash history accumulates in the shared state.
    for n in 1..=3u32 {
        let engine = engine_over(state.clone(), None);
        let hash_a = Hash([n as u8; 32]);
        let hash_b = Hash([0x80 + n as u8; 32]);

        let vote_a = ValidatorSignature {
            validator: offender.public,
            signature: offender.sign(&hash_a.0),
            round: 0,
        };
        engine.collect_vote(&vote_a, hash_a).unwrap();

        let vote_b = ValidatorSignature {
            validator: offender.public,
            signature: offender.sign(&hash_b.0),
            round: 0,
        };
        assert_eq!(
            engine.collect_vote(&vote_b, hash_b).unwrap_err(),
            ConsensusError::DoubleVote
        );
        assert_eq!(state.get_validator(&offender.public).unwrap().slash_count, n);
    }

    let v = state.get_validator(&offender.public).unwrap();
    assert!(!v.active);
    assert_eq!(v.staked_amount, 729);
}
