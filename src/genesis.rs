//! Genesis configuration: the initial chain state agreed out of band.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::block::{compute_tx_root, Block, BlockHeader};
use crate::ledger::ValidatorState;
use crate::primitives::{Hash, PublicKey};

/// Errors from loading or validating a genesis file.
#[derive(Debug, thiserror::Error)]
pub enum GenesisError {
    #[error("genesis file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("genesis file parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid genesis_time: {0}")]
    InvalidTime(String),
    #[error("duplicate genesis validator {0}")]
    DuplicateValidator(PublicKey),
    #[error("genesis validator {0} is active with zero stake")]
    ZeroStake(PublicKey),
    #[error("genesis has no active stake; consensus cannot make progress")]
    NoActiveStake,
}

/// The genesis file schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain_id: String,
    /// ISO-8601 timestamp of chain start.
    pub genesis_time: String,
    pub initial_supply: u64,
    pub initial_validators: Vec<ValidatorState>,
}

impl GenesisConfig {
    /// Load and validate a genesis file.
    pub fn load(path: &Path) -> Result<Self, GenesisError> {
        let data = std::fs::read_to_string(path)?;
        let config: GenesisConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the structural invariants: parseable time, no duplicate
    /// validators, active validators carry stake, some stake is active.
    pub fn validate(&self) -> Result<(), GenesisError> {
        self.unix_time()?;

        let mut seen = std::collections::HashSet::new();
        let mut active_stake = 0u64;
        for validator in &self.initial_validators {
            if !seen.insert(validator.public_key) {
                return Err(GenesisError::DuplicateValidator(validator.public_key));
            }
            if validator.active {
                if validator.staked_amount == 0 {
                    return Err(GenesisError::ZeroStake(validator.public_key));
                }
                active_stake += validator.staked_amount;
            }
        }
        if active_stake == 0 {
            return Err(GenesisError::NoActiveStake);
        }
        Ok(())
    }

    /// The chain start as unix seconds.
    pub fn unix_time(&self) -> Result<i64, GenesisError> {
        chrono::DateTime::parse_from_rfc3339(&self.genesis_time)
            .map(|t| t.timestamp())
            .map_err(|e| GenesisError::InvalidTime(e.to_string()))
    }

    /// The deterministic height-0 block every node derives from this
    /// configuration.
    pub fn genesis_block(&self) -> Result<Block, GenesisError> {
        Ok(Block {
            header: BlockHeader {
                height: 0,
                timestamp: self.unix_time()?,
                prev_block_hash: Hash::default(),
                tx_root: compute_tx_root(&[]),
                state_root: Hash::default(),
                proposer: PublicKey::default(),
                round: 0,
            },
            transactions: vec![],
            validators: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(key: u8, stake: u64, active: bool) -> ValidatorState {
        ValidatorState {
            public_key: PublicKey([key; 32]),
            staked_amount: stake,
            active,
            joined_height: 0,
            unbonding_until: 0,
            slash_count: 0,
        }
    }

    fn config() -> GenesisConfig {
        GenesisConfig {
            chain_id: "obscura-test".into(),
            genesis_time: "2026-01-01T00:00:00Z".into(),
            initial_supply: 1_000_000,
            initial_validators: vec![validator(1, 100, true)],
        }
    }

    #[test]
    fn parses_schema_fields() {
        let json = r#"{
            "chain_id": "obscura-main",
            "genesis_time": "2026-06-01T12:00:00Z",
            "initial_supply": 21000000,
            "initial_validators": [
                { "public_key": "0101010101010101010101010101010101010101010101010101010101010101",
                  "staked_amount": 100,
                  "active": true,
                  "joined_height": 0,
                  "unbonding_until": 0,
                  "slash_count": 0 }
            ]
        }"#;
        let config: GenesisConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.chain_id, "obscura-main");
        assert_eq!(config.initial_validators.len(), 1);
        assert_eq!(
            config.initial_validators[0].public_key,
            PublicKey([1u8; 32])
        );
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");
        std::fs::write(&path, serde_json::to_string(&config()).unwrap()).unwrap();

        let loaded = GenesisConfig::load(&path).unwrap();
        assert_eq!(loaded.chain_id, "obscura-test");
        assert_eq!(loaded.initial_supply, 1_000_000);
    }

    #[test]
    fn rejects_bad_time() {
        let mut c = config();
        c.genesis_time = "not-a-time".into();
        assert!(matches!(c.validate(), Err(GenesisError::InvalidTime(_))));
    }

    #[test]
    fn rejects_duplicate_validator() {
        let mut c = config();
        c.initial_validators.push(validator(1, 50, true));
        assert!(matches!(
            c.validate(),
            Err(GenesisError::DuplicateValidator(_))
        ));
    }

    #[test]
    fn rejects_active_zero_stake() {
        let mut c = config();
        c.initial_validators.push(validator(2, 0, true));
        assert!(matches!(c.validate(), Err(GenesisError::ZeroStake(_))));
    }

    #[test]
    fn rejects_all_inactive() {
        let mut c = config();
        c.initial_validators = vec![validator(1, 100, false)];
        assert!(matches!(c.validate(), Err(GenesisError::NoActiveStake)));
    }

    #[test]
    fn genesis_block_is_deterministic() {
        let a = config().genesis_block().unwrap();
        let b = config().genesis_block().unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.header.height, 0);
        assert!(a.header.prev_block_hash.is_zero());
        assert_eq!(a.header.timestamp, 1_767_225_600);
        assert!(a.transactions.is_empty());
    }
}
