//! Transaction records: private value transfers and staking operations.
//!
//! Inputs reference consumed outputs by key image only; the spent output is
//! never named. Outputs carry one-time stealth addresses. Amounts and fees
//! are clear in this phase; `range_proofs` reserves wire space for the
//! commitment scheme that will hide them.

use serde::{Deserialize, Serialize};

use crate::crypto::ring::RingSignature;
use crate::primitives::{Address, Hash, PublicKey, Signature};

/// A transaction input: the key image of the consumed output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub key_image: PublicKey,
    pub amount: u64,
}

/// A transaction output: a fresh one-time stealth address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub amount: u64,
    pub stealth_addr: Address,
    /// The ephemeral public key R the recipient uses to re-derive the
    /// shared secret.
    pub tx_public_key: PublicKey,
}

/// A private value-transfer transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u8,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
    pub ring_signature: Option<RingSignature>,
    /// Reserved for the future amount-commitment scheme.
    #[serde(with = "base64_vec", default)]
    pub range_proofs: Vec<Vec<u8>>,
}

impl Transaction {
    /// The deterministic transaction hash: a single SHA-256 over every
    /// input's key image followed by every output's view and spend keys.
    ///
    /// Amounts, fee, and the ring signature are deliberately not covered;
    /// the identity of a transaction is the set of outputs it consumes and
    /// creates, in order.
    pub fn hash(&self) -> Hash {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(self.inputs.len() + 2 * self.outputs.len());
        for input in &self.inputs {
            parts.push(&input.key_image.0);
        }
        for output in &self.outputs {
            parts.push(&output.stealth_addr.view_key.0);
            parts.push(&output.stealth_addr.spend_key.0);
        }
        crate::sha256(&parts)
    }

    /// Sum of input amounts.
    pub fn input_sum(&self) -> u64 {
        self.inputs.iter().map(|i| i.amount).sum()
    }

    /// Sum of output amounts.
    pub fn output_sum(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

/// Staking operation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StakingType {
    Bond,
    Unbond,
}

/// A staking transaction: bond stake to join the validator set, or begin
/// unbonding to leave it. Authenticated by the validator's long-term spend
/// key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakingTx {
    pub tx_type: StakingType,
    pub validator: PublicKey,
    pub amount: u64,
    pub signature: Signature,
}

impl StakingTx {
    /// Canonical signing payload: domain tag, operation byte, validator key,
    /// big-endian amount.
    pub fn sign_data(tx_type: StakingType, validator: &PublicKey, amount: u64) -> Vec<u8> {
        let type_byte = match tx_type {
            StakingType::Bond => 0u8,
            StakingType::Unbond => 1u8,
        };
        let mut data = Vec::with_capacity(13 + 32 + 8);
        data.extend_from_slice(b"obscura.stake");
        data.push(type_byte);
        data.extend_from_slice(&validator.0);
        data.extend_from_slice(&amount.to_be_bytes());
        data
    }

    /// Build and sign a staking transaction with the validator's spend key.
    pub fn create(
        tx_type: StakingType,
        keypair: &crate::crypto::keys::KeyPair,
        amount: u64,
    ) -> Self {
        let data = Self::sign_data(tx_type, &keypair.public, amount);
        StakingTx {
            tx_type,
            validator: keypair.public,
            amount,
            signature: keypair.sign(&data),
        }
    }

    /// Verify the authentication signature.
    pub fn verify(&self) -> bool {
        let data = Self::sign_data(self.tx_type, &self.validator, self.amount);
        crate::crypto::keys::verify(&self.validator, &data, &self.signature)
    }
}

/// Serde adapter: byte-string sequences as base64 in JSON.
mod base64_vec {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = items.iter().map(|b| BASE64.encode(b)).collect();
        serde::Serialize::serialize(&encoded, s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded: Vec<String> = Vec::deserialize(d)?;
        encoded
            .iter()
            .map(|s| BASE64.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
