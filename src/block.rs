//! Blocks, headers, and validator signatures.

use serde::{Deserialize, Serialize};

use crate::primitives::{Hash, PublicKey, Signature};
use crate::transaction::Transaction;

/// Block metadata. The header hash covers the previous-block hash, the
/// transaction root, the state root, and the proposer; height, timestamp,
/// and round are currently outside the preimage. Widening the preimage is a
/// wire-format break, so it waits for the next chain version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    /// Unix seconds.
    pub timestamp: i64,
    pub prev_block_hash: Hash,
    /// Root over the block's transaction hashes.
    pub tx_root: Hash,
    /// UTXO set commitment at proposal time.
    pub state_root: Hash,
    pub proposer: PublicKey,
    /// BFT round the block was proposed in.
    pub round: u32,
}

impl BlockHeader {
    /// The block header hash.
    pub fn hash(&self) -> Hash {
        crate::sha256(&[
            &self.prev_block_hash.0,
            &self.tx_root.0,
            &self.state_root.0,
            &self.proposer.0,
        ])
    }
}

/// A validator's vote: an Ed25519 signature over the block header hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSignature {
    pub validator: PublicKey,
    pub signature: Signature,
    pub round: u32,
}

/// A block: header, ordered transactions, and the quorum of validator
/// signatures attached at finalization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub validators: Vec<ValidatorSignature>,
}

impl Block {
    /// The block's header hash.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}

/// Root over the ordered transaction hashes: SHA-256 of the SHA-256 of their
/// concatenation. An empty block commits to the double hash of the empty
/// string.
pub fn compute_tx_root(txs: &[Transaction]) -> Hash {
    let hashes: Vec<Hash> = txs.iter().map(|tx| tx.hash()).collect();
    let parts: Vec<&[u8]> = hashes.iter().map(|h| &h.0[..]).collect();
    crate::sha256d(&parts)
}
