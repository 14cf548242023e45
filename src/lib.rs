//! # Obscura
//!
//! A privacy-preserving permissioned blockchain node:
//! - **Stealth addresses** — every output is paid to a one-time key only the
//!   recipient can recognize and spend
//! - **Linkable ring signatures** — inputs prove membership in a decoy set;
//!   key images make double-spends detectable without revealing the spent output
//! - **Stake-weighted BFT finality** — a deterministic proposer rotation and a
//!   two-thirds-by-stake vote quorum; finalized blocks are never reorganized
//! - **Durable chain store** — append-only block/transaction persistence with
//!   crash recovery from the chain tip
//!
//! Phase 1 uses hash-based surrogates for the elliptic-curve point operations
//! in the stealth and ring schemes (see `crypto::stealth`); a later phase
//! substitutes edwards25519 arithmetic behind the same interfaces.

pub mod block;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod genesis;
pub mod gossip;
pub mod ledger;
pub mod mempool;
pub mod node;
pub mod primitives;
pub mod storage;
pub mod transaction;
pub mod wallet;

/// Protocol constants
pub mod constants {
    /// Target interval between block proposals, in milliseconds.
    pub const BLOCK_TIME_MS: u64 = 2_000;
    /// Blocks an unbonding validator waits before stake becomes withdrawable.
    pub const UNBONDING_PERIOD: u64 = 100;
    /// Fraction of stake burned per slashing infraction, in percent.
    pub const SLASH_PERCENTAGE: u64 = 10;
    /// Slash count at which a validator is forcibly deactivated.
    pub const MAX_SLASH_COUNT: u32 = 3;
    /// Maximum clock skew tolerated on a proposed block's timestamp, in seconds.
    pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 60;
    /// Minimum number of decoy keys required to form a ring.
    pub const MIN_RING_DECOYS: usize = 2;
    /// Maximum number of transactions in the pending pool.
    pub const MEMPOOL_MAX_TXS: usize = 10_000;
    /// Maximum transactions drained from the pool per block proposal.
    pub const PROPOSAL_MAX_TXS: usize = 1_000;

    /// Compute the BFT quorum threshold: cumulative stake ≥ ⌈2·total/3⌉.
    pub fn quorum_threshold(total_stake: u64) -> u64 {
        (2 * total_stake).div_ceil(3)
    }
}

/// Compute a single-pass SHA-256 over concatenated parts.
pub fn sha256(parts: &[&[u8]]) -> primitives::Hash {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    primitives::Hash(hasher.finalize().into())
}

/// Compute SHA-256 of the SHA-256 of concatenated parts.
///
/// The protocol's derivation hashes stream every part into one SHA-256 state
/// and then hash the intermediate digest again; derived keys, key images,
/// ring challenges, and roots all use this double-pass form. Transaction and
/// block header hashes use the single-pass [`sha256`].
pub fn sha256d(parts: &[&[u8]]) -> primitives::Hash {
    let inner = sha256(parts);
    sha256(&[&inner.0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_concatenation_is_flat() {
        // Hashing ["ab"] and ["a", "b"] must agree: parts are raw concatenation.
        assert_eq!(sha256(&[b"ab"]), sha256(&[b"a", b"b"]));
    }

    #[test]
    fn sha256d_is_double_hash() {
        let once = sha256(&[b"payload"]);
        let twice = sha256(&[&once.0]);
        assert_eq!(sha256d(&[b"payload"]), twice);
    }

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc") from FIPS 180-2.
        let digest = sha256(&[b"abc"]);
        assert_eq!(
            digest.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn quorum_threshold_rounds_up() {
        assert_eq!(constants::quorum_threshold(100), 67);
        assert_eq!(constants::quorum_threshold(3), 2);
        assert_eq!(constants::quorum_threshold(1), 1);
        assert_eq!(constants::quorum_threshold(0), 0);
    }
}
