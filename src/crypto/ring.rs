//! Linkable ring signatures for sender anonymity.
//!
//! A transaction input is signed by one member of a ring of public keys; the
//! verifier learns that *some* ring member signed, not which. The key image,
//! deterministic per spent output, makes spending the same output twice
//! detectable (linkability) without revealing the output.
//!
//! The phase-1 scheme wires the full LSAG argument structure (ring, Fiat-
//! Shamir challenge, per-member responses, key image) but verification is
//! structural only: it checks that the challenge re-hashes consistently and
//! that every per-position digest is non-zero. It does not bind responses to
//! public keys cryptographically; a later phase replaces the response
//! equations with edwards25519 arithmetic under the same record layout.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::stealth;
use crate::primitives::{Hash, PublicKey, Signature};

/// Errors from ring construction.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    #[error("need at least {0} decoy keys for anonymity")]
    TooFewDecoys(usize),
}

/// A linkable ring signature over a transaction message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RingSignature {
    /// The possible signers: decoys plus the real key at a hidden index.
    pub ring: Vec<PublicKey>,
    /// The Fiat-Shamir challenge.
    pub challenge: Hash,
    /// One response slot per ring member.
    pub responses: Vec<Signature>,
    /// Spend marker for the consumed output.
    pub key_image: PublicKey,
}

/// Builds ring signatures for a single input.
#[derive(Debug)]
pub struct RingSigner {
    real_index: usize,
    real_priv: PrivScalar,
    ring: Vec<PublicKey>,
    key_image: PublicKey,
}

#[derive(Debug, Zeroize, ZeroizeOnDrop)]
struct PrivScalar([u8; 32]);

impl RingSigner {
    /// Assemble a ring with the real key at a uniformly random position.
    pub fn new(
        real_priv: &[u8; 32],
        real_pub: PublicKey,
        decoys: &[PublicKey],
    ) -> Result<Self, RingError> {
        if decoys.len() < crate::constants::MIN_RING_DECOYS {
            return Err(RingError::TooFewDecoys(crate::constants::MIN_RING_DECOYS));
        }

        let ring_size = decoys.len() + 1;
        let real_index = rand::thread_rng().gen_range(0..ring_size);

        let mut ring = Vec::with_capacity(ring_size);
        let mut decoy_iter = decoys.iter();
        for i in 0..ring_size {
            if i == real_index {
                ring.push(real_pub);
            } else {
                // Safe: ring_size - 1 == decoys.len().
                ring.push(*decoy_iter.next().unwrap_or(&real_pub));
            }
        }

        let key_image = stealth::generate_key_image(real_priv, &real_pub);

        Ok(RingSigner {
            real_index,
            real_priv: PrivScalar(*real_priv),
            ring,
            key_image,
        })
    }

    /// The key image this signer will embed; must match the input's.
    pub fn key_image(&self) -> PublicKey {
        self.key_image
    }

    /// Sign a message, producing the ring signature.
    pub fn sign(&self, message: &[u8]) -> RingSignature {
        let n = self.ring.len();
        let mut rng = rand::thread_rng();

        // Random response slots for every decoy position.
        let mut responses = vec![Signature::zero(); n];
        for (i, slot) in responses.iter_mut().enumerate() {
            if i != self.real_index {
                rng.fill_bytes(&mut slot.0);
            }
        }

        let challenge = compute_challenge(message, &self.key_image, &self.ring);
        responses[self.real_index] = real_response(&self.real_priv.0, &challenge, message);

        RingSignature {
            ring: self.ring.clone(),
            challenge,
            responses,
            key_image: self.key_image,
        }
    }
}

/// Verify a ring signature over a message.
pub fn verify(sig: &RingSignature, message: &[u8]) -> bool {
    if sig.ring.len() != sig.responses.len() {
        return false;
    }

    let expected = compute_challenge(message, &sig.key_image, &sig.ring);
    if sig.challenge != expected {
        return false;
    }

    sig.responses
        .iter()
        .zip(&sig.ring)
        .all(|(response, member)| check_position(response, member, &sig.challenge, message))
}

/// Fiat-Shamir challenge over the message, key image, and every ring member.
fn compute_challenge(message: &[u8], key_image: &PublicKey, ring: &[PublicKey]) -> Hash {
    let mut parts: Vec<&[u8]> = Vec::with_capacity(ring.len() + 2);
    parts.push(message);
    parts.push(&key_image.0);
    for member in ring {
        parts.push(&member.0);
    }
    crate::sha256d(&parts)
}

/// Response for the real signer: a 32-byte digest duplicated to 64 bytes.
fn real_response(priv_scalar: &[u8; 32], challenge: &Hash, message: &[u8]) -> Signature {
    let digest = crate::sha256d(&[priv_scalar, &challenge.0, message]);
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(&digest.0);
    out[32..].copy_from_slice(&digest.0);
    Signature(out)
}

/// Per-position structural check: the bound digest must not be all-zero.
fn check_position(
    response: &Signature,
    member: &PublicKey,
    challenge: &Hash,
    message: &[u8],
) -> bool {
    let digest = crate::sha256d(&[&response.0, &member.0, &challenge.0, message]);
    !digest.is_zero()
}
