//! Stealth addressing: one-time output keys and key images.
//!
//! When a sender pays a recipient, it does not pay the recipient's published
//! address. It generates an ephemeral keypair (r, R), derives a shared secret
//! from the exchange transcript, and pays a one-time spend key derived from
//! that secret and the recipient's spend key. The recipient scans incoming
//! outputs by re-deriving the shared secret from R and its view key; deriving
//! the one-time *private* scalar additionally requires the recipient's spend
//! private key, so only the recipient can spend.
//!
//! Every derivation below is a hash-based surrogate for an edwards25519
//! point operation (scalar multiplication, point addition, hash-to-point).
//! The chain's data model depends on these exact outputs, so the formulas
//! are frozen; a later phase swaps in curve arithmetic behind the same
//! function signatures, which is why the surrogates are private to this
//! module. Until then the shared secret is computable from the published
//! address, so output *recognition* is not yet confidential; output
//! *spending* is.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::keys::{KeyPair, WalletKeys};
use crate::primitives::{Address, PublicKey};
use crate::transaction::TxOutput;

/// Errors from stealth output operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StealthError {
    #[error("output does not belong to this wallet")]
    NotOurs,
}

/// A derived one-time spend scalar, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SpendSecret([u8; 32]);

impl SpendSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

/// Surrogate ECDH: shared secret from the ephemeral public key and the
/// recipient's view key. Both ends of the exchange hold both values.
fn shared_secret(tx_public_key: &PublicKey, view_key: &PublicKey) -> [u8; 32] {
    crate::sha256d(&[&tx_public_key.0, &view_key.0]).0
}

/// Surrogate for `Hs(secret)·G + base`: one-time public key derivation.
fn one_time_key(secret: &[u8; 32], base: &PublicKey) -> PublicKey {
    PublicKey(crate::sha256d(&[secret, &base.0]).0)
}

/// Surrogate for `Hs(secret) + base` scalar addition: one-time private key.
fn derived_secret(secret: &[u8; 32], base_priv: &[u8; 32]) -> [u8; 32] {
    crate::sha256d(&[secret, base_priv]).0
}

/// Compute the key image for an output: the unique spend marker placed in a
/// transaction input instead of naming the output.
///
/// Surrogate for `x·Hp(P)`.
pub fn generate_key_image(priv_scalar: &[u8; 32], output_pub: &PublicKey) -> PublicKey {
    PublicKey(crate::sha256d(&[priv_scalar, &output_pub.0]).0)
}

/// Generate a one-time stealth output for a recipient.
///
/// Returns the output (amount left at 0 for the caller to fill) and the
/// ephemeral keypair whose public half is embedded as the output's
/// transaction public key.
pub fn generate_stealth_output(recipient: &Address) -> (TxOutput, KeyPair) {
    let ephemeral = KeyPair::generate();
    let secret = shared_secret(&ephemeral.public, &recipient.view_key);
    let one_time = one_time_key(&secret, &recipient.spend_key);
    let output = TxOutput {
        amount: 0,
        stealth_addr: Address {
            view_key: recipient.view_key,
            spend_key: one_time,
        },
        tx_public_key: ephemeral.public,
    };
    (output, ephemeral)
}

/// Check whether an output belongs to a wallet.
///
/// Returns the ownership flag together with the re-derived one-time key; the
/// key is meaningful only when the flag is true.
pub fn scan_output(wallet: &WalletKeys, output: &TxOutput) -> (bool, PublicKey) {
    let secret = shared_secret(&output.tx_public_key, &wallet.view.public);
    let expected = one_time_key(&secret, &wallet.spend.public);
    (expected == output.stealth_addr.spend_key, expected)
}

/// Derive the one-time private scalar that spends a stealth output.
///
/// Fails when the output is not addressed to this wallet.
pub fn derive_spend_key(
    wallet: &WalletKeys,
    output: &TxOutput,
) -> Result<SpendSecret, StealthError> {
    let (ours, _) = scan_output(wallet, output);
    if !ours {
        return Err(StealthError::NotOurs);
    }
    let secret = shared_secret(&output.tx_public_key, &wallet.view.public);
    Ok(SpendSecret(derived_secret(&secret, wallet.spend.seed())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stealth_output_roundtrip() {
        let wallet = WalletKeys::generate();
        let (output, _ephemeral) = generate_stealth_output(&wallet.address());
        let (ours, one_time) = scan_output(&wallet, &output);
        assert!(ours);
        assert_eq!(one_time, output.stealth_addr.spend_key);
    }

    #[test]
    fn stealth_output_not_recognized_by_other_wallet() {
        let wallet = WalletKeys::generate();
        let other = WalletKeys::generate();
        let (output, _) = generate_stealth_output(&wallet.address());
        let (ours, _) = scan_output(&other, &output);
        assert!(!ours);
    }

    #[test]
    fn derive_spend_key_for_owned_output() {
        let wallet = WalletKeys::generate();
        let (output, _) = generate_stealth_output(&wallet.address());
        let secret = derive_spend_key(&wallet, &output).unwrap();
        assert!(!secret.is_zero());
    }

    #[test]
    fn derive_spend_key_rejects_foreign_output() {
        let wallet = WalletKeys::generate();
        let other = WalletKeys::generate();
        let (output, _) = generate_stealth_output(&wallet.address());
        assert!(matches!(
            derive_spend_key(&other, &output),
            Err(StealthError::NotOurs)
        ));
    }

    #[test]
    fn outputs_to_same_recipient_get_distinct_one_time_keys() {
        let wallet = WalletKeys::generate();
        let (a, _) = generate_stealth_output(&wallet.address());
        let (b, _) = generate_stealth_output(&wallet.address());
        // Fresh ephemeral randomness per output.
        assert_ne!(a.stealth_addr.spend_key, b.stealth_addr.spend_key);
        assert_ne!(a.tx_public_key, b.tx_public_key);
    }

    #[test]
    fn output_carries_recipient_view_key() {
        let wallet = WalletKeys::generate();
        let (output, _) = generate_stealth_output(&wallet.address());
        assert_eq!(output.stealth_addr.view_key, wallet.view.public);
        assert_eq!(output.amount, 0);
    }

    #[test]
    fn key_image_deterministic() {
        let priv_scalar = [3u8; 32];
        let output_pub = PublicKey([9u8; 32]);
        assert_eq!(
            generate_key_image(&priv_scalar, &output_pub),
            generate_key_image(&priv_scalar, &output_pub)
        );
    }

    #[test]
    fn key_image_differs_per_output() {
        let priv_scalar = [3u8; 32];
        assert_ne!(
            generate_key_image(&priv_scalar, &PublicKey([1u8; 32])),
            generate_key_image(&priv_scalar, &PublicKey([2u8; 32]))
        );
    }

    #[test]
    fn key_image_differs_per_key() {
        let output_pub = PublicKey([9u8; 32]);
        assert_ne!(
            generate_key_image(&[1u8; 32], &output_pub),
            generate_key_image(&[2u8; 32], &output_pub)
        );
    }

    #[test]
    fn one_time_key_is_chained_double_hash() {
        let wallet = WalletKeys::generate();
        let (output, ephemeral) = generate_stealth_output(&wallet.address());

        let secret = crate::sha256d(&[&ephemeral.public.0, &wallet.view.public.0]).0;
        let expected = crate::sha256d(&[&secret, &wallet.spend.public.0]).0;
        assert_eq!(output.stealth_addr.spend_key, PublicKey(expected));
    }

    #[test]
    fn derived_scalar_binds_spend_private_key() {
        // Two wallets sharing a view keypair but not a spend keypair derive
        // different scalars for the same output.
        let wallet = WalletKeys::generate();
        let (output, _) = generate_stealth_output(&wallet.address());
        let scalar = derive_spend_key(&wallet, &output).unwrap();

        let secret = crate::sha256d(&[&output.tx_public_key.0, &wallet.view.public.0]).0;
        let expected = crate::sha256d(&[&secret, wallet.spend.seed()]).0;
        assert_eq!(scalar.as_bytes(), &expected);
    }
}
