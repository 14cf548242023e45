//! Ed25519 key management for validators and wallets.
//!
//! A wallet holds two independent keypairs: the *view* pair lets the wallet
//! recognize outputs addressed to it, the *spend* pair is its long-term spend
//! identity. Validators sign votes and staking transactions with a single
//! keypair of the same shape.
//!
//! Key files are JSON with the private half base64-encoded and the public
//! half hex-encoded, written with owner-only permissions.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::primitives::{Address, PublicKey, Signature};

/// Errors from key generation, parsing, or key-file I/O.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("key file parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid private key encoding: {0}")]
    InvalidPrivateKey(String),
    #[error("invalid public key encoding: {0}")]
    InvalidPublicKey(String),
    #[error("public key does not match private key")]
    KeyMismatch,
}

/// The 32-byte Ed25519 seed, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretSeed(pub(crate) [u8; 32]);

impl SecretSeed {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// An Ed25519 keypair: secret seed plus derived public key.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretSeed,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing)
    }

    /// Reconstruct a keypair from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let public = PublicKey(signing.verifying_key().to_bytes());
        KeyPair {
            secret: SecretSeed(signing.to_bytes()),
            public,
        }
    }

    /// The 32-byte secret seed. Also the scalar fed to the stealth
    /// hash-surrogate derivations.
    pub fn seed(&self) -> &[u8; 32] {
        &self.secret.0
    }

    /// Sign a message with this keypair.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let signing = SigningKey::from_bytes(&self.secret.0);
        Signature(signing.sign(message).to_bytes())
    }
}

/// Verify an Ed25519 signature against a 32-byte public key.
///
/// Returns false for malformed keys: a 32-byte identifier that is not a
/// valid curve point (e.g. a key image) can never verify.
pub fn verify(public: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(&public.0) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    key.verify(message, &sig).is_ok()
}

/// A wallet's view and spend keypairs. Never leaves the wallet process.
#[derive(Clone)]
pub struct WalletKeys {
    pub view: KeyPair,
    pub spend: KeyPair,
}

impl WalletKeys {
    /// Generate two independent keypairs.
    pub fn generate() -> Self {
        WalletKeys {
            view: KeyPair::generate(),
            spend: KeyPair::generate(),
        }
    }

    /// The public stealth address for this wallet.
    pub fn address(&self) -> Address {
        Address {
            view_key: self.view.public,
            spend_key: self.spend.public,
        }
    }

    /// Load wallet keys from a JSON key file.
    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let data = std::fs::read_to_string(path)?;
        let file: WalletKeyFile = serde_json::from_str(&data)?;
        Ok(WalletKeys {
            view: file.view_key_pair.into_keypair()?,
            spend: file.spend_key_pair.into_keypair()?,
        })
    }

    /// Save wallet keys to a JSON key file, restricted to owner read/write.
    pub fn save(&self, path: &Path) -> Result<(), KeyError> {
        let file = WalletKeyFile {
            view_key_pair: KeyFileEntry::from_keypair(&self.view),
            spend_key_pair: KeyFileEntry::from_keypair(&self.spend),
        };
        let data = serde_json::to_string_pretty(&file)?;
        std::fs::write(path, data)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

/// On-disk wallet key file schema.
#[derive(Serialize, Deserialize)]
struct WalletKeyFile {
    #[serde(rename = "ViewKeyPair")]
    view_key_pair: KeyFileEntry,
    #[serde(rename = "SpendKeyPair")]
    spend_key_pair: KeyFileEntry,
}

#[derive(Serialize, Deserialize)]
struct KeyFileEntry {
    #[serde(rename = "PrivateKey")]
    private_key: String,
    #[serde(rename = "PublicKey")]
    public_key: String,
}

impl KeyFileEntry {
    fn from_keypair(kp: &KeyPair) -> Self {
        KeyFileEntry {
            private_key: BASE64.encode(kp.seed()),
            public_key: kp.public.to_string(),
        }
    }

    fn into_keypair(self) -> Result<KeyPair, KeyError> {
        let seed_bytes = BASE64
            .decode(&self.private_key)
            .map_err(|e| KeyError::InvalidPrivateKey(e.to_string()))?;
        let seed: [u8; 32] = seed_bytes
            .try_into()
            .map_err(|_| KeyError::InvalidPrivateKey("seed must be 32 bytes".into()))?;
        let kp = KeyPair::from_seed(seed);
        let stated = PublicKey::from_hex(&self.public_key)
            .map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;
        if stated != kp.public {
            return Err(KeyError::KeyMismatch);
        }
        Ok(kp)
    }
}
