//! Wallet operations: output scanning, balance, and private-transaction
//! construction.
//!
//! The wallet owns the view and spend keypairs and never shares them with
//! the node. It recognizes its outputs by re-deriving one-time keys, tracks
//! which are spent via their key images, and builds transactions that spend
//! a single owned output into a recipient output plus change, authorized by
//! a ring signature over decoy outputs drawn from the chain.

use std::collections::HashSet;

use crate::crypto::keys::WalletKeys;
use crate::crypto::ring::{RingError, RingSigner};
use crate::crypto::stealth::{self, StealthError};
use crate::ledger::{ChainState, LedgerError, Utxo};
use crate::primitives::{Address, PublicKey};
use crate::transaction::{Transaction, TxInput};

/// Decoys drawn per ring when enough candidates exist.
const RING_DECOYS: usize = 4;

/// Errors from wallet operations.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error(transparent)]
    Stealth(#[from] StealthError),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// An output the wallet recognized as its own.
#[derive(Clone, Debug)]
pub struct OwnedOutput {
    pub utxo: Utxo,
    /// The key image this output will reveal when spent.
    pub key_image: PublicKey,
}

/// A wallet bound to its keys.
pub struct Wallet {
    keys: WalletKeys,
}

impl Wallet {
    pub fn new(keys: WalletKeys) -> Self {
        Wallet { keys }
    }

    pub fn keys(&self) -> &WalletKeys {
        &self.keys
    }

    pub fn address(&self) -> Address {
        self.keys.address()
    }

    /// Scan the unspent set for outputs addressed to this wallet, dropping
    /// those whose key image is already on-chain.
    pub fn scan_chain(&self, state: &ChainState) -> Result<Vec<OwnedOutput>, WalletError> {
        let mut owned = Vec::new();
        for utxo in state.unspent_utxos()? {
            let (ours, _) = stealth::scan_output(&self.keys, &utxo.output);
            if !ours {
                continue;
            }
            let one_time_priv = stealth::derive_spend_key(&self.keys, &utxo.output)?;
            let key_image = stealth::generate_key_image(
                one_time_priv.as_bytes(),
                &utxo.output.stealth_addr.spend_key,
            );
            if state.is_key_image_spent(&key_image)? {
                continue;
            }
            owned.push(OwnedOutput { utxo, key_image });
        }
        Ok(owned)
    }

    /// Spendable balance: the sum of owned, unspent outputs.
    pub fn balance(&self, state: &ChainState) -> Result<u64, WalletError> {
        Ok(self
            .scan_chain(state)?
            .iter()
            .map(|o| o.utxo.output.amount)
            .sum())
    }

    /// Build a private transaction spending one owned output.
    ///
    /// Produces a recipient output for `amount`, a change output back to
    /// this wallet when anything remains after the fee, and a ring signature
    /// over decoys drawn from `decoy_pool`.
    pub fn build_transaction(
        &self,
        spend: &OwnedOutput,
        recipient: &Address,
        amount: u64,
        fee: u64,
        decoy_pool: &[Utxo],
    ) -> Result<Transaction, WalletError> {
        let available = spend.utxo.output.amount;
        let required = amount.saturating_add(fee);
        if available < required {
            return Err(WalletError::InsufficientFunds {
                available,
                required,
            });
        }

        let one_time_priv = stealth::derive_spend_key(&self.keys, &spend.utxo.output)?;
        let real_pub = spend.utxo.output.stealth_addr.spend_key;
        let decoys = select_decoys(decoy_pool, &real_pub, RING_DECOYS);
        let signer = RingSigner::new(one_time_priv.as_bytes(), real_pub, &decoys)?;

        let (mut pay, _) = stealth::generate_stealth_output(recipient);
        pay.amount = amount;
        let mut outputs = vec![pay];

        let change = available - required;
        if change > 0 {
            let (mut change_out, _) = stealth::generate_stealth_output(&self.address());
            change_out.amount = change;
            outputs.push(change_out);
        }

        let mut tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                key_image: signer.key_image(),
                amount: available,
            }],
            outputs,
            fee,
            ring_signature: None,
            range_proofs: vec![],
        };
        tx.ring_signature = Some(signer.sign(&tx.hash().0));
        Ok(tx)
    }
}

/// Pick up to `count` decoy one-time keys from the pool, never including the
/// output being spent.
pub fn select_decoys(pool: &[Utxo], exclude: &PublicKey, count: usize) -> Vec<PublicKey> {
    let mut seen = HashSet::new();
    let mut decoys = Vec::with_capacity(count);
    for utxo in pool {
        let candidate = utxo.output.stealth_addr.spend_key;
        if &candidate == exclude || !seen.insert(candidate) {
            continue;
        }
        decoys.push(candidate);
        if decoys.len() >= count {
            break;
        }
    }
    decoys
}

/// Parse the printable address form `<view hex>:<spend hex>`.
pub fn parse_address(s: &str) -> Result<Address, WalletError> {
    let (view, spend) = s
        .split_once(':')
        .ok_or_else(|| WalletError::InvalidAddress("expected <view>:<spend>".into()))?;
    Ok(Address {
        view_key: PublicKey::from_hex(view)
            .map_err(|e| WalletError::InvalidAddress(e.to_string()))?,
        spend_key: PublicKey::from_hex(spend)
            .map_err(|e| WalletError::InvalidAddress(e.to_string()))?,
    })
}

/// Printable address form.
pub fn format_address(addr: &Address) -> String {
    format!("{}:{}", addr.view_key, addr.spend_key)
}
