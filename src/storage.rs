//! Durable chain store.
//!
//! A single sled keyspace holds blocks (indexed by height and by header
//! hash), transactions, the chain tip, and the genesis configuration:
//!
//! - `b:<be_u64 height>` → block JSON
//! - `h:<32-byte header hash>` → block JSON (secondary index)
//! - `t:<32-byte tx hash>` → transaction JSON
//! - `latest_height` → 8 bytes little-endian
//! - `genesis` → genesis JSON
//!
//! A block write commits the height key and the hash key as one atomic
//! batch; the chain tip is a separate write performed only after the block
//! write succeeds, so a crash between the two re-commits the block on
//! restart rather than pointing the tip at a missing block.

use std::path::Path;

use crate::block::Block;
use crate::genesis::GenesisConfig;
use crate::primitives::Hash;
use crate::transaction::Transaction;

const KEY_LATEST_HEIGHT: &[u8] = b"latest_height";
const KEY_GENESIS: &[u8] = b"genesis";

/// Errors from storage operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("corrupt value under {0}")]
    CorruptValue(&'static str),
}

/// Sled-backed chain database.
pub struct Database {
    db: sled::Db,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(io_err)?;
        Ok(Database { db })
    }

    /// Open a temporary database (testing).
    pub fn open_temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(io_err)?;
        Ok(Database { db })
    }

    /// Persist a block under both its height and its header hash, as one
    /// atomic unit.
    pub fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let data = serde_json::to_vec(block).map_err(ser_err)?;

        let mut batch = sled::Batch::default();
        batch.insert(block_key(block.header.height).to_vec(), data.clone());
        batch.insert(block_hash_key(&block.hash()).to_vec(), data);
        self.db.apply_batch(batch).map_err(io_err)?;
        Ok(())
    }

    /// Fetch a block by height.
    pub fn get_block(&self, height: u64) -> Result<Block, StorageError> {
        let bytes = self
            .db
            .get(block_key(height))
            .map_err(io_err)?
            .ok_or(StorageError::NotFound("block"))?;
        serde_json::from_slice(&bytes).map_err(ser_err)
    }

    /// Fetch a block by header hash.
    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Block, StorageError> {
        let bytes = self
            .db
            .get(block_hash_key(hash))
            .map_err(io_err)?
            .ok_or(StorageError::NotFound("block"))?;
        serde_json::from_slice(&bytes).map_err(ser_err)
    }

    /// Fetch the block at the chain tip.
    pub fn get_latest_block(&self) -> Result<Block, StorageError> {
        self.get_block(self.latest_height()?)
    }

    /// The persisted chain tip; 0 when nothing has been written yet.
    pub fn latest_height(&self) -> Result<u64, StorageError> {
        match self.db.get(KEY_LATEST_HEIGHT).map_err(io_err)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StorageError::CorruptValue("latest_height"))?;
                Ok(u64::from_le_bytes(arr))
            }
            None => Ok(0),
        }
    }

    /// Advance the persisted chain tip. Called only after the block at this
    /// height has been durably written.
    pub fn update_latest_height(&self, height: u64) -> Result<(), StorageError> {
        self.db
            .insert(KEY_LATEST_HEIGHT, &height.to_le_bytes())
            .map_err(io_err)?;
        Ok(())
    }

    /// Persist a transaction under its hash.
    pub fn save_transaction(&self, tx: &Transaction) -> Result<(), StorageError> {
        let data = serde_json::to_vec(tx).map_err(ser_err)?;
        self.db.insert(tx_key(&tx.hash()), data).map_err(io_err)?;
        Ok(())
    }

    /// Fetch a transaction by hash.
    pub fn get_transaction(&self, hash: &Hash) -> Result<Transaction, StorageError> {
        let bytes = self
            .db
            .get(tx_key(hash))
            .map_err(io_err)?
            .ok_or(StorageError::NotFound("transaction"))?;
        serde_json::from_slice(&bytes).map_err(ser_err)
    }

    /// Persist the genesis configuration.
    pub fn save_genesis(&self, genesis: &GenesisConfig) -> Result<(), StorageError> {
        let data = serde_json::to_vec(genesis).map_err(ser_err)?;
        self.db.insert(KEY_GENESIS, data).map_err(io_err)?;
        Ok(())
    }

    /// Fetch the stored genesis configuration, if any.
    pub fn get_genesis(&self) -> Result<Option<GenesisConfig>, StorageError> {
        match self.db.get(KEY_GENESIS).map_err(io_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(io_err)?;
        Ok(())
    }
}

fn block_key(height: u64) -> [u8; 10] {
    let mut key = [0u8; 10];
    key[..2].copy_from_slice(b"b:");
    key[2..].copy_from_slice(&height.to_be_bytes());
    key
}

fn block_hash_key(hash: &Hash) -> [u8; 34] {
    let mut key = [0u8; 34];
    key[..2].copy_from_slice(b"h:");
    key[2..].copy_from_slice(&hash.0);
    key
}

fn tx_key(hash: &Hash) -> [u8; 34] {
    let mut key = [0u8; 34];
    key[..2].copy_from_slice(b"t:");
    key[2..].copy_from_slice(&hash.0);
    key
}

fn io_err(e: sled::Error) -> StorageError {
    StorageError::Io(e.to_string())
}

fn ser_err(e: serde_json::Error) -> StorageError {
    StorageError::Serialization(e.to_string())
}
