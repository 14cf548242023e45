//! Node orchestrator: wires the ledger, consensus engine, chain store,
//! mempool, and gossip oracle together.
//!
//! Inbound gossip payloads arrive through [`Node::handle_message`] on
//! handler threads; a dedicated proposer ticker thread wakes every block
//! time. Validation failures drop the offending message with one warning
//! line. A persistence failure while committing a finalized block is fatal
//! to the commit: the chain tip does not advance.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::block::Block;
use crate::consensus::{ConsensusError, Engine, SlashReason};
use crate::crypto::keys::KeyPair;
use crate::genesis::GenesisConfig;
use crate::gossip::{self, GossipOracle, Topic};
use crate::ledger::ChainState;
use crate::mempool::Mempool;
use crate::primitives::PublicKey;
use crate::storage::{Database, StorageError};
use crate::transaction::Transaction;

/// Errors surfaced by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Ledger(#[from] crate::ledger::LedgerError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Mempool(#[from] crate::mempool::MempoolError),
    #[error(transparent)]
    Gossip(#[from] crate::gossip::GossipError),
    #[error(transparent)]
    Genesis(#[from] crate::genesis::GenesisError),
    #[error("received block at height {0} with no predecessor")]
    NoPredecessor(u64),
    #[error("no block is pending a vote")]
    NoPendingBlock,
    #[error("a different block is already pending at this round")]
    PendingBlockInFlight,
}

/// Cooperative shutdown flag shared across worker threads.
#[derive(Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Node construction parameters.
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub genesis_file: PathBuf,
    /// Validator identity; None runs an observer node.
    pub validator: Option<KeyPair>,
    pub block_time: Duration,
}

/// The assembled node.
pub struct Node {
    db: Database,
    state: Arc<ChainState>,
    engine: Engine,
    mempool: Mempool,
    gossip: Arc<dyn GossipOracle>,
    block_time: Duration,
    shutdown: Shutdown,
}

impl Node {
    /// Open the store, establish genesis, replay the persisted chain into
    /// memory, and wire the engine.
    pub fn new(config: NodeConfig, gossip: Arc<dyn GossipOracle>) -> Result<Self, NodeError> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| StorageError::Io(e.to_string()))?;
        let db = Database::open(&config.data_dir.join("chain"))?;

        // Genesis: prefer the stored copy; fall back to the file and persist it.
        let genesis = match db.get_genesis()? {
            Some(genesis) => genesis,
            None => {
                let genesis = GenesisConfig::load(&config.genesis_file)?;
                db.save_genesis(&genesis)?;
                genesis
            }
        };

        let state = Arc::new(ChainState::new());
        state.init_genesis(&genesis)?;

        // Every node derives the same height-0 block from genesis.
        if db.get_block(0).is_err() {
            db.save_block(&genesis.genesis_block()?)?;
        }

        // Recovery: replay finalized blocks into the in-memory state.
        let tip = db.latest_height()?;
        for height in 1..=tip {
            let block = db.get_block(height)?;
            state.apply_block(&block)?;
        }
        if tip > 0 {
            tracing::info!(height = tip, "recovered chain from store");
        }

        let engine = Engine::new(state.clone(), config.validator);
        engine.update_validator_set()?;

        Ok(Node {
            db,
            state,
            engine,
            mempool: Mempool::default(),
            gossip,
            block_time: config.block_time,
            shutdown: Shutdown::new(),
        })
    }

    pub fn state(&self) -> &Arc<ChainState> {
        &self.state
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Inbound gossip callback: decode and dispatch one payload.
    pub fn handle_message(&self, topic: Topic, payload: &[u8]) -> Result<(), NodeError> {
        match gossip::decode(payload)? {
            gossip::Message::Block(block) => self.handle_block(block),
            gossip::Message::Transaction(tx) => self.handle_transaction(tx),
            gossip::Message::Vote(vote) => self.handle_vote(vote),
        }
        .inspect_err(|err| {
            tracing::warn!(?topic, %err, "dropping message");
        })
    }

    /// Validate an incoming block proposal, stash it, and vote on it.
    fn handle_block(&self, block: Block) -> Result<(), NodeError> {
        let height = block.header.height;
        let prev_height = height
            .checked_sub(1)
            .ok_or(NodeError::NoPredecessor(height))?;
        let prev = self
            .db
            .get_block(prev_height)
            .map_err(|_| NodeError::NoPredecessor(height))?;

        // First proposal wins the round: a redelivered copy is ignored, a
        // conflicting one is dropped so this node never votes twice.
        if let Some(pending) = self.engine.pending_block()? {
            if pending.hash() == block.hash() {
                return Ok(());
            }
            return Err(NodeError::PendingBlockInFlight);
        }

        if let Err(err) = self.engine.validate_block(&block, &prev) {
            // A rightful proposer that produced a bad block is slashed; a
            // forged proposer claim is just dropped.
            if !matches!(err, ConsensusError::InvalidProposer) {
                if let Ok(rightful) = self
                    .engine
                    .select_proposer(block.header.height, block.header.round)
                {
                    if rightful == block.header.proposer {
                        self.engine
                            .slash(&block.header.proposer, SlashReason::InvalidBlock)?;
                    }
                }
            }
            return Err(err.into());
        }

        tracing::info!(height, hash = %block.hash(), "valid block proposal");
        let block_hash = block.hash();
        self.engine.set_pending_block(block)?;

        if self.is_active_validator() {
            let pending = self
                .engine
                .pending_block()?
                .ok_or(NodeError::NoPendingBlock)?;
            let vote = self.engine.vote_for_block(&pending)?;
            self.gossip
                .broadcast(Topic::Votes, &gossip::encode_vote(&vote)?)?;
            self.engine.collect_vote(&vote, block_hash)?;
            self.try_commit()?;
        }
        Ok(())
    }

    /// Validate an incoming transaction and admit it to the pool.
    fn handle_transaction(&self, tx: Transaction) -> Result<(), NodeError> {
        self.state.validate_transaction(&tx)?;
        crate::consensus::verify_ring(&tx)?;
        let hash = tx.hash();
        self.mempool.insert(tx)?;
        tracing::info!(%hash, "transaction added to pool");
        Ok(())
    }

    /// Collect a vote for the pending block and commit on quorum.
    fn handle_vote(&self, vote: crate::block::ValidatorSignature) -> Result<(), NodeError> {
        let pending = self
            .engine
            .pending_block()?
            .ok_or(NodeError::NoPendingBlock)?;
        self.engine.collect_vote(&vote, pending.hash())?;
        tracing::info!(validator = %vote.validator, "vote collected");
        self.try_commit()
    }

    /// Finalize, apply, and persist the pending block once quorum is
    /// reached.
    fn try_commit(&self) -> Result<(), NodeError> {
        if !self.engine.has_quorum()? {
            return Ok(());
        }
        let Some(mut block) = self.engine.take_pending_block()? else {
            return Ok(());
        };

        self.engine.finalize_block(&mut block)?;
        self.state.apply_block(&block)?;

        // A write failure here is fatal to the commit: memory has advanced,
        // and the tip must not move until the block is durable.
        self.db.save_block(&block)?;
        for tx in &block.transactions {
            self.db.save_transaction(tx)?;
        }
        self.db.update_latest_height(block.header.height)?;

        let spent: Vec<PublicKey> = block
            .transactions
            .iter()
            .flat_map(|tx| tx.inputs.iter().map(|i| i.key_image))
            .collect();
        self.mempool.evict_spent(&spent)?;

        // Stake may have changed (slashing) while the block was in flight.
        self.engine.update_validator_set()?;

        tracing::info!(
            height = block.header.height,
            txs = block.transactions.len(),
            votes = block.validators.len(),
            "block finalized"
        );
        Ok(())
    }

    /// One proposer-ticker iteration: propose if (height+1, round) selects
    /// this node.
    pub fn propose_once(&self) -> Result<(), NodeError> {
        let Some(local) = self.engine.local_validator() else {
            return Ok(());
        };

        let height = self.state.height()?;
        let round = self.engine.round()?;
        if self.engine.select_proposer(height + 1, round)? != local {
            return Ok(());
        }

        // A proposal is still gathering votes; re-proposing would discard
        // the votes already cast for it.
        if self.engine.pending_block()?.is_some() {
            return Ok(());
        }

        let prev = self.db.get_block(height)?;
        let txs = self.mempool.drain(crate::constants::PROPOSAL_MAX_TXS)?;
        let block = self.engine.propose_block(txs, &prev)?;
        tracing::info!(
            height = block.header.height,
            txs = block.transactions.len(),
            "proposing block"
        );

        let block_hash = block.hash();
        self.engine.set_pending_block(block.clone())?;
        self.gossip
            .broadcast(Topic::Blocks, &gossip::encode_block(&block)?)?;

        let vote = self.engine.vote_for_block(&block)?;
        self.gossip
            .broadcast(Topic::Votes, &gossip::encode_vote(&vote)?)?;
        self.engine.collect_vote(&vote, block_hash)?;
        self.try_commit()
    }

    /// Submit a locally built transaction: admit it and announce it.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<(), NodeError> {
        self.handle_transaction(tx.clone())?;
        self.gossip
            .broadcast(Topic::Transactions, &gossip::encode_transaction(&tx)?)?;
        Ok(())
    }

    fn is_active_validator(&self) -> bool {
        self.engine
            .local_validator()
            .and_then(|key| self.state.get_validator(&key).ok())
            .map(|v| v.active)
            .unwrap_or(false)
    }

    /// Run the node: a proposer ticker on its own thread, inbound delivery
    /// drained on this one. Returns once the shutdown flag is triggered and
    /// the ticker has been joined.
    pub fn run(self: &Arc<Self>, inbox: Receiver<(Topic, Vec<u8>)>) {
        let ticker = {
            let node = Arc::clone(self);
            std::thread::spawn(move || loop {
                if node.shutdown.is_triggered() {
                    break;
                }
                std::thread::sleep(node.block_time);
                if node.shutdown.is_triggered() {
                    break;
                }
                if let Err(err) = node.propose_once() {
                    if matches!(err, NodeError::Storage(_)) {
                        tracing::error!(%err, "store write failed; halting");
                        node.shutdown.trigger();
                        break;
                    }
                    tracing::warn!(%err, "proposal attempt failed");
                }
            })
        };

        while !self.shutdown.is_triggered() {
            match inbox.recv_timeout(self.block_time) {
                Ok((topic, payload)) => {
                    // Validation errors are logged and dropped per message; a
                    // store failure leaves memory ahead of disk and must halt
                    // block application.
                    if let Err(NodeError::Storage(err)) = self.handle_message(topic, &payload) {
                        tracing::error!(%err, "store write failed; halting");
                        self.shutdown.trigger();
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if ticker.join().is_err() {
            tracing::error!("proposer ticker panicked");
        }
        if let Err(err) = self.db.flush() {
            tracing::error!(%err, "final flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gossip::NullGossip;
    use crate::ledger::ValidatorState;

    fn write_genesis(dir: &std::path::Path, validators: Vec<ValidatorState>) -> PathBuf {
        let genesis = GenesisConfig {
            chain_id: "obscura-test".into(),
            genesis_time: "2026-01-01T00:00:00Z".into(),
            initial_supply: 1_000_000,
            initial_validators: validators,
        };
        let path = dir.join("genesis.json");
        std::fs::write(&path, serde_json::to_string(&genesis).unwrap()).unwrap();
        path
    }

    fn validator_state(key: PublicKey, stake: u64) -> ValidatorState {
        ValidatorState {
            public_key: key,
            staked_amount: stake,
            active: true,
            joined_height: 0,
            unbonding_until: 0,
            slash_count: 0,
        }
    }

    fn make_node(dir: &std::path::Path, validator: Option<KeyPair>, stake: u64) -> Node {
        let keys: Vec<ValidatorState> = validator
            .iter()
            .map(|kp| validator_state(kp.public, stake))
            .collect();
        let genesis_file = write_genesis(dir, keys);
        Node::new(
            NodeConfig {
                data_dir: dir.join("node"),
                genesis_file,
                validator,
                block_time: Duration::from_millis(10),
            },
            Arc::new(NullGossip),
        )
        .unwrap()
    }

    #[test]
    fn new_node_starts_at_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let kp = KeyPair::generate();
        let node = make_node(dir.path(), Some(kp.clone()), 100);

        assert_eq!(node.state().height().unwrap(), 0);
        assert_eq!(node.db().latest_height().unwrap(), 0);
        assert_eq!(node.db().get_block(0).unwrap().header.height, 0);
        assert_eq!(
            node.state().get_validator(&kp.public).unwrap().staked_amount,
            100
        );
    }

    #[test]
    fn single_validator_produces_and_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let kp = KeyPair::generate();
        let node = make_node(dir.path(), Some(kp), 100);

        node.propose_once().unwrap();
        assert_eq!(node.state().height().unwrap(), 1);
        assert_eq!(node.db().latest_height().unwrap(), 1);
        let block = node.db().get_block(1).unwrap();
        assert_eq!(block.validators.len(), 1);
        assert_eq!(node.engine().round().unwrap(), 1);

        node.propose_once().unwrap();
        assert_eq!(node.state().height().unwrap(), 2);
    }

    #[test]
    fn observer_never_proposes() {
        let dir = tempfile::tempdir().unwrap();
        let kp = KeyPair::generate();
        // Observer node whose genesis still names a (different) validator.
        let genesis_file = write_genesis(
            dir.path(),
            vec![validator_state(kp.public, 100)],
        );
        let node = Node::new(
            NodeConfig {
                data_dir: dir.path().join("node"),
                genesis_file,
                validator: None,
                block_time: Duration::from_millis(10),
            },
            Arc::new(NullGossip),
        )
        .unwrap();

        node.propose_once().unwrap();
        assert_eq!(node.state().height().unwrap(), 0);
    }

    #[test]
    fn recovery_replays_persisted_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let kp = KeyPair::generate();
        {
            let node = make_node(dir.path(), Some(kp.clone()), 100);
            node.propose_once().unwrap();
            node.propose_once().unwrap();
            node.db().flush().unwrap();
        }

        // Fresh process over the same data dir.
        let genesis_file = dir.path().join("genesis.json");
        let node = Node::new(
            NodeConfig {
                data_dir: dir.path().join("node"),
                genesis_file,
                validator: Some(kp),
                block_time: Duration::from_millis(10),
            },
            Arc::new(NullGossip),
        )
        .unwrap();

        assert_eq!(node.db().latest_height().unwrap(), 2);
        assert_eq!(node.state().height().unwrap(), 2);
        // And it keeps extending the chain.
        node.propose_once().unwrap();
        assert_eq!(node.state().height().unwrap(), 3);
    }

    #[test]
    fn handle_message_drops_invalid_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let node = make_node(dir.path(), Some(KeyPair::generate()), 100);
        assert!(node.handle_message(Topic::Blocks, b"garbage").is_err());
        assert_eq!(node.state().height().unwrap(), 0);
    }

    #[test]
    fn vote_without_pending_block_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let kp = KeyPair::generate();
        let node = make_node(dir.path(), Some(kp.clone()), 100);

        let vote = crate::block::ValidatorSignature {
            validator: kp.public,
            signature: kp.sign(&[0u8; 32]),
            round: 0,
        };
        let payload = gossip::encode_vote(&vote).unwrap();
        assert!(matches!(
            node.handle_message(Topic::Votes, &payload),
            Err(NodeError::NoPendingBlock)
        ));
    }

    #[test]
    fn block_at_height_zero_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let node = make_node(dir.path(), Some(KeyPair::generate()), 100);
        let genesis_block = node.db().get_block(0).unwrap();
        let payload = gossip::encode_block(&genesis_block).unwrap();
        assert!(matches!(
            node.handle_message(Topic::Blocks, &payload),
            Err(NodeError::NoPredecessor(0))
        ));
    }
}
