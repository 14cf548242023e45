//! The gossip oracle interface.
//!
//! The node consumes a broadcast-plus-delivery abstraction: it publishes
//! envelopes to one of three topics and receives inbound payloads through a
//! callback. The overlay underneath is assumed to deliver at-least-once,
//! possibly reordered and duplicated, with self-echo suppressed. Transport
//! networking lives outside this crate; [`LoopbackGossip`] wires nodes in
//! one process for tests and single-node operation.

use std::sync::mpsc::Sender;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::block::{Block, ValidatorSignature};
use crate::transaction::Transaction;

/// Gossip topics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Blocks,
    Transactions,
    Votes,
}

/// Errors from envelope codecs and broadcasting.
#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("envelope encode/decode error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("broadcast failed: {0}")]
    Broadcast(String),
}

/// The wire envelope: `{"type": ..., "data": <inner record JSON>}`.
#[derive(Serialize, Deserialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    msg_type: &'a str,
    data: serde_json::Value,
}

/// A decoded inbound message.
#[derive(Clone, Debug)]
pub enum Message {
    Block(Block),
    Transaction(Transaction),
    Vote(ValidatorSignature),
}

/// Encode a block envelope.
pub fn encode_block(block: &Block) -> Result<Vec<u8>, GossipError> {
    encode("block", serde_json::to_value(block)?)
}

/// Encode a transaction envelope.
pub fn encode_transaction(tx: &Transaction) -> Result<Vec<u8>, GossipError> {
    encode("transaction", serde_json::to_value(tx)?)
}

/// Encode a vote envelope.
pub fn encode_vote(vote: &ValidatorSignature) -> Result<Vec<u8>, GossipError> {
    encode("vote", serde_json::to_value(vote)?)
}

fn encode(msg_type: &str, data: serde_json::Value) -> Result<Vec<u8>, GossipError> {
    Ok(serde_json::to_vec(&Envelope { msg_type, data })?)
}

/// Decode an inbound envelope into a typed message.
pub fn decode(payload: &[u8]) -> Result<Message, GossipError> {
    let envelope: Envelope<'_> = serde_json::from_slice(payload)?;
    match envelope.msg_type {
        "block" => Ok(Message::Block(serde_json::from_value(envelope.data)?)),
        "transaction" => Ok(Message::Transaction(serde_json::from_value(envelope.data)?)),
        "vote" => Ok(Message::Vote(serde_json::from_value(envelope.data)?)),
        other => Err(GossipError::UnknownType(other.to_string())),
    }
}

/// Outbound half of the oracle.
pub trait GossipOracle: Send + Sync {
    fn broadcast(&self, topic: Topic, payload: &[u8]) -> Result<(), GossipError>;
}

/// An oracle that drops everything: a node with no peers.
pub struct NullGossip;

impl GossipOracle for NullGossip {
    fn broadcast(&self, _topic: Topic, _payload: &[u8]) -> Result<(), GossipError> {
        Ok(())
    }
}

/// In-process fan-out oracle: every broadcast is delivered to every
/// registered subscriber except the sender's own inbox (self-echo
/// suppression, as the overlay guarantees).
pub struct LoopbackGossip {
    subscribers: Mutex<Vec<Sender<(Topic, Vec<u8>)>>>,
    /// Index of the owning node's inbox in `subscribers`.
    own_index: usize,
}

/// Shared registry wiring several [`LoopbackGossip`] handles together.
#[derive(Default)]
pub struct LoopbackNetwork {
    inboxes: Mutex<Vec<Sender<(Topic, Vec<u8>)>>>,
}

impl LoopbackNetwork {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }
}

impl LoopbackGossip {
    /// Register a node's inbox with the network and return its oracle.
    pub fn join(
        network: &std::sync::Arc<LoopbackNetwork>,
        inbox: Sender<(Topic, Vec<u8>)>,
    ) -> Self {
        let mut inboxes = network
            .inboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let own_index = inboxes.len();
        inboxes.push(inbox);
        LoopbackGossip {
            subscribers: Mutex::new(inboxes.clone()),
            own_index,
        }
    }

    /// Refresh the subscriber list from the network (after later joins).
    pub fn sync(&self, network: &std::sync::Arc<LoopbackNetwork>) {
        let inboxes = network
            .inboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *subscribers = inboxes.clone();
    }
}

impl GossipOracle for LoopbackGossip {
    fn broadcast(&self, topic: Topic, payload: &[u8]) -> Result<(), GossipError> {
        let subscribers = self
            .subscribers
            .lock()
            .map_err(|_| GossipError::Broadcast("subscriber lock poisoned".into()))?;
        for (i, subscriber) in subscribers.iter().enumerate() {
            if i == self.own_index {
                continue;
            }
            // A disconnected subscriber is a departed peer, not an error.
            let _ = subscriber.send((topic, payload.to_vec()));
        }
        Ok(())
    }
}
