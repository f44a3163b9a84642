// SPDX-FileCopyrightText: © 2026 PrivKey LLC
// SPDX-License-Identifier: AGPL-3.0-or-later

#![forbid(unsafe_code)]

//! Capability surface of the external signing node.
//!
//! The threshold signing protocol lives outside this crate. Adapters for it
//! implement [`SignerNode`] and [`NodeFactory`]; everything here only needs
//! ping, peer listing, event subscription and the transport's resubscribe and
//! reconnect operations.

use std::sync::Arc;

use async_trait::async_trait;
use nostr_sdk::PublicKey;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::peer::PeerInfo;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeMessage {
    pub tag: String,
    pub from: Option<PublicKey>,
}

impl NodeMessage {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            from: None,
        }
    }

    pub fn from_peer(mut self, pubkey: PublicKey) -> Self {
        self.from = Some(pubkey);
        self
    }
}

/// Events emitted by a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeEvent {
    Ready,
    /// Any inbound protocol message.
    Message(NodeMessage),
    /// A named protocol event such as `/echo/sender/res`.
    Signal(String),
    Error(String),
    Closed,
}

/// Events emitted by the relay transport underneath a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Close,
    Error(String),
}

#[async_trait]
pub trait SignerNode: Send + Sync {
    /// Ping a peer. Adapters map a reply with `ok == false` to an error.
    async fn ping(&self, pubkey: &PublicKey) -> Result<()>;

    fn peers(&self) -> Vec<PeerInfo>;

    fn subscribe(&self) -> broadcast::Receiver<NodeEvent>;

    fn subscribe_transport(&self) -> broadcast::Receiver<TransportEvent>;

    fn emit(&self, event: NodeEvent);

    /// Re-send the transport's current subscription filter.
    async fn resubscribe(&self) -> Result<()>;

    async fn reconnect(&self) -> Result<()>;

    async fn close(&self);
}

#[derive(Clone)]
pub struct NodeConfig {
    pub group: String,
    pub share: String,
    pub relays: Vec<String>,
}

impl NodeConfig {
    pub fn new(group: &str, share: &str, relays: Vec<String>) -> Self {
        Self {
            group: group.to_string(),
            share: share.to_string(),
            relays,
        }
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("group", &self.group)
            .field("share", &"[REDACTED]")
            .field("relays", &self.relays)
            .finish()
    }
}

#[async_trait]
pub trait NodeFactory: Send + Sync {
    /// Build a node for `config` and wait until its relays are connected.
    async fn create_connected_node(&self, config: &NodeConfig) -> Result<Arc<dyn SignerNode>>;
}

pub trait GroupDecoder: Send + Sync {
    fn decode_group(&self, credential: &str) -> Result<Value>;
}

impl<F> GroupDecoder for F
where
    F: Fn(&str) -> Result<Value> + Send + Sync,
{
    fn decode_group(&self, credential: &str) -> Result<Value> {
        self(credential)
    }
}

/// Stable handle to a node whose contents may be swapped.
///
/// Clones share the same slot, so anyone holding a `NodeCell` always reaches
/// the node installed by the most recent [`NodeCell::replace`].
#[derive(Clone)]
pub struct NodeCell {
    slot: Arc<RwLock<Arc<dyn SignerNode>>>,
}

impl NodeCell {
    pub fn new(node: Arc<dyn SignerNode>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(node)),
        }
    }

    pub fn current(&self) -> Arc<dyn SignerNode> {
        self.slot.read().clone()
    }

    /// Install `next` and return the node it replaced.
    pub fn replace(&self, next: Arc<dyn SignerNode>) -> Arc<dyn SignerNode> {
        std::mem::replace(&mut *self.slot.write(), next)
    }

    pub fn holds(&self, node: &Arc<dyn SignerNode>) -> bool {
        Arc::ptr_eq(&*self.slot.read(), node)
    }
}

impl std::fmt::Debug for NodeCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCell").finish_non_exhaustive()
    }
}
