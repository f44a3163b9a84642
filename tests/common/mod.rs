#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nostr_sdk::{Keys, PublicKey};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, Semaphore};

use keep_link::{
    LinkError, NodeConfig, NodeEvent, NodeFactory, NodeMessage, PeerInfo, Result, SignerNode,
    TransportEvent,
};

pub fn peer_key() -> PublicKey {
    Keys::generate().public_key()
}

pub fn json_group_decoder(credential: &str) -> Result<Value> {
    serde_json::from_str(credential).map_err(LinkError::from)
}

pub struct MockNode {
    events: broadcast::Sender<NodeEvent>,
    transport: broadcast::Sender<TransportEvent>,
    peers: Mutex<Vec<PeerInfo>>,
    /// Scripted ping results; `ping_default` applies once the script runs out.
    ping_script: Mutex<VecDeque<bool>>,
    ping_default: AtomicBool,
    resubscribe_ok: AtomicBool,
    reconnect_ok: AtomicBool,
    emitted: Mutex<Vec<NodeEvent>>,
    close_gate: Mutex<Option<Arc<Semaphore>>>,
    pub relays: Vec<String>,
    pub pings: AtomicUsize,
    pub resubscribes: AtomicUsize,
    pub reconnects: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockNode {
    pub fn new() -> Arc<Self> {
        Self::with_relays(Vec::new())
    }

    pub fn with_relays(relays: Vec<String>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let (transport, _) = broadcast::channel(16);
        Arc::new(Self {
            events,
            transport,
            peers: Mutex::new(Vec::new()),
            ping_script: Mutex::new(VecDeque::new()),
            ping_default: AtomicBool::new(true),
            resubscribe_ok: AtomicBool::new(true),
            reconnect_ok: AtomicBool::new(true),
            emitted: Mutex::new(Vec::new()),
            close_gate: Mutex::new(None),
            relays,
            pings: AtomicUsize::new(0),
            resubscribes: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn set_peers(&self, peers: Vec<PeerInfo>) {
        *self.peers.lock() = peers;
    }

    pub fn fail_pings(&self) {
        self.ping_default.store(false, Ordering::SeqCst);
    }

    pub fn script_pings(&self, results: &[bool]) {
        self.ping_script.lock().extend(results.iter().copied());
    }

    pub fn fail_resubscribe(&self) {
        self.resubscribe_ok.store(false, Ordering::SeqCst);
    }

    pub fn fail_reconnect(&self) {
        self.reconnect_ok.store(false, Ordering::SeqCst);
    }

    /// Hold `close()` until the returned semaphore gets permits.
    pub fn hold_close(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.close_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn send_event(&self, event: NodeEvent) {
        let _ = self.events.send(event);
    }

    pub fn send_message(&self, tag: &str) {
        self.send_event(NodeEvent::Message(NodeMessage::new(tag)));
    }

    pub fn send_transport(&self, event: TransportEvent) {
        let _ = self.transport.send(event);
    }

    pub fn emitted(&self) -> Vec<NodeEvent> {
        self.emitted.lock().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignerNode for MockNode {
    async fn ping(&self, _pubkey: &PublicKey) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let ok = self
            .ping_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.ping_default.load(Ordering::SeqCst));
        if ok {
            Ok(())
        } else {
            Err(LinkError::Transport("peer did not answer".into()))
        }
    }

    fn peers(&self) -> Vec<PeerInfo> {
        self.peers.lock().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    fn subscribe_transport(&self) -> broadcast::Receiver<TransportEvent> {
        self.transport.subscribe()
    }

    fn emit(&self, event: NodeEvent) {
        self.emitted.lock().push(event.clone());
        let _ = self.events.send(event);
    }

    async fn resubscribe(&self) -> Result<()> {
        self.resubscribes.fetch_add(1, Ordering::SeqCst);
        if self.resubscribe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LinkError::Transport("filter update rejected".into()))
        }
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.reconnect_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LinkError::Transport("relays unreachable".into()))
        }
    }

    async fn close(&self) {
        let gate = self.close_gate.lock().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockFactory {
    attempts: Mutex<Vec<NodeConfig>>,
    created: Mutex<Vec<Arc<MockNode>>>,
    failing_relay: Mutex<Option<String>>,
    fail_all: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail any connection whose relay set contains `relay`.
    pub fn fail_when_relay(&self, relay: &str) {
        *self.failing_relay.lock() = Some(relay.to_string());
    }

    pub fn fail_all(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    /// Hold every connection attempt until the returned semaphore gets permits.
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn attempts(&self) -> Vec<NodeConfig> {
        self.attempts.lock().clone()
    }

    pub fn created(&self) -> Vec<Arc<MockNode>> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl NodeFactory for MockFactory {
    async fn create_connected_node(&self, config: &NodeConfig) -> Result<Arc<dyn SignerNode>> {
        self.attempts.lock().push(config.clone());

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| LinkError::Transport(e.to_string()))?
                .forget();
        }

        if self.fail_all.load(Ordering::SeqCst) {
            return Err(LinkError::Transport("no relay accepted the connection".into()));
        }
        let failing = self.failing_relay.lock().clone();
        if let Some(relay) = failing {
            if config.relays.iter().any(|r| r.eq_ignore_ascii_case(&relay)) {
                return Err(LinkError::Transport(format!("{relay} refused connection")));
            }
        }

        let node = MockNode::with_relays(config.relays.clone());
        self.created.lock().push(node.clone());
        Ok(node as Arc<dyn SignerNode>)
    }
}
