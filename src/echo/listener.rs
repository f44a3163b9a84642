// SPDX-FileCopyrightText: © 2026 PrivKey LLC
// SPDX-License-Identifier: AGPL-3.0-or-later

#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    EchoEvent, EchoReceived, EchoRelaySet, EchoSink, ECHO_MESSAGE_TAGS, ECHO_SIGNAL_EVENTS,
};
use crate::node::{NodeConfig, NodeEvent, NodeFactory, SignerNode};

struct ListenerSession {
    share_index: usize,
    node: Arc<dyn SignerNode>,
    handler: JoinHandle<()>,
}

struct ListenerState {
    id: String,
    group_credential: String,
    disposed: AtomicBool,
    failed_shares: AtomicUsize,
    share_count: usize,
    sessions: Mutex<Vec<ListenerSession>>,
    seen: Mutex<HashSet<String>>,
    sink: EchoSink,
}

impl ListenerState {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn deliver(&self, share_index: usize, share_credential: &str) {
        if self.is_disposed() {
            return;
        }
        if !self
            .seen
            .lock()
            .insert(format!("{share_index}:{share_credential}"))
        {
            return;
        }

        info!(listener_id = %self.id, share_index, "Echo received");
        (self.sink)(EchoEvent::Received(EchoReceived {
            share_index,
            share_credential: share_credential.to_string(),
        }));
    }

    fn share_failed(&self, share_index: usize, message: String) {
        warn!(
            listener_id = %self.id,
            share_index,
            error = %message,
            "Echo session failed to connect"
        );
        let failed = self.failed_shares.fetch_add(1, Ordering::SeqCst) + 1;
        if failed == self.share_count && !self.is_disposed() {
            (self.sink)(EchoEvent::Failed {
                reason: "connect-failed".into(),
                message,
            });
        }
    }

    /// Register a connected node, or tear it down if the listener was
    /// disposed while the connection was in flight.
    async fn register(
        self: &Arc<Self>,
        share_index: usize,
        share_credential: String,
        node: Arc<dyn SignerNode>,
    ) {
        {
            let mut sessions = self.sessions.lock();
            if !self.is_disposed() {
                let events = node.subscribe();
                let handler = tokio::spawn(handle_events(
                    self.clone(),
                    share_index,
                    share_credential,
                    events,
                ));
                sessions.push(ListenerSession {
                    share_index,
                    node,
                    handler,
                });
                debug!(listener_id = %self.id, share_index, "Echo session registered");
                return;
            }
        }

        debug!(
            listener_id = %self.id,
            share_index,
            "Listener disposed during connect, closing node"
        );
        node.close().await;
    }
}

async fn handle_events(
    state: Arc<ListenerState>,
    share_index: usize,
    share_credential: String,
    mut events: broadcast::Receiver<NodeEvent>,
) {
    loop {
        match events.recv().await {
            Ok(NodeEvent::Message(msg)) if ECHO_MESSAGE_TAGS.contains(&msg.tag.as_str()) => {
                state.deliver(share_index, &share_credential);
            }
            Ok(NodeEvent::Signal(name)) if ECHO_SIGNAL_EVENTS.contains(&name.as_str()) => {
                state.deliver(share_index, &share_credential);
            }
            Ok(NodeEvent::Error(e)) => {
                warn!(listener_id = %state.id, share_index, error = %e, "Echo session error");
            }
            Ok(NodeEvent::Closed) => {
                info!(listener_id = %state.id, share_index, "Echo session closed");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!(listener_id = %state.id, share_index, skipped, "Echo event queue lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn connect_share(
    state: Arc<ListenerState>,
    factory: Arc<dyn NodeFactory>,
    share_index: usize,
    share_credential: String,
    relays: EchoRelaySet,
) {
    let config = NodeConfig::new(&state.group_credential, &share_credential, relays.primary);
    let primary = factory.create_connected_node(&config).await;
    if state.is_disposed() {
        if let Ok(node) = primary {
            node.close().await;
        }
        return;
    }

    let node = match (primary, relays.fallback) {
        (Ok(node), _) => node,
        (Err(e), None) => {
            state.share_failed(share_index, e.to_string());
            return;
        }
        (Err(e), Some(defaults)) => {
            warn!(
                listener_id = %state.id,
                share_index,
                error = %e,
                "Primary echo relays failed, retrying with default relays"
            );
            let config = NodeConfig::new(&state.group_credential, &share_credential, defaults);
            let fallback = factory.create_connected_node(&config).await;
            if state.is_disposed() {
                if let Ok(node) = fallback {
                    node.close().await;
                }
                return;
            }
            match fallback {
                Ok(node) => node,
                Err(e) => {
                    state.share_failed(share_index, e.to_string());
                    return;
                }
            }
        }
    };

    state.register(share_index, share_credential, node).await;
}

/// A running echo listener: one session per share credential.
///
/// Cloning shares the same listener.
#[derive(Clone)]
pub struct EchoListener {
    state: Arc<ListenerState>,
}

impl EchoListener {
    pub(super) fn open(
        listener_id: &str,
        group_credential: &str,
        share_credentials: &[String],
        relays: EchoRelaySet,
        factory: Arc<dyn NodeFactory>,
        sink: EchoSink,
    ) -> Self {
        let state = Arc::new(ListenerState {
            id: listener_id.to_string(),
            group_credential: group_credential.to_string(),
            disposed: AtomicBool::new(false),
            failed_shares: AtomicUsize::new(0),
            share_count: share_credentials.len(),
            sessions: Mutex::new(Vec::new()),
            seen: Mutex::new(HashSet::new()),
            sink,
        });

        for (share_index, share_credential) in share_credentials.iter().enumerate() {
            tokio::spawn(connect_share(
                state.clone(),
                factory.clone(),
                share_index,
                share_credential.clone(),
                relays.clone(),
            ));
        }

        info!(
            listener_id,
            shares = share_credentials.len(),
            relays = relays.primary.len(),
            "Echo listener started"
        );
        Self { state }
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn is_disposed(&self) -> bool {
        self.state.is_disposed()
    }

    /// Number of connected per-share sessions.
    pub fn session_count(&self) -> usize {
        self.state.sessions.lock().len()
    }

    pub fn share_indices(&self) -> Vec<usize> {
        self.state
            .sessions
            .lock()
            .iter()
            .map(|s| s.share_index)
            .collect()
    }

    /// Detach every handler, close every node and forget delivered echoes.
    ///
    /// Safe to call repeatedly and while connections are still in flight.
    pub async fn cleanup(&self) {
        self.detach().close().await;
    }

    /// Stop delivering echoes right away and hand back the nodes still to be
    /// closed. Connections that finish later close their own node.
    pub(super) fn detach(&self) -> DetachedNodes {
        let first = !self.state.disposed.swap(true, Ordering::SeqCst);
        let sessions = std::mem::take(&mut *self.state.sessions.lock());
        self.state.seen.lock().clear();

        if first {
            info!(listener_id = %self.state.id, "Echo listener cleaned up");
        }
        DetachedNodes {
            nodes: sessions
                .into_iter()
                .map(|session| {
                    session.handler.abort();
                    session.node
                })
                .collect(),
        }
    }
}

/// Nodes of a detached listener, waiting to be closed.
#[must_use]
pub(super) struct DetachedNodes {
    nodes: Vec<Arc<dyn SignerNode>>,
}

impl DetachedNodes {
    pub(super) async fn close(self) {
        for node in self.nodes {
            node.close().await;
        }
    }
}

impl std::fmt::Debug for EchoListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoListener")
            .field("id", &self.state.id)
            .field("disposed", &self.is_disposed())
            .field("sessions", &self.session_count())
            .finish()
    }
}
