// SPDX-FileCopyrightText: © 2026 PrivKey LLC
// SPDX-License-Identifier: AGPL-3.0-or-later

#![forbid(unsafe_code)]

//! Heartbeat supervision for a live signing node.
//!
//! A supervisor task pings one peer per heartbeat and tracks inbound
//! activity. When the node looks stale, or pings keep failing, it runs the
//! heal ladder: resubscribe, reconnect, and finally recreate the node through
//! the [`NodeFactory`], swapping it inside the shared [`NodeCell`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use nostr_sdk::PublicKey;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{LinkError, Result};
use crate::node::{NodeCell, NodeConfig, NodeEvent, NodeFactory, SignerNode, TransportEvent};
use crate::peer::PeerCursor;

/// Delays before each step of the heal ladder, in milliseconds.
pub const HEAL_BACKOFF_MS: [u64; 5] = [0, 1_000, 2_000, 5_000, 10_000];

/// Consecutive ping failures that force a heal.
pub const HEAL_FAILURE_THRESHOLD: u32 = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeepAliveOptions {
    pub heartbeat: Duration,
    pub timeout: Duration,
    pub stale: Duration,
    pub max_backoff: Duration,
}

impl Default for KeepAliveOptions {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            stale: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl KeepAliveOptions {
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stale(mut self, stale: Duration) -> Self {
        self.stale = stale;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Heal ladder delays capped at `max_backoff`.
    pub fn heal_delays(&self) -> Vec<Duration> {
        HEAL_BACKOFF_MS
            .iter()
            .map(|ms| Duration::from_millis(*ms).min(self.max_backoff))
            .collect()
    }
}

pub struct KeepAliveConfig {
    pub node: Arc<dyn SignerNode>,
    pub factory: Arc<dyn NodeFactory>,
    pub group_credential: String,
    pub share_credential: String,
    pub relays: Vec<String>,
    pub self_pubkey: Option<PublicKey>,
    pub options: KeepAliveOptions,
}

impl KeepAliveConfig {
    pub fn new(
        node: Arc<dyn SignerNode>,
        factory: Arc<dyn NodeFactory>,
        group_credential: &str,
        share_credential: &str,
        relays: Vec<String>,
    ) -> Self {
        Self {
            node,
            factory,
            group_credential: group_credential.to_string(),
            share_credential: share_credential.to_string(),
            relays,
            self_pubkey: None,
            options: KeepAliveOptions::default(),
        }
    }

    pub fn with_self_pubkey(mut self, pubkey: PublicKey) -> Self {
        self.self_pubkey = Some(pubkey);
        self
    }

    pub fn with_options(mut self, options: KeepAliveOptions) -> Self {
        self.options = options;
        self
    }
}

/// Passed to replace callbacks whenever recreation swaps the node.
pub struct NodeReplaced {
    pub previous: Arc<dyn SignerNode>,
    pub next: Arc<dyn SignerNode>,
}

type ReplaceCallback = Arc<dyn Fn(&NodeReplaced) + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeepAliveStats {
    pub running: bool,
    pub ticks: u64,
    pub ping_failures: u64,
    pub consecutive_failures: u32,
    pub heals: u64,
    pub replacements: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HealReason {
    Inactive,
    ConsecutiveFailures(u32),
}

impl std::fmt::Display for HealReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => f.write_str("inactive"),
            Self::ConsecutiveFailures(n) => write!(f, "{n} consecutive ping failures"),
        }
    }
}

enum Step {
    Healed,
    Failed,
    Stopped,
}

struct Shared {
    factory: Arc<dyn NodeFactory>,
    node_config: NodeConfig,
    self_pubkey: Option<PublicKey>,
    options: KeepAliveOptions,
    replace_callbacks: RwLock<Vec<ReplaceCallback>>,
    stats: Mutex<KeepAliveStats>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Keeps one signing node alive for the lifetime of a session.
///
/// The node may be recreated any number of times; callers that hold
/// [`SignerKeepAlive::node`] always see the current one.
pub struct SignerKeepAlive {
    node: NodeCell,
    shared: Arc<Shared>,
    control: Mutex<Option<Running>>,
}

impl SignerKeepAlive {
    pub fn new(config: KeepAliveConfig) -> Self {
        let node_config = NodeConfig::new(
            &config.group_credential,
            &config.share_credential,
            config.relays,
        );
        Self {
            node: NodeCell::new(config.node),
            shared: Arc::new(Shared {
                factory: config.factory,
                node_config,
                self_pubkey: config.self_pubkey,
                options: config.options,
                replace_callbacks: RwLock::new(Vec::new()),
                stats: Mutex::new(KeepAliveStats::default()),
            }),
            control: Mutex::new(None),
        }
    }

    /// Start heartbeating. Calling this while already running does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut control = self.control.lock();
        if control.as_ref().is_some_and(|r| !r.task.is_finished()) {
            debug!("Keepalive already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = Supervisor::new(self.node.clone(), self.shared.clone(), shutdown_rx);
        let task = tokio::spawn(supervisor.run());
        *control = Some(Running {
            shutdown: shutdown_tx,
            task,
        });
    }

    /// Stop heartbeating and wait for the supervisor to detach from the node.
    pub async fn stop(&self) {
        let running = self.control.lock().take();
        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.task.await {
            warn!(error = %e, "Keepalive task ended abnormally");
        }
    }

    pub fn on_replace<F>(&self, callback: F)
    where
        F: Fn(&NodeReplaced) + Send + Sync + 'static,
    {
        self.shared.replace_callbacks.write().push(Arc::new(callback));
    }

    pub fn is_running(&self) -> bool {
        self.control
            .lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    pub fn node(&self) -> &NodeCell {
        &self.node
    }

    pub fn stats(&self) -> KeepAliveStats {
        let mut stats = *self.shared.stats.lock();
        stats.running = self.is_running();
        stats
    }
}

impl Drop for SignerKeepAlive {
    fn drop(&mut self) {
        if let Some(running) = self.control.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn recv_or_pending<T: Clone>(
    rx: &mut Option<broadcast::Receiver<T>>,
) -> std::result::Result<T, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

enum Wake {
    Shutdown,
    Heartbeat,
    Node(std::result::Result<NodeEvent, RecvError>),
    Transport(std::result::Result<TransportEvent, RecvError>),
}

struct Supervisor {
    node: NodeCell,
    shared: Arc<Shared>,
    shutdown: watch::Receiver<bool>,
    node_events: Option<broadcast::Receiver<NodeEvent>>,
    transport_events: Option<broadcast::Receiver<TransportEvent>>,
    consecutive_failures: u32,
    last_activity: Instant,
    cursor: PeerCursor,
}

impl Supervisor {
    fn new(node: NodeCell, shared: Arc<Shared>, shutdown: watch::Receiver<bool>) -> Self {
        let current = node.current();
        Self {
            node,
            shared,
            shutdown,
            node_events: Some(current.subscribe()),
            transport_events: Some(current.subscribe_transport()),
            consecutive_failures: 0,
            last_activity: Instant::now(),
            cursor: PeerCursor::new(),
        }
    }

    async fn run(mut self) {
        info!(
            heartbeat_ms = self.shared.options.heartbeat.as_millis() as u64,
            "Keepalive started"
        );

        'outer: loop {
            self.tick().await;
            self.publish_stats();
            if self.is_stopped() {
                break;
            }

            let heartbeat = tokio::time::sleep(self.shared.options.heartbeat);
            tokio::pin!(heartbeat);

            loop {
                let wake = tokio::select! {
                    biased;
                    _ = self.shutdown.changed() => Wake::Shutdown,
                    event = recv_or_pending(&mut self.node_events) => Wake::Node(event),
                    event = recv_or_pending(&mut self.transport_events) => Wake::Transport(event),
                    _ = &mut heartbeat => Wake::Heartbeat,
                };

                match wake {
                    Wake::Shutdown => break 'outer,
                    Wake::Heartbeat => break,
                    Wake::Node(event) => self.on_node_event(event),
                    Wake::Transport(event) => self.on_transport_event(event),
                }
            }
        }

        self.node_events = None;
        self.transport_events = None;
        self.publish_stats();
        info!("Keepalive stopped");
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Await `fut` unless a stop arrives first.
    async fn until_stopped<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        if self.is_stopped() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.shutdown.changed() => None,
            out = fut => Some(out),
        }
    }

    fn mark_active(&mut self) {
        self.consecutive_failures = 0;
        self.last_activity = Instant::now();
    }

    fn on_node_event(&mut self, event: std::result::Result<NodeEvent, RecvError>) {
        match event {
            Ok(NodeEvent::Message(_)) => self.mark_active(),
            Ok(NodeEvent::Closed) => info!("Signer node reported closed"),
            Ok(NodeEvent::Error(e)) => debug!(error = %e, "Signer node error"),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Node event queue lagged");
                self.mark_active();
            }
            Err(RecvError::Closed) => {
                debug!("Node event channel closed");
                self.node_events = None;
            }
        }
    }

    fn on_transport_event(&mut self, event: std::result::Result<TransportEvent, RecvError>) {
        match event {
            Ok(TransportEvent::Close) => {
                debug!("Relay transport closed");
                self.node.current().emit(NodeEvent::Closed);
            }
            Ok(TransportEvent::Error(e)) => debug!(error = %e, "Relay transport error"),
            Ok(TransportEvent::Connected) => {}
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Transport event queue lagged"),
            Err(RecvError::Closed) => {
                debug!("Transport event channel closed");
                self.transport_events = None;
            }
        }
    }

    async fn tick(&mut self) {
        let inactive = self.last_activity.elapsed() > self.shared.options.stale;
        let node = self.node.current();
        let peers = node.peers();
        let target = self
            .cursor
            .next_target(&peers, self.shared.self_pubkey.as_ref());

        self.shared.stats.lock().ticks += 1;

        let healthy = match target {
            None => {
                debug!("No known peers, treating heartbeat as healthy");
                true
            }
            Some(target) => {
                let timeout = self.shared.options.timeout;
                let Some(outcome) = self
                    .until_stopped(tokio::time::timeout(timeout, node.ping(&target)))
                    .await
                else {
                    return;
                };

                let result = match outcome {
                    Ok(result) => result,
                    Err(_) => Err(LinkError::Timeout(format!(
                        "ping timed out after {}ms",
                        timeout.as_millis()
                    ))),
                };

                match result {
                    Ok(()) => true,
                    Err(e) => {
                        self.consecutive_failures += 1;
                        self.shared.stats.lock().ping_failures += 1;
                        debug!(
                            peer = %target,
                            failures = self.consecutive_failures,
                            error = %e,
                            "Heartbeat ping failed"
                        );
                        false
                    }
                }
            }
        };

        if healthy {
            self.mark_active();
            return;
        }

        let reason = if self.consecutive_failures >= HEAL_FAILURE_THRESHOLD {
            HealReason::ConsecutiveFailures(self.consecutive_failures)
        } else if inactive {
            HealReason::Inactive
        } else {
            return;
        };

        self.heal(reason).await;
    }

    async fn heal(&mut self, reason: HealReason) {
        self.shared.stats.lock().heals += 1;
        info!(%reason, "Healing signer connection");

        for (attempt, delay) in self.shared.options.heal_delays().into_iter().enumerate() {
            if !delay.is_zero() && self.until_stopped(tokio::time::sleep(delay)).await.is_none() {
                return;
            }

            match self.attempt(attempt).await {
                Step::Healed => {
                    self.mark_active();
                    return;
                }
                Step::Stopped => return,
                Step::Failed => {}
            }
        }

        warn!(%reason, "Heal ladder exhausted, retrying on next heartbeat");
    }

    async fn attempt(&mut self, attempt: usize) -> Step {
        let node = self.node.current();

        match self.until_stopped(node.resubscribe()).await {
            None => return Step::Stopped,
            Some(Ok(())) => {
                info!(attempt, "Resubscribed signer node");
                return Step::Healed;
            }
            Some(Err(e)) => debug!(attempt, error = %e, "Resubscribe failed"),
        }

        match self.until_stopped(node.reconnect()).await {
            None => return Step::Stopped,
            Some(Ok(())) => {
                info!(attempt, "Reconnected signer node");
                return Step::Healed;
            }
            Some(Err(e)) => debug!(attempt, error = %e, "Reconnect failed"),
        }

        match self.recreate().await {
            Ok(step) => step,
            Err(e) => {
                error!(attempt, error = %e, "Failed to recreate signer node");
                Step::Failed
            }
        }
    }

    async fn recreate(&mut self) -> Result<Step> {
        let shared = self.shared.clone();
        let Some(created) = self
            .until_stopped(shared.factory.create_connected_node(&shared.node_config))
            .await
        else {
            return Ok(Step::Stopped);
        };
        let next = created.map_err(|e| LinkError::NodeRecreation(e.to_string()))?;

        if self.is_stopped() {
            next.close().await;
            return Ok(Step::Stopped);
        }

        let previous = self.node.replace(next.clone());
        self.node_events = Some(next.subscribe());
        self.transport_events = Some(next.subscribe_transport());
        self.shared.stats.lock().replacements += 1;
        info!("Recreated signer node");

        let callbacks = self.shared.replace_callbacks.read().clone();
        let replaced = NodeReplaced { previous, next };
        for callback in &callbacks {
            callback(&replaced);
        }

        replaced.previous.close().await;
        Ok(Step::Healed)
    }

    fn publish_stats(&self) {
        self.shared.stats.lock().consecutive_failures = self.consecutive_failures;
    }
}
