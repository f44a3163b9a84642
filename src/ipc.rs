// SPDX-FileCopyrightText: © 2026 PrivKey LLC
// SPDX-License-Identifier: AGPL-3.0-or-later

#![forbid(unsafe_code)]

//! Request handlers behind the desktop IPC channels.
//!
//! Framing and argument transport belong to the host application. Handlers
//! never return an error across this boundary: failures become
//! `{ ok: false, reason }` replies, and listener failures are also pushed to
//! the owning sender as `echo-error` notifications.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::echo::{EchoEvent, EchoListenerRegistry, EchoSink, SenderId};
use crate::error::LinkError;
use crate::node::GroupDecoder;
use crate::relay::{compute_relay_plan, RelayPlan, RelayPlanOptions};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl IpcReply {
    pub fn ok() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn fail(reason: &str) -> Self {
        Self {
            ok: false,
            reason: Some(reason.to_string()),
        }
    }
}

impl From<&LinkError> for IpcReply {
    fn from(e: &LinkError) -> Self {
        Self::fail(e.reason())
    }
}

/// Notifications pushed to the sender that owns a listener.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "channel")]
pub enum EchoNotification {
    #[serde(rename = "echo-received", rename_all = "camelCase")]
    Received {
        listener_id: String,
        share_index: usize,
        share_credential: String,
    },
    #[serde(rename = "echo-error", rename_all = "camelCase")]
    Error {
        listener_id: String,
        reason: String,
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoStartRequest {
    pub listener_id: String,
    pub group_credential: String,
    pub share_credentials: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStatus {
    pub listener_id: String,
    pub sessions: usize,
}

pub type Outbox = mpsc::UnboundedSender<EchoNotification>;

fn notification_sink(listener_id: &str, outbox: Outbox) -> EchoSink {
    let listener_id = listener_id.to_string();
    Arc::new(move |event: EchoEvent| {
        let notification = match event {
            EchoEvent::Received(echo) => EchoNotification::Received {
                listener_id: listener_id.clone(),
                share_index: echo.share_index,
                share_credential: echo.share_credential,
            },
            EchoEvent::Failed { reason, message } => EchoNotification::Error {
                listener_id: listener_id.clone(),
                reason,
                message,
            },
        };
        // The sender may already be gone; release_sender cleans up after it.
        let _ = outbox.send(notification);
    })
}

pub struct IpcHandler {
    registry: EchoListenerRegistry,
    decoder: Arc<dyn GroupDecoder>,
    base_relays: Vec<String>,
}

impl IpcHandler {
    pub fn new(registry: EchoListenerRegistry, decoder: Arc<dyn GroupDecoder>) -> Self {
        Self {
            registry,
            decoder,
            base_relays: Vec::new(),
        }
    }

    /// Base relays applied to plan requests that do not carry their own.
    pub fn with_base_relays(mut self, relays: Vec<String>) -> Self {
        self.base_relays = relays;
        self
    }

    pub fn registry(&self) -> &EchoListenerRegistry {
        &self.registry
    }

    /// `compute-relay-plan`
    pub fn compute_relay_plan(&self, mut options: RelayPlanOptions) -> RelayPlan {
        if options.base_relays.is_none() && !self.base_relays.is_empty() {
            options.base_relays = Some(self.base_relays.clone());
        }
        compute_relay_plan(&options, self.decoder.as_ref())
    }

    /// `echo-start`
    pub async fn echo_start(
        &self,
        sender: SenderId,
        outbox: Outbox,
        request: EchoStartRequest,
    ) -> IpcReply {
        let sink = notification_sink(&request.listener_id, outbox.clone());
        match self
            .registry
            .start(
                sender,
                &request.listener_id,
                &request.group_credential,
                &request.share_credentials,
                sink,
            )
            .await
        {
            Ok(_) => IpcReply::ok(),
            Err(e) => {
                warn!(
                    listener_id = %request.listener_id,
                    error = %e,
                    "Failed to start echo listener"
                );
                let _ = outbox.send(EchoNotification::Error {
                    listener_id: request.listener_id.clone(),
                    reason: e.reason().to_string(),
                    message: e.to_string(),
                });
                IpcReply::from(&e)
            }
        }
    }

    /// `echo-stop`. Stopping a listener that is not running succeeds.
    pub async fn echo_stop(&self, listener_id: &str) -> IpcReply {
        match self.registry.stop(listener_id).await {
            Ok(_) => IpcReply::ok(),
            Err(e) => IpcReply::from(&e),
        }
    }

    pub fn echo_status(&self) -> Vec<ListenerStatus> {
        self.registry
            .active_listeners()
            .into_iter()
            .filter_map(|id| {
                self.registry.get(&id).map(|listener| ListenerStatus {
                    listener_id: id,
                    sessions: listener.session_count(),
                })
            })
            .collect()
    }

    /// Host signal that a sender (window) was destroyed.
    pub async fn sender_destroyed(&self, sender: SenderId) -> usize {
        self.registry.release_sender(sender).await
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
