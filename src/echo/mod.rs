// SPDX-FileCopyrightText: © 2026 PrivKey LLC
// SPDX-License-Identifier: AGPL-3.0-or-later

#![forbid(unsafe_code)]

mod listener;
mod registry;

use std::sync::Arc;

use tracing::debug;

use crate::error::{LinkError, Result};
use crate::node::{GroupDecoder, NodeFactory};
use crate::relay::{compute_relay_plan, dedupe_relays, RelayPlanOptions};

pub use listener::EchoListener;
pub use registry::{EchoListenerRegistry, SenderId};

/// Message tags that carry an echo from another share of the group.
pub const ECHO_MESSAGE_TAGS: [&str; 4] = [
    "/echo/req",
    "/echo/res",
    "/echo/handler/req",
    "/echo/handler/res",
];

/// Named node events emitted directly in response to an echo.
pub const ECHO_SIGNAL_EVENTS: [&str; 3] = [
    "/echo/handler/req",
    "/echo/sender/res",
    "/echo/sender/ret",
];

pub const MAX_LISTENER_ID_LENGTH: usize = 128;
pub const MAX_SHARES_PER_LISTENER: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EchoReceived {
    pub share_index: usize,
    pub share_credential: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EchoEvent {
    Received(EchoReceived),
    /// Every share of the listener failed to connect.
    Failed { reason: String, message: String },
}

pub type EchoSink = Arc<dyn Fn(EchoEvent) + Send + Sync>;

/// Relays a listener session connects through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EchoRelaySet {
    /// Defaults plus any group relays that are not defaults.
    pub primary: Vec<String>,
    /// Defaults only, tried once when `primary` fails. `None` when the
    /// group adds no relays of its own.
    pub fallback: Option<Vec<String>>,
}

pub fn validate_listener_id(listener_id: &str) -> Result<()> {
    if listener_id.trim().is_empty() {
        return Err(LinkError::InvalidInput("listener id is empty".into()));
    }
    if listener_id.len() > MAX_LISTENER_ID_LENGTH {
        return Err(LinkError::InvalidInput(format!(
            "listener id exceeds {MAX_LISTENER_ID_LENGTH} characters"
        )));
    }
    if !listener_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(LinkError::InvalidInput(
            "listener id contains invalid characters".into(),
        ));
    }
    Ok(())
}

pub fn validate_share_credentials(share_credentials: &[String]) -> Result<()> {
    if share_credentials.is_empty() {
        return Err(LinkError::InvalidInput("no share credentials".into()));
    }
    if share_credentials.len() > MAX_SHARES_PER_LISTENER {
        return Err(LinkError::InvalidInput(format!(
            "at most {MAX_SHARES_PER_LISTENER} share credentials per listener"
        )));
    }
    if let Some(idx) = share_credentials.iter().position(|s| s.trim().is_empty()) {
        return Err(LinkError::InvalidInput(format!(
            "share credential {idx} is empty"
        )));
    }
    Ok(())
}

/// Check every argument of a listen request.
pub fn validate_listen_request(
    listener_id: &str,
    group_credential: &str,
    share_credentials: &[String],
) -> Result<()> {
    validate_listener_id(listener_id)?;
    validate_share_credentials(share_credentials)?;
    if group_credential.trim().is_empty() {
        return Err(LinkError::InvalidInput("group credential is empty".into()));
    }
    Ok(())
}

/// Opens echo listeners for the shares of a group.
pub struct EchoDiscovery {
    factory: Arc<dyn NodeFactory>,
    decoder: Arc<dyn GroupDecoder>,
    base_relays: Vec<String>,
}

impl EchoDiscovery {
    pub fn new(factory: Arc<dyn NodeFactory>, decoder: Arc<dyn GroupDecoder>) -> Self {
        Self {
            factory,
            decoder,
            base_relays: Vec::new(),
        }
    }

    /// Override the default relays, e.g. from the relays config file.
    pub fn with_base_relays(mut self, relays: Vec<String>) -> Self {
        self.base_relays = relays;
        self
    }

    pub fn relay_set(&self, group_credential: &str) -> EchoRelaySet {
        let mut options = RelayPlanOptions::default().with_group_credential(group_credential);
        if !self.base_relays.is_empty() {
            options = options.with_base_relays(self.base_relays.clone());
        }
        let plan = compute_relay_plan(&options, self.decoder.as_ref());

        let primary = dedupe_relays(
            plan.default_relays
                .iter()
                .chain(&plan.group_extras)
                .cloned(),
        );
        let fallback = (!plan.group_extras.is_empty()).then_some(plan.default_relays);

        debug!(
            primary = primary.len(),
            fallback = fallback.is_some(),
            "Selected echo relay set"
        );
        EchoRelaySet { primary, fallback }
    }

    /// Start one listening session per share. Connections are made in the
    /// background; `sink` receives each distinct echo once.
    pub fn listen(
        &self,
        listener_id: &str,
        group_credential: &str,
        share_credentials: &[String],
        sink: EchoSink,
    ) -> Result<EchoListener> {
        validate_listen_request(listener_id, group_credential, share_credentials)?;

        let relays = self.relay_set(group_credential);
        Ok(EchoListener::open(
            listener_id,
            group_credential,
            share_credentials,
            relays,
            self.factory.clone(),
            sink,
        ))
    }
}
