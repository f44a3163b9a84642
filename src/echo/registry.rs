// SPDX-FileCopyrightText: © 2026 PrivKey LLC
// SPDX-License-Identifier: AGPL-3.0-or-later

#![forbid(unsafe_code)]

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{validate_listener_id, EchoDiscovery, EchoListener, EchoSink};
use crate::error::Result;

/// Identifies the party that owns a listener, e.g. one renderer window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SenderId(pub u64);

impl std::fmt::Display for SenderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sender-{}", self.0)
    }
}

struct RegisteredListener {
    owner: SenderId,
    listener: EchoListener,
}

/// Named echo listeners, each independently started and stopped.
pub struct EchoListenerRegistry {
    discovery: EchoDiscovery,
    listeners: Mutex<HashMap<String, RegisteredListener>>,
}

impl EchoListenerRegistry {
    pub fn new(discovery: EchoDiscovery) -> Self {
        Self {
            discovery,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn discovery(&self) -> &EchoDiscovery {
        &self.discovery
    }

    /// Start `listener_id`, disposing any listener already running under it.
    ///
    /// Invalid arguments leave a running listener untouched. The swap happens
    /// under the registry lock, so a concurrent [`Self::release_sender`] sees
    /// either the old listener or the new one.
    pub async fn start(
        &self,
        owner: SenderId,
        listener_id: &str,
        group_credential: &str,
        share_credentials: &[String],
        sink: EchoSink,
    ) -> Result<EchoListener> {
        let (listener, detached) = {
            let mut listeners = self.listeners.lock();
            let listener =
                self.discovery
                    .listen(listener_id, group_credential, share_credentials, sink)?;
            let detached = listeners.remove(listener_id).map(|previous| {
                debug!(listener_id, "Restarting echo listener, disposing previous instance");
                previous.listener.detach()
            });
            listeners.insert(
                listener_id.to_string(),
                RegisteredListener {
                    owner,
                    listener: listener.clone(),
                },
            );
            (listener, detached)
        };

        if let Some(detached) = detached {
            detached.close().await;
        }
        Ok(listener)
    }

    /// Stop `listener_id`. Returns false if nothing was running under it.
    pub async fn stop(&self, listener_id: &str) -> Result<bool> {
        validate_listener_id(listener_id)?;

        let removed = self.listeners.lock().remove(listener_id);
        match removed {
            Some(entry) => {
                entry.listener.cleanup().await;
                Ok(true)
            }
            None => {
                debug!(listener_id, "No echo listener to stop");
                Ok(false)
            }
        }
    }

    /// Clean up every listener owned by a sender that has gone away.
    pub async fn release_sender(&self, owner: SenderId) -> usize {
        let released: Vec<RegisteredListener> = {
            let mut listeners = self.listeners.lock();
            let ids: Vec<String> = listeners
                .iter()
                .filter(|(_, entry)| entry.owner == owner)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| listeners.remove(id)).collect()
        };

        for entry in &released {
            entry.listener.cleanup().await;
        }
        if !released.is_empty() {
            info!(%owner, count = released.len(), "Released echo listeners of destroyed sender");
        }
        released.len()
    }

    /// Clean up every listener.
    pub async fn shutdown(&self) {
        let all: Vec<RegisteredListener> = self.listeners.lock().drain().map(|(_, e)| e).collect();
        for entry in &all {
            entry.listener.cleanup().await;
        }
    }

    pub fn get(&self, listener_id: &str) -> Option<EchoListener> {
        self.listeners
            .lock()
            .get(listener_id)
            .map(|entry| entry.listener.clone())
    }

    pub fn active_listeners(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.listeners.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}
