// SPDX-FileCopyrightText: © 2026 PrivKey LLC
// SPDX-License-Identifier: AGPL-3.0-or-later

#![forbid(unsafe_code)]

pub mod config;
pub mod echo;
mod error;
pub mod ipc;
pub mod keepalive;
pub mod node;
mod peer;
pub mod relay;

pub use echo::{
    EchoDiscovery, EchoEvent, EchoListener, EchoListenerRegistry, EchoReceived, EchoRelaySet,
    EchoSink, SenderId,
};
pub use error::{LinkError, Result};
pub use ipc::{EchoNotification, EchoStartRequest, IpcHandler, IpcReply};
pub use keepalive::{
    KeepAliveConfig, KeepAliveOptions, KeepAliveStats, NodeReplaced, SignerKeepAlive,
};
pub use node::{
    GroupDecoder, NodeCell, NodeConfig, NodeEvent, NodeFactory, NodeMessage, SignerNode,
    TransportEvent,
};
pub use peer::{PeerCursor, PeerInfo, PeerStatus};
pub use relay::{compute_relay_plan, normalize_relay_url, RelayPlan, RelayPlanOptions};
