// SPDX-FileCopyrightText: © 2026 PrivKey LLC
// SPDX-License-Identifier: AGPL-3.0-or-later

#![forbid(unsafe_code)]

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Node recreation failed: {0}")]
    NodeRecreation(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl LinkError {
    /// Stable reason code reported across the IPC boundary.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport-error",
            Self::Timeout(_) => "timeout",
            Self::NodeRecreation(_) => "node-recreation-failed",
            Self::Decode(_) => "decode-error",
            Self::InvalidInput(_) => "invalid-input",
            Self::Config(_) | Self::Toml(_) => "config-error",
            Self::Io(_) => "io-error",
            Self::Json(_) => "json-error",
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
