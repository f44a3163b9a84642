// SPDX-FileCopyrightText: © 2026 PrivKey LLC
// SPDX-License-Identifier: AGPL-3.0-or-later

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::error::{LinkError, Result};
use crate::keepalive::KeepAliveOptions;
use crate::relay::{default_relays, dedupe_relays, is_valid_relay_url, normalize_relay_url};

const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        f.write_str(s)
    }
}

fn deserialize_relays<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let relays: Vec<String> = Vec::deserialize(deserializer)?;
    let mut normalized = Vec::with_capacity(relays.len());
    for relay in &relays {
        let url = normalize_relay_url(relay);
        if !is_valid_relay_url(&url) {
            return Err(serde::de::Error::custom(format!(
                "Invalid relay URL: '{relay}'"
            )));
        }
        normalized.push(url);
    }
    Ok(dedupe_relays(normalized))
}

fn deserialize_secs<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<u64>::deserialize(deserializer)?;
    if opt == Some(0) {
        return Err(serde::de::Error::custom("duration must be greater than 0"));
    }
    Ok(opt)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeepAliveSection {
    #[serde(
        default,
        deserialize_with = "deserialize_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub heartbeat_secs: Option<u64>,
    #[serde(
        default,
        deserialize_with = "deserialize_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_secs: Option<u64>,
    #[serde(
        default,
        deserialize_with = "deserialize_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub stale_secs: Option<u64>,
    #[serde(
        default,
        deserialize_with = "deserialize_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_backoff_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, deserialize_with = "deserialize_relays")]
    pub relays: Vec<String>,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub keepalive: KeepAliveSection,
}

impl Config {
    /// Load `path`, falling back to defaults when it is missing or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable config, using defaults"
                );
                Self::default()
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            LinkError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        if metadata.len() > MAX_CONFIG_SIZE {
            return Err(LinkError::Config("Config file too large".into()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("keep-link").join("config.toml"))
            .ok_or_else(|| LinkError::Config("No config directory for this platform".into()))
    }

    /// Configured relays, or the built-in defaults when none are set.
    pub fn base_relays(&self) -> Vec<String> {
        if self.relays.is_empty() {
            default_relays()
        } else {
            self.relays.clone()
        }
    }

    pub fn keepalive_options(&self) -> KeepAliveOptions {
        let defaults = KeepAliveOptions::default();
        let secs =
            |v: Option<u64>, fallback: Duration| v.map(Duration::from_secs).unwrap_or(fallback);
        KeepAliveOptions {
            heartbeat: secs(self.keepalive.heartbeat_secs, defaults.heartbeat),
            timeout: secs(self.keepalive.timeout_secs, defaults.timeout),
            stale: secs(self.keepalive.stale_secs, defaults.stale),
            max_backoff: secs(self.keepalive.max_backoff_secs, defaults.max_backoff),
        }
    }
}
