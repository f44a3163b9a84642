// SPDX-FileCopyrightText: © 2026 PrivKey LLC
// SPDX-License-Identifier: AGPL-3.0-or-later

#![forbid(unsafe_code)]

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::node::GroupDecoder;

/// Maximum length of a relay URL.
pub const MAX_RELAY_URL_LENGTH: usize = 256;

/// Properties of a decoded group that may carry embedded relays, in lookup order.
pub const GROUP_RELAY_FIELDS: [&str; 3] = ["relays", "relayUrls", "relay_urls"];

/// Default relays used when no base relay list is configured.
pub fn default_relays() -> Vec<String> {
    vec![
        "wss://relay.primal.net".into(),
        "wss://relay.nsec.app".into(),
        "wss://relay.damus.io".into(),
        "wss://nos.lol".into(),
    ]
}

/// Normalize a relay URL to the `wss://` scheme.
///
/// `ws`, `http` and `https` schemes are rewritten case-insensitively, a bare
/// host gets a `wss://` prefix and the host casing is left untouched. Blank
/// input yields an empty string. Unknown schemes are returned as-is and are
/// rejected later by [`is_valid_relay_url`].
pub fn normalize_relay_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    match trimmed.split_once("://") {
        Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
            "wss" | "ws" | "http" | "https" => format!("wss://{rest}"),
            _ => trimmed.to_string(),
        },
        None => format!("wss://{trimmed}"),
    }
}

/// Returns true for a normalized `wss://` URL with a non-empty host.
pub fn is_valid_relay_url(url: &str) -> bool {
    if url.len() > MAX_RELAY_URL_LENGTH {
        return false;
    }
    let Some(rest) = url.strip_prefix("wss://") else {
        return false;
    };
    let host = rest.split('/').next().unwrap_or(rest);
    !host.is_empty() && !host.chars().any(char::is_whitespace)
}

/// Case-insensitive dedup keeping the first occurrence and its casing.
pub fn dedupe_relays<I>(relays: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    relays
        .into_iter()
        .filter(|relay| seen.insert(relay.to_lowercase()))
        .collect()
}

fn normalize_all<'a, I>(relays: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    relays
        .into_iter()
        .map(|r| normalize_relay_url(r))
        .filter(|r| is_valid_relay_url(r))
        .collect()
}

/// Relays embedded in a decoded group, read from the first present relay field.
pub fn extract_group_relays(group: &Value) -> Vec<String> {
    GROUP_RELAY_FIELDS
        .iter()
        .find_map(|field| group.get(field))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(normalize_relay_url)
                .filter(|r| is_valid_relay_url(r))
                .collect()
        })
        .unwrap_or_default()
}

fn lenient_strings<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?;
    Ok(values.map(|values| {
        values
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect()
    }))
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayPlanOptions {
    #[serde(deserialize_with = "lenient_strings")]
    pub base_relays: Option<Vec<String>>,
    pub env_relay: Option<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub explicit_relays: Option<Vec<String>>,
    pub group_credential: Option<String>,
    pub decoded_group: Option<Value>,
}

impl RelayPlanOptions {
    pub fn with_base_relays(mut self, relays: Vec<String>) -> Self {
        self.base_relays = Some(relays);
        self
    }

    pub fn with_env_relay(mut self, relay: &str) -> Self {
        self.env_relay = Some(relay.to_string());
        self
    }

    pub fn with_explicit_relays(mut self, relays: Vec<String>) -> Self {
        self.explicit_relays = Some(relays);
        self
    }

    pub fn with_group_credential(mut self, credential: &str) -> Self {
        self.group_credential = Some(credential.to_string());
        self
    }

    pub fn with_decoded_group(mut self, group: Value) -> Self {
        self.decoded_group = Some(group);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPlan {
    pub relays: Vec<String>,
    pub env_relays: Vec<String>,
    pub default_relays: Vec<String>,
    pub group_relays: Vec<String>,
    pub explicit_relays: Vec<String>,
    pub group_extras: Vec<String>,
}

fn resolve_group_relays(options: &RelayPlanOptions, decoder: &dyn GroupDecoder) -> Vec<String> {
    if let Some(group) = &options.decoded_group {
        return extract_group_relays(group);
    }

    let Some(credential) = options
        .group_credential
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    else {
        return Vec::new();
    };

    match decoder.decode_group(credential) {
        Ok(group) => extract_group_relays(&group),
        Err(e) => {
            warn!(error = %e, "Failed to decode group credential, ignoring group relays");
            Vec::new()
        }
    }
}

/// Merge explicit, environment, default and group relays into one plan.
///
/// A non-blank environment relay pins the plan to the explicit relays plus
/// itself. Otherwise explicit relays come first, then defaults, then relays
/// embedded in the group.
pub fn compute_relay_plan(options: &RelayPlanOptions, decoder: &dyn GroupDecoder) -> RelayPlan {
    let default_relays = match options.base_relays.as_ref().map(normalize_all) {
        Some(base) if !base.is_empty() => dedupe_relays(base),
        _ => default_relays(),
    };

    let explicit_relays = options
        .explicit_relays
        .as_ref()
        .map(normalize_all)
        .unwrap_or_default();

    let env_relays: Vec<String> = options
        .env_relay
        .as_deref()
        .map(normalize_relay_url)
        .filter(|r| is_valid_relay_url(r))
        .into_iter()
        .collect();

    let group_relays = dedupe_relays(resolve_group_relays(options, decoder));

    let default_keys: HashSet<String> = default_relays.iter().map(|r| r.to_lowercase()).collect();
    let group_extras: Vec<String> = group_relays
        .iter()
        .filter(|r| !default_keys.contains(&r.to_lowercase()))
        .cloned()
        .collect();

    let relays = if env_relays.is_empty() {
        dedupe_relays(
            explicit_relays
                .iter()
                .chain(&default_relays)
                .chain(&group_relays)
                .cloned(),
        )
    } else {
        dedupe_relays(explicit_relays.iter().chain(&env_relays).cloned())
    };

    debug!(
        relays = relays.len(),
        explicit = explicit_relays.len(),
        group = group_relays.len(),
        group_extras = group_extras.len(),
        env = !env_relays.is_empty(),
        "Computed relay plan"
    );

    RelayPlan {
        relays,
        env_relays,
        default_relays,
        group_relays,
        explicit_relays,
        group_extras,
    }
}
